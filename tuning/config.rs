//! TOML configuration of data creation and of pre-processing chains.
//!
//! Both files are plain serde structures read with `toml`, the same way
//! archives of fitted models are written as human-readable TOML.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::{Binning, CrossValidMethod, RingerOperation};
use crate::create::overrides::EfficiencyValues;
use crate::layout::Float;
use crate::preproc::{
    FirstNthPatterns, Kernel, KernelPca, MapStd, NoPreProc, Norm1, Pca, PcaTarget, PreProc,
    PreProcChain, PreProcCollection, PreProcError, Projection, RemoveMean, RingerEtaMu, RingerRp,
    TrackSimpleNorm, UnitaryRms,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    PreProc(#[from] PreProcError),
}

fn invalid(message: String) -> ConfigError {
    log::error!("{message}");
    ConfigError::Invalid(message)
}

fn default_pattern_output() -> PathBuf {
    PathBuf::from("tuningData")
}

fn default_reference() -> String {
    "Truth".to_string()
}

fn default_true() -> bool {
    true
}

/// Everything the data-creation run needs besides the reader itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDataConfig {
    pub signal_files: Vec<PathBuf>,
    pub background_files: Vec<PathBuf>,
    pub operation: RingerOperation,
    #[serde(default = "default_pattern_output")]
    pub pattern_output: PathBuf,
    /// Defaults to the pattern output with `-eff` appended to the file name.
    #[serde(default)]
    pub efficiency_output: Option<PathBuf>,
    #[serde(default = "default_reference")]
    pub reference_signal: String,
    #[serde(default = "default_reference")]
    pub reference_background: String,
    /// One tree for both classes, or signal then background. Empty leaves
    /// the choice to the reader.
    #[serde(default)]
    pub tree_path: Vec<String>,
    /// Tree holding the benchmark decisions; the pattern tree when unset.
    #[serde(default)]
    pub efficiency_tree_path: Option<Vec<String>>,
    #[serde(default)]
    pub et_bins: Vec<Float>,
    #[serde(default)]
    pub eta_bins: Vec<Float>,
    #[serde(default)]
    pub rates_only: bool,
    #[serde(default)]
    pub cross_validation: Option<CrossValidMethod>,
    #[serde(default)]
    pub efficiency_values: Option<EfficiencyValues>,
    #[serde(default = "default_true")]
    pub to_export: bool,
    #[serde(default = "default_true")]
    pub summaries: bool,
    /// Passed untouched to the reader.
    #[serde(default)]
    pub reader_options: toml::Table,
}

/// Tree paths resolved per class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTrees {
    pub signal: Option<String>,
    pub background: Option<String>,
}

fn split_trees(what: &str, paths: &[String]) -> Result<ClassTrees, ConfigError> {
    match paths {
        [] => Ok(ClassTrees {
            signal: None,
            background: None,
        }),
        [both] => Ok(ClassTrees {
            signal: Some(both.clone()),
            background: Some(both.clone()),
        }),
        [signal, background] => Ok(ClassTrees {
            signal: Some(signal.clone()),
            background: Some(background.clone()),
        }),
        more => Err(invalid(format!(
            "{what} accepts at most two entries (signal, background), got {}",
            more.len()
        ))),
    }
}

fn check_edges(what: &str, edges: &[Float]) -> Result<(), ConfigError> {
    if edges.len() == 1 {
        return Err(invalid(format!("{what} needs at least two edges to define a bin")));
    }
    if edges.windows(2).any(|pair| !(pair[0] < pair[1])) {
        return Err(invalid(format!("{what} must be strictly increasing: {edges:?}")));
    }
    Ok(())
}

impl CreateDataConfig {
    pub fn new(
        signal_files: Vec<PathBuf>,
        background_files: Vec<PathBuf>,
        operation: RingerOperation,
    ) -> Self {
        Self {
            signal_files,
            background_files,
            operation,
            pattern_output: default_pattern_output(),
            efficiency_output: None,
            reference_signal: default_reference(),
            reference_background: default_reference(),
            tree_path: Vec::new(),
            efficiency_tree_path: None,
            et_bins: Vec::new(),
            eta_bins: Vec::new(),
            rates_only: false,
            cross_validation: None,
            efficiency_values: None,
            to_export: true,
            summaries: true,
            reader_options: toml::Table::new(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signal_files.is_empty() {
            return Err(invalid("No signal files were given".to_string()));
        }
        if self.background_files.is_empty() {
            return Err(invalid("No background files were given".to_string()));
        }
        check_edges("et_bins", &self.et_bins)?;
        check_edges("eta_bins", &self.eta_bins)?;
        self.pattern_trees()?;
        self.efficiency_trees()?;
        if let Some(values) = &self.efficiency_values {
            values
                .check_shape(self.binning().grid_shape())
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        Ok(())
    }

    pub fn binning(&self) -> Binning {
        Binning::new(
            Array1::from(self.et_bins.clone()),
            Array1::from(self.eta_bins.clone()),
        )
    }

    pub fn pattern_trees(&self) -> Result<ClassTrees, ConfigError> {
        split_trees("tree_path", &self.tree_path)
    }

    pub fn efficiency_trees(&self) -> Result<ClassTrees, ConfigError> {
        match &self.efficiency_tree_path {
            None => self.pattern_trees(),
            Some(paths) => split_trees("efficiency_tree_path", paths),
        }
    }

    pub fn efficiency_path(&self) -> PathBuf {
        self.efficiency_output
            .clone()
            .unwrap_or_else(|| append_to_file_name(&self.pattern_output, "eff"))
    }
}

/// `dir/name.ext` becomes `dir/name-<suffix>.ext`.
pub fn append_to_file_name(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{suffix}"),
    };
    path.with_file_name(name)
}

fn default_kernel_degree() -> i32 {
    3
}

fn default_coef0() -> Float {
    1.0
}

/// Kernel of a kernel PCA step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum KernelSpec {
    #[default]
    Rbf,
    Linear,
    Poly {
        #[serde(default = "default_kernel_degree")]
        degree: i32,
        #[serde(default = "default_coef0")]
        coef0: Float,
    },
    Sigmoid {
        #[serde(default = "default_coef0")]
        coef0: Float,
    },
}

impl KernelSpec {
    fn build(self, gamma: Option<Float>) -> Kernel {
        match self {
            KernelSpec::Rbf => Kernel::Rbf { gamma },
            KernelSpec::Linear => Kernel::Linear,
            KernelSpec::Poly { degree, coef0 } => Kernel::Poly {
                degree,
                gamma,
                coef0,
            },
            KernelSpec::Sigmoid { coef0 } => Kernel::Sigmoid { gamma, coef0 },
        }
    }
}

fn default_eta_max() -> Float {
    2.5
}

fn default_pileup_threshold() -> Float {
    60.0
}

fn default_alpha_beta() -> Float {
    1.0
}

/// One unfitted pre-processing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSpec {
    NoPreProc,
    RemoveMean,
    UnitaryRms,
    MapStd,
    Norm1,
    FirstNthPatterns {
        n: usize,
    },
    /// Rows are input features, columns output features.
    Projection {
        matrix: Vec<Vec<Float>>,
    },
    TrackSimpleNorm,
    RingerRp {
        #[serde(default = "default_alpha_beta")]
        alpha: Float,
        #[serde(default = "default_alpha_beta")]
        beta: Float,
    },
    RingerEtaMu {
        #[serde(default)]
        eta_min: Float,
        #[serde(default = "default_eta_max")]
        eta_max: Float,
        #[serde(default = "default_pileup_threshold")]
        pileup_threshold: Float,
    },
    Pca {
        #[serde(default)]
        energy: Option<Float>,
        #[serde(default)]
        n_components: Option<usize>,
    },
    KernelPca {
        #[serde(default)]
        kernel: KernelSpec,
        #[serde(default)]
        gamma: Option<Float>,
        #[serde(default)]
        energy: Option<Float>,
        #[serde(default)]
        n_components: Option<usize>,
        #[serde(default)]
        max_samples: Option<usize>,
        #[serde(default)]
        seed: Option<u64>,
    },
}

fn projection_matrix(rows: &[Vec<Float>]) -> Result<Array2<Float>, ConfigError> {
    let n_cols = rows.first().map_or(0, Vec::len);
    if rows.is_empty() || n_cols == 0 {
        return Err(invalid("A projection needs a non-empty matrix".to_string()));
    }
    if let Some(row) = rows.iter().find(|row| row.len() != n_cols) {
        return Err(invalid(format!(
            "Projection rows must all hold {n_cols} values, found one with {}",
            row.len()
        )));
    }
    let flat: Vec<Float> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), n_cols), flat)
        .map_err(|err| ConfigError::Invalid(err.to_string()))
}

fn pca_target(
    energy: Option<Float>,
    n_components: Option<usize>,
) -> Result<PcaTarget, ConfigError> {
    match (energy, n_components) {
        (Some(energy), None) => Ok(PcaTarget::Energy(energy)),
        (None, Some(n)) => Ok(PcaTarget::Components(n)),
        (None, None) => Ok(PcaTarget::All),
        (Some(_), Some(_)) => Err(invalid(
            "Set either energy or n_components for a PCA step, not both".to_string(),
        )),
    }
}

impl StepSpec {
    pub fn build(&self) -> Result<PreProc, ConfigError> {
        let pp: PreProc = match self {
            StepSpec::NoPreProc => NoPreProc.into(),
            StepSpec::RemoveMean => RemoveMean::new().into(),
            StepSpec::UnitaryRms => UnitaryRms::new().into(),
            StepSpec::MapStd => MapStd::new().into(),
            StepSpec::Norm1 => Norm1.into(),
            StepSpec::FirstNthPatterns { n } => FirstNthPatterns::new(*n).into(),
            StepSpec::Projection { matrix } => Projection::new(projection_matrix(matrix)?).into(),
            StepSpec::TrackSimpleNorm => TrackSimpleNorm::new().into(),
            StepSpec::RingerRp { alpha, beta } => RingerRp::new(*alpha, *beta).into(),
            StepSpec::RingerEtaMu {
                eta_min,
                eta_max,
                pileup_threshold,
            } => RingerEtaMu::new(*eta_min, *eta_max, *pileup_threshold).into(),
            StepSpec::Pca {
                energy,
                n_components,
            } => Pca::new(pca_target(*energy, *n_components)?).into(),
            StepSpec::KernelPca {
                kernel,
                gamma,
                energy,
                n_components,
                max_samples,
                seed,
            } => {
                let mut kpca = KernelPca::new(kernel.build(*gamma));
                match pca_target(*energy, *n_components)? {
                    PcaTarget::Energy(energy) => kpca = kpca.with_energy(energy)?,
                    PcaTarget::Components(n) => kpca = kpca.with_components(n),
                    PcaTarget::All => {}
                }
                if let Some(max_samples) = max_samples {
                    kpca = kpca.with_max_samples(*max_samples);
                }
                if let Some(seed) = seed {
                    kpca = kpca.with_seed(*seed);
                }
                kpca.into()
            }
        };
        Ok(pp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChainSpec {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl ChainSpec {
    pub fn build(&self) -> Result<PreProcChain, ConfigError> {
        self.steps.iter().map(StepSpec::build).collect()
    }
}

/// A collection of chains, one per `[[chains]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PreProcConfig {
    #[serde(default)]
    pub chains: Vec<ChainSpec>,
}

impl PreProcConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn collection(&self) -> Result<PreProcCollection, ConfigError> {
        if self.chains.is_empty() {
            return Err(invalid("The pre-processing configuration holds no chains".to_string()));
        }
        let chains = self
            .chains
            .iter()
            .map(ChainSpec::build)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PreProcCollection::from_chains(chains))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preproc::Transform;
    use tempfile::tempdir;

    const CREATE: &str = r#"
signal_files = ["sgn_1.root", "sgn_2.root"]
background_files = ["bkg.root"]
operation = "L2Calo"
pattern_output = "out/tuningData.rdz"
tree_path = ["Egamma/signal", "Egamma/background"]
efficiency_tree_path = ["Egamma/rates"]
et_bins = [15.0, 20.0, 30.0]
eta_bins = [0.0, 0.8, 1.37, 2.5]
cross_validation = "jack_knife"
efficiency_values = [97.0, 2.0]

[reader_options]
n_clusters = 100
"#;

    #[test]
    fn create_config_reads_defaults_and_trees() {
        let config = CreateDataConfig::from_toml_str(CREATE).unwrap();
        assert_eq!(config.operation, RingerOperation::L2Calo);
        assert_eq!(config.reference_signal, "Truth");
        assert!(config.to_export && config.summaries && !config.rates_only);
        assert_eq!(config.cross_validation, Some(CrossValidMethod::JackKnife));
        assert_eq!(config.binning().grid_shape(), (2, 3));
        assert_eq!(
            config.pattern_trees().unwrap().background.as_deref(),
            Some("Egamma/background")
        );
        let rates = config.efficiency_trees().unwrap();
        assert_eq!(rates.signal, rates.background);
        assert_eq!(config.efficiency_path(), PathBuf::from("out/tuningData-eff.rdz"));
        assert_eq!(config.reader_options["n_clusters"].as_integer(), Some(100));
    }

    #[test]
    fn config_survives_a_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("create.toml");
        let config = CreateDataConfig::from_toml_str(CREATE).unwrap();
        config.save(&path).unwrap();
        assert_eq!(CreateDataConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn bad_create_configs_are_rejected() {
        let mut config = CreateDataConfig::new(
            vec!["s.root".into()],
            vec!["b.root".into()],
            RingerOperation::HLT,
        );
        config.validate().unwrap();
        config.tree_path = vec!["a".into(), "b".into(), "c".into()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.tree_path.clear();
        config.et_bins = vec![20.0, 15.0];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.et_bins = vec![15.0, 20.0];
        config.efficiency_values = Some(EfficiencyValues::PerBin(vec![
            vec![[97.0, 2.0]],
            vec![[96.0, 3.0]],
        ]));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            CreateDataConfig::from_toml_str("operation = \"L2\"\nunknown = 1"),
            Err(ConfigError::TomlParseError(_))
        ));
    }

    #[test]
    fn chains_are_built_from_steps() {
        let text = r#"
[[chains]]
steps = [{ kind = "norm1" }, { kind = "pca", energy = 0.9 }]

[[chains]]
steps = [
  { kind = "ringer_rp", alpha = 0.5 },
  { kind = "kernel_pca", kernel = { name = "poly", degree = 2 }, n_components = 4, seed = 7 },
]

[[chains]]
steps = []
"#;
        let collection = PreProcConfig::from_toml_str(text)
            .unwrap()
            .collection()
            .unwrap();
        let names: Vec<String> = collection.chains().map(|chain| chain.short_name()).collect();
        assert_eq!(names, vec!["N1-PCA_90", "Rp-kPCAc4", "NoPreProc"]);
    }

    #[test]
    fn invalid_steps_fail_to_build() {
        let both = StepSpec::Pca {
            energy: Some(0.9),
            n_components: Some(3),
        };
        assert!(matches!(both.build(), Err(ConfigError::Invalid(_))));
        let ragged = StepSpec::Projection {
            matrix: vec![vec![1.0, 0.0], vec![1.0]],
        };
        assert!(matches!(ragged.build(), Err(ConfigError::Invalid(_))));
        let energy = StepSpec::KernelPca {
            kernel: KernelSpec::Linear,
            gamma: None,
            energy: Some(1.5),
            n_components: None,
            max_samples: None,
            seed: None,
        };
        assert!(matches!(energy.build(), Err(ConfigError::PreProc(_))));
        assert!(PreProcConfig::default().collection().is_err());
    }

    #[test]
    fn file_names_get_suffixes() {
        assert_eq!(
            append_to_file_name(Path::new("a/b/data.rdz"), "eff"),
            PathBuf::from("a/b/data-eff.rdz")
        );
        assert_eq!(append_to_file_name(Path::new("data"), "eff"), PathBuf::from("data-eff"));
    }
}
