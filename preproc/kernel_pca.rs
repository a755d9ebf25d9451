//! Kernel principal component projection.
//!
//! The fit is quadratic in memory and cubic in time with the number of
//! training observations, so each group is subsampled to a fixed cap before
//! the kernel matrix is built. The subsample uses a seeded generator and is
//! therefore reproducible.

use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use super::batch::PatternBatch;
use super::pca::{components_for_energy, sorted_eigenpairs};
use super::primitives::check_features;
use super::{PreProcError, RawParams, Transform, not_fitted};
use crate::layout::Float;
use crate::raw::{RawDict, RawDictExt, RawValue};

const DEFAULT_MAX_SAMPLES: usize = 5000;
// Relative size below which an eigenvalue counts as zero.
const ZERO_EIGENVALUE: Float = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    /// `exp(-gamma |x - y|^2)`; gamma defaults to one over the feature count.
    Rbf { gamma: Option<Float> },
    Linear,
    /// `(gamma <x, y> + coef0)^degree`.
    Poly {
        degree: i32,
        gamma: Option<Float>,
        coef0: Float,
    },
    /// `tanh(gamma <x, y> + coef0)`.
    Sigmoid { gamma: Option<Float>, coef0: Float },
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Rbf { gamma: None }
    }
}

impl Kernel {
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Rbf { .. } => "rbf",
            Kernel::Linear => "linear",
            Kernel::Poly { .. } => "poly",
            Kernel::Sigmoid { .. } => "sigmoid",
        }
    }

    fn gamma(&self) -> Option<Float> {
        match self {
            Kernel::Rbf { gamma } | Kernel::Poly { gamma, .. } | Kernel::Sigmoid { gamma, .. } => {
                *gamma
            }
            Kernel::Linear => None,
        }
    }

    /// Gram matrix between the rows of `left` and the rows of `right`.
    fn gram(
        &self,
        left: ArrayView2<'_, Float>,
        right: ArrayView2<'_, Float>,
        gamma: Float,
    ) -> Array2<Float> {
        let inner = left.dot(&right.t());
        match *self {
            Kernel::Linear => inner,
            Kernel::Rbf { .. } => {
                let left_sq = left.map_axis(Axis(1), |row| row.dot(&row));
                let right_sq = right.map_axis(Axis(1), |row| row.dot(&row));
                let mut out = inner;
                for ((i, j), value) in out.indexed_iter_mut() {
                    let distance = (left_sq[i] + right_sq[j] - 2.0 * *value).max(0.0);
                    *value = (-gamma * distance).exp();
                }
                out
            }
            Kernel::Poly { degree, coef0, .. } => inner.mapv(|v| (gamma * v + coef0).powi(degree)),
            Kernel::Sigmoid { coef0, .. } => inner.mapv(|v| (gamma * v + coef0).tanh()),
        }
    }

    fn to_raw(self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("name".into(), RawValue::text(self.name()));
        raw.insert(
            "gamma".into(),
            self.gamma().map_or(RawValue::Null, RawValue::Float),
        );
        match self {
            Kernel::Poly { degree, coef0, .. } => {
                raw.insert("degree".into(), RawValue::Int(i64::from(degree)));
                raw.insert("coef0".into(), RawValue::Float(coef0));
            }
            Kernel::Sigmoid { coef0, .. } => {
                raw.insert("coef0".into(), RawValue::Float(coef0));
            }
            Kernel::Rbf { .. } | Kernel::Linear => {}
        }
        raw
    }

    fn from_raw(raw: &RawDict) -> Result<Self, PreProcError> {
        let gamma = match raw.get("gamma") {
            None | Some(RawValue::Null) => None,
            Some(value) => Some(value.require_f64("gamma")?),
        };
        match raw.require_str("name")? {
            "rbf" => Ok(Kernel::Rbf { gamma }),
            "linear" => Ok(Kernel::Linear),
            "poly" => Ok(Kernel::Poly {
                degree: raw.require("degree")?.require_i64("degree")? as i32,
                gamma,
                coef0: raw.require_f64("coef0")?,
            }),
            "sigmoid" => Ok(Kernel::Sigmoid {
                gamma,
                coef0: raw.require_f64("coef0")?,
            }),
            other => Err(PreProcError::Config {
                name: "KernelPCA".to_string(),
                reason: format!("unknown kernel '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct KernelPcaFit {
    gamma: Float,
    /// Training observations the kernel is evaluated against.
    sample: Array2<Float>,
    /// Eigenvectors of the centred kernel scaled by `1 / sqrt(lambda)`.
    alphas: Array2<Float>,
    /// Column means of the training kernel matrix.
    kernel_means: Array1<Float>,
    kernel_total_mean: Float,
    explained_variance_ratio: Array1<Float>,
}

fn check_energy(energy: Float) -> Result<Float, PreProcError> {
    if energy > 0.0 && energy <= 1.0 {
        return Ok(energy);
    }
    log::error!("Energy value must be in: [0,1]");
    Err(PreProcError::Config {
        name: "KernelPCA".to_string(),
        reason: format!("energy must lie in (0, 1], got {energy}"),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelPca {
    kernel: Kernel,
    energy: Option<Float>,
    n_components: Option<usize>,
    max_samples: usize,
    seed: u64,
    fit: Option<KernelPcaFit>,
}

impl Default for KernelPca {
    fn default() -> Self {
        Self {
            kernel: Kernel::default(),
            energy: None,
            n_components: None,
            max_samples: DEFAULT_MAX_SAMPLES,
            seed: 0,
            fit: None,
        }
    }
}

impl KernelPca {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            ..Self::default()
        }
    }

    /// Keeps the fewest components whose explained variance exceeds `energy`.
    pub fn with_energy(mut self, energy: Float) -> Result<Self, PreProcError> {
        self.energy = Some(check_energy(energy)?);
        Ok(self)
    }

    pub fn with_components(mut self, n_components: usize) -> Self {
        self.n_components = Some(n_components);
        self
    }

    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn variance(&self) -> Option<&Array1<Float>> {
        self.fit.as_ref().map(|fit| &fit.explained_variance_ratio)
    }

    pub fn n_components(&self) -> Option<usize> {
        self.fit
            .as_ref()
            .map(|fit| fit.alphas.ncols())
            .or(self.n_components)
    }

    /// Number of training observations retained by the last fit.
    pub fn n_fit_samples(&self) -> Option<usize> {
        self.fit.as_ref().map(|fit| fit.sample.nrows())
    }

    fn subsample(&self, batch: &PatternBatch) -> Result<Array2<Float>, PreProcError> {
        let cap = if batch.len() > 1 {
            (self.max_samples / 2).max(1)
        } else {
            self.max_samples.max(1)
        };
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut parts = Vec::with_capacity(batch.len());
        for group in batch.groups() {
            let data = batch.layout().canonical(group.data.view());
            if data.nrows() > cap {
                log::warn!(
                    "Group '{}' has more than {cap} samples. Reducing it for the kernel fit.",
                    group.label
                );
                let mut rows = sample(&mut rng, data.nrows(), cap).into_vec();
                rows.sort_unstable();
                parts.push(data.select(Axis(0), &rows));
            } else {
                parts.push(data.to_owned());
            }
        }
        let views: Vec<ArrayView2<'_, Float>> = parts.iter().map(|part| part.view()).collect();
        Ok(ndarray::concatenate(Axis(0), &views)?)
    }

    fn project(&self, fit: &KernelPcaFit, data: ArrayView2<'_, Float>) -> Array2<Float> {
        let gram = self.kernel.gram(data, fit.sample.view(), fit.gamma);
        let row_means = gram
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(gram.nrows()))
            .insert_axis(Axis(1));
        let centred = gram - &fit.kernel_means - &row_means + fit.kernel_total_mean;
        centred.dot(&fit.alphas)
    }
}

impl Transform for KernelPca {
    fn name(&self) -> String {
        match (self.energy, self.n_components()) {
            (Some(energy), _) => format!("KernelPCA_energy_{}", (energy * 100.0).round() as u32),
            (None, Some(n)) => format!("KernelPCA_ncomp_{n}"),
            (None, None) => "KernelPCA_ncomp_all".to_string(),
        }
    }

    fn short_name(&self) -> String {
        match (self.energy, self.n_components()) {
            (Some(energy), _) => format!("kPCAe{}", (energy * 100.0).round() as u32),
            (None, Some(n)) => format!("kPCAc{n}"),
            (None, None) => "kPCAcall".to_string(),
        }
    }

    fn apply(&self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let fit = self.fit.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        batch.map_canonical(|data| {
            check_features(&self.name(), fit.sample.ncols(), &data)?;
            Ok(self.project(fit, data))
        })
    }

    fn take_params(&mut self, batch: &PatternBatch) -> Result<PatternBatch, PreProcError> {
        let n_features = batch.n_features()?;
        let sample = self.subsample(batch)?;
        if sample.nrows() == 0 {
            return Err(PreProcError::NoObservations { name: self.name() });
        }
        let gamma = self
            .kernel
            .gamma()
            .unwrap_or(1.0 / n_features.max(1) as Float);

        log::info!("fitting dataset...");
        let gram = self.kernel.gram(sample.view(), sample.view(), gamma);
        let kernel_means = gram
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(gram.ncols()));
        let kernel_total_mean = kernel_means.mean().unwrap_or(0.0);
        let centred = &gram
            - &kernel_means
            - &kernel_means.view().insert_axis(Axis(1))
            + kernel_total_mean;

        let (values, vectors) = sorted_eigenpairs(&centred)?;
        let largest = values.first().copied().unwrap_or(0.0).max(0.0);
        let positive = values
            .iter()
            .take_while(|&&v| v > largest * ZERO_EIGENVALUE && v > 0.0)
            .count();
        if positive == 0 {
            return Err(PreProcError::Config {
                name: self.name(),
                reason: "the centred kernel matrix has no positive eigenvalue".to_string(),
            });
        }
        let kept_values = values.slice(s![..positive]).to_owned();
        let explained_variance_ratio = &kept_values / kept_values.sum();

        let keep = match (self.energy, self.n_components) {
            (Some(energy), _) => components_for_energy(&explained_variance_ratio, energy),
            (None, Some(n)) => n.min(positive),
            (None, None) => positive,
        };
        log::info!("Variance cut. Using components = {keep} of {positive}");

        let scale = kept_values.slice(s![..keep]).mapv(|v| 1.0 / v.sqrt());
        let alphas = &vectors.slice(s![.., ..keep]) * &scale;
        self.fit = Some(KernelPcaFit {
            gamma,
            sample,
            alphas,
            kernel_means,
            kernel_total_mean,
            explained_variance_ratio,
        });
        self.apply(batch)
    }

    fn release(&mut self) {
        self.fit = None;
    }
}

impl RawParams for KernelPca {
    fn to_raw_params(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("kernel".into(), RawValue::Dict(self.kernel.to_raw()));
        raw.insert(
            "energy".into(),
            self.energy.map_or(RawValue::Null, RawValue::Float),
        );
        raw.insert(
            "nComponents".into(),
            self.n_components.map_or(RawValue::Null, RawValue::count),
        );
        raw.insert("maxSamples".into(), RawValue::count(self.max_samples));
        raw.insert("seed".into(), RawValue::Int(self.seed as i64));
        if let Some(fit) = &self.fit {
            let mut params = RawDict::new();
            params.insert("gamma".into(), RawValue::Float(fit.gamma));
            params.insert("sample".into(), RawValue::matrix(fit.sample.view()));
            params.insert("alphas".into(), RawValue::matrix(fit.alphas.view()));
            params.insert("kernelMeans".into(), RawValue::vector(fit.kernel_means.view()));
            params.insert("kernelTotalMean".into(), RawValue::Float(fit.kernel_total_mean));
            params.insert(
                "variance".into(),
                RawValue::vector(fit.explained_variance_ratio.view()),
            );
            raw.insert("fit".into(), RawValue::Dict(params));
        }
        raw
    }

    fn from_raw_params(raw: &RawDict) -> Result<Self, PreProcError> {
        let energy = match raw.get("energy") {
            None | Some(RawValue::Null) => None,
            Some(value) => Some(check_energy(value.require_f64("energy")?)?),
        };
        let n_components = match raw.get("nComponents") {
            None | Some(RawValue::Null) => None,
            Some(value) => Some(value.require_usize("nComponents")?),
        };
        let fit = match raw.get("fit") {
            None | Some(RawValue::Null) => None,
            Some(value) => {
                let params = value.require_dict("fit")?;
                Some(KernelPcaFit {
                    gamma: params.require_f64("gamma")?,
                    sample: params.require_matrix("sample")?,
                    alphas: params.require_matrix("alphas")?,
                    kernel_means: params.require_vector("kernelMeans")?,
                    kernel_total_mean: params.require_f64("kernelTotalMean")?,
                    explained_variance_ratio: params.require_vector("variance")?,
                })
            }
        };
        Ok(Self {
            kernel: Kernel::from_raw(raw.require_dict("kernel")?)?,
            energy,
            n_components,
            max_samples: raw.require_usize("maxSamples")?,
            seed: raw.require("seed")?.require_i64("seed")? as u64,
            fit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::preproc::{Pca, PcaTarget};
    use approx::assert_abs_diff_eq;
    use rand::Rng;

    fn cloud(seed: u64, rows: usize) -> Array2<Float> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, 3), |(_, j)| {
            let spread = [3.0, 1.0, 0.2][j];
            rng.gen_range(-spread..spread)
        })
    }

    fn batch() -> PatternBatch {
        PatternBatch::signal_background(Layout::ObservationsAsRows, cloud(1, 40), cloud(2, 30))
    }

    #[test]
    fn fit_output_matches_apply() {
        let mut kpca = KernelPca::new(Kernel::Rbf { gamma: Some(0.5) }).with_components(4);
        let fitted = kpca.take_params(&batch()).unwrap();
        let applied = kpca.apply(&batch()).unwrap();
        for (a, b) in fitted.groups().iter().zip(applied.groups()) {
            assert_abs_diff_eq!(a.data, b.data, epsilon = 1e-9);
        }
        assert_eq!(fitted.data(0).unwrap().dim(), (40, 4));
        assert_eq!(kpca.name(), "KernelPCA_ncomp_4");
        assert_eq!(kpca.short_name(), "kPCAc4");
    }

    #[test]
    fn linear_kernel_matches_pca_up_to_sign() {
        let data = batch();
        let mut kpca = KernelPca::new(Kernel::Linear).with_components(2);
        let kernel_out = kpca.take_params(&data).unwrap().joint().unwrap();
        let mut pca = Pca::new(PcaTarget::Components(2));
        let pca_out = pca.take_params(&data).unwrap().joint().unwrap();
        for component in 0..2 {
            let a = kernel_out.column(component);
            let b = pca_out.column(component);
            let same = (&a - &b).mapv(f64::abs).sum();
            let flipped = (&a + &b).mapv(f64::abs).sum();
            assert!(same.min(flipped) < 1e-6, "component {component} differs");
        }
    }

    #[test]
    fn energy_selects_leading_components() {
        let mut kpca = KernelPca::new(Kernel::Linear).with_energy(0.5).unwrap();
        kpca.take_params(&batch()).unwrap();
        assert_eq!(kpca.n_components(), Some(1));
        let ratios = kpca.variance().unwrap();
        assert_abs_diff_eq!(ratios.sum(), 1.0, epsilon = 1e-12);
        assert_eq!(kpca.name(), "KernelPCA_energy_50");
    }

    #[test]
    fn energy_above_one_is_rejected() {
        assert!(matches!(
            KernelPca::default().with_energy(1.5),
            Err(PreProcError::Config { .. })
        ));
    }

    #[test]
    fn stored_energy_above_one_is_rejected_on_load() {
        let mut raw = KernelPca::default().with_energy(0.9).unwrap().to_raw_params();
        assert!(KernelPca::from_raw_params(&raw).is_ok());
        raw.insert("energy".into(), RawValue::Float(1.5));
        assert!(matches!(
            KernelPca::from_raw_params(&raw),
            Err(PreProcError::Config { .. })
        ));
    }

    #[test]
    fn large_groups_are_subsampled_reproducibly() {
        let data =
            PatternBatch::signal_background(Layout::ObservationsAsRows, cloud(3, 50), cloud(4, 10));
        let mut first = KernelPca::new(Kernel::Rbf { gamma: None })
            .with_max_samples(40)
            .with_seed(11);
        first.take_params(&data).unwrap();
        assert_eq!(first.n_fit_samples(), Some(30));

        let mut second = first.clone();
        second.release();
        second.take_params(&data).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn revert_is_unsupported() {
        let mut kpca = KernelPca::new(Kernel::Linear);
        let out = kpca.take_params(&batch()).unwrap();
        assert!(kpca.revert(&out).is_err());
    }
}
