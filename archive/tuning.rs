//! Archive of per-bin signal and background patterns.

use std::path::{Path, PathBuf};

use itertools::iproduct;
use ndarray::{Array1, Array2};

use super::benchmark::{BenchmarkEfficiencyArchive, LoadOptions, ensure_extension, read_upgraded};
use super::grid::{BinGrid, Binning, bin_str};
use super::{ArchiveError, export};
use crate::base_info::{BaseInfo, BaseInfoKind};
use crate::layout::{Float, Layout};
use crate::preproc::{PatternBatch, PreProcCollection, PreProcError};
use crate::raw::{Container, RawDict, RawDictExt, RawValue, write_container};

const TUNING_TYPE: &str = "TuningDataArchive";

/// Patterns of one class on the bin grid, observations as rows.
pub type PatternGrid = BinGrid<Array2<Float>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Signal,
    Background,
}

impl Class {
    fn prefix(self) -> &'static str {
        match self {
            Class::Signal => "signal",
            Class::Background => "background",
        }
    }

    fn patterns_key(self, et: usize, eta: usize) -> String {
        format!("{}Patterns_{}", self.prefix(), bin_str(et, eta))
    }

    fn info_key(self, kind: BaseInfoKind, et: usize, eta: usize) -> String {
        format!("{}{}_{}", self.prefix(), kind, bin_str(et, eta))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuningDataArchive {
    benchmark: BenchmarkEfficiencyArchive,
    signal_patterns: PatternGrid,
    background_patterns: PatternGrid,
    signal_base_info: Option<BinGrid<BaseInfo>>,
    background_base_info: Option<BinGrid<BaseInfo>>,
}

impl TuningDataArchive {
    pub fn new(
        benchmark: BenchmarkEfficiencyArchive,
        signal_patterns: PatternGrid,
        background_patterns: PatternGrid,
    ) -> Result<Self, ArchiveError> {
        if signal_patterns.shape() != background_patterns.shape() {
            log::error!("Signal and background patterns lengths do not match.");
            return Err(ArchiveError::PatternMismatch {
                signal: signal_patterns.shape(),
                background: background_patterns.shape(),
            });
        }
        let shape = benchmark.binning().grid_shape();
        signal_patterns.check_shape("Signal patterns", shape)?;
        background_patterns.check_shape("Background patterns", shape)?;
        Ok(Self {
            benchmark,
            signal_patterns,
            background_patterns,
            signal_base_info: None,
            background_base_info: None,
        })
    }

    pub fn with_base_info(
        mut self,
        signal: BinGrid<BaseInfo>,
        background: BinGrid<BaseInfo>,
    ) -> Result<Self, ArchiveError> {
        check_events("Signal", &self.signal_patterns, &signal)?;
        check_events("Background", &self.background_patterns, &background)?;
        self.signal_base_info = Some(signal);
        self.background_base_info = Some(background);
        Ok(self)
    }

    pub fn benchmark(&self) -> &BenchmarkEfficiencyArchive {
        &self.benchmark
    }

    pub fn benchmark_mut(&mut self) -> &mut BenchmarkEfficiencyArchive {
        &mut self.benchmark
    }

    pub fn binning(&self) -> &Binning {
        self.benchmark.binning()
    }

    pub fn n_et_bins(&self) -> usize {
        self.benchmark.n_et_bins()
    }

    pub fn n_eta_bins(&self) -> usize {
        self.benchmark.n_eta_bins()
    }

    pub fn signal_patterns(&self) -> &PatternGrid {
        &self.signal_patterns
    }

    pub fn background_patterns(&self) -> &PatternGrid {
        &self.background_patterns
    }

    pub fn signal_base_info(&self) -> Option<&BinGrid<BaseInfo>> {
        self.signal_base_info.as_ref()
    }

    pub fn background_base_info(&self) -> Option<&BinGrid<BaseInfo>> {
        self.background_base_info.as_ref()
    }

    /// Signal patterns of the only bin of a collapsed archive.
    pub fn signal_pattern(&self) -> Option<&Array2<Float>> {
        self.collapsed(&self.signal_patterns)
    }

    pub fn background_pattern(&self) -> Option<&Array2<Float>> {
        self.collapsed(&self.background_patterns)
    }

    fn collapsed<'a, T>(&self, grid: &'a BinGrid<T>) -> Option<&'a T> {
        if self.benchmark.is_collapsed() {
            grid.as_single()
        } else {
            None
        }
    }

    pub fn to_raw(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("type".into(), RawValue::text(TUNING_TYPE));
        self.benchmark.write_raw(&mut raw);
        for (class, patterns, info) in [
            (Class::Signal, &self.signal_patterns, &self.signal_base_info),
            (
                Class::Background,
                &self.background_patterns,
                &self.background_base_info,
            ),
        ] {
            for ((et, eta), data) in patterns.iter() {
                raw.insert(class.patterns_key(et, eta), RawValue::matrix(data.view()));
            }
            for ((et, eta), cell) in info.iter().flat_map(|grid| grid.iter()) {
                for kind in BaseInfoKind::ALL {
                    raw.insert(
                        class.info_key(kind, et, eta),
                        RawValue::vector(cell.get(kind)),
                    );
                }
            }
        }
        raw
    }

    fn decode(raw: &RawDict, options: &LoadOptions, version: i64) -> Result<Self, ArchiveError> {
        let benchmark = BenchmarkEfficiencyArchive::decode(raw, options, version)?;
        let full = Binning::new(raw.require_vector("etBins")?, raw.require_vector("etaBins")?);
        let (et_idx, eta_idx) = full.cell_indices(&options.et_bins, &options.eta_bins);
        let shape = (et_idx.len(), eta_idx.len());
        let cells: Vec<(usize, usize)> =
            iproduct!(et_idx.iter().copied(), eta_idx.iter().copied()).collect();

        let patterns = |class: Class| -> Result<PatternGrid, ArchiveError> {
            let data = cells
                .iter()
                .map(|&(et, eta)| read_patterns(raw, class, et, eta))
                .collect::<Result<Vec<_>, _>>()?;
            BinGrid::new(shape, data)
        };
        let base_info = |class: Class| -> Result<Option<BinGrid<BaseInfo>>, ArchiveError> {
            let Some(&(first_et, first_eta)) = cells.first() else {
                return Ok(None);
            };
            if !raw.contains_key(&class.info_key(BaseInfoKind::Et, first_et, first_eta)) {
                log::debug!("No {} base info stored in this archive.", class.prefix());
                return Ok(None);
            }
            let data = cells
                .iter()
                .map(|&(et, eta)| read_base_info(raw, class, et, eta))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(BinGrid::new(shape, data)?))
        };

        let mut archive = Self::new(
            benchmark,
            patterns(Class::Signal)?,
            patterns(Class::Background)?,
        )?;
        if let (Some(signal), Some(background)) =
            (base_info(Class::Signal)?, base_info(Class::Background)?)
        {
            archive = archive.with_base_info(signal, background)?;
        }
        Ok(archive)
    }

    /// True when the file at `path` holds patterns and not only efficiencies.
    pub fn is_tuning_file(path: &Path) -> Result<bool, ArchiveError> {
        let (raw, _) = read_upgraded(path)?;
        Ok(raw.keys().any(|key| key.starts_with("signalPatterns")))
    }

    /// Fits a copy of every chain of `collection` on each bin.
    ///
    /// The result nests one collection per E_T bin, each holding one
    /// collection per eta bin of the fitted chains.
    pub fn fit_preproc(
        &self,
        collection: &PreProcCollection,
        mut on_bin: impl FnMut(usize, usize),
    ) -> Result<PreProcCollection, PreProcError> {
        let (n_et, n_eta) = self.signal_patterns.shape();
        let mut per_et = PreProcCollection::new();
        for et in 0..n_et {
            let mut per_eta = PreProcCollection::new();
            for eta in 0..n_eta {
                let (Some(sgn), Some(bkg)) = (
                    self.signal_patterns.get(et, eta),
                    self.background_patterns.get(et, eta),
                ) else {
                    continue;
                };
                log::info!("Fitting pre-processing for {}", bin_str(et, eta));
                let batch = PatternBatch::signal_background(
                    Layout::ObservationsAsRows,
                    sgn.clone(),
                    bkg.clone(),
                );
                let fitted = collection
                    .fit_each(&batch)?
                    .into_iter()
                    .map(|(chain, _)| chain)
                    .collect();
                per_eta.push_collection(PreProcCollection::from_chains(fitted))?;
                on_bin(et, eta);
            }
            per_et.push_collection(per_eta)?;
        }
        Ok(per_et)
    }

    pub fn load(path: &Path, options: &LoadOptions) -> Result<Self, ArchiveError> {
        let (raw, version) = read_upgraded(path)?;
        let archive = Self::decode(&raw, options, version)?;
        log::info!(
            "Loaded tuning data from {} (version {version}, {} x {} bins)",
            path.display(),
            archive.signal_patterns.shape().0,
            archive.signal_patterns.shape().1,
        );
        Ok(archive)
    }

    pub fn save(&self, path: &Path) -> Result<PathBuf, ArchiveError> {
        let path = ensure_extension(path);
        write_container(&path, &self.to_raw(), Container::Gzip)?;
        Ok(path)
    }

    pub fn save_with_export(&self, path: &Path, to_export: bool) -> Result<PathBuf, ArchiveError> {
        let saved = self.save(path)?;
        if to_export {
            export::export_best_effort(&self.benchmark, &saved);
        }
        Ok(saved)
    }
}

fn read_patterns(
    raw: &RawDict,
    class: Class,
    et: usize,
    eta: usize,
) -> Result<Array2<Float>, ArchiveError> {
    let key = class.patterns_key(et, eta);
    let legacy = format!("{}Patterns", class.prefix());
    match raw.get(&key) {
        Some(value) => Ok(value.require_matrix(&key)?),
        None if (et, eta) == (0, 0) && raw.contains_key(&legacy) => {
            Ok(raw.require_matrix(&legacy)?)
        }
        None => Ok(raw.require_matrix(&key)?),
    }
}

fn read_base_info(
    raw: &RawDict,
    class: Class,
    et: usize,
    eta: usize,
) -> Result<BaseInfo, ArchiveError> {
    let column = |kind: BaseInfoKind| -> Result<Array1<Float>, ArchiveError> {
        Ok(raw.require_vector(&class.info_key(kind, et, eta))?)
    };
    Ok(BaseInfo::from_columns([
        column(BaseInfoKind::Et)?,
        column(BaseInfoKind::Eta)?,
        column(BaseInfoKind::Nvtx)?,
        column(BaseInfoKind::PileUp)?,
    ])?)
}

fn check_events(
    label: &str,
    patterns: &PatternGrid,
    info: &BinGrid<BaseInfo>,
) -> Result<(), ArchiveError> {
    info.check_shape(&format!("{label} base info"), patterns.shape())?;
    for (((et, eta), data), (_, cell)) in patterns.iter().zip(info.iter()) {
        if data.nrows() != cell.n_events() {
            return Err(ArchiveError::EventCount {
                cell: format!("{label} {}", bin_str(et, eta)),
                patterns: data.nrows(),
                base_info: cell.n_events(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::efficiency::{EfficiencyGrids, EfficiencyRecord, RingerOperation};
    use crate::archive::grid::BinRequest;
    use crate::archive::upgrade::CURRENT_VERSION;
    use crate::raw::read_container;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};
    use tempfile::tempdir;

    fn patterns(shape: (usize, usize), seed: u64) -> PatternGrid {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 3.0).unwrap();
        BinGrid::from_fn(shape, |et, eta| {
            Array2::from_shape_fn((2 + et + eta, 4), |_| normal.sample(&mut rng))
        })
    }

    fn base_info(grid: &PatternGrid) -> BinGrid<BaseInfo> {
        grid.map(|data| {
            let n = data.nrows();
            let ramp = Array1::from_iter((0..n).map(|i| i as Float));
            BaseInfo::new(ramp.clone() + 20.0, ramp.clone() / 10.0, ramp.clone(), ramp * 5.0)
                .unwrap()
        })
    }

    fn archive() -> TuningDataArchive {
        let binning = Binning::new(array![15.0, 20.0, 30.0], array![0.0, 0.8, 1.37]);
        let shape = binning.grid_shape();
        let eff = |passed| {
            EfficiencyGrids::from([(
                "Medium".to_string(),
                BinGrid::filled(shape, EfficiencyRecord::new("Medium", passed, 100).unwrap()),
            )])
        };
        let benchmark =
            BenchmarkEfficiencyArchive::new(binning, RingerOperation::L2Calo, eff(95), eff(7))
                .unwrap();
        let sgn = patterns(shape, 1);
        let bkg = patterns(shape, 2);
        let (sgn_info, bkg_info) = (base_info(&sgn), base_info(&bkg));
        TuningDataArchive::new(benchmark, sgn, bkg)
            .unwrap()
            .with_base_info(sgn_info, bkg_info)
            .unwrap()
    }

    #[test]
    fn round_trip_is_bit_identical() {
        let dir = tempdir().unwrap();
        let original = archive();
        let saved = original.save(&dir.path().join("data")).unwrap();
        let loaded = TuningDataArchive::load(&saved, &LoadOptions::default()).unwrap();
        let pairs = loaded.signal_patterns().iter().zip(original.signal_patterns().iter());
        for ((_, a), (_, b)) in pairs {
            let bits_a: Vec<u64> = a.iter().map(|v| v.to_bits()).collect();
            let bits_b: Vec<u64> = b.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits_a, bits_b);
        }
        assert_eq!(loaded.background_base_info(), original.background_base_info());
        assert_eq!(
            loaded.benchmark().signal_efficiencies(),
            original.benchmark().signal_efficiencies()
        );

        let (raw, _) = read_container(&saved).unwrap();
        assert_eq!(raw.require("version").unwrap(), &RawValue::Int(CURRENT_VERSION));
        assert!(raw.contains_key("signalPatterns_etBin_1_etaBin_0"));
        assert!(raw.contains_key("backgroundPileUp_etBin_0_etaBin_1"));
    }

    #[test]
    fn subset_load_selects_patterns_and_info() {
        let dir = tempdir().unwrap();
        let original = archive();
        let saved = original.save(&dir.path().join("data")).unwrap();
        let options = LoadOptions::default().bins(BinRequest::One(1), BinRequest::One(0));
        let loaded = TuningDataArchive::load(&saved, &options).unwrap();
        assert_eq!(loaded.binning().et_edges(), &array![20.0, 30.0]);
        assert_eq!(loaded.n_et_bins(), 1);
        assert_eq!(
            loaded.signal_pattern(),
            original.signal_patterns().get(1, 0)
        );
        assert_eq!(
            loaded.signal_base_info().and_then(|grid| grid.as_single()),
            original.signal_base_info().and_then(|grid| grid.get(1, 0))
        );

        let partial = LoadOptions::default().bins(BinRequest::All, BinRequest::Many(vec![1]));
        let loaded = TuningDataArchive::load(&saved, &partial).unwrap();
        assert_eq!(loaded.background_patterns().shape(), (2, 1));
        assert!(loaded.background_pattern().is_none());
    }

    #[test]
    fn efficiencies_may_be_skipped() {
        let dir = tempdir().unwrap();
        let saved = archive().save(&dir.path().join("data")).unwrap();
        let options = LoadOptions {
            load_efficiencies: false,
            ..LoadOptions::default()
        };
        let loaded = TuningDataArchive::load(&saved, &options).unwrap();
        assert!(loaded.benchmark().signal_efficiencies().is_empty());
        assert_eq!(loaded.signal_patterns().shape(), (2, 2));
    }

    #[test]
    fn kind_is_detected_from_file() {
        let dir = tempdir().unwrap();
        let tuning = archive();
        let data = tuning.save(&dir.path().join("data")).unwrap();
        let eff = tuning.benchmark().save(&dir.path().join("eff")).unwrap();
        assert!(TuningDataArchive::is_tuning_file(&data).unwrap());
        assert!(!TuningDataArchive::is_tuning_file(&eff).unwrap());
    }

    #[test]
    fn preproc_is_fit_per_bin() {
        use crate::preproc::{PreProcChain, RemoveMean, Transform};
        let tuning = archive();
        let candidates = PreProcCollection::from_chains(vec![
            PreProcChain::new().with(RemoveMean::new()),
        ]);
        let mut visited = Vec::new();
        let fitted = tuning
            .fit_preproc(&candidates, |et, eta| visited.push((et, eta)))
            .unwrap();
        assert_eq!(visited, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(fitted.len(), 2);
        assert_eq!(fitted.chains().count(), 4);
        assert!(candidates.chains().all(|chain| {
            chain.apply(&PatternBatch::single(Layout::default(), Array2::zeros((1, 4)))).is_err()
        }));
        let sgn = tuning.signal_patterns().get(1, 0).unwrap();
        let bkg = tuning.background_patterns().get(1, 0).unwrap();
        let joint = ndarray::concatenate![ndarray::Axis(0), sgn.view(), bkg.view()];
        let centred = fitted
            .chains()
            .nth(2)
            .unwrap()
            .apply(&PatternBatch::single(Layout::default(), joint))
            .unwrap();
        let mean = centred.data(0).unwrap().mean_axis(ndarray::Axis(0)).unwrap();
        assert!(mean.iter().all(|value| value.abs() < 1e-10));
    }

    #[test]
    fn mismatched_classes_are_fatal() {
        let benchmark = BenchmarkEfficiencyArchive::new(
            Binning::new(array![0.0, 1.0, 2.0], Array1::zeros(0)),
            RingerOperation::L2,
            EfficiencyGrids::new(),
            EfficiencyGrids::new(),
        )
        .unwrap();
        assert!(matches!(
            TuningDataArchive::new(benchmark, patterns((2, 1), 1), patterns((1, 1), 2)),
            Err(ArchiveError::PatternMismatch { .. })
        ));
    }

    #[test]
    fn base_info_must_match_event_counts() {
        let original = archive();
        let wrong = base_info(&patterns((2, 2), 9)).map(|_| BaseInfo::default());
        let rebuilt = TuningDataArchive::new(
            original.benchmark().clone(),
            original.signal_patterns().clone(),
            original.background_patterns().clone(),
        )
        .unwrap()
        .with_base_info(wrong.clone(), wrong);
        assert!(matches!(rebuilt, Err(ArchiveError::EventCount { .. })));
    }
}
