//! Archive of per-bin benchmark efficiencies.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::efficiency::{
    CrossEfficiencyRecord, EfficiencyGrids, RingerOperation, grids_from_raw, grids_to_raw,
    select_grids,
};
use super::grid::{BinGrid, BinRequest, Binning};
use super::upgrade::{CURRENT_VERSION, upgrade};
use super::{ARCHIVE_EXTENSION, ArchiveError, export};
use crate::raw::{Container, RawDict, RawDictExt, RawValue, read_container, write_container};

pub(crate) const BENCHMARK_TYPE: &str = "BenchmarkEfficiencyArchive";

const SIGNAL_EFFICIENCIES: &str = "signalEfficiencies";
const BACKGROUND_EFFICIENCIES: &str = "backgroundEfficiencies";
const SIGNAL_CROSS_EFFICIENCIES: &str = "signalCrossEfficiencies";
const BACKGROUND_CROSS_EFFICIENCIES: &str = "backgroundCrossEfficiencies";

/// What to read from an archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub et_bins: BinRequest,
    pub eta_bins: BinRequest,
    pub load_cross_efficiencies: bool,
    pub load_efficiencies: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            et_bins: BinRequest::All,
            eta_bins: BinRequest::All,
            load_cross_efficiencies: false,
            load_efficiencies: true,
        }
    }
}

impl LoadOptions {
    pub fn bins(mut self, et_bins: BinRequest, eta_bins: BinRequest) -> Self {
        self.et_bins = et_bins;
        self.eta_bins = eta_bins;
        self
    }

    pub fn with_cross_efficiencies(mut self) -> Self {
        self.load_cross_efficiencies = true;
        self
    }
}

/// Binning summary readable without decoding the rest of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinsInfo {
    pub is_et_dependent: bool,
    pub is_eta_dependent: bool,
    pub n_et_bins: usize,
    pub n_eta_bins: usize,
}

/// Appends the archive extension unless the path already carries it.
pub fn ensure_extension(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION) {
        return path.to_path_buf();
    }
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

/// Reads a container and upgrades it to the current layout.
pub(crate) fn read_upgraded(path: &Path) -> Result<(RawDict, i64), ArchiveError> {
    let (mut raw, container) = read_container(path)?;
    let version = upgrade(&mut raw)?;
    if container == Container::Plain && version > 0 {
        log::warn!(
            "{} is uncompressed although it declares version {version}",
            path.display()
        );
    }
    Ok((raw, version))
}

pub fn bins_info(path: &Path) -> Result<BinsInfo, ArchiveError> {
    let (raw, _) = read_upgraded(path)?;
    Ok(BinsInfo {
        is_et_dependent: raw.require_bool("isEtDependent")?,
        is_eta_dependent: raw.require_bool("isEtaDependent")?,
        n_et_bins: raw.require_usize("nEtBins")?,
        n_eta_bins: raw.require_usize("nEtaBins")?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkEfficiencyArchive {
    binning: Binning,
    operation: RingerOperation,
    signal_efficiencies: EfficiencyGrids,
    background_efficiencies: EfficiencyGrids,
    signal_cross_efficiencies: EfficiencyGrids<CrossEfficiencyRecord>,
    background_cross_efficiencies: EfficiencyGrids<CrossEfficiencyRecord>,
    et_request: BinRequest,
    eta_request: BinRequest,
    read_version: Option<i64>,
}

fn check_grids<T>(
    what: &str,
    grids: &EfficiencyGrids<T>,
    shape: (usize, usize),
) -> Result<(), ArchiveError> {
    grids
        .iter()
        .try_for_each(|(name, grid)| grid.check_shape(&format!("{what} '{name}'"), shape))
}

impl BenchmarkEfficiencyArchive {
    pub fn new(
        binning: Binning,
        operation: RingerOperation,
        signal_efficiencies: EfficiencyGrids,
        background_efficiencies: EfficiencyGrids,
    ) -> Result<Self, ArchiveError> {
        let shape = binning.grid_shape();
        check_grids("Signal efficiency", &signal_efficiencies, shape)?;
        check_grids("Background efficiency", &background_efficiencies, shape)?;
        Ok(Self {
            binning,
            operation,
            signal_efficiencies,
            background_efficiencies,
            signal_cross_efficiencies: EfficiencyGrids::new(),
            background_cross_efficiencies: EfficiencyGrids::new(),
            et_request: BinRequest::All,
            eta_request: BinRequest::All,
            read_version: None,
        })
    }

    pub fn with_cross_efficiencies(
        mut self,
        signal: EfficiencyGrids<CrossEfficiencyRecord>,
        background: EfficiencyGrids<CrossEfficiencyRecord>,
    ) -> Result<Self, ArchiveError> {
        let shape = self.binning.grid_shape();
        check_grids("Signal cross efficiency", &signal, shape)?;
        check_grids("Background cross efficiency", &background, shape)?;
        self.signal_cross_efficiencies = signal;
        self.background_cross_efficiencies = background;
        Ok(self)
    }

    pub fn binning(&self) -> &Binning {
        &self.binning
    }

    pub fn n_et_bins(&self) -> usize {
        self.binning.n_et_bins()
    }

    pub fn n_eta_bins(&self) -> usize {
        self.binning.n_eta_bins()
    }

    pub fn is_et_dependent(&self) -> bool {
        self.binning.is_et_dependent()
    }

    pub fn is_eta_dependent(&self) -> bool {
        self.binning.is_eta_dependent()
    }

    pub fn bins_info(&self) -> BinsInfo {
        BinsInfo {
            is_et_dependent: self.is_et_dependent(),
            is_eta_dependent: self.is_eta_dependent(),
            n_et_bins: self.n_et_bins(),
            n_eta_bins: self.n_eta_bins(),
        }
    }

    pub fn operation(&self) -> RingerOperation {
        self.operation
    }

    pub fn signal_efficiencies(&self) -> &EfficiencyGrids {
        &self.signal_efficiencies
    }

    pub fn background_efficiencies(&self) -> &EfficiencyGrids {
        &self.background_efficiencies
    }

    pub fn signal_efficiencies_mut(&mut self) -> &mut EfficiencyGrids {
        &mut self.signal_efficiencies
    }

    pub fn background_efficiencies_mut(&mut self) -> &mut EfficiencyGrids {
        &mut self.background_efficiencies
    }

    pub fn signal_cross_efficiencies(&self) -> &EfficiencyGrids<CrossEfficiencyRecord> {
        &self.signal_cross_efficiencies
    }

    pub fn background_cross_efficiencies(&self) -> &EfficiencyGrids<CrossEfficiencyRecord> {
        &self.background_cross_efficiencies
    }

    pub fn et_bin_request(&self) -> &BinRequest {
        &self.et_request
    }

    pub fn eta_bin_request(&self) -> &BinRequest {
        &self.eta_request
    }

    /// Version the archive was read at; `None` for archives built in memory.
    pub fn read_version(&self) -> Option<i64> {
        self.read_version
    }

    /// True when exactly one bin of each axis was loaded.
    pub fn is_collapsed(&self) -> bool {
        self.et_request.is_single() && self.eta_request.is_single()
    }

    /// Single-cell view of a benchmark in a collapsed archive.
    pub fn signal_efficiency(&self, benchmark: &str) -> Option<&super::EfficiencyRecord> {
        single(self.is_collapsed(), self.signal_efficiencies.get(benchmark))
    }

    pub fn background_efficiency(&self, benchmark: &str) -> Option<&super::EfficiencyRecord> {
        single(self.is_collapsed(), self.background_efficiencies.get(benchmark))
    }

    pub fn check_for_compatible_binning_file(&self, path: &Path) -> Result<bool, ArchiveError> {
        Ok(bins_info(path)? == self.bins_info())
    }

    pub(crate) fn write_raw(&self, raw: &mut RawDict) {
        raw.insert("version".into(), RawValue::Int(CURRENT_VERSION));
        raw.insert("etBins".into(), RawValue::vector(self.binning.et_edges().view()));
        raw.insert("etaBins".into(), RawValue::vector(self.binning.eta_edges().view()));
        raw.insert("nEtBins".into(), RawValue::count(self.n_et_bins()));
        raw.insert("nEtaBins".into(), RawValue::count(self.n_eta_bins()));
        raw.insert("isEtDependent".into(), RawValue::Bool(self.is_et_dependent()));
        raw.insert("isEtaDependent".into(), RawValue::Bool(self.is_eta_dependent()));
        raw.insert("operation".into(), RawValue::Int(self.operation.code()));
        if !self.signal_efficiencies.is_empty() || !self.background_efficiencies.is_empty() {
            raw.insert(
                SIGNAL_EFFICIENCIES.into(),
                grids_to_raw(&self.signal_efficiencies),
            );
            raw.insert(
                BACKGROUND_EFFICIENCIES.into(),
                grids_to_raw(&self.background_efficiencies),
            );
        }
        if !self.signal_cross_efficiencies.is_empty()
            || !self.background_cross_efficiencies.is_empty()
        {
            raw.insert(
                SIGNAL_CROSS_EFFICIENCIES.into(),
                grids_to_raw(&self.signal_cross_efficiencies),
            );
            raw.insert(
                BACKGROUND_CROSS_EFFICIENCIES.into(),
                grids_to_raw(&self.background_cross_efficiencies),
            );
        }
    }

    pub fn to_raw(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("type".into(), RawValue::text(BENCHMARK_TYPE));
        self.write_raw(&mut raw);
        raw
    }

    /// Decodes a dictionary already upgraded to the current layout.
    pub(crate) fn decode(
        raw: &RawDict,
        options: &LoadOptions,
        read_version: i64,
    ) -> Result<Self, ArchiveError> {
        let full = Binning::new(raw.require_vector("etBins")?, raw.require_vector("etaBins")?);
        full.validate(&options.et_bins, &options.eta_bins)?;
        let (et_idx, eta_idx) = full.cell_indices(&options.et_bins, &options.eta_bins);
        let shape = full.grid_shape();

        let mut archive = Self {
            binning: full.select(&options.et_bins, &options.eta_bins),
            operation: RingerOperation::from_raw(raw.require("operation")?)?,
            signal_efficiencies: EfficiencyGrids::new(),
            background_efficiencies: EfficiencyGrids::new(),
            signal_cross_efficiencies: EfficiencyGrids::new(),
            background_cross_efficiencies: EfficiencyGrids::new(),
            et_request: options.et_bins.clone(),
            eta_request: options.eta_bins.clone(),
            read_version: Some(read_version),
        };

        if options.load_efficiencies {
            let load = |key: &str, label: &str| -> Result<EfficiencyGrids, ArchiveError> {
                match raw.get(key) {
                    None => {
                        log::error!("{label} efficiencies information is not available!");
                        Ok(EfficiencyGrids::new())
                    }
                    Some(value) => {
                        let grids = grids_from_raw(key, value)?;
                        check_grids(label, &grids, shape)?;
                        Ok(select_grids(&grids, &et_idx, &eta_idx))
                    }
                }
            };
            archive.signal_efficiencies = load(SIGNAL_EFFICIENCIES, "Signal")?;
            archive.background_efficiencies = load(BACKGROUND_EFFICIENCIES, "Background")?;

            if options.load_cross_efficiencies {
                let load_cross = |key: &str,
                                  label: &str|
                 -> Result<EfficiencyGrids<CrossEfficiencyRecord>, ArchiveError> {
                    match raw.get(key) {
                        None => {
                            log::info!("No {label} cross efficiency information.");
                            Ok(EfficiencyGrids::new())
                        }
                        Some(value) => {
                            let grids = grids_from_raw(key, value)?;
                            check_grids(label, &grids, shape)?;
                            Ok(select_grids(&grids, &et_idx, &eta_idx))
                        }
                    }
                };
                archive.signal_cross_efficiencies =
                    load_cross(SIGNAL_CROSS_EFFICIENCIES, "signal")?;
                archive.background_cross_efficiencies =
                    load_cross(BACKGROUND_CROSS_EFFICIENCIES, "background")?;
            }
        }
        Ok(archive)
    }

    pub fn load(path: &Path, options: &LoadOptions) -> Result<Self, ArchiveError> {
        if !options.load_efficiencies {
            log::error!(
                "It is not possible to set load_efficiencies to false \
                 when using BenchmarkEfficiencyArchive."
            );
            return Err(ArchiveError::EfficienciesRequired);
        }
        let (raw, version) = read_upgraded(path)?;
        Self::decode(&raw, options, version)
    }

    pub fn save(&self, path: &Path) -> Result<PathBuf, ArchiveError> {
        let path = ensure_extension(path);
        write_container(&path, &self.to_raw(), Container::Gzip)?;
        Ok(path)
    }

    /// Saves the archive and, when requested, the tabular export next to it.
    /// Export failures are only logged.
    pub fn save_with_export(&self, path: &Path, to_export: bool) -> Result<PathBuf, ArchiveError> {
        let saved = self.save(path)?;
        if to_export {
            export::export_best_effort(self, &saved);
        }
        Ok(saved)
    }
}

fn single<T>(collapsed: bool, grid: Option<&BinGrid<T>>) -> Option<&T> {
    if collapsed { grid?.as_single() } else { None }
}
