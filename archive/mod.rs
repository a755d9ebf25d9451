//! Binned efficiency and tuning-data archives.
//!
//! Both archives share the E_T x eta bin model of [`grid`], persist through the
//! raw dictionary container, and are read back through the ordered upgrade
//! steps of [`upgrade`] so that every historical file version stays loadable.

use thiserror::Error;

use crate::base_info::BaseInfoLengthError;
use crate::raw::RawError;

pub mod benchmark;
pub mod efficiency;
pub mod export;
pub mod grid;
pub mod tuning;
pub mod upgrade;

pub use benchmark::{BenchmarkEfficiencyArchive, BinsInfo, LoadOptions};
pub use efficiency::{
    CrossEfficiencyRecord, CrossValidMethod, Dataset, EfficiencyGrids, EfficiencyRecord,
    RingerOperation,
};
pub use grid::{BinGrid, BinRequest, Binning};
pub use tuning::TuningDataArchive;
pub use upgrade::CURRENT_VERSION;

/// Extension every archive is saved with.
pub const ARCHIVE_EXTENSION: &str = "rdz";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{0}")]
    BinIndex(String),
    #[error("{what} grid has shape {found:?}, expected {expected:?}")]
    GridShape {
        what: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Signal and background patterns lengths do not match: {signal:?} vs {background:?}")]
    PatternMismatch {
        signal: (usize, usize),
        background: (usize, usize),
    },
    #[error("{cell}: {patterns} patterns but {base_info} base info events")]
    EventCount {
        cell: String,
        patterns: usize,
        base_info: usize,
    },
    #[error(
        "It is not possible to set load_efficiencies to false when loading a benchmark \
         efficiency archive"
    )]
    EfficienciesRequired,
    #[error("Unknown ringer operation '{0}'")]
    UnknownOperation(String),
    #[error("Unknown {what} '{value}'")]
    UnknownEnum { what: &'static str, value: String },
    #[error("Archive version {found} is newer than the supported version {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },
    #[error("Invalid efficiency record '{name}': {reason}")]
    Efficiency { name: String, reason: String },
    #[error(transparent)]
    BaseInfo(#[from] BaseInfoLengthError),
    #[error(transparent)]
    Raw(#[from] RawError),
    #[error("Failed to write the tabular export: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
