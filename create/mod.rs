//! Creation of tuning data: reads patterns and benchmark counts through a
//! [`PatternReader`], then writes the efficiency and tuning archives.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::config::ConfigError;

pub mod orchestrator;
pub mod overrides;
pub mod reader;
pub mod summary;

pub use orchestrator::{CreateData, CreateDataOutput};
pub use overrides::EfficiencyValues;
pub use reader::{FilterClass, PatternReader, ReadMode, ReadRequest, ReaderOutput};

#[derive(Debug, Error)]
pub enum CreateDataError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("Reader failed on the {class} files: {reason}")]
    Reader { class: String, reason: String },
    #[error("{0}")]
    EfficiencyValues(String),
    #[error("The reader returned no {0} patterns")]
    MissingPatterns(String),
    #[error("Failed to write the summary table: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
