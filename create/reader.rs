//! Contract with the event-file reader that extracts patterns and counts
//! benchmark decisions bin by bin.

use std::fmt;
use std::path::PathBuf;

use crate::archive::efficiency::{
    CrossEfficiencyRecord, CrossValidMethod, EfficiencyGrids, RingerOperation,
};
use crate::archive::grid::{BinGrid, Binning};
use crate::archive::tuning::PatternGrid;
use crate::base_info::BaseInfo;

use super::CreateDataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterClass {
    Signal,
    Background,
}

impl FilterClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterClass::Signal => "Signal",
            FilterClass::Background => "Background",
        }
    }
}

impl fmt::Display for FilterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single reader pass extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Patterns, base info and efficiencies.
    Full,
    PatternsOnly,
    /// Efficiencies only; no pattern is kept in memory.
    RatesOnly,
}

impl ReadMode {
    pub fn wants_patterns(self) -> bool {
        !matches!(self, ReadMode::RatesOnly)
    }

    pub fn wants_rates(self) -> bool {
        !matches!(self, ReadMode::PatternsOnly)
    }
}

#[derive(Debug, Clone)]
pub struct ReadRequest<'a> {
    pub files: &'a [PathBuf],
    pub operation: RingerOperation,
    pub class: FilterClass,
    /// Label of the selection used as truth for this class.
    pub reference: &'a str,
    /// `None` leaves the tree choice to the reader.
    pub tree_path: Option<&'a str>,
    pub mode: ReadMode,
    pub binning: &'a Binning,
    pub cross_validation: Option<CrossValidMethod>,
    pub options: &'a toml::Table,
}

/// Everything one reader pass returns, laid out on the requested binning.
#[derive(Debug, Clone, Default)]
pub struct ReaderOutput {
    pub patterns: Option<PatternGrid>,
    pub base_info: Option<BinGrid<BaseInfo>>,
    pub efficiencies: EfficiencyGrids,
    pub cross_efficiencies: EfficiencyGrids<CrossEfficiencyRecord>,
}

impl ReaderOutput {
    /// Keeps only what `mode` asked for.
    pub fn restrict(mut self, mode: ReadMode) -> Self {
        if !mode.wants_patterns() {
            self.patterns = None;
            self.base_info = None;
        }
        if !mode.wants_rates() {
            self.efficiencies.clear();
            self.cross_efficiencies.clear();
        }
        self
    }
}

pub trait PatternReader {
    fn read(&mut self, request: &ReadRequest<'_>) -> Result<ReaderOutput, CreateDataError>;
}
