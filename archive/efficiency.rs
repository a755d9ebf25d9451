//! Benchmark efficiency records and the enumerations stored with them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::grid::BinGrid;
use super::ArchiveError;
use crate::layout::Float;
use crate::raw::{RawDict, RawDictExt, RawValue};

/// Trigger level whose decision the efficiencies refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RingerOperation {
    Offline,
    L2Calo,
    L2,
    EFCalo,
    HLT,
}

impl RingerOperation {
    /// Operation assumed for archives written before it was recorded.
    pub const LEGACY: RingerOperation = RingerOperation::EFCalo;

    pub const ALL: [RingerOperation; 5] = [
        RingerOperation::Offline,
        RingerOperation::L2Calo,
        RingerOperation::L2,
        RingerOperation::EFCalo,
        RingerOperation::HLT,
    ];

    pub fn code(self) -> i64 {
        match self {
            RingerOperation::Offline => 0,
            RingerOperation::L2Calo => 1,
            RingerOperation::L2 => 2,
            RingerOperation::EFCalo => 3,
            RingerOperation::HLT => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RingerOperation::Offline => "Offline",
            RingerOperation::L2Calo => "L2Calo",
            RingerOperation::L2 => "L2",
            RingerOperation::EFCalo => "EFCalo",
            RingerOperation::HLT => "HLT",
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ArchiveError> {
        Self::ALL
            .into_iter()
            .find(|op| op.code() == code)
            .ok_or_else(|| ArchiveError::UnknownOperation(code.to_string()))
    }

    /// Accepts the numeric code or the name.
    pub fn from_raw(value: &RawValue) -> Result<Self, ArchiveError> {
        match value {
            RawValue::Int(code) => Self::from_code(*code),
            other => other.require_str("operation")?.parse(),
        }
    }
}

impl FromStr for RingerOperation {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ArchiveError::UnknownOperation(s.to_string()))
    }
}

impl fmt::Display for RingerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cross-validation partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dataset {
    Train,
    Validation,
    Test,
    Operation,
}

impl Dataset {
    pub const ALL: [Dataset; 4] = [
        Dataset::Train,
        Dataset::Validation,
        Dataset::Test,
        Dataset::Operation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dataset::Train => "Train",
            Dataset::Validation => "Validation",
            Dataset::Test => "Test",
            Dataset::Operation => "Operation",
        }
    }
}

impl FromStr for Dataset {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ds| ds.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ArchiveError::UnknownEnum {
                what: "dataset",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossValidMethod {
    Standard,
    JackKnife,
}

impl CrossValidMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CrossValidMethod::Standard => "Standard",
            CrossValidMethod::JackKnife => "JackKnife",
        }
    }
}

impl FromStr for CrossValidMethod {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [CrossValidMethod::Standard, CrossValidMethod::JackKnife]
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ArchiveError::UnknownEnum {
                what: "cross-validation method",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for CrossValidMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn percent(passed: u64, count: u64) -> Float {
    if count == 0 {
        0.0
    } else {
        passed as Float / count as Float * 100.0
    }
}

fn forced_from_raw(raw: &RawDict) -> Result<Option<Float>, ArchiveError> {
    match raw.get("efficiency") {
        None | Some(RawValue::Null) => Ok(None),
        Some(value) => Ok(Some(value.require_f64("efficiency")?)),
    }
}

fn validate_counts(name: &str, passed: u64, count: u64) -> Result<(), ArchiveError> {
    if passed > count {
        return Err(ArchiveError::Efficiency {
            name: name.to_string(),
            reason: format!("{passed} passed out of {count}"),
        });
    }
    Ok(())
}

/// Passed and total counts of one benchmark in one bin.
#[derive(Debug, Clone, PartialEq)]
pub struct EfficiencyRecord {
    name: String,
    passed: u64,
    count: u64,
    forced: Option<Float>,
}

impl EfficiencyRecord {
    pub fn new(name: impl Into<String>, passed: u64, count: u64) -> Result<Self, ArchiveError> {
        let name = name.into();
        validate_counts(&name, passed, count)?;
        Ok(Self {
            name,
            passed,
            count,
            forced: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn passed(&self) -> u64 {
        self.passed
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_some()
    }

    /// Efficiency in percent. A forced reference value takes precedence.
    pub fn efficiency(&self) -> Float {
        self.forced
            .unwrap_or_else(|| percent(self.passed, self.count))
    }

    /// Forces the reported efficiency (percent) to a reference value.
    pub fn set_efficiency(&mut self, value: Float) {
        self.forced = Some(value);
    }

    pub fn eff_str(&self) -> String {
        format!("{:.6} ({}/{})", self.efficiency(), self.passed, self.count)
    }
}

/// Passed and total counts split by cross-validation dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossEfficiencyRecord {
    name: String,
    method: CrossValidMethod,
    counts: BTreeMap<Dataset, (u64, u64)>,
    forced: Option<Float>,
}

impl CrossEfficiencyRecord {
    pub fn new(name: impl Into<String>, method: CrossValidMethod) -> Self {
        Self {
            name: name.into(),
            method,
            counts: BTreeMap::new(),
            forced: None,
        }
    }

    pub fn with_counts(
        mut self,
        dataset: Dataset,
        passed: u64,
        count: u64,
    ) -> Result<Self, ArchiveError> {
        validate_counts(&self.name, passed, count)?;
        self.counts.insert(dataset, (passed, count));
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> CrossValidMethod {
        self.method
    }

    pub fn datasets(&self) -> impl Iterator<Item = Dataset> + '_ {
        self.counts.keys().copied()
    }

    pub fn counts(&self, dataset: Dataset) -> Option<(u64, u64)> {
        self.counts.get(&dataset).copied()
    }

    pub fn efficiency(&self, dataset: Dataset) -> Option<Float> {
        let (passed, count) = self.counts(dataset)?;
        Some(self.forced.unwrap_or_else(|| percent(passed, count)))
    }

    pub fn set_efficiency(&mut self, value: Float) {
        self.forced = Some(value);
    }

    pub fn eff_str(&self, dataset: Dataset) -> Option<String> {
        let (passed, count) = self.counts(dataset)?;
        Some(format!(
            "{:.6} ({passed}/{count})",
            self.efficiency(dataset)?
        ))
    }
}

/// Conversion of a per-bin record to and from the raw dictionary.
pub trait RawRecord: Sized {
    fn to_raw(&self) -> RawDict;
    fn from_raw(raw: &RawDict) -> Result<Self, ArchiveError>;
}

impl RawRecord for EfficiencyRecord {
    fn to_raw(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("name".into(), RawValue::text(&self.name));
        raw.insert("passed".into(), RawValue::Int(self.passed as i64));
        raw.insert("count".into(), RawValue::Int(self.count as i64));
        raw.insert(
            "efficiency".into(),
            self.forced.map_or(RawValue::Null, RawValue::Float),
        );
        raw
    }

    fn from_raw(raw: &RawDict) -> Result<Self, ArchiveError> {
        let mut record = Self::new(
            raw.require_str("name")?,
            raw.require_usize("passed")? as u64,
            raw.require_usize("count")? as u64,
        )?;
        record.forced = forced_from_raw(raw)?;
        Ok(record)
    }
}

impl RawRecord for CrossEfficiencyRecord {
    fn to_raw(&self) -> RawDict {
        let mut raw = RawDict::new();
        raw.insert("name".into(), RawValue::text(&self.name));
        raw.insert("method".into(), RawValue::text(self.method.as_str()));
        let datasets = self
            .counts
            .iter()
            .map(|(ds, &(passed, count))| {
                let mut entry = RawDict::new();
                entry.insert("passed".into(), RawValue::Int(passed as i64));
                entry.insert("count".into(), RawValue::Int(count as i64));
                (ds.as_str().to_string(), RawValue::Dict(entry))
            })
            .collect();
        raw.insert("datasets".into(), RawValue::Dict(datasets));
        raw.insert(
            "efficiency".into(),
            self.forced.map_or(RawValue::Null, RawValue::Float),
        );
        raw
    }

    fn from_raw(raw: &RawDict) -> Result<Self, ArchiveError> {
        let mut record = Self::new(
            raw.require_str("name")?,
            raw.require_str("method")?.parse()?,
        );
        for (ds, entry) in raw.require_dict("datasets")? {
            let entry = entry.require_dict(ds)?;
            record = record.with_counts(
                ds.parse()?,
                entry.require_usize("passed")? as u64,
                entry.require_usize("count")? as u64,
            )?;
        }
        record.forced = forced_from_raw(raw)?;
        Ok(record)
    }
}

/// Per-benchmark grids of records.
pub type EfficiencyGrids<T = EfficiencyRecord> = BTreeMap<String, BinGrid<T>>;

pub fn grids_to_raw<T: RawRecord>(grids: &EfficiencyGrids<T>) -> RawValue {
    RawValue::Dict(
        grids
            .iter()
            .map(|(name, grid)| (name.clone(), grid.to_raw(|rec| RawValue::Dict(rec.to_raw()))))
            .collect(),
    )
}

pub fn grids_from_raw<T: RawRecord>(
    key: &str,
    value: &RawValue,
) -> Result<EfficiencyGrids<T>, ArchiveError> {
    value
        .require_dict(key)?
        .iter()
        .map(|(name, grid)| {
            let grid = BinGrid::from_raw(name, grid, |cell| T::from_raw(cell.require_dict(name)?))?;
            Ok((name.clone(), grid))
        })
        .collect()
}

pub fn select_grids<T: Clone>(
    grids: &EfficiencyGrids<T>,
    et: &[usize],
    eta: &[usize],
) -> EfficiencyGrids<T> {
    grids
        .iter()
        .map(|(name, grid)| (name.clone(), grid.select(et, eta)))
        .collect()
}
