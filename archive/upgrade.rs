//! Ordered upgrade steps between on-disk archive versions.
//!
//! | version | change |
//! |---|---|
//! | 0 | uncompressed container with flat `signal_rings`/`background_rings` |
//! | 1 | compressed container |
//! | 2 | array order recorded by the writer |
//! | 3 | E_T/eta bins, per-bin `signal_rings_etBin_<i>_etaBin_<j>`, efficiencies |
//! | 4 | `operation` |
//! | 5 | `_rings` renamed to `_patterns` |
//! | 6 | camel-case keys, derived bin counts and per-bin base info |
//!
//! Each step rewrites the raw dictionary of one version into the layout of the
//! next, so a file of any version reaches [`CURRENT_VERSION`] by applying the
//! steps in order.

use ndarray::Array1;

use super::efficiency::RingerOperation;
use super::grid::bin_str;
use super::ArchiveError;
use crate::layout::Float;
use crate::raw::{RawDict, RawDictExt, RawValue};

pub const CURRENT_VERSION: i64 = 6;

type Step = fn(&mut RawDict) -> Result<(), ArchiveError>;

/// Step `i` upgrades version `i` to `i + 1`.
const STEPS: [Step; CURRENT_VERSION as usize] = [
    container_only,
    container_only,
    bin_compatible,
    record_operation,
    rings_to_patterns,
    camel_case_keys,
];

fn container_only(raw: &mut RawDict) -> Result<(), ArchiveError> {
    log::debug!("Only the container format changed; {} keys kept", raw.len());
    Ok(())
}

/// Flat patterns become the single cell of an unbinned archive.
fn bin_compatible(raw: &mut RawDict) -> Result<(), ArchiveError> {
    let cell = bin_str(0, 0);
    for class in ["signal", "background"] {
        let flat = format!("{class}_rings");
        if let Some(patterns) = raw.remove(&flat) {
            raw.insert(format!("{flat}_{cell}"), patterns);
        }
    }
    for key in ["et_bins", "eta_bins"] {
        insert_missing_edges(raw, key);
    }
    Ok(())
}

/// Archives written without bin edges are read as not bin dependent.
fn insert_missing_edges(raw: &mut RawDict, key: &str) {
    raw.entry(key.to_string())
        .or_insert_with(|| RawValue::vector(Array1::<Float>::zeros(0).view()));
}

fn record_operation(raw: &mut RawDict) -> Result<(), ArchiveError> {
    raw.entry("operation".to_string()).or_insert_with(|| {
        log::debug!("Archive has no operation; assuming {}", RingerOperation::LEGACY);
        RawValue::Int(RingerOperation::LEGACY.code())
    });
    Ok(())
}

fn rename_prefix(raw: &mut RawDict, from: &str, to: &str) {
    let keys: Vec<String> = raw
        .keys()
        .filter(|key| key.starts_with(from))
        .cloned()
        .collect();
    for key in keys {
        if let Some(value) = raw.remove(&key) {
            raw.insert(format!("{to}{}", &key[from.len()..]), value);
        }
    }
}

fn rename_key(raw: &mut RawDict, from: &str, to: &str) {
    if let Some(value) = raw.remove(from) {
        raw.insert(to.to_string(), value);
    }
}

fn rings_to_patterns(raw: &mut RawDict) -> Result<(), ArchiveError> {
    rename_prefix(raw, "signal_rings_", "signal_patterns_");
    rename_prefix(raw, "background_rings_", "background_patterns_");
    Ok(())
}

fn camel_case_keys(raw: &mut RawDict) -> Result<(), ArchiveError> {
    rename_prefix(raw, "signal_patterns_", "signalPatterns_");
    rename_prefix(raw, "background_patterns_", "backgroundPatterns_");
    for (from, to) in [
        ("signal_efficiencies", "signalEfficiencies"),
        ("background_efficiencies", "backgroundEfficiencies"),
        ("signal_cross_efficiencies", "signalCrossEfficiencies"),
        ("background_cross_efficiencies", "backgroundCrossEfficiencies"),
        ("et_bins", "etBins"),
        ("eta_bins", "etaBins"),
    ] {
        rename_key(raw, from, to);
    }
    for (edges, count, dependent) in [
        ("etBins", "nEtBins", "isEtDependent"),
        ("etaBins", "nEtaBins", "isEtaDependent"),
    ] {
        insert_missing_edges(raw, edges);
        let len = raw.require_vector(edges)?.len();
        raw.insert(count.to_string(), RawValue::count(len.saturating_sub(1)));
        raw.insert(dependent.to_string(), RawValue::Bool(len > 0));
    }
    Ok(())
}

/// Stored version; files predating the key are version 0.
pub fn read_version(raw: &RawDict) -> Result<i64, ArchiveError> {
    match raw.get("version") {
        None => {
            log::warn!("Archive does not declare a version; reading it as version 0.");
            Ok(0)
        }
        Some(value) => Ok(value.require_i64("version")?),
    }
}

/// Brings `raw` to [`CURRENT_VERSION`] and returns the version it was read at.
pub fn upgrade(raw: &mut RawDict) -> Result<i64, ArchiveError> {
    let read_version = read_version(raw)?;
    if !(0..=CURRENT_VERSION).contains(&read_version) {
        log::error!("Cannot read archive version {read_version}.");
        return Err(ArchiveError::UnsupportedVersion {
            found: read_version,
            supported: CURRENT_VERSION,
        });
    }
    for (version, step) in STEPS.iter().enumerate().skip(read_version as usize) {
        log::debug!("Upgrading archive from version {version} to {}", version + 1);
        step(raw)?;
        raw.insert("version".to_string(), RawValue::Int(version as i64 + 1));
    }
    Ok(read_version)
}
