//! Per-bin diagnostic tables written next to the tuning archive.

use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use ndarray::Axis;

use super::CreateDataError;
use crate::archive::TuningDataArchive;
use crate::config::append_to_file_name;

fn tsv_path(archive_path: &Path, suffix: &str) -> PathBuf {
    append_to_file_name(archive_path, suffix).with_extension("tsv")
}

/// Signal and background pattern counts per bin.
pub fn write_counts(archive: &TuningDataArchive, path: &Path) -> Result<PathBuf, CreateDataError> {
    let out = tsv_path(path, "counts");
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(&out)?;
    writer.write_record(["etBin", "etaBin", "signal", "background"])?;
    for (((et, eta), sgn), (_, bkg)) in archive
        .signal_patterns()
        .iter()
        .zip(archive.background_patterns().iter())
    {
        writer.write_record([
            et.to_string(),
            eta.to_string(),
            sgn.nrows().to_string(),
            bkg.nrows().to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(out)
}

/// Mean pattern of each class in each bin, one row per (class, bin).
pub fn write_means(archive: &TuningDataArchive, path: &Path) -> Result<PathBuf, CreateDataError> {
    let out = tsv_path(path, "means");
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(&out)?;
    let n_features = archive
        .signal_patterns()
        .iter()
        .map(|(_, data)| data.ncols())
        .max()
        .unwrap_or(0);
    let mut header = vec!["class".to_string(), "etBin".to_string(), "etaBin".to_string()];
    header.extend((0..n_features).map(|idx| format!("f{idx}")));
    writer.write_record(&header)?;
    for (class, grid) in [
        ("signal", archive.signal_patterns()),
        ("background", archive.background_patterns()),
    ] {
        for ((et, eta), data) in grid.iter() {
            let mut record = vec![class.to_string(), et.to_string(), eta.to_string()];
            if let Some(mean) = data.mean_axis(Axis(0)) {
                record.extend(mean.iter().map(|value| value.to_string()));
            } else {
                log::warn!("No {class} patterns in etBin {et}, etaBin {eta}; mean left empty.");
            }
            writer.write_record(&record)?;
        }
    }
    writer.flush()?;
    Ok(out)
}
