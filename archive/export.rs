//! Flat tabular export of an efficiency archive, written next to the archive.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::ArchiveError;
use super::benchmark::BenchmarkEfficiencyArchive;
use super::efficiency::EfficiencyGrids;
use crate::layout::Float;

#[derive(Debug, Serialize)]
struct EfficiencyRow<'a> {
    class: &'static str,
    benchmark: &'a str,
    #[serde(rename = "etBin")]
    et_bin: usize,
    #[serde(rename = "etaBin")]
    eta_bin: usize,
    dataset: String,
    passed: u64,
    count: u64,
    efficiency: Float,
    operation: String,
    method: String,
}

#[derive(Debug, Serialize)]
struct EdgeRow {
    axis: &'static str,
    index: usize,
    lower: Float,
    upper: Float,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}-{suffix}.csv"))
}

fn efficiency_rows<'a>(
    class: &'static str,
    operation: &str,
    grids: &'a EfficiencyGrids,
    out: &mut Vec<EfficiencyRow<'a>>,
) {
    for (name, grid) in grids {
        for ((et, eta), record) in grid.iter() {
            out.push(EfficiencyRow {
                class,
                benchmark: name,
                et_bin: et,
                eta_bin: eta,
                dataset: "Operation".into(),
                passed: record.passed(),
                count: record.count(),
                efficiency: record.efficiency(),
                operation: operation.to_string(),
                method: String::new(),
            });
        }
    }
}

/// Writes `<stem>-efficiencies.csv` and `<stem>-bins.csv` next to `path`.
pub fn export_tables(
    archive: &BenchmarkEfficiencyArchive,
    path: &Path,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let operation = archive.operation().to_string();
    let mut rows = Vec::new();
    efficiency_rows("signal", &operation, archive.signal_efficiencies(), &mut rows);
    efficiency_rows("background", &operation, archive.background_efficiencies(), &mut rows);
    for (class, grids) in [
        ("signal", archive.signal_cross_efficiencies()),
        ("background", archive.background_cross_efficiencies()),
    ] {
        for (name, grid) in grids {
            for ((et, eta), record) in grid.iter() {
                for dataset in record.datasets() {
                    let Some((passed, count)) = record.counts(dataset) else {
                        continue;
                    };
                    rows.push(EfficiencyRow {
                        class,
                        benchmark: name,
                        et_bin: et,
                        eta_bin: eta,
                        dataset: dataset.to_string(),
                        passed,
                        count,
                        efficiency: record.efficiency(dataset).unwrap_or_default(),
                        operation: operation.clone(),
                        method: record.method().to_string(),
                    });
                }
            }
        }
    }

    let eff_path = sibling(path, "efficiencies");
    let mut writer = csv::Writer::from_path(&eff_path)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    let bins_path = sibling(path, "bins");
    let mut writer = csv::Writer::from_path(&bins_path)?;
    let binning = archive.binning();
    for (axis, edges) in [("et", binning.et_edges()), ("eta", binning.eta_edges())] {
        for (index, pair) in edges.windows(2).into_iter().enumerate() {
            writer.serialize(EdgeRow {
                axis,
                index,
                lower: pair[0],
                upper: pair[1],
            })?;
        }
    }
    writer.flush()?;

    log::info!(
        "Exported {} efficiency rows to {}",
        rows.len(),
        eff_path.display()
    );
    Ok(vec![eff_path, bins_path])
}

/// Export after a successful save; a failure here never fails the save.
pub(crate) fn export_best_effort(archive: &BenchmarkEfficiencyArchive, saved: &Path) {
    if let Err(err) = export_tables(archive, saved) {
        log::warn!(
            "Could not export the efficiency tables of {}: {err}",
            saved.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::efficiency::{EfficiencyRecord, RingerOperation};
    use crate::archive::grid::{BinGrid, Binning};
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn tables_are_written_beside_the_archive() {
        let dir = tempdir().unwrap();
        let binning = Binning::new(array![15.0, 20.0, 30.0], Default::default());
        let grid = BinGrid::from_fn(binning.grid_shape(), |et, _| {
            EfficiencyRecord::new("Loose", 40 + et as u64, 50).unwrap()
        });
        let archive = BenchmarkEfficiencyArchive::new(
            binning,
            RingerOperation::HLT,
            EfficiencyGrids::from([("Loose".to_string(), grid.clone())]),
            EfficiencyGrids::from([("Loose".to_string(), grid)]),
        )
        .unwrap();
        let saved = archive.save_with_export(&dir.path().join("eff"), true).unwrap();

        let eff = std::fs::read_to_string(dir.path().join("eff-efficiencies.csv")).unwrap();
        let mut lines = eff.lines();
        assert_eq!(
            lines.next().unwrap(),
            "class,benchmark,etBin,etaBin,dataset,passed,count,efficiency,operation,method"
        );
        assert_eq!(lines.count(), 4);
        assert!(eff.contains("signal,Loose,1,0,Operation,41,50,"));
        assert!(eff.lines().all(|line| line.ends_with(",HLT,") || line.ends_with("method")));

        let bins = std::fs::read_to_string(dir.path().join("eff-bins.csv")).unwrap();
        assert_eq!(bins.lines().count(), 3);
        assert!(bins.contains("et,1,20.0,30.0"));
        assert!(saved.exists());
    }

    #[test]
    fn failed_export_keeps_the_archive() {
        let dir = tempdir().unwrap();
        let archive = BenchmarkEfficiencyArchive::new(
            Binning::default(),
            RingerOperation::L2,
            EfficiencyGrids::new(),
            EfficiencyGrids::new(),
        )
        .unwrap();
        let missing = dir.path().join("gone").join("eff.rdz");
        assert!(export_tables(&archive, &missing).is_err());
        export_best_effort(&archive, &missing);
    }
}
