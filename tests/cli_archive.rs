use std::fs;
use std::process::Command;

use ndarray::{Array2, array};
use ringer::archive::efficiency::EfficiencyRecord;
use ringer::archive::{
    BenchmarkEfficiencyArchive, BinGrid, Binning, EfficiencyGrids, LoadOptions, RingerOperation,
    TuningDataArchive,
};
use ringer::preproc::PreProcFile;
use tempfile::tempdir;

fn sample_archive(dir: &std::path::Path) -> std::path::PathBuf {
    let binning = Binning::new(array![15.0, 30.0, 50.0], array![0.0, 1.37]);
    let shape = binning.grid_shape();
    let record = |passed| EfficiencyRecord::new("Medium", passed, 10).expect("record");
    let benchmark = BenchmarkEfficiencyArchive::new(
        binning,
        RingerOperation::L2Calo,
        EfficiencyGrids::from([("Medium".to_string(), BinGrid::filled(shape, record(9)))]),
        EfficiencyGrids::from([("Medium".to_string(), BinGrid::filled(shape, record(1)))]),
    )
    .expect("benchmark");
    let patterns = |offset: f64| {
        BinGrid::from_fn(shape, |et, _| {
            Array2::from_shape_fn((6 + et, 3), |(i, j)| offset + (i * 3 + j) as f64)
        })
    };
    TuningDataArchive::new(benchmark, patterns(1.0), patterns(-4.0))
        .expect("tuning archive")
        .save(&dir.join("data"))
        .expect("save archive")
}

#[test]
fn inspect_lists_bins_and_patterns() {
    let tmp = tempdir().expect("temporary directory");
    let archive = sample_archive(tmp.path());

    let output = Command::new(env!("CARGO_BIN_EXE_ringer"))
        .args(["inspect", archive.to_str().expect("path str")])
        .output()
        .expect("run ringer cli");

    assert!(output.status.success(), "CLI exited with status {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Operation: L2Calo"), "{stdout}");
    assert!(stdout.contains("et 1 eta 0: signal 7 x 3, background 7 x 3"), "{stdout}");
}

#[test]
fn subset_keeps_only_the_requested_bin() {
    let tmp = tempdir().expect("temporary directory");
    let archive = sample_archive(tmp.path());
    let target = tmp.path().join("subset");

    let status = Command::new(env!("CARGO_BIN_EXE_ringer"))
        .args([
            "subset",
            archive.to_str().expect("path str"),
            target.to_str().expect("path str"),
            "--et-bin",
            "1",
        ])
        .status()
        .expect("run ringer cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    let subset = TuningDataArchive::load(&tmp.path().join("subset.rdz"), &LoadOptions::default())
        .expect("load subset");
    assert_eq!(subset.n_et_bins(), 1);
    assert_eq!(subset.signal_patterns().get(0, 0).expect("cell").nrows(), 7);
}

#[test]
fn subset_accepts_bins_in_any_order_but_not_gaps() {
    let tmp = tempdir().expect("temporary directory");
    let archive = sample_archive(tmp.path());
    let archive = archive.to_str().expect("path str");
    let target = tmp.path().join("both");

    let status = Command::new(env!("CARGO_BIN_EXE_ringer"))
        .args(["subset", archive, target.to_str().expect("path str")])
        .args(["--et-bin", "1", "--et-bin", "0", "--et-bin", "1"])
        .status()
        .expect("run ringer cli");
    assert!(status.success(), "CLI exited with status {status:?}");
    let subset = TuningDataArchive::load(&tmp.path().join("both.rdz"), &LoadOptions::default())
        .expect("load subset");
    assert_eq!(subset.binning().et_edges(), &array![15.0, 30.0, 50.0]);

    let three = Binning::new(array![15.0, 30.0, 50.0, 80.0], array![0.0, 1.37]);
    let wide = TuningDataArchive::new(
        BenchmarkEfficiencyArchive::new(
            three.clone(),
            RingerOperation::L2Calo,
            EfficiencyGrids::new(),
            EfficiencyGrids::new(),
        )
        .expect("benchmark"),
        BinGrid::filled(three.grid_shape(), Array2::zeros((2, 3))),
        BinGrid::filled(three.grid_shape(), Array2::ones((2, 3))),
    )
    .expect("tuning archive")
    .save(&tmp.path().join("wide"))
    .expect("save archive");
    let status = Command::new(env!("CARGO_BIN_EXE_ringer"))
        .args(["subset", wide.to_str().expect("path str")])
        .arg(tmp.path().join("gapped"))
        .args(["--et-bin", "0", "--et-bin", "2"])
        .status()
        .expect("run ringer cli");
    assert_eq!(status.code(), Some(1));
    assert!(!tmp.path().join("gapped.rdz").exists());
}

#[test]
fn fit_preproc_writes_one_chain_per_candidate_and_bin() {
    let tmp = tempdir().expect("temporary directory");
    let archive = sample_archive(tmp.path());
    let config = tmp.path().join("chains.toml");
    fs::write(
        &config,
        concat!(
            "[[chains]]\nsteps = [{ kind = \"norm1\" }]\n\n",
            "[[chains]]\nsteps = [{ kind = \"map_std\" }]\n",
        ),
    )
    .expect("write chain config");
    let output = tmp.path().join("pp.rdz");

    let status = Command::new(env!("CARGO_BIN_EXE_ringer"))
        .args([
            "--log-level",
            "warn",
            "fit-preproc",
            archive.to_str().expect("path str"),
            "--config",
            config.to_str().expect("path str"),
            "--output",
            output.to_str().expect("path str"),
        ])
        .status()
        .expect("run ringer cli");
    assert!(status.success(), "CLI exited with status {status:?}");

    let fitted = PreProcFile::load(&output).expect("load pre-processing file");
    assert_eq!(fitted.collection().chains().count(), 4);
}

#[test]
fn missing_archive_exits_with_failure() {
    let tmp = tempdir().expect("temporary directory");
    let status = Command::new(env!("CARGO_BIN_EXE_ringer"))
        .args(["export", tmp.path().join("absent.rdz").to_str().expect("path str")])
        .status()
        .expect("run ringer cli");
    assert_eq!(status.code(), Some(1));
}
