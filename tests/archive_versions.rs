use ndarray::{Array1, array};
use ringer::archive::efficiency::grids_to_raw;
use ringer::archive::{
    BenchmarkEfficiencyArchive, BinGrid, BinRequest, CURRENT_VERSION, EfficiencyGrids,
    EfficiencyRecord, LoadOptions, RingerOperation, TuningDataArchive,
};
use ringer::archive::benchmark::bins_info;
use ringer::raw::{Container, RawDict, RawValue, read_container, write_container};
use tempfile::tempdir;

fn write(
    dir: &std::path::Path,
    name: &str,
    raw: &RawDict,
    container: Container,
) -> std::path::PathBuf {
    let path = dir.join(name);
    write_container(&path, raw, container).expect("write container");
    path
}

#[test]
fn flat_uncompressed_archive_loads_as_single_cell() {
    let dir = tempdir().unwrap();
    let mut raw = RawDict::new();
    raw.insert(
        "signal_rings".into(),
        RawValue::matrix(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].view()),
    );
    raw.insert("background_rings".into(), RawValue::matrix(array![[0.5, 0.5, 0.5]].view()));
    let path = write(dir.path(), "legacy.npz", &raw, Container::Plain);

    let archive = TuningDataArchive::load(&path, &LoadOptions::default()).unwrap();
    assert_eq!(archive.benchmark().read_version(), Some(0));
    assert_eq!(archive.benchmark().operation(), RingerOperation::EFCalo);
    assert!(!archive.benchmark().is_et_dependent());
    assert_eq!(archive.n_et_bins(), 0);
    assert_eq!(
        archive.signal_patterns().as_single().unwrap(),
        &array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]
    );
    assert_eq!(archive.background_patterns().as_single().unwrap().nrows(), 1);
    assert!(archive.signal_base_info().is_none());
    assert!(archive.benchmark().signal_efficiencies().is_empty());

    let info = bins_info(&path).unwrap();
    assert!(!info.is_eta_dependent);
    assert_eq!(info.n_eta_bins, 0);
}

#[test]
fn version_five_keys_are_upgraded_and_resaved() {
    let dir = tempdir().unwrap();
    let shape = (2, 1);
    let grid = BinGrid::from_fn(shape, |et, _| {
        EfficiencyRecord::new("Medium", 80 + et as u64, 100).unwrap()
    });
    let efficiencies = EfficiencyGrids::from([("Medium".to_string(), grid)]);

    let mut raw = RawDict::new();
    raw.insert("version".into(), RawValue::Int(5));
    raw.insert("type".into(), RawValue::text("TuningDataArchive"));
    raw.insert("et_bins".into(), RawValue::vector(array![15.0, 40.0, 100.0].view()));
    raw.insert("eta_bins".into(), RawValue::vector(Array1::zeros(0).view()));
    raw.insert("operation".into(), RawValue::Int(RingerOperation::HLT.code()));
    raw.insert("signal_efficiencies".into(), grids_to_raw(&efficiencies));
    raw.insert("background_efficiencies".into(), grids_to_raw(&efficiencies));
    for et in 0..2 {
        raw.insert(
            format!("signal_patterns_etBin_{et}_etaBin_0"),
            RawValue::matrix(array![[et as f64, 1.0]].view()),
        );
        raw.insert(
            format!("background_patterns_etBin_{et}_etaBin_0"),
            RawValue::matrix(array![[-1.0, et as f64], [0.0, 0.0]].view()),
        );
    }
    let path = write(dir.path(), "v5.rdz", &raw, Container::Gzip);

    let options = LoadOptions::default().bins(BinRequest::One(1), BinRequest::All);
    let archive = TuningDataArchive::load(&path, &options).unwrap();
    assert_eq!(archive.benchmark().read_version(), Some(5));
    assert_eq!(archive.binning().et_edges(), &array![40.0, 100.0]);
    assert_eq!(archive.signal_patterns().as_single().unwrap(), &array![[1.0, 1.0]]);
    assert_eq!(
        archive.benchmark().signal_efficiencies()["Medium"]
            .as_single()
            .unwrap()
            .passed(),
        81
    );

    let resaved = archive.save(&dir.path().join("v6")).unwrap();
    let (raw, container) = read_container(&resaved).unwrap();
    assert_eq!(container, Container::Gzip);
    assert_eq!(raw["version"], RawValue::Int(CURRENT_VERSION));
    assert!(raw.contains_key("signalPatterns_etBin_0_etaBin_0"));
    assert!(!raw.keys().any(|key| key.starts_with("signal_patterns")));
    assert_eq!(raw["nEtBins"], RawValue::Int(1));
}

#[test]
fn version_four_archive_without_edges_loads_unbinned() {
    let dir = tempdir().unwrap();
    let mut raw = RawDict::new();
    raw.insert("version".into(), RawValue::Int(4));
    raw.insert("operation".into(), RawValue::Int(RingerOperation::L2.code()));
    raw.insert(
        "signal_rings_etBin_0_etaBin_0".into(),
        RawValue::matrix(array![[1.0, 2.0], [3.0, 4.0]].view()),
    );
    raw.insert(
        "background_rings_etBin_0_etaBin_0".into(),
        RawValue::matrix(array![[5.0, 6.0]].view()),
    );
    let path = write(dir.path(), "v4.rdz", &raw, Container::Gzip);

    let archive = TuningDataArchive::load(&path, &LoadOptions::default()).unwrap();
    assert_eq!(archive.benchmark().read_version(), Some(4));
    assert_eq!(archive.benchmark().operation(), RingerOperation::L2);
    assert!(!archive.benchmark().is_et_dependent());
    assert!(!archive.benchmark().is_eta_dependent());
    assert_eq!(archive.signal_patterns().as_single().unwrap().nrows(), 2);
    assert_eq!(archive.background_patterns().as_single().unwrap().nrows(), 1);
}

#[test]
fn newer_archives_are_refused() {
    let dir = tempdir().unwrap();
    let mut raw = RawDict::new();
    raw.insert("version".into(), RawValue::Int(CURRENT_VERSION + 1));
    let path = write(dir.path(), "future.rdz", &raw, Container::Gzip);
    assert!(BenchmarkEfficiencyArchive::load(&path, &LoadOptions::default()).is_err());
}

#[test]
fn requesting_a_missing_bin_fails() {
    let dir = tempdir().unwrap();
    let archive = BenchmarkEfficiencyArchive::new(
        ringer::archive::Binning::new(array![0.0, 10.0, 20.0, 30.0], array![0.0, 2.5]),
        RingerOperation::L2,
        EfficiencyGrids::new(),
        EfficiencyGrids::new(),
    )
    .unwrap();
    let path = archive.save(&dir.path().join("eff")).unwrap();
    let loaded = BenchmarkEfficiencyArchive::load(
        &path,
        &LoadOptions::default().bins(BinRequest::One(2), BinRequest::One(0)),
    )
    .unwrap();
    assert_eq!(loaded.binning().et_edges(), &array![20.0, 30.0]);
    assert_eq!(loaded.n_et_bins(), 1);

    let err = BenchmarkEfficiencyArchive::load(
        &path,
        &LoadOptions::default().bins(BinRequest::One(3), BinRequest::All),
    )
    .unwrap_err();
    assert_eq!(err.to_string(), "Cannot retrieve etBin(3). E_T bin size: 3.");
}
