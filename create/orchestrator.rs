//! Drives the reader for both classes and writes the resulting archives.

use std::io::IsTerminal;
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;

use super::reader::{FilterClass, PatternReader, ReadMode, ReadRequest, ReaderOutput};
use super::{CreateDataError, summary};
use crate::archive::efficiency::{CrossEfficiencyRecord, Dataset, EfficiencyGrids};
use crate::archive::grid::{BinGrid, Binning, bin_str};
use crate::archive::tuning::PatternGrid;
use crate::archive::{BenchmarkEfficiencyArchive, TuningDataArchive};
use crate::base_info::BaseInfo;
use crate::config::CreateDataConfig;

/// Paths written by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDataOutput {
    pub efficiency_path: PathBuf,
    pub pattern_path: Option<PathBuf>,
    pub summary_paths: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct ClassData {
    patterns: Option<PatternGrid>,
    base_info: Option<BinGrid<BaseInfo>>,
    efficiencies: EfficiencyGrids,
    cross_efficiencies: EfficiencyGrids<CrossEfficiencyRecord>,
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style =
        ProgressStyle::with_template("> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

fn log_shapes(class: FilterClass, patterns: &PatternGrid) {
    for ((et, eta), data) in patterns.iter() {
        log::info!(
            "{class} patterns {}: {} events x {} features",
            bin_str(et, eta),
            data.nrows(),
            data.ncols()
        );
    }
}

pub struct CreateData<R> {
    reader: R,
}

impl<R: PatternReader> CreateData<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn into_reader(self) -> R {
        self.reader
    }

    fn read(
        &mut self,
        config: &CreateDataConfig,
        binning: &Binning,
        class: FilterClass,
        tree_path: Option<&str>,
        mode: ReadMode,
    ) -> Result<ReaderOutput, CreateDataError> {
        let (files, reference) = match class {
            FilterClass::Signal => (&config.signal_files, &config.reference_signal),
            FilterClass::Background => (&config.background_files, &config.reference_background),
        };
        let request = ReadRequest {
            files,
            operation: config.operation,
            class,
            reference,
            tree_path,
            mode,
            binning,
            cross_validation: config.cross_validation,
            options: &config.reader_options,
        };
        Ok(self.reader.read(&request)?.restrict(mode))
    }

    fn read_class(
        &mut self,
        config: &CreateDataConfig,
        binning: &Binning,
        class: FilterClass,
        tree: Option<&str>,
        efficiency_tree: Option<&str>,
    ) -> Result<ClassData, CreateDataError> {
        let tree_label = tree.unwrap_or("<reader default>");
        let mut data = ClassData::default();
        if tree == efficiency_tree {
            log::info!("Extracting {class} dataset information for tree path: {tree_label}...");
            let mode = if config.rates_only {
                ReadMode::RatesOnly
            } else {
                ReadMode::Full
            };
            let out = self.read(config, binning, class, tree, mode)?;
            data.patterns = out.patterns;
            data.base_info = out.base_info;
            data.efficiencies = out.efficiencies;
            data.cross_efficiencies = out.cross_efficiencies;
        } else {
            if config.rates_only {
                log::warn!(
                    "Informed tree path was ignored and only the efficiency tree path is used."
                );
            } else {
                log::info!("Extracting {class} data for tree path: {tree_label}...");
                let out = self.read(config, binning, class, tree, ReadMode::PatternsOnly)?;
                data.patterns = out.patterns;
                data.base_info = out.base_info;
            }
            log::info!(
                "Extracting {class} efficiencies for efficiency tree path: {}...",
                efficiency_tree.unwrap_or("<reader default>")
            );
            let out = self.read(config, binning, class, efficiency_tree, ReadMode::RatesOnly)?;
            data.efficiencies = out.efficiencies;
            data.cross_efficiencies = out.cross_efficiencies;
        }
        if let Some(patterns) = &data.patterns {
            log_shapes(class, patterns);
        }
        Ok(data)
    }

    pub fn run(&mut self, config: &CreateDataConfig) -> Result<CreateDataOutput, CreateDataError> {
        config.validate()?;
        let binning = config.binning();
        let shape = binning.grid_shape();
        let trees = config.pattern_trees()?;
        let efficiency_trees = config.efficiency_trees()?;

        let mut signal = self.read_class(
            config,
            &binning,
            FilterClass::Signal,
            trees.signal.as_deref(),
            efficiency_trees.signal.as_deref(),
        )?;
        let mut background = self.read_class(
            config,
            &binning,
            FilterClass::Background,
            trees.background.as_deref(),
            efficiency_trees.background.as_deref(),
        )?;

        if let Some(values) = &config.efficiency_values {
            values.apply(shape, &mut signal.efficiencies, &mut background.efficiencies)?;
        }

        let benchmark = BenchmarkEfficiencyArchive::new(
            binning,
            config.operation,
            signal.efficiencies,
            background.efficiencies,
        )?
        .with_cross_efficiencies(signal.cross_efficiencies, background.cross_efficiencies)?;

        let efficiency_path = benchmark.save(&config.efficiency_path())?;
        log::info!("Saved efficiency file at path: {}", efficiency_path.display());

        let mut output = CreateDataOutput {
            efficiency_path,
            pattern_path: None,
            summary_paths: Vec::new(),
        };

        if !config.rates_only {
            let sgn = signal
                .patterns
                .ok_or_else(|| CreateDataError::MissingPatterns("signal".to_string()))?;
            let bkg = background
                .patterns
                .ok_or_else(|| CreateDataError::MissingPatterns("background".to_string()))?;
            let mut archive = TuningDataArchive::new(benchmark.clone(), sgn, bkg)?;
            match (signal.base_info, background.base_info) {
                (Some(sgn_info), Some(bkg_info)) => {
                    archive = archive.with_base_info(sgn_info, bkg_info)?;
                }
                _ => log::debug!("Reader returned no base info; archive saved without it."),
            }
            let saved = archive.save_with_export(&config.pattern_output, config.to_export)?;
            log::info!("Saved data file at path: {}", saved.display());
            if config.summaries {
                output.summary_paths.push(summary::write_counts(&archive, &saved)?);
                output.summary_paths.push(summary::write_means(&archive, &saved)?);
            }
            output.pattern_path = Some(saved);
        }

        report_efficiencies(&benchmark, config.cross_validation.is_some());
        Ok(output)
    }
}

/// Logs the detection and false-alarm figures of every benchmark in every bin.
fn report_efficiencies(archive: &BenchmarkEfficiencyArchive, cross_validation: bool) {
    let sgn = archive.signal_efficiencies();
    let bkg = archive.background_efficiencies();
    let names: Vec<&String> = sgn
        .keys()
        .sorted_by(|a, b| natord::compare(a, b))
        .collect();
    let shape = archive.binning().grid_shape();
    let pb = create_progress_bar((shape.0 * shape.1) as u64, "Reporting efficiencies...");
    for (et, eta) in itertools::iproduct!(0..shape.0, 0..shape.1) {
        for name in &names {
            let det = sgn.get(*name).and_then(|grid| grid.get(et, eta));
            let fa = bkg.get(*name).and_then(|grid| grid.get(et, eta));
            let (Some(det), Some(fa)) = (det, fa) else {
                log::warn!("Benchmark {name} is missing for {}", bin_str(et, eta));
                continue;
            };
            log::info!(
                "Efficiency for {name} {}: Det(%): {} | FA(%): {}",
                bin_str(et, eta),
                det.eff_str(),
                fa.eff_str()
            );
            if !cross_validation {
                continue;
            }
            let cross = |grids: &EfficiencyGrids<CrossEfficiencyRecord>, ds: Dataset| {
                grids
                    .get(*name)
                    .and_then(|grid| grid.get(et, eta))
                    .and_then(|rec| rec.eff_str(ds))
            };
            for ds in [Dataset::Train, Dataset::Validation, Dataset::Test, Dataset::Operation] {
                if let (Some(det), Some(fa)) = (
                    cross(archive.signal_cross_efficiencies(), ds),
                    cross(archive.background_cross_efficiencies(), ds),
                ) {
                    log::info!("{ds}_{name}: Det(%): {det} | FA(%): {fa}");
                }
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
}
