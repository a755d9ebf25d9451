#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use ringer::archive::export::export_tables;
use ringer::archive::{
    BenchmarkEfficiencyArchive, BinRequest, CURRENT_VERSION, EfficiencyGrids, LoadOptions,
    TuningDataArchive,
};
use ringer::config::PreProcConfig;
use ringer::preproc::{PreProcFile, Transform};

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Args)]
struct BinArgs {
    /// E_T bin indices to load; all bins when omitted
    #[arg(long = "et-bin", value_name = "IDX")]
    et_bins: Vec<usize>,

    /// Eta bin indices to load; all bins when omitted
    #[arg(long = "eta-bin", value_name = "IDX")]
    eta_bins: Vec<usize>,
}

/// Flag order does not matter; gaps are rejected when the archive is loaded.
fn request(indices: &[usize]) -> BinRequest {
    let sorted: Vec<usize> = indices.iter().copied().sorted_unstable().dedup().collect();
    match sorted.as_slice() {
        [] => BinRequest::All,
        [only] => BinRequest::One(*only),
        _ => BinRequest::Many(sorted),
    }
}

impl BinArgs {
    fn load_options(&self) -> LoadOptions {
        LoadOptions::default().bins(request(&self.et_bins), request(&self.eta_bins))
    }
}

#[derive(Parser)]
#[command(
    name = "ringer",
    about = "Inspect, subset and export Ringer tuning archives and fit pre-processing chains",
    long_about = "Tools around the binned efficiency and tuning-data archives: list their \
                 content, extract a subset of E_T x eta bins, write tabular exports and fit \
                 pre-processing chains on the stored patterns."
)]
struct Cli {
    /// Log level; RUST_LOG takes precedence when set
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the binning, benchmarks and pattern counts of an archive")]
    Inspect {
        archive: PathBuf,

        #[command(flatten)]
        bins: BinArgs,

        /// Also print cross-validation efficiencies
        #[arg(long)]
        cross: bool,
    },
    #[command(about = "Write the selected bins of an archive to a new archive")]
    Subset {
        input: PathBuf,

        output: PathBuf,

        #[command(flatten)]
        bins: BinArgs,
    },
    /// Write the efficiency tables of an archive
    /// (outputs: <stem>-efficiencies.csv, <stem>-bins.csv)
    Export { archive: PathBuf },
    /// Fit pre-processing chains on every bin of a tuning archive
    /// (outputs: .rdz pre-processing file)
    FitPreproc {
        archive: PathBuf,

        /// TOML file with one [[chains]] table per candidate chain
        #[arg(long)]
        config: PathBuf,

        /// Where to save the fitted pre-processing file
        #[arg(long)]
        output: PathBuf,

        #[command(flatten)]
        bins: BinArgs,
    },
}

fn main() {
    let Cli { log_level, command } = Cli::parse();
    let env = env_logger::Env::default().default_filter_or(log_level.as_filter());
    env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .init();

    let result = match command {
        Some(Commands::Inspect {
            archive,
            bins,
            cross,
        }) => run_inspect(&archive, &bins, cross),
        Some(Commands::Subset {
            input,
            output,
            bins,
        }) => run_subset(&input, &output, &bins),
        Some(Commands::Export { archive }) => run_export(&archive),
        Some(Commands::FitPreproc {
            archive,
            config,
            output,
            bins,
        }) => run_fit_preproc(&archive, &config, &output, &bins),
        None => Cli::command().print_help().map_err(|e| e.into()),
    };

    if let Err(e) = result {
        log::error!("{e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn print_efficiencies(label: &str, grids: &EfficiencyGrids) {
    for name in grids.keys().sorted_by(|a, b| natord::compare(a, b)) {
        for ((et, eta), record) in grids[name].iter() {
            println!("  {label:<10} {name:<20} et {et} eta {eta}: {}", record.eff_str());
        }
    }
}

fn run_inspect(path: &Path, bins: &BinArgs, cross: bool) -> CliResult {
    let mut options = bins.load_options();
    if cross {
        options = options.with_cross_efficiencies();
    }
    let benchmark = BenchmarkEfficiencyArchive::load(path, &options)?;
    println!("Archive:   {}", path.display());
    println!(
        "Version:   {} (current {CURRENT_VERSION})",
        benchmark.read_version().unwrap_or(CURRENT_VERSION)
    );
    println!("Operation: {}", benchmark.operation());
    println!(
        "E_T bins:  {} {:?}",
        benchmark.n_et_bins(),
        benchmark.binning().et_edges().to_vec()
    );
    println!(
        "Eta bins:  {} {:?}",
        benchmark.n_eta_bins(),
        benchmark.binning().eta_edges().to_vec()
    );
    println!("Efficiencies:");
    print_efficiencies("signal", benchmark.signal_efficiencies());
    print_efficiencies("background", benchmark.background_efficiencies());
    if cross {
        for (label, grids) in [
            ("signal", benchmark.signal_cross_efficiencies()),
            ("background", benchmark.background_cross_efficiencies()),
        ] {
            for (name, grid) in grids.iter().sorted_by(|a, b| natord::compare(a.0, b.0)) {
                for ((et, eta), record) in grid.iter() {
                    for ds in record.datasets() {
                        if let Some(eff) = record.eff_str(ds) {
                            println!("  {label:<10} {ds}_{name} et {et} eta {eta}: {eff}");
                        }
                    }
                }
            }
        }
    }

    if TuningDataArchive::is_tuning_file(path)? {
        let tuning = TuningDataArchive::load(path, &options)?;
        println!("Patterns:");
        for (((et, eta), sgn), (_, bkg)) in tuning
            .signal_patterns()
            .iter()
            .zip(tuning.background_patterns().iter())
        {
            println!(
                "  et {et} eta {eta}: signal {} x {}, background {} x {}",
                sgn.nrows(),
                sgn.ncols(),
                bkg.nrows(),
                bkg.ncols()
            );
        }
        let with_info = tuning.signal_base_info().is_some();
        println!("Base info: {}", if with_info { "yes" } else { "no" });
    }
    Ok(())
}

fn run_subset(input: &Path, output: &Path, bins: &BinArgs) -> CliResult {
    let options = bins.load_options();
    let saved = if TuningDataArchive::is_tuning_file(input)? {
        TuningDataArchive::load(input, &options)?.save(output)?
    } else {
        BenchmarkEfficiencyArchive::load(input, &options)?.save(output)?
    };
    println!("Saved subset to {}", saved.display());
    Ok(())
}

fn run_export(path: &Path) -> CliResult {
    let options = LoadOptions::default().with_cross_efficiencies();
    let archive = BenchmarkEfficiencyArchive::load(path, &options)?;
    for written in export_tables(&archive, path)? {
        println!("Wrote {}", written.display());
    }
    Ok(())
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

fn run_fit_preproc(path: &Path, config: &Path, output: &Path, bins: &BinArgs) -> CliResult {
    let candidates = PreProcConfig::load(config)?.collection()?;
    for chain in candidates.chains() {
        println!("Candidate chain: {}", chain.name());
    }
    let tuning = TuningDataArchive::load(path, &bins.load_options())?;
    let (n_et, n_eta) = tuning.signal_patterns().shape();
    let pb = create_progress_bar((n_et * n_eta) as u64, "Fitting pre-processing...");
    let fitted = tuning.fit_preproc(&candidates, |_, _| pb.inc(1))?;
    pb.finish_with_message("Fitting complete.");
    let saved = PreProcFile::new(fitted).save(output)?;
    println!("Saved fitted pre-processing to {}", saved.display());
    Ok(())
}
