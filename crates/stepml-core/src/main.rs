//! StepML CLI — assemble, split and validate simulator step-time ground truth.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use stepml_core::config::StepMlConfig;
use stepml_core::dataset::{self, Assembly};
use stepml_core::{calibration, experiment, lifecycle, sampling, splits, validation};
use stepml_eval::Baseline;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stepml",
    about = "Leakage-safe ground truth for simulator step-time models",
    version
)]
struct Cli {
    /// Path to TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Override the data root from the configuration.
    #[arg(short, long, global = true)]
    data_root: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Scheme {
    Temporal,
    Model,
    Workload,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble every experiment into one JSON-lines table.
    Assemble {
        /// Join lifecycle data to add per-step KV features.
        #[arg(long)]
        kv: bool,
        /// Output file path.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Compute split indices over the assembled table.
    Split {
        #[arg(short, long, value_enum, default_value = "temporal")]
        scheme: Scheme,
        /// Output file path.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Fit the reference baselines on the temporal split and report metrics.
    Baselines,
    /// Characterize step-id sampling per experiment.
    Sampling,
    /// Run the leakage check and the per-experiment progress-index gate.
    Validate,
    /// Parse an experiment identifier and print its metadata.
    ParseId {
        /// Experiment directory name.
        id: String,
    },
}

fn fail(context: &str, e: impl Display) -> ! {
    eprintln!("{}: {}", context, e);
    std::process::exit(1);
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn write_json<T: Serialize>(value: &T, path: &Path) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| fail("Error serializing output", e));
    std::fs::write(path, json).unwrap_or_else(|e| fail("Error writing output", e));
    println!("Results written to {}", path.display());
}

fn assemble(config: &StepMlConfig, with_kv: bool) -> Assembly {
    let root = &config.dataset.data_root;
    let layout = config.layout();
    let result = if with_kv {
        dataset::load_all_experiments_with_kv(root, &layout)
    } else {
        dataset::load_all_experiments(root, &layout)
    };
    let assembly = result.unwrap_or_else(|e| fail("Error loading dataset", e));
    for failure in &assembly.failures {
        eprintln!(
            "Skipped {} ({}): {}",
            failure.experiment_id,
            failure.path.display(),
            failure.error
        );
    }
    if assembly.table.is_empty() {
        fail("Error loading dataset", format!("no step rows under {}", root.display()));
    }
    assembly
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => StepMlConfig::from_file(path)
            .unwrap_or_else(|e| fail("Error loading config", e)),
        None => StepMlConfig::default(),
    };
    if let Some(root) = cli.data_root {
        config.dataset.data_root = root;
    }

    match cli.command {
        Commands::Assemble { kv, output } => {
            let assembly = assemble(&config, kv);
            let drifted = assembly.table.inconsistent_durations(1.0);
            if !drifted.is_empty() {
                eprintln!(
                    "Warning: {} rows have step.duration_us inconsistent with their timestamps",
                    drifted.len()
                );
            }
            assembly
                .table
                .write_jsonl(&output)
                .unwrap_or_else(|e| fail("Error writing table", e));
            println!(
                "Assembled {} rows from {} experiments ({} skipped, {} failed) to {}",
                assembly.table.len(),
                assembly.loaded.len(),
                assembly.skipped.len(),
                assembly.failures.len(),
                output.display()
            );
        }
        Commands::Split { scheme, output } => {
            let table = assemble(&config, false).table;
            match scheme {
                Scheme::Temporal => {
                    let split =
                        splits::temporal_split(&table, config.fractions(), config.split.seed);
                    println!(
                        "Temporal split: train={} valid={} test={}",
                        split.train.len(),
                        split.valid.len(),
                        split.test.len()
                    );
                    write_json(&split, &output);
                }
                Scheme::Model => {
                    let result = splits::leave_one_model_out(&table);
                    print_folds("model", &result.folds);
                    write_json(&result.folds, &output);
                }
                Scheme::Workload => {
                    let folds = splits::leave_one_workload_out(&table);
                    print_folds("workload", &folds);
                    write_json(&folds, &output);
                }
            }
        }
        Commands::Baselines => run_baselines(&config),
        Commands::Sampling => {
            let table = assemble(&config, false).table;
            let report = sampling::characterize_sampling(&table, config.gates.periodic_gap_std);
            println!("{}", report.summary);
        }
        Commands::Validate => run_validate(&config),
        Commands::ParseId { id } => {
            let meta = experiment::parse_experiment_metadata(&id)
                .unwrap_or_else(|e| fail("Error parsing id", e));
            let json = serde_json::to_string_pretty(&meta)
                .unwrap_or_else(|e| fail("Error serializing output", e));
            println!("{}", json);
        }
    }
}

fn print_folds(group: &str, folds: &[splits::Fold]) {
    println!("Leave-one-{}-out: {} folds", group, folds.len());
    for fold in folds {
        println!(
            "  {:<24} train={:>8} test={:>8}",
            fold.holdout,
            fold.train.len(),
            fold.test.len()
        );
    }
}

fn run_baselines(config: &StepMlConfig) {
    let table = assemble(config, false).table;
    let split = splits::temporal_split(&table, config.fractions(), config.split.seed);
    let train = table.samples(&split.train);
    let test = table.samples(&split.test);

    let mut baselines = stepml_eval::default_baselines();
    let report = stepml_eval::baseline_report(&train, &test, &mut baselines)
        .unwrap_or_else(|e| fail("Error fitting baselines", e));

    let actual = stepml_eval::durations(&test);
    let bootstrap = config.bootstrap();
    let mut mape_ci = BTreeMap::new();
    let mut predictions = BTreeMap::new();
    for model in &baselines {
        let predicted = model
            .predict(&test)
            .unwrap_or_else(|e| fail("Error predicting", e));
        let ci = stepml_eval::bootstrap_ci(&stepml_eval::Mape, &predicted, &actual, &bootstrap);
        mape_ci.insert(model.name().to_string(), ci);
        predictions.insert(model.name().to_string(), predicted);
    }
    println!("{}", stepml_eval::format_report_table(&report, &mape_ci));

    if let Some(m) = report.get("blackbox") {
        println!(
            "Short-circuit threshold: improved models must reach MAPE < {:.1}%",
            stepml_eval::short_circuit_threshold(m.mape)
        );
    }

    // Per-experiment aggregate: summed predicted step time of each
    // experiment's test steps against the summed measured time.
    if let Some(predicted) = predictions.get("blackbox") {
        let test_experiments = table.sample_experiments(&split.test);
        let mut predicted_by_exp: HashMap<&str, Vec<f64>> = HashMap::new();
        let mut actual_by_exp: HashMap<&str, f64> = HashMap::new();
        for ((&exp, &pred), &act) in test_experiments.iter().zip(predicted).zip(&actual) {
            predicted_by_exp.entry(exp).or_default().push(pred);
            *actual_by_exp.entry(exp).or_default() += act;
        }
        let e2e = stepml_eval::e2e_mean_error(&predicted_by_exp, &actual_by_exp);
        let gate = stepml_eval::e2e_sufficiency_gate(e2e, config.gates.e2e_sufficiency_pp);
        println!("{}", gate.message);
    }

    let groups = calibration::per_group_coefficients(&table)
        .unwrap_or_else(|e| fail("Error calibrating groups", e));
    println!("Per-model blackbox calibration ({} groups):", groups.len());
    for g in groups.values() {
        println!(
            "  {:<24} tp={:<2} beta0={:>10.2} beta1={:>8.4} beta2={:>8.4} \
             steps={:>7} exps={:>3} train MAPE={:.2}% r={:.3}",
            g.model,
            g.tp,
            g.coefficients.beta0,
            g.coefficients.beta1,
            g.coefficients.beta2,
            g.n_steps,
            g.n_experiments,
            g.train.mape,
            g.train.pearson_r
        );
    }
}

fn run_validate(config: &StepMlConfig) {
    let assembly = assemble(config, false);
    let leakage = validation::temporal_vs_random_split(
        &assembly.table,
        config.fractions(),
        config.split.seed,
        config.gates.leakage_gap_pp,
    )
    .unwrap_or_else(|e| fail("Error running leakage check", e));
    println!("Leakage check:");
    println!(
        "  temporal MAPE={:.2}% random MAPE={:.2}% gap={:+.2}pp",
        leakage.temporal_mape, leakage.random_mape, leakage.gap
    );
    println!("  {}", leakage.conclusion);

    println!("Progress-index gate:");
    let layout = config.layout();
    for experiment_id in &assembly.loaded {
        let path = config
            .dataset
            .data_root
            .join(experiment_id)
            .join(&layout.lifecycle_file);
        if !path.is_file() {
            continue;
        }
        match lifecycle::load_lifecycle(&path) {
            Ok(records) => {
                let min_r = config.gates.progress_index_min_r;
                let report = validation::validate_progress_index(&records, min_r);
                println!(
                    "  {:<48} r={:.3} n={:>6} {}",
                    experiment_id,
                    report.correlation,
                    report.n_requests,
                    if report.passed { "PASS" } else { "FLAG" }
                );
            }
            Err(e) => eprintln!("  {}: {}", experiment_id, e),
        }
    }
}
