// ========================================================================================
//
//                      THE COMMAND-LINE FRONT END: PGS-EVAL
//
// ========================================================================================
//
// This binary is the reporting layer around the library's pure computations. It owns
// everything with a side effect: argument parsing, logging setup, reading input tables,
// and writing result tables and model files. The library functions it calls take
// in-memory data and return values; nothing here feeds back into them.

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use pgs_eval::calibrate::data::{Cohort, DEFAULT_GROUP_COLUMN, load_cohort};
use pgs_eval::calibrate::estimate::{CalibrationOptions, ScoreCalibration, calibrate_many};
use pgs_eval::calibrate::model::{CalibrationArtifact, NamedCalibration};
use pgs_eval::calibrate::summary::{GroupSummary, summarize_by_group};
use pgs_eval::calibrate::types::ScoreRecord;
use pgs_eval::heterogeneity::data::load_group_estimates;
use pgs_eval::heterogeneity::table::HeterogeneityTable;
use pgs_eval::shared::output;
use std::collections::HashMap;
use std::process;

#[derive(Parser)]
#[command(
    name = "pgs-eval",
    about = "Evaluate polygenic scores across genetic ancestry groups",
    long_about = "Measures cross-ancestry heterogeneity of score effects (Cochran's Q, I^2) and \
                  calibrates raw scores against genetic principal components."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute Cochran's Q and I^2 per score from per-group effect estimates
    #[command(about = "Cross-ancestry heterogeneity (outputs: heterogeneity.tsv)")]
    Heterogeneity(HeterogeneityArgs),

    /// Fit and apply mean/variance calibration against principal components
    #[command(about = "Calibrate scores against PCs (outputs: calibrated.tsv)")]
    Calibrate(CalibrateArgs),

    /// Apply a saved calibration to a new cohort
    #[command(about = "Apply a saved calibration model (outputs: calibrated.tsv)")]
    Apply(ApplyArgs),

    /// Show version information
    Version,
}

#[derive(Args)]
struct HeterogeneityArgs {
    /// TSV with score, group, beta, p_value columns (one row per score and group)
    estimates: String,

    /// Output path
    #[arg(long, default_value = "heterogeneity.tsv")]
    out: String,
}

#[derive(Args)]
struct CohortArgs {
    /// TSV with sample_id, the group column, PC1..PCk and one or more score columns
    scores: String,

    /// Name of the ancestry label column
    #[arg(long, default_value = DEFAULT_GROUP_COLUMN)]
    group_column: String,

    /// Output path for per-sample calibrated scores
    #[arg(long, default_value = "calibrated.tsv")]
    out: String,

    /// Optional output path for per-group score summaries
    #[arg(long)]
    summary: Option<String>,
}

#[derive(Args)]
struct CalibrateArgs {
    #[command(flatten)]
    cohort: CohortArgs,

    /// Number of principal components to use from the data
    #[arg(long, value_name = "N")]
    num_pcs: usize,

    /// Score column to calibrate (repeatable; default: every non-id, non-group, non-PC column)
    #[arg(long = "score-column", value_name = "NAME")]
    score_columns: Vec<String>,

    /// Save the fitted calibration to this TOML file
    #[arg(long, value_name = "PATH")]
    save_model: Option<String>,

    /// Relative spread below which a PC column is treated as constant
    #[arg(long, default_value_t = CalibrationOptions::default().aliasing_tolerance)]
    aliasing_tolerance: f64,

    /// Relative QR diagonal threshold for rank deficiency
    #[arg(long, default_value_t = CalibrationOptions::default().rank_tolerance)]
    rank_tolerance: f64,
}

#[derive(Args)]
struct ApplyArgs {
    #[command(flatten)]
    cohort: CohortArgs,

    /// Calibration model file produced by `calibrate --save-model`
    #[arg(long)]
    model: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Heterogeneity(args)) => run_heterogeneity(args),
        Some(Commands::Calibrate(args)) => run_calibrate(args),
        Some(Commands::Apply(args)) => run_apply(args),
        Some(Commands::Version) => {
            println!("pgs-eval {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_heterogeneity(args: HeterogeneityArgs) -> Result<(), Box<dyn std::error::Error>> {
    let rows = load_group_estimates(&args.estimates)?;
    let table = HeterogeneityTable::from_estimates(rows)?;

    let undefined = table
        .rows
        .iter()
        .filter(|row| row.result.i_squared.is_none())
        .count();
    if undefined > 0 {
        println!("{undefined} score(s) had fewer than two usable groups; I^2 is NA for them.");
    }

    output::write_heterogeneity(&table, output::create(&args.out)?)?;
    println!("Heterogeneity for {} score(s) saved to: {}", table.len(), args.out);
    Ok(())
}

fn run_calibrate(args: CalibrateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cohort = load_cohort(
        &args.cohort.scores,
        args.num_pcs,
        &args.cohort.group_column,
        &args.score_columns,
    )?;
    let options = CalibrationOptions {
        aliasing_tolerance: args.aliasing_tolerance,
        rank_tolerance: args.rank_tolerance,
    };

    let score_names = cohort.score_names();
    println!(
        "Calibrating {} score(s) over {} samples with {} PCs",
        score_names.len(),
        cohort.len(),
        args.num_pcs
    );
    let calibrations = calibrate_many(&cohort, &score_names, &options)?;

    if let Some(path) = &args.save_model {
        let artifact = CalibrationArtifact {
            pc_names: cohort.pc_names.clone(),
            scores: calibrations
                .iter()
                .map(|c| NamedCalibration {
                    score: c.score.clone(),
                    model: c.model.clone(),
                })
                .collect(),
        };
        artifact.save(path)?;
        println!("Calibration model saved to: {path}");
    }

    write_results(&cohort, &calibrations, &args.cohort)
}

fn run_apply(args: ApplyArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model);
    let artifact = CalibrationArtifact::load(&args.model)?;
    let num_pcs = artifact.pc_names.len();
    println!("Model expects {num_pcs} PCs");

    let score_names: Vec<String> = artifact.scores.iter().map(|s| s.score.clone()).collect();
    let cohort = load_cohort(
        &args.cohort.scores,
        num_pcs,
        &args.cohort.group_column,
        &score_names,
    )?;

    let records = records_by_score(&cohort);
    let calibrations = artifact
        .scores
        .iter()
        .map(|named| {
            let score_records = records.get(&named.score).map(Vec::as_slice).unwrap_or(&[]);
            let calibrated = named.model.apply(score_records)?;
            Ok(ScoreCalibration {
                score: named.score.clone(),
                model: named.model.clone(),
                calibrated,
            })
        })
        .collect::<Result<Vec<_>, pgs_eval::calibrate::model::ModelError>>()?;

    write_results(&cohort, &calibrations, &args.cohort)
}

fn records_by_score(cohort: &Cohort) -> HashMap<String, Vec<ScoreRecord>> {
    cohort
        .score_names()
        .into_iter()
        .filter_map(|name| cohort.records(&name).map(|records| (name, records)))
        .collect()
}

fn write_results(
    cohort: &Cohort,
    calibrations: &[ScoreCalibration],
    args: &CohortArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = records_by_score(cohort);

    for calibration in calibrations {
        let undefined = calibration
            .calibrated
            .iter()
            .filter(|c| c.variance_calibrated.is_none())
            .count();
        if undefined > 0 {
            println!(
                "{}: {} sample(s) with non-positive predicted variance (variance_calibrated = NA)",
                calibration.score, undefined
            );
        }
    }

    output::write_calibrated(
        calibrations,
        |name| records.get(name).map(Vec::as_slice),
        output::create(&args.out)?,
    )?;
    println!("Calibrated scores saved to: {}", args.out);

    if let Some(path) = &args.summary {
        let summaries: Vec<(String, Vec<GroupSummary>)> = calibrations
            .iter()
            .filter_map(|c| {
                let score_records = records.get(&c.score)?;
                summarize_by_group(score_records, &c.calibrated).map(|s| (c.score.clone(), s))
            })
            .collect();
        output::write_group_summaries(&summaries, output::create(path)?)?;
        println!("Group summaries saved to: {path}");
    }
    Ok(())
}
