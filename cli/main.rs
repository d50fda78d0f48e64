#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use atmcast::learners::LearnerRegistry;
use atmcast::pipeline::{self, Pipeline};
use atmcast::{BuildRequest, CsvHistory, ForecastConfig};
use chrono::{Local, NaiveDate};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "atmcast",
    about = "Per-ATM cash withdrawal forecasting",
    long_about = "Builds calendar, payday and seasonal features from ATM withdrawal history, \
                 trains one cross-validated regression ensemble per ATM and predicts daily usage."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct SourceArgs {
    /// History source identifier; the file read is <DATA_DIR>/<SOURCE_ID>.csv
    #[arg(value_name = "SOURCE_ID")]
    source_id: String,

    /// Directory holding history files and the feature cache
    #[arg(long, value_name = "DIR")]
    data_dir: PathBuf,

    /// First date held out of training (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    split_date: NaiveDate,

    /// Days past --today to forecast
    #[arg(long, value_name = "DAYS", default_value = "0")]
    horizon: u32,

    /// Reference date (YYYY-MM-DD); defaults to the local date
    #[arg(long, value_name = "DATE")]
    today: Option<NaiveDate>,

    /// TOML configuration file; built-in defaults are used when absent
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Rebuild the feature table even if a cached copy exists
    #[arg(long)]
    refresh: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build features, train per-ATM ensembles and write predictions
    #[command(about = "Forecast daily usage (outputs: predictions.csv)")]
    Forecast {
        #[command(flatten)]
        source: SourceArgs,

        /// Restrict the forecast to these ATM ids (repeatable)
        #[arg(long = "atm", value_name = "ID")]
        atms: Vec<String>,

        /// Where to write the predictions
        #[arg(long, value_name = "PATH", default_value = "predictions.csv")]
        output: PathBuf,
    },

    /// Build and cache the feature table only
    #[command(about = "Build the feature table (outputs: <DATA_DIR>/cache/features-*.csv)")]
    Features {
        #[command(flatten)]
        source: SourceArgs,
    },
}

fn build_pipeline(
    source: &SourceArgs,
) -> Result<(Pipeline, CsvHistory, BuildRequest), Box<dyn std::error::Error>> {
    let config = match &source.config {
        Some(path) => {
            println!("Loading configuration from: {}", path.display());
            ForecastConfig::load(path)?
        }
        None => ForecastConfig::default(),
    };
    let pipeline = Pipeline::new(
        config,
        LearnerRegistry::with_builtins(),
        Some(pipeline::cache_dir(&source.data_dir)),
    )?;
    let history = CsvHistory::new(&source.source_id, &source.data_dir);
    let request = BuildRequest {
        split_date: source.split_date,
        today: source
            .today
            .unwrap_or_else(|| Local::now().date_naive()),
        horizon_days: source.horizon,
        refresh: source.refresh,
    };
    Ok((pipeline, history, request))
}

fn run_forecast(
    source: SourceArgs,
    atms: Vec<String>,
    output: PathBuf,
) -> Result<bool, Box<dyn std::error::Error>> {
    let (pipeline, history, request) = build_pipeline(&source)?;
    let predictions = pipeline.forecast(&history, &request, &atms)?;
    predictions.write_csv(&output)?;
    println!(
        "Wrote {} predictions to {}",
        predictions.rows.len(),
        output.display()
    );

    for failure in &predictions.failures {
        eprintln!("ATM '{}' failed: {}", failure.entity, failure.error);
    }
    Ok(predictions.failures.is_empty())
}

fn run_features(source: SourceArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let (pipeline, history, request) = build_pipeline(&source)?;
    let table = pipeline.features(&history, &request)?;
    println!(
        "Feature table ready: {} rows, {} feature columns.",
        table.len(),
        table.feature_count()
    );
    Ok(true)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Forecast {
            source,
            atms,
            output,
        }) => run_forecast(source, atms, output),
        Some(Commands::Features { source }) => run_features(source),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
