//! CLI entry point for the taxi CO2 pipeline.
//!
//! Provides subcommands for loading trip and emissions data into the relation
//! store, cleaning raw trips, summarising relations, and running the emission
//! aggregations.

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use taxi_co2::analyzers::analyzer::analyze;
use taxi_co2::clean::clean;
use taxi_co2::config::{ClassConfig, PipelineConfig};
use taxi_co2::load::{load_emissions, load_enriched, load_trips};
use taxi_co2::output::{CleaningRecord, append_record, print_json, print_pretty, write_json, write_series_csv};
use taxi_co2::stats::{emissions_averages, relation_rows, trip_averages};
use taxi_co2::store::Store;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "taxi_co2")]
#[command(about = "Clean NYC taxi trips and aggregate their CO2 emissions", long_about = None)]
struct Cli {
    /// JSON pipeline config; defaults are used when omitted
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load raw trip CSVs (optionally .gz) into a class's raw relation
    LoadTrips {
        #[arg(long)]
        class: String,

        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,
    },
    /// Load enriched trip CSVs into a class's enriched relation
    LoadEnriched {
        #[arg(long)]
        class: String,

        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,
    },
    /// Load the vehicle emissions reference CSV
    LoadEmissions {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Log row counts and averages of every configured relation
    Summary,
    /// Deduplicate and filter raw trips in place
    Clean {
        /// Only clean this class (default: all classes)
        #[arg(long)]
        class: Option<String>,

        /// CSV file to append cleaning reports to
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Compute extremes and the yearly series for all classes
    Analyze {
        /// Write the full report as JSON
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,

        /// Write the yearly series as CSV
        #[arg(long, value_name = "FILE")]
        series: Option<PathBuf>,

        #[arg(long)]
        year_min: Option<i32>,

        #[arg(long)]
        year_max: Option<i32>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/taxi_co2.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("taxi_co2.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load(cli.config.as_deref())?;

    let mut store = Store::open(&config.database)?;
    let result = run(&mut store, &mut config, cli.command);
    let closed = store.close();

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result?;
    closed?;
    Ok(())
}

fn run(store: &mut Store, config: &mut PipelineConfig, command: Commands) -> Result<()> {
    match command {
        Commands::LoadTrips { class, files } => {
            let class = config.class(&class)?;
            let rows = load_trips(store, &class.raw_relation, &files)?;
            info!(class = %class.name, relation = %class.raw_relation, rows, "Raw trips loaded");
        }
        Commands::LoadEnriched { class, files } => {
            let class = config.class(&class)?;
            let rows = load_enriched(store, &class.enriched_relation, &files)?;
            info!(class = %class.name, relation = %class.enriched_relation, rows, "Enriched trips loaded");
        }
        Commands::LoadEmissions { file } => {
            let rows = load_emissions(store, &config.emissions_relation, &file)?;
            info!(relation = %config.emissions_relation, rows, "Emissions loaded");
        }
        Commands::Summary => summary(store, config)?,
        Commands::Clean { class, history } => {
            let classes: Vec<ClassConfig> = match class {
                Some(name) => vec![config.class(&name)?.clone()],
                None => config.classes.clone(),
            };
            for class in &classes {
                let report = clean(store, &class.raw_relation)?;
                info!(
                    class = %class.name,
                    before = report.rows_before,
                    after = report.rows_after,
                    removed = report.removed.total(),
                    "Cleaning complete"
                );
                for (check, count) in report.removed.entries() {
                    info!(class = %class.name, check, count, "Rows removed");
                }
                print_json(&report)?;
                if let Some(path) = &history {
                    append_record(path, &CleaningRecord::new(Utc::now(), &report))?;
                }
            }
        }
        Commands::Analyze {
            json,
            series,
            year_min,
            year_max,
        } => {
            if let Some(min) = year_min {
                config.year_min = min;
            }
            if let Some(max) = year_max {
                config.year_max = max;
            }
            config.validate()?;

            let report = analyze(store, config)?;
            print_pretty(&report);
            if !report.failures.is_empty() {
                warn!(failed = report.failures.len(), "Some classes could not be analyzed");
            }
            if let Some(path) = &json {
                write_json(path, &report)?;
            }
            if let Some(path) = &series {
                write_series_csv(path, &report.series)?;
            }
        }
    }
    Ok(())
}

/// Logs row counts of every configured relation and averages of the ones
/// that exist.
fn summary(store: &Store, config: &PipelineConfig) -> Result<()> {
    let mut relations: Vec<&str> = Vec::new();
    for class in &config.classes {
        relations.push(&class.raw_relation);
        relations.push(&class.enriched_relation);
    }
    relations.push(&config.emissions_relation);

    for (relation, rows) in relation_rows(store, &relations)? {
        match rows {
            Some(rows) => info!(relation = %relation, rows, "Relation"),
            None => warn!(relation = %relation, "Relation not loaded"),
        }
    }

    for class in &config.classes {
        if store.relation_exists(&class.raw_relation)? {
            print_json(&trip_averages(store, &class.raw_relation)?.rounded())?;
        }
    }
    if store.relation_exists(&config.emissions_relation)? {
        print_json(&emissions_averages(store, &config.emissions_relation)?.rounded())?;
    }
    Ok(())
}
