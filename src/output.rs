//! Output formatting and persistence for reports.
//!
//! Supports pretty-printing, JSON files, the yearly-series CSV and the
//! append-only cleaning history.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzers::types::YearlySum;
use crate::clean::CleaningReport;
use csv::WriterBuilder;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

/// One row of the cleaning history CSV.
#[derive(Debug, Clone, Serialize)]
pub struct CleaningRecord {
    pub timestamp: DateTime<Utc>,
    pub relation: String,
    pub rows_before: u64,
    pub rows_after: u64,
    pub duplicates: u64,
    pub zero_passengers: u64,
    pub zero_distance: u64,
    pub over_distance: u64,
    pub negative_duration: u64,
    pub over_duration: u64,
}

impl CleaningRecord {
    pub fn new(timestamp: DateTime<Utc>, report: &CleaningReport) -> Self {
        let removed = &report.removed;
        Self {
            timestamp,
            relation: report.relation.clone(),
            rows_before: report.rows_before,
            rows_after: report.rows_after,
            duplicates: removed.duplicates,
            zero_passengers: removed.zero_passengers,
            zero_distance: removed.zero_distance,
            over_distance: removed.over_distance,
            negative_duration: removed.negative_duration,
            over_duration: removed.over_duration,
        }
    }
}

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty<T: std::fmt::Debug>(value: &T) {
    debug!("{:#?}", value);
}

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes a value as pretty-printed JSON to `path`, replacing any existing file.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    info!(path = %path.display(), "Wrote JSON report");
    Ok(())
}

/// Writes the yearly series as `class,year,sum` rows.
pub fn write_series_csv(path: &Path, series: &[YearlySum]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for point in series {
        writer.serialize(point)?;
    }
    writer.flush()?;
    info!(path = %path.display(), points = series.len(), "Wrote yearly series");
    Ok(())
}

/// Appends a [`CleaningRecord`] as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record(path: &Path, record: &CleaningRecord) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}
