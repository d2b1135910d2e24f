//! Local file loaders that populate the relation store.
//!
//! Each loader creates or replaces its relation wholesale inside one
//! transaction: the first file creates, later files append.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use rusqlite::params;
use rusqlite::types::Value;
use tracing::{debug, info};

use crate::model::{EnrichedTripRecord, TripRecord, format_timestamp};
use crate::store::{
    self, Column, EMISSIONS_FACTOR_COLUMNS, ENRICHED_TRIP_COLUMNS, RAW_TRIP_COLUMNS, Store,
    quote_ident,
};

/// Opens a CSV reader, gunzipping files that end in `.gz`.
pub fn open_csv(path: &Path) -> Result<csv::Reader<Box<dyn Read>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let input: Box<dyn Read> = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(csv::Reader::from_reader(input))
}

fn column_defs(columns: &[Column<'static>]) -> Vec<(String, &'static str)> {
    columns
        .iter()
        .map(|c| (c.name.to_string(), c.ty.sql()))
        .collect()
}

fn insert_sql(relation: &str, columns: &[Column<'_>]) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let slots = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {} ({names}) VALUES ({slots})", quote_ident(relation))
}

/// Replaces `relation` with the raw trips found in `paths`.
#[tracing::instrument(skip(store, paths), fields(files = paths.len()))]
pub fn load_trips<P: AsRef<Path>>(store: &mut Store, relation: &str, paths: &[P]) -> Result<usize> {
    let tx = store.transaction()?;
    store::recreate_relation(&tx, relation, &column_defs(RAW_TRIP_COLUMNS))?;

    let mut loaded = 0;
    {
        let mut stmt = tx.prepare(&insert_sql(relation, RAW_TRIP_COLUMNS))?;
        for path in paths {
            let path = path.as_ref();
            let mut rdr = open_csv(path)?;
            let mut file_rows = 0;
            for result in rdr.deserialize() {
                let record: TripRecord =
                    result.with_context(|| format!("parsing {}", path.display()))?;
                stmt.execute(params![
                    format_timestamp(&record.pickup_time),
                    format_timestamp(&record.dropoff_time),
                    record.passenger_count,
                    record.trip_distance,
                ])?;
                file_rows += 1;
            }
            debug!(path = %path.display(), rows = file_rows, "Appended trip file");
            loaded += file_rows;
        }
    }

    tx.commit()?;
    info!(relation, rows = loaded, "Loaded raw trips");
    Ok(loaded)
}

/// Replaces `relation` with upstream-enriched trips found in `paths`.
///
/// Temporal keys missing from the input are derived from the pickup time.
#[tracing::instrument(skip(store, paths), fields(files = paths.len()))]
pub fn load_enriched<P: AsRef<Path>>(
    store: &mut Store,
    relation: &str,
    paths: &[P],
) -> Result<usize> {
    let tx = store.transaction()?;
    store::recreate_relation(&tx, relation, &column_defs(ENRICHED_TRIP_COLUMNS))?;

    let mut loaded = 0;
    {
        let mut stmt = tx.prepare(&insert_sql(relation, ENRICHED_TRIP_COLUMNS))?;
        for path in paths {
            let path = path.as_ref();
            let mut rdr = open_csv(path)?;
            for result in rdr.deserialize() {
                let record: EnrichedTripRecord =
                    result.with_context(|| format!("parsing {}", path.display()))?;
                let keys = record.temporal_keys();
                stmt.execute(params![
                    format_timestamp(&record.pickup_time),
                    format_timestamp(&record.dropoff_time),
                    record.passenger_count,
                    record.trip_distance,
                    record.trip_co2_kgs,
                    keys.hour_of_day,
                    keys.day_of_week,
                    keys.week_of_year,
                    keys.month_of_year,
                ])?;
                loaded += 1;
            }
        }
    }

    tx.commit()?;
    info!(relation, rows = loaded, "Loaded enriched trips");
    Ok(loaded)
}

/// Replaces `relation` with the emissions reference CSV at `path`.
///
/// The four factor columns are stored as REAL; every other column is kept as
/// text since it belongs to the enrichment step.
#[tracing::instrument(skip(store, path), fields(path = %path.display()))]
pub fn load_emissions(store: &mut Store, relation: &str, path: &Path) -> Result<usize> {
    let mut rdr = open_csv(path)?;
    let headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    for factor in EMISSIONS_FACTOR_COLUMNS {
        if !headers.iter().any(|h| h == factor.name) {
            anyhow::bail!("{} is missing column `{}`", path.display(), factor.name);
        }
    }

    let is_factor =
        |name: &str| EMISSIONS_FACTOR_COLUMNS.iter().any(|c| c.name == name);
    let defs: Vec<(String, &'static str)> = headers
        .iter()
        .map(|h| (h.clone(), if is_factor(h) { "REAL" } else { "TEXT" }))
        .collect();

    let tx = store.transaction()?;
    store::recreate_relation(&tx, relation, &defs)?;

    let names = headers.iter().map(|h| quote_ident(h)).collect::<Vec<_>>().join(", ");
    let slots = (1..=headers.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
    let mut loaded = 0;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} ({names}) VALUES ({slots})",
            quote_ident(relation)
        ))?;
        for result in rdr.records() {
            let record = result.with_context(|| format!("parsing {}", path.display()))?;
            let values = headers
                .iter()
                .zip(record.iter())
                .map(|(name, raw)| emissions_value(name, raw, is_factor(name)))
                .collect::<Result<Vec<Value>>>()?;
            stmt.execute(rusqlite::params_from_iter(values))?;
            loaded += 1;
        }
    }

    tx.commit()?;
    info!(relation, rows = loaded, "Loaded vehicle emissions");
    Ok(loaded)
}

fn emissions_value(name: &str, raw: &str, numeric: bool) -> Result<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    if numeric {
        let v: f64 = raw
            .parse()
            .with_context(|| format!("column `{name}` holds non-numeric value `{raw}`"))?;
        Ok(Value::Real(v))
    } else {
        Ok(Value::Text(raw.to_string()))
    }
}
