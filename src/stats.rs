//! Load-time summary statistics for trip and emissions relations.

use serde::Serialize;

use crate::analyzers::utility::round3;
use crate::error::CoreResult;
use crate::store::{EMISSIONS_FACTOR_COLUMNS, RAW_TRIP_COLUMNS, Store, quote_ident};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripAverages {
    pub relation: String,
    pub rows: u64,
    pub avg_pickup_time: Option<String>,
    pub avg_dropoff_time: Option<String>,
    pub avg_passenger_count: Option<f64>,
    pub avg_trip_distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmissionsAverages {
    pub relation: String,
    pub rows: u64,
    pub avg_mpg_city: Option<f64>,
    pub avg_mpg_highway: Option<f64>,
    pub avg_co2_grams_per_mile: Option<f64>,
    pub avg_vehicle_year: Option<f64>,
}

impl TripAverages {
    /// Averages rounded to 3 decimals for display.
    pub fn rounded(&self) -> Self {
        Self {
            avg_passenger_count: self.avg_passenger_count.map(round3),
            avg_trip_distance: self.avg_trip_distance.map(round3),
            ..self.clone()
        }
    }
}

impl EmissionsAverages {
    /// Factor averages rounded to 3 decimals, model year to 1.
    pub fn rounded(&self) -> Self {
        Self {
            avg_mpg_city: self.avg_mpg_city.map(round3),
            avg_mpg_highway: self.avg_mpg_highway.map(round3),
            avg_co2_grams_per_mile: self.avg_co2_grams_per_mile.map(round3),
            avg_vehicle_year: self.avg_vehicle_year.map(|v| (v * 10.0).round() / 10.0),
            ..self.clone()
        }
    }
}

/// Row counts of the given relations, in the order given. Missing relations
/// report `None`.
pub fn relation_rows<S: AsRef<str>>(store: &Store, relations: &[S]) -> CoreResult<Vec<(String, Option<u64>)>> {
    let mut counts = Vec::with_capacity(relations.len());
    for relation in relations {
        let relation = relation.as_ref();
        let rows = if store.relation_exists(relation)? {
            Some(store.row_count(relation)?)
        } else {
            None
        };
        counts.push((relation.to_string(), rows));
    }
    Ok(counts)
}

/// Row count and column averages of a trip relation. Average timestamps are
/// computed over epoch seconds and formatted back.
pub fn trip_averages(store: &Store, relation: &str) -> CoreResult<TripAverages> {
    store.require_columns(relation, RAW_TRIP_COLUMNS)?;

    let sql = format!(
        "SELECT
             COUNT(*),
             datetime(AVG(CAST(strftime('%s', pickup_time) AS INTEGER)), 'unixepoch'),
             datetime(AVG(CAST(strftime('%s', dropoff_time) AS INTEGER)), 'unixepoch'),
             AVG(passenger_count),
             AVG(trip_distance)
         FROM {}",
        quote_ident(relation)
    );

    let averages = store.conn().query_row(&sql, [], |row| {
        Ok(TripAverages {
            relation: relation.to_string(),
            rows: row.get::<usize, i64>(0)?.max(0) as u64,
            avg_pickup_time: row.get(1)?,
            avg_dropoff_time: row.get(2)?,
            avg_passenger_count: row.get(3)?,
            avg_trip_distance: row.get(4)?,
        })
    })?;
    Ok(averages)
}

/// Row count and factor averages of the emissions reference relation.
pub fn emissions_averages(store: &Store, relation: &str) -> CoreResult<EmissionsAverages> {
    store.require_columns(relation, EMISSIONS_FACTOR_COLUMNS)?;

    let sql = format!(
        "SELECT COUNT(*), AVG(mpg_city), AVG(mpg_highway), AVG(co2_grams_per_mile), AVG(vehicle_year_avg)
         FROM {}",
        quote_ident(relation)
    );

    let averages = store.conn().query_row(&sql, [], |row| {
        Ok(EmissionsAverages {
            relation: relation.to_string(),
            rows: row.get::<usize, i64>(0)?.max(0) as u64,
            avg_mpg_city: row.get(1)?,
            avg_mpg_highway: row.get(2)?,
            avg_co2_grams_per_mile: row.get(3)?,
            avg_vehicle_year: row.get(4)?,
        })
    })?;
    Ok(averages)
}
