//! Trip records as they appear in input files.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::store::TIMESTAMP_FORMAT;

/// One raw trip, as read from a trip CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    #[serde(with = "timestamp")]
    pub pickup_time: NaiveDateTime,
    #[serde(with = "timestamp")]
    pub dropoff_time: NaiveDateTime,
    pub passenger_count: Option<i64>,
    pub trip_distance: Option<f64>,
}

/// A trip after upstream enrichment. The temporal keys are optional in the
/// input and derived from `pickup_time` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTripRecord {
    #[serde(with = "timestamp")]
    pub pickup_time: NaiveDateTime,
    #[serde(with = "timestamp")]
    pub dropoff_time: NaiveDateTime,
    pub passenger_count: Option<i64>,
    pub trip_distance: Option<f64>,
    pub trip_co2_kgs: Option<f64>,
    #[serde(default)]
    pub hour_of_day: Option<i64>,
    #[serde(default)]
    pub day_of_week: Option<i64>,
    #[serde(default)]
    pub week_of_year: Option<i64>,
    #[serde(default)]
    pub month_of_year: Option<i64>,
}

impl EnrichedTripRecord {
    /// Temporal keys, preferring the values supplied in the input.
    pub fn temporal_keys(&self) -> TemporalKeys {
        let derived = TemporalKeys::from_pickup(self.pickup_time);
        TemporalKeys {
            hour_of_day: self.hour_of_day.unwrap_or(derived.hour_of_day),
            day_of_week: self.day_of_week.unwrap_or(derived.day_of_week),
            week_of_year: self.week_of_year.unwrap_or(derived.week_of_year),
            month_of_year: self.month_of_year.unwrap_or(derived.month_of_year),
        }
    }
}

/// Grouping keys derived from a pickup timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemporalKeys {
    /// 0..=23
    pub hour_of_day: i64,
    /// 0..=6, Sunday is 0
    pub day_of_week: i64,
    /// ISO week, 1..=53
    pub week_of_year: i64,
    /// 1..=12
    pub month_of_year: i64,
}

impl TemporalKeys {
    pub fn from_pickup(pickup: NaiveDateTime) -> Self {
        Self {
            hour_of_day: pickup.hour() as i64,
            day_of_week: pickup.weekday().num_days_from_sunday() as i64,
            week_of_year: pickup.iso_week().week() as i64,
            month_of_year: pickup.month() as i64,
        }
    }
}

/// Formats a timestamp the way the store keeps it.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a stored or input timestamp. Accepts a space or `T` separator and
/// optional fractional seconds.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporal_keys_from_pickup() {
        // Sunday, 7 January 2024: ISO week 1
        let ts = parse_timestamp("2024-01-07 17:45:00").unwrap();
        let keys = TemporalKeys::from_pickup(ts);

        assert_eq!(keys.hour_of_day, 17);
        assert_eq!(keys.day_of_week, 0);
        assert_eq!(keys.week_of_year, 1);
        assert_eq!(keys.month_of_year, 1);
    }

    #[test]
    fn test_iso_week_at_year_edge() {
        // 31 December 2024 belongs to ISO week 1 of 2025
        let ts = parse_timestamp("2024-12-31 08:00:00").unwrap();
        assert_eq!(TemporalKeys::from_pickup(ts).week_of_year, 1);

        // 31 December 2020 is in week 53
        let ts = parse_timestamp("2020-12-31 08:00:00").unwrap();
        assert_eq!(TemporalKeys::from_pickup(ts).week_of_year, 53);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let a = parse_timestamp("2024-06-01 10:11:12").unwrap();
        let b = parse_timestamp("2024-06-01T10:11:12").unwrap();
        let c = parse_timestamp("2024-06-01 10:11:12.000").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_timestamp("06/01/2024").is_err());
    }

    #[test]
    fn test_supplied_keys_win_over_derived() {
        let record = EnrichedTripRecord {
            pickup_time: parse_timestamp("2024-01-07 17:45:00").unwrap(),
            dropoff_time: parse_timestamp("2024-01-07 18:00:00").unwrap(),
            passenger_count: Some(1),
            trip_distance: Some(3.0),
            trip_co2_kgs: Some(1.1),
            hour_of_day: Some(5),
            day_of_week: None,
            week_of_year: None,
            month_of_year: None,
        };

        let keys = record.temporal_keys();
        assert_eq!(keys.hour_of_day, 5);
        assert_eq!(keys.day_of_week, 0);
    }

    #[test]
    fn test_format_timestamp_keeps_fraction() {
        let ts = parse_timestamp("2024-06-01 10:11:12.750").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-06-01 10:11:12.750");

        let whole = parse_timestamp("2024-06-01T10:11:12").unwrap();
        assert_eq!(format_timestamp(&whole), "2024-06-01 10:11:12");

        // stored strings still sort chronologically
        assert!(format_timestamp(&whole) < format_timestamp(&ts));
    }
}
