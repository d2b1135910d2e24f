//! Data types produced by the aggregation pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyzers::utility::round3;
use crate::error::{CoreError, CoreResult};

/// Temporal dimension used to partition trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    HourOfDay,
    DayOfWeek,
    WeekOfYear,
    MonthOfYear,
}

impl GroupKey {
    pub const ALL: [GroupKey; 4] = [
        GroupKey::HourOfDay,
        GroupKey::DayOfWeek,
        GroupKey::WeekOfYear,
        GroupKey::MonthOfYear,
    ];

    /// Column holding this key in an enriched relation.
    pub fn column(self) -> &'static str {
        match self {
            GroupKey::HourOfDay => "hour_of_day",
            GroupKey::DayOfWeek => "day_of_week",
            GroupKey::WeekOfYear => "week_of_year",
            GroupKey::MonthOfYear => "month_of_year",
        }
    }

    /// Human-readable name, e.g. "hour of the day".
    pub fn label(self) -> &'static str {
        match self {
            GroupKey::HourOfDay => "hour of the day",
            GroupKey::DayOfWeek => "day of the week",
            GroupKey::WeekOfYear => "week of the year",
            GroupKey::MonthOfYear => "month of the year",
        }
    }
}

/// One group's key and mean metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GroupValue {
    pub key: i64,
    pub mean: f64,
    pub trips: u64,
}

/// Heaviest and lightest group for one dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extremes {
    pub dimension: GroupKey,
    pub heaviest: GroupValue,
    pub lightest: GroupValue,
}

/// The single largest-emitting trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaxTrip {
    pub pickup_time: String,
    pub dropoff_time: String,
    pub metric: f64,
}

impl MaxTrip {
    pub fn display_metric(&self) -> f64 {
        round3(self.metric)
    }
}

/// Inclusive year bound for the time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct YearRange {
    pub min: i32,
    pub max: i32,
}

impl YearRange {
    pub fn new(min: i32, max: i32) -> CoreResult<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.min > self.max {
            return Err(CoreError::InvalidRange {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

/// One point of the yearly series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlySum {
    pub class: String,
    pub year: i32,
    pub sum: f64,
}

/// Extremal results for one vehicle class.
#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub class: String,
    pub relation: String,
    pub max_trip: MaxTrip,
    pub extremes: Vec<Extremes>,
}

/// A class whose analysis failed.
#[derive(Debug, Clone, Serialize)]
pub struct ClassFailure {
    pub class: String,
    pub relation: String,
    pub error: String,
}

/// Everything one `analyze` run produces.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub metric: String,
    pub years: YearRange,
    pub classes: Vec<ClassReport>,
    pub failures: Vec<ClassFailure>,
    pub series: Vec<YearlySum>,
}
