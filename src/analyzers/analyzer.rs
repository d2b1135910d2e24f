use anyhow::Result;
use tracing::{error, info};

use crate::analyzers::extremal::{extremal_by_group, global_max};
use crate::analyzers::timeseries::yearly_sums_by_class;
use crate::analyzers::types::{AnalysisReport, ClassFailure, ClassReport, GroupKey};
use crate::analyzers::utility::round3;
use crate::config::{ClassConfig, PipelineConfig};
use crate::error::CoreResult;
use crate::store::Store;

/// Runs the extremal analysis for every configured class, then the yearly
/// series over the classes that succeeded.
///
/// A class whose analysis fails is logged and listed in
/// [`AnalysisReport::failures`]; the remaining classes still run.
#[tracing::instrument(skip_all, fields(classes = config.classes.len()))]
pub fn analyze(store: &Store, config: &PipelineConfig) -> Result<AnalysisReport> {
    let years = config.years()?;
    let metric = config.metric.as_str();

    let mut classes = Vec::new();
    let mut failures = Vec::new();
    for class in &config.classes {
        match analyze_class(store, class, metric) {
            Ok(report) => classes.push(report),
            Err(e) => {
                error!(class = %class.name, relation = %class.enriched_relation, error = %e, "Class analysis failed");
                failures.push(ClassFailure {
                    class: class.name.clone(),
                    relation: class.enriched_relation.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let analyzed: Vec<(&str, &str)> = classes
        .iter()
        .map(|c| (c.class.as_str(), c.relation.as_str()))
        .collect();
    let series = yearly_sums_by_class(store, &analyzed, metric, years)?;
    info!(points = series.len(), "Yearly series computed");

    Ok(AnalysisReport {
        generated_at: chrono::Utc::now(),
        metric: metric.to_string(),
        years,
        classes,
        failures,
        series,
    })
}

/// Global max trip plus heaviest/lightest group for every dimension.
pub fn analyze_class(store: &Store, class: &ClassConfig, metric: &str) -> CoreResult<ClassReport> {
    let relation = class.enriched_relation.as_str();
    let label = class.name.to_uppercase();

    let max_trip = global_max(store, relation, metric)?;
    info!(
        "Largest carbon-producing trip for {label}: {} kg CO2, picked up {} and dropped off {}",
        max_trip.display_metric(),
        max_trip.pickup_time,
        max_trip.dropoff_time
    );

    let mut extremes = Vec::with_capacity(GroupKey::ALL.len());
    for key in GroupKey::ALL {
        let e = extremal_by_group(store, relation, key, metric)?;
        info!(
            "HEAVIEST carbon {} for {label} trips: {} ({} kg avg)",
            key.label(),
            e.heaviest.key,
            round3(e.heaviest.mean)
        );
        info!(
            "LIGHTEST carbon {} for {label} trips: {} ({} kg avg)",
            key.label(),
            e.lightest.key,
            round3(e.lightest.mean)
        );
        extremes.push(e);
    }

    Ok(ClassReport {
        class: class.name.clone(),
        relation: relation.to_string(),
        max_trip,
        extremes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_class_does_not_stop_others() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "final_yellow_data");
        store
            .execute_batch(
                "INSERT INTO final_yellow_data VALUES
                 ('2023-05-01 08:00:00', '2023-05-01 08:20:00', 1, 3.0, 1.2, 8, 1, 18, 5),
                 ('2024-05-02 18:00:00', '2024-05-02 18:40:00', 2, 9.0, 3.4, 18, 4, 18, 5)",
            )
            .unwrap();
        // final_green_data is never created

        let report = analyze(&store, &PipelineConfig::default()).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].class, "green");
        assert!(report.failures[0].error.contains("final_green_data"));
        assert_eq!(report.classes.len(), 1);
        assert_eq!(report.classes[0].class, "yellow");
        assert_eq!(report.classes[0].max_trip.metric, 3.4);

        let years: Vec<(&str, i32)> = report.series.iter().map(|p| (p.class.as_str(), p.year)).collect();
        assert_eq!(years, vec![("yellow", 2023), ("yellow", 2024)]);
    }

    #[test]
    fn test_empty_class_is_recorded_as_failure() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "final_green_data");
        enriched(&store, "final_yellow_data");

        let config = PipelineConfig {
            classes: vec![ClassConfig::new("green", "green_taxi_data", "final_green_data")],
            ..PipelineConfig::default()
        };
        let report = analyze(&store, &config).unwrap();

        assert!(report.classes.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(report.series.is_empty());
    }

    #[test]
    fn test_class_report_covers_every_dimension() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");
        store
            .execute_batch(
                "INSERT INTO t VALUES
                 ('2024-01-07 03:00:00', '2024-01-07 03:10:00', 1, 1.0, 0.4, 3, 0, 1, 1),
                 ('2024-03-06 21:00:00', '2024-03-06 21:30:00', 1, 8.0, 2.8, 21, 3, 10, 3)",
            )
            .unwrap();

        let class = ClassConfig::new("yellow", "y", "t");
        let report = analyze_class(&store, &class, "trip_co2_kgs").unwrap();

        let dims: Vec<GroupKey> = report.extremes.iter().map(|e| e.dimension).collect();
        assert_eq!(dims, GroupKey::ALL.to_vec());
        for e in &report.extremes {
            assert_eq!(e.heaviest.mean, 2.8);
            assert_eq!(e.lightest.mean, 0.4);
        }
        assert_eq!(report.max_trip.pickup_time, "2024-03-06 21:00:00");
    }

    // Helper functions for tests
    fn enriched(store: &Store, relation: &str) {
        store
            .execute_batch(&format!(
                "CREATE TABLE {relation} (
                    pickup_time TEXT,
                    dropoff_time TEXT,
                    passenger_count INTEGER,
                    trip_distance REAL,
                    trip_co2_kgs REAL,
                    hour_of_day INTEGER,
                    day_of_week INTEGER,
                    week_of_year INTEGER,
                    month_of_year INTEGER
                )"
            ))
            .unwrap();
    }
}
