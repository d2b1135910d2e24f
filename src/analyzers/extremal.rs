use std::cmp::Ordering;

use tracing::debug;

use crate::analyzers::types::{Extremes, GroupKey, GroupValue, MaxTrip};
use crate::analyzers::utility::pick_extreme;
use crate::error::{CoreError, CoreResult};
use crate::store::{ColumnType, Store, col, quote_ident};

/// Computes the mean of `metric` per `group_key` value and returns the groups
/// with the greatest and least mean.
///
/// Ties on the mean go to the smallest group key. Rows with a NULL key are
/// ignored, as are groups without any non-NULL metric.
///
/// # Errors
///
/// [`CoreError::EmptyRelation`] when no group has a usable mean;
/// [`CoreError::SchemaMismatch`] when the relation or a column is missing.
#[tracing::instrument(skip(store))]
pub fn extremal_by_group(
    store: &Store,
    relation: &str,
    group_key: GroupKey,
    metric: &str,
) -> CoreResult<Extremes> {
    let groups = group_means(store, relation, group_key, metric)?;

    let heaviest = pick_extreme(&groups, |g| g.mean, Ordering::Greater);
    let lightest = pick_extreme(&groups, |g| g.mean, Ordering::Less);
    let (Some(heaviest), Some(lightest)) = (heaviest, lightest) else {
        return Err(CoreError::EmptyRelation(relation.to_string()));
    };

    let extremes = Extremes {
        dimension: group_key,
        heaviest: groups[heaviest],
        lightest: groups[lightest],
    };
    debug!(
        groups = groups.len(),
        heaviest = extremes.heaviest.key,
        lightest = extremes.lightest.key,
        "Extremes selected"
    );
    Ok(extremes)
}

/// Per-group means ordered by ascending key.
pub fn group_means(
    store: &Store,
    relation: &str,
    group_key: GroupKey,
    metric: &str,
) -> CoreResult<Vec<GroupValue>> {
    let key_col = group_key.column();
    store.require_columns(
        relation,
        &[col(key_col, ColumnType::Integer), col(metric, ColumnType::Real)],
    )?;

    let key = quote_ident(key_col);
    let value = quote_ident(metric);
    let sql = format!(
        "SELECT {key}, AVG({value}), COUNT({value})
         FROM {}
         WHERE {key} IS NOT NULL
         GROUP BY {key}
         HAVING COUNT({value}) > 0
         ORDER BY {key} ASC",
        quote_ident(relation)
    );

    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(GroupValue {
            key: row.get(0)?,
            mean: row.get(1)?,
            trips: row.get::<usize, i64>(2)?.max(0) as u64,
        })
    })?;

    let mut groups = Vec::new();
    for row in rows {
        groups.push(row?);
    }
    // The store already orders by key; keep the tie-break independent of it.
    groups.sort_by_key(|g| g.key);
    Ok(groups)
}

/// Returns the trip with the greatest `metric`.
///
/// Ties go to the earliest pickup, then to the earliest inserted row.
#[tracing::instrument(skip(store))]
pub fn global_max(store: &Store, relation: &str, metric: &str) -> CoreResult<MaxTrip> {
    store.require_columns(
        relation,
        &[
            col("pickup_time", ColumnType::Timestamp),
            col("dropoff_time", ColumnType::Timestamp),
            col(metric, ColumnType::Real),
        ],
    )?;

    let value = quote_ident(metric);
    let sql = format!(
        "SELECT pickup_time, dropoff_time, {value}
         FROM {}
         WHERE {value} IS NOT NULL
         ORDER BY {value} DESC, pickup_time ASC, rowid ASC
         LIMIT 1",
        quote_ident(relation)
    );

    let mut stmt = store.conn().prepare(&sql)?;
    let mut rows = stmt.query_map([], |row| {
        Ok(MaxTrip {
            pickup_time: row.get(0)?,
            dropoff_time: row.get(1)?,
            metric: row.get(2)?,
        })
    })?;

    match rows.next() {
        Some(row) => Ok(row?),
        None => Err(CoreError::EmptyRelation(relation.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const METRIC: &str = "trip_co2_kgs";

    #[test]
    fn test_tie_goes_to_smallest_key() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");
        // hour 7 inserted first so insertion order cannot explain the result
        insert(&store, "t", "2024-01-01 07:00:00", 2.5, 7);
        insert(&store, "t", "2024-01-01 03:00:00", 2.0, 3);
        insert(&store, "t", "2024-01-02 03:00:00", 3.0, 3);

        for _ in 0..5 {
            let extremes = extremal_by_group(&store, "t", GroupKey::HourOfDay, METRIC).unwrap();
            assert_eq!(extremes.heaviest.key, 3);
            assert_eq!(extremes.lightest.key, 3);
            assert_eq!(extremes.heaviest.mean, 2.5);
        }
    }

    #[test]
    fn test_heaviest_and_lightest_hours() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");
        insert(&store, "t", "2024-01-01 01:00:00", 1.0, 1);
        insert(&store, "t", "2024-01-01 01:30:00", 3.0, 1);
        insert(&store, "t", "2024-01-01 08:00:00", 0.5, 8);
        insert(&store, "t", "2024-01-01 17:00:00", 4.0, 17);
        insert(&store, "t", "2024-01-01 17:10:00", 6.0, 17);

        let extremes = extremal_by_group(&store, "t", GroupKey::HourOfDay, METRIC).unwrap();

        assert_eq!(extremes.dimension, GroupKey::HourOfDay);
        assert_eq!(extremes.heaviest.key, 17);
        assert_eq!(extremes.heaviest.mean, 5.0);
        assert_eq!(extremes.heaviest.trips, 2);
        assert_eq!(extremes.lightest.key, 8);
        assert_eq!(extremes.lightest.mean, 0.5);
    }

    #[test]
    fn test_dimensions_are_independent() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");
        // month 2 is heavy on average, hour 9 is light on average
        store
            .execute_batch(
                "INSERT INTO t (pickup_time, dropoff_time, trip_co2_kgs, hour_of_day, day_of_week, week_of_year, month_of_year) VALUES
                 ('2024-01-01 09:00:00', '2024-01-01 09:10:00', 1.0, 9, 1, 1, 1),
                 ('2024-02-05 09:00:00', '2024-02-05 09:10:00', 2.0, 9, 1, 6, 2),
                 ('2024-02-05 20:00:00', '2024-02-05 20:10:00', 8.0, 20, 1, 6, 2)",
            )
            .unwrap();

        let hours = extremal_by_group(&store, "t", GroupKey::HourOfDay, METRIC).unwrap();
        let months = extremal_by_group(&store, "t", GroupKey::MonthOfYear, METRIC).unwrap();
        let days = extremal_by_group(&store, "t", GroupKey::DayOfWeek, METRIC).unwrap();

        assert_eq!((hours.heaviest.key, hours.lightest.key), (20, 9));
        assert_eq!((months.heaviest.key, months.lightest.key), (2, 1));
        assert_eq!(months.heaviest.mean, 5.0);
        // a single group is both heaviest and lightest
        assert_eq!((days.heaviest.key, days.lightest.key), (1, 1));
    }

    #[test]
    fn test_null_keys_and_metrics_ignored() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");
        store
            .execute_batch(
                "INSERT INTO t (pickup_time, dropoff_time, trip_co2_kgs, hour_of_day) VALUES
                 ('2024-01-01 05:00:00', '2024-01-01 05:10:00', 100.0, NULL),
                 ('2024-01-01 06:00:00', '2024-01-01 06:10:00', NULL, 6),
                 ('2024-01-01 04:00:00', '2024-01-01 04:10:00', 1.5, 4)",
            )
            .unwrap();

        let groups = group_means(&store, "t", GroupKey::HourOfDay, METRIC).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, 4);
    }

    #[test]
    fn test_empty_relation_is_an_error() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");

        let err = extremal_by_group(&store, "t", GroupKey::WeekOfYear, METRIC).unwrap_err();
        assert!(matches!(err, CoreError::EmptyRelation(ref r) if r == "t"));

        let err = global_max(&store, "t", METRIC).unwrap_err();
        assert!(matches!(err, CoreError::EmptyRelation(_)));
    }

    #[test]
    fn test_missing_metric_is_schema_mismatch() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");

        let err = extremal_by_group(&store, "t", GroupKey::HourOfDay, "trip_co2_tons").unwrap_err();
        assert!(matches!(err, CoreError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_global_max_earliest_pickup_wins() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");
        insert(&store, "t", "2024-04-03 10:00:00", 5.9, 10);
        insert(&store, "t", "2024-04-01 10:00:00", 1.2, 10);
        insert(&store, "t", "2024-04-02 10:00:00", 5.9, 10);

        let max = global_max(&store, "t", METRIC).unwrap();

        assert_eq!(max.pickup_time, "2024-04-02 10:00:00");
        assert_eq!(max.dropoff_time, "2024-04-02 10:15:00");
        assert_eq!(max.metric, 5.9);
    }

    #[test]
    fn test_global_max_row_order_breaks_full_tie() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");
        store
            .execute_batch(
                "INSERT INTO t (pickup_time, dropoff_time, trip_co2_kgs) VALUES
                 ('2024-04-01 10:00:00', '2024-04-01 10:30:00', 7.0),
                 ('2024-04-01 10:00:00', '2024-04-01 10:20:00', 7.0)",
            )
            .unwrap();

        let max = global_max(&store, "t", METRIC).unwrap();
        assert_eq!(max.dropoff_time, "2024-04-01 10:30:00");
    }

    #[test]
    fn test_display_rounding_does_not_affect_selection() {
        let store = Store::in_memory().unwrap();
        enriched(&store, "t");
        insert(&store, "t", "2024-01-01 01:00:00", 1.0004, 1);
        insert(&store, "t", "2024-01-01 02:00:00", 1.0001, 2);

        let extremes = extremal_by_group(&store, "t", GroupKey::HourOfDay, METRIC).unwrap();
        assert_eq!(extremes.heaviest.key, 1);
        assert_eq!(extremes.lightest.key, 2);

        let max = global_max(&store, "t", METRIC).unwrap();
        assert_eq!(max.display_metric(), 1.0);
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

    fn insert(store: &Store, relation: &str, pickup: &str, co2: f64, hour: i64) {
        let dropoff = pickup.replace(":00:00", ":15:00");
        store
            .conn()
            .execute(
                &format!(
                    "INSERT INTO {relation} (pickup_time, dropoff_time, passenger_count, trip_distance, trip_co2_kgs, hour_of_day)
                     VALUES (?1, ?2, 1, 1.0, ?3, ?4)"
                ),
                rusqlite::params![pickup, dropoff, co2, hour],
            )
            .unwrap();
    }
}
