//! Row-level validation and de-duplication of raw trip relations.
//!
//! [`clean`] rebuilds a relation in place inside one store transaction: the
//! filtered, distinct rows are written to a staging relation, the original is
//! dropped, the staging relation takes its name, every invariant is re-checked,
//! and only then is the transaction committed. Nothing in between is visible to
//! other readers, and any failure leaves the original relation untouched.

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::store::{self, RAW_TRIP_COLUMNS, Store, quote_ident};

/// Longest trip kept, in miles.
pub const MAX_TRIP_DISTANCE: f64 = 100.0;

/// Longest trip kept, in seconds.
pub const MAX_TRIP_SECONDS: i64 = 86_400;

/// A row predicate. `valid` is an SQL boolean expression over the row;
/// NULL counts as a violation.
///
/// SQLite keeps non-numeric text in numeric columns and orders text above
/// every number, so each predicate checks the storage class before comparing.
struct Stage {
    name: &'static str,
    valid: &'static str,
}

/// Applied after de-duplication, in this order.
static STAGES: &[Stage] = &[
    Stage {
        name: "zero_passengers",
        valid: "typeof(passenger_count) IN ('integer', 'real') AND passenger_count > 0",
    },
    Stage {
        name: "zero_distance",
        valid: "typeof(trip_distance) IN ('integer', 'real') AND trip_distance > 0",
    },
    Stage {
        name: "over_distance",
        valid: "typeof(trip_distance) IN ('integer', 'real') AND trip_distance <= 100",
    },
    Stage {
        name: "negative_duration",
        valid: "typeof(pickup_time) = 'text' AND typeof(dropoff_time) = 'text' \
                AND unixepoch(dropoff_time, 'subsec') \
                - unixepoch(pickup_time, 'subsec') >= 0",
    },
    Stage {
        name: "over_duration",
        valid: "typeof(pickup_time) = 'text' AND typeof(dropoff_time) = 'text' \
                AND unixepoch(dropoff_time, 'subsec') \
                - unixepoch(pickup_time, 'subsec') <= 86400",
    },
];

fn holds(stage: &Stage) -> String {
    format!("COALESCE(({}), 0)", stage.valid)
}

/// Per-category row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViolationCounts {
    pub duplicates: u64,
    pub zero_passengers: u64,
    pub zero_distance: u64,
    pub over_distance: u64,
    pub negative_duration: u64,
    pub over_duration: u64,
}

impl ViolationCounts {
    fn from_stage_counts(duplicates: u64, stages: &[u64]) -> Self {
        let at = |i: usize| stages.get(i).copied().unwrap_or(0);
        Self {
            duplicates,
            zero_passengers: at(0),
            zero_distance: at(1),
            over_distance: at(2),
            negative_duration: at(3),
            over_duration: at(4),
        }
    }

    pub fn entries(&self) -> [(&'static str, u64); 6] {
        [
            ("duplicates", self.duplicates),
            ("zero_passengers", self.zero_passengers),
            ("zero_distance", self.zero_distance),
            ("over_distance", self.over_distance),
            ("negative_duration", self.negative_duration),
            ("over_duration", self.over_duration),
        ]
    }

    pub fn total(&self) -> u64 {
        self.entries().iter().map(|(_, n)| n).sum()
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

/// Outcome of one [`clean`] call.
///
/// `removed` attributes each dropped row to the first stage it failed
/// (duplicates first), so its total equals `rows_before - rows_after`.
/// `post_check` is measured independently against the cleaned relation and is
/// always zero in a returned report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleaningReport {
    pub relation: String,
    pub rows_before: u64,
    pub rows_after: u64,
    pub removed: ViolationCounts,
    pub post_check: ViolationCounts,
}

/// Atomically replaces `relation` with its distinct rows that satisfy every
/// trip predicate.
#[tracing::instrument(skip(store))]
pub fn clean(store: &mut Store, relation: &str) -> CoreResult<CleaningReport> {
    let tx = store.transaction()?;

    let columns = store::require_columns(&tx, relation, RAW_TRIP_COLUMNS)?;
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let ident = quote_ident(relation);
    let staging = quote_ident(&format!("{relation}__cleaning"));

    let rows_before = store::row_count(&tx, relation)?;
    let removed = measure_removals(&tx, &ident, &column_list, rows_before)?;
    debug!(rows_before, ?removed, "Measured violations");

    let keep = STAGES.iter().map(holds).collect::<Vec<_>>().join(" AND ");
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {staging};
         CREATE TABLE {staging} AS
             SELECT {column_list} FROM {ident}
             WHERE {keep}
             GROUP BY {column_list}
             ORDER BY MIN(rowid);
         DROP TABLE {ident};
         ALTER TABLE {staging} RENAME TO {ident};"
    ))?;

    let rows_after = store::row_count(&tx, relation)?;
    let post_check = measure_violations(&tx, &ident, &column_list)?;

    let report = CleaningReport {
        relation: relation.to_string(),
        rows_before,
        rows_after,
        removed,
        post_check,
    };
    verify(&report)?;

    tx.commit()?;

    info!(
        relation,
        rows_before,
        rows_after,
        duplicates = removed.duplicates,
        zero_passengers = removed.zero_passengers,
        zero_distance = removed.zero_distance,
        over_distance = removed.over_distance,
        negative_duration = removed.negative_duration,
        over_duration = removed.over_duration,
        "Relation cleaned"
    );
    Ok(report)
}

/// Counts rows dropped by each stage, attributing a row to the first stage it
/// fails.
fn measure_removals(
    conn: &Connection,
    ident: &str,
    column_list: &str,
    rows_before: u64,
) -> CoreResult<ViolationCounts> {
    let distinct = store::count(
        conn,
        &format!("SELECT COUNT(*) FROM (SELECT DISTINCT {column_list} FROM {ident})"),
    )?;

    let mut passed = Vec::new();
    let mut sums = Vec::new();
    for stage in STAGES {
        let mut cond = passed.clone();
        cond.push(format!("NOT {}", holds(stage)));
        sums.push(format!(
            "COALESCE(SUM(CASE WHEN {} THEN 1 ELSE 0 END), 0)",
            cond.join(" AND ")
        ));
        passed.push(holds(stage));
    }

    let sql = format!(
        "SELECT {} FROM (SELECT DISTINCT {column_list} FROM {ident})",
        sums.join(", ")
    );
    let stages = query_counts(conn, &sql, STAGES.len())?;

    Ok(ViolationCounts::from_stage_counts(
        rows_before.saturating_sub(distinct),
        &stages,
    ))
}

/// Counts violations of every invariant independently.
fn measure_violations(
    conn: &Connection,
    ident: &str,
    column_list: &str,
) -> CoreResult<ViolationCounts> {
    let total = store::count(conn, &format!("SELECT COUNT(*) FROM {ident}"))?;
    let distinct = store::count(
        conn,
        &format!("SELECT COUNT(*) FROM (SELECT DISTINCT {column_list} FROM {ident})"),
    )?;

    let sums = STAGES
        .iter()
        .map(|stage| {
            format!(
                "COALESCE(SUM(CASE WHEN NOT {} THEN 1 ELSE 0 END), 0)",
                holds(stage)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let stages = query_counts(conn, &format!("SELECT {sums} FROM {ident}"), STAGES.len())?;

    Ok(ViolationCounts::from_stage_counts(
        total.saturating_sub(distinct),
        &stages,
    ))
}

fn query_counts(conn: &Connection, sql: &str, n: usize) -> CoreResult<Vec<u64>> {
    let counts = conn.query_row(sql, [], |row| {
        (0..n)
            .map(|i| row.get::<usize, i64>(i).map(|v| v.max(0) as u64))
            .collect::<Result<Vec<_>, _>>()
    })?;
    Ok(counts)
}

/// Rejects a report whose post-clean counts are nonzero or whose removals do
/// not account for the shrink.
fn verify(report: &CleaningReport) -> CoreResult<()> {
    for (check, count) in report.post_check.entries() {
        if count > 0 {
            return Err(CoreError::AssertionFailure {
                relation: report.relation.clone(),
                check,
                count,
            });
        }
    }

    let shrink = report.rows_before.saturating_sub(report.rows_after);
    if report.removed.total() != shrink || report.rows_after > report.rows_before {
        return Err(CoreError::AssertionFailure {
            relation: report.relation.clone(),
            check: "row_accounting",
            count: report.removed.total().abs_diff(shrink),
        });
    }

    Ok(())
}
