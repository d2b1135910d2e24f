use tracing::debug;

use crate::analyzers::types::{YearRange, YearlySum};
use crate::error::CoreResult;
use crate::store::{ColumnType, Store, col, quote_ident};

/// Sums `metric` per pickup year for each `(class, relation)` pair.
///
/// Output is grouped by class in the order given, then ascending by year.
/// Years without rows produce no entry: a missing year means "no data", not
/// zero emissions.
#[tracing::instrument(skip(store, classes), fields(classes = classes.len()))]
pub fn yearly_sums_by_class<C, R>(
    store: &Store,
    classes: &[(C, R)],
    metric: &str,
    years: YearRange,
) -> CoreResult<Vec<YearlySum>>
where
    C: AsRef<str>,
    R: AsRef<str>,
{
    years.validate()?;

    let mut series = Vec::new();
    for (class, relation) in classes {
        let (class, relation) = (class.as_ref(), relation.as_ref());
        let points = yearly_sums(store, relation, metric, years)?;
        debug!(class, relation, years = points.len(), "Yearly sums computed");
        series.extend(points.into_iter().map(|(year, sum)| YearlySum {
            class: class.to_string(),
            year,
            sum,
        }));
    }
    Ok(series)
}

/// `(year, sum)` pairs for one relation, ascending by year.
pub fn yearly_sums(
    store: &Store,
    relation: &str,
    metric: &str,
    years: YearRange,
) -> CoreResult<Vec<(i32, f64)>> {
    years.validate()?;
    store.require_columns(
        relation,
        &[
            col("pickup_time", ColumnType::Timestamp),
            col(metric, ColumnType::Real),
        ],
    )?;

    let sql = format!(
        "SELECT year, SUM(metric) FROM (
             SELECT CAST(strftime('%Y', pickup_time) AS INTEGER) AS year, {} AS metric
             FROM {}
         )
         WHERE year BETWEEN ?1 AND ?2
         GROUP BY year
         HAVING COUNT(metric) > 0
         ORDER BY year ASC",
        quote_ident(metric),
        quote_ident(relation)
    );

    let mut stmt = store.conn().prepare(&sql)?;
    let rows = stmt.query_map([years.min, years.max], |row| {
        Ok((row.get::<usize, i32>(0)?, row.get::<usize, f64>(1)?))
    })?;

    let mut points = Vec::new();
    for row in rows {
        points.push(row?);
    }
    points.sort_by_key(|(year, _)| *year);
    Ok(points)
}
