//! SQLite-backed relation store.
//!
//! A [`Store`] is the single handle a pipeline run owns. It is opened once,
//! passed explicitly to every operation, and closed with [`Store::close`] when
//! the run is done.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, Transaction};
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};

/// Storage format for every timestamp column. Lexical order is chronological;
/// fractional seconds are written only when present.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Logical column types the engine relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Timestamp,
    Integer,
    Real,
}

impl ColumnType {
    /// SQL type used when the crate creates a relation.
    pub fn sql(self) -> &'static str {
        match self {
            ColumnType::Timestamp => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }

    /// Whether a declared SQLite column type is compatible with this type.
    ///
    /// Follows SQLite's affinity rules, so `CREATE TABLE .. AS SELECT` copies
    /// (which declare `INT`, `REAL`, `TEXT` or `NUM`) still match.
    pub fn accepts(self, declared: &str) -> bool {
        let declared = declared.to_ascii_uppercase();
        let has = |needle: &str| declared.contains(needle);
        match self {
            ColumnType::Timestamp => {
                has("TEXT") || has("CHAR") || has("CLOB") || has("DATE") || has("TIME")
            }
            ColumnType::Integer => has("INT") || has("NUM"),
            ColumnType::Real => {
                has("REAL") || has("FLOA") || has("DOUB") || has("NUM") || has("DEC")
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column<'a> {
    pub name: &'a str,
    pub ty: ColumnType,
}

pub const fn col(name: &str, ty: ColumnType) -> Column<'_> {
    Column { name, ty }
}

/// Columns of a raw (and cleaned) trip relation.
pub static RAW_TRIP_COLUMNS: &[Column<'static>] = &[
    col("pickup_time", ColumnType::Timestamp),
    col("dropoff_time", ColumnType::Timestamp),
    col("passenger_count", ColumnType::Integer),
    col("trip_distance", ColumnType::Real),
];

/// Columns of an enriched trip relation, in storage order.
pub static ENRICHED_TRIP_COLUMNS: &[Column<'static>] = &[
    col("pickup_time", ColumnType::Timestamp),
    col("dropoff_time", ColumnType::Timestamp),
    col("passenger_count", ColumnType::Integer),
    col("trip_distance", ColumnType::Real),
    col("trip_co2_kgs", ColumnType::Real),
    col("hour_of_day", ColumnType::Integer),
    col("day_of_week", ColumnType::Integer),
    col("week_of_year", ColumnType::Integer),
    col("month_of_year", ColumnType::Integer),
];

/// Emission factor columns; any other column of that relation is kept as text.
pub static EMISSIONS_FACTOR_COLUMNS: &[Column<'static>] = &[
    col("mpg_city", ColumnType::Real),
    col("mpg_highway", ColumnType::Real),
    col("co2_grams_per_mile", ColumnType::Real),
    col("vehicle_year_avg", ColumnType::Real),
];

/// Exclusive handle to the relation store for one pipeline run.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens (creating if needed) a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| CoreError::StorageUnavailable(format!("{}: {e}", path.display())))?;

        // WAL is best effort; some filesystems refuse it.
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            warn!(path = %path.display(), error = %e, "WAL journal refused, using default journal");
        }

        info!(path = %path.display(), "Opened relation store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens an isolated in-memory store (used in tests).
    pub fn in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(Self { conn, path: None })
    }

    /// Releases the handle, reporting any error raised while closing.
    pub fn close(self) -> CoreResult<()> {
        let path = self.path.clone();
        self.conn.close().map_err(|(_, e)| CoreError::from(e))?;
        if let Some(path) = path {
            info!(path = %path.display(), "Closed relation store");
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn transaction(&mut self) -> CoreResult<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Runs arbitrary SQL statements. Intended for fixtures and maintenance.
    pub fn execute_batch(&self, sql: &str) -> CoreResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn relation_exists(&self, relation: &str) -> CoreResult<bool> {
        relation_exists(&self.conn, relation)
    }

    pub fn row_count(&self, relation: &str) -> CoreResult<u64> {
        row_count(&self.conn, relation)
    }

    /// Verifies that `relation` carries every column in `expected` with a
    /// compatible type and returns all of its column names in order.
    pub fn require_columns(
        &self,
        relation: &str,
        expected: &[Column<'_>],
    ) -> CoreResult<Vec<String>> {
        require_columns(&self.conn, relation, expected)
    }
}

/// Double-quotes an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn relation_exists(conn: &Connection, relation: &str) -> CoreResult<bool> {
    let found: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_schema WHERE type = 'table' AND name = ?1",
        [relation],
        |row| row.get(0),
    )?;
    Ok(found > 0)
}

pub(crate) fn row_count(conn: &Connection, relation: &str) -> CoreResult<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(relation));
    count(conn, &sql)
}

/// Runs a query returning a single integer count.
pub(crate) fn count(conn: &Connection, sql: &str) -> CoreResult<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n.max(0) as u64)
}

/// Returns `(name, declared_type)` for every column of `relation`.
pub(crate) fn table_columns(conn: &Connection, relation: &str) -> CoreResult<Vec<(String, String)>> {
    let sql = format!("PRAGMA table_info({})", quote_ident(relation));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<usize, String>(1)?,
            row.get::<usize, Option<String>>(2)?.unwrap_or_default(),
        ))
    })?;

    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

pub(crate) fn require_columns(
    conn: &Connection,
    relation: &str,
    expected: &[Column<'_>],
) -> CoreResult<Vec<String>> {
    if !relation_exists(conn, relation)? {
        return Err(CoreError::schema(relation, "relation does not exist"));
    }

    let columns = table_columns(conn, relation)?;
    for want in expected {
        let Some((_, declared)) = columns.iter().find(|(name, _)| name == want.name) else {
            return Err(CoreError::schema(
                relation,
                format!("missing column `{}`", want.name),
            ));
        };
        if !want.ty.accepts(declared) {
            return Err(CoreError::schema(
                relation,
                format!(
                    "column `{}` declared `{declared}`, expected {:?}",
                    want.name, want.ty
                ),
            ));
        }
    }

    debug!(relation, columns = columns.len(), "Schema verified");
    Ok(columns.into_iter().map(|(name, _)| name).collect())
}

/// Drops `relation` if present and recreates it with `columns`.
///
/// Callers run this inside a transaction so the replacement is atomic.
pub(crate) fn recreate_relation(
    conn: &Connection,
    relation: &str,
    columns: &[(String, &'static str)],
) -> CoreResult<()> {
    let defs = columns
        .iter()
        .map(|(name, ty)| format!("{} {ty}", quote_ident(name)))
        .collect::<Vec<_>>()
        .join(", ");
    let ident = quote_ident(relation);
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {ident}; CREATE TABLE {ident} ({defs});"
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("trips"), "\"trips\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_column_type_affinity() {
        assert!(ColumnType::Integer.accepts("INTEGER"));
        assert!(ColumnType::Integer.accepts("INT"));
        assert!(!ColumnType::Integer.accepts("TEXT"));
        assert!(ColumnType::Real.accepts("DOUBLE"));
        assert!(ColumnType::Real.accepts("REAL"));
        assert!(ColumnType::Timestamp.accepts("TIMESTAMP"));
        assert!(ColumnType::Timestamp.accepts("TEXT"));
        assert!(!ColumnType::Timestamp.accepts("REAL"));
    }

    #[test]
    fn test_require_columns_missing_relation() {
        let store = Store::in_memory().unwrap();
        let err = store.require_columns("nope", RAW_TRIP_COLUMNS).unwrap_err();
        assert!(matches!(err, CoreError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_require_columns_missing_column() {
        let store = Store::in_memory().unwrap();
        store
            .execute_batch("CREATE TABLE t (pickup_time TEXT, dropoff_time TEXT, passenger_count INTEGER)")
            .unwrap();
        let err = store.require_columns("t", RAW_TRIP_COLUMNS).unwrap_err();
        match err {
            CoreError::SchemaMismatch { relation, detail } => {
                assert_eq!(relation.as_deref(), Some("t"));
                assert!(detail.contains("trip_distance"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_require_columns_wrong_type() {
        let store = Store::in_memory().unwrap();
        store
            .execute_batch(
                "CREATE TABLE t (pickup_time TEXT, dropoff_time TEXT, passenger_count TEXT, trip_distance REAL)",
            )
            .unwrap();
        let err = store.require_columns("t", RAW_TRIP_COLUMNS).unwrap_err();
        assert!(matches!(err, CoreError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_recreate_relation_replaces_contents() {
        let store = Store::in_memory().unwrap();
        let cols = vec![("x".to_string(), "INTEGER")];
        recreate_relation(store.conn(), "t", &cols).unwrap();
        store.execute_batch("INSERT INTO t VALUES (1), (2)").unwrap();
        assert_eq!(store.row_count("t").unwrap(), 2);

        recreate_relation(store.conn(), "t", &cols).unwrap();
        assert_eq!(store.row_count("t").unwrap(), 0);
    }

    #[test]
    fn test_open_file_store_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("emissions.sqlite")).unwrap();

        let mode: String = store
            .conn()
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        store.close().unwrap();
    }

    #[test]
    fn test_open_unreachable_path() {
        let result = Store::open("/nonexistent-dir/for/sure/emissions.sqlite");
        assert!(matches!(result, Err(CoreError::StorageUnavailable(_))));
    }
}
