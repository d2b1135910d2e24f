//! Typed failures raised by the cleaning and aggregation engine.

use rusqlite::ErrorCode;

/// Errors surfaced by store-backed operations.
///
/// None of these are retried internally; callers decide whether to abort the
/// run or move on to the next independent relation.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The relation store could not be opened or reached.
    #[error("relation store unavailable: {0}")]
    StorageUnavailable(String),

    /// A referenced relation or column is absent, or has an incompatible type.
    /// `relation` is `None` when the store did not say which relation failed.
    #[error("schema mismatch{}: {detail}", on_relation(.relation))]
    SchemaMismatch {
        relation: Option<String>,
        detail: String,
    },

    /// An aggregate was requested over a relation with no usable rows.
    #[error("relation `{0}` has no rows to aggregate")]
    EmptyRelation(String),

    /// The requested year bound is inverted.
    #[error("invalid year range: {min} > {max}")]
    InvalidRange { min: i32, max: i32 },

    /// A post-clean invariant check found violating rows.
    #[error("post-clean check `{check}` on `{relation}` found {count} violating rows")]
    AssertionFailure {
        relation: String,
        check: &'static str,
        count: u64,
    },

    /// Any other store failure.
    #[error("relation store query failed: {0}")]
    Query(rusqlite::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

fn on_relation(relation: &Option<String>) -> String {
    relation
        .as_deref()
        .map(|r| format!(" on `{r}`"))
        .unwrap_or_default()
}

impl CoreError {
    pub(crate) fn schema(relation: &str, detail: impl Into<String>) -> Self {
        CoreError::SchemaMismatch {
            relation: Some(relation.to_string()),
            detail: detail.into(),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref ffi, ref message) = err {
            match ffi.code {
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly => {
                    return CoreError::StorageUnavailable(err.to_string());
                }
                _ => {}
            }

            if let Some(msg) = message {
                if let Some(table) = msg.strip_prefix("no such table: ") {
                    return CoreError::schema(table.trim(), msg.clone());
                }
                if msg.starts_with("no such column") {
                    return CoreError::SchemaMismatch {
                        relation: None,
                        detail: msg.clone(),
                    };
                }
            }
        }

        CoreError::Query(err)
    }
}
