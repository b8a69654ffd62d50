use thiserror::Error;

use mendkit_recon::StoreError;

#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt record data: {0}")]
    Json(#[from] serde_json::Error),
    /// Record ids are stored as SQLite INTEGER, so they must fit in an `i64`.
    #[error("record id {0} does not fit in a signed 64-bit integer")]
    IdOutOfRange(u64),
}

impl From<SqliteStoreError> for StoreError {
    fn from(e: SqliteStoreError) -> Self {
        match &e {
            SqliteStoreError::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                        | rusqlite::ErrorCode::ReadOnly
                        | rusqlite::ErrorCode::ConstraintViolation
                ) =>
            {
                StoreError::Rejected(e.to_string())
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }
}
