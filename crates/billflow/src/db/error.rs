//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored row could not be turned back into a record.
    #[error("Invalid row in '{table}': {reason}")]
    InvalidRow { table: &'static str, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    fn sqlite_code(&self) -> Option<rusqlite::ErrorCode> {
        match self {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => Some(err.code),
            _ => None,
        }
    }

    /// SQLITE_BUSY / SQLITE_LOCKED: another connection holds the write lock.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
        )
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        )
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::InvalidRow { .. } => StoreError::Serialization(err.to_string()),
            _ => StoreError::Backend {
                retryable: err.is_busy(),
                message: err.to_string(),
            },
        }
    }
}
