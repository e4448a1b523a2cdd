//! SQLite storage backing the key-value store.
//!
//! # Responsibility
//! - Open file or in-memory SQLite databases for the store.
//! - Bring the `kv_items`/`kv_attributes` schema up to date before use.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - Store code never touches a connection whose migrations failed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_store_db, open_store_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Storage bootstrap and SQLite transport errors.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The database was written by a newer build of this crate.
    UnsupportedSchemaVersion { db_version: u32, latest_supported: u32 },
}

impl DbError {
    /// Returns whether the error is SQLite reporting lock contention.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            Self::UnsupportedSchemaVersion { .. } => false,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "store schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
