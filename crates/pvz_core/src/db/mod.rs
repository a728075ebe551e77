//! SQLite storage bootstrap, connection pooling and schema versioning.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the PVZ core.
//! - Bootstrap the versioned schema exactly once per database.
//! - Hand out pooled connections bounded by a request deadline.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write application data before bootstrap succeeds.
//! - Every storage failure surfaces as `DbError`, never as a raw driver error.

use crate::context::DoneReason;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod guard;
mod open;
mod pool;
pub mod schema;

pub(crate) use guard::ContextGuard;
pub use open::{open_db, open_db_in_memory, DEFAULT_BUSY_TIMEOUT};
pub use pool::{ConnectionPool, PooledConnection};

pub type DbResult<T> = Result<T, DbError>;

/// Storage-level failure. Wrapped by `RepoError::Storage` at the repository
/// boundary.
#[derive(Debug)]
pub enum DbError {
    /// Underlying SQLite failure that was not classified as a business error.
    Sqlite(rusqlite::Error),
    /// Database was written by a newer binary.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// Connection schema is not at the version this binary expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted row cannot be converted into a valid domain value.
    InvalidData(String),
    /// Request deadline passed before or while the store call ran.
    DeadlineExceeded,
    /// Request was cancelled by its caller.
    Cancelled,
    /// Pool was configured with zero connections.
    EmptyPool,
    /// Pool could not be built, or no connection was handed out in time for
    /// a request without a deadline.
    Pool(r2d2::Error),
}

impl DbError {
    /// Returns whether this error was caused by the request context rather
    /// than by the store itself.
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Cancelled)
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "pvz repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "pvz repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "pvz repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Cancelled => write!(f, "request cancelled"),
            Self::EmptyPool => write!(f, "connection pool size must be at least 1"),
            Self::Pool(err) => write!(f, "connection pool: {err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Pool(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<r2d2::Error> for DbError {
    fn from(value: r2d2::Error) -> Self {
        Self::Pool(value)
    }
}

impl From<DoneReason> for DbError {
    fn from(value: DoneReason) -> Self {
        match value {
            DoneReason::DeadlineExceeded => Self::DeadlineExceeded,
            DoneReason::Cancelled => Self::Cancelled,
        }
    }
}
