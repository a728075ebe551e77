//! Bounded SQLite connection pool on top of `r2d2`.
//!
//! # Invariants
//! - The pool never holds more than `size` connections.
//! - Every pooled connection ran the same pragmas and schema check as
//!   `open_db`/`open_db_in_memory`.
//! - A connection returns to the pool outside any transaction and without a
//!   progress handler.

use super::open::{init_pooled_connection, open_db, OpenMode};
use super::{DbError, DbResult};
use crate::context::RequestContext;
use log::{debug, warn};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Longest single wait on the pool before the context is checked again.
const ACQUIRE_SLICE: Duration = Duration::from_millis(50);
/// Upper bound on waiting for a connection when the request has no deadline.
const UNBOUNDED_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed-size pool of bootstrapped connections shared by repository calls.
pub struct ConnectionPool {
    inner: Pool<SqliteConnectionManager>,
    size: usize,
    busy_timeout: Duration,
    location: Option<PathBuf>,
}

impl ConnectionPool {
    /// Opens a pool of `size` connections to the database file at `path`.
    ///
    /// The schema is bootstrapped once through `open_db` before the pool
    /// fills, so a database written by a newer binary is reported as
    /// `UnsupportedSchemaVersion`.
    pub fn open(path: impl AsRef<Path>, size: usize, busy_timeout: Duration) -> DbResult<Self> {
        if size == 0 {
            return Err(DbError::EmptyPool);
        }
        let path = path.as_ref();
        drop(open_db(path)?);

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| init_pooled_connection(conn, OpenMode::File));
        Self::build(manager, size, busy_timeout, Some(path.to_path_buf()))
    }

    /// Opens a single-connection pool over a private in-memory database.
    ///
    /// The connection is never recycled, since dropping it drops the data.
    pub fn in_memory(busy_timeout: Duration) -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| init_pooled_connection(conn, OpenMode::Memory));
        Self::build(manager, 1, busy_timeout, None)
    }

    fn build(
        manager: SqliteConnectionManager,
        size: usize,
        busy_timeout: Duration,
        location: Option<PathBuf>,
    ) -> DbResult<Self> {
        let max_size = u32::try_from(size).unwrap_or(u32::MAX);
        let inner = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(max_size))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(UNBOUNDED_ACQUIRE_TIMEOUT)
            .build(manager)?;

        debug!(
            "event=pool_open module=db status=ok size={size} mode={}",
            if location.is_some() { "file" } else { "memory" }
        );
        Ok(Self {
            inner,
            size,
            busy_timeout,
            location,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Database file path, `None` for in-memory pools.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Takes an idle connection, waiting until one is released or the
    /// context is done.
    ///
    /// Waits run in short slices so a cancel is seen while queued.
    pub fn acquire(&self, ctx: &RequestContext) -> DbResult<PooledConnection> {
        let give_up_at = ctx
            .deadline()
            .unwrap_or_else(|| Instant::now() + UNBOUNDED_ACQUIRE_TIMEOUT);
        loop {
            if let Some(reason) = ctx.done_reason() {
                debug!(
                    "event=pool_acquire module=db status=error error_code=context_done reason={reason:?}"
                );
                return Err(reason.into());
            }

            let slice = give_up_at
                .saturating_duration_since(Instant::now())
                .min(ACQUIRE_SLICE);
            match self.inner.get_timeout(slice) {
                Ok(conn) => return Ok(PooledConnection { conn }),
                Err(err) if Instant::now() >= give_up_at && ctx.deadline().is_none() => {
                    warn!("event=pool_acquire module=db status=error error_code=pool_timeout error={err}");
                    return Err(err.into());
                }
                Err(_) => {}
            }
        }
    }
}

/// Connection checked out of a `ConnectionPool`; returned on drop.
pub struct PooledConnection {
    conn: r2d2::PooledConnection<SqliteConnectionManager>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
        if !self.conn.is_autocommit() {
            if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
                warn!(
                    "event=pool_release module=db status=error error_code=rollback_failed error={err}"
                );
            }
        }
    }
}
