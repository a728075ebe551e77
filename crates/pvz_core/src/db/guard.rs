//! Binds a request context to a connection for the duration of one call.
//!
//! # Invariants
//! - A running statement is interrupted within `PROGRESS_CHECK_OPS` VM steps
//!   of the context becoming done.
//! - Lock waits run in slices of at most `LOCK_WAIT_SLICE`, so a cancel is
//!   seen while another writer holds the database.
//! - A lock wait cut short by the request deadline is `DeadlineExceeded`,
//!   never a bare `SQLITE_BUSY`.

use super::{DbError, DbResult};
use crate::context::RequestContext;
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::ops::Deref;
use std::time::{Duration, Instant};

/// Number of SQLite VM instructions between context checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;
/// Longest single busy wait before the context is checked again.
const LOCK_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Keeps a progress handler installed that aborts running statements once the
/// context is done. The handler is removed on drop.
pub(crate) struct ContextGuard<'conn> {
    conn: &'conn Connection,
    ctx: RequestContext,
    /// When lock waits give up.
    lock_deadline: Instant,
    /// Whether `lock_deadline` comes from the request deadline rather than
    /// the pool's busy timeout.
    deadline_capped: bool,
}

impl<'conn> ContextGuard<'conn> {
    /// Fails fast when the context is already done, caps the busy timeout at
    /// the remaining time and installs the abort handler.
    pub(crate) fn arm(
        conn: &'conn Connection,
        ctx: &RequestContext,
        busy_timeout: Duration,
    ) -> DbResult<Self> {
        if let Some(reason) = ctx.done_reason() {
            return Err(reason.into());
        }

        let (budget, deadline_capped) = match ctx.remaining() {
            Some(remaining) if remaining < busy_timeout => (remaining, true),
            _ => (busy_timeout, false),
        };
        conn.busy_timeout(ceil_to_millis(budget))?;

        let watched = ctx.clone();
        conn.progress_handler(
            PROGRESS_CHECK_OPS,
            Some(move || watched.done_reason().is_some()),
        );

        Ok(Self {
            conn,
            ctx: ctx.clone(),
            lock_deadline: Instant::now() + budget,
            deadline_capped,
        })
    }

    /// Starts an IMMEDIATE transaction, waiting for the write lock in slices
    /// and giving up as soon as the context is done.
    pub(crate) fn begin_immediate(&self) -> DbResult<Transaction<'conn>> {
        loop {
            let left = self.lock_deadline.saturating_duration_since(Instant::now());
            self.conn.busy_timeout(ceil_to_millis(left.min(LOCK_WAIT_SLICE)))?;

            match Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate) {
                Ok(tx) => {
                    let left = self.lock_deadline.saturating_duration_since(Instant::now());
                    self.conn.busy_timeout(ceil_to_millis(left))?;
                    return Ok(tx);
                }
                Err(err) if is_lock_error(&err) => {
                    if let Some(reason) = self.ctx.done_reason() {
                        return Err(reason.into());
                    }
                    if Instant::now() >= self.lock_deadline {
                        return Err(self.classify(err));
                    }
                }
                Err(err) => return Err(self.classify(err)),
            }
        }
    }

    /// Maps a driver error to a context error when the context explains it.
    ///
    /// An interrupted statement becomes `DeadlineExceeded`/`Cancelled`. A lock
    /// wait that ran out becomes one too when the context is done or when the
    /// request deadline was what bounded the wait.
    pub(crate) fn classify(&self, err: rusqlite::Error) -> DbError {
        let explained_by_context = match err.sqlite_error_code() {
            Some(ErrorCode::OperationInterrupted) => true,
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                self.deadline_capped || self.ctx.done_reason().is_some()
            }
            _ => false,
        };

        if explained_by_context {
            self.ctx
                .done_reason()
                .map_or(DbError::DeadlineExceeded, DbError::from)
        } else {
            DbError::Sqlite(err)
        }
    }
}

impl Deref for ContextGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

fn is_lock_error(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

/// SQLite takes whole milliseconds; round up so a wait never ends before
/// the budget it stands for.
fn ceil_to_millis(duration: Duration) -> Duration {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}
