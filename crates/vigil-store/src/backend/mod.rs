//! Backend connections and statement execution.
//!
//! A [`Backend`] owns a connection pool. Each store operation checks out one
//! connection, opens a transaction, runs its statements through a
//! [`Session`], and commits. Dropping the transaction on error rolls it back
//! and returns the connection to the pool.

pub(crate) mod sqlite;

#[cfg(feature = "postgres")]
pub(crate) mod postgres;

use std::time::{Duration, Instant};

use r2d2::{ManageConnection, Pool, PooledConnection};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::classify::BackendError;
use crate::dialect::Dialect;
use crate::errors::{Result, StoreError};
use crate::store::Operation;
use crate::value::SqlValue;

/// Result rows of a query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Rows {
    /// Column names, in result order.
    pub columns: Vec<String>,
    /// One vector per row, aligned with `columns`.
    pub values: Vec<Vec<SqlValue>>,
}

/// Statement execution inside an open transaction.
pub(crate) trait Session {
    /// Run a statement, returning the number of rows it changed.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, BackendError>;

    /// Run a query and collect its rows.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<Rows, BackendError>;

    /// Column names of `table`, empty if it does not exist.
    fn table_columns(&mut self, table: &str) -> std::result::Result<Vec<String>, BackendError>;
}

/// Cancellation and deadline for one operation.
#[derive(Clone, Debug, Default)]
pub(crate) struct Interrupt {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Interrupt {
    pub(crate) fn new(token: Option<CancellationToken>, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    pub(crate) fn none() -> Self {
        Self::default()
    }

    /// Whether the operation should stop now.
    pub(crate) fn triggered(&self) -> bool {
        self.reason().is_some()
    }

    /// Why the operation should stop, if it should.
    pub(crate) fn reason(&self) -> Option<StoreError> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            Some(StoreError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(StoreError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Fail fast if the operation should already stop.
    pub(crate) fn check(&self) -> Result<()> {
        self.reason().map_or(Ok(()), Err)
    }

    /// Time left before the deadline.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether any stop condition is armed.
    pub(crate) fn is_armed(&self) -> bool {
        self.token.is_some() || self.deadline.is_some()
    }
}

/// Longest single wait on the pool before re-checking the interrupt.
const CHECKOUT_SLICE: Duration = Duration::from_millis(20);

/// Check a connection out of `pool`, waiting at most `connection_timeout`
/// or until the interrupt fires, whichever comes first.
pub(crate) fn checkout<M: ManageConnection>(
    pool: &Pool<M>,
    connection_timeout: Duration,
    interrupt: &Interrupt,
) -> Result<PooledConnection<M>> {
    interrupt.check()?;
    let give_up = Instant::now()
        + interrupt
            .remaining()
            .map_or(connection_timeout, |left| left.min(connection_timeout));
    loop {
        let left = give_up.saturating_duration_since(Instant::now());
        match pool.get_timeout(left.min(CHECKOUT_SLICE)) {
            Ok(conn) => return Ok(conn),
            Err(err) => {
                interrupt.check()?;
                if Instant::now() >= give_up {
                    return Err(StoreError::Pool(err));
                }
            }
        }
    }
}

/// Trace one executed statement.
pub(crate) fn trace_statement<T>(
    sql: &str,
    started: Instant,
    result: &std::result::Result<T, BackendError>,
    rows: impl FnOnce(&T) -> u64,
) {
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(value) => trace!(sql, rows = rows(value), elapsed_ms, "statement"),
        Err(error) => trace!(sql, %error, elapsed_ms, "statement failed"),
    }
}

/// A connected backend.
pub(crate) enum Backend {
    Sqlite(sqlite::SqliteBackend),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresBackend),
}

impl Backend {
    pub(crate) fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite(_) => Dialect::Sqlite,
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => Dialect::Postgres,
        }
    }

    /// Effective connection cap.
    pub(crate) fn max_connections(&self) -> u32 {
        match self {
            Self::Sqlite(b) => b.max_connections(),
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.max_connections(),
        }
    }

    /// Run `body` in a transaction on a pooled connection.
    ///
    /// Backend failures while opening or committing are classified as
    /// failures of `op`.
    pub(crate) fn transact<T>(
        &self,
        op: Operation,
        interrupt: &Interrupt,
        body: impl FnOnce(&mut dyn Session) -> Result<T>,
    ) -> Result<T> {
        match self {
            Self::Sqlite(b) => b.transact(op, interrupt, body),
            #[cfg(feature = "postgres")]
            Self::Postgres(b) => b.transact(op, interrupt, body),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
