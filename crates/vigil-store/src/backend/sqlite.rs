//! Ephemeral in-process `SQLite` backend.
//!
//! Each store gets its own uniquely named shared-cache memory database.
//! An anchor connection held for the store's lifetime keeps the database
//! alive while the pool recycles connections. The pool is capped at one
//! connection.

use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use tracing::debug;

use super::{Interrupt, Rows, Session, checkout, trace_statement};
use crate::classify::{BackendError, DriverCode};
use crate::errors::{Result, StoreError};
use crate::store::Operation;
use crate::value::SqlValue;

/// Virtual machine instructions between interrupt checks.
const PROGRESS_INTERVAL: i32 = 1_000;

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => BackendError::with_code(
                DriverCode::Sqlite {
                    extended: failure.extended_code,
                },
                message.clone().unwrap_or_else(|| err.to_string()),
            ),
            _ => BackendError::message(err.to_string()),
        }
    }
}

/// Per-connection setup.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = {};",
            self.busy_timeout_ms
        ))?;
        Ok(())
    }
}

pub(crate) struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    connection_timeout: Duration,
    // Never used for statements; keeps the memory database alive.
    _anchor: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open a fresh, uniquely named memory database.
    pub(crate) fn open_ephemeral(connection_timeout: Duration) -> Result<Self> {
        let name = format!("vigil_ephemeral_{:016x}", rand::random::<u64>());
        let uri = format!("file:{name}?mode=memory&cache=shared");
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let anchor = Connection::open_with_flags(&uri, flags)
            .map_err(|e| StoreError::Backend(e.into()))?;

        let busy_timeout_ms = u32::try_from(connection_timeout.as_millis()).unwrap_or(u32::MAX);
        let manager = SqliteConnectionManager::file(&uri).with_flags(flags);
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(connection_timeout)
            .connection_customizer(Box::new(PragmaCustomizer { busy_timeout_ms }))
            .build(manager)?;

        debug!(database = %name, "opened ephemeral database");
        Ok(Self {
            pool,
            connection_timeout,
            _anchor: Mutex::new(anchor),
        })
    }

    pub(crate) fn max_connections(&self) -> u32 {
        self.pool.max_size()
    }

    pub(crate) fn transact<T>(
        &self,
        op: Operation,
        interrupt: &Interrupt,
        body: impl FnOnce(&mut dyn Session) -> Result<T>,
    ) -> Result<T> {
        let mut conn = checkout(&self.pool, self.connection_timeout, interrupt)?;

        if interrupt.is_armed() {
            let guard = AssertUnwindSafe(interrupt.clone());
            conn.progress_handler(
                PROGRESS_INTERVAL,
                Some(move || {
                    let guard = &guard;
                    guard.triggered()
                }),
            );
        }

        let result = run_in_transaction(&mut conn, op, interrupt, body);

        if interrupt.is_armed() {
            conn.progress_handler(0, None::<fn() -> bool>);
        }
        result
    }
}

fn run_in_transaction<T>(
    conn: &mut Connection,
    op: Operation,
    interrupt: &Interrupt,
    body: impl FnOnce(&mut dyn Session) -> Result<T>,
) -> Result<T> {
    let classify = |e: rusqlite::Error| StoreError::from_backend(op, e.into(), interrupt);
    let tx = conn.transaction().map_err(&classify)?;
    let value = {
        let mut session = SqliteSession { conn: &tx };
        body(&mut session)?
    };
    tx.commit().map_err(&classify)?;
    Ok(value)
}

struct SqliteSession<'c> {
    conn: &'c Connection,
}

impl SqliteSession<'_> {
    fn run_query(&self, sql: &str, params: &[SqlValue]) -> rusqlite::Result<Rows> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();
        let width = columns.len();
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            let mut out = Vec::with_capacity(width);
            for i in 0..width {
                out.push(read_value(row.get_ref(i)?)?);
            }
            values.push(out);
        }
        Ok(Rows { columns, values })
    }
}

fn read_value(value: ValueRef<'_>) -> rusqlite::Result<SqlValue> {
    Ok(match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) => SqlValue::Text(
            std::str::from_utf8(bytes)
                .map_err(rusqlite::Error::Utf8Error)?
                .to_owned(),
        ),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes::Bytes::copy_from_slice(bytes)),
    })
}

impl Session for SqliteSession<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, BackendError> {
        let started = Instant::now();
        let result = self
            .conn
            .execute(sql, params_from_iter(params))
            .map(|n| u64::try_from(n).unwrap_or(u64::MAX))
            .map_err(BackendError::from);
        trace_statement(sql, started, &result, |n| *n);
        result
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<Rows, BackendError> {
        let started = Instant::now();
        let result = self.run_query(sql, params).map_err(BackendError::from);
        trace_statement(sql, started, &result, |rows| {
            u64::try_from(rows.values.len()).unwrap_or(u64::MAX)
        });
        result
    }

    fn table_columns(&mut self, table: &str) -> std::result::Result<Vec<String>, BackendError> {
        let rows = self.query(
            "SELECT name FROM pragma_table_info(?1)",
            &[SqlValue::from(table)],
        )?;
        Ok(rows
            .values
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(SqlValue::Text(name)) => Some(name),
                _ => None,
            })
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
