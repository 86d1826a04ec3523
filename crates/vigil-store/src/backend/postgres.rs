//! Networked `PostgreSQL` backend.
//!
//! Deadlines are enforced server-side with `SET LOCAL statement_timeout`;
//! cancellation is observed between statements. Unless the transport
//! security mode is `disable`, connections negotiate TLS through rustls
//! against the webpki root set.

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use postgres::{NoTls, Row};
use r2d2::{ManageConnection, Pool};
use r2d2_postgres::PostgresConnectionManager;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::debug;

use super::{Interrupt, Rows, Session, checkout, trace_statement};
use crate::classify::{BackendError, DriverCode};
use crate::errors::{Result, StoreError};
use crate::manager::{NetworkTarget, SslMode};
use crate::store::Operation;
use crate::value::SqlValue;

type BoxError = Box<dyn Error + Sync + Send>;

impl From<postgres::Error> for BackendError {
    fn from(err: postgres::Error) -> Self {
        let message = err
            .as_db_error()
            .map_or_else(|| err.to_string(), |db| db.message().to_owned());
        match err.code() {
            Some(state) => {
                BackendError::with_code(DriverCode::SqlState(state.code().to_owned()), message)
            }
            None => BackendError::message(message),
        }
    }
}

impl ToSql for SqlValue {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Integer(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::BOOL {
                    (*v != 0).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Self::Real(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Self::Text(v) => v.as_str().to_sql(ty, out),
            Self::Blob(v) => v.as_ref().to_sql(ty, out),
            Self::Bool(v) => v.to_sql(ty, out),
            Self::Timestamp(ts) => {
                if *ty == Type::TIMESTAMP {
                    ts.naive_utc().to_sql(ty, out)
                } else {
                    ts.to_sql(ty, out)
                }
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn read_value(row: &Row, idx: usize) -> std::result::Result<SqlValue, BackendError> {
    let ty = row.columns()[idx].type_().clone();
    let value = if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool)
    } else if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map(|v| SqlValue::Integer(i64::from(v)))
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map(|v| SqlValue::Integer(i64::from(v)))
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Integer)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map(|v| SqlValue::Real(f64::from(v)))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Real)
    } else if ty == Type::TEXT || ty == Type::VARCHAR || ty == Type::BPCHAR || ty == Type::NAME {
        row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
    } else if ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|v| SqlValue::Blob(v.into()))
    } else if ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(SqlValue::Timestamp)
    } else if ty == Type::TIMESTAMP {
        row.try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|v| SqlValue::Timestamp(v.and_utc()))
    } else {
        return Err(BackendError::message(format!(
            "unsupported column type {ty} for column {}",
            row.columns()[idx].name()
        )));
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// TLS connector for `mode`; `None` means plain TCP.
fn tls_connector(mode: SslMode) -> Result<Option<MakeRustlsConnect>> {
    if mode == SslMode::Disable {
        return Ok(None);
    }
    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config =
        rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| StoreError::Config(format!("cannot set up TLS: {e}")))?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(Some(MakeRustlsConnect::new(config)))
}

fn build_pool<M: ManageConnection>(
    manager: M,
    max_connections: u32,
    connection_timeout: Duration,
) -> Result<Pool<M>> {
    Ok(Pool::builder()
        .max_size(max_connections)
        .connection_timeout(connection_timeout)
        .build(manager)?)
}

enum PgPool {
    Plain(Pool<PostgresConnectionManager<NoTls>>),
    Tls(Pool<PostgresConnectionManager<MakeRustlsConnect>>),
}

pub(crate) struct PostgresBackend {
    pool: PgPool,
    connection_timeout: Duration,
}

impl PostgresBackend {
    pub(crate) fn connect(
        target: &NetworkTarget,
        max_connections: u32,
        connection_timeout: Duration,
    ) -> Result<Self> {
        let mut config = postgres::Config::new();
        let _ = config
            .host(&target.host)
            .port(target.port)
            .dbname(&target.db_name)
            .user(&target.user)
            .password(&target.password)
            .connect_timeout(connection_timeout)
            .ssl_mode(match target.ssl_mode {
                SslMode::Disable => postgres::config::SslMode::Disable,
                SslMode::Prefer => postgres::config::SslMode::Prefer,
                SslMode::Require => postgres::config::SslMode::Require,
            });

        let pool = match tls_connector(target.ssl_mode)? {
            Some(tls) => PgPool::Tls(build_pool(
                PostgresConnectionManager::new(config, tls),
                max_connections,
                connection_timeout,
            )?),
            None => PgPool::Plain(build_pool(
                PostgresConnectionManager::new(config, NoTls),
                max_connections,
                connection_timeout,
            )?),
        };

        debug!(
            host = %target.host,
            port = target.port,
            database = %target.db_name,
            ssl_mode = ?target.ssl_mode,
            max_connections,
            "connected to postgres"
        );
        Ok(Self {
            pool,
            connection_timeout,
        })
    }

    pub(crate) fn max_connections(&self) -> u32 {
        match &self.pool {
            PgPool::Plain(pool) => pool.max_size(),
            PgPool::Tls(pool) => pool.max_size(),
        }
    }

    pub(crate) fn transact<T>(
        &self,
        op: Operation,
        interrupt: &Interrupt,
        body: impl FnOnce(&mut dyn Session) -> Result<T>,
    ) -> Result<T> {
        match &self.pool {
            PgPool::Plain(pool) => transact_on(pool, self.connection_timeout, op, interrupt, body),
            PgPool::Tls(pool) => transact_on(pool, self.connection_timeout, op, interrupt, body),
        }
    }
}

fn transact_on<M, T>(
    pool: &Pool<M>,
    connection_timeout: Duration,
    op: Operation,
    interrupt: &Interrupt,
    body: impl FnOnce(&mut dyn Session) -> Result<T>,
) -> Result<T>
where
    M: ManageConnection<Connection = postgres::Client>,
{
    let mut client = checkout(pool, connection_timeout, interrupt)?;

    let classify = |e: postgres::Error| StoreError::from_backend(op, e.into(), interrupt);
    let mut tx = client.transaction().map_err(&classify)?;
    if let Some(left) = interrupt.remaining() {
        let ms = left.as_millis().max(1);
        tx.batch_execute(&format!("SET LOCAL statement_timeout = {ms}"))
            .map_err(&classify)?;
    }
    let value = {
        let mut session = PgSession { tx: &mut tx };
        body(&mut session)?
    };
    tx.commit().map_err(&classify)?;
    Ok(value)
}

struct PgSession<'a, 't> {
    tx: &'a mut postgres::Transaction<'t>,
}

impl PgSession<'_, '_> {
    fn run_query(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<Rows, BackendError> {
        let stmt = self.tx.prepare(sql)?;
        let columns = stmt.columns().iter().map(|c| c.name().to_owned()).collect();
        let values = self
            .tx
            .query(&stmt, &bind(params))?
            .iter()
            .map(|row| (0..row.len()).map(|i| read_value(row, i)).collect())
            .collect::<std::result::Result<Vec<Vec<_>>, _>>()?;
        Ok(Rows { columns, values })
    }
}

fn bind(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl Session for PgSession<'_, '_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, BackendError> {
        let started = Instant::now();
        let result = self
            .tx
            .execute(sql, &bind(params))
            .map_err(BackendError::from);
        trace_statement(sql, started, &result, |n| *n);
        result
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<Rows, BackendError> {
        let started = Instant::now();
        let result = self.run_query(sql, params);
        trace_statement(sql, started, &result, |rows| {
            u64::try_from(rows.values.len()).unwrap_or(u64::MAX)
        });
        result
    }

    fn table_columns(&mut self, table: &str) -> std::result::Result<Vec<String>, BackendError> {
        let rows = self.query(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = $1 \
             ORDER BY ordinal_position",
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_connects_in_plain_tcp() {
        assert!(tls_connector(SslMode::Disable).unwrap().is_none());
    }

    #[test]
    fn prefer_and_require_negotiate_tls() {
        assert!(tls_connector(SslMode::Prefer).unwrap().is_some());
        assert!(tls_connector(SslMode::Require).unwrap().is_some());
    }
}
