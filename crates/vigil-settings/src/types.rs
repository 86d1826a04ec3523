//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every type implements [`Default`]
//! and is `#[serde(default)]`, so partial JSON documents are accepted.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Persistence layer connection settings.
    pub database: DatabaseSettings,
}

/// Transport security mode for the networked backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// Try TLS, fall back to plain TCP.
    Prefer,
    /// Refuse to connect without TLS.
    Require,
}

impl SslMode {
    /// Parse the libpq spelling of a mode (`disable`, `prefer`, `require`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "disable" => Some(Self::Disable),
            "prefer" => Some(Self::Prefer),
            "require" => Some(Self::Require),
            _ => None,
        }
    }
}

/// Connection settings for the persistence layer.
///
/// When `in_memory` is set, the networked fields are ignored and the store
/// runs on an ephemeral in-process database with a single connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Use the ephemeral in-process backend.
    pub in_memory: bool,
    /// Database server host.
    pub host: String,
    /// Database server port.
    pub port: u16,
    /// Database name.
    pub db_name: String,
    /// User name for authentication.
    pub user: String,
    /// Password for authentication.
    pub password: String,
    /// Transport security mode.
    pub ssl_mode: SslMode,
    /// Maximum number of pooled connections.
    pub max_conn: u32,
    /// Maximum time to wait for a pooled connection, in milliseconds.
    pub connection_timeout_ms: u64,
    /// Per-operation deadline in milliseconds. `None` disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_timeout_ms: Option<u64>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            in_memory: false,
            host: "localhost".to_string(),
            port: 5432,
            db_name: "vigil".to_string(),
            user: "vigil".to_string(),
            password: "vigil".to_string(),
            ssl_mode: SslMode::Disable,
            max_conn: 10,
            connection_timeout_ms: 5_000,
            operation_timeout_ms: None,
        }
    }
}

impl DatabaseSettings {
    /// Reject settings that cannot produce a working connection pool.
    pub fn validate(&self) -> Result<()> {
        if self.max_conn == 0 {
            return Err(SettingsError::InvalidValue(
                "maxConn must be at least 1".into(),
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connectionTimeoutMs must be at least 1".into(),
            ));
        }
        if !self.in_memory && self.host.is_empty() {
            return Err(SettingsError::InvalidValue(
                "host is required for the networked backend".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
