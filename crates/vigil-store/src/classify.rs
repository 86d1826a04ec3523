//! Backend error classification.
//!
//! Drivers report failures as a [`BackendError`]: a structured code where
//! the driver exposes one, plus the message text. [`classify`] decides on
//! the code first and only falls back to scanning the message when no code
//! is available.

use thiserror::Error;

/// `SQLITE_CONSTRAINT` primary result code.
const SQLITE_CONSTRAINT: i32 = 19;
/// `SQLITE_INTERRUPT` primary result code.
const SQLITE_INTERRUPT: i32 = 9;
/// `SQLITE_CONSTRAINT_PRIMARYKEY` extended code.
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
/// `SQLITE_CONSTRAINT_UNIQUE` extended code.
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// SQLSTATE for `unique_violation`.
const SQLSTATE_UNIQUE: &str = "23505";
/// SQLSTATE class for integrity constraint violations.
const SQLSTATE_INTEGRITY_CLASS: &str = "23";
/// SQLSTATE for `query_canceled` (also raised by `statement_timeout`).
const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// A driver's structured error code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverCode {
    /// `SQLite` extended result code.
    Sqlite {
        /// Extended code; the low byte is the primary code.
        extended: i32,
    },
    /// Five-character SQLSTATE.
    SqlState(String),
}

/// A failure reported by a backend driver.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    /// Structured code, when the driver provides one.
    pub code: Option<DriverCode>,
    /// Driver message.
    pub message: String,
}

impl BackendError {
    /// An error with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// An error with a structured code.
    pub fn with_code(code: DriverCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// Semantic category of a backend failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Duplicate key.
    UniqueViolation,
    /// Any other integrity rule (foreign key, not-null, check).
    ConstraintViolation,
    /// The statement was interrupted or timed out.
    Interrupted,
    /// Anything else.
    Other,
}

/// Classify a backend failure.
pub fn classify(err: &BackendError) -> ErrorKind {
    match &err.code {
        Some(DriverCode::Sqlite { extended }) => classify_sqlite(*extended),
        Some(DriverCode::SqlState(state)) => classify_sqlstate(state),
        None => classify_message(&err.message),
    }
}

fn classify_sqlite(extended: i32) -> ErrorKind {
    match (extended, extended & 0xff) {
        (SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY, _) => ErrorKind::UniqueViolation,
        (_, SQLITE_CONSTRAINT) => ErrorKind::ConstraintViolation,
        (_, SQLITE_INTERRUPT) => ErrorKind::Interrupted,
        _ => ErrorKind::Other,
    }
}

fn classify_sqlstate(state: &str) -> ErrorKind {
    if state == SQLSTATE_UNIQUE {
        ErrorKind::UniqueViolation
    } else if state.starts_with(SQLSTATE_INTEGRITY_CLASS) {
        ErrorKind::ConstraintViolation
    } else if state == SQLSTATE_QUERY_CANCELED {
        ErrorKind::Interrupted
    } else {
        ErrorKind::Other
    }
}

/// Last resort for drivers that expose no code.
fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("unique constraint failed")
        || lower.contains("duplicate key value violates unique constraint")
    {
        ErrorKind::UniqueViolation
    } else if lower.contains("constraint") && (lower.contains("failed") || lower.contains("violat"))
    {
        ErrorKind::ConstraintViolation
    } else if lower.contains("interrupted") || lower.contains("canceling statement") {
        ErrorKind::Interrupted
    } else {
        ErrorKind::Other
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
