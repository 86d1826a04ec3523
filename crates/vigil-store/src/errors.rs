//! Error types for the store.
//!
//! Callers match on the first four variants ([`StoreError::RecordNotFound`],
//! [`StoreError::ConstraintViolation`],
//! [`StoreError::UniqueConstraintViolation`], [`StoreError::UnsupportedType`]);
//! they never need to inspect driver errors for those cases. Anything the
//! classifier cannot place surfaces as [`StoreError::Backend`].

use thiserror::Error;

use crate::backend::Interrupt;
use crate::classify::{BackendError, ErrorKind, classify};
use crate::codec::CodecError;
use crate::store::Operation;

/// Errors returned by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row matched.
    #[error("record not found")]
    RecordNotFound,

    /// An integrity rule was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A duplicate key was inserted.
    #[error("unique constraint violation: {0}")]
    UniqueConstraintViolation(String),

    /// A value was outside the domain of its column or codec.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// A stored value could not be decoded.
    #[error("corrupt value in column {column}: {message}")]
    CorruptValue {
        /// Column holding the value.
        column: String,
        /// Decoder message.
        message: String,
    },

    /// A field value could not be serialized for its column.
    #[error("failed to encode column {column}: {source}")]
    Encode {
        /// Column being written.
        column: String,
        /// Codec failure.
        #[source]
        source: CodecError,
    },

    /// Unclassified backend failure.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which table failed and why.
        message: String,
    },

    /// The store was configured inconsistently.
    #[error("configuration error: {0}")]
    Config(String),

    /// A condition, ordering, or query was malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation ran past its deadline.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Whether this is [`StoreError::RecordNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound)
    }

    /// Attach column context to a failure encoding a field for writing.
    pub(crate) fn from_encode(column: &str, err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedType { .. } => Self::UnsupportedType(format!("{column}: {err}")),
            CodecError::Malformed { .. } | CodecError::Serialize { .. } => Self::Encode {
                column: column.to_owned(),
                source: err,
            },
        }
    }

    /// Attach column context to a failure decoding a stored value.
    pub(crate) fn from_decode(column: &str, err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedType { .. } => Self::UnsupportedType(format!("{column}: {err}")),
            CodecError::Malformed { message, .. } => Self::CorruptValue {
                column: column.to_owned(),
                message,
            },
            CodecError::Serialize { .. } => Self::Encode {
                column: column.to_owned(),
                source: err,
            },
        }
    }

    /// Map a backend failure for `op` onto the taxonomy.
    ///
    /// Interrupts become [`StoreError::Cancelled`] or
    /// [`StoreError::DeadlineExceeded`] for every operation. Raw queries are
    /// otherwise left unclassified. Only inserts distinguish uniqueness from
    /// other constraint failures.
    pub(crate) fn from_backend(op: Operation, err: BackendError, interrupt: &Interrupt) -> Self {
        match (classify(&err), op) {
            (ErrorKind::Interrupted, _) => interrupt.reason().unwrap_or(Self::Backend(err)),
            (_, Operation::Raw) | (ErrorKind::Other, _) => Self::Backend(err),
            (ErrorKind::UniqueViolation, Operation::Create) => {
                Self::UniqueConstraintViolation(err.message)
            }
            (ErrorKind::UniqueViolation | ErrorKind::ConstraintViolation, _) => {
                Self::ConstraintViolation(err.message)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
