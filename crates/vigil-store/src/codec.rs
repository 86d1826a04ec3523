//! Pluggable converters between in-memory field values and column values.
//!
//! Each [`Column`](crate::schema::Column) may name a codec. The store routes
//! that column through the codec on every write and read. Codecs are total on
//! absence (`Null` in, `Null` out) and reject values of the wrong shape with
//! [`CodecError::UnsupportedType`].
//!
//! The [`CodecRegistry`] is owned by a single store; two stores with
//! different codec sets never observe each other's registrations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{SubsecRound, TimeDelta};
use thiserror::Error;

use crate::schema::SqlType;
use crate::value::{AnyPayload, FieldValue, SqlValue, parse_timestamp};

/// Name of the built-in duration codec.
pub const DURATION: &str = "duration";
/// Name of the built-in timestamp codec.
pub const TIMESTAMP: &str = "timestamp";
/// Name of the built-in open JSON value codec.
pub const VALUE: &str = "value";
/// Name of the built-in typed payload codec.
pub const ANY: &str = "any";

/// Errors produced by a codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value's kind is outside the codec's domain.
    #[error("{codec} codec cannot handle a {found} value")]
    UnsupportedType {
        /// Codec name.
        codec: &'static str,
        /// Kind of the offending value.
        found: &'static str,
    },

    /// The stored value has the right kind but cannot be decoded.
    #[error("malformed {codec} value: {message}")]
    Malformed {
        /// Codec name.
        codec: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// The in-memory value could not be serialized.
    #[error("failed to serialize {codec} value: {source}")]
    Serialize {
        /// Codec name.
        codec: &'static str,
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },
}

/// A named, bidirectional converter between a [`FieldValue`] and a
/// [`SqlValue`].
pub trait Codec: Send + Sync + fmt::Debug {
    /// Registry key. Columns refer to the codec by this name.
    fn name(&self) -> &'static str;

    /// Column type used when creating the backing column.
    fn sql_type(&self) -> SqlType;

    /// Convert an in-memory value to its stored form.
    fn encode(&self, value: &FieldValue) -> Result<SqlValue, CodecError>;

    /// Convert a stored value back to its in-memory form.
    fn decode(&self, stored: SqlValue) -> Result<FieldValue, CodecError>;
}

/// Time spans stored as signed nanoseconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct DurationCodec;

impl Codec for DurationCodec {
    fn name(&self) -> &'static str {
        DURATION
    }

    fn sql_type(&self) -> SqlType {
        SqlType::Integer
    }

    fn encode(&self, value: &FieldValue) -> Result<SqlValue, CodecError> {
        match value {
            FieldValue::Null => Ok(SqlValue::Null),
            FieldValue::Duration(d) => {
                d.num_nanoseconds()
                    .map(SqlValue::Integer)
                    .ok_or_else(|| CodecError::Malformed {
                        codec: DURATION,
                        message: format!("{d} does not fit in 64-bit nanoseconds"),
                    })
            }
            other => Err(CodecError::UnsupportedType {
                codec: DURATION,
                found: other.kind(),
            }),
        }
    }

    fn decode(&self, stored: SqlValue) -> Result<FieldValue, CodecError> {
        match stored {
            SqlValue::Null => Ok(FieldValue::Null),
            SqlValue::Integer(n) => Ok(FieldValue::Duration(TimeDelta::nanoseconds(n))),
            other => Err(CodecError::UnsupportedType {
                codec: DURATION,
                found: other.kind(),
            }),
        }
    }
}

/// Instants stored natively, or as RFC 3339 text where the backend has no
/// instant type.
///
/// Precision is one microsecond on every backend, the finest `PostgreSQL`
/// keeps. Encoding truncates anything below that.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimestampCodec;

impl Codec for TimestampCodec {
    fn name(&self) -> &'static str {
        TIMESTAMP
    }

    fn sql_type(&self) -> SqlType {
        SqlType::Timestamp
    }

    fn encode(&self, value: &FieldValue) -> Result<SqlValue, CodecError> {
        match value {
            FieldValue::Null => Ok(SqlValue::Null),
            FieldValue::Timestamp(ts) => Ok(SqlValue::Timestamp(ts.trunc_subsecs(6))),
            other => Err(CodecError::UnsupportedType {
                codec: TIMESTAMP,
                found: other.kind(),
            }),
        }
    }

    fn decode(&self, stored: SqlValue) -> Result<FieldValue, CodecError> {
        match stored {
            SqlValue::Null => Ok(FieldValue::Null),
            SqlValue::Timestamp(ts) => Ok(FieldValue::Timestamp(ts)),
            SqlValue::Text(text) => {
                parse_timestamp(&text)
                    .map(FieldValue::Timestamp)
                    .ok_or_else(|| CodecError::Malformed {
                        codec: TIMESTAMP,
                        message: format!("not an RFC 3339 instant: {text:?}"),
                    })
            }
            other => Err(CodecError::UnsupportedType {
                codec: TIMESTAMP,
                found: other.kind(),
            }),
        }
    }
}

/// Open-ended JSON values stored as JSON text.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonValueCodec;

impl Codec for JsonValueCodec {
    fn name(&self) -> &'static str {
        VALUE
    }

    fn sql_type(&self) -> SqlType {
        SqlType::Text
    }

    fn encode(&self, value: &FieldValue) -> Result<SqlValue, CodecError> {
        match value {
            FieldValue::Null => Ok(SqlValue::Null),
            FieldValue::Json(json) => serde_json::to_string(json)
                .map(SqlValue::Text)
                .map_err(|source| CodecError::Serialize {
                    codec: VALUE,
                    source,
                }),
            other => Err(CodecError::UnsupportedType {
                codec: VALUE,
                found: other.kind(),
            }),
        }
    }

    fn decode(&self, stored: SqlValue) -> Result<FieldValue, CodecError> {
        match stored {
            SqlValue::Null => Ok(FieldValue::Null),
            SqlValue::Text(text) => serde_json::from_str(&text)
                .map(FieldValue::Json)
                .map_err(|e| CodecError::Malformed {
                    codec: VALUE,
                    message: e.to_string(),
                }),
            other => Err(CodecError::UnsupportedType {
                codec: VALUE,
                found: other.kind(),
            }),
        }
    }
}

/// Typed payloads stored as JSON text carrying an `@type` discriminator.
///
/// A stored `NULL` decodes to [`FieldValue::Null`]; stored text that is not a
/// well-formed payload is [`CodecError::Malformed`]. The two never collapse.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyCodec;

impl Codec for AnyCodec {
    fn name(&self) -> &'static str {
        ANY
    }

    fn sql_type(&self) -> SqlType {
        SqlType::Text
    }

    fn encode(&self, value: &FieldValue) -> Result<SqlValue, CodecError> {
        match value {
            FieldValue::Null => Ok(SqlValue::Null),
            FieldValue::Any(payload) => {
                if payload.type_url.is_empty() {
                    return Err(CodecError::Malformed {
                        codec: ANY,
                        message: "payload has an empty type name".into(),
                    });
                }
                serde_json::to_string(payload)
                    .map(SqlValue::Text)
                    .map_err(|source| CodecError::Serialize { codec: ANY, source })
            }
            other => Err(CodecError::UnsupportedType {
                codec: ANY,
                found: other.kind(),
            }),
        }
    }

    fn decode(&self, stored: SqlValue) -> Result<FieldValue, CodecError> {
        match stored {
            SqlValue::Null => Ok(FieldValue::Null),
            SqlValue::Text(text) => serde_json::from_str::<AnyPayload>(&text)
                .map(FieldValue::Any)
                .map_err(|e| CodecError::Malformed {
                    codec: ANY,
                    message: e.to_string(),
                }),
            other => Err(CodecError::UnsupportedType {
                codec: ANY,
                found: other.kind(),
            }),
        }
    }
}

/// The set of codecs available to one store, keyed by name.
#[derive(Clone, Debug)]
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// A registry with no codecs.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// A registry holding the four built-in codecs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let _ = registry.register(DurationCodec);
        let _ = registry.register(TimestampCodec);
        let _ = registry.register(JsonValueCodec);
        let _ = registry.register(AnyCodec);
        registry
    }

    /// Add a codec, returning the one it replaced under the same name.
    pub fn register(&mut self, codec: impl Codec + 'static) -> Option<Arc<dyn Codec>> {
        self.codecs.insert(codec.name(), Arc::new(codec))
    }

    /// Look up a codec by name.
    pub fn get(&self, name: &str) -> Option<&dyn Codec> {
        self.codecs.get(name).map(AsRef::as_ref)
    }

    /// Registered codec names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.codecs.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
