//! Storage and in-memory value representations.
//!
//! [`SqlValue`] is what crosses the driver boundary: the handful of scalar
//! kinds every backend can bind and return. [`FieldValue`] is what entities
//! hold in memory, including the non-relational kinds (durations, open JSON
//! values, typed payloads) that need a codec to reach a column.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, SubsecRound, TimeDelta, Utc};
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};

/// A column-native value, as bound to statements and read back from rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    #[default]
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Bytes),
    /// Boolean. Backends without a native boolean store it as `0`/`1`.
    Bool(bool),
    /// A UTC instant. Backends without a native instant store RFC 3339 text.
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    /// Name of the value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Bool(_) => "bool",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Whether this is `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value is the zero value of its kind (`NULL`, `0`, `""`).
    ///
    /// Used to decide whether a key column was actually set.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Integer(v) => *v == 0,
            Self::Text(v) => v.is_empty(),
            Self::Blob(v) => v.is_empty(),
            Self::Real(_) | Self::Bool(_) | Self::Timestamp(_) => false,
        }
    }

    /// Read the value as an integer, accepting booleans.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }
}

/// Render an instant the way it is stored as text: RFC 3339, nanosecond
/// precision, `Z` suffix. Fixed width, so text ordering matches time ordering.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse an RFC 3339 instant into UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Self::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Self::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            Self::Timestamp(ts) => ToSqlOutput::Owned(Value::Text(format_timestamp(ts))),
        })
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<Bytes> for SqlValue {
    fn from(v: Bytes) -> Self {
        Self::Blob(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A typed payload with a discriminator naming its type.
///
/// Stored as `{"@type": "<type_url>", "value": <payload>}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyPayload {
    /// Fully-qualified type name of the payload.
    #[serde(rename = "@type")]
    pub type_url: String,
    /// The payload itself.
    pub value: serde_json::Value,
}

impl AnyPayload {
    /// Build a payload from a type name and value.
    pub fn new(type_url: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }
}

/// An in-memory field value.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FieldValue {
    /// Absent.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// A signed time span.
    Duration(TimeDelta),
    /// A UTC instant.
    Timestamp(DateTime<Utc>),
    /// An open-ended JSON value.
    Json(serde_json::Value),
    /// A typed payload.
    Any(AnyPayload),
}

impl FieldValue {
    /// Name of the value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Duration(_) => "duration",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
            Self::Any(_) => "any",
        }
    }

    /// Whether this is [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a scalar value to its storage form without a codec.
    ///
    /// Returns `None` for the kinds that need a codec.
    pub fn to_plain(&self) -> Option<SqlValue> {
        Some(match self {
            Self::Null => SqlValue::Null,
            Self::Bool(v) => SqlValue::Bool(*v),
            Self::Integer(v) => SqlValue::Integer(*v),
            Self::Real(v) => SqlValue::Real(*v),
            Self::Text(v) => SqlValue::Text(v.clone()),
            Self::Bytes(v) => SqlValue::Blob(v.clone()),
            Self::Timestamp(v) => SqlValue::Timestamp(v.trunc_subsecs(6)),
            Self::Duration(_) | Self::Json(_) | Self::Any(_) => return None,
        })
    }
}

impl From<SqlValue> for FieldValue {
    fn from(v: SqlValue) -> Self {
        match v {
            SqlValue::Null => Self::Null,
            SqlValue::Integer(v) => Self::Integer(v),
            SqlValue::Real(v) => Self::Real(v),
            SqlValue::Text(v) => Self::Text(v),
            SqlValue::Blob(v) => Self::Bytes(v),
            SqlValue::Bool(v) => Self::Bool(v),
            SqlValue::Timestamp(v) => Self::Timestamp(v),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Bytes> for FieldValue {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

impl From<TimeDelta> for FieldValue {
    fn from(v: TimeDelta) -> Self {
        Self::Duration(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<AnyPayload> for FieldValue {
    fn from(v: AnyPayload) -> Self {
        Self::Any(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn zero_values() {
        assert!(SqlValue::Null.is_zero());
        assert!(SqlValue::Integer(0).is_zero());
        assert!(SqlValue::from("").is_zero());
        assert!(!SqlValue::from("w1").is_zero());
        assert!(!SqlValue::Bool(false).is_zero());
    }

    #[test]
    fn option_maps_to_null() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(FieldValue::from(Some("x")), FieldValue::Text("x".into()));
    }

    #[test]
    fn timestamps_format_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + TimeDelta::milliseconds(1);
        let (fa, fb) = (format_timestamp(&a), format_timestamp(&b));
        assert_eq!(fa, "2024-01-02T03:04:05.000000000Z");
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert_eq!(parse_timestamp(&fa), Some(a));
    }

    #[test]
    fn parse_timestamp_normalizes_offset() {
        let parsed = parse_timestamp("2024-01-02T05:04:05+02:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn plain_conversion_rejects_codec_kinds() {
        assert_eq!(FieldValue::Integer(3).to_plain(), Some(SqlValue::Integer(3)));
        assert_eq!(FieldValue::Duration(TimeDelta::seconds(1)).to_plain(), None);
        assert_eq!(FieldValue::Json(serde_json::json!({})).to_plain(), None);
    }

    #[test]
    fn any_payload_wire_shape() {
        let payload = AnyPayload::new("type.example/Vm", serde_json::json!({"id": "vm-1"}));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["@type"], "type.example/Vm");
        assert_eq!(json["value"]["id"], "vm-1");
    }

    #[test]
    fn bool_binds_as_integer() {
        let out = SqlValue::Bool(true).to_sql().unwrap();
        assert_eq!(out, ToSqlOutput::Owned(Value::Integer(1)));
    }
}
