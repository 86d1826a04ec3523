//! Conversion between entity records and backend rows.

use std::collections::HashMap;

use crate::codec::CodecRegistry;
use crate::errors::{Result, StoreError};
use crate::schema::{Column, ColumnKind, Record, Schema, SqlType};
use crate::value::{FieldValue, SqlValue, parse_timestamp};

/// Encode one field for its column.
pub(crate) fn encode_value(
    codecs: &CodecRegistry,
    column: &Column,
    value: &FieldValue,
) -> Result<SqlValue> {
    match column.kind {
        ColumnKind::Codec(name) => {
            let codec = codecs.get(name).ok_or_else(|| {
                StoreError::Config(format!("column {} uses unregistered codec {name}", column.name))
            })?;
            codec
                .encode(value)
                .map_err(|e| StoreError::from_encode(column.name, e))
        }
        ColumnKind::Plain(_) => value.to_plain().ok_or_else(|| {
            StoreError::UnsupportedType(format!(
                "{}: a {} value needs a codec column",
                column.name,
                value.kind()
            ))
        }),
    }
}

/// Encode every column of `schema` from `record`. Missing fields encode as
/// `NULL`.
pub(crate) fn encode_record<'s>(
    codecs: &CodecRegistry,
    schema: &'s Schema,
    record: &Record,
) -> Result<Vec<(&'s Column, SqlValue)>> {
    schema
        .columns()
        .iter()
        .map(|column| {
            let value = record.get(column.name).unwrap_or(&FieldValue::Null);
            Ok((column, encode_value(codecs, column, value)?))
        })
        .collect()
}

/// Decode a stored value for a plain column.
fn decode_plain(column: &str, ty: SqlType, stored: SqlValue) -> Result<FieldValue> {
    Ok(match (ty, stored) {
        (_, SqlValue::Null) => FieldValue::Null,
        (SqlType::Boolean, SqlValue::Integer(v)) => FieldValue::Bool(v != 0),
        #[allow(clippy::cast_precision_loss)]
        (SqlType::Real, SqlValue::Integer(v)) => FieldValue::Real(v as f64),
        (SqlType::Timestamp, SqlValue::Text(text)) => {
            FieldValue::Timestamp(parse_timestamp(&text).ok_or_else(|| StoreError::CorruptValue {
                column: column.to_owned(),
                message: format!("not an RFC 3339 instant: {text:?}"),
            })?)
        }
        (_, other) => FieldValue::from(other),
    })
}

/// Decode one stored value for its column.
pub(crate) fn decode_value(
    codecs: &CodecRegistry,
    column: &Column,
    stored: SqlValue,
) -> Result<FieldValue> {
    match column.kind {
        ColumnKind::Codec(name) => {
            let codec = codecs.get(name).ok_or_else(|| {
                StoreError::Config(format!("column {} uses unregistered codec {name}", column.name))
            })?;
            codec
                .decode(stored)
                .map_err(|e| StoreError::from_decode(column.name, e))
        }
        ColumnKind::Plain(ty) => decode_plain(column.name, ty, stored),
    }
}

/// Decode a result row through `schema`. Result columns the schema does not
/// declare are ignored; declared columns absent from the result stay unset.
pub(crate) fn decode_row(
    codecs: &CodecRegistry,
    schema: &Schema,
    columns: &[String],
    row: Vec<SqlValue>,
) -> Result<Record> {
    let mut record = Record::new();
    for (name, stored) in columns.iter().zip(row) {
        if let Some(column) = schema.column_named(name) {
            record.set(column.name, decode_value(codecs, column, stored)?);
        }
    }
    Ok(record)
}

/// A row without a schema: every value in its natural in-memory form.
pub(crate) fn plain_record(columns: &[String], row: Vec<SqlValue>) -> Record {
    columns
        .iter()
        .cloned()
        .zip(row.into_iter().map(FieldValue::from))
        .collect()
}

/// Hashable form of a single-column owner key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum OwnerKey {
    Integer(i64),
    Text(String),
}

impl OwnerKey {
    pub(crate) fn from_sql(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Integer(v) => Some(Self::Integer(*v)),
            SqlValue::Text(v) => Some(Self::Text(v.clone())),
            _ => None,
        }
    }

    pub(crate) fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Integer(v) => Some(Self::Integer(*v)),
            FieldValue::Text(v) => Some(Self::Text(v.clone())),
            _ => None,
        }
    }
}

/// Group records by the owner key held in `field`.
pub(crate) fn group_by_owner(records: Vec<Record>, field: &str) -> HashMap<OwnerKey, Vec<Record>> {
    let mut groups: HashMap<OwnerKey, Vec<Record>> = HashMap::new();
    for record in records {
        if let Some(key) = record.get(field).and_then(OwnerKey::from_field) {
            groups.entry(key).or_default().push(record);
        }
    }
    groups
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use assert_matches::assert_matches;
    use chrono::TimeDelta;

    fn schema() -> Schema {
        Schema::new("metrics")
            .column(Column::text("id"))
            .column(Column::boolean("deprecated"))
            .column(Column::codec("interval", codec::DURATION).nullable())
            .column(Column::new("checked_at", SqlType::Timestamp).nullable())
            .with_primary_key(&["id"])
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn encode_routes_codec_columns() {
        let schema = schema();
        let record = Record::new()
            .with("id", "m1")
            .with("deprecated", false)
            .with("interval", TimeDelta::seconds(2));
        let encoded = encode_record(&CodecRegistry::with_defaults(), &schema, &record).unwrap();
        let values: Vec<_> = encoded.into_iter().map(|(_, v)| v).collect();
        assert_eq!(
            values,
            vec![
                SqlValue::from("m1"),
                SqlValue::Bool(false),
                SqlValue::Integer(2_000_000_000),
                SqlValue::Null,
            ]
        );
    }

    #[test]
    fn codec_kind_on_plain_column_rejected() {
        let schema = schema();
        let record = Record::new().with("id", TimeDelta::seconds(1));
        assert_matches!(
            encode_record(&CodecRegistry::with_defaults(), &schema, &record),
            Err(StoreError::UnsupportedType(msg)) if msg.starts_with("id:")
        );
    }

    #[test]
    fn wrong_shape_for_codec_rejected_with_column() {
        let schema = schema();
        let record = Record::new().with("interval", "ten minutes");
        assert_matches!(
            encode_record(&CodecRegistry::with_defaults(), &schema, &record),
            Err(StoreError::UnsupportedType(msg)) if msg.starts_with("interval:")
        );
    }

    #[test]
    fn decode_normalizes_backend_representations() {
        let schema = schema();
        let mut record = decode_row(
            &CodecRegistry::with_defaults(),
            &schema,
            &cols(&["id", "deprecated", "interval", "checked_at", "extra"]),
            vec![
                SqlValue::from("m1"),
                SqlValue::Integer(1),
                SqlValue::Integer(5),
                SqlValue::from("2024-01-01T00:00:00Z"),
                SqlValue::from("ignored"),
            ],
        )
        .unwrap();
        assert!(record.take_bool("deprecated").unwrap());
        assert_eq!(record.take_duration("interval").unwrap(), TimeDelta::nanoseconds(5));
        assert!(record.take_timestamp("checked_at").is_ok());
        assert!(record.get("extra").is_none());
    }

    #[test]
    fn corrupt_plain_timestamp_reported() {
        let schema = schema();
        let err = decode_row(
            &CodecRegistry::with_defaults(),
            &schema,
            &cols(&["checked_at"]),
            vec![SqlValue::from("not a time")],
        )
        .unwrap_err();
        assert_matches!(err, StoreError::CorruptValue { column, .. } if column == "checked_at");
    }

    #[test]
    fn grouping_by_owner() {
        let records = vec![
            Record::new().with("owner", "a").with("n", 1_i64),
            Record::new().with("owner", "b").with("n", 2_i64),
            Record::new().with("owner", "a").with("n", 3_i64),
        ];
        let groups = group_by_owner(records, "owner");
        assert_eq!(groups[&OwnerKey::Text("a".into())].len(), 2);
        assert_eq!(groups[&OwnerKey::Text("b".into())].len(), 1);
    }

    #[test]
    fn plain_record_keeps_every_column() {
        let record = plain_record(
            &cols(&["resource_id", "n"]),
            vec![SqlValue::from("r1"), SqlValue::Integer(2)],
        );
        assert_eq!(record.get("n"), Some(&FieldValue::Integer(2)));
        assert_eq!(record.len(), 2);
    }
}
