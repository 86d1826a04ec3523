//! Table declarations and the [`Entity`] trait.
//!
//! An entity declares its table once, as a `&'static Schema`, and converts
//! itself to and from a [`Record`]: a bag of named [`FieldValue`]s. The store
//! never looks inside entity types; it only sees schemas and records.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};

use crate::errors::{Result, StoreError};
use crate::value::{AnyPayload, FieldValue};

/// Column types understood by migrations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlType {
    /// 64-bit integer.
    Integer,
    /// Double-precision float.
    Real,
    /// Text.
    Text,
    /// Raw bytes.
    Blob,
    /// Boolean.
    Boolean,
    /// UTC instant.
    Timestamp,
}

/// How a column's values reach storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// Scalar values stored as-is.
    Plain(SqlType),
    /// Values routed through the named codec.
    Codec(&'static str),
}

/// A reference from a column to another table's column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reference {
    /// Referenced table.
    pub table: &'static str,
    /// Referenced column.
    pub column: &'static str,
}

/// One column of an entity table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    /// Column (and record field) name.
    pub name: &'static str,
    /// Plain type or codec.
    pub kind: ColumnKind,
    /// Whether `NULL` is allowed.
    pub nullable: bool,
    /// Whether a unique index backs the column.
    pub unique: bool,
    /// Whether the backend generates the value on insert.
    pub auto_increment: bool,
    /// Foreign key target, if any.
    pub references: Option<Reference>,
}

impl Column {
    /// A non-null plain column.
    pub fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            kind: ColumnKind::Plain(sql_type),
            nullable: false,
            unique: false,
            auto_increment: false,
            references: None,
        }
    }

    /// A non-null text column.
    pub fn text(name: &'static str) -> Self {
        Self::new(name, SqlType::Text)
    }

    /// A non-null integer column.
    pub fn integer(name: &'static str) -> Self {
        Self::new(name, SqlType::Integer)
    }

    /// A non-null boolean column.
    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, SqlType::Boolean)
    }

    /// A non-null float column.
    pub fn real(name: &'static str) -> Self {
        Self::new(name, SqlType::Real)
    }

    /// A non-null column routed through the codec named `codec`.
    pub fn codec(name: &'static str, codec: &'static str) -> Self {
        Self {
            kind: ColumnKind::Codec(codec),
            ..Self::new(name, SqlType::Text)
        }
    }

    /// Allow `NULL`.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Back the column with a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Let the backend generate the value. Only valid on a single-column
    /// integer primary key.
    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Reference `table(column)`.
    #[must_use]
    pub fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some(Reference { table, column });
        self
    }

    /// The codec name, if the column is codec-backed.
    pub fn codec_name(&self) -> Option<&'static str> {
        match self.kind {
            ColumnKind::Codec(name) => Some(name),
            ColumnKind::Plain(_) => None,
        }
    }
}

/// The table behind an entity type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    table: &'static str,
    columns: Vec<Column>,
    primary_key: Vec<&'static str>,
    associations: Vec<&'static str>,
}

impl Schema {
    /// Start a schema for `table`.
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            columns: Vec::new(),
            primary_key: Vec::new(),
            associations: Vec::new(),
        }
    }

    /// Append a column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key columns, in order.
    #[must_use]
    pub fn with_primary_key(mut self, columns: &[&'static str]) -> Self {
        self.primary_key = columns.to_vec();
        self
    }

    /// Declare an association field realized through a join table.
    #[must_use]
    pub fn with_association(mut self, field: &'static str) -> Self {
        self.associations.push(field);
        self
    }

    /// Table name.
    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Primary key column names.
    pub fn primary_key(&self) -> &[&'static str] {
        &self.primary_key
    }

    /// Association field names.
    pub fn associations(&self) -> &[&'static str] {
        &self.associations
    }

    /// Look up a column by name.
    pub fn column_named(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `name` is a primary key column.
    pub fn is_key(&self, name: &str) -> bool {
        self.primary_key.contains(&name)
    }

    /// Check the declaration is internally consistent.
    pub fn validate(&self) -> Result<()> {
        let table = self.table;
        if self.columns.is_empty() {
            return Err(StoreError::Config(format!("table {table} has no columns")));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(StoreError::Config(format!(
                    "table {table} declares column {} twice",
                    column.name
                )));
            }
        }
        if self.primary_key.is_empty() {
            return Err(StoreError::Config(format!("table {table} has no primary key")));
        }
        for key in &self.primary_key {
            if self.column_named(key).is_none() {
                return Err(StoreError::Config(format!(
                    "primary key column {key} is not a column of {table}"
                )));
            }
        }
        for column in self.columns.iter().filter(|c| c.auto_increment) {
            let single_integer_key = self.primary_key == [column.name]
                && column.kind == ColumnKind::Plain(SqlType::Integer);
            if !single_integer_key {
                return Err(StoreError::Config(format!(
                    "auto-increment column {table}.{} must be the sole integer primary key",
                    column.name
                )));
            }
        }
        Ok(())
    }
}

/// Named field values of one row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

macro_rules! take_typed {
    ($(#[$doc:meta])* $name:ident, $opt:ident, $ty:ty, $variant:ident, $expected:literal) => {
        $(#[$doc])*
        pub fn $name(&mut self, field: &str) -> Result<$ty> {
            match self.take(field) {
                FieldValue::$variant(v) => Ok(v),
                other => Err(mismatch(field, $expected, &other)),
            }
        }

        /// Like the non-optional accessor, but `Null` yields `None`.
        pub fn $opt(&mut self, field: &str) -> Result<Option<$ty>> {
            match self.take(field) {
                FieldValue::Null => Ok(None),
                FieldValue::$variant(v) => Ok(Some(v)),
                other => Err(mismatch(field, $expected, &other)),
            }
        }
    };
}

fn mismatch(field: &str, expected: &str, found: &FieldValue) -> StoreError {
    StoreError::UnsupportedType(format!(
        "field {field}: expected {expected}, found {}",
        found.kind()
    ))
}

impl Record {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, builder style.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Set a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        let _ = self.fields.insert(field.into(), value.into());
    }

    /// Borrow a field.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Remove a field, yielding `Null` if it was absent.
    pub fn take(&mut self, field: &str) -> FieldValue {
        self.fields.remove(field).unwrap_or_default()
    }

    /// Field names, sorted.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    take_typed!(
        /// Take a text field.
        take_text, take_opt_text, String, Text, "text"
    );
    take_typed!(
        /// Take an integer field.
        take_i64, take_opt_i64, i64, Integer, "integer"
    );
    take_typed!(
        /// Take a float field.
        take_f64, take_opt_f64, f64, Real, "real"
    );
    take_typed!(
        /// Take a bytes field.
        take_bytes, take_opt_bytes, Bytes, Bytes, "bytes"
    );
    take_typed!(
        /// Take a duration field.
        take_duration, take_opt_duration, TimeDelta, Duration, "duration"
    );
    take_typed!(
        /// Take a timestamp field.
        take_timestamp, take_opt_timestamp, DateTime<Utc>, Timestamp, "timestamp"
    );
    take_typed!(
        /// Take a JSON value field.
        take_json, take_opt_json, serde_json::Value, Json, "json"
    );
    take_typed!(
        /// Take a typed payload field.
        take_any, take_opt_any, AnyPayload, Any, "any"
    );

    /// Take a boolean field. Integer `0`/`1` is accepted, since some
    /// backends return booleans that way through untyped queries.
    pub fn take_bool(&mut self, field: &str) -> Result<bool> {
        match self.take(field) {
            FieldValue::Bool(v) => Ok(v),
            FieldValue::Integer(v) => Ok(v != 0),
            other => Err(mismatch(field, "bool", &other)),
        }
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// A record type persisted as one table.
///
/// Association fields (declared with [`Schema::with_association`]) are not
/// columns: the store reads them through [`Entity::links`] on writes and
/// fills them through [`Entity::set_links`] when preloading.
pub trait Entity: Sized + Send + 'static {
    /// The entity's table declaration.
    fn schema() -> &'static Schema;

    /// Column values of this entity.
    fn to_record(&self) -> Record;

    /// Rebuild an entity from column values.
    fn from_record(record: Record) -> Result<Self>;

    /// Link rows held in an association field, as records of the link
    /// table. `None` means the field is not loaded and must be left alone.
    fn links(&self, _field: &str) -> Option<Vec<Record>> {
        None
    }

    /// Replace an association field with preloaded link rows.
    fn set_links(&mut self, _field: &str, _links: Vec<Record>) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
