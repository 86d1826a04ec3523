//! The store facade.
//!
//! [`Store`] runs every operation in its own transaction on one pooled
//! connection: filter rendering, statement execution, error
//! classification, then record decoding and association preloading.
//! Association writes happen in the same transaction as the owner write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, Interrupt, Rows, Session};
use crate::codec::CodecRegistry;
use crate::condition::{Condition, ListOptions, Preload};
use crate::dialect::{Dialect, quote};
use crate::errors::{Result, StoreError};
use crate::join::{JoinRegistry, JoinTable};
use crate::manager::{StoreBuilder, StoreConfig};
use crate::mapping::{
    OwnerKey, decode_row, encode_record, encode_value, group_by_owner, plain_record,
};
use crate::migrate::MigrationReport;
use crate::schema::{Column, Entity, Record, Schema};
use crate::value::{FieldValue, SqlValue};

/// Owner keys per preload query.
const PRELOAD_BATCH: usize = 500;

/// The operation a statement runs on behalf of; decides error
/// classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Insert a new record.
    Create,
    /// Insert or update a record.
    Save,
    /// Update matching rows.
    Update,
    /// Delete matching rows.
    Delete,
    /// Read one row.
    Get,
    /// Read many rows.
    List,
    /// Count rows.
    Count,
    /// Backend-native query, unclassified.
    Raw,
}

/// Generic persistence operations.
///
/// Implemented by [`Store`] and by test doubles such as
/// [`FaultyStore`](crate::testing::FaultyStore).
pub trait Database: Send + Sync {
    /// Insert `entity`, then refresh it with backend-generated values.
    ///
    /// Duplicate keys fail with [`StoreError::UniqueConstraintViolation`],
    /// other integrity failures with [`StoreError::ConstraintViolation`].
    fn create<E: Entity>(&self, entity: &mut E) -> Result<()>;

    /// Insert `entity`, or overwrite the row with the same key. With a
    /// condition, an existing row is only overwritten if it matches;
    /// otherwise [`StoreError::RecordNotFound`].
    fn save<E: Entity>(&self, entity: &mut E, condition: &Condition) -> Result<()>;

    /// Write every non-key column of `entity` to the rows matching its key
    /// (when set) and `condition`. Fails with [`StoreError::RecordNotFound`]
    /// when nothing matched.
    fn update<E: Entity>(&self, entity: &E, condition: &Condition) -> Result<()>;

    /// Delete the rows matching `entity`'s key (when set) and `condition`.
    /// Fails with [`StoreError::RecordNotFound`] when nothing was deleted.
    fn delete<E: Entity>(&self, entity: &E, condition: &Condition) -> Result<()>;

    /// The first row matching `condition`, in key order.
    fn get<E: Entity>(&self, condition: &Condition, preload: &Preload) -> Result<E>;

    /// Every row matching `condition`, ordered and paginated by `options`.
    fn list<E: Entity>(
        &self,
        options: &ListOptions,
        condition: &Condition,
        preload: &Preload,
    ) -> Result<Vec<E>>;

    /// Number of rows matching `condition`.
    fn count<E: Entity>(&self, condition: &Condition) -> Result<i64>;

    /// Run a backend-native query and decode its rows as `E`.
    ///
    /// Errors other than interrupts are returned unclassified.
    fn raw<E: Entity>(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<E>>;

    /// Run a backend-native query and return its rows as plain records.
    fn raw_records(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Record>>;
}

pub(crate) struct StoreInner {
    pub(crate) backend: Backend,
    pub(crate) codecs: CodecRegistry,
    pub(crate) tables: HashMap<&'static str, &'static Schema>,
    pub(crate) joins: JoinRegistry,
    pub(crate) migration: MigrationReport,
}

/// A ready store. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    cancel: Option<CancellationToken>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dialect", &self.dialect())
            .field("tables", &self.inner.tables.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Start building a store.
    pub fn builder(config: StoreConfig) -> StoreBuilder {
        StoreBuilder::new(config)
    }

    pub(crate) fn from_inner(inner: StoreInner, timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(inner),
            cancel: None,
            timeout,
        }
    }

    /// A handle whose operations stop when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            ..self.clone()
        }
    }

    /// A handle whose operations each get `timeout` to finish.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self.clone()
        }
    }

    /// The effective connection cap.
    pub fn connection_cap(&self) -> u32 {
        self.inner.backend.max_connections()
    }

    /// SQL dialect of the backend.
    pub fn dialect(&self) -> Dialect {
        self.inner.backend.dialect()
    }

    /// Codecs available to this store.
    pub fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    /// What migration changed when this store was built.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.inner.migration
    }

    /// Registered tables, sorted by name.
    pub fn tables(&self) -> Vec<&'static str> {
        let mut tables: Vec<_> = self.inner.tables.keys().copied().collect();
        tables.sort_unstable();
        tables
    }

    /// Run a backend-native statement, returning the rows it changed.
    pub fn raw_execute(&self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        self.transact(Operation::Raw, |tx| tx.execute(sql, args))
    }

    fn interrupt(&self) -> Interrupt {
        Interrupt::new(
            self.cancel.clone(),
            self.timeout.map(|t| Instant::now() + t),
        )
    }

    fn schema_of<E: Entity>(&self) -> Result<&'static Schema> {
        let schema = E::schema();
        match self.inner.tables.get(schema.table()) {
            Some(&registered) if registered == schema => Ok(registered),
            Some(_) => Err(StoreError::Config(format!(
                "entity for table {} does not match the registered schema",
                schema.table()
            ))),
            None => Err(StoreError::Config(format!(
                "table {} is not registered with this store",
                schema.table()
            ))),
        }
    }

    fn links_of<E: Entity>(&self, schema: &Schema, entity: &E) -> Vec<(&JoinTable, Vec<Record>)> {
        self.inner
            .joins
            .for_owner(schema.table())
            .filter_map(|join| entity.links(join.field()).map(|links| (join, links)))
            .collect()
    }

    fn transact<T>(&self, op: Operation, body: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        let interrupt = self.interrupt();
        let inner = &*self.inner;
        inner.backend.transact(op, &interrupt, |session| {
            let mut tx = Tx {
                session,
                op,
                interrupt: &interrupt,
                dialect: inner.backend.dialect(),
                codecs: &inner.codecs,
                joins: &inner.joins,
            };
            body(&mut tx)
        })
    }
}

impl Database for Store {
    fn create<E: Entity>(&self, entity: &mut E) -> Result<()> {
        let schema = self.schema_of::<E>()?;
        let record = entity.to_record();
        let links = self.links_of(schema, entity);

        let created = self.transact(Operation::Create, |tx| {
            let encoded = encode_record(tx.codecs, schema, &record)?;
            let (sql, args) = insert_sql(schema, &encoded);
            let row = tx.returning_one(schema, &sql, &args)?;
            tx.finish_write::<E>(schema, row, &links, false)
        })?;
        *entity = created;
        Ok(())
    }

    fn save<E: Entity>(&self, entity: &mut E, condition: &Condition) -> Result<()> {
        let schema = self.schema_of::<E>()?;
        let record = entity.to_record();
        let links = self.links_of(schema, entity);
        let filter = condition.to_sql(schema)?;

        let saved = self.transact(Operation::Save, |tx| {
            let encoded = encode_record(tx.codecs, schema, &record)?;
            let generated = encoded
                .iter()
                .any(|(column, value)| column.auto_increment && value.is_zero());
            let (sql, args) = if generated {
                insert_sql(schema, &encoded)
            } else {
                upsert_sql(schema, &encoded, filter.as_ref())
            };
            let row = tx.returning_one(schema, &sql, &args)?;
            tx.finish_write::<E>(schema, row, &links, true)
        })?;
        *entity = saved;
        Ok(())
    }

    fn update<E: Entity>(&self, entity: &E, condition: &Condition) -> Result<()> {
        let schema = self.schema_of::<E>()?;
        let record = entity.to_record();
        let links = self.links_of(schema, entity);
        let filter = condition.to_sql(schema)?;

        self.transact(Operation::Update, |tx| {
            let encoded = encode_record(tx.codecs, schema, &record)?;
            let (clause, mut args) = key_filter(schema, &encoded, filter.as_ref(), "update")?;

            let mut assignments = Vec::new();
            let mut values = Vec::new();
            for (column, value) in &encoded {
                if !schema.is_key(column.name) {
                    assignments.push(format!("{} = ?", quote(column.name)));
                    values.push(value.clone());
                }
            }
            if assignments.is_empty() {
                let first = quote(schema.primary_key()[0]);
                assignments.push(format!("{first} = {first}"));
            }
            values.append(&mut args);

            let owner_pk = tx.owner_pk_column(schema);
            let sql = format!(
                "UPDATE {} SET {} WHERE {clause} RETURNING {}",
                quote(schema.table()),
                assignments.join(", "),
                quote(owner_pk.map_or(schema.primary_key()[0], |c| c.name)),
            );
            let rows = tx.query(&sql, &values)?;
            if rows.values.is_empty() {
                return Err(StoreError::RecordNotFound);
            }
            if !links.is_empty() {
                for key in rows.values.into_iter().filter_map(|row| row.into_iter().next()) {
                    for (join, link_records) in &links {
                        let _ = tx.write_links(join, &key, link_records, true)?;
                    }
                }
            }
            Ok(())
        })
    }

    fn delete<E: Entity>(&self, entity: &E, condition: &Condition) -> Result<()> {
        let schema = self.schema_of::<E>()?;
        let record = entity.to_record();
        let filter = condition.to_sql(schema)?;

        self.transact(Operation::Delete, |tx| {
            let encoded = encode_record(tx.codecs, schema, &record)?;
            let (clause, args) = key_filter(schema, &encoded, filter.as_ref(), "delete")?;
            let sql = format!("DELETE FROM {} WHERE {clause}", quote(schema.table()));
            match tx.execute(&sql, &args)? {
                0 => Err(StoreError::RecordNotFound),
                _ => Ok(()),
            }
        })
    }

    fn get<E: Entity>(&self, condition: &Condition, preload: &Preload) -> Result<E> {
        let schema = self.schema_of::<E>()?;
        let (filter, args) = where_clause(condition.to_sql(schema)?);
        let order = schema
            .primary_key()
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT * FROM {}{filter} ORDER BY {order} LIMIT 1",
            quote(schema.table())
        );

        self.transact(Operation::Get, |tx| {
            let mut found = tx.select::<E>(schema, &sql, &args)?;
            tx.preload(schema, &mut found, preload)?;
            found.pop().ok_or(StoreError::RecordNotFound)
        })
    }

    fn list<E: Entity>(
        &self,
        options: &ListOptions,
        condition: &Condition,
        preload: &Preload,
    ) -> Result<Vec<E>> {
        let schema = self.schema_of::<E>()?;
        let (filter, args) = where_clause(condition.to_sql(schema)?);
        let sql = format!(
            "SELECT * FROM {}{filter}{}{}",
            quote(schema.table()),
            options.order_clause(schema)?,
            self.dialect().limit_clause(options.offset, options.limit),
        );

        self.transact(Operation::List, |tx| {
            let mut found = tx.select::<E>(schema, &sql, &args)?;
            tx.preload(schema, &mut found, preload)?;
            Ok(found)
        })
    }

    fn count<E: Entity>(&self, condition: &Condition) -> Result<i64> {
        let schema = self.schema_of::<E>()?;
        let (filter, args) = where_clause(condition.to_sql(schema)?);
        let sql = format!("SELECT COUNT(*) FROM {}{filter}", quote(schema.table()));

        self.transact(Operation::Count, |tx| {
            let rows = tx.query(&sql, &args)?;
            rows.values
                .first()
                .and_then(|row| row.first())
                .and_then(SqlValue::as_i64)
                .ok_or_else(|| StoreError::InvalidQuery("count returned no value".into()))
        })
    }

    fn raw<E: Entity>(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<E>> {
        let schema = self.schema_of::<E>()?;
        self.transact(Operation::Raw, |tx| tx.select::<E>(schema, sql, args))
    }

    fn raw_records(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Record>> {
        self.transact(Operation::Raw, |tx| {
            let rows = tx.query(sql, args)?;
            let columns = rows.columns;
            Ok(rows
                .values
                .into_iter()
                .map(|row| plain_record(&columns, row))
                .collect())
        })
    }
}

/// ` WHERE …` and its arguments, or nothing.
fn where_clause(filter: Option<(String, Vec<SqlValue>)>) -> (String, Vec<SqlValue>) {
    match filter {
        Some((clause, args)) => (format!(" WHERE {clause}"), args),
        None => (String::new(), Vec::new()),
    }
}

/// The entity's key (when fully set) combined with the caller's filter.
fn key_filter(
    schema: &Schema,
    encoded: &[(&Column, SqlValue)],
    filter: Option<&(String, Vec<SqlValue>)>,
    verb: &str,
) -> Result<(String, Vec<SqlValue>)> {
    let key: Vec<_> = encoded
        .iter()
        .filter(|(column, _)| schema.is_key(column.name))
        .collect();
    let key_set = key.iter().all(|(column, value)| !key_unset(column, value));

    let mut clauses = Vec::new();
    let mut args = Vec::new();
    if key_set {
        for (column, value) in key {
            clauses.push(format!("{} = ?", quote(column.name)));
            args.push(value.clone());
        }
    }
    if let Some((clause, extra)) = filter {
        clauses.push(clause.clone());
        args.extend(extra.iter().cloned());
    }
    if clauses.is_empty() {
        return Err(StoreError::InvalidQuery(format!(
            "refusing to {verb} every row of {}: set the primary key or pass a condition",
            schema.table()
        )));
    }
    Ok((clauses.join(" AND "), args))
}

/// A key value counts as unset when it is `NULL`, or when the backend
/// generates it and the entity still holds the zero value. Any other
/// value, `""` and `0` included, is a real key.
fn key_unset(column: &Column, value: &SqlValue) -> bool {
    value.is_null() || (column.auto_increment && value.is_zero())
}

/// Columns to insert: everything except unset generated keys.
fn insert_columns<'a>(
    encoded: &'a [(&'a Column, SqlValue)],
) -> impl Iterator<Item = &'a (&'a Column, SqlValue)> {
    encoded
        .iter()
        .filter(|(column, value)| !(column.auto_increment && value.is_zero()))
}

fn insert_sql(schema: &Schema, encoded: &[(&Column, SqlValue)]) -> (String, Vec<SqlValue>) {
    let (names, args): (Vec<_>, Vec<_>) = insert_columns(encoded)
        .map(|(column, value)| (quote(column.name), value.clone()))
        .unzip();
    let table = quote(schema.table());
    if names.is_empty() {
        return (format!("INSERT INTO {table} DEFAULT VALUES RETURNING *"), args);
    }
    let placeholders = vec!["?"; names.len()].join(", ");
    (
        format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders}) RETURNING *",
            names.join(", ")
        ),
        args,
    )
}

fn upsert_sql(
    schema: &Schema,
    encoded: &[(&Column, SqlValue)],
    filter: Option<&(String, Vec<SqlValue>)>,
) -> (String, Vec<SqlValue>) {
    let (names, mut args): (Vec<_>, Vec<_>) = insert_columns(encoded)
        .map(|(column, value)| (column.name, value.clone()))
        .unzip();
    let key = schema
        .primary_key()
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut updates: Vec<_> = names
        .iter()
        .filter(|name| !schema.is_key(name))
        .map(|name| format!("{0} = excluded.{0}", quote(name)))
        .collect();
    if updates.is_empty() {
        let first = quote(schema.primary_key()[0]);
        updates.push(format!("{first} = excluded.{first}"));
    }

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({key}) DO UPDATE SET {}",
        quote(schema.table()),
        names.iter().map(|n| quote(n)).collect::<Vec<_>>().join(", "),
        vec!["?"; names.len()].join(", "),
        updates.join(", "),
    );
    if let Some((clause, extra)) = filter {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
        args.extend(extra.iter().cloned());
    }
    sql.push_str(" RETURNING *");
    (sql, args)
}

/// One operation's view of its transaction.
struct Tx<'a> {
    session: &'a mut dyn Session,
    op: Operation,
    interrupt: &'a Interrupt,
    dialect: Dialect,
    codecs: &'a CodecRegistry,
    joins: &'a JoinRegistry,
}

impl Tx<'_> {
    fn execute(&mut self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        self.interrupt.check()?;
        let (op, interrupt) = (self.op, self.interrupt);
        self.session
            .execute(&self.dialect.rewrite(sql), args)
            .map_err(|e| StoreError::from_backend(op, e, interrupt))
    }

    fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Rows> {
        self.interrupt.check()?;
        let (op, interrupt) = (self.op, self.interrupt);
        self.session
            .query(&self.dialect.rewrite(sql), args)
            .map_err(|e| StoreError::from_backend(op, e, interrupt))
    }

    fn select<E: Entity>(&mut self, schema: &Schema, sql: &str, args: &[SqlValue]) -> Result<Vec<E>> {
        let rows = self.query(sql, args)?;
        let columns = rows.columns;
        rows.values
            .into_iter()
            .map(|row| E::from_record(decode_row(self.codecs, schema, &columns, row)?))
            .collect()
    }

    /// Run a `RETURNING *` statement expected to yield one row.
    fn returning_one(&mut self, schema: &Schema, sql: &str, args: &[SqlValue]) -> Result<Record> {
        let rows = self.query(sql, args)?;
        let columns = rows.columns;
        let row = rows
            .values
            .into_iter()
            .next()
            .ok_or(StoreError::RecordNotFound)?;
        decode_row(self.codecs, schema, &columns, row)
    }

    fn owner_pk_column<'s>(&self, schema: &'s Schema) -> Option<&'s Column> {
        match schema.primary_key() {
            [only] => schema.column_named(only),
            _ => None,
        }
    }

    /// Rebuild the written entity and write its loaded associations.
    fn finish_write<E: Entity>(
        &mut self,
        schema: &Schema,
        row: Record,
        links: &[(&JoinTable, Vec<Record>)],
        replace: bool,
    ) -> Result<E> {
        let owner_key = match (links.is_empty(), self.owner_pk_column(schema)) {
            (false, Some(column)) => Some(encode_value(
                self.codecs,
                column,
                row.get(column.name).unwrap_or(&FieldValue::Null),
            )?),
            _ => None,
        };
        let mut written = E::from_record(row)?;
        if let Some(key) = owner_key {
            for (join, link_records) in links {
                let stored = self.write_links(join, &key, link_records, replace)?;
                written.set_links(join.field(), stored)?;
            }
        }
        Ok(written)
    }

    /// Insert `links` for `owner`, first removing its existing link rows
    /// when `replace` is set. Returns the stored link rows.
    fn write_links(
        &mut self,
        join: &JoinTable,
        owner: &SqlValue,
        links: &[Record],
        replace: bool,
    ) -> Result<Vec<Record>> {
        let link = join.link();
        if replace {
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                quote(link.table()),
                quote(join.owner_key())
            );
            let _ = self.execute(&sql, std::slice::from_ref(owner))?;
        }

        let owner_field = FieldValue::from(owner.clone());
        let mut stored = Vec::with_capacity(links.len());
        for record in links {
            let mut record = record.clone();
            record.set(join.owner_key(), owner_field.clone());
            let encoded = encode_record(self.codecs, link, &record)?;
            let (sql, args) = insert_sql(link, &encoded);
            stored.push(self.returning_one(link, &sql, &args)?);
        }
        Ok(stored)
    }

    /// Fill association fields of `entities` according to `preload`.
    fn preload<E: Entity>(
        &mut self,
        owner: &Schema,
        entities: &mut [E],
        preload: &Preload,
    ) -> Result<()> {
        let joins = self.joins;
        let selected: Vec<(&JoinTable, Option<&Condition>)> = match preload {
            Preload::None => return Ok(()),
            Preload::All => joins.for_owner(owner.table()).map(|j| (j, None)).collect(),
            Preload::Only { field, condition } => {
                let join = joins.find(owner.table(), field).ok_or_else(|| {
                    StoreError::InvalidQuery(format!(
                        "{} has no association named {field}",
                        owner.table()
                    ))
                })?;
                vec![(join, Some(condition))]
            }
        };
        if entities.is_empty() || selected.is_empty() {
            return Ok(());
        }
        let Some(pk) = self.owner_pk_column(owner) else {
            return Ok(());
        };

        let mut keys = Vec::with_capacity(entities.len());
        for entity in entities.iter() {
            let record = entity.to_record();
            keys.push(encode_value(
                self.codecs,
                pk,
                record.get(pk.name).unwrap_or(&FieldValue::Null),
            )?);
        }

        for (join, condition) in selected {
            let records = self.load_links(join, &keys, condition)?;
            let mut groups = group_by_owner(records, join.owner_key());
            for (entity, key) in entities.iter_mut().zip(&keys) {
                let links = OwnerKey::from_sql(key)
                    .and_then(|k| groups.remove(&k))
                    .unwrap_or_default();
                entity.set_links(join.field(), links)?;
            }
        }
        Ok(())
    }

    fn load_links(
        &mut self,
        join: &JoinTable,
        keys: &[SqlValue],
        condition: Option<&Condition>,
    ) -> Result<Vec<Record>> {
        let link = join.link();
        let extra = condition.map(|c| c.to_sql(link)).transpose()?.flatten();
        let order = link
            .primary_key()
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut records = Vec::new();
        for chunk in keys.chunks(PRELOAD_BATCH) {
            let mut sql = format!(
                "SELECT * FROM {} WHERE {} IN ({})",
                quote(link.table()),
                quote(join.owner_key()),
                vec!["?"; chunk.len()].join(", ")
            );
            let mut args = chunk.to_vec();
            if let Some((clause, extra_args)) = &extra {
                sql.push_str(" AND ");
                sql.push_str(clause);
                args.extend(extra_args.iter().cloned());
            }
            sql.push_str(&format!(" ORDER BY {order}"));

            let rows = self.query(&sql, &args)?;
            let columns = rows.columns;
            for row in rows.values {
                records.push(decode_row(self.codecs, link, &columns, row)?);
            }
        }
        Ok(records)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
