//! Additive schema migration.
//!
//! For every registered table, in order: create it if missing, otherwise add
//! any declared columns it lacks (always nullable), then ensure unique
//! indexes. Nothing is ever dropped or retyped. Each table migrates in its
//! own transaction.

use tracing::{debug, info};

use crate::backend::{Backend, Interrupt};
use crate::codec::CodecRegistry;
use crate::dialect::{Dialect, quote};
use crate::errors::{Result, StoreError};
use crate::join::JoinRegistry;
use crate::schema::{Column, ColumnKind, Schema, SqlType};
use crate::store::Operation;

/// A foreign key added by a join declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ForeignKey {
    pub column: &'static str,
    pub table: &'static str,
    pub references: &'static str,
}

/// One table to migrate.
#[derive(Clone, Debug)]
pub(crate) struct TableSpec {
    pub schema: &'static Schema,
    pub foreign_keys: Vec<ForeignKey>,
}

/// What a migration run changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Tables created.
    pub created: Vec<String>,
    /// Columns added, as `(table, column)`.
    pub added_columns: Vec<(String, String)>,
    /// Tables that needed no change.
    pub unchanged: Vec<String>,
}

/// Resolve a column's storage type, through its codec if it has one.
pub(crate) fn column_type(column: &Column, codecs: &CodecRegistry) -> Result<SqlType> {
    match column.kind {
        ColumnKind::Plain(ty) => Ok(ty),
        ColumnKind::Codec(name) => codecs.get(name).map(|c| c.sql_type()).ok_or_else(|| {
            StoreError::Config(format!(
                "column {} uses unregistered codec {name}",
                column.name
            ))
        }),
    }
}

/// Order tables for migration: entity tables in registration order, then
/// link tables, each carrying the foreign keys its joins imply.
pub(crate) fn plan(schemas: &[&'static Schema], joins: &JoinRegistry) -> Result<Vec<TableSpec>> {
    for schema in schemas {
        schema.validate()?;
        for field in schema.associations() {
            if joins.find(schema.table(), field).is_none() {
                return Err(StoreError::Config(format!(
                    "association {}.{field} has no join table declared",
                    schema.table()
                )));
            }
        }
    }
    for join in joins.iter() {
        if !schemas.iter().any(|s| s.table() == join.owner().table()) {
            return Err(StoreError::Config(format!(
                "join owner {} is not a registered entity",
                join.owner().table()
            )));
        }
        join.link().validate()?;
    }

    let mut specs: Vec<TableSpec> = schemas
        .iter()
        .filter(|s| !joins.is_link(s.table()))
        .map(|&schema| TableSpec {
            schema,
            foreign_keys: Vec::new(),
        })
        .collect();

    for join in joins.iter() {
        let fk = ForeignKey {
            column: join.owner_key(),
            table: join.owner().table(),
            references: join.owner_pk(),
        };
        match specs.iter_mut().find(|s| s.schema.table() == join.link().table()) {
            Some(spec) => spec.foreign_keys.push(fk),
            None => specs.push(TableSpec {
                schema: join.link(),
                foreign_keys: vec![fk],
            }),
        }
    }
    Ok(specs)
}

fn create_table_sql(
    spec: &TableSpec,
    dialect: Dialect,
    codecs: &CodecRegistry,
) -> Result<String> {
    let schema = spec.schema;
    let mut parts = Vec::with_capacity(schema.columns().len() + 2);
    let mut inline_key = false;
    for column in schema.columns() {
        let ty = column_type(column, codecs)?;
        inline_key |= column.auto_increment && dialect.inline_auto_key();
        parts.push(dialect.column_def(column, ty));
    }
    if !inline_key {
        let key = schema
            .primary_key()
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("PRIMARY KEY ({key})"));
    }
    for fk in &spec.foreign_keys {
        parts.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE CASCADE",
            quote(fk.column),
            quote(fk.table),
            quote(fk.references)
        ));
    }
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(schema.table()),
        parts.join(", ")
    ))
}

fn unique_index_sql(table: &str, column: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
        quote(&format!("ux_{table}_{column}")),
        quote(table),
        quote(column)
    )
}

/// Migrate every table in `specs`.
pub(crate) fn run(
    backend: &Backend,
    specs: &[TableSpec],
    codecs: &CodecRegistry,
) -> Result<MigrationReport> {
    let dialect = backend.dialect();
    let mut report = MigrationReport::default();

    for spec in specs {
        let table = spec.schema.table();
        let outcome = backend
            .transact(Operation::Raw, &Interrupt::none(), |session| {
                let existing = session.table_columns(table)?;
                let mut added = Vec::new();
                if existing.is_empty() {
                    let sql = create_table_sql(spec, dialect, codecs)?;
                    let _ = session.execute(&sql, &[])?;
                } else {
                    for column in spec.schema.columns() {
                        if existing.iter().any(|c| c == column.name) {
                            continue;
                        }
                        if spec.schema.is_key(column.name) {
                            return Err(StoreError::Config(format!(
                                "cannot add primary key column {} to existing table",
                                column.name
                            )));
                        }
                        let ty = column_type(column, codecs)?;
                        let sql = format!(
                            "ALTER TABLE {} ADD COLUMN {}",
                            quote(table),
                            dialect.added_column_def(column, ty)
                        );
                        let _ = session.execute(&sql, &[])?;
                        added.push(column.name.to_owned());
                    }
                }
                for column in spec.schema.columns().iter().filter(|c| c.unique) {
                    let _ = session.execute(&unique_index_sql(table, column.name), &[])?;
                }
                Ok((existing.is_empty(), added))
            })
            .map_err(|e| StoreError::Migration {
                message: format!("{table}: {e}"),
            })?;

        match outcome {
            (true, _) => {
                info!(table, "created table");
                report.created.push(table.to_owned());
            }
            (false, added) if added.is_empty() => {
                debug!(table, "table up to date");
                report.unchanged.push(table.to_owned());
            }
            (false, added) => {
                for column in added {
                    info!(table, column = %column, "added column");
                    report.added_columns.push((table.to_owned(), column));
                }
            }
        }
    }
    Ok(report)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::schema::Column;
    use std::sync::LazyLock;

    static OWNERS: LazyLock<Schema> = LazyLock::new(|| {
        Schema::new("owners")
            .column(Column::text("id"))
            .column(Column::codec("interval", codec::DURATION).nullable())
            .column(Column::text("name").unique())
            .with_primary_key(&["id"])
    });

    static EVENTS: LazyLock<Schema> = LazyLock::new(|| {
        Schema::new("events")
            .column(Column::integer("id").auto_increment())
            .column(Column::text("owner_id").references("owners", "id"))
            .with_primary_key(&["id"])
    });

    fn spec(schema: &'static Schema) -> TableSpec {
        TableSpec {
            schema,
            foreign_keys: Vec::new(),
        }
    }

    #[test]
    fn create_uses_codec_types_and_table_key() {
        let sql = create_table_sql(&spec(&OWNERS), Dialect::Sqlite, &CodecRegistry::with_defaults())
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"owners\" (\"id\" TEXT NOT NULL, \"interval\" INTEGER, \
             \"name\" TEXT NOT NULL, PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn auto_increment_key_is_inline_on_sqlite() {
        let sql = create_table_sql(&spec(&EVENTS), Dialect::Sqlite, &CodecRegistry::with_defaults())
            .unwrap();
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(!sql.contains("PRIMARY KEY (\"id\")"));

        let pg = create_table_sql(&spec(&EVENTS), Dialect::Postgres, &CodecRegistry::with_defaults())
            .unwrap();
        assert!(pg.contains("GENERATED BY DEFAULT AS IDENTITY"));
        assert!(pg.contains("PRIMARY KEY (\"id\")"));
    }

    #[test]
    fn join_foreign_key_cascades() {
        let spec = TableSpec {
            schema: &EVENTS,
            foreign_keys: vec![ForeignKey {
                column: "owner_id",
                table: "owners",
                references: "id",
            }],
        };
        let sql = create_table_sql(&spec, Dialect::Sqlite, &CodecRegistry::with_defaults()).unwrap();
        assert!(sql.ends_with(
            "FOREIGN KEY (\"owner_id\") REFERENCES \"owners\"(\"id\") ON DELETE CASCADE)"
        ));
    }

    #[test]
    fn unknown_codec_is_config_error() {
        let err = create_table_sql(&spec(&OWNERS), Dialect::Sqlite, &CodecRegistry::empty())
            .unwrap_err();
        assert!(matches!(err, StoreError::Config(msg) if msg.contains("unregistered codec duration")));
    }

    #[test]
    fn unique_index_name() {
        assert_eq!(
            unique_index_sql("owners", "name"),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"ux_owners_name\" ON \"owners\" (\"name\")"
        );
    }

    static OWNERS_V2: LazyLock<Schema> = LazyLock::new(|| {
        Schema::new("owners")
            .column(Column::text("id"))
            .column(Column::codec("interval", codec::DURATION).nullable())
            .column(Column::text("name").unique())
            .column(Column::text("region"))
            .with_primary_key(&["id"])
    });

    fn backend() -> Backend {
        let sqlite = crate::backend::sqlite::SqliteBackend::open_ephemeral(
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        Backend::Sqlite(sqlite)
    }

    #[test]
    fn second_run_is_a_no_op() {
        let backend = backend();
        let codecs = CodecRegistry::with_defaults();
        let first = run(&backend, &[spec(&OWNERS)], &codecs).unwrap();
        assert_eq!(first.created, vec!["owners"]);
        let second = run(&backend, &[spec(&OWNERS)], &codecs).unwrap();
        assert_eq!(second.unchanged, vec!["owners"]);
        assert!(second.created.is_empty());
    }

    #[test]
    fn new_columns_are_added_nullable() {
        let backend = backend();
        let codecs = CodecRegistry::with_defaults();
        let _ = run(&backend, &[spec(&OWNERS)], &codecs).unwrap();
        backend
            .transact(Operation::Raw, &Interrupt::none(), |s| {
                let _ = s.execute("INSERT INTO owners (id, name) VALUES ('o1', 'first')", &[])?;
                Ok(())
            })
            .unwrap();

        let report = run(&backend, &[spec(&OWNERS_V2)], &codecs).unwrap();
        assert_eq!(
            report.added_columns,
            vec![("owners".to_owned(), "region".to_owned())]
        );
        let rows = backend
            .transact(Operation::Raw, &Interrupt::none(), |s| {
                Ok(s.query("SELECT region FROM owners", &[])?)
            })
            .unwrap();
        assert_eq!(rows.values, vec![vec![crate::value::SqlValue::Null]]);
    }

    #[test]
    fn unique_indexes_are_enforced() {
        let backend = backend();
        let _ = run(&backend, &[spec(&OWNERS)], &CodecRegistry::with_defaults()).unwrap();
        let err = backend
            .transact(Operation::Raw, &Interrupt::none(), |s| {
                let _ = s.execute("INSERT INTO owners (id, name) VALUES ('o1', 'same')", &[])?;
                let _ = s.execute("INSERT INTO owners (id, name) VALUES ('o2', 'same')", &[])?;
                Ok(())
            })
            .unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));
    }

    #[test]
    fn failures_name_the_table() {
        let backend = backend();
        let err = run(&backend, &[spec(&OWNERS)], &CodecRegistry::empty()).unwrap_err();
        assert!(matches!(err, StoreError::Migration { message } if message.starts_with("owners:")));
    }

    #[test]
    fn plan_keeps_registration_order() {
        let specs = plan(&[&OWNERS, &EVENTS], &JoinRegistry::default()).unwrap();
        let tables: Vec<_> = specs.iter().map(|s| s.schema.table()).collect();
        assert_eq!(tables, vec!["owners", "events"]);
    }
}
