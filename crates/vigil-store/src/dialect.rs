//! SQL text differences between backends.

use crate::schema::{Column, SqlType};

/// The SQL flavor a backend speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// `SQLite`: `?` placeholders, text instants, `AUTOINCREMENT`.
    Sqlite,
    /// `PostgreSQL`: `$n` placeholders, native instants, identity columns.
    Postgres,
}

/// Quote an identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Visit every `?` placeholder outside string literals and quoted
/// identifiers, handing the callback its byte offset.
fn scan_placeholders(sql: &str, mut on_placeholder: impl FnMut(usize)) {
    let mut quote: Option<char> = None;
    for (i, ch) in sql.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '?') => on_placeholder(i),
            (None, _) => {}
        }
    }
}

/// Number of `?` placeholders in a statement.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan_placeholders(sql, |_| count += 1);
    count
}

impl Dialect {
    /// Rewrite `?` placeholders into the dialect's native form.
    pub fn rewrite(self, sql: &str) -> String {
        match self {
            Self::Sqlite => sql.to_owned(),
            Self::Postgres => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut last = 0;
                let mut n = 0;
                scan_placeholders(sql, |i| {
                    n += 1;
                    out.push_str(&sql[last..i]);
                    out.push('$');
                    out.push_str(&n.to_string());
                    last = i + 1;
                });
                out.push_str(&sql[last..]);
                out
            }
        }
    }

    /// Column type keyword.
    pub fn type_name(self, ty: SqlType) -> &'static str {
        match (self, ty) {
            (Self::Sqlite, SqlType::Integer) => "INTEGER",
            (Self::Sqlite, SqlType::Real) => "REAL",
            (Self::Sqlite | Self::Postgres, SqlType::Text) => "TEXT",
            (Self::Sqlite, SqlType::Blob) => "BLOB",
            (Self::Sqlite | Self::Postgres, SqlType::Boolean) => "BOOLEAN",
            // Stored as fixed-width RFC 3339 text.
            (Self::Sqlite, SqlType::Timestamp) => "TEXT",
            (Self::Postgres, SqlType::Integer) => "BIGINT",
            (Self::Postgres, SqlType::Real) => "DOUBLE PRECISION",
            (Self::Postgres, SqlType::Blob) => "BYTEA",
            (Self::Postgres, SqlType::Timestamp) => "TIMESTAMPTZ",
        }
    }

    /// Whether an auto-increment key must be declared inline as the
    /// primary key rather than in a table constraint.
    pub fn inline_auto_key(self) -> bool {
        matches!(self, Self::Sqlite)
    }

    /// Column definition for `CREATE TABLE`.
    pub fn column_def(self, column: &Column, ty: SqlType) -> String {
        let mut def = format!("{} ", quote(column.name));
        if column.auto_increment {
            match self {
                Self::Sqlite => def.push_str("INTEGER PRIMARY KEY AUTOINCREMENT"),
                Self::Postgres => def.push_str("BIGINT GENERATED BY DEFAULT AS IDENTITY"),
            }
            return def;
        }
        def.push_str(self.type_name(ty));
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(reference) = column.references {
            def.push_str(&format!(
                " REFERENCES {}({})",
                quote(reference.table),
                quote(reference.column)
            ));
        }
        def
    }

    /// Column definition for `ALTER TABLE ... ADD COLUMN`. Added columns
    /// are always nullable so existing rows stay valid.
    pub fn added_column_def(self, column: &Column, ty: SqlType) -> String {
        let relaxed = Column {
            nullable: true,
            ..column.clone()
        };
        self.column_def(&relaxed, ty)
    }

    /// `LIMIT`/`OFFSET` clause, empty when neither applies.
    pub fn limit_clause(self, offset: u64, limit: Option<u64>) -> String {
        match (limit, offset, self) {
            (None, 0, _) => String::new(),
            (Some(limit), 0, _) => format!(" LIMIT {limit}"),
            (Some(limit), offset, _) => format!(" LIMIT {limit} OFFSET {offset}"),
            // SQLite only accepts OFFSET after a LIMIT; -1 is unbounded.
            (None, offset, Self::Sqlite) => format!(" LIMIT -1 OFFSET {offset}"),
            (None, offset, Self::Postgres) => format!(" OFFSET {offset}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_embedded_quotes() {
        assert_eq!(quote("id"), "\"id\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn placeholders_inside_literals_ignored() {
        assert_eq!(count_placeholders("a = ? AND b = '?' AND \"c?\" = ?"), 2);
        assert_eq!(count_placeholders("no params"), 0);
    }

    #[test]
    fn postgres_rewrite_numbers_in_order() {
        let sql = "SELECT * FROM t WHERE a = ? AND b IN (?, ?) AND c = 'what?'";
        assert_eq!(
            Dialect::Postgres.rewrite(sql),
            "SELECT * FROM t WHERE a = $1 AND b IN ($2, $3) AND c = 'what?'"
        );
        assert_eq!(Dialect::Sqlite.rewrite(sql), sql);
    }

    #[test]
    fn escaped_quote_inside_literal() {
        assert_eq!(count_placeholders("x = 'it''s ?' AND y = ?"), 1);
    }

    #[test]
    fn column_defs() {
        let id = Column::integer("id").auto_increment();
        assert_eq!(
            Dialect::Sqlite.column_def(&id, SqlType::Integer),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(
            Dialect::Postgres.column_def(&id, SqlType::Integer),
            "\"id\" BIGINT GENERATED BY DEFAULT AS IDENTITY"
        );

        let metric = Column::text("metric_id").references("metrics", "id");
        assert_eq!(
            Dialect::Sqlite.column_def(&metric, SqlType::Text),
            "\"metric_id\" TEXT NOT NULL REFERENCES \"metrics\"(\"id\")"
        );
        assert_eq!(
            Dialect::Sqlite.added_column_def(&metric, SqlType::Text),
            "\"metric_id\" TEXT REFERENCES \"metrics\"(\"id\")"
        );
    }

    #[test]
    fn timestamp_type_per_dialect() {
        assert_eq!(Dialect::Sqlite.type_name(SqlType::Timestamp), "TEXT");
        assert_eq!(Dialect::Postgres.type_name(SqlType::Timestamp), "TIMESTAMPTZ");
    }

    #[test]
    fn limit_clauses() {
        assert_eq!(Dialect::Sqlite.limit_clause(0, None), "");
        assert_eq!(Dialect::Sqlite.limit_clause(0, Some(5)), " LIMIT 5");
        assert_eq!(Dialect::Sqlite.limit_clause(10, Some(5)), " LIMIT 5 OFFSET 10");
        assert_eq!(Dialect::Sqlite.limit_clause(10, None), " LIMIT -1 OFFSET 10");
        assert_eq!(Dialect::Postgres.limit_clause(10, None), " OFFSET 10");
    }
}
