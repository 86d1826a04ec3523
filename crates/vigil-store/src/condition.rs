//! Filters, preload directives, and list options.
//!
//! Every read and write names its filter explicitly with a [`Condition`]
//! variant; there is no inference from argument count.

use crate::dialect::{count_placeholders, quote};
use crate::errors::{Result, StoreError};
use crate::schema::Schema;
use crate::value::SqlValue;

/// Which rows an operation applies to.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Condition {
    /// No filter.
    #[default]
    None,
    /// Match the primary key, one value per key column in key order.
    PrimaryKey(Vec<SqlValue>),
    /// A predicate template with `?` placeholders and its positional
    /// arguments.
    Predicate {
        /// `WHERE`-clause fragment, e.g. `"id = ? AND tag IS NULL"`.
        template: String,
        /// One value per placeholder.
        args: Vec<SqlValue>,
    },
}

impl Condition {
    /// Match a single-column primary key.
    pub fn by_key(value: impl Into<SqlValue>) -> Self {
        Self::PrimaryKey(vec![value.into()])
    }

    /// Match a predicate template.
    pub fn filter<A: Into<SqlValue>>(
        template: impl Into<String>,
        args: impl IntoIterator<Item = A>,
    ) -> Self {
        Self::Predicate {
            template: template.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this is [`Condition::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Render the condition against `schema` as a `WHERE` fragment (without
    /// the keyword) and its arguments. `None` yields `None`.
    pub fn to_sql(&self, schema: &Schema) -> Result<Option<(String, Vec<SqlValue>)>> {
        match self {
            Self::None => Ok(None),
            Self::PrimaryKey(values) => {
                let key = schema.primary_key();
                if values.len() != key.len() {
                    return Err(StoreError::InvalidQuery(format!(
                        "{} has a {}-column primary key, got {} value(s)",
                        schema.table(),
                        key.len(),
                        values.len()
                    )));
                }
                let clause = key
                    .iter()
                    .map(|col| format!("{} = ?", quote(col)))
                    .collect::<Vec<_>>()
                    .join(" AND ");
                Ok(Some((clause, values.clone())))
            }
            Self::Predicate { template, args } => {
                if template.trim().is_empty() {
                    return Err(StoreError::InvalidQuery("empty predicate".into()));
                }
                let expected = count_placeholders(template);
                if expected != args.len() {
                    return Err(StoreError::InvalidQuery(format!(
                        "predicate {template:?} has {expected} placeholder(s), got {} argument(s)",
                        args.len()
                    )));
                }
                Ok(Some((format!("({template})"), args.clone())))
            }
        }
    }
}

/// Whether and how associations are loaded on reads.
///
/// Every read names its preload policy; there is no implicit default.
#[derive(Clone, Debug, PartialEq)]
pub enum Preload {
    /// Load every declared association.
    All,
    /// Load nothing.
    None,
    /// Load one association, filtering its link rows.
    Only {
        /// Association field on the owner.
        field: String,
        /// Additional filter on the link table.
        condition: Condition,
    },
}

impl Preload {
    /// Load one association in full.
    pub fn only(field: impl Into<String>) -> Self {
        Self::Only {
            field: field.into(),
            condition: Condition::None,
        }
    }
}

/// Ordering and pagination for list operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListOptions {
    /// Column to sort by. `None` leaves the order to the backend.
    pub order_by: Option<String>,
    /// Sort direction.
    pub ascending: bool,
    /// Rows to skip.
    pub offset: u64,
    /// Maximum rows to return. `None` is unbounded.
    pub limit: Option<u64>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            order_by: None,
            ascending: true,
            offset: 0,
            limit: None,
        }
    }
}

impl ListOptions {
    /// Sort ascending by `column`.
    pub fn ordered_by(column: impl Into<String>) -> Self {
        Self {
            order_by: Some(column.into()),
            ..Self::default()
        }
    }

    /// Sort descending.
    #[must_use]
    pub fn desc(mut self) -> Self {
        self.ascending = false;
        self
    }

    /// Skip `offset` rows.
    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Return at most `limit` rows.
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// `ORDER BY` clause, validated against `schema`.
    pub(crate) fn order_clause(&self, schema: &Schema) -> Result<String> {
        let Some(column) = &self.order_by else {
            return Ok(String::new());
        };
        if schema.column_named(column).is_none() {
            return Err(StoreError::InvalidQuery(format!(
                "cannot order {} by unknown column {column}",
                schema.table()
            )));
        }
        let direction = if self.ascending { "ASC" } else { "DESC" };
        Ok(format!(" ORDER BY {} {direction}", quote(column)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use assert_matches::assert_matches;

    fn schema() -> Schema {
        Schema::new("metric_configurations")
            .column(Column::text("target_of_evaluation_id"))
            .column(Column::text("metric_id"))
            .column(Column::text("operator"))
            .with_primary_key(&["target_of_evaluation_id", "metric_id"])
    }

    #[test]
    fn none_renders_nothing() {
        assert_eq!(Condition::None.to_sql(&schema()).unwrap(), None);
        assert!(Condition::default().is_none());
    }

    #[test]
    fn composite_key_renders_each_column() {
        let cond = Condition::PrimaryKey(vec!["toe-1".into(), "m-1".into()]);
        let (clause, args) = cond.to_sql(&schema()).unwrap().unwrap();
        assert_eq!(
            clause,
            "\"target_of_evaluation_id\" = ? AND \"metric_id\" = ?"
        );
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn key_arity_mismatch_is_invalid() {
        assert_matches!(
            Condition::by_key("toe-1").to_sql(&schema()),
            Err(StoreError::InvalidQuery(_))
        );
    }

    #[test]
    fn predicate_is_parenthesized() {
        let cond = Condition::filter("operator = ? OR operator = ?", ["<", ">"]);
        let (clause, args) = cond.to_sql(&schema()).unwrap().unwrap();
        assert_eq!(clause, "(operator = ? OR operator = ?)");
        assert_eq!(args, vec![SqlValue::from("<"), SqlValue::from(">")]);
    }

    #[test]
    fn predicate_argument_count_checked() {
        let cond = Condition::filter("metric_id = ?", Vec::<SqlValue>::new());
        assert_matches!(cond.to_sql(&schema()), Err(StoreError::InvalidQuery(msg)) if msg.contains("1 placeholder"));
    }

    #[test]
    fn empty_predicate_rejected() {
        let cond = Condition::filter("  ", Vec::<SqlValue>::new());
        assert_matches!(cond.to_sql(&schema()), Err(StoreError::InvalidQuery(_)));
    }

    #[test]
    fn order_clause_validates_column() {
        let opts = ListOptions::ordered_by("metric_id").desc();
        assert_eq!(
            opts.order_clause(&schema()).unwrap(),
            " ORDER BY \"metric_id\" DESC"
        );
        assert_matches!(
            ListOptions::ordered_by("1; DROP TABLE x").order_clause(&schema()),
            Err(StoreError::InvalidQuery(_))
        );
        assert_eq!(ListOptions::default().order_clause(&schema()).unwrap(), "");
    }

    #[test]
    fn list_options_builders() {
        let opts = ListOptions::ordered_by("id").with_offset(20).with_limit(10);
        assert!(opts.ascending);
        assert_eq!(opts.offset, 20);
        assert_eq!(opts.limit, Some(10));
        assert_eq!(ListOptions::default().limit, None);
    }
}
