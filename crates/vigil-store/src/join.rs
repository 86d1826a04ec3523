//! Join tables: many-to-many links that carry attributes.
//!
//! A [`JoinTable`] ties an association field on an owner entity to a link
//! entity whose table holds the owner's key plus any number of attribute
//! columns. Declarations must reach the store before migration, since the
//! link table's foreign key to the owner is created with it.

use crate::errors::{Result, StoreError};
use crate::schema::{ColumnKind, Entity, Schema, SqlType};

/// A validated join declaration.
#[derive(Clone, Debug)]
pub struct JoinTable {
    owner: &'static Schema,
    field: &'static str,
    link: &'static Schema,
    owner_key: &'static str,
}

impl JoinTable {
    /// Declare that `Owner.field` is realized by rows of `Link`, joined on
    /// `Link.owner_key = Owner.<primary key>`.
    ///
    /// The owner must declare the association and have a single-column text
    /// or integer key. The link's primary key must either be composite and
    /// include `owner_key`, or be a single auto-increment surrogate.
    pub fn new<Owner: Entity, Link: Entity>(
        field: &'static str,
        owner_key: &'static str,
    ) -> Result<Self> {
        let owner = Owner::schema();
        let link = Link::schema();

        if !owner.associations().contains(&field) {
            return Err(StoreError::Config(format!(
                "{} does not declare an association named {field}",
                owner.table()
            )));
        }
        let [owner_pk] = owner.primary_key() else {
            return Err(StoreError::Config(format!(
                "join owner {} must have a single-column primary key",
                owner.table()
            )));
        };
        let owner_pk_kind = owner.column_named(owner_pk).map(|c| c.kind);
        if !matches!(
            owner_pk_kind,
            Some(ColumnKind::Plain(SqlType::Text | SqlType::Integer))
        ) {
            return Err(StoreError::Config(format!(
                "join owner key {}.{owner_pk} must be a plain text or integer column",
                owner.table()
            )));
        }
        if link.column_named(owner_key).is_none() {
            return Err(StoreError::Config(format!(
                "link table {} has no column {owner_key}",
                link.table()
            )));
        }

        let link_key = link.primary_key();
        let composite = link_key.len() > 1 && link_key.contains(&owner_key);
        let surrogate = matches!(link_key, [only] if link.column_named(only).is_some_and(|c| c.auto_increment));
        if !composite && !surrogate {
            return Err(StoreError::Config(format!(
                "link table {} needs a composite primary key including {owner_key} or an auto-increment surrogate key",
                link.table()
            )));
        }

        Ok(Self {
            owner,
            field,
            link,
            owner_key,
        })
    }

    /// Owner schema.
    pub fn owner(&self) -> &'static Schema {
        self.owner
    }

    /// Association field on the owner.
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Link schema.
    pub fn link(&self) -> &'static Schema {
        self.link
    }

    /// Column of the link table holding the owner's key.
    pub fn owner_key(&self) -> &'static str {
        self.owner_key
    }

    /// The owner's primary key column.
    pub fn owner_pk(&self) -> &'static str {
        // Single-column key checked in `new`.
        self.owner.primary_key()[0]
    }
}

/// Join declarations known to one store.
#[derive(Clone, Debug, Default)]
pub struct JoinRegistry {
    joins: Vec<JoinTable>,
}

impl JoinRegistry {
    /// Add a declaration. Redeclaring an owner field is an error.
    pub fn add(&mut self, join: JoinTable) -> Result<()> {
        if self.find(join.owner.table(), join.field).is_some() {
            return Err(StoreError::Config(format!(
                "join for {}.{} declared twice",
                join.owner.table(),
                join.field
            )));
        }
        self.joins.push(join);
        Ok(())
    }

    /// The declaration for `owner_table.field`.
    pub fn find(&self, owner_table: &str, field: &str) -> Option<&JoinTable> {
        self.joins
            .iter()
            .find(|j| j.owner.table() == owner_table && j.field == field)
    }

    /// Every declaration owned by `owner_table`.
    pub fn for_owner<'a>(&'a self, owner_table: &'a str) -> impl Iterator<Item = &'a JoinTable> {
        self.joins.iter().filter(move |j| j.owner.table() == owner_table)
    }

    /// Whether `table` is the link side of any declaration.
    pub fn is_link(&self, table: &str) -> bool {
        self.joins.iter().any(|j| j.link.table() == table)
    }

    /// All declarations.
    pub fn iter(&self) -> impl Iterator<Item = &JoinTable> {
        self.joins.iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Record};
    use assert_matches::assert_matches;
    use std::sync::LazyLock;

    macro_rules! entity {
        ($name:ident, $schema:expr) => {
            struct $name;
            impl Entity for $name {
                fn schema() -> &'static Schema {
                    static SCHEMA: LazyLock<Schema> = LazyLock::new(|| $schema);
                    &SCHEMA
                }
                fn to_record(&self) -> Record {
                    Record::new()
                }
                fn from_record(_: Record) -> Result<Self> {
                    Ok($name)
                }
            }
        };
    }

    entity!(
        Owner,
        Schema::new("owners")
            .column(Column::text("id"))
            .with_primary_key(&["id"])
            .with_association("links")
    );
    entity!(
        CompositeLink,
        Schema::new("links")
            .column(Column::text("owner_id"))
            .column(Column::text("target_id"))
            .column(Column::text("note").nullable())
            .with_primary_key(&["owner_id", "target_id"])
    );
    entity!(
        SurrogateLink,
        Schema::new("surrogate_links")
            .column(Column::integer("id").auto_increment())
            .column(Column::text("owner_id"))
            .with_primary_key(&["id"])
    );
    entity!(
        NaturalLink,
        Schema::new("natural_links")
            .column(Column::text("owner_id"))
            .with_primary_key(&["owner_id"])
    );
    entity!(
        CompositeOwner,
        Schema::new("composite_owners")
            .column(Column::text("a"))
            .column(Column::text("b"))
            .with_primary_key(&["a", "b"])
            .with_association("links")
    );

    #[test]
    fn composite_link_accepted() {
        let join = JoinTable::new::<Owner, CompositeLink>("links", "owner_id").unwrap();
        assert_eq!(join.owner().table(), "owners");
        assert_eq!(join.link().table(), "links");
        assert_eq!(join.owner_pk(), "id");
        assert_eq!(join.owner_key(), "owner_id");
    }

    #[test]
    fn surrogate_link_accepted() {
        assert!(JoinTable::new::<Owner, SurrogateLink>("links", "owner_id").is_ok());
    }

    #[test]
    fn single_natural_key_rejected() {
        assert_matches!(
            JoinTable::new::<Owner, NaturalLink>("links", "owner_id"),
            Err(StoreError::Config(msg)) if msg.contains("composite primary key")
        );
    }

    #[test]
    fn undeclared_association_rejected() {
        assert_matches!(
            JoinTable::new::<Owner, CompositeLink>("others", "owner_id"),
            Err(StoreError::Config(msg)) if msg.contains("association named others")
        );
    }

    #[test]
    fn missing_owner_key_column_rejected() {
        assert_matches!(
            JoinTable::new::<Owner, CompositeLink>("links", "parent_id"),
            Err(StoreError::Config(_))
        );
    }

    #[test]
    fn composite_owner_rejected() {
        assert_matches!(
            JoinTable::new::<CompositeOwner, CompositeLink>("links", "owner_id"),
            Err(StoreError::Config(msg)) if msg.contains("single-column")
        );
    }

    #[test]
    fn registry_lookup_and_duplicates() {
        let mut registry = JoinRegistry::default();
        registry
            .add(JoinTable::new::<Owner, CompositeLink>("links", "owner_id").unwrap())
            .unwrap();
        assert!(registry.find("owners", "links").is_some());
        assert!(registry.find("owners", "other").is_none());
        assert!(registry.is_link("links"));
        assert!(!registry.is_link("owners"));
        assert_eq!(registry.for_owner("owners").count(), 1);

        let again = JoinTable::new::<Owner, SurrogateLink>("links", "owner_id").unwrap();
        assert_matches!(registry.add(again), Err(StoreError::Config(_)));
    }
}
