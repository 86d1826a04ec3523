//! Control catalogs and their controls.

use std::sync::LazyLock;

use vigil_store::{Column, Entity, Record, Result, Schema};

static CATALOGS: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("catalogs")
        .column(Column::text("id"))
        .column(Column::text("name"))
        .column(Column::text("description").nullable())
        .column(Column::text("short_name").nullable())
        .column(Column::boolean("all_in_scope"))
        .with_primary_key(&["id"])
});

static CONTROLS: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("controls")
        .column(Column::text("catalog_id").references("catalogs", "id"))
        .column(Column::text("id"))
        .column(Column::text("category_name"))
        .column(Column::text("name"))
        .column(Column::text("description").nullable())
        .column(Column::text("parent_control_id").nullable())
        .column(Column::text("assurance_level").nullable())
        .with_primary_key(&["catalog_id", "id"])
});

/// A named set of controls, e.g. a certification scheme.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    /// Catalog identifier, e.g. `EUCS`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Abbreviated name.
    pub short_name: Option<String>,
    /// Every control applies to every target, so audit scopes need not
    /// select controls.
    pub all_in_scope: bool,
}

impl Entity for Catalog {
    fn schema() -> &'static Schema {
        &CATALOGS
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
            .with("description", self.description.clone())
            .with("short_name", self.short_name.clone())
            .with("all_in_scope", self.all_in_scope)
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            id: record.take_text("id")?,
            name: record.take_text("name")?,
            description: record.take_opt_text("description")?,
            short_name: record.take_opt_text("short_name")?,
            all_in_scope: record.take_bool("all_in_scope")?,
        })
    }
}

/// One requirement of a catalog. Controls may nest through
/// `parent_control_id`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Control {
    /// Owning catalog.
    pub catalog_id: String,
    /// Identifier within the catalog.
    pub id: String,
    /// Category the control is grouped under.
    pub category_name: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Enclosing control, for sub-controls.
    pub parent_control_id: Option<String>,
    /// Lowest assurance level the control applies at.
    pub assurance_level: Option<String>,
}

impl Entity for Control {
    fn schema() -> &'static Schema {
        &CONTROLS
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("catalog_id", self.catalog_id.as_str())
            .with("id", self.id.as_str())
            .with("category_name", self.category_name.as_str())
            .with("name", self.name.as_str())
            .with("description", self.description.clone())
            .with("parent_control_id", self.parent_control_id.clone())
            .with("assurance_level", self.assurance_level.clone())
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            catalog_id: record.take_text("catalog_id")?,
            id: record.take_text("id")?,
            category_name: record.take_text("category_name")?,
            name: record.take_text("name")?,
            description: record.take_opt_text("description")?,
            parent_control_id: record.take_opt_text("parent_control_id")?,
            assurance_level: record.take_opt_text("assurance_level")?,
        })
    }
}
