#![allow(dead_code, missing_docs)]

use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use vigil_store::codec::{ANY, DURATION, TIMESTAMP, VALUE};
use vigil_store::testing::new_in_memory_store;
use vigil_store::{AnyPayload, Column, Entity, Record, Result, Schema, Store};

static WIDGETS: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("widgets")
        .column(Column::text("id"))
        .column(Column::text("name").unique())
        .column(Column::integer("weight"))
        .column(Column::codec("interval", DURATION).nullable())
        .column(Column::codec("seen_at", TIMESTAMP).nullable())
        .column(Column::codec("attributes", VALUE).nullable())
        .column(Column::codec("payload", ANY).nullable())
        .with_primary_key(&["id"])
        .with_association("parts")
});

static PARTS: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("widget_parts")
        .column(Column::text("widget_id"))
        .column(Column::text("part_id"))
        .column(Column::integer("quantity"))
        .column(Column::text("note").nullable())
        .with_primary_key(&["widget_id", "part_id"])
});

static EVENTS: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("events")
        .column(Column::integer("id").auto_increment())
        .column(Column::text("kind"))
        .column(Column::text("widget_id").nullable().references("widgets", "id"))
        .with_primary_key(&["id"])
});

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Widget {
    pub id: String,
    pub name: String,
    pub weight: i64,
    pub interval: Option<TimeDelta>,
    pub seen_at: Option<DateTime<Utc>>,
    pub attributes: Option<serde_json::Value>,
    pub payload: Option<AnyPayload>,
    /// `None` when not loaded.
    pub parts: Option<Vec<Part>>,
}

impl Widget {
    pub fn new(id: &str, name: &str, weight: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
            ..Self::default()
        }
    }

    pub fn with_parts(mut self, parts: Vec<Part>) -> Self {
        self.parts = Some(parts);
        self
    }
}

impl Entity for Widget {
    fn schema() -> &'static Schema {
        &WIDGETS
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
            .with("weight", self.weight)
            .with("interval", self.interval)
            .with("seen_at", self.seen_at)
            .with("attributes", self.attributes.clone())
            .with("payload", self.payload.clone())
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            id: record.take_text("id")?,
            name: record.take_text("name")?,
            weight: record.take_i64("weight")?,
            interval: record.take_opt_duration("interval")?,
            seen_at: record.take_opt_timestamp("seen_at")?,
            attributes: record.take_opt_json("attributes")?,
            payload: record.take_opt_any("payload")?,
            parts: None,
        })
    }

    fn links(&self, field: &str) -> Option<Vec<Record>> {
        match field {
            "parts" => self
                .parts
                .as_ref()
                .map(|parts| parts.iter().map(Part::to_record).collect()),
            _ => None,
        }
    }

    fn set_links(&mut self, field: &str, links: Vec<Record>) -> Result<()> {
        if field == "parts" {
            self.parts = Some(
                links
                    .into_iter()
                    .map(Part::from_record)
                    .collect::<Result<_>>()?,
            );
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Part {
    pub widget_id: String,
    pub part_id: String,
    pub quantity: i64,
    pub note: Option<String>,
}

impl Part {
    pub fn new(part_id: &str, quantity: i64, note: Option<&str>) -> Self {
        Self {
            widget_id: String::new(),
            part_id: part_id.into(),
            quantity,
            note: note.map(str::to_owned),
        }
    }
}

impl Entity for Part {
    fn schema() -> &'static Schema {
        &PARTS
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("widget_id", self.widget_id.as_str())
            .with("part_id", self.part_id.as_str())
            .with("quantity", self.quantity)
            .with("note", self.note.clone())
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            widget_id: record.take_text("widget_id")?,
            part_id: record.take_text("part_id")?,
            quantity: record.take_i64("quantity")?,
            note: record.take_opt_text("note")?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Event {
    pub id: i64,
    pub kind: String,
    pub widget_id: Option<String>,
}

impl Event {
    pub fn new(kind: &str, widget_id: Option<&str>) -> Self {
        Self {
            id: 0,
            kind: kind.into(),
            widget_id: widget_id.map(str::to_owned),
        }
    }
}

impl Entity for Event {
    fn schema() -> &'static Schema {
        &EVENTS
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("kind", self.kind.as_str())
            .with("widget_id", self.widget_id.clone())
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            id: record.take_i64("id")?,
            kind: record.take_text("kind")?,
            widget_id: record.take_opt_text("widget_id")?,
        })
    }
}

/// A fresh store with widgets, their parts, and events registered.
pub fn widget_store() -> Store {
    new_in_memory_store(|builder| {
        builder
            .entity::<Widget>()
            .entity::<Event>()
            .join::<Widget, Part>("parts", "widget_id")
    })
    .unwrap()
}
