//! Metrics and per-target metric configurations.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use vigil_store::codec::{DURATION, TIMESTAMP, VALUE};
use vigil_store::{Column, Condition, Database, Entity, Preload, Record, Result, Schema, StoreError};

static METRICS: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("metrics")
        .column(Column::text("id"))
        .column(Column::text("name"))
        .column(Column::text("description").nullable())
        .column(Column::text("category").nullable())
        .column(Column::text("version").nullable())
        .column(Column::text("comments").nullable())
        .column(Column::codec("interval", DURATION).nullable())
        .column(Column::codec("deprecated_since", TIMESTAMP).nullable())
        .with_primary_key(&["id"])
});

static METRIC_CONFIGURATIONS: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("metric_configurations")
        .column(Column::text("target_of_evaluation_id"))
        .column(Column::text("metric_id").references("metrics", "id"))
        .column(Column::text("operator"))
        .column(Column::codec("target_value", VALUE).nullable())
        .column(Column::boolean("is_default"))
        .column(Column::codec("updated_at", TIMESTAMP).nullable())
        .with_primary_key(&["target_of_evaluation_id", "metric_id"])
});

/// A measurable property of a resource.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metric {
    /// Metric identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Grouping, e.g. `Encryption`.
    pub category: Option<String>,
    /// Version of the metric definition.
    pub version: Option<String>,
    /// Reviewer notes.
    pub comments: Option<String>,
    /// How often the metric should be evaluated.
    pub interval: Option<TimeDelta>,
    /// When the metric was retired, if it was.
    pub deprecated_since: Option<DateTime<Utc>>,
}

impl Entity for Metric {
    fn schema() -> &'static Schema {
        &METRICS
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
            .with("description", self.description.clone())
            .with("category", self.category.clone())
            .with("version", self.version.clone())
            .with("comments", self.comments.clone())
            .with("interval", self.interval)
            .with("deprecated_since", self.deprecated_since)
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            id: record.take_text("id")?,
            name: record.take_text("name")?,
            description: record.take_opt_text("description")?,
            category: record.take_opt_text("category")?,
            version: record.take_opt_text("version")?,
            comments: record.take_opt_text("comments")?,
            interval: record.take_opt_duration("interval")?,
            deprecated_since: record.take_opt_timestamp("deprecated_since")?,
        })
    }
}

/// How one metric is judged for one target of evaluation: a comparison
/// `operator` against `target_value`.
///
/// Rows of this table realize the `configured_metrics` association of a
/// [`TargetOfEvaluation`](crate::TargetOfEvaluation).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricConfiguration {
    /// Target the configuration applies to.
    pub target_of_evaluation_id: String,
    /// Configured metric.
    pub metric_id: String,
    /// Comparison operator, e.g. `==` or `<=`.
    pub operator: String,
    /// Value the measured property is compared with.
    pub target_value: Option<serde_json::Value>,
    /// Copied from the metric's defaults rather than set for this target.
    pub is_default: bool,
    /// Last change.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for MetricConfiguration {
    fn schema() -> &'static Schema {
        &METRIC_CONFIGURATIONS
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("target_of_evaluation_id", self.target_of_evaluation_id.as_str())
            .with("metric_id", self.metric_id.as_str())
            .with("operator", self.operator.as_str())
            .with("target_value", self.target_value.clone())
            .with("is_default", self.is_default)
            .with("updated_at", self.updated_at)
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            target_of_evaluation_id: record.take_text("target_of_evaluation_id")?,
            metric_id: record.take_text("metric_id")?,
            operator: record.take_text("operator")?,
            target_value: record.take_opt_json("target_value")?,
            is_default: record.take_bool("is_default")?,
            updated_at: record.take_opt_timestamp("updated_at")?,
        })
    }
}

/// Default configurations, keyed by metric id.
pub type DefaultConfigurations = HashMap<String, MetricConfiguration>;

/// The configuration of `metric_id` for a target, or a copy of the metric's
/// default marked `is_default` when the target has none stored.
///
/// Fails with [`StoreError::RecordNotFound`] when neither exists.
pub fn metric_configuration_or_default(
    db: &impl Database,
    target_of_evaluation_id: &str,
    metric_id: &str,
    defaults: &DefaultConfigurations,
) -> Result<MetricConfiguration> {
    let stored = db.get::<MetricConfiguration>(
        &Condition::filter(
            "target_of_evaluation_id = ? AND metric_id = ?",
            [target_of_evaluation_id, metric_id],
        ),
        &Preload::None,
    );
    match stored {
        Err(StoreError::RecordNotFound) => {
            let default = defaults.get(metric_id).ok_or(StoreError::RecordNotFound)?;
            debug!(target_of_evaluation_id, metric_id, "using default metric configuration");
            Ok(MetricConfiguration {
                target_of_evaluation_id: target_of_evaluation_id.to_owned(),
                metric_id: metric_id.to_owned(),
                operator: default.operator.clone(),
                target_value: default.target_value.clone(),
                is_default: true,
                updated_at: None,
            })
        }
        other => other,
    }
}
