//! Assessment results and the latest-result query.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use vigil_store::codec::{ANY, TIMESTAMP, VALUE};
use vigil_store::{AnyPayload, Column, Database, Entity, Record, Result, Schema, SqlValue};

static ASSESSMENT_RESULTS: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("assessment_results")
        .column(Column::text("id"))
        .column(Column::codec("created_at", TIMESTAMP))
        .column(Column::text("metric_id").references("metrics", "id"))
        .column(Column::boolean("compliant"))
        .column(Column::text("resource_id"))
        .column(
            Column::text("target_of_evaluation_id").references("targets_of_evaluation", "id"),
        )
        .column(Column::text("tool_id").nullable())
        .column(Column::text("evidence_id"))
        .column(Column::codec("resource_types", VALUE).nullable())
        .column(Column::text("compliance_comment").nullable())
        .column(Column::codec("resource", ANY).nullable())
        .with_primary_key(&["id"])
});

/// The verdict of one metric on one resource at one point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct AssessmentResult {
    /// Time-ordered UUID.
    pub id: String,
    /// When the verdict was reached.
    pub created_at: DateTime<Utc>,
    /// Metric that was evaluated.
    pub metric_id: String,
    /// Whether the resource satisfied the metric's configuration.
    pub compliant: bool,
    /// Assessed resource.
    pub resource_id: String,
    /// Target the resource belongs to.
    pub target_of_evaluation_id: String,
    /// Assessing tool, if reported.
    pub tool_id: Option<String>,
    /// Evidence the verdict is based on.
    pub evidence_id: String,
    /// Type hierarchy of the resource, most specific first.
    pub resource_types: Option<serde_json::Value>,
    /// Explanation of the verdict.
    pub compliance_comment: Option<String>,
    /// The assessed resource as reported by the collecting tool.
    pub resource: Option<AnyPayload>,
}

impl AssessmentResult {
    /// A new result with a time-ordered id, stamped now.
    pub fn new(
        target_of_evaluation_id: impl Into<String>,
        metric_id: impl Into<String>,
        resource_id: impl Into<String>,
        evidence_id: impl Into<String>,
        compliant: bool,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            created_at: Utc::now(),
            metric_id: metric_id.into(),
            compliant,
            resource_id: resource_id.into(),
            target_of_evaluation_id: target_of_evaluation_id.into(),
            tool_id: None,
            evidence_id: evidence_id.into(),
            resource_types: None,
            compliance_comment: None,
            resource: None,
        }
    }
}

impl Entity for AssessmentResult {
    fn schema() -> &'static Schema {
        &ASSESSMENT_RESULTS
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id.as_str())
            .with("created_at", self.created_at)
            .with("metric_id", self.metric_id.as_str())
            .with("compliant", self.compliant)
            .with("resource_id", self.resource_id.as_str())
            .with("target_of_evaluation_id", self.target_of_evaluation_id.as_str())
            .with("tool_id", self.tool_id.clone())
            .with("evidence_id", self.evidence_id.as_str())
            .with("resource_types", self.resource_types.clone())
            .with("compliance_comment", self.compliance_comment.clone())
            .with("resource", self.resource.clone())
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            id: record.take_text("id")?,
            created_at: record.take_timestamp("created_at")?,
            metric_id: record.take_text("metric_id")?,
            compliant: record.take_bool("compliant")?,
            resource_id: record.take_text("resource_id")?,
            target_of_evaluation_id: record.take_text("target_of_evaluation_id")?,
            tool_id: record.take_opt_text("tool_id")?,
            evidence_id: record.take_text("evidence_id")?,
            resource_types: record.take_opt_json("resource_types")?,
            compliance_comment: record.take_opt_text("compliance_comment")?,
            resource: record.take_opt_any("resource")?,
        })
    }
}

/// Narrows [`latest_assessment_results`]. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssessmentFilter {
    /// Only results for this target.
    pub target_of_evaluation_id: Option<String>,
    /// Only compliant or only non-compliant results.
    pub compliant: Option<bool>,
    /// Only results for this metric.
    pub metric_id: Option<String>,
    /// Only results from this tool.
    pub tool_id: Option<String>,
    /// Restrict to these result ids. An empty list matches nothing.
    pub ids: Option<Vec<String>>,
}

impl AssessmentFilter {
    fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if let Some(toe) = &self.target_of_evaluation_id {
            clauses.push("target_of_evaluation_id = ?".to_owned());
            args.push(SqlValue::from(toe.as_str()));
        }
        if let Some(compliant) = self.compliant {
            clauses.push("compliant = ?".to_owned());
            args.push(SqlValue::Bool(compliant));
        }
        if let Some(metric) = &self.metric_id {
            clauses.push("metric_id = ?".to_owned());
            args.push(SqlValue::from(metric.as_str()));
        }
        if let Some(tool) = &self.tool_id {
            clauses.push("tool_id = ?".to_owned());
            args.push(SqlValue::from(tool.as_str()));
        }
        match self.ids.as_deref() {
            Some([]) => clauses.push("1 = 0".to_owned()),
            Some(ids) => {
                clauses.push(format!("id IN ({})", vec!["?"; ids.len()].join(", ")));
                args.extend(ids.iter().map(|id| SqlValue::from(id.as_str())));
            }
            None => {}
        }
        if clauses.is_empty() {
            (String::new(), args)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), args)
        }
    }
}

/// The most recent result per `(resource_id, metric_id)` among the results
/// matching `filter`, ordered by resource then metric.
pub fn latest_assessment_results(
    db: &impl Database,
    filter: &AssessmentFilter,
) -> Result<Vec<AssessmentResult>> {
    let (where_clause, args) = filter.to_sql();
    let sql = format!(
        "SELECT * FROM (SELECT *, ROW_NUMBER() OVER \
         (PARTITION BY resource_id, metric_id ORDER BY created_at DESC, id DESC) AS latest_rank \
         FROM assessment_results{where_clause}) ranked \
         WHERE latest_rank = 1 ORDER BY resource_id, metric_id"
    );
    db.raw(&sql, &args)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
