//! Targets of evaluation, audit scopes, and certificates.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use vigil_store::codec::TIMESTAMP;
use vigil_store::{Column, Entity, Record, Result, Schema};

use crate::metric::MetricConfiguration;

/// Association field holding a target's metric configurations.
pub const CONFIGURED_METRICS: &str = "configured_metrics";

static TARGETS_OF_EVALUATION: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("targets_of_evaluation")
        .column(Column::text("id"))
        .column(Column::text("name").unique())
        .column(Column::text("description").nullable())
        .column(Column::text("target_type").nullable())
        .column(Column::codec("created_at", TIMESTAMP).nullable())
        .column(Column::codec("updated_at", TIMESTAMP).nullable())
        .with_primary_key(&["id"])
        .with_association(CONFIGURED_METRICS)
});

static AUDIT_SCOPES: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("audit_scopes")
        .column(Column::text("id"))
        .column(Column::text("name"))
        .column(
            Column::text("target_of_evaluation_id").references("targets_of_evaluation", "id"),
        )
        .column(Column::text("catalog_id").references("catalogs", "id"))
        .column(Column::text("assurance_level").nullable())
        .with_primary_key(&["id"])
});

static CERTIFICATES: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new("certificates")
        .column(Column::text("id"))
        .column(Column::text("name"))
        .column(
            Column::text("target_of_evaluation_id").references("targets_of_evaluation", "id"),
        )
        .column(Column::text("standard").nullable())
        .column(Column::text("assurance_level").nullable())
        .column(Column::text("cab").nullable())
        .column(Column::codec("issue_date", TIMESTAMP).nullable())
        .column(Column::codec("expiration_date", TIMESTAMP).nullable())
        .with_primary_key(&["id"])
});

/// A cloud service or system under assessment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetOfEvaluation {
    /// Target identifier.
    pub id: String,
    /// Display name. Unique.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Kind of target, e.g. `cloud`.
    pub target_type: Option<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Last change.
    pub updated_at: Option<DateTime<Utc>>,
    /// `None` unless preloaded.
    pub configured_metrics: Option<Vec<MetricConfiguration>>,
}

impl Entity for TargetOfEvaluation {
    fn schema() -> &'static Schema {
        &TARGETS_OF_EVALUATION
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
            .with("description", self.description.clone())
            .with("target_type", self.target_type.clone())
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            id: record.take_text("id")?,
            name: record.take_text("name")?,
            description: record.take_opt_text("description")?,
            target_type: record.take_opt_text("target_type")?,
            created_at: record.take_opt_timestamp("created_at")?,
            updated_at: record.take_opt_timestamp("updated_at")?,
            configured_metrics: None,
        })
    }

    fn links(&self, field: &str) -> Option<Vec<Record>> {
        if field != CONFIGURED_METRICS {
            return None;
        }
        self.configured_metrics
            .as_ref()
            .map(|configs| configs.iter().map(MetricConfiguration::to_record).collect())
    }

    fn set_links(&mut self, field: &str, links: Vec<Record>) -> Result<()> {
        if field == CONFIGURED_METRICS {
            self.configured_metrics = Some(
                links
                    .into_iter()
                    .map(MetricConfiguration::from_record)
                    .collect::<Result<_>>()?,
            );
        }
        Ok(())
    }
}

/// The controls of one catalog that apply to one target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditScope {
    /// Scope identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Audited target.
    pub target_of_evaluation_id: String,
    /// Catalog the target is audited against.
    pub catalog_id: String,
    /// Requested assurance level.
    pub assurance_level: Option<String>,
}

impl Entity for AuditScope {
    fn schema() -> &'static Schema {
        &AUDIT_SCOPES
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
            .with("target_of_evaluation_id", self.target_of_evaluation_id.as_str())
            .with("catalog_id", self.catalog_id.as_str())
            .with("assurance_level", self.assurance_level.clone())
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            id: record.take_text("id")?,
            name: record.take_text("name")?,
            target_of_evaluation_id: record.take_text("target_of_evaluation_id")?,
            catalog_id: record.take_text("catalog_id")?,
            assurance_level: record.take_opt_text("assurance_level")?,
        })
    }
}

/// A certificate issued to a target by a conformity assessment body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Certificate {
    /// Certificate identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Certified target.
    pub target_of_evaluation_id: String,
    /// Standard certified against.
    pub standard: Option<String>,
    /// Certified assurance level.
    pub assurance_level: Option<String>,
    /// Issuing conformity assessment body.
    pub cab: Option<String>,
    /// Start of validity.
    pub issue_date: Option<DateTime<Utc>>,
    /// End of validity, exclusive.
    pub expiration_date: Option<DateTime<Utc>>,
}

impl Certificate {
    /// Whether the certificate is valid at `at`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.issue_date.is_none_or(|issued| issued <= at)
            && self.expiration_date.is_none_or(|expires| at < expires)
    }
}

impl Entity for Certificate {
    fn schema() -> &'static Schema {
        &CERTIFICATES
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
            .with("target_of_evaluation_id", self.target_of_evaluation_id.as_str())
            .with("standard", self.standard.clone())
            .with("assurance_level", self.assurance_level.clone())
            .with("cab", self.cab.clone())
            .with("issue_date", self.issue_date)
            .with("expiration_date", self.expiration_date)
    }

    fn from_record(mut record: Record) -> Result<Self> {
        Ok(Self {
            id: record.take_text("id")?,
            name: record.take_text("name")?,
            target_of_evaluation_id: record.take_text("target_of_evaluation_id")?,
            standard: record.take_opt_text("standard")?,
            assurance_level: record.take_opt_text("assurance_level")?,
            cab: record.take_opt_text("cab")?,
            issue_date: record.take_opt_timestamp("issue_date")?,
            expiration_date: record.take_opt_timestamp("expiration_date")?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
