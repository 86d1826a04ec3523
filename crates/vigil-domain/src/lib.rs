//! # vigil-domain
//!
//! Compliance entities persisted through `vigil-store`.
//!
//! - [`Catalog`] and [`Control`]: requirement sets
//! - [`TargetOfEvaluation`], [`AuditScope`], [`Certificate`]: what is assessed
//!   and against which catalog
//! - [`Metric`] and [`MetricConfiguration`]: how resources are measured;
//!   configurations link to their target through the `configured_metrics`
//!   join table
//! - [`AssessmentResult`]: individual verdicts, with
//!   [`latest_assessment_results`] selecting the newest per resource and
//!   metric

#![deny(unsafe_code)]

pub mod assessment;
pub mod catalog;
pub mod metric;
pub mod scope;

pub use assessment::{AssessmentFilter, AssessmentResult, latest_assessment_results};
pub use catalog::{Catalog, Control};
pub use metric::{
    DefaultConfigurations, Metric, MetricConfiguration, metric_configuration_or_default,
};
pub use scope::{AuditScope, CONFIGURED_METRICS, Certificate, TargetOfEvaluation};

use vigil_store::StoreBuilder;

/// Register every compliance entity and join table with `builder`.
///
/// Tables are listed so that referenced tables are created first.
pub fn register(builder: StoreBuilder) -> StoreBuilder {
    builder
        .entity::<Catalog>()
        .entity::<Control>()
        .entity::<Metric>()
        .entity::<TargetOfEvaluation>()
        .entity::<AuditScope>()
        .entity::<Certificate>()
        .entity::<AssessmentResult>()
        .join::<TargetOfEvaluation, MetricConfiguration>(
            CONFIGURED_METRICS,
            "target_of_evaluation_id",
        )
}
