#![allow(missing_docs, unused_results)]

use std::collections::HashMap;

use assert_matches::assert_matches;
use chrono::{TimeDelta, TimeZone, Utc};
use serde_json::json;
use vigil_domain::{
    AssessmentFilter, AssessmentResult, AuditScope, CONFIGURED_METRICS, Catalog, Certificate,
    Control, Metric, MetricConfiguration, TargetOfEvaluation, latest_assessment_results,
    metric_configuration_or_default, register,
};
use vigil_store::testing::new_in_memory_store;
use vigil_store::{AnyPayload, Condition, Database, ListOptions, Preload, Store, StoreError};

fn store() -> Store {
    new_in_memory_store(register).unwrap()
}

fn seeded() -> Store {
    let store = store();
    for id in ["m1", "m2"] {
        store
            .create(&mut Metric {
                id: id.into(),
                name: format!("metric {id}"),
                interval: Some(TimeDelta::hours(1)),
                ..Metric::default()
            })
            .unwrap();
    }
    store
        .create(&mut TargetOfEvaluation {
            id: "toe1".into(),
            name: "Cloud A".into(),
            ..TargetOfEvaluation::default()
        })
        .unwrap();
    store
}

fn config(toe: &str, metric: &str, operator: &str, value: serde_json::Value) -> MetricConfiguration {
    MetricConfiguration {
        target_of_evaluation_id: toe.into(),
        metric_id: metric.into(),
        operator: operator.into(),
        target_value: Some(value),
        ..MetricConfiguration::default()
    }
}

#[test]
fn registers_every_table() {
    let store = store();
    assert_eq!(
        store.tables(),
        vec![
            "assessment_results",
            "audit_scopes",
            "catalogs",
            "certificates",
            "controls",
            "metric_configurations",
            "metrics",
            "targets_of_evaluation",
        ]
    );
}

#[test]
fn catalog_with_controls() {
    let store = store();
    store
        .create(&mut Catalog {
            id: "EUCS".into(),
            name: "EUCS".into(),
            all_in_scope: true,
            ..Catalog::default()
        })
        .unwrap();
    for id in ["OPS-01", "OPS-01.1"] {
        store
            .create(&mut Control {
                catalog_id: "EUCS".into(),
                id: id.into(),
                category_name: "Operations".into(),
                name: id.into(),
                parent_control_id: (id != "OPS-01").then(|| "OPS-01".to_owned()),
                ..Control::default()
            })
            .unwrap();
    }

    let catalog: Catalog = store.get(&Condition::by_key("EUCS"), &Preload::None).unwrap();
    assert!(catalog.all_in_scope);

    let children: Vec<Control> = store
        .list(
            &ListOptions::default(),
            &Condition::filter("parent_control_id = ?", ["OPS-01"]),
            &Preload::None,
        )
        .unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, "OPS-01.1");

    // Composite key lookup.
    let control: Control = store
        .get(&Condition::PrimaryKey(vec!["EUCS".into(), "OPS-01".into()]), &Preload::None)
        .unwrap();
    assert_eq!(control.parent_control_id, None);
}

#[test]
fn control_requires_existing_catalog() {
    let store = store();
    let err = store
        .create(&mut Control {
            catalog_id: "missing".into(),
            id: "X".into(),
            ..Control::default()
        })
        .unwrap_err();
    assert_matches!(err, StoreError::ConstraintViolation(_));
}

#[test]
fn configured_metrics_round_trip() {
    let store = seeded();
    let mut toe: TargetOfEvaluation =
        store.get(&Condition::by_key("toe1"), &Preload::None).unwrap();
    assert_eq!(toe.configured_metrics, None);

    toe.configured_metrics = Some(vec![
        config("toe1", "m1", "==", json!(true)),
        config("toe1", "m2", "<=", json!(90)),
    ]);
    store.update(&toe, &Condition::None).unwrap();

    let loaded: TargetOfEvaluation = store
        .get(&Condition::by_key("toe1"), &Preload::only(CONFIGURED_METRICS))
        .unwrap();
    let configs = loaded.configured_metrics.unwrap();
    assert_eq!(configs.len(), 2);
    assert_eq!(configs[1].operator, "<=");
    assert_eq!(configs[1].target_value, Some(json!(90)));
    assert!(!configs[0].is_default);
}

#[test]
fn replacing_configured_metrics_drops_old_rows() {
    let store = seeded();
    let mut toe: TargetOfEvaluation =
        store.get(&Condition::by_key("toe1"), &Preload::None).unwrap();
    toe.configured_metrics = Some(vec![
        config("toe1", "m1", "==", json!(true)),
        config("toe1", "m2", "==", json!(false)),
    ]);
    store.update(&toe, &Condition::None).unwrap();

    toe.configured_metrics = Some(vec![config("toe1", "m2", "!=", json!(false))]);
    store.update(&toe, &Condition::None).unwrap();

    assert_eq!(store.count::<MetricConfiguration>(&Condition::None).unwrap(), 1);
    let left: MetricConfiguration = store.get(&Condition::None, &Preload::None).unwrap();
    assert_eq!(left.metric_id, "m2");
    assert_eq!(left.operator, "!=");
}

#[test]
fn configuration_for_unknown_metric_is_rejected() {
    let store = seeded();
    let mut toe: TargetOfEvaluation =
        store.get(&Condition::by_key("toe1"), &Preload::None).unwrap();
    toe.configured_metrics = Some(vec![config("toe1", "nope", "==", json!(1))]);
    assert_matches!(
        store.update(&toe, &Condition::None),
        Err(StoreError::ConstraintViolation(_))
    );
    assert_eq!(store.count::<MetricConfiguration>(&Condition::None).unwrap(), 0);
}

#[test]
fn stored_configuration_wins_over_default() {
    let store = seeded();
    store.create(&mut config("toe1", "m1", ">", json!(3))).unwrap();
    let defaults = HashMap::from([("m1".to_owned(), config("", "m1", "==", json!(0)))]);

    let found = metric_configuration_or_default(&store, "toe1", "m1", &defaults).unwrap();
    assert_eq!(found.operator, ">");
    assert!(!found.is_default);
}

#[test]
fn missing_configuration_falls_back_to_default() {
    let store = seeded();
    let defaults = HashMap::from([("m2".to_owned(), config("", "m2", "<", json!(5)))]);

    let found = metric_configuration_or_default(&store, "toe1", "m2", &defaults).unwrap();
    assert!(found.is_default);
    assert_eq!(found.target_of_evaluation_id, "toe1");
    assert_eq!(found.metric_id, "m2");
    assert_eq!(found.operator, "<");
    assert_eq!(found.target_value, Some(json!(5)));

    assert_matches!(
        metric_configuration_or_default(&store, "toe1", "m1", &defaults),
        Err(StoreError::RecordNotFound)
    );
}

#[test]
fn audit_scope_and_certificate() {
    let store = seeded();
    store
        .create(&mut Catalog {
            id: "C5".into(),
            name: "C5".into(),
            ..Catalog::default()
        })
        .unwrap();
    store
        .create(&mut AuditScope {
            id: "s1".into(),
            name: "C5 for Cloud A".into(),
            target_of_evaluation_id: "toe1".into(),
            catalog_id: "C5".into(),
            assurance_level: Some("high".into()),
        })
        .unwrap();

    let issued = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let mut cert = Certificate {
        id: "cert1".into(),
        name: "Cloud A C5".into(),
        target_of_evaluation_id: "toe1".into(),
        issue_date: Some(issued),
        expiration_date: Some(issued + TimeDelta::days(365)),
        ..Certificate::default()
    };
    store.create(&mut cert).unwrap();

    let read: Certificate = store.get(&Condition::by_key("cert1"), &Preload::None).unwrap();
    assert_eq!(read, cert);
    assert!(read.is_valid_at(issued + TimeDelta::days(30)));

    let scope: AuditScope = store
        .get(&Condition::filter("catalog_id = ?", ["C5"]), &Preload::None)
        .unwrap();
    assert_eq!(scope.target_of_evaluation_id, "toe1");
}

#[test]
fn latest_results_pick_newest_per_resource_and_metric() {
    let store = seeded();
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let record = |resource: &str, metric: &str, minutes: i64, compliant: bool| {
        let mut result = AssessmentResult::new("toe1", metric, resource, "ev", compliant);
        result.created_at = base + TimeDelta::minutes(minutes);
        result.resource_types = Some(json!(["VirtualMachine", "Compute", "Resource"]));
        result.resource = Some(AnyPayload::new(
            "type.example/VirtualMachine",
            json!({ "id": resource }),
        ));
        store.create(&mut result).unwrap();
        result
    };
    record("vm1", "m1", 0, false);
    let newest_vm1_m1 = record("vm1", "m1", 10, true);
    let vm1_m2 = record("vm1", "m2", 5, false);
    record("vm2", "m1", 1, true);
    let newest_vm2_m1 = record("vm2", "m1", 2, false);

    let latest = latest_assessment_results(&store, &AssessmentFilter::default()).unwrap();
    assert_eq!(latest, vec![newest_vm1_m1.clone(), vm1_m2.clone(), newest_vm2_m1.clone()]);

    let non_compliant = latest_assessment_results(
        &store,
        &AssessmentFilter {
            compliant: Some(false),
            ..AssessmentFilter::default()
        },
    )
    .unwrap();
    // The filter applies before ranking.
    let times: Vec<_> = non_compliant.iter().map(|r| r.created_at).collect();
    assert_eq!(
        times,
        vec![base, vm1_m2.created_at, newest_vm2_m1.created_at]
    );

    let by_metric = latest_assessment_results(
        &store,
        &AssessmentFilter {
            metric_id: Some("m2".into()),
            ..AssessmentFilter::default()
        },
    )
    .unwrap();
    assert_eq!(by_metric, vec![vm1_m2]);

    let by_id = latest_assessment_results(
        &store,
        &AssessmentFilter {
            ids: Some(vec![newest_vm2_m1.id.clone()]),
            ..AssessmentFilter::default()
        },
    )
    .unwrap();
    assert_eq!(by_id, vec![newest_vm2_m1]);

    let none = latest_assessment_results(
        &store,
        &AssessmentFilter {
            ids: Some(Vec::new()),
            ..AssessmentFilter::default()
        },
    )
    .unwrap();
    assert!(none.is_empty());
}

#[test]
fn result_for_unknown_target_is_rejected() {
    let store = seeded();
    let mut result = AssessmentResult::new("nope", "m1", "vm1", "ev", true);
    assert_matches!(
        store.create(&mut result),
        Err(StoreError::ConstraintViolation(_))
    );
}
