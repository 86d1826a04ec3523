#![allow(missing_docs, unused_results)]

mod common;

use assert_matches::assert_matches;
use chrono::{TimeDelta, TimeZone, Utc};
use serde_json::json;
use vigil_store::codec::DURATION;
use vigil_store::testing::new_in_memory_store;
use vigil_store::{
    AnyPayload, Codec, CodecError, Condition, Database, FieldValue, Preload, SqlType, SqlValue,
    StoreError,
};

use common::{Part, Widget, widget_store};

fn get(store: &impl Database, id: &str) -> Result<Widget, StoreError> {
    store.get(&Condition::by_key(id), &Preload::None)
}

#[test]
fn codec_columns_round_trip() {
    let store = widget_store();
    let mut widget = Widget {
        interval: Some(TimeDelta::minutes(15) + TimeDelta::nanoseconds(7)),
        seen_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()),
        attributes: Some(json!({"region": "eu-west", "tags": ["a", "b"], "score": 0.5})),
        payload: Some(AnyPayload::new(
            "type.googleapis.com/clouditor.VirtualMachine",
            json!({"id": "vm-1", "bootLogging": {"enabled": true}}),
        )),
        ..Widget::new("w1", "full", 1)
    };
    store.create(&mut widget).unwrap();

    let loaded = get(&store, "w1").unwrap();
    assert_eq!(loaded.interval, widget.interval);
    assert_eq!(loaded.seen_at, widget.seen_at);
    assert_eq!(loaded.attributes, widget.attributes);
    assert_eq!(loaded.payload, widget.payload);
}

#[test]
fn timestamps_keep_microsecond_precision() {
    let store = widget_store();
    let micros = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap() + TimeDelta::microseconds(250_001);
    let mut widget = Widget {
        seen_at: Some(micros + TimeDelta::nanoseconds(999)),
        ..Widget::new("w1", "precise", 1)
    };
    store.create(&mut widget).unwrap();

    assert_eq!(widget.seen_at, Some(micros));
    assert_eq!(get(&store, "w1").unwrap().seen_at, Some(micros));
}

#[test]
fn absent_values_stay_absent() {
    let store = widget_store();
    store.create(&mut Widget::new("w1", "empty", 1)).unwrap();

    let stored = store
        .raw_records(
            "SELECT interval, seen_at, attributes, payload FROM widgets",
            &[],
        )
        .unwrap();
    assert!(stored[0].field_names().count() == 4);
    for field in ["interval", "seen_at", "attributes", "payload"] {
        assert_eq!(stored[0].get(field), Some(&FieldValue::Null), "{field}");
    }

    let loaded = get(&store, "w1").unwrap();
    assert_eq!(loaded.interval, None);
    assert_eq!(loaded.payload, None);
}

#[test]
fn durations_are_stored_as_nanoseconds() {
    let store = widget_store();
    let mut widget = Widget {
        interval: Some(TimeDelta::seconds(3)),
        ..Widget::new("w1", "timed", 1)
    };
    store.create(&mut widget).unwrap();
    let stored = store
        .raw_records("SELECT interval FROM widgets", &[])
        .unwrap();
    assert_eq!(
        stored[0].get("interval"),
        Some(&FieldValue::Integer(3_000_000_000))
    );
}

#[test]
fn corrupt_payload_is_distinct_from_empty() {
    let store = widget_store();
    store.create(&mut Widget::new("w1", "a", 1)).unwrap();
    store.create(&mut Widget::new("w2", "b", 1)).unwrap();
    store
        .raw_execute(
            "UPDATE widgets SET payload = ? WHERE id = ?",
            &["{not json".into(), "w2".into()],
        )
        .unwrap();

    assert_eq!(get(&store, "w1").unwrap().payload, None);
    assert_matches!(
        get(&store, "w2"),
        Err(StoreError::CorruptValue { column, .. }) if column == "payload"
    );
}

#[test]
fn wrong_shaped_stored_value_is_unsupported_type() {
    let store = widget_store();
    store.create(&mut Widget::new("w1", "a", 1)).unwrap();
    store
        .raw_execute("UPDATE widgets SET interval = 'ten minutes'", &[])
        .unwrap();
    assert_matches!(
        get(&store, "w1"),
        Err(StoreError::UnsupportedType(msg)) if msg.starts_with("interval:")
    );
}

#[test]
fn failed_encode_writes_nothing() {
    let store = widget_store();
    let mut widget = Widget {
        payload: Some(AnyPayload::new("", json!({}))),
        ..Widget::new("w1", "bad", 1)
    };
    assert_matches!(
        store.create(&mut widget),
        Err(StoreError::Encode { column, .. }) if column == "payload"
    );

    let mut widget = Widget {
        interval: Some(TimeDelta::MAX),
        ..Widget::new("w1", "long", 1)
    };
    assert_matches!(
        store.create(&mut widget),
        Err(StoreError::Encode { column, source: CodecError::Malformed { .. } }) if column == "interval"
    );
    assert_eq!(store.count::<Widget>(&Condition::None).unwrap(), 0);
}

/// Stores durations as whole seconds.
#[derive(Debug)]
struct Seconds;

impl Codec for Seconds {
    fn name(&self) -> &'static str {
        DURATION
    }

    fn sql_type(&self) -> SqlType {
        SqlType::Integer
    }

    fn encode(&self, value: &FieldValue) -> Result<SqlValue, CodecError> {
        match value {
            FieldValue::Null => Ok(SqlValue::Null),
            FieldValue::Duration(d) => Ok(SqlValue::Integer(d.num_seconds())),
            other => Err(CodecError::UnsupportedType {
                codec: DURATION,
                found: other.kind(),
            }),
        }
    }

    fn decode(&self, stored: SqlValue) -> Result<FieldValue, CodecError> {
        match stored {
            SqlValue::Null => Ok(FieldValue::Null),
            SqlValue::Integer(s) => Ok(FieldValue::Duration(TimeDelta::seconds(s))),
            other => Err(CodecError::UnsupportedType {
                codec: DURATION,
                found: other.kind(),
            }),
        }
    }
}

#[test]
fn codec_registry_is_per_store() {
    let custom = new_in_memory_store(|builder| {
        builder
            .entity::<Widget>()
            .join::<Widget, Part>("parts", "widget_id")
            .codec(Seconds)
    })
    .unwrap();
    let standard = widget_store();

    for store in [&custom, &standard] {
        let mut widget = Widget {
            interval: Some(TimeDelta::seconds(90)),
            ..Widget::new("w1", "timed", 1)
        };
        store.create(&mut widget).unwrap();
        assert_eq!(get(store, "w1").unwrap().interval, Some(TimeDelta::seconds(90)));
    }

    let raw = |store: &vigil_store::Store| {
        store
            .raw_records("SELECT interval FROM widgets", &[])
            .unwrap()
            .remove(0)
            .take("interval")
    };
    assert_eq!(raw(&custom), FieldValue::Integer(90));
    assert_eq!(raw(&standard), FieldValue::Integer(90_000_000_000));
}
