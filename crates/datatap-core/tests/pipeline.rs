//! Integration tests for chains of core taps.

use std::fs;

use datatap_core::{
    BytesTap, Domain, FileTap, JsonOptions, JsonTap, MemoryTap, Record, Tap, TapError, Value,
};
use proptest::prelude::*;
use serde_json::json;

fn people() -> Vec<Record> {
    vec![
        Record::new().with_field("name", "Ada").with_field("age", 36_i64),
        Record::new()
            .with_field("name", "Grace")
            .with_field("tags", Value::Array(vec!["navy".into(), "cobol".into()])),
    ]
}

fn collect(tap: &mut dyn Tap) -> Vec<Record> {
    tap.items()
        .unwrap()
        .collect::<datatap_core::Result<Vec<_>>>()
        .unwrap()
}

fn json_round_trip(records: Vec<Record>, options: JsonOptions) -> Vec<Record> {
    let source = MemoryTap::from_records(records);
    let encoded = JsonTap::with_options(Box::new(source), options).unwrap();
    let mut decoded = JsonTap::new(Box::new(encoded)).unwrap();
    assert_eq!(decoded.domain(), Domain::Primitive);
    let records = collect(&mut decoded);
    decoded.close().unwrap();
    records
}

#[test]
fn test_memory_json_memory_round_trip() {
    assert_eq!(json_round_trip(people(), JsonOptions::default()), people());
    assert_eq!(
        json_round_trip(people(), JsonOptions::default().with_pretty(true)),
        people()
    );
}

#[test]
fn test_json_tap_reads_single_object() {
    let mut tap = JsonTap::new(Box::new(BytesTap::new(r#"{"test": "item"}"#))).unwrap();
    let records = collect(&mut tap);
    assert_eq!(records, vec![Record::new().with_field("test", "item")]);
}

#[test]
fn test_json_tap_rejects_non_object_entries() {
    let mut tap = JsonTap::new(Box::new(BytesTap::new("[1, 2]"))).unwrap();
    let first = tap.items().unwrap().next().unwrap();
    assert!(matches!(first, Err(TapError::MalformedRecord { .. })));
}

#[test]
fn test_file_sink_and_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/people.json");

    let json = JsonTap::new(Box::new(MemoryTap::from_records(people()))).unwrap();
    let mut sink = FileTap::create(&path, Box::new(json)).unwrap();
    assert!(sink.accepts_writes());
    let report = sink.commit().unwrap();
    assert_eq!(report.bytes, fs::metadata(&path).unwrap().len());
    assert_eq!(sink.commit().unwrap().bytes, 0);
    sink.close().unwrap();

    let written: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(
        written,
        json!([
            {"name": "Ada", "age": 36},
            {"name": "Grace", "tags": ["navy", "cobol"]}
        ])
    );

    let mut source = JsonTap::new(Box::new(FileTap::open(&path))).unwrap();
    assert_eq!(collect(&mut source), people());
}

#[test]
fn test_missing_file_reports_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut tap = FileTap::open(dir.path().join("absent.json"));
    let error = tap.open_stream().err().unwrap();
    assert!(matches!(error, TapError::Io { operation: "open", .. }));
}

#[test]
fn test_mismatched_domains_fail_at_construction() {
    let error = FileTap::create("out.json", Box::new(MemoryTap::new())).err().unwrap();
    assert!(matches!(
        error,
        TapError::DomainMismatch {
            tap: "File",
            found: Some(Domain::Primitive),
            ..
        }
    ));
    assert!(MemoryTap::collecting(Box::new(BytesTap::new("[]"))).is_err());
}

#[test]
fn test_chain_is_restartable_once() {
    let mut tap = JsonTap::new(Box::new(BytesTap::new(r#"[{"a": 1}, {"a": 2}]"#))).unwrap();
    assert_eq!(collect(&mut tap).len(), 2);
    assert!(collect(&mut tap).is_empty());
}

#[test]
fn test_closed_chain_rejects_streams() {
    let mut tap = JsonTap::new(Box::new(BytesTap::new("[]"))).unwrap();
    tap.close().unwrap();
    tap.close().unwrap();
    assert!(matches!(tap.open_stream(), Err(TapError::Closed { tap: "JSON" })));
}

fn plain_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,6}", inner), 0..4)
                .prop_map(|fields| Value::Object(fields.into_iter().collect())),
        ]
    })
}

fn plain_record() -> impl Strategy<Value = Record> {
    prop::collection::vec(("[a-z]{1,8}", plain_value()), 0..6)
        .prop_map(|fields| fields.into_iter().collect())
}

proptest! {
    #[test]
    fn prop_plain_records_survive_json(records in prop::collection::vec(plain_record(), 0..5)) {
        prop_assert_eq!(json_round_trip(records.clone(), JsonOptions::default()), records);
    }
}
