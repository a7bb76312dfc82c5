//! Integration tests for chains built from command line arguments.

use std::fs;
use std::path::Path;

use datatap_cli::{TapContext, inspect, run_chain};
use datatap_core::ErrorKind;
use serde_json::{Value, json};

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
}

fn photos() -> Value {
    json!([
        {"model": "media.photo", "pk": 1, "fields": {"title": "Dawn", "tags": ["sky"]}},
        {"model": "media.photo", "pk": 2, "fields": {"title": "Dusk", "tags": []}},
    ])
}

fn stored(store: &Path, model: &str) -> Value {
    let bytes = fs::read(store.join(format!("{model}.json"))).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn arg(path: &Path) -> String {
    path.display().to_string()
}

#[test]
fn test_json_file_into_store() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("photos.json");
    write_json(&input, &photos());
    let context = TapContext::new(dir.path().join("store"));

    let summary = run_chain(
        ["File".to_string(), arg(&input), "--".into(), "JSON".into(), "--".into(), "Model".into()],
        &context,
    )
    .unwrap();

    assert_eq!(summary.chain, ["File", "JSON", "Model"]);
    assert_eq!(summary.appended, 0);
    assert_eq!(summary.report.processed, 2);
    assert_eq!(summary.report.committed, 2);
    let entries = stored(&context.store, "media.photo");
    assert_eq!(entries[0]["pk"], 1);
    assert_eq!(entries[1]["fields"]["title"], "Dusk");
}

#[test]
fn test_store_to_zip_and_back_by_originator() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("photos.json");
    write_json(&input, &photos());
    let first = TapContext::new(dir.path().join("first"));
    run_chain(
        ["File".to_string(), arg(&input), "--".into(), "JSON".into(), "--".into(), "Model".into()],
        &first,
    )
    .unwrap();

    let archive = dir.path().join("photos.zip");
    let packed = run_chain(
        [
            "Model".to_string(),
            "media.photo".into(),
            "--".into(),
            "Zip".into(),
            "--".into(),
            "File".into(),
            arg(&archive),
        ],
        &first,
    )
    .unwrap();
    assert_eq!(packed.chain, ["Model", "Zip", "File"]);
    assert!(packed.report.bytes > 0);

    let inventory = inspect(&archive).unwrap();
    assert_eq!(inventory.originator.as_deref(), Some("Model"));
    let names: Vec<_> = inventory.members.iter().map(|m| m.name.as_str()).collect();
    assert!(names.contains(&"manifest.json"));
    assert!(names.contains(&"originator.txt"));

    let second = TapContext::new(dir.path().join("second"));
    let unpacked = run_chain(["File".to_string(), arg(&archive), "--".into(), "Zip".into()], &second)
        .unwrap();
    assert_eq!(unpacked.chain, ["File", "Zip", "Model"]);
    assert_eq!(unpacked.appended, 1);
    assert_eq!(unpacked.report.committed, 2);
    assert_eq!(
        stored(&second.store, "media.photo"),
        stored(&first.store, "media.photo")
    );
}

#[test]
fn test_tar_gz_with_options() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("photos.json");
    write_json(&input, &photos());
    let context = TapContext::new(dir.path().join("store"));
    run_chain(
        ["File".to_string(), arg(&input), "--".into(), "JSON".into(), "--".into(), "Model".into()],
        &context,
    )
    .unwrap();

    let archive = dir.path().join("photos.tgz");
    run_chain(
        [
            "Model".to_string(),
            "media".into(),
            "--".into(),
            "TarGz".into(),
            "--level=9".into(),
            "--originator=Legacy".into(),
            "--pretty".into(),
            "--".into(),
            "File".into(),
            arg(&archive),
        ],
        &context,
    )
    .unwrap();

    let inventory = inspect(&archive).unwrap();
    assert_eq!(inventory.format.ident(), "TarGz");
    assert_eq!(inventory.originator.as_deref(), Some("Legacy"));
}

#[test]
fn test_unpacked_json_goes_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("photos.json");
    write_json(&input, &photos());
    let output = dir.path().join("copy.json");
    let context = TapContext::new(dir.path().join("store"));

    let summary = run_chain(
        [
            "File".to_string(),
            arg(&input),
            "--".into(),
            "JSON".into(),
            "--".into(),
            "JSON".into(),
            "--pretty".into(),
            "--".into(),
            "File".into(),
            arg(&output),
        ],
        &context,
    )
    .unwrap();

    assert_eq!(summary.chain, ["File", "JSON", "JSON", "File"]);
    let copied: Value = serde_json::from_slice(&fs::read(&output).unwrap()).unwrap();
    assert_eq!(copied, photos());
}

#[test]
fn test_malformed_records_name_the_model_tap() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.json");
    write_json(&input, &json!([{"fields": {}}]));
    let context = TapContext::new(dir.path().join("store"));

    let error = run_chain(
        ["File".to_string(), arg(&input), "--".into(), "JSON".into(), "--".into(), "Model".into()],
        &context,
    )
    .unwrap_err();

    assert_eq!(error.source.kind(), ErrorKind::MalformedRecord);
    assert_eq!(error.tap(), "Model");
    assert!(error.to_string().starts_with("Model: malformed-record: "));
    assert!(!context.store.join("media.photo.json").exists());
}

#[test]
fn test_missing_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let context = TapContext::new(dir.path().join("store"));
    let missing = dir.path().join("missing.json");

    let error = run_chain(
        ["File".to_string(), arg(&missing), "--".into(), "JSON".into(), "--".into(), "Model".into()],
        &context,
    )
    .unwrap_err();

    assert_eq!(error.source.kind(), ErrorKind::Io);
    assert!(error.to_string().contains("missing.json"));
}

#[test]
fn test_domain_mismatch_is_reported_at_build_time() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("photos.json");
    write_json(&input, &photos());
    let context = TapContext::new(dir.path().join("store"));

    let error = run_chain(["File".to_string(), arg(&input), "--".into(), "Model".into()], &context)
        .unwrap_err();

    assert_eq!(error.source.kind(), ErrorKind::DomainMismatch);
    assert_eq!(error.tap(), "Model");
}

#[test]
fn test_unknown_tap_diagnostic() {
    let context = TapContext::new("unused-store");
    let error = run_chain(["Csv", "data.csv"], &context).unwrap_err();
    insta::assert_snapshot!(
        error.to_string(),
        @"datatap: resolution: cannot resolve 'Csv': unknown tap (known: Model, JSON, Zip, Tar, TarGz, File, Stream)"
    );
}

#[test]
fn test_bad_option_value_diagnostic() {
    let context = TapContext::new("unused-store");
    let error = run_chain(["Stream", "--", "Zip", "--level=max"], &context).unwrap_err();
    assert_eq!(error.tap(), "Zip");
    assert!(
        error
            .to_string()
            .starts_with("Zip: resolution: cannot resolve 'Zip --level'")
    );
}

#[test]
fn test_inspect_rejects_non_archive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake.zip");
    fs::write(&path, b"not a zip archive").unwrap();

    let error = inspect(&path).unwrap_err();
    assert_eq!(error.tap(), "Zip");
    assert_eq!(error.source.kind(), ErrorKind::Backend);
}
