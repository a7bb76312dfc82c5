//! The store contract behind the model tap.

use datatap_model::{Record, Value};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{Result, StoreError, TapError};
use crate::model::native::RecordSource;

/// Identifies a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedHandle {
    pub model: String,
    pub key: JsonValue,
}

/// An inbound record deserialized and waiting to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRecord {
    /// Position in the inbound stream.
    pub position: usize,
    pub model: String,
    pub key: Option<JsonValue>,
    pub fields: Record,
}

impl StagedRecord {
    /// Deserializes `{"model", "pk", "fields"}`. Other keys are ignored.
    pub fn from_record(tap: &'static str, position: usize, mut record: Record) -> Result<Self> {
        let model = match record.remove("model") {
            Some(Value::String(model)) if !model.trim().is_empty() => model,
            Some(other) => {
                return Err(TapError::malformed(
                    tap,
                    format!("record #{position}: 'model' must be a non-empty string, found {}", other.kind()),
                ));
            }
            None => {
                return Err(TapError::malformed(
                    tap,
                    format!("record #{position} has no 'model'"),
                ));
            }
        };
        let key = match record.remove("pk") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.to_json().map_err(|e| {
                TapError::malformed(tap, format!("record #{position}: invalid 'pk': {e}"))
            })?),
        };
        let fields = match record.remove("fields") {
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                return Err(TapError::malformed(
                    tap,
                    format!("record #{position}: 'fields' must be an object, found {}", other.kind()),
                ));
            }
            None => {
                return Err(TapError::malformed(
                    tap,
                    format!("record #{position} has no 'fields'"),
                ));
            }
        };
        Ok(Self {
            position,
            model,
            key,
            fields,
        })
    }
}

/// Back end that resolves sources and persists staged records.
pub trait ModelStore {
    /// Resolves `"<namespace>.<name>"`, or `"<namespace>"` for every
    /// collection in it.
    fn resolve(&self, selector: &str) -> Result<Vec<Box<dyn RecordSource>>>;

    /// Persists one record, inserting or replacing by key.
    fn save(&mut self, staged: &StagedRecord) -> std::result::Result<PersistedHandle, StoreError>;
}

/// Splits a selector into namespace and optional name.
#[must_use]
pub fn split_selector(selector: &str) -> (&str, Option<&str>) {
    match selector.split_once('.') {
        Some((namespace, name)) => (namespace, Some(name)),
        None => (selector, None),
    }
}

/// Whether `model` is usable as a collection name.
#[must_use]
pub fn is_valid_model(model: &str) -> bool {
    let (namespace, name) = split_selector(model);
    let valid = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    };
    valid(namespace) && name.is_some_and(valid)
}

/// Next integer key after the largest integer key in `keys`.
pub(crate) fn next_integer_key<'a>(keys: impl Iterator<Item = &'a JsonValue>) -> JsonValue {
    let max = keys.filter_map(JsonValue::as_i64).max().unwrap_or(0);
    JsonValue::from(max + 1)
}

/// Replaces attachments in `fields` with in-memory copies of their bytes.
pub(crate) fn materialize_attachments(fields: &Record) -> std::result::Result<Record, StoreError> {
    fields
        .iter()
        .map(|(name, value)| Ok((name.clone(), materialize_value(value)?)))
        .collect()
}

fn materialize_value(value: &Value) -> std::result::Result<Value, StoreError> {
    Ok(match value {
        Value::File(attachment) => {
            let bytes = attachment
                .read_bytes()
                .map_err(|source| StoreError::Attachment {
                    name: attachment.name().to_string(),
                    source,
                })?;
            Value::File(datatap_model::FileAttachment::from_bytes(attachment.name(), bytes))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(materialize_value)
                .collect::<std::result::Result<_, _>>()?,
        ),
        Value::Object(record) => Value::Object(materialize_attachments(record)?),
        other => other.clone(),
    })
}
