//! Native records and the sources that yield them.

use datatap_model::{Record, Value};
use serde_json::Value as JsonValue;

use crate::error::{Result, TapError};

/// A record owned by an external store.
pub trait NativeRecord {
    /// Model identifier, `<namespace>.<name>`.
    fn model(&self) -> &str;

    /// Primary key, if the record has one yet.
    fn key(&self) -> Option<JsonValue>;

    /// Field mapping, attachments included.
    fn fields(&self) -> Record;
}

pub type NativeIter = Box<dyn Iterator<Item = Result<Box<dyn NativeRecord>>>>;

/// Something that expands to a sequence of native records, such as a
/// whole collection or a query over one.
pub trait RecordSource {
    /// Short description used in logs.
    fn label(&self) -> String;

    /// Starts iterating. The returned iterator owns what it reads.
    fn iterate(&mut self) -> Result<NativeIter>;
}

/// Plain native record used by the bundled stores.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub model: String,
    pub key: Option<JsonValue>,
    pub fields: Record,
}

impl StoredRecord {
    pub fn new(model: impl Into<String>, key: Option<JsonValue>, fields: Record) -> Self {
        Self {
            model: model.into(),
            key,
            fields,
        }
    }
}

impl NativeRecord for StoredRecord {
    fn model(&self) -> &str {
        &self.model
    }

    fn key(&self) -> Option<JsonValue> {
        self.key.clone()
    }

    fn fields(&self) -> Record {
        self.fields.clone()
    }
}

/// Source over records that are already in memory.
pub struct MaterializedSource {
    label: String,
    records: Vec<Box<dyn NativeRecord>>,
}

impl MaterializedSource {
    pub fn new(label: impl Into<String>, records: Vec<Box<dyn NativeRecord>>) -> Self {
        Self {
            label: label.into(),
            records,
        }
    }

    /// Source yielding exactly one record.
    pub fn single(record: impl NativeRecord + 'static) -> Self {
        let label = format!("{} record", record.model());
        Self::new(label, vec![Box::new(record)])
    }
}

impl RecordSource for MaterializedSource {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn iterate(&mut self) -> Result<NativeIter> {
        let records = std::mem::take(&mut self.records);
        Ok(Box::new(records.into_iter().map(Ok::<_, TapError>)))
    }
}

/// Serialized form of a native record: `{"model", "pk", "fields"}`.
#[must_use]
pub fn serialize_native(native: &dyn NativeRecord) -> Record {
    let key = native.key().map_or(Value::Null, Value::from_json);
    Record::new()
        .with_field("model", native.model())
        .with_field("pk", key)
        .with_field("fields", native.fields())
}
