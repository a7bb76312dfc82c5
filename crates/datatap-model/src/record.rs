//! Ordered records and the values they hold.

use indexmap::IndexMap;
use indexmap::map::{IntoIter, Iter};
use serde_json::{Map, Number, Value as JsonValue};

use crate::attachment::{FileAttachment, FileReference};
use crate::error::{Result, ShapeError};

/// A field value inside a [`Record`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(Record),
    /// A resolved binary payload.
    File(FileAttachment),
    /// An unresolved placeholder for a payload stored elsewhere.
    Reference(FileReference),
}

impl Value {
    /// Converts plain JSON. Placeholder objects are kept as objects.
    #[must_use]
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(value) => Self::Bool(value),
            JsonValue::Number(value) => Self::Number(value),
            JsonValue::String(value) => Self::String(value),
            JsonValue::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            JsonValue::Object(object) => Self::Object(Record::from_map(object)),
        }
    }

    /// Converts to plain JSON.
    ///
    /// References become placeholder objects; resolved attachments fail.
    pub fn to_json(&self) -> Result<JsonValue> {
        self.to_json_at("")
    }

    fn to_json_at(&self, field: &str) -> Result<JsonValue> {
        Ok(match self {
            Self::Null => JsonValue::Null,
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Number(value) => JsonValue::Number(value.clone()),
            Self::String(value) => JsonValue::String(value.clone()),
            Self::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| item.to_json_at(field))
                    .collect::<Result<_>>()?,
            ),
            Self::Object(record) => record.to_json()?,
            Self::Reference(reference) => reference.to_json(false),
            Self::File(_) => {
                return Err(ShapeError::UnresolvedAttachment {
                    field: field.to_string(),
                });
            }
        })
    }

    /// Short name of the variant, used in diagnostics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::File(_) => "file",
            Self::Reference(_) => "file reference",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_file(&self) -> Option<&FileAttachment> {
        match self {
            Self::File(attachment) => Some(attachment),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Object(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this value or anything nested in it is an attachment.
    #[must_use]
    pub fn has_attachments(&self) -> bool {
        match self {
            Self::File(_) => true,
            Self::Array(items) => items.iter().any(Value::has_attachments),
            Self::Object(record) => record.has_attachments(),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<FileAttachment> for Value {
    fn from(value: FileAttachment) -> Self {
        Self::File(value)
    }
}

impl From<FileReference> for Value {
    fn from(value: FileReference) -> Self {
        Self::Reference(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Self::Object(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(value)
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Self::from_json(value)
    }
}

/// An ordered mapping from field name to value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Inserts a field, returning the previous value. Order of an existing
    /// field is kept.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Removes a field, keeping the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, String, Value> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    #[must_use]
    pub fn has_attachments(&self) -> bool {
        self.fields.values().any(Value::has_attachments)
    }

    /// Builds a record from a JSON object.
    pub fn from_json(json: JsonValue) -> Result<Self> {
        match json {
            JsonValue::Object(object) => Ok(Self::from_map(object)),
            other => Err(ShapeError::NotAnObject {
                found: json_kind(&other),
            }),
        }
    }

    fn from_map(object: Map<String, JsonValue>) -> Self {
        object
            .into_iter()
            .map(|(name, value)| (name, Value::from_json(value)))
            .collect()
    }

    /// Converts to a JSON object; fails on resolved attachments.
    pub fn to_json(&self) -> Result<JsonValue> {
        let mut object = Map::with_capacity(self.fields.len());
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.to_json_at(name)?);
        }
        Ok(JsonValue::Object(object))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Name of a JSON value's type, for diagnostics.
#[must_use]
pub fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn from_json_preserves_field_order() {
        let record = Record::from_json(json!({"zeta": 1, "alpha": 2, "mid": 3})).unwrap();
        assert_eq!(record.keys().collect::<Vec<_>>(), ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn from_json_rejects_non_objects() {
        assert_eq!(
            Record::from_json(json!([1, 2])),
            Err(ShapeError::NotAnObject { found: "array" })
        );
    }

    #[test]
    fn to_json_rejects_resolved_attachments() {
        let record = Record::new().with_field("doc", FileAttachment::from_bytes("a", b"x".to_vec()));
        assert_eq!(
            record.to_json(),
            Err(ShapeError::UnresolvedAttachment {
                field: "doc".to_string()
            })
        );
    }

    #[test]
    fn remove_keeps_order() {
        let mut record = Record::new()
            .with_field("a", 1_i64)
            .with_field("b", 2_i64)
            .with_field("c", 3_i64);
        record.remove("b");
        assert_eq!(record.keys().collect::<Vec<_>>(), ["a", "c"]);
    }
}
