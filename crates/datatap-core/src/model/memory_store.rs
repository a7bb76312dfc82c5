use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use datatap_model::Record;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{Result, StoreError, TapError};
use crate::model::native::{MaterializedSource, NativeRecord, RecordSource, StoredRecord};
use crate::model::store::{
    ModelStore, PersistedHandle, StagedRecord, materialize_attachments, next_integer_key,
    split_selector,
};

/// In-memory store keyed by `<namespace>.<name>`.
///
/// Clones share the same collections, so a caller can keep a handle and
/// inspect what a tap persisted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Rc<RefCell<BTreeMap<String, Vec<StoredRecord>>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record, assigning an integer key when absent.
    pub fn insert(&self, model: &str, key: Option<JsonValue>, fields: Record) -> PersistedHandle {
        let mut collections = self.collections.borrow_mut();
        let records = collections.entry(model.to_string()).or_default();
        let key = key.unwrap_or_else(|| next_integer_key(records.iter().filter_map(|r| r.key.as_ref())));
        let record = StoredRecord::new(model, Some(key.clone()), fields);
        match records.iter_mut().find(|r| r.key.as_ref() == Some(&key)) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        PersistedHandle {
            model: model.to_string(),
            key,
        }
    }

    /// Snapshot of one collection.
    #[must_use]
    pub fn records(&self, model: &str) -> Vec<StoredRecord> {
        self.collections
            .borrow()
            .get(model)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn count(&self, model: &str) -> usize {
        self.collections.borrow().get(model).map_or(0, Vec::len)
    }

    /// Records across all collections.
    #[must_use]
    pub fn total(&self) -> usize {
        self.collections.borrow().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        self.collections.borrow().keys().cloned().collect()
    }

    fn source(&self, model: &str) -> Box<dyn RecordSource> {
        let records: Vec<Box<dyn NativeRecord>> = self
            .records(model)
            .into_iter()
            .map(|record| Box::new(record) as Box<dyn NativeRecord>)
            .collect();
        Box::new(MaterializedSource::new(model, records))
    }
}

impl ModelStore for MemoryStore {
    fn resolve(&self, selector: &str) -> Result<Vec<Box<dyn RecordSource>>> {
        let (namespace, name) = split_selector(selector);
        let models: Vec<String> = match name {
            Some(_) => self
                .collections
                .borrow()
                .contains_key(selector)
                .then(|| vec![selector.to_string()])
                .unwrap_or_default(),
            None => {
                let prefix = format!("{namespace}.");
                self.collections()
                    .into_iter()
                    .filter(|model| model.starts_with(&prefix))
                    .collect()
            }
        };
        if models.is_empty() {
            return Err(TapError::resolution(selector, "no matching collection"));
        }
        Ok(models.iter().map(|model| self.source(model)).collect())
    }

    fn save(&mut self, staged: &StagedRecord) -> std::result::Result<PersistedHandle, StoreError> {
        let fields = materialize_attachments(&staged.fields)?;
        let handle = self.insert(&staged.model, staged.key.clone(), fields);
        debug!(model = %handle.model, key = %handle.key, "saved record");
        Ok(handle)
    }
}
