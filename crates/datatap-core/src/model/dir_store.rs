use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use datatap_model::FileReference;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, warn};

use crate::codec::{DirectoryCodec, normalize_storage_path};
use crate::error::{Result, StoreError, TapError};
use crate::json::{RecordDecoder, RecordEncoder};
use crate::model::native::{NativeIter, NativeRecord, RecordSource, StoredRecord};
use crate::model::store::{
    ModelStore, PersistedHandle, StagedRecord, is_valid_model, next_integer_key, split_selector,
};

const COLLECTION_EXTENSION: &str = "json";
const FILES_DIR: &str = "files";

/// Store keeping each collection as a JSON array in `<root>/<model>.json`.
///
/// Entries have the form `{"pk": .., "fields": {..}}`. Attachments are
/// written under `<root>/files/<model>/` and referenced from the fields.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, model: &str) -> PathBuf {
        self.root.join(format!("{model}.{COLLECTION_EXTENSION}"))
    }

    fn files_root(&self, model: &str) -> PathBuf {
        self.root.join(FILES_DIR).join(model)
    }

    /// Names of the collections present on disk.
    pub fn collections(&self) -> std::result::Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    operation: "list",
                    path: self.root.clone(),
                    source,
                });
            }
        };
        let mut models = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                operation: "list",
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(COLLECTION_EXTENSION) {
                continue;
            }
            if let Some(model) = path.file_stem().and_then(|stem| stem.to_str())
                && is_valid_model(model)
            {
                models.push(model.to_string());
            }
        }
        models.sort();
        Ok(models)
    }

    fn load(&self, model: &str) -> std::result::Result<Vec<JsonValue>, StoreError> {
        load_entries(&self.collection_path(model))
    }

    fn store(&self, model: &str, entries: &[JsonValue]) -> std::result::Result<(), StoreError> {
        let path = self.collection_path(model);
        let io_error = |operation, source| StoreError::Io {
            operation,
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(|e| io_error("create directory", e))?;
        let bytes = serde_json::to_vec_pretty(entries)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, bytes).map_err(|e| io_error("write", e))?;
        fs::rename(&temp_path, &path).map_err(|e| io_error("rename", e))?;
        Ok(())
    }

    /// Deletes attachment files that no entry of `model` refers to any more.
    fn remove_orphans(&self, model: &str, candidates: BTreeSet<String>, entries: &[JsonValue]) {
        let mut referenced = BTreeSet::new();
        for entry in entries {
            collect_storage_paths(entry, &mut referenced);
        }
        let files_root = self.files_root(model);
        for storage_path in candidates.difference(&referenced) {
            let Ok(relative) = normalize_storage_path("Model", storage_path) else {
                continue;
            };
            let path = files_root.join(relative);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed unreferenced attachment"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(path = %path.display(), %error, "failed to remove unreferenced attachment");
                }
            }
        }
    }

    fn source(&self, model: &str) -> Box<dyn RecordSource> {
        Box::new(CollectionSource {
            model: model.to_string(),
            path: self.collection_path(model),
            files_root: self.files_root(model),
        })
    }
}

/// Storage paths of every file placeholder inside `value`.
fn collect_storage_paths(value: &JsonValue, paths: &mut BTreeSet<String>) {
    match value {
        JsonValue::Object(map) => match FileReference::from_json(map) {
            Ok(Some(reference)) => {
                paths.insert(reference.storage_path);
            }
            Ok(None) => map.values().for_each(|nested| collect_storage_paths(nested, paths)),
            Err(_) => {}
        },
        JsonValue::Array(items) => items.iter().for_each(|item| collect_storage_paths(item, paths)),
        _ => {}
    }
}

fn load_entries(path: &Path) -> std::result::Result<Vec<JsonValue>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                operation: "read",
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(serde_json::from_slice(&bytes)?)
}

impl ModelStore for JsonDirStore {
    fn resolve(&self, selector: &str) -> Result<Vec<Box<dyn RecordSource>>> {
        let (namespace, name) = split_selector(selector);
        let models = match name {
            Some(_) => {
                if !is_valid_model(selector) {
                    return Err(TapError::resolution(selector, "not a valid model name"));
                }
                if self.collection_path(selector).is_file() {
                    vec![selector.to_string()]
                } else {
                    Vec::new()
                }
            }
            None => {
                let prefix = format!("{namespace}.");
                self.collections()
                    .map_err(|e| TapError::resolution(selector, e.to_string()))?
                    .into_iter()
                    .filter(|model| model.starts_with(&prefix))
                    .collect()
            }
        };
        if models.is_empty() {
            return Err(TapError::resolution(
                selector,
                format!("no matching collection in {}", self.root.display()),
            ));
        }
        Ok(models.iter().map(|model| self.source(model)).collect())
    }

    fn save(&mut self, staged: &StagedRecord) -> std::result::Result<PersistedHandle, StoreError> {
        if !is_valid_model(&staged.model) {
            return Err(StoreError::UnknownCollection(staged.model.clone()));
        }
        let mut entries = self.load(&staged.model)?;

        let mut codec = DirectoryCodec::new(self.files_root(&staged.model));
        let fields = RecordEncoder::with_codec("Model", &mut codec)
            .encode(staged.fields.clone())
            .map_err(|e| StoreError::Encode(Box::new(e)))?;

        let key = staged
            .key
            .clone()
            .unwrap_or_else(|| next_integer_key(entries.iter().filter_map(|entry| entry.get("pk"))));
        let entry = json!({"pk": key, "fields": fields});
        let mut replaced = BTreeSet::new();
        match entries
            .iter_mut()
            .find(|existing| existing.get("pk") == Some(&key))
        {
            Some(existing) => {
                collect_storage_paths(existing, &mut replaced);
                *existing = entry;
            }
            None => entries.push(entry),
        }
        self.store(&staged.model, &entries)?;
        debug!(model = %staged.model, %key, "saved record");
        if !replaced.is_empty() {
            self.remove_orphans(&staged.model, replaced, &entries);
        }
        Ok(PersistedHandle {
            model: staged.model.clone(),
            key,
        })
    }
}

/// Reads one collection file when iterated.
struct CollectionSource {
    model: String,
    path: PathBuf,
    files_root: PathBuf,
}

impl RecordSource for CollectionSource {
    fn label(&self) -> String {
        self.model.clone()
    }

    fn iterate(&mut self) -> Result<NativeIter> {
        let entries = load_entries(&self.path).map_err(|e| TapError::Backend {
            tap: "Model",
            source: Box::new(e),
        })?;
        let decoder = RecordDecoder::with_codec("Model", Rc::new(DirectoryCodec::new(&self.files_root)));
        let model = self.model.clone();
        Ok(Box::new(entries.into_iter().map(
            move |mut entry| -> Result<Box<dyn NativeRecord>> {
                let key = entry.get_mut("pk").map(JsonValue::take);
                let fields = entry
                    .get_mut("fields")
                    .map(JsonValue::take)
                    .unwrap_or_else(|| JsonValue::Object(serde_json::Map::new()));
                let fields = decoder.decode(fields)?;
                Ok(Box::new(StoredRecord::new(model.as_str(), key, fields)))
            },
        )))
    }
}
