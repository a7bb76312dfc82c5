//! File attachments and the placeholders that stand in for them.

use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{Result, ShapeError};

/// Key marking a placeholder object in encoded records.
pub const TYPE_KEY: &str = "__type__";

/// Type tag of a file placeholder.
pub const FILE_TYPE_TAG: &str = "File";

/// Random access to the members of an open container.
///
/// Implemented by container taps; attachments keep a shared handle and open
/// their member only when read.
pub trait MemberSource {
    /// Opens the member stored at `storage_path`.
    fn open_member(&self, storage_path: &str) -> io::Result<Box<dyn Read>>;
}

/// Where the bytes of an attachment live.
#[derive(Clone)]
pub enum AttachmentSource {
    /// Bytes held in memory.
    Bytes(Arc<[u8]>),
    /// A file on the local filesystem.
    Path(PathBuf),
    /// A member of an open container.
    Member {
        source: Rc<dyn MemberSource>,
        storage_path: String,
        size: u64,
    },
}

impl fmt::Debug for AttachmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Member {
                storage_path, size, ..
            } => f
                .debug_struct("Member")
                .field("storage_path", storage_path)
                .field("size", size)
                .finish(),
        }
    }
}

impl PartialEq for AttachmentSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Path(a), Self::Path(b)) => a == b,
            (
                Self::Member {
                    source: a,
                    storage_path: path_a,
                    ..
                },
                Self::Member {
                    source: b,
                    storage_path: path_b,
                    ..
                },
            ) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)) && path_a == path_b,
            _ => false,
        }
    }
}

/// A binary payload attached to a record field.
///
/// The payload is not read until [`FileAttachment::open`] or
/// [`FileAttachment::read_bytes`] is called.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    name: String,
    source: AttachmentSource,
}

impl FileAttachment {
    /// Attachment backed by in-memory bytes.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            name: name.into(),
            source: AttachmentSource::Bytes(Arc::from(bytes)),
        }
    }

    /// Attachment backed by a file on disk.
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: AttachmentSource::Path(path.into()),
        }
    }

    /// Attachment backed by a container member.
    pub fn from_member(
        name: impl Into<String>,
        storage_path: impl Into<String>,
        size: u64,
        source: Rc<dyn MemberSource>,
    ) -> Self {
        Self {
            name: name.into(),
            source: AttachmentSource::Member {
                source,
                storage_path: storage_path.into(),
                size,
            },
        }
    }

    /// Logical name reported to consumers.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn source(&self) -> &AttachmentSource {
        &self.source
    }

    /// Storage path inside the owning container, for member attachments.
    #[must_use]
    pub fn storage_path(&self) -> Option<&str> {
        match &self.source {
            AttachmentSource::Member { storage_path, .. } => Some(storage_path),
            _ => None,
        }
    }

    /// Payload size when known without reading.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        match &self.source {
            AttachmentSource::Bytes(bytes) => Some(bytes.len() as u64),
            AttachmentSource::Path(path) => std::fs::metadata(path).ok().map(|meta| meta.len()),
            AttachmentSource::Member { size, .. } => Some(*size),
        }
    }

    /// Returns a copy of this attachment under another logical name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Opens a fresh reader over the payload.
    pub fn open(&self) -> io::Result<Box<dyn Read + '_>> {
        match &self.source {
            AttachmentSource::Bytes(bytes) => Ok(Box::new(Cursor::new(&bytes[..]))),
            AttachmentSource::Path(path) => Ok(Box::new(File::open(path)?)),
            AttachmentSource::Member {
                source,
                storage_path,
                ..
            } => source.open_member(storage_path),
        }
    }

    /// Reads the whole payload.
    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        if let AttachmentSource::Bytes(bytes) = &self.source {
            return Ok(bytes.to_vec());
        }
        let mut buffer = Vec::new();
        self.open()?.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Local path of a filesystem-backed attachment.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            AttachmentSource::Path(path) => Some(path),
            _ => None,
        }
    }
}

/// Placeholder for an attachment stored out-of-line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileReference {
    /// Name reported to consumers.
    pub logical_path: String,
    /// Location of the bytes inside the container.
    pub storage_path: String,
}

impl FileReference {
    pub fn new(logical_path: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            logical_path: logical_path.into(),
            storage_path: storage_path.into(),
        }
    }

    /// Reference whose storage path equals its logical path.
    pub fn inline(logical_path: impl Into<String>) -> Self {
        let logical_path = logical_path.into();
        Self {
            storage_path: logical_path.clone(),
            logical_path,
        }
    }

    /// Encodes the placeholder object.
    ///
    /// `storage_path` is left out when it matches the logical path and
    /// `include_storage` is false.
    #[must_use]
    pub fn to_json(&self, include_storage: bool) -> JsonValue {
        let mut object = Map::new();
        object.insert(TYPE_KEY.to_string(), JsonValue::from(FILE_TYPE_TAG));
        object.insert("path".to_string(), JsonValue::from(self.logical_path.as_str()));
        if include_storage || self.storage_path != self.logical_path {
            object.insert(
                "storage_path".to_string(),
                JsonValue::from(self.storage_path.as_str()),
            );
        }
        JsonValue::Object(object)
    }

    /// Decodes a placeholder object.
    ///
    /// Returns `Ok(None)` when the object is not tagged as a file.
    pub fn from_json(object: &Map<String, JsonValue>) -> Result<Option<Self>> {
        if object.get(TYPE_KEY).and_then(JsonValue::as_str) != Some(FILE_TYPE_TAG) {
            return Ok(None);
        }
        let logical = object
            .get("path")
            .and_then(JsonValue::as_str)
            .ok_or(ShapeError::MissingReferencePath)?;
        let reference = match object.get("storage_path").and_then(JsonValue::as_str) {
            Some(storage) => Self::new(logical, storage),
            None => Self::inline(logical),
        };
        Ok(Some(reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_without_storage_path_uses_logical_path() {
        let json = serde_json::json!({"__type__": "File", "path": "assets/readme.txt"});
        let reference = FileReference::from_json(json.as_object().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(reference.storage_path, "assets/readme.txt");
    }

    #[test]
    fn untagged_object_is_not_a_reference() {
        let json = serde_json::json!({"path": "readme.txt"});
        assert!(
            FileReference::from_json(json.as_object().unwrap())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn tagged_object_without_path_is_rejected() {
        let json = serde_json::json!({"__type__": "File"});
        assert_eq!(
            FileReference::from_json(json.as_object().unwrap()),
            Err(ShapeError::MissingReferencePath)
        );
    }

    #[test]
    fn bytes_attachment_reopens() {
        let attachment = FileAttachment::from_bytes("a.txt", b"abc".to_vec());
        assert_eq!(attachment.read_bytes().unwrap(), b"abc");
        assert_eq!(attachment.read_bytes().unwrap(), b"abc");
        assert_eq!(attachment.size(), Some(3));
    }

    struct ShortMember;

    impl MemberSource for ShortMember {
        fn open_member(&self, _storage_path: &str) -> io::Result<Box<dyn Read>> {
            Ok(Box::new(Cursor::new(b"ok".to_vec())))
        }
    }

    #[test]
    fn test_member_size_does_not_size_the_read() {
        let attachment = FileAttachment::from_member("a.bin", "a.bin", 1 << 62, Rc::new(ShortMember));
        assert_eq!(attachment.size(), Some(1 << 62));
        assert_eq!(attachment.read_bytes().unwrap(), b"ok");
    }
}
