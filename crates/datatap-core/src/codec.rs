//! Externalizing attachments out of records and resolving them back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use datatap_model::{FileAttachment, FileReference};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, TapError};

/// Moves attachment payloads out of records and back in.
pub trait FileReferenceCodec {
    /// Stores the attachment's bytes and returns the placeholder for it.
    fn externalize(&mut self, attachment: FileAttachment) -> Result<FileReference>;

    /// Returns a lazily opened attachment for a placeholder.
    fn resolve(&self, reference: &FileReference) -> Result<FileAttachment>;
}

/// Normalizes a logical name into a storage path.
///
/// Leading `/` and `.` segments are dropped and backslashes become `/`.
/// Empty names and `..` segments are rejected.
pub fn normalize_storage_path(tap: &'static str, logical: &str) -> Result<String> {
    let mut parts = Vec::new();
    for part in logical.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                return Err(TapError::malformed(
                    tap,
                    format!("attachment name '{logical}' escapes the container"),
                ));
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(TapError::malformed(tap, "attachment has an empty name"));
    }
    Ok(parts.join("/"))
}

/// Where an attachment's bytes ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// The bytes must be written under this path.
    New(String),
    /// Identical bytes are already stored under this path.
    Existing(String),
}

impl Placement {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::New(path) | Self::Existing(path) => path,
        }
    }
}

/// Chooses storage paths so that no two different payloads share one.
///
/// Identical payloads under the same name are stored once. A different
/// payload under a taken or reserved name goes to `<digest>/<name>`, where
/// `<digest>` is the first 16 hex digits of its SHA-256.
#[derive(Debug, Default)]
pub struct StoragePlanner {
    reserved: Vec<String>,
    stored: BTreeMap<String, String>,
}

impl StoragePlanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names that never hold attachments, such as the manifest.
    #[must_use]
    pub fn with_reserved(mut self, names: &[&str]) -> Self {
        self.reserved.extend(names.iter().map(|name| (*name).to_string()));
        self
    }

    /// Plans the storage path for `bytes` named `logical`.
    pub fn plan(&mut self, tap: &'static str, logical: &str, bytes: &[u8]) -> Result<Placement> {
        self.plan_around(tap, logical, bytes, |_| false)
    }

    /// Plans like [`plan`](Self::plan), also treating a path as taken when
    /// `occupied` reports that it already holds other bytes.
    pub fn plan_around(
        &mut self,
        tap: &'static str,
        logical: &str,
        bytes: &[u8],
        occupied: impl Fn(&str) -> bool,
    ) -> Result<Placement> {
        let base = normalize_storage_path(tap, logical)?;
        let digest = hex::encode(Sha256::digest(bytes));

        if !self.reserved.contains(&base) {
            match self.stored.get(&base) {
                None if !occupied(&base) => return Ok(self.claim(base, digest)),
                Some(existing) if *existing == digest => return Ok(Placement::Existing(base)),
                _ => {}
            }
        }

        let namespaced = format!("{}/{base}", &digest[..16]);
        match self.stored.get(&namespaced) {
            None if !occupied(&namespaced) => {
                debug!(tap, logical, path = %namespaced, "storage path collision, namespacing");
                Ok(self.claim(namespaced, digest))
            }
            Some(existing) if *existing == digest => Ok(Placement::Existing(namespaced)),
            _ => Err(TapError::malformed(
                tap,
                format!("cannot find a free storage path for '{logical}'"),
            )),
        }
    }

    /// Number of distinct payloads stored.
    #[must_use]
    pub fn stored(&self) -> usize {
        self.stored.len()
    }

    fn claim(&mut self, path: String, digest: String) -> Placement {
        self.stored.insert(path.clone(), digest);
        Placement::New(path)
    }
}

/// Stores attachments as files under a root directory.
#[derive(Debug)]
pub struct DirectoryCodec {
    root: PathBuf,
    planner: StoragePlanner,
}

impl DirectoryCodec {
    const IDENT: &'static str = "Directory";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            planner: StoragePlanner::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Plans against files already on disk as well, so a payload never
    /// overwrites a different one stored by an earlier codec.
    fn plan(&mut self, logical: &str, bytes: &[u8]) -> Result<Placement> {
        let root = &self.root;
        self.planner.plan_around(Self::IDENT, logical, bytes, |path| {
            differs_on_disk(root, path, bytes)
        })
    }
}

fn differs_on_disk(root: &Path, path: &str, bytes: &[u8]) -> bool {
    fs::read(root.join(path)).is_ok_and(|existing| existing != bytes)
}

impl FileReferenceCodec for DirectoryCodec {
    fn externalize(&mut self, attachment: FileAttachment) -> Result<FileReference> {
        let bytes = attachment
            .read_bytes()
            .map_err(|e| TapError::from_io("read attachment", attachment.name(), e))?;
        let placement = self.plan(attachment.name(), &bytes)?;
        if let Placement::New(path) = &placement {
            let target = self.root.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    TapError::from_io("create directory", parent.display().to_string(), e)
                })?;
            }
            fs::write(&target, &bytes)
                .map_err(|e| TapError::from_io("write", target.display().to_string(), e))?;
            debug!(path = %target.display(), bytes = bytes.len(), "stored attachment");
        }
        Ok(FileReference::new(attachment.name(), placement.path()))
    }

    fn resolve(&self, reference: &FileReference) -> Result<FileAttachment> {
        let storage = normalize_storage_path(Self::IDENT, &reference.storage_path)?;
        let path = self.root.join(&storage);
        if !path.is_file() {
            return Err(TapError::MissingAsset {
                tap: Self::IDENT,
                storage_path: reference.storage_path.clone(),
            });
        }
        Ok(FileAttachment::from_path(&reference.logical_path, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_leading_separators() {
        assert_eq!(
            normalize_storage_path("Zip", "/./assets//readme.txt").unwrap(),
            "assets/readme.txt"
        );
        assert_eq!(normalize_storage_path("Zip", "a\\b.txt").unwrap(), "a/b.txt");
    }

    #[test]
    fn normalize_rejects_parent_segments() {
        let error = normalize_storage_path("Zip", "../etc/passwd").unwrap_err();
        assert!(matches!(error, TapError::MalformedRecord { tap: "Zip", .. }));
        assert!(normalize_storage_path("Zip", "/").is_err());
    }

    #[test]
    fn identical_payloads_are_stored_once() {
        let mut planner = StoragePlanner::new();
        assert_eq!(
            planner.plan("Zip", "a.txt", b"same").unwrap(),
            Placement::New("a.txt".to_string())
        );
        assert_eq!(
            planner.plan("Zip", "a.txt", b"same").unwrap(),
            Placement::Existing("a.txt".to_string())
        );
        assert_eq!(planner.stored(), 1);
    }

    #[test]
    fn different_payloads_are_namespaced() {
        let mut planner = StoragePlanner::new();
        planner.plan("Zip", "a.txt", b"first").unwrap();
        let second = planner.plan("Zip", "a.txt", b"second").unwrap();
        let digest = hex::encode(Sha256::digest(b"second"));
        assert_eq!(second, Placement::New(format!("{}/a.txt", &digest[..16])));
    }

    #[test]
    fn reserved_names_are_namespaced() {
        let mut planner = StoragePlanner::new().with_reserved(&["manifest.json"]);
        let placement = planner.plan("Zip", "manifest.json", b"{}").unwrap();
        assert!(placement.path().ends_with("/manifest.json"));
        assert_ne!(placement.path(), "manifest.json");
    }

    #[test]
    fn directory_codec_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut codec = DirectoryCodec::new(dir.path());
        let reference = codec
            .externalize(FileAttachment::from_bytes("docs/readme.txt", b"hi".to_vec()))
            .unwrap();
        assert_eq!(reference.storage_path, "docs/readme.txt");

        let attachment = codec.resolve(&reference).unwrap();
        assert_eq!(attachment.name(), "docs/readme.txt");
        assert_eq!(attachment.read_bytes().unwrap(), b"hi");
    }

    #[test]
    fn test_occupied_paths_are_skipped() {
        let mut planner = StoragePlanner::new();
        let digest = hex::encode(Sha256::digest(b"new"));
        let namespaced = format!("{}/a.txt", &digest[..16]);
        let occupied = |path: &str| path == "a.txt";
        assert_eq!(
            planner.plan_around("Zip", "a.txt", b"new", occupied).unwrap(),
            Placement::New(namespaced.clone())
        );
        assert_eq!(
            planner.plan_around("Zip", "a.txt", b"new", occupied).unwrap(),
            Placement::Existing(namespaced)
        );
    }

    #[test]
    fn test_directory_codec_never_points_at_older_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cover.png"), b"OLD").unwrap();
        let mut codec = DirectoryCodec::new(dir.path());

        let first = codec
            .externalize(FileAttachment::from_bytes("cover.png", b"NEW".to_vec()))
            .unwrap();
        let second = codec
            .externalize(FileAttachment::from_bytes("cover.png", b"NEW".to_vec()))
            .unwrap();

        assert_ne!(first.storage_path, "cover.png");
        assert_eq!(second.storage_path, first.storage_path);
        for reference in [&first, &second] {
            let attachment = codec.resolve(reference).unwrap();
            assert_eq!(attachment.read_bytes().unwrap(), b"NEW");
        }
        assert_eq!(fs::read(dir.path().join("cover.png")).unwrap(), b"OLD");
    }

    #[test]
    fn directory_codec_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let codec = DirectoryCodec::new(dir.path());
        let error = codec
            .resolve(&FileReference::inline("absent.bin"))
            .unwrap_err();
        assert!(matches!(error, TapError::MissingAsset { .. }));
    }
}
