//! Error types for taps and stores.

use std::io;
use std::path::PathBuf;

use datatap_model::{Domain, ShapeError};
use thiserror::Error;

/// Errors raised while building or driving a tap pipeline.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TapError {
    /// A tap was given an inner tap whose domain it cannot consume.
    #[error("{tap} cannot consume {} (expected {})", found_label(.found), expected_label(.expected))]
    DomainMismatch {
        tap: &'static str,
        /// Inner domains the tap accepts. Empty when it takes no inner tap.
        expected: Vec<Domain>,
        /// Domain of the inner tap, `None` when there is no inner tap.
        found: Option<Domain>,
    },

    /// The tap does not support the requested direction.
    #[error("{tap} does not support {operation}")]
    UnsupportedOperation {
        tap: &'static str,
        operation: &'static str,
    },

    /// A file reference names a member that does not exist.
    #[error("{tap} has no member '{storage_path}'")]
    MissingAsset {
        tap: &'static str,
        storage_path: String,
    },

    /// A source selector or tap identifier could not be resolved.
    #[error("cannot resolve '{selector}': {reason}")]
    Resolution { selector: String, reason: String },

    /// The store rejected a record during commit.
    #[error("failed to persist record #{position} ({committed} committed before it)")]
    Persistence {
        /// Position of the failing record in the inbound stream.
        position: usize,
        /// Records persisted before the failure.
        committed: usize,
        #[source]
        source: StoreError,
    },

    /// A record does not have the shape the tap requires.
    #[error("{tap} received a malformed record: {reason}")]
    MalformedRecord { tap: &'static str, reason: String },

    /// I/O error on a file or stream.
    #[error("failed to {operation} {target}")]
    Io {
        operation: &'static str,
        target: String,
        #[source]
        source: io::Error,
    },

    /// Input that is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure inside an archive or storage back end.
    #[error("{tap} back end failed: {source}")]
    Backend {
        tap: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The tap was used after `close()`.
    #[error("{tap} is closed")]
    Closed { tap: &'static str },
}

/// Stable classification of [`TapError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DomainMismatch,
    UnsupportedOperation,
    MissingAsset,
    Resolution,
    Persistence,
    MalformedRecord,
    Io,
    Json,
    Backend,
    Closed,
}

impl ErrorKind {
    /// Kebab-case label used in CLI diagnostics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::DomainMismatch => "domain-mismatch",
            Self::UnsupportedOperation => "unsupported-operation",
            Self::MissingAsset => "missing-asset",
            Self::Resolution => "resolution",
            Self::Persistence => "persistence",
            Self::MalformedRecord => "malformed-record",
            Self::Io => "io",
            Self::Json => "json",
            Self::Backend => "backend",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl TapError {
    pub fn unsupported(tap: &'static str, operation: &'static str) -> Self {
        Self::UnsupportedOperation { tap, operation }
    }

    pub fn malformed(tap: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            tap,
            reason: reason.into(),
        }
    }

    pub fn mismatch(tap: &'static str, expected: &[Domain], found: Option<Domain>) -> Self {
        Self::DomainMismatch {
            tap,
            expected: expected.to_vec(),
            found,
        }
    }

    pub fn resolution(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    pub fn backend(
        tap: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Backend {
            tap,
            source: source.into(),
        }
    }

    /// Wraps an I/O error, unwrapping a `TapError` carried through a
    /// `Read` implementation.
    pub fn from_io(operation: &'static str, target: impl Into<String>, error: io::Error) -> Self {
        match error.downcast::<TapError>() {
            Ok(inner) => inner,
            Err(error) => Self::Io {
                operation,
                target: target.into(),
                source: error,
            },
        }
    }

    /// Classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DomainMismatch { .. } => ErrorKind::DomainMismatch,
            Self::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            Self::MissingAsset { .. } => ErrorKind::MissingAsset,
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::MalformedRecord { .. } => ErrorKind::MalformedRecord,
            Self::Io { .. } => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Closed { .. } => ErrorKind::Closed,
        }
    }

    /// Identifier of the tap that raised the error, when known.
    #[must_use]
    pub fn tap(&self) -> Option<&'static str> {
        match self {
            Self::DomainMismatch { tap, .. }
            | Self::UnsupportedOperation { tap, .. }
            | Self::MissingAsset { tap, .. }
            | Self::MalformedRecord { tap, .. }
            | Self::Backend { tap, .. }
            | Self::Closed { tap } => Some(*tap),
            Self::Persistence { .. } => Some("Model"),
            Self::Resolution { .. } | Self::Io { .. } | Self::Json(_) => None,
        }
    }

    /// Returns a user-friendly message suitable for display.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::DomainMismatch { .. } => "These taps cannot be chained in this order.",
            Self::UnsupportedOperation { .. } => "This tap cannot be used in that direction.",
            Self::MissingAsset { .. } => "A referenced file is missing from the container.",
            Self::Resolution { .. } => "The requested source could not be found.",
            Self::Persistence { .. } => "Some records could not be saved.",
            Self::MalformedRecord { .. } | Self::Json(_) => "The input data is not in the expected format.",
            Self::Io { .. } => "A file could not be read or written.",
            Self::Backend { .. } => "The archive could not be processed.",
            Self::Closed { .. } => "The pipeline was already closed.",
        }
    }
}

impl From<ShapeError> for TapError {
    fn from(error: ShapeError) -> Self {
        Self::MalformedRecord {
            tap: "record",
            reason: error.to_string(),
        }
    }
}

fn found_label(found: &Option<Domain>) -> String {
    match found {
        Some(domain) => format!("{domain} input"),
        None => "a missing inner tap".to_string(),
    }
}

fn expected_label(expected: &[Domain]) -> String {
    if expected.is_empty() {
        return "no inner tap".to_string();
    }
    let names: Vec<&str> = expected.iter().map(Domain::as_str).collect();
    names.join(" or ")
}

/// Errors reported by a model store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store has no collection for the model.
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    /// The store refused the record.
    #[error("record rejected: {0}")]
    Rejected(String),

    /// Reading an attachment's payload failed.
    #[error("failed to read attachment '{name}'")]
    Attachment {
        name: String,
        #[source]
        source: io::Error,
    },

    /// I/O error on the store's files.
    #[error("failed to {operation} {}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stored data is not valid JSON.
    #[error("invalid stored data: {0}")]
    Json(#[from] serde_json::Error),

    /// Encoding a record for storage failed.
    #[error("failed to encode record: {0}")]
    Encode(#[source] Box<TapError>),
}

/// Result type for tap operations.
pub type Result<T> = std::result::Result<T, TapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_domains() {
        let error = TapError::mismatch("JSON", &[Domain::Bytes, Domain::Primitive], None);
        assert_eq!(
            error.to_string(),
            "JSON cannot consume a missing inner tap (expected bytes or primitive)"
        );
        assert_eq!(error.kind().label(), "domain-mismatch");
        assert_eq!(error.tap(), Some("JSON"));
    }

    #[test]
    fn from_io_unwraps_nested_tap_errors() {
        let inner = TapError::malformed("JSON", "bad value");
        let error = TapError::from_io("read", "stream", io::Error::other(inner));
        assert_eq!(error.kind(), ErrorKind::MalformedRecord);

        let plain = TapError::from_io("read", "stream", io::Error::other("boom"));
        assert_eq!(plain.kind(), ErrorKind::Io);
    }
}
