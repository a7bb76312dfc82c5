//! Error types for archive back ends.

use std::io;

use datatap_core::TapError;
use thiserror::Error;

/// Errors raised by the zip and tar back ends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    /// The zip library rejected the archive.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error while reading or writing the archive.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No member is stored under the requested path.
    #[error("member '{0}' not found")]
    MemberNotFound(String),

    /// A member's recorded size runs past the end of the archive.
    #[error("member '{0}' extends past the end of the archive")]
    Truncated(String),

    /// The archive handle was released by `close()`.
    #[error("archive is closed")]
    Closed,
}

impl ArchiveError {
    /// Converts to the pipeline error reported by `tap`.
    #[must_use]
    pub fn into_tap_error(self, tap: &'static str) -> TapError {
        match self {
            Self::MemberNotFound(storage_path) => TapError::MissingAsset { tap, storage_path },
            Self::Closed => TapError::Closed { tap },
            other => TapError::backend(tap, other),
        }
    }
}

/// Result type alias for archive back ends.
pub type Result<T> = std::result::Result<T, ArchiveError>;
