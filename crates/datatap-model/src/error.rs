use thiserror::Error;

/// Errors raised when a value does not have the shape a record requires.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ShapeError {
    /// A record was built from something other than a JSON object.
    #[error("expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },

    /// A resolved attachment cannot be expressed as plain JSON.
    #[error("field '{field}' holds a file attachment that has not been externalized")]
    UnresolvedAttachment { field: String },

    /// A `File` placeholder object is missing its `path`.
    #[error("file reference is missing a string 'path'")]
    MissingReferencePath,

    /// Unknown domain name.
    #[error("unknown domain '{0}'")]
    UnknownDomain(String),
}

/// Result alias for shape conversions.
pub type Result<T> = std::result::Result<T, ShapeError>;
