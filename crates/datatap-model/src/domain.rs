//! Data domains a tap can consume or produce.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

/// Representation of the data flowing out of a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Raw byte stream (files, archives, stdin/stdout).
    Bytes,
    /// JSON-compatible records.
    Primitive,
    /// Native records owned by an external store.
    Model,
}

impl Domain {
    /// All domains in declaration order.
    pub const ALL: [Domain; 3] = [Domain::Bytes, Domain::Primitive, Domain::Model];

    /// Lowercase name used in diagnostics and tables.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bytes => "bytes",
            Self::Primitive => "primitive",
            Self::Model => "model",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = ShapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|domain| domain.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ShapeError::UnknownDomain(s.to_string()))
    }
}
