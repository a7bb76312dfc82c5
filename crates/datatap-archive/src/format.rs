//! Container formats and their write options.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Archive format backing a container tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerFormat {
    Zip,
    Tar,
    TarGz,
}

impl ContainerFormat {
    pub const ALL: [Self; 3] = [Self::Zip, Self::Tar, Self::TarGz];

    /// Registry identifier of the tap for this format.
    #[must_use]
    pub const fn ident(&self) -> &'static str {
        match self {
            Self::Zip => "Zip",
            Self::Tar => "Tar",
            Self::TarGz => "TarGz",
        }
    }

    /// Get a human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Zip => "ZIP",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
        }
    }

    /// Looks a format up by its tap identifier.
    #[must_use]
    pub fn from_ident(ident: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.ident() == ident)
    }

    /// Detects the format from a file name.
    #[must_use]
    pub fn detect(path: impl AsRef<Path>) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_str()?.to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// How member payloads are compressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Deflate for zip members, gzip for tar.gz.
    #[default]
    Deflated,
    /// No compression. tar.gz still gzips the whole stream at level 0.
    Stored,
}

/// Options for writing a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOptions {
    pub compression: Compression,
    /// Compression level, 0-9. `None` uses the library default.
    pub level: Option<u32>,
    /// Written to `originator.txt` instead of the upstream origin.
    pub originator: Option<String>,
    /// Pretty-print `manifest.json`.
    pub pretty: bool,
}

impl ContainerOptions {
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Some(level.min(9));
        self
    }

    #[must_use]
    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.originator = Some(originator.into());
        self
    }

    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub(crate) fn gzip_level(&self) -> flate2::Compression {
        match (self.compression, self.level) {
            (Compression::Stored, _) => flate2::Compression::none(),
            (Compression::Deflated, Some(level)) => flate2::Compression::new(level),
            (Compression::Deflated, None) => flate2::Compression::default(),
        }
    }
}
