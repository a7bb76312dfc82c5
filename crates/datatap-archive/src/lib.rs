//! Container codec taps backed by zip, tar and tar.gz archives.
//!
//! A container holds `manifest.json` (the encoded records), one member per
//! distinct attachment payload, and optionally `originator.txt` naming the
//! tap the records were exported from.
//!
//! # Example
//!
//! ```no_run
//! use datatap_archive::{ContainerFormat, ContainerTap};
//! use datatap_core::{FileTap, MemoryTap, Tap};
//!
//! fn export(records: Vec<datatap_core::Record>) -> datatap_core::Result<()> {
//!     let source = MemoryTap::from_records(records);
//!     let zip = ContainerTap::new(ContainerFormat::Zip, Box::new(source))?;
//!     let mut sink = FileTap::create("export.zip", Box::new(zip))?;
//!     sink.commit()?;
//!     sink.close()
//! }
//! ```

mod backend;
pub mod container;
pub mod error;
pub mod format;

pub use backend::MemberInfo;
pub use container::{ContainerTap, MANIFEST_NAME, ORIGINATOR_NAME, SendSummary};
pub use error::ArchiveError;
pub use format::{Compression, ContainerFormat, ContainerOptions};
