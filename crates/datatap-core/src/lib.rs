//! Composable taps for moving records between byte streams, serialization
//! formats and record stores.
//!
//! # Overview
//!
//! A [`Tap`] is one stage of a pipeline. Each tap owns an optional inner
//! tap and produces a lazy [`Stream`] in one of three [`Domain`]s:
//!
//! - `Bytes` - raw bytes, seekable or sequential ([`ByteStream`])
//! - `Primitive` - records of plain values and file attachments
//! - `Model` - outcomes of records persisted into a [`ModelStore`]
//!
//! Taps check the domain of their inner tap when they are built, so a
//! mis-wired chain fails before any data moves.
//!
//! # Example
//!
//! ```no_run
//! use datatap_core::{FileTap, JsonTap, MemoryTap, Tap};
//!
//! fn export(path: &str) -> datatap_core::Result<()> {
//!     let source = FileTap::open(path);
//!     let json = JsonTap::new(Box::new(source))?;
//!     let mut memory = MemoryTap::collecting(Box::new(json))?;
//!     let records: Vec<_> = memory.items()?.collect::<datatap_core::Result<_>>()?;
//!     println!("{} records", records.len());
//!     memory.close()
//! }
//! ```

pub mod adapter;
pub mod codec;
pub mod error;
pub mod json;
pub mod memory;
pub mod model;
pub mod stream;
pub mod tap;

pub use datatap_model::{
    AttachmentSource, Domain, FileAttachment, FileReference, MemberSource, Record, Value,
};

pub use adapter::{ItemWriter, ReadAdapter, WriteAdapter};
pub use codec::{
    DirectoryCodec, FileReferenceCodec, Placement, StoragePlanner, normalize_storage_path,
};
pub use error::{ErrorKind, Result, StoreError, TapError};
pub use json::{
    AttachmentPolicy, JsonArrayWriter, JsonOptions, JsonTap, RecordDecoder, RecordEncoder,
    parse_manifest,
};
pub use memory::MemoryTap;
pub use model::{
    JsonDirStore, MaterializedSource, MemoryStore, ModelStore, ModelTap, ModelTapOptions,
    NativeRecord, PersistedHandle, RecordSource, StagedRecord, StoredRecord, WriteMode,
};
pub use stream::{BytesTap, FileTap, StreamTap};
pub use tap::{
    ByteStream, CommitReport, Inbound, ModelStream, ReadSeek, RecordStream, Stream, Tap,
    WriteOutcome,
};
