//! Model-backed tap: serializes native records out of a store, and stages
//! inbound records for persistence into one.

mod dir_store;
mod memory_store;
mod native;
mod store;

use std::collections::VecDeque;

use datatap_model::{Domain, Record};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

pub use dir_store::JsonDirStore;
pub use memory_store::MemoryStore;
pub use native::{
    MaterializedSource, NativeIter, NativeRecord, RecordSource, StoredRecord, serialize_native,
};
pub use store::{ModelStore, PersistedHandle, StagedRecord, is_valid_model, split_selector};

use crate::adapter::{ItemWriter, ReadAdapter, WriteAdapter};
use crate::error::{Result, TapError};
use crate::tap::{CommitReport, Inbound, RecordStream, Stream, Tap, WriteOutcome, close_after};

/// When inbound records reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Queue records and persist them on `commit()`.
    #[default]
    Staged,
    /// Persist each record as soon as it is written.
    Immediate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTapOptions {
    pub write_mode: WriteMode,
}

impl ModelTapOptions {
    #[must_use]
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }
}

/// Staging area between the inbound stream and the store.
struct Staging {
    store: Box<dyn ModelStore>,
    mode: WriteMode,
    pending: VecDeque<StagedRecord>,
    next_position: usize,
    committed: Vec<PersistedHandle>,
}

impl Staging {
    fn persist(&mut self, staged: &StagedRecord) -> Result<PersistedHandle> {
        let handle = self
            .store
            .save(staged)
            .map_err(|source| TapError::Persistence {
                position: staged.position,
                committed: self.committed.len(),
                source,
            })?;
        self.committed.push(handle.clone());
        Ok(handle)
    }

    /// Persists pending records in order. Stops at the first failure and
    /// leaves the failing record at the front of the queue.
    fn commit(&mut self) -> Result<usize> {
        let mut committed = 0;
        while let Some(staged) = self.pending.front().cloned() {
            self.persist(&staged)?;
            self.pending.pop_front();
            committed += 1;
        }
        Ok(committed)
    }
}

impl ItemWriter for Staging {
    fn write_item(&mut self, record: Record) -> Result<WriteOutcome> {
        let position = self.next_position;
        let staged = StagedRecord::from_record(ModelTap::IDENT, position, record)?;
        self.next_position += 1;
        match self.mode {
            WriteMode::Staged => {
                self.pending.push_back(staged);
                Ok(WriteOutcome::Staged { position })
            }
            WriteMode::Immediate => {
                let handle = self.persist(&staged)?;
                Ok(WriteOutcome::Persisted { position, handle })
            }
        }
    }
}

enum Role {
    Source {
        sources: Vec<Box<dyn RecordSource>>,
        opened: bool,
    },
    Sink {
        inner: Box<dyn Tap>,
        inbound: Inbound,
        staging: Staging,
    },
}

/// Tap over an external record store.
///
/// Without an inner tap it reads native records from its sources and
/// yields them as `{"model", "pk", "fields"}` records. Over a Primitive
/// tap it is a sink: inbound records are staged and persisted through a
/// [`ModelStore`].
pub struct ModelTap {
    role: Role,
    closed: bool,
}

impl ModelTap {
    pub const IDENT: &'static str = "Model";

    /// Source reading every record of `sources`, in order.
    pub fn source(sources: Vec<Box<dyn RecordSource>>) -> Self {
        Self {
            role: Role::Source {
                sources,
                opened: false,
            },
            closed: false,
        }
    }

    /// Source over records that are already materialized.
    pub fn from_records(records: Vec<Box<dyn NativeRecord>>) -> Self {
        Self::source(vec![Box::new(MaterializedSource::new(
            "materialized records",
            records,
        ))])
    }

    /// Source over the collections `selectors` resolve to in `store`.
    pub fn from_selectors(store: &dyn ModelStore, selectors: &[impl AsRef<str>]) -> Result<Self> {
        if selectors.is_empty() {
            return Err(TapError::resolution("", "no model selector given"));
        }
        let mut sources = Vec::new();
        for selector in selectors {
            sources.extend(store.resolve(selector.as_ref())?);
        }
        debug!(sources = sources.len(), "resolved model sources");
        Ok(Self::source(sources))
    }

    /// Sink persisting the records of `inner` into `store`.
    pub fn sink(
        inner: Box<dyn Tap>,
        store: Box<dyn ModelStore>,
        options: ModelTapOptions,
    ) -> Result<Self> {
        Self::negotiate(Some(inner.domain()))?;
        Ok(Self {
            role: Role::Sink {
                inner,
                inbound: Inbound::Unopened,
                staging: Staging {
                    store,
                    mode: options.write_mode,
                    pending: VecDeque::new(),
                    next_position: 0,
                    committed: Vec::new(),
                },
            },
            closed: false,
        })
    }

    pub fn negotiate(inner: Option<Domain>) -> Result<Domain> {
        match inner {
            None => Ok(Domain::Primitive),
            Some(Domain::Primitive) => Ok(Domain::Model),
            other => Err(TapError::mismatch(Self::IDENT, &[Domain::Primitive], other)),
        }
    }

    /// Handles of the records persisted so far, in order.
    #[must_use]
    pub fn committed(&self) -> &[PersistedHandle] {
        match &self.role {
            Role::Sink { staging, .. } => &staging.committed,
            Role::Source { .. } => &[],
        }
    }

    /// Records staged but not yet persisted.
    #[must_use]
    pub fn pending(&self) -> usize {
        match &self.role {
            Role::Sink { staging, .. } => staging.pending.len(),
            Role::Source { .. } => 0,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TapError::Closed { tap: Self::IDENT });
        }
        Ok(())
    }

    fn staging(&mut self) -> Result<&mut Staging> {
        match &mut self.role {
            Role::Sink { staging, .. } => Ok(staging),
            Role::Source { .. } => Err(TapError::unsupported(Self::IDENT, "writing to a model source")),
        }
    }
}

/// Expands every source into one lazily serialized record stream.
fn serialize_sources(sources: Vec<Box<dyn RecordSource>>) -> RecordStream {
    let natives = sources.into_iter().flat_map(|mut source| {
        debug!(source = %source.label(), "reading model source");
        match source.iterate() {
            Ok(natives) => natives,
            Err(error) => Box::new(std::iter::once(Err(error))) as NativeIter,
        }
    });
    Box::new(ReadAdapter::new(natives, |native: Box<dyn NativeRecord>| {
        Ok(serialize_native(native.as_ref()))
    }))
}

impl Tap for ModelTap {
    fn ident(&self) -> &'static str {
        Self::IDENT
    }

    fn domain(&self) -> Domain {
        match &self.role {
            Role::Source { .. } => Domain::Primitive,
            Role::Sink { .. } => Domain::Model,
        }
    }

    fn open_stream(&mut self) -> Result<Stream<'_>> {
        self.ensure_open()?;
        match &mut self.role {
            Role::Source { sources, opened } => {
                if *opened {
                    return Ok(Stream::empty(Domain::Primitive));
                }
                *opened = true;
                Ok(Stream::Primitive(serialize_sources(std::mem::take(sources))))
            }
            Role::Sink {
                inner,
                inbound,
                staging,
            } => {
                if *inbound == Inbound::Drained {
                    return Ok(Stream::empty(Domain::Model));
                }
                *inbound = Inbound::Drained;
                let records = inner.items()?;
                Ok(Stream::Model(Box::new(WriteAdapter::new(
                    Self::IDENT,
                    records,
                    staging,
                ))))
            }
        }
    }

    fn accepts_writes(&self) -> bool {
        matches!(self.role, Role::Sink { .. })
    }

    fn write(&mut self, record: Record) -> Result<WriteOutcome> {
        self.ensure_open()?;
        self.staging()?.write_item(record)
    }

    fn write_all(&mut self, records: RecordStream) -> Result<WriteAdapter<'_>> {
        self.ensure_open()?;
        let staging = self.staging()?;
        Ok(WriteAdapter::new(Self::IDENT, records, staging))
    }

    fn commit(&mut self) -> Result<CommitReport> {
        self.ensure_open()?;
        let Role::Sink {
            inner,
            inbound,
            staging,
        } = &mut self.role
        else {
            return Ok(CommitReport::default());
        };
        let _span = info_span!("commit", tap = Self::IDENT).entered();
        let mut processed = 0;
        if *inbound == Inbound::Unopened {
            *inbound = Inbound::Drained;
            let records = inner.items()?;
            processed = WriteAdapter::new(Self::IDENT, records, &mut *staging).close()?;
        }
        let committed = staging.commit()?;
        if processed > 0 || committed > 0 {
            info!(processed, committed, total = staging.committed.len(), "committed records");
        }
        Ok(CommitReport {
            processed,
            committed,
            bytes: 0,
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let outcome = self.commit().map(drop);
        self.closed = true;
        match &mut self.role {
            Role::Sink { inner, .. } => close_after(outcome, inner.as_mut()),
            Role::Source { sources, .. } => {
                sources.clear();
                outcome
            }
        }
    }

    fn origin(&self) -> Option<String> {
        match &self.role {
            Role::Source { .. } => Some(Self::IDENT.to_string()),
            Role::Sink { inner, .. } => inner.origin(),
        }
    }

    fn detect_originator(&mut self) -> Result<Option<String>> {
        match &mut self.role {
            Role::Source { .. } => Ok(Some(Self::IDENT.to_string())),
            Role::Sink { inner, .. } => inner.detect_originator(),
        }
    }
}
