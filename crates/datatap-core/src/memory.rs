//! In-memory record queue.

use std::collections::VecDeque;

use datatap_model::{Domain, Record};
use tracing::debug;

use crate::adapter::{ItemWriter, WriteAdapter};
use crate::error::{Result, TapError};
use crate::tap::{CommitReport, Inbound, RecordStream, Stream, Tap, WriteOutcome, close_after};

#[derive(Debug, Default)]
struct Queue {
    records: VecDeque<Record>,
    written: usize,
}

impl ItemWriter for Queue {
    fn write_item(&mut self, record: Record) -> Result<WriteOutcome> {
        let position = self.written;
        self.records.push_back(record);
        self.written += 1;
        Ok(WriteOutcome::Queued { position })
    }
}

/// A FIFO queue of records.
///
/// As a source, opening the stream takes every queued record; reopening
/// yields only records written since. With an inner Primitive tap it
/// collects the inner records on `commit()` or when its own stream is
/// opened.
#[derive(Default)]
pub struct MemoryTap {
    queue: Queue,
    inner: Option<Box<dyn Tap>>,
    inbound: Inbound,
    closed: bool,
}

impl MemoryTap {
    pub const IDENT: &'static str = "Memory";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Source pre-filled with `records`.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let records: VecDeque<Record> = records.into_iter().collect();
        Self {
            queue: Queue {
                written: records.len(),
                records,
            },
            ..Self::default()
        }
    }

    /// Sink collecting the records of `inner`.
    pub fn collecting(inner: Box<dyn Tap>) -> Result<Self> {
        Self::negotiate(Some(inner.domain()))?;
        Ok(Self {
            inner: Some(inner),
            ..Self::default()
        })
    }

    pub fn negotiate(inner: Option<Domain>) -> Result<Domain> {
        match inner {
            None | Some(Domain::Primitive) => Ok(Domain::Primitive),
            other => Err(TapError::mismatch(Self::IDENT, &[Domain::Primitive], other)),
        }
    }

    /// Records currently queued, in order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.queue.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.records.is_empty()
    }

    fn drain_inbound(&mut self) -> Result<usize> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        if self.inbound == Inbound::Drained {
            return Ok(0);
        }
        self.inbound = Inbound::Drained;
        let records = inner.items()?;
        let processed = WriteAdapter::new(Self::IDENT, records, &mut self.queue).close()?;
        debug!(processed, "collected inner records");
        Ok(processed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TapError::Closed { tap: Self::IDENT });
        }
        Ok(())
    }
}

impl Tap for MemoryTap {
    fn ident(&self) -> &'static str {
        Self::IDENT
    }

    fn domain(&self) -> Domain {
        Domain::Primitive
    }

    fn open_stream(&mut self) -> Result<Stream<'_>> {
        self.ensure_open()?;
        self.drain_inbound()?;
        let records = std::mem::take(&mut self.queue.records);
        Ok(Stream::Primitive(Box::new(
            records.into_iter().map(Ok::<Record, TapError>),
        )))
    }

    fn accepts_writes(&self) -> bool {
        true
    }

    fn write(&mut self, record: Record) -> Result<WriteOutcome> {
        self.ensure_open()?;
        self.queue.write_item(record)
    }

    fn write_all(&mut self, records: RecordStream) -> Result<WriteAdapter<'_>> {
        self.ensure_open()?;
        Ok(WriteAdapter::new(Self::IDENT, records, &mut self.queue))
    }

    fn commit(&mut self) -> Result<CommitReport> {
        self.ensure_open()?;
        let processed = self.drain_inbound()?;
        Ok(CommitReport {
            processed,
            ..CommitReport::default()
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.inner.as_mut() {
            Some(inner) => close_after(Ok(()), inner.as_mut()),
            None => Ok(()),
        }
    }

    fn origin(&self) -> Option<String> {
        self.inner.as_ref().and_then(|inner| inner.origin())
    }

    fn detect_originator(&mut self) -> Result<Option<String>> {
        match self.inner.as_mut() {
            Some(inner) => inner.detect_originator(),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: i64) -> Record {
        Record::new().with_field("n", n)
    }

    #[test]
    fn source_is_restartable_once() {
        let mut tap = MemoryTap::from_records([record(1), record(2)]);
        assert_eq!(tap.items().unwrap().count(), 2);
        assert_eq!(tap.items().unwrap().count(), 0);
    }

    #[test]
    fn write_all_appends_on_close() {
        let mut tap = MemoryTap::new();
        let records: RecordStream = Box::new((0..3).map(|n| Ok(record(n))));
        let written = tap.write_all(records).unwrap().written().unwrap();
        assert_eq!(written, 3);
        assert_eq!(tap.len(), 3);
    }

    #[test]
    fn collecting_sink_drains_inner_on_commit() {
        let source = MemoryTap::from_records([record(1), record(2), record(3)]);
        let mut sink = MemoryTap::collecting(Box::new(source)).unwrap();
        let report = sink.commit().unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(sink.commit().unwrap().processed, 0);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn closed_tap_rejects_writes() {
        let mut tap = MemoryTap::new();
        tap.close().unwrap();
        tap.close().unwrap();
        assert!(matches!(tap.write(record(1)), Err(TapError::Closed { .. })));
    }
}
