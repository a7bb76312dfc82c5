//! Adapters between native sequences, record streams and writers.

use datatap_model::Record;
use tracing::{debug, warn};

use crate::error::Result;
use crate::tap::{RecordStream, WriteOutcome};

/// Receives records one at a time.
pub trait ItemWriter {
    fn write_item(&mut self, record: Record) -> Result<WriteOutcome>;
}

/// Maps a native sequence to records, one pulled item at a time.
pub struct ReadAdapter<I, F> {
    inner: I,
    transform: F,
}

impl<I, F> ReadAdapter<I, F> {
    pub fn new(inner: I, transform: F) -> Self {
        Self { inner, transform }
    }
}

impl<I, F, T> Iterator for ReadAdapter<I, F>
where
    I: Iterator<Item = Result<T>>,
    F: FnMut(T) -> Result<Record>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.and_then(&mut self.transform))
    }
}

/// Feeds an inbound record stream into a writer.
///
/// Iterating writes one record per step and yields its outcome. `close()`
/// writes whatever is left; so does dropping an adapter that was never
/// closed.
pub struct WriteAdapter<'a> {
    tap: &'static str,
    source: RecordStream,
    writer: &'a mut dyn ItemWriter,
    processed: usize,
    closed: bool,
}

impl<'a> WriteAdapter<'a> {
    pub fn new(tap: &'static str, source: RecordStream, writer: &'a mut dyn ItemWriter) -> Self {
        Self {
            tap,
            source,
            writer,
            processed: 0,
            closed: false,
        }
    }

    /// Records written so far.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes every remaining record and returns the total processed count.
    ///
    /// The first failure stops the drain; the adapter stays closed either way.
    pub fn close(&mut self) -> Result<usize> {
        if self.closed {
            return Ok(self.processed);
        }
        self.closed = true;
        for record in self.source.by_ref() {
            self.writer.write_item(record?)?;
            self.processed += 1;
        }
        debug!(tap = self.tap, processed = self.processed, "write adapter drained");
        Ok(self.processed)
    }

    /// Drains the adapter and returns the processed count.
    pub fn written(&mut self) -> Result<usize> {
        self.close()
    }
}

impl Iterator for WriteAdapter<'_> {
    type Item = Result<WriteOutcome>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        let Some(record) = self.source.next() else {
            self.closed = true;
            return None;
        };
        let outcome = record.and_then(|record| self.writer.write_item(record));
        if outcome.is_ok() {
            self.processed += 1;
        }
        Some(outcome)
    }
}

impl Drop for WriteAdapter<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(error) = self.close() {
            warn!(tap = self.tap, %error, "failed to drain write adapter");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TapError;

    #[derive(Default)]
    struct Collect {
        seen: Vec<Record>,
    }

    impl ItemWriter for Collect {
        fn write_item(&mut self, record: Record) -> Result<WriteOutcome> {
            self.seen.push(record);
            Ok(WriteOutcome::Queued {
                position: self.seen.len() - 1,
            })
        }
    }

    fn numbered(count: i64) -> RecordStream {
        Box::new((0..count).map(|n| Ok(Record::new().with_field("n", n))))
    }

    #[test]
    fn close_drains_remaining_records_once() {
        let mut writer = Collect::default();
        let mut adapter = WriteAdapter::new("Memory", numbered(5), &mut writer);
        let first = adapter.next().unwrap().unwrap();
        assert_eq!(first.position(), 0);
        assert_eq!(adapter.close().unwrap(), 5);
        assert_eq!(adapter.close().unwrap(), 5);
        assert!(adapter.next().is_none());
        drop(adapter);
        assert_eq!(writer.seen.len(), 5);
    }

    #[test]
    fn drop_drains_unclosed_adapter() {
        let mut writer = Collect::default();
        drop(WriteAdapter::new("Memory", numbered(3), &mut writer));
        assert_eq!(writer.seen.len(), 3);
    }

    #[test]
    fn written_reports_total_after_partial_iteration() {
        let mut writer = Collect::default();
        let mut adapter = WriteAdapter::new("Memory", numbered(4), &mut writer);
        adapter.next();
        adapter.next();
        assert_eq!(adapter.processed(), 2);
        assert_eq!(adapter.written().unwrap(), 4);
    }

    #[test]
    fn close_stops_at_first_error() {
        let source: RecordStream = Box::new(
            vec![
                Ok(Record::new()),
                Err(TapError::malformed("JSON", "bad")),
                Ok(Record::new()),
            ]
            .into_iter(),
        );
        let mut writer = Collect::default();
        let mut adapter = WriteAdapter::new("Memory", source, &mut writer);
        assert!(adapter.close().is_err());
        assert!(adapter.is_closed());
        drop(adapter);
        assert_eq!(writer.seen.len(), 1);
    }

    #[test]
    fn read_adapter_transforms_lazily() {
        let mut pulled = 0;
        let natives = (0..3).map(|n| {
            pulled += 1;
            Ok::<i64, TapError>(n)
        });
        let mut adapter = ReadAdapter::new(natives, |n: i64| {
            Ok::<_, TapError>(Record::new().with_field("n", n))
        });
        let first = adapter.next().unwrap().unwrap();
        assert_eq!(first.get("n"), Some(&datatap_model::Value::from(0_i64)));
        drop(adapter);
        assert_eq!(pulled, 1);
    }
}
