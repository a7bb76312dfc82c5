//! The tap contract and the streams taps hand to each other.

use std::io::{self, Cursor, Read, Seek};

use datatap_model::{Domain, Record};
use serde::Serialize;

use crate::adapter::WriteAdapter;
use crate::error::{Result, TapError};
use crate::model::PersistedHandle;

/// Readers that can also seek.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Lazily pulled sequence of records.
///
/// Record streams own what they read from, so a tap can hand one to the
/// next stage and still be closed independently.
pub type RecordStream = Box<dyn Iterator<Item = Result<Record>>>;

/// Lazily pulled sequence of write outcomes from a model sink.
pub type ModelStream<'a> = Box<dyn Iterator<Item = Result<WriteOutcome>> + 'a>;

/// A byte stream that is either seekable or strictly sequential.
pub enum ByteStream {
    Seekable(Box<dyn ReadSeek>),
    Sequential(Box<dyn Read>),
}

impl ByteStream {
    pub fn seekable(reader: impl Read + Seek + 'static) -> Self {
        Self::Seekable(Box::new(reader))
    }

    pub fn sequential(reader: impl Read + 'static) -> Self {
        Self::Sequential(Box::new(reader))
    }

    /// A stream with no bytes.
    #[must_use]
    pub fn empty() -> Self {
        Self::seekable(Cursor::new(Vec::new()))
    }

    #[must_use]
    pub fn is_seekable(&self) -> bool {
        matches!(self, Self::Seekable(_))
    }

    /// Returns a seekable stream, buffering a sequential one into memory.
    pub fn into_seekable(self) -> io::Result<Box<dyn ReadSeek>> {
        match self {
            Self::Seekable(reader) => Ok(reader),
            Self::Sequential(mut reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer)?;
                Ok(Box::new(Cursor::new(buffer)))
            }
        }
    }

    /// Reads the remaining bytes.
    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Seekable(reader) => reader.read(buf),
            Self::Sequential(reader) => reader.read(buf),
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seekable(_) => f.write_str("ByteStream::Seekable"),
            Self::Sequential(_) => f.write_str("ByteStream::Sequential"),
        }
    }
}

/// The output of a tap, tagged by domain.
pub enum Stream<'a> {
    Bytes(ByteStream),
    Primitive(RecordStream),
    Model(ModelStream<'a>),
}

impl<'a> Stream<'a> {
    /// An exhausted stream of the given domain.
    #[must_use]
    pub fn empty(domain: Domain) -> Self {
        match domain {
            Domain::Bytes => Self::Bytes(ByteStream::empty()),
            Domain::Primitive => Self::Primitive(Box::new(std::iter::empty())),
            Domain::Model => Self::Model(Box::new(std::iter::empty())),
        }
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        match self {
            Self::Bytes(_) => Domain::Bytes,
            Self::Primitive(_) => Domain::Primitive,
            Self::Model(_) => Domain::Model,
        }
    }

    /// The record stream, or a domain mismatch on behalf of `tap`.
    pub fn into_records(self, tap: &'static str) -> Result<RecordStream> {
        match self {
            Self::Primitive(records) => Ok(records),
            other => Err(TapError::mismatch(
                tap,
                &[Domain::Primitive],
                Some(other.domain()),
            )),
        }
    }

    /// The byte stream, or a domain mismatch on behalf of `tap`.
    pub fn into_bytes(self, tap: &'static str) -> Result<ByteStream> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            other => Err(TapError::mismatch(tap, &[Domain::Bytes], Some(other.domain()))),
        }
    }
}

/// What happened to a record handed to a writable tap.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WriteOutcome {
    /// Appended to an in-memory queue.
    Queued { position: usize },
    /// Staged, awaiting `commit()`.
    Staged { position: usize },
    /// Persisted immediately.
    Persisted {
        position: usize,
        handle: PersistedHandle,
    },
}

impl WriteOutcome {
    /// Position of the record in the stream it came from.
    #[must_use]
    pub fn position(&self) -> usize {
        match self {
            Self::Queued { position }
            | Self::Staged { position }
            | Self::Persisted { position, .. } => *position,
        }
    }
}

/// Summary of a `commit()` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    /// Inbound records drained into the tap by this call.
    pub processed: usize,
    /// Records persisted by this call.
    pub committed: usize,
    /// Bytes written by this call.
    pub bytes: u64,
}

/// State of a sink's inbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Inbound {
    #[default]
    Unopened,
    /// The stream was handed out or drained; it is never reopened.
    Drained,
}

/// A stage of a pipeline.
///
/// A tap optionally owns an inner tap and produces a stream in the domain
/// its [`Tap::domain`] reports. Streams are lazy: nothing is read until the
/// returned stream is pulled. Opening a stream a second time yields an
/// empty stream.
pub trait Tap {
    /// Registry identifier.
    fn ident(&self) -> &'static str;

    /// Domain of the stream this tap produces.
    fn domain(&self) -> Domain;

    /// Opens the output stream.
    fn open_stream(&mut self) -> Result<Stream<'_>>;

    /// The Primitive-domain output.
    fn items(&mut self) -> Result<RecordStream> {
        let ident = self.ident();
        self.open_stream()?.into_records(ident)
    }

    /// Whether `write`/`write_all`/`commit` persist data.
    fn accepts_writes(&self) -> bool {
        false
    }

    /// Writes a single record.
    fn write(&mut self, record: Record) -> Result<WriteOutcome> {
        drop(record);
        Err(TapError::unsupported(self.ident(), "write"))
    }

    /// Starts a write pipeline over `records`. Records are written while the
    /// adapter is iterated, and the rest when it is closed or dropped.
    fn write_all(&mut self, records: RecordStream) -> Result<WriteAdapter<'_>> {
        drop(records);
        Err(TapError::unsupported(self.ident(), "write"))
    }

    /// Finalizes staged writes. Calling it again has no further effect.
    fn commit(&mut self) -> Result<CommitReport> {
        Ok(CommitReport::default())
    }

    /// Releases resources and closes the inner tap. Safe to call repeatedly.
    fn close(&mut self) -> Result<()>;

    /// Identifier of the tap type this data originally came from, if known.
    fn origin(&self) -> Option<String> {
        None
    }

    /// Like [`Tap::origin`], but may open the underlying source to find out.
    fn detect_originator(&mut self) -> Result<Option<String>> {
        Ok(self.origin())
    }
}

/// Closes `inner` after `outcome`, keeping the first error.
pub(crate) fn close_after(outcome: Result<()>, inner: &mut dyn Tap) -> Result<()> {
    let closed = inner.close();
    outcome.and(closed)
}
