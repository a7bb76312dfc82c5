//! Byte-level taps: in-memory bytes, files, and arbitrary readers/writers.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use datatap_model::Domain;
use tracing::{debug, info};

use crate::error::{Result, TapError};
use crate::tap::{ByteStream, CommitReport, Stream, Tap, close_after};

/// Decision table shared by the byte taps: a source without an inner tap,
/// or a sink over a Bytes tap.
fn negotiate_bytes(tap: &'static str, inner: Option<Domain>) -> Result<Domain> {
    match inner {
        None | Some(Domain::Bytes) => Ok(Domain::Bytes),
        other => Err(TapError::mismatch(tap, &[Domain::Bytes], other)),
    }
}

/// In-memory byte source.
#[derive(Debug)]
pub struct BytesTap {
    bytes: Option<Vec<u8>>,
}

impl BytesTap {
    pub const IDENT: &'static str = "Bytes";

    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Some(bytes.into()),
        }
    }
}

impl Tap for BytesTap {
    fn ident(&self) -> &'static str {
        Self::IDENT
    }

    fn domain(&self) -> Domain {
        Domain::Bytes
    }

    fn open_stream(&mut self) -> Result<Stream<'_>> {
        let bytes = self.bytes.take().unwrap_or_default();
        Ok(Stream::Bytes(ByteStream::seekable(Cursor::new(bytes))))
    }

    fn close(&mut self) -> Result<()> {
        self.bytes = None;
        Ok(())
    }
}

/// Reads a file, or writes the inner byte stream to one on `commit()`.
pub struct FileTap {
    path: PathBuf,
    inner: Option<Box<dyn Tap>>,
    opened: bool,
    committed: bool,
    closed: bool,
}

impl FileTap {
    pub const IDENT: &'static str = "File";

    /// Source reading `path`. The file is opened when the stream is.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: None,
            opened: false,
            committed: false,
            closed: false,
        }
    }

    /// Sink writing the bytes of `inner` to `path`.
    pub fn create(path: impl Into<PathBuf>, inner: Box<dyn Tap>) -> Result<Self> {
        negotiate_bytes(Self::IDENT, Some(inner.domain()))?;
        Ok(Self {
            inner: Some(inner),
            ..Self::open(path)
        })
    }

    pub fn negotiate(inner: Option<Domain>) -> Result<Domain> {
        negotiate_bytes(Self::IDENT, inner)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }

    /// Copies `source` into a sibling temp file, then renames it over the
    /// target so readers never see a partial file.
    fn write_atomically(&self, source: &mut impl Read) -> Result<u64> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                TapError::from_io("create directory", parent.display().to_string(), e)
            })?;
        }
        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let written = match copy_into_file(&temp_path, source) {
            Ok(written) => written,
            Err(error) => {
                let _ = fs::remove_file(&temp_path);
                return Err(TapError::from_io("write", self.target(), error));
            }
        };
        fs::rename(&temp_path, &self.path)
            .map_err(|e| TapError::from_io("rename", self.target(), e))?;
        Ok(written)
    }
}

fn copy_into_file(path: &Path, source: &mut impl Read) -> io::Result<u64> {
    let mut file = File::create(path)?;
    let written = io::copy(source, &mut file)?;
    file.sync_all()?;
    Ok(written)
}

impl Tap for FileTap {
    fn ident(&self) -> &'static str {
        Self::IDENT
    }

    fn domain(&self) -> Domain {
        Domain::Bytes
    }

    fn open_stream(&mut self) -> Result<Stream<'_>> {
        if self.closed {
            return Err(TapError::Closed { tap: Self::IDENT });
        }
        if self.inner.is_some() {
            return Err(TapError::unsupported(Self::IDENT, "reading from a file sink"));
        }
        if self.opened {
            return Ok(Stream::empty(Domain::Bytes));
        }
        self.opened = true;
        let file = File::open(&self.path).map_err(|e| TapError::from_io("open", self.target(), e))?;
        debug!(path = %self.path.display(), "opened file");
        Ok(Stream::Bytes(ByteStream::seekable(file)))
    }

    fn accepts_writes(&self) -> bool {
        self.inner.is_some()
    }

    fn commit(&mut self) -> Result<CommitReport> {
        if self.closed {
            return Err(TapError::Closed { tap: Self::IDENT });
        }
        if self.committed {
            return Ok(CommitReport::default());
        }
        let Some(inner) = self.inner.as_mut() else {
            return Ok(CommitReport::default());
        };
        self.committed = true;
        let mut bytes = inner.open_stream()?.into_bytes(Self::IDENT)?;
        let written = self.write_atomically(&mut bytes)?;
        info!(path = %self.path.display(), bytes = written, "wrote file");
        Ok(CommitReport {
            bytes: written,
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
}

/// Reads from any reader, or copies the inner byte stream into any writer.
pub struct StreamTap {
    label: String,
    input: Option<Box<dyn Read>>,
    output: Option<Box<dyn Write>>,
    inner: Option<Box<dyn Tap>>,
    committed: bool,
    closed: bool,
}

impl StreamTap {
    pub const IDENT: &'static str = "Stream";

    /// Source reading standard input.
    #[must_use]
    pub fn stdin() -> Self {
        Self::from_reader("stdin", io::stdin())
    }

    pub fn from_reader(label: impl Into<String>, reader: impl Read + 'static) -> Self {
        Self {
            label: label.into(),
            input: Some(Box::new(reader)),
            output: None,
            inner: None,
            committed: false,
            closed: false,
        }
    }

    /// Sink writing the bytes of `inner` to standard output.
    pub fn stdout(inner: Box<dyn Tap>) -> Result<Self> {
        Self::to_writer(inner, "stdout", io::stdout())
    }

    pub fn to_writer(
        inner: Box<dyn Tap>,
        label: impl Into<String>,
        writer: impl Write + 'static,
    ) -> Result<Self> {
        negotiate_bytes(Self::IDENT, Some(inner.domain()))?;
        Ok(Self {
            label: label.into(),
            input: None,
            output: Some(Box::new(writer)),
            inner: Some(inner),
            committed: false,
            closed: false,
        })
    }

    pub fn negotiate(inner: Option<Domain>) -> Result<Domain> {
        negotiate_bytes(Self::IDENT, inner)
    }
}

impl Tap for StreamTap {
    fn ident(&self) -> &'static str {
        Self::IDENT
    }

    fn domain(&self) -> Domain {
        Domain::Bytes
    }

    fn open_stream(&mut self) -> Result<Stream<'_>> {
        if self.closed {
            return Err(TapError::Closed { tap: Self::IDENT });
        }
        if self.inner.is_some() {
            return Err(TapError::unsupported(Self::IDENT, "reading from an output stream"));
        }
        Ok(Stream::Bytes(match self.input.take() {
            Some(reader) => ByteStream::Sequential(reader),
            None => ByteStream::empty(),
        }))
    }

    fn accepts_writes(&self) -> bool {
        self.inner.is_some()
    }

    fn commit(&mut self) -> Result<CommitReport> {
        if self.closed {
            return Err(TapError::Closed { tap: Self::IDENT });
        }
        if self.committed {
            return Ok(CommitReport::default());
        }
        let (Some(inner), Some(output)) = (self.inner.as_mut(), self.output.as_mut()) else {
            return Ok(CommitReport::default());
        };
        self.committed = true;
        let mut bytes = inner.open_stream()?.into_bytes(Self::IDENT)?;
        let written = io::copy(&mut bytes, output)
            .and_then(|written| output.flush().map(|()| written))
            .map_err(|e| TapError::from_io("write", self.label.clone(), e))?;
        debug!(target = %self.label, bytes = written, "copied stream");
        Ok(CommitReport {
            bytes: written,
            ..CommitReport::default()
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.input = None;
        let flushed = match self.output.as_mut() {
            Some(output) => output
                .flush()
                .map_err(|e| TapError::from_io("flush", self.label.clone(), e)),
            None => Ok(()),
        };
        self.output = None;
        match self.inner.as_mut() {
            Some(inner) => close_after(flushed, inner.as_mut()),
            None => flushed,
        }
    }

    fn origin(&self) -> Option<String> {
        self.inner.as_ref().and_then(|inner| inner.origin())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn file_sink_writes_on_commit_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.bin");
        let mut sink = FileTap::create(&path, Box::new(BytesTap::new(b"payload".to_vec()))).unwrap();
        assert!(!path.exists());

        let report = sink.commit().unwrap();
        assert_eq!(report.bytes, 7);
        assert_eq!(sink.commit().unwrap(), CommitReport::default());
        sink.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"payload");
    }

    #[test]
    fn file_source_reports_missing_file() {
        let mut tap = FileTap::open("/definitely/not/here.json");
        let error = tap.open_stream().err().unwrap();
        assert!(matches!(error, TapError::Io { operation: "open", .. }));
    }

    #[test]
    fn file_source_reopens_empty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), b"abc").unwrap();
        let mut tap = FileTap::open(file.path());
        let first = tap.open_stream().unwrap().into_bytes("test").unwrap();
        assert_eq!(first.read_all().unwrap(), b"abc");
        let second = tap.open_stream().unwrap().into_bytes("test").unwrap();
        assert!(second.read_all().unwrap().is_empty());
    }

    #[test]
    fn stream_sink_copies_into_writer() {
        let buffer = SharedBuffer::default();
        let mut sink = StreamTap::to_writer(
            Box::new(StreamTap::from_reader("input", Cursor::new(b"hello".to_vec()))),
            "buffer",
            buffer.clone(),
        )
        .unwrap();
        sink.commit().unwrap();
        sink.close().unwrap();
        assert_eq!(buffer.0.borrow().as_slice(), b"hello");
    }

    #[test]
    fn sinks_reject_non_byte_inner_taps() {
        let inner = Box::new(crate::memory::MemoryTap::new());
        let error = FileTap::create("out.json", inner).err().unwrap();
        assert!(matches!(
            error,
            TapError::DomainMismatch {
                found: Some(Domain::Primitive),
                ..
            }
        ));
    }
}
