//! The container codec tap.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Seek, Write};
use std::rc::Rc;

use datatap_core::{
    ByteStream, Domain, FileAttachment, FileReference, FileReferenceCodec, JsonArrayWriter,
    MemberSource, Placement, RecordDecoder, RecordEncoder, Result, Stream, StoragePlanner, Tap,
    TapError, parse_manifest,
};
use serde::Serialize;
use tracing::{debug, info, info_span};

use crate::backend::{MemberInfo, MemberReader, MemberWriter, member_reader, member_writer};
use crate::format::{ContainerFormat, ContainerOptions};

/// Member holding the encoded records.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Member naming the tap the records came from.
pub const ORIGINATOR_NAME: &str = "originator.txt";

/// What a call to [`ContainerTap::send`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SendSummary {
    /// Records in the manifest.
    pub records: usize,
    /// Attachment members written, not counting duplicates.
    pub attachments: usize,
}

/// An indexed archive shared by the container tap and the attachments
/// resolved from it.
struct OpenArchive {
    tap: &'static str,
    reader: RefCell<Option<Box<dyn MemberReader>>>,
    members: Vec<MemberInfo>,
    sizes: HashMap<String, u64>,
    originator: Option<String>,
}

impl OpenArchive {
    fn open(tap: &'static str, mut reader: Box<dyn MemberReader>) -> Result<Self> {
        let members = reader.members().to_vec();
        let sizes = members
            .iter()
            .map(|member| (member.name.clone(), member.size))
            .collect::<HashMap<_, _>>();
        let originator = if sizes.contains_key(ORIGINATOR_NAME) {
            let bytes = reader
                .read_member(ORIGINATOR_NAME)
                .map_err(|e| e.into_tap_error(tap))?;
            Some(String::from_utf8_lossy(&bytes).trim().to_string()).filter(|s| !s.is_empty())
        } else {
            None
        };
        Ok(Self {
            tap,
            reader: RefCell::new(Some(reader)),
            members,
            sizes,
            originator,
        })
    }

    fn read(&self, storage_path: &str) -> Result<Vec<u8>> {
        let mut reader = self.reader.borrow_mut();
        let reader = reader
            .as_mut()
            .ok_or(TapError::Closed { tap: self.tap })?;
        reader
            .read_member(storage_path)
            .map_err(|e| e.into_tap_error(self.tap))
    }

    fn manifest(&self) -> Result<Vec<u8>> {
        if !self.sizes.contains_key(MANIFEST_NAME) {
            return Err(TapError::MissingAsset {
                tap: self.tap,
                storage_path: MANIFEST_NAME.to_string(),
            });
        }
        self.read(MANIFEST_NAME)
    }

    /// Releases the archive. Attachments still pointing here fail to open.
    fn release(&self) {
        self.reader.borrow_mut().take();
    }
}

impl MemberSource for OpenArchive {
    fn open_member(&self, storage_path: &str) -> io::Result<Box<dyn Read>> {
        let bytes = self.read(storage_path).map_err(io::Error::other)?;
        debug!(tap = self.tap, member = storage_path, bytes = bytes.len(), "read member");
        Ok(Box::new(Cursor::new(bytes)))
    }
}

/// Resolves placeholders to lazily read members of an open archive.
struct MemberResolver {
    archive: Rc<OpenArchive>,
}

impl FileReferenceCodec for MemberResolver {
    fn externalize(&mut self, _attachment: FileAttachment) -> Result<FileReference> {
        Err(TapError::unsupported(self.archive.tap, "storing attachments while reading"))
    }

    fn resolve(&self, reference: &FileReference) -> Result<FileAttachment> {
        let size = *self
            .archive
            .sizes
            .get(&reference.storage_path)
            .ok_or_else(|| TapError::MissingAsset {
                tap: self.archive.tap,
                storage_path: reference.storage_path.clone(),
            })?;
        let source: Rc<dyn MemberSource> = self.archive.clone();
        Ok(FileAttachment::from_member(
            reference.logical_path.clone(),
            reference.storage_path.clone(),
            size,
            source,
        ))
    }
}

/// Writes each attachment as its own member as soon as it is encoded.
struct MemberStore<'w> {
    tap: &'static str,
    writer: Box<dyn MemberWriter + 'w>,
    planner: StoragePlanner,
}

impl<'w> MemberStore<'w> {
    fn new(tap: &'static str, writer: Box<dyn MemberWriter + 'w>) -> Self {
        Self {
            tap,
            writer,
            planner: StoragePlanner::new().with_reserved(&[MANIFEST_NAME, ORIGINATOR_NAME]),
        }
    }

    fn add(&mut self, path: &str, bytes: &[u8]) -> Result<()> {
        self.writer
            .add_member(path, bytes)
            .map_err(|e| e.into_tap_error(self.tap))
    }

    fn finish(self) -> Result<()> {
        self.writer.finish().map_err(|e| e.into_tap_error(self.tap))
    }
}

impl FileReferenceCodec for MemberStore<'_> {
    fn externalize(&mut self, attachment: FileAttachment) -> Result<FileReference> {
        let bytes = attachment
            .read_bytes()
            .map_err(|e| TapError::from_io("read attachment", attachment.name(), e))?;
        let placement = self.planner.plan(self.tap, attachment.name(), &bytes)?;
        if let Placement::New(path) = &placement {
            self.add(path, &bytes)?;
        }
        Ok(FileReference::new(attachment.name(), placement.path()))
    }

    fn resolve(&self, reference: &FileReference) -> Result<FileAttachment> {
        Err(TapError::MissingAsset {
            tap: self.tap,
            storage_path: reference.storage_path.clone(),
        })
    }
}

enum State {
    Unopened,
    OpenForRead(Rc<OpenArchive>),
    OpenForWrite,
    Closed,
}

/// Codec tap packing records and their attachments into an archive.
///
/// Over a Primitive tap it writes `manifest.json` plus one member per
/// attachment. Over a Bytes tap it reads such an archive back, resolving
/// every file placeholder to a lazily read member.
pub struct ContainerTap {
    format: ContainerFormat,
    inner: Box<dyn Tap>,
    options: ContainerOptions,
    state: State,
    opened: bool,
}

impl ContainerTap {
    pub fn new(format: ContainerFormat, inner: Box<dyn Tap>) -> Result<Self> {
        Self::with_options(format, inner, ContainerOptions::default())
    }

    pub fn with_options(
        format: ContainerFormat,
        inner: Box<dyn Tap>,
        options: ContainerOptions,
    ) -> Result<Self> {
        Self::negotiate(format, Some(inner.domain()))?;
        Ok(Self {
            format,
            inner,
            options,
            state: State::Unopened,
            opened: false,
        })
    }

    /// Domain produced for a given inner domain.
    pub fn negotiate(format: ContainerFormat, inner: Option<Domain>) -> Result<Domain> {
        match inner {
            Some(Domain::Bytes) => Ok(Domain::Primitive),
            Some(Domain::Primitive) => Ok(Domain::Bytes),
            other => Err(TapError::mismatch(
                format.ident(),
                &[Domain::Bytes, Domain::Primitive],
                other,
            )),
        }
    }

    #[must_use]
    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    fn reading(&self) -> bool {
        self.inner.domain() == Domain::Bytes
    }

    /// Writes the archive of the inner records into `dest`.
    ///
    /// Attachments are written as they are met; `manifest.json` and
    /// `originator.txt` follow once the records are exhausted.
    pub fn send<W: Write + Seek>(&mut self, dest: W) -> Result<SendSummary> {
        let tap = self.format.ident();
        match self.state {
            State::Unopened => {}
            State::Closed => return Err(TapError::Closed { tap }),
            State::OpenForRead(_) | State::OpenForWrite => {
                return Err(TapError::unsupported(tap, "sending a container twice"));
            }
        }
        if self.reading() {
            return Err(TapError::unsupported(tap, "sending a container that is being read"));
        }
        self.state = State::OpenForWrite;
        let _span = info_span!("send", tap).entered();

        let records = self.inner.items()?;
        let mut store = MemberStore::new(tap, member_writer(self.format, dest, &self.options));
        let mut manifest = Vec::new();
        let mut array = JsonArrayWriter::new(self.options.pretty);
        array.begin(&mut manifest)?;
        {
            let mut encoder = RecordEncoder::with_codec(tap, &mut store);
            for record in records {
                let json = encoder.encode(record?)?;
                array.entry(&mut manifest, &json)?;
            }
        }
        array.end(&mut manifest)?;

        let attachments = store.planner.stored();
        store.add(MANIFEST_NAME, &manifest)?;
        let originator = self
            .options
            .originator
            .clone()
            .or_else(|| self.inner.origin());
        if let Some(originator) = &originator {
            store.add(ORIGINATOR_NAME, originator.as_bytes())?;
        }
        store.finish()?;

        let summary = SendSummary {
            records: array.entries(),
            attachments,
        };
        info!(
            format = %self.format,
            records = summary.records,
            attachments = summary.attachments,
            originator = originator.as_deref().unwrap_or("-"),
            "archive written"
        );
        Ok(summary)
    }

    fn archive(&mut self) -> Result<Rc<OpenArchive>> {
        let tap = self.format.ident();
        match &self.state {
            State::OpenForRead(archive) => return Ok(Rc::clone(archive)),
            State::Closed => return Err(TapError::Closed { tap }),
            State::OpenForWrite => {
                return Err(TapError::unsupported(tap, "reading a container that is being written"));
            }
            State::Unopened => {}
        }
        if !self.reading() {
            return Err(TapError::unsupported(tap, "reading a container over records"));
        }
        let source = self
            .inner
            .open_stream()?
            .into_bytes(tap)?
            .into_seekable()
            .map_err(|e| TapError::from_io("read", tap, e))?;
        let reader = member_reader(self.format, source).map_err(|e| e.into_tap_error(tap))?;
        let archive = Rc::new(OpenArchive::open(tap, reader)?);
        debug!(
            tap,
            members = archive.members.len(),
            originator = archive.originator.as_deref().unwrap_or("-"),
            "opened archive"
        );
        self.state = State::OpenForRead(Rc::clone(&archive));
        Ok(archive)
    }

    /// Members of the archive being read, opening it if needed.
    pub fn members(&mut self) -> Result<Vec<MemberInfo>> {
        Ok(self.archive()?.members.clone())
    }

    fn decode(&mut self) -> Result<Stream<'static>> {
        let tap = self.format.ident();
        let archive = self.archive()?;
        let manifest = archive.manifest()?;
        let entries = parse_manifest(tap, &manifest).map_err(|e| match e {
            TapError::Json(error) => TapError::malformed(tap, format!("{MANIFEST_NAME}: {error}")),
            other => other,
        })?;
        debug!(tap, records = entries.len(), "read manifest");
        let decoder = RecordDecoder::with_codec(tap, Rc::new(MemberResolver { archive }));
        Ok(Stream::Primitive(Box::new(
            entries.into_iter().map(move |entry| decoder.decode(entry)),
        )))
    }

    fn encode(&mut self) -> Result<Stream<'static>> {
        let tap = self.format.ident();
        let mut file = tempfile::tempfile().map_err(|e| TapError::from_io("create", "temporary file", e))?;
        self.send(&mut file)?;
        file.rewind()
            .map_err(|e| TapError::from_io("rewind", "temporary file", e))?;
        debug!(tap, "archive staged in temporary file");
        Ok(Stream::Bytes(ByteStream::seekable(file)))
    }
}

impl Tap for ContainerTap {
    fn ident(&self) -> &'static str {
        self.format.ident()
    }

    fn domain(&self) -> Domain {
        Self::negotiate(self.format, Some(self.inner.domain())).unwrap_or(Domain::Primitive)
    }

    fn open_stream(&mut self) -> Result<Stream<'_>> {
        if matches!(self.state, State::Closed) {
            return Err(TapError::Closed { tap: self.ident() });
        }
        let domain = self.domain();
        if self.opened {
            return Ok(Stream::empty(domain));
        }
        self.opened = true;
        if self.reading() {
            self.decode()
        } else {
            self.encode()
        }
    }

    fn close(&mut self) -> Result<()> {
        if let State::OpenForRead(archive) = &self.state {
            archive.release();
        }
        if matches!(self.state, State::Closed) {
            return Ok(());
        }
        self.state = State::Closed;
        self.inner.close()
    }

    fn origin(&self) -> Option<String> {
        match &self.state {
            State::OpenForRead(archive) => archive.originator.clone(),
            _ if self.reading() => None,
            _ => self
                .options
                .originator
                .clone()
                .or_else(|| self.inner.origin()),
        }
    }

    fn detect_originator(&mut self) -> Result<Option<String>> {
        if self.reading() {
            return Ok(self.archive()?.originator.clone());
        }
        match &self.options.originator {
            Some(originator) => Ok(Some(originator.clone())),
            None => self.inner.detect_originator(),
        }
    }
}
