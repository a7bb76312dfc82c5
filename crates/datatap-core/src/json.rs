//! JSON encoding of records and the JSON tap.
//!
//! Records encode to JSON objects. Attachments go through a
//! [`FileReferenceCodec`] when one is present and become
//! `{"__type__": "File", "path": .., "storage_path": ..}` placeholders.

use std::io::{self, Read, Write};
use std::rc::Rc;

use datatap_model::{Domain, FileReference, Record, TYPE_KEY, Value, json_kind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::codec::FileReferenceCodec;
use crate::error::{Result, TapError};
use crate::tap::{ByteStream, RecordStream, Stream, Tap};

/// What to do with an attachment when no codec can store it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentPolicy {
    /// Write the attachment's name as a string.
    #[default]
    InlineName,
    /// Leave the field out.
    Omit,
}

impl std::str::FromStr for AttachmentPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inline-name" | "name" => Ok(Self::InlineName),
            "omit" => Ok(Self::Omit),
            other => Err(format!("unknown attachment policy '{other}'")),
        }
    }
}

/// Options for the JSON tap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonOptions {
    /// Pretty-print each record.
    pub pretty: bool,
    pub attachments: AttachmentPolicy,
}

impl JsonOptions {
    #[must_use]
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: AttachmentPolicy) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Encodes records to JSON values.
pub struct RecordEncoder<'c> {
    tap: &'static str,
    codec: Option<&'c mut dyn FileReferenceCodec>,
    policy: AttachmentPolicy,
}

impl<'c> RecordEncoder<'c> {
    /// Encoder without a codec; attachments follow `policy`.
    #[must_use]
    pub fn new(tap: &'static str, policy: AttachmentPolicy) -> Self {
        Self {
            tap,
            codec: None,
            policy,
        }
    }

    /// Encoder that externalizes every attachment through `codec`.
    pub fn with_codec(tap: &'static str, codec: &'c mut dyn FileReferenceCodec) -> Self {
        Self {
            tap,
            codec: Some(codec),
            policy: AttachmentPolicy::default(),
        }
    }

    pub fn encode(&mut self, record: Record) -> Result<JsonValue> {
        self.encode_fields(record).map(JsonValue::Object)
    }

    fn encode_fields(&mut self, record: Record) -> Result<Map<String, JsonValue>> {
        let mut object = Map::with_capacity(record.len());
        for (name, value) in record {
            if let Some(json) = self.encode_value(value)? {
                object.insert(name, json);
            }
        }
        Ok(object)
    }

    fn encode_value(&mut self, value: Value) -> Result<Option<JsonValue>> {
        let json = match value {
            Value::Null => JsonValue::Null,
            Value::Bool(value) => JsonValue::Bool(value),
            Value::Number(value) => JsonValue::Number(value),
            Value::String(value) => JsonValue::String(value),
            Value::Array(items) => {
                let mut encoded = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(json) = self.encode_value(item)? {
                        encoded.push(json);
                    }
                }
                JsonValue::Array(encoded)
            }
            Value::Object(record) => JsonValue::Object(self.encode_fields(record)?),
            Value::File(attachment) => match self.codec.as_deref_mut() {
                Some(codec) => codec.externalize(attachment)?.to_json(true),
                None => match self.policy {
                    AttachmentPolicy::InlineName => JsonValue::String(attachment.name().to_string()),
                    AttachmentPolicy::Omit => return Ok(None),
                },
            },
            Value::Reference(reference) => {
                if self.codec.is_some() {
                    return Err(TapError::malformed(
                        self.tap,
                        format!(
                            "file reference '{}' was never resolved, its bytes are not available",
                            reference.logical_path
                        ),
                    ));
                }
                reference.to_json(false)
            }
        };
        Ok(Some(json))
    }
}

/// Decodes JSON values to records.
#[derive(Clone)]
pub struct RecordDecoder {
    tap: &'static str,
    codec: Option<Rc<dyn FileReferenceCodec>>,
}

impl RecordDecoder {
    /// Decoder that keeps placeholders as unresolved references.
    #[must_use]
    pub fn new(tap: &'static str) -> Self {
        Self { tap, codec: None }
    }

    /// Decoder that resolves placeholders through `codec`.
    pub fn with_codec(tap: &'static str, codec: Rc<dyn FileReferenceCodec>) -> Self {
        Self {
            tap,
            codec: Some(codec),
        }
    }

    pub fn decode(&self, json: JsonValue) -> Result<Record> {
        match json {
            JsonValue::Object(object) => self.decode_fields(object),
            other => Err(TapError::malformed(
                self.tap,
                format!("expected an object, found {}", json_kind(&other)),
            )),
        }
    }

    fn decode_fields(&self, object: Map<String, JsonValue>) -> Result<Record> {
        object
            .into_iter()
            .map(|(name, value)| Ok((name, self.decode_value(value)?)))
            .collect()
    }

    fn decode_value(&self, json: JsonValue) -> Result<Value> {
        match json {
            JsonValue::Object(object) if object.contains_key(TYPE_KEY) => self.decode_tagged(&object),
            JsonValue::Object(object) => self.decode_fields(object).map(Value::Object),
            JsonValue::Array(items) => items
                .into_iter()
                .map(|item| self.decode_value(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(Value::from_json(other)),
        }
    }

    fn decode_tagged(&self, object: &Map<String, JsonValue>) -> Result<Value> {
        let reference = FileReference::from_json(object)
            .map_err(|e| TapError::malformed(self.tap, e.to_string()))?
            .ok_or_else(|| {
                TapError::malformed(
                    self.tap,
                    format!("unknown placeholder type {}", object[TYPE_KEY]),
                )
            })?;
        match &self.codec {
            Some(codec) => codec.resolve(&reference).map(Value::File),
            None => Ok(Value::Reference(reference)),
        }
    }
}

/// Parses a manifest: a single object or an array of objects.
pub fn parse_manifest(tap: &'static str, bytes: &[u8]) -> Result<Vec<JsonValue>> {
    match serde_json::from_slice(bytes)? {
        JsonValue::Array(entries) => Ok(entries),
        object @ JsonValue::Object(_) => Ok(vec![object]),
        other => Err(TapError::malformed(
            tap,
            format!(
                "expected an object or an array of objects, found {}",
                json_kind(&other)
            ),
        )),
    }
}

/// Writes a JSON array one entry at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArrayWriter {
    pretty: bool,
    entries: usize,
}

impl JsonArrayWriter {
    #[must_use]
    pub fn new(pretty: bool) -> Self {
        Self { pretty, entries: 0 }
    }

    pub fn begin(&mut self, out: &mut impl Write) -> Result<()> {
        out.write_all(b"[")
            .map_err(|e| TapError::from_io("write", "JSON output", e))
    }

    pub fn entry(&mut self, out: &mut impl Write, value: &JsonValue) -> Result<()> {
        let separator: &[u8] = match (self.entries, self.pretty) {
            (0, false) => b"",
            (0, true) => b"\n",
            (_, false) => b",",
            (_, true) => b",\n",
        };
        out.write_all(separator)
            .map_err(|e| TapError::from_io("write", "JSON output", e))?;
        if self.pretty {
            serde_json::to_writer_pretty(&mut *out, value)?;
        } else {
            serde_json::to_writer(&mut *out, value)?;
        }
        self.entries += 1;
        Ok(())
    }

    pub fn end(&mut self, out: &mut impl Write) -> Result<()> {
        let closing: &[u8] = if self.pretty && self.entries > 0 {
            b"\n]\n"
        } else {
            b"]"
        };
        out.write_all(closing)
            .map_err(|e| TapError::from_io("write", "JSON output", e))
    }

    /// Entries written so far.
    #[must_use]
    pub fn entries(&self) -> usize {
        self.entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeState {
    Start,
    Body,
    Done,
}

/// Reader producing the JSON array of a record stream, one record at a time.
struct EncodeReader {
    records: RecordStream,
    encoder: RecordEncoder<'static>,
    array: JsonArrayWriter,
    buffer: Vec<u8>,
    offset: usize,
    state: EncodeState,
}

impl EncodeReader {
    fn new(records: RecordStream, encoder: RecordEncoder<'static>, pretty: bool) -> Self {
        Self {
            records,
            encoder,
            array: JsonArrayWriter::new(pretty),
            buffer: Vec::new(),
            offset: 0,
            state: EncodeState::Start,
        }
    }

    /// Encodes the next chunk into the buffer. Returns false once done.
    fn fill(&mut self) -> Result<bool> {
        match self.state {
            EncodeState::Start => {
                self.array.begin(&mut self.buffer)?;
                self.state = EncodeState::Body;
            }
            EncodeState::Body => match self.records.next() {
                Some(record) => {
                    let json = self.encoder.encode(record?)?;
                    self.array.entry(&mut self.buffer, &json)?;
                }
                None => {
                    self.array.end(&mut self.buffer)?;
                    self.state = EncodeState::Done;
                    debug!(records = self.array.entries(), "JSON encoding finished");
                }
            },
            EncodeState::Done => return Ok(false),
        }
        Ok(true)
    }
}

impl Read for EncodeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset == self.buffer.len() {
            self.buffer.clear();
            self.offset = 0;
            if !self.fill().map_err(io::Error::other)? {
                return Ok(0);
            }
        }
        let count = (&self.buffer[self.offset..]).read(buf)?;
        self.offset += count;
        Ok(count)
    }
}

/// Converts between records and JSON bytes.
///
/// Over a Primitive tap it produces the JSON array of the inner records.
/// Over a Bytes tap it parses a JSON object or array into records; file
/// placeholders stay unresolved references.
pub struct JsonTap {
    inner: Box<dyn Tap>,
    options: JsonOptions,
    opened: bool,
    closed: bool,
}

impl JsonTap {
    pub const IDENT: &'static str = "JSON";

    pub fn new(inner: Box<dyn Tap>) -> Result<Self> {
        Self::with_options(inner, JsonOptions::default())
    }

    pub fn with_options(inner: Box<dyn Tap>, options: JsonOptions) -> Result<Self> {
        Self::negotiate(Some(inner.domain()))?;
        Ok(Self {
            inner,
            options,
            opened: false,
            closed: false,
        })
    }

    /// Domain produced for a given inner domain.
    pub fn negotiate(inner: Option<Domain>) -> Result<Domain> {
        match inner {
            Some(Domain::Bytes) => Ok(Domain::Primitive),
            Some(Domain::Primitive) => Ok(Domain::Bytes),
            other => Err(TapError::mismatch(
                Self::IDENT,
                &[Domain::Bytes, Domain::Primitive],
                other,
            )),
        }
    }

    #[must_use]
    pub fn options(&self) -> JsonOptions {
        self.options
    }

    fn decode_stream(&mut self) -> Result<RecordStream> {
        let bytes = self
            .inner
            .open_stream()?
            .into_bytes(Self::IDENT)?
            .read_all()
            .map_err(|e| TapError::from_io("read", "JSON input", e))?;
        let entries = parse_manifest(Self::IDENT, &bytes)?;
        debug!(records = entries.len(), "parsed JSON input");
        let decoder = RecordDecoder::new(Self::IDENT);
        Ok(Box::new(
            entries.into_iter().map(move |entry| decoder.decode(entry)),
        ))
    }
}

impl Tap for JsonTap {
    fn ident(&self) -> &'static str {
        Self::IDENT
    }

    fn domain(&self) -> Domain {
        Self::negotiate(Some(self.inner.domain())).unwrap_or(Domain::Primitive)
    }

    fn open_stream(&mut self) -> Result<Stream<'_>> {
        if self.closed {
            return Err(TapError::Closed { tap: Self::IDENT });
        }
        let domain = Self::negotiate(Some(self.inner.domain()))?;
        if self.opened {
            return Ok(Stream::empty(domain));
        }
        self.opened = true;
        match domain {
            Domain::Primitive => self.decode_stream().map(Stream::Primitive),
            _ => {
                let records = self.inner.items()?;
                let encoder = RecordEncoder::new(Self::IDENT, self.options.attachments);
                let reader = EncodeReader::new(records, encoder, self.options.pretty);
                Ok(Stream::Bytes(ByteStream::sequential(reader)))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }

    fn origin(&self) -> Option<String> {
        self.inner.origin()
    }

    fn detect_originator(&mut self) -> Result<Option<String>> {
        self.inner.detect_originator()
    }
}

#[cfg(test)]
mod tests {
    use datatap_model::FileAttachment;
    use serde_json::json;

    use super::*;

    #[test]
    fn encoder_inlines_attachment_names_without_codec() {
        let record = Record::new()
            .with_field("name", "report")
            .with_field("doc", FileAttachment::from_bytes("report.pdf", b"%PDF".to_vec()));
        let mut encoder = RecordEncoder::new("JSON", AttachmentPolicy::InlineName);
        assert_eq!(
            encoder.encode(record).unwrap(),
            json!({"name": "report", "doc": "report.pdf"})
        );
    }

    #[test]
    fn encoder_omits_attachments_when_asked() {
        let record = Record::new()
            .with_field("name", "report")
            .with_field("doc", FileAttachment::from_bytes("report.pdf", b"%PDF".to_vec()));
        let mut encoder = RecordEncoder::new("JSON", AttachmentPolicy::Omit);
        assert_eq!(encoder.encode(record).unwrap(), json!({"name": "report"}));
    }

    #[test]
    fn decoder_keeps_placeholders_as_references() {
        let decoder = RecordDecoder::new("JSON");
        let record = decoder
            .decode(json!({"readme": {"__type__": "File", "path": "readme.txt"}}))
            .unwrap();
        assert_eq!(
            record.get("readme"),
            Some(&Value::Reference(FileReference::inline("readme.txt")))
        );
    }

    #[test]
    fn decoder_rejects_unknown_placeholders() {
        let decoder = RecordDecoder::new("JSON");
        let error = decoder
            .decode(json!({"x": {"__type__": "Image", "path": "a.png"}}))
            .unwrap_err();
        assert!(matches!(error, TapError::MalformedRecord { tap: "JSON", .. }));
    }

    #[test]
    fn manifest_accepts_single_object() {
        let entries = parse_manifest("Zip", br#"{"test": "item"}"#).unwrap();
        assert_eq!(entries, vec![json!({"test": "item"})]);
        assert!(parse_manifest("Zip", b"42").is_err());
    }

    #[test]
    fn array_writer_emits_valid_json() {
        for pretty in [false, true] {
            let mut out = Vec::new();
            let mut writer = JsonArrayWriter::new(pretty);
            writer.begin(&mut out).unwrap();
            writer.entry(&mut out, &json!({"a": 1})).unwrap();
            writer.entry(&mut out, &json!({"b": [1, 2]})).unwrap();
            writer.end(&mut out).unwrap();
            let parsed: JsonValue = serde_json::from_slice(&out).unwrap();
            assert_eq!(parsed, json!([{"a": 1}, {"b": [1, 2]}]));
        }
    }
}
