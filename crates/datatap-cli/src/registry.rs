//! Static table of the taps the CLI can build.

use std::path::PathBuf;

use datatap_archive::{Compression, ContainerFormat, ContainerOptions, ContainerTap};
use datatap_core::{
    AttachmentPolicy, Domain, FileTap, JsonDirStore, JsonOptions, JsonTap, ModelStore, ModelTap,
    ModelTapOptions, Result, StreamTap, Tap, TapError, WriteMode,
};
use tracing::warn;

use crate::chain::TapArgs;

/// Settings shared by every tap built for one command.
#[derive(Debug, Clone)]
pub struct TapContext {
    /// Root of the JSON-directory model store.
    pub store: PathBuf,
}

impl TapContext {
    pub fn new(store: impl Into<PathBuf>) -> Self {
        Self {
            store: store.into(),
        }
    }
}

/// Builds a tap from its arguments and the tap to its left.
///
/// A factory takes the inner tap out of the slot only after its arguments
/// are valid, so the caller can still close it when building fails.
pub type TapFactory =
    fn(&TapArgs, &mut Option<Box<dyn Tap>>, &TapContext) -> Result<Box<dyn Tap>>;

/// A registered tap type.
#[derive(Debug)]
pub struct TapEntry {
    pub ident: &'static str,
    pub summary: &'static str,
    /// Domains of the inner taps it accepts.
    pub consumes: &'static [Domain],
    /// Whether it can be built with no inner tap.
    pub standalone: bool,
    /// Whether it persists data on commit.
    pub writable: bool,
    /// Keyword arguments it understands.
    pub keywords: &'static [&'static str],
    pub build: TapFactory,
}

impl TapEntry {
    /// Builds the tap, rejecting keywords it does not understand.
    ///
    /// The inner tap is closed when building fails.
    pub fn instantiate(
        &self,
        args: &TapArgs,
        mut inner: Option<Box<dyn Tap>>,
        context: &TapContext,
    ) -> Result<Box<dyn Tap>> {
        let built = self
            .check(args, inner.as_ref().map(|inner| inner.domain()))
            .and_then(|()| (self.build)(args, &mut inner, context));
        if built.is_err()
            && let Some(mut inner) = inner
            && let Err(error) = inner.close()
        {
            warn!(tap = self.ident, %error, "closing the inner tap failed");
        }
        built
    }

    fn check(&self, args: &TapArgs, inner: Option<Domain>) -> Result<()> {
        if let Some(unknown) = args
            .keywords
            .keys()
            .find(|key| !self.keywords.contains(&key.as_str()))
        {
            return Err(TapError::resolution(
                format!("{} --{unknown}", self.ident),
                "unknown option",
            ));
        }
        match (inner, self.standalone) {
            (None, false) => Err(TapError::mismatch(self.ident, self.consumes, None)),
            (Some(domain), _) if !self.consumes.contains(&domain) => {
                Err(TapError::mismatch(self.ident, self.consumes, Some(domain)))
            }
            _ => Ok(()),
        }
    }
}

const CONTAINER_KEYWORDS: &[&str] = &["stored", "level", "originator", "pretty"];

pub static REGISTRY: &[TapEntry] = &[
    TapEntry {
        ident: ModelTap::IDENT,
        summary: "Reads collections from the model store, or saves records into it",
        consumes: &[Domain::Primitive],
        standalone: true,
        writable: true,
        keywords: &["immediate"],
        build: build_model,
    },
    TapEntry {
        ident: JsonTap::IDENT,
        summary: "Decodes a JSON array into records, or encodes records as JSON",
        consumes: &[Domain::Bytes, Domain::Primitive],
        standalone: false,
        writable: false,
        keywords: &["pretty", "attachments"],
        build: build_json,
    },
    TapEntry {
        ident: "Zip",
        summary: "Reads or writes a ZIP container with a manifest and file members",
        consumes: &[Domain::Bytes, Domain::Primitive],
        standalone: false,
        writable: false,
        keywords: CONTAINER_KEYWORDS,
        build: build_zip,
    },
    TapEntry {
        ident: "Tar",
        summary: "Reads or writes a tar container with a manifest and file members",
        consumes: &[Domain::Bytes, Domain::Primitive],
        standalone: false,
        writable: false,
        keywords: CONTAINER_KEYWORDS,
        build: build_tar,
    },
    TapEntry {
        ident: "TarGz",
        summary: "Reads or writes a gzip-compressed tar container",
        consumes: &[Domain::Bytes, Domain::Primitive],
        standalone: false,
        writable: false,
        keywords: CONTAINER_KEYWORDS,
        build: build_tar_gz,
    },
    TapEntry {
        ident: FileTap::IDENT,
        summary: "Reads a file, or writes the bytes of the chain to a file",
        consumes: &[Domain::Bytes],
        standalone: true,
        writable: true,
        keywords: &[],
        build: build_file,
    },
    TapEntry {
        ident: StreamTap::IDENT,
        summary: "Reads standard input, or writes the bytes of the chain to standard output",
        consumes: &[Domain::Bytes],
        standalone: true,
        writable: true,
        keywords: &[],
        build: build_stream,
    },
];

/// Looks a tap type up by identifier.
///
/// # Errors
///
/// Returns a resolution error for identifiers that are not registered.
pub fn lookup(ident: &str) -> Result<&'static TapEntry> {
    REGISTRY
        .iter()
        .find(|entry| entry.ident == ident)
        .ok_or_else(|| {
            let known: Vec<_> = REGISTRY.iter().map(|entry| entry.ident).collect();
            TapError::resolution(ident, format!("unknown tap (known: {})", known.join(", ")))
        })
}

/// Registered tap that can persist records coming out of `originator`.
#[must_use]
pub fn destination_for(originator: &str) -> Option<&'static TapEntry> {
    REGISTRY.iter().find(|entry| {
        entry.ident == originator && entry.writable && entry.consumes.contains(&Domain::Primitive)
    })
}

fn invalid(ident: &'static str, option: &str, reason: impl Into<String>) -> TapError {
    TapError::resolution(format!("{ident} --{option}"), reason)
}

fn required_path(ident: &'static str, args: &TapArgs) -> Result<PathBuf> {
    match args.positional.as_slice() {
        [path] => Ok(PathBuf::from(path)),
        [] => Err(TapError::resolution(ident, "expected a path argument")),
        _ => Err(TapError::resolution(ident, "expected a single path argument")),
    }
}

/// Hands over the inner tap once the arguments have been validated.
fn take_inner(
    ident: &'static str,
    consumes: &'static [Domain],
    inner: &mut Option<Box<dyn Tap>>,
) -> Result<Box<dyn Tap>> {
    inner
        .take()
        .ok_or_else(|| TapError::mismatch(ident, consumes, None))
}

fn no_positional(ident: &'static str, args: &TapArgs) -> Result<()> {
    match args.positional.first() {
        Some(extra) => Err(TapError::resolution(
            extra.clone(),
            format!("{ident} takes no positional arguments"),
        )),
        None => Ok(()),
    }
}

fn build_model(
    args: &TapArgs,
    inner: &mut Option<Box<dyn Tap>>,
    context: &TapContext,
) -> Result<Box<dyn Tap>> {
    let store = JsonDirStore::new(&context.store);
    match inner {
        Some(_) => {
            no_positional(ModelTap::IDENT, args)?;
            let mode = if args.flag("immediate") {
                WriteMode::Immediate
            } else {
                WriteMode::Staged
            };
            let options = ModelTapOptions::default().with_write_mode(mode);
            let inner = take_inner(ModelTap::IDENT, &[Domain::Primitive], inner)?;
            Ok(Box::new(ModelTap::sink(inner, Box::new(store), options)?))
        }
        None => {
            let selectors = if args.positional.is_empty() {
                store.collections().map_err(|e| {
                    TapError::resolution(context.store.display().to_string(), e.to_string())
                })?
            } else {
                args.positional.clone()
            };
            let store: &dyn ModelStore = &store;
            Ok(Box::new(ModelTap::from_selectors(store, &selectors)?))
        }
    }
}

fn build_json(
    args: &TapArgs,
    inner: &mut Option<Box<dyn Tap>>,
    _context: &TapContext,
) -> Result<Box<dyn Tap>> {
    no_positional(JsonTap::IDENT, args)?;
    let mut options = JsonOptions::default().with_pretty(args.flag("pretty"));
    if let Some(policy) = args.value("attachments") {
        let policy: AttachmentPolicy = policy
            .parse()
            .map_err(|reason: String| invalid(JsonTap::IDENT, "attachments", reason))?;
        options = options.with_attachments(policy);
    }
    let inner = take_inner(JsonTap::IDENT, &[Domain::Bytes, Domain::Primitive], inner)?;
    Ok(Box::new(JsonTap::with_options(inner, options)?))
}

fn container_options(ident: &'static str, args: &TapArgs) -> Result<ContainerOptions> {
    let mut options = ContainerOptions::default().with_pretty(args.flag("pretty"));
    if args.flag("stored") {
        options = options.with_compression(Compression::Stored);
    }
    if let Some(level) = args.value("level") {
        let level: u32 = level
            .parse()
            .map_err(|_| invalid(ident, "level", format!("'{level}' is not a level from 0 to 9")))?;
        options = options.with_level(level);
    }
    if let Some(originator) = args.value("originator") {
        options = options.with_originator(originator);
    }
    Ok(options)
}

fn build_container(
    format: ContainerFormat,
    args: &TapArgs,
    inner: &mut Option<Box<dyn Tap>>,
) -> Result<Box<dyn Tap>> {
    let ident = format.ident();
    no_positional(ident, args)?;
    let options = container_options(ident, args)?;
    let inner = take_inner(ident, &[Domain::Bytes, Domain::Primitive], inner)?;
    Ok(Box::new(ContainerTap::with_options(format, inner, options)?))
}

fn build_zip(
    args: &TapArgs,
    inner: &mut Option<Box<dyn Tap>>,
    _: &TapContext,
) -> Result<Box<dyn Tap>> {
    build_container(ContainerFormat::Zip, args, inner)
}

fn build_tar(
    args: &TapArgs,
    inner: &mut Option<Box<dyn Tap>>,
    _: &TapContext,
) -> Result<Box<dyn Tap>> {
    build_container(ContainerFormat::Tar, args, inner)
}

fn build_tar_gz(
    args: &TapArgs,
    inner: &mut Option<Box<dyn Tap>>,
    _: &TapContext,
) -> Result<Box<dyn Tap>> {
    build_container(ContainerFormat::TarGz, args, inner)
}

fn build_file(
    args: &TapArgs,
    inner: &mut Option<Box<dyn Tap>>,
    _context: &TapContext,
) -> Result<Box<dyn Tap>> {
    let path = required_path(FileTap::IDENT, args)?;
    match inner.take() {
        Some(inner) => Ok(Box::new(FileTap::create(path, inner)?)),
        None => Ok(Box::new(FileTap::open(path))),
    }
}

fn build_stream(
    args: &TapArgs,
    inner: &mut Option<Box<dyn Tap>>,
    _context: &TapContext,
) -> Result<Box<dyn Tap>> {
    no_positional(StreamTap::IDENT, args)?;
    match inner.take() {
        Some(inner) => Ok(Box::new(StreamTap::stdout(inner)?)),
        None => Ok(Box::new(StreamTap::stdin())),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use datatap_core::{ErrorKind, MemoryTap, Stream};

    use super::*;

    fn context() -> TapContext {
        TapContext::new("unused-store")
    }

    /// Record-producing tap that remembers whether it was closed.
    struct Watched {
        closed: Rc<Cell<bool>>,
    }

    impl Tap for Watched {
        fn ident(&self) -> &'static str {
            "Watched"
        }

        fn domain(&self) -> Domain {
            Domain::Primitive
        }

        fn open_stream(&mut self) -> Result<Stream<'_>> {
            Err(TapError::unsupported(self.ident(), "read"))
        }

        fn close(&mut self) -> Result<()> {
            self.closed.set(true);
            Ok(())
        }
    }

    fn tap_args(positional: &[&str], keywords: &[(&str, Option<&str>)]) -> TapArgs {
        let mut args = TapArgs::default();
        args.positional = positional.iter().map(ToString::to_string).collect();
        for (key, value) in keywords {
            args.keywords.insert((*key).to_string(), value.map(str::to_string));
        }
        args
    }

    #[test]
    fn test_failed_build_closes_the_inner_tap() {
        let cases = [
            ("JSON", tap_args(&[], &[("colour", None)])),
            ("JSON", tap_args(&[], &[("attachments", Some("embed"))])),
            ("Zip", tap_args(&[], &[("level", Some("high"))])),
            ("Tar", tap_args(&["extra"], &[])),
            ("Model", tap_args(&["extra"], &[])),
            ("File", tap_args(&["out.json"], &[])),
        ];
        for (ident, args) in cases {
            let closed = Rc::new(Cell::new(false));
            let inner: Box<dyn Tap> = Box::new(Watched {
                closed: Rc::clone(&closed),
            });
            let result = lookup(ident).unwrap().instantiate(&args, Some(inner), &context());
            assert!(result.is_err(), "{ident}");
            assert!(closed.get(), "{ident} left its inner tap open");
        }
    }

    #[test]
    fn test_successful_build_keeps_the_inner_tap_open() {
        let closed = Rc::new(Cell::new(false));
        let inner: Box<dyn Tap> = Box::new(Watched {
            closed: Rc::clone(&closed),
        });
        let tap = lookup("JSON")
            .unwrap()
            .instantiate(&TapArgs::default(), Some(inner), &context())
            .unwrap();
        assert_eq!(tap.domain(), Domain::Bytes);
        assert!(!closed.get());
    }

    #[test]
    fn test_idents_are_unique_and_match_formats() {
        for (index, entry) in REGISTRY.iter().enumerate() {
            assert!(
                REGISTRY[index + 1..].iter().all(|other| other.ident != entry.ident),
                "{} registered twice",
                entry.ident
            );
        }
        for format in ContainerFormat::ALL {
            assert!(lookup(format.ident()).is_ok());
        }
    }

    #[test]
    fn test_unknown_ident_is_resolution_error() {
        let error = lookup("Csv").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Resolution);
        assert!(error.to_string().contains("known: Model, JSON"));
    }

    #[test]
    fn test_only_model_is_an_auto_destination() {
        assert_eq!(destination_for("Model").map(|entry| entry.ident), Some("Model"));
        assert!(destination_for("JSON").is_none());
        assert!(destination_for("File").is_none());
        assert!(destination_for("Nope").is_none());
    }

    #[test]
    fn test_unknown_keyword_is_rejected() {
        let mut args = TapArgs::default();
        args.keywords.insert("colour".to_string(), None);
        let inner: Box<dyn Tap> = Box::new(MemoryTap::new());
        let error = lookup("JSON")
            .unwrap()
            .instantiate(&args, Some(inner), &context())
            .err()
            .unwrap();
        assert_eq!(error.kind(), ErrorKind::Resolution);
        assert!(error.to_string().contains("JSON --colour"));
    }

    #[test]
    fn test_codec_taps_need_an_inner_tap() {
        for ident in ["JSON", "Zip", "Tar", "TarGz"] {
            let error = lookup(ident)
                .unwrap()
                .instantiate(&TapArgs::default(), None, &context())
                .err()
                .unwrap();
            assert_eq!(error.kind(), ErrorKind::DomainMismatch, "{ident}");
        }
    }

    #[test]
    fn test_file_sink_rejects_records() {
        let inner: Box<dyn Tap> = Box::new(MemoryTap::new());
        let mut args = TapArgs::default();
        args.positional.push("out.json".to_string());
        let error = lookup("File")
            .unwrap()
            .instantiate(&args, Some(inner), &context())
            .err()
            .unwrap();
        assert_eq!(error.kind(), ErrorKind::DomainMismatch);
    }

    #[test]
    fn test_container_options_from_keywords() {
        let mut args = TapArgs::default();
        args.keywords.insert("stored".to_string(), None);
        args.keywords.insert("level".to_string(), Some("4".to_string()));
        args.keywords.insert("originator".to_string(), Some("Model".to_string()));
        let options = container_options("Zip", &args).unwrap();
        assert_eq!(options.compression, Compression::Stored);
        assert_eq!(options.level, Some(4));
        assert_eq!(options.originator.as_deref(), Some("Model"));

        args.keywords.insert("level".to_string(), Some("high".to_string()));
        let error = container_options("Zip", &args).unwrap_err();
        assert!(error.to_string().contains("Zip --level"));
    }

    #[test]
    fn test_bad_attachment_policy() {
        let mut args = TapArgs::default();
        args.keywords.insert("attachments".to_string(), Some("embed".to_string()));
        let inner: Box<dyn Tap> = Box::new(MemoryTap::new());
        let error = lookup("JSON")
            .unwrap()
            .instantiate(&args, Some(inner), &context())
            .err()
            .unwrap();
        assert!(error.to_string().contains("unknown attachment policy 'embed'"));
    }

    #[test]
    fn test_model_source_over_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let error = lookup("Model")
            .unwrap()
            .instantiate(&TapArgs::default(), None, &TapContext::new(dir.path()))
            .err()
            .unwrap();
        assert_eq!(error.kind(), ErrorKind::Resolution);
    }
}
