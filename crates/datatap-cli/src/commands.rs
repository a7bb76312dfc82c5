//! Command implementations behind the `datatap` binary.

use std::path::{Path, PathBuf};

use datatap_archive::{ContainerFormat, ContainerTap, MemberInfo};
use datatap_core::{CommitReport, Domain, FileTap, JsonTap, StreamTap, Tap, TapError};
use tracing::{debug, info, info_span, warn};

use crate::chain::{PipelineError, TapArgs, split_chain};
use crate::registry::{TapContext, TapEntry, destination_for, lookup};

/// Stage named when a failure happens before any tap is involved.
const CLI_STAGE: &str = "datatap";

/// Outcome of a successful `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Identifiers of the chain, leftmost first, including appended taps.
    pub chain: Vec<&'static str>,
    /// How many taps were appended to complete the destination.
    pub appended: usize,
    pub report: CommitReport,
}

/// Builds the chain described by `args`, commits it and closes it.
///
/// The rightmost tap is the commit target. A chain that ends in records is
/// completed with the tap recorded as its originator when that tap is a
/// registered sink, and with `JSON -- Stream` otherwise. A chain that ends
/// in bytes but cannot write them is completed with `Stream`.
///
/// # Errors
///
/// Returns the first failure, attributed to the tap that raised it. The
/// chain is closed in every case.
pub fn run_chain<I, S>(args: I, context: &TapContext) -> Result<RunSummary, PipelineError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let segments = split_chain(args).map_err(|e| PipelineError::new(CLI_STAGE, e))?;
    let mut chain = Vec::with_capacity(segments.len() + 2);
    let mut tap: Option<Box<dyn Tap>> = None;
    for segment in &segments {
        let entry = match lookup(&segment.ident) {
            Ok(entry) => entry,
            Err(error) => return Err(abandon(tap, PipelineError::new(CLI_STAGE, error))),
        };
        let built = entry
            .instantiate(&segment.args, tap.take(), context)
            .map_err(|e| PipelineError::new(entry.ident, e))?;
        debug!(tap = entry.ident, domain = %built.domain(), "built tap");
        chain.push(entry.ident);
        tap = Some(built);
    }
    let Some(tap) = tap else {
        return Err(PipelineError::new(
            CLI_STAGE,
            TapError::resolution("", "no tap given"),
        ));
    };

    let built = chain.len();
    let mut tap = complete_destination(tap, &mut chain, context)?;
    let _span = info_span!("run", chain = %chain.join(" -- ")).entered();

    let committed = tap.commit();
    let closed = tap.close();
    let report = match (committed, closed) {
        (Ok(report), Ok(())) => report,
        (Err(error), closed) => {
            if let Err(close_error) = closed {
                warn!(error = %close_error, "closing the chain also failed");
            }
            return Err(PipelineError::new(CLI_STAGE, error));
        }
        (Ok(_), Err(error)) => return Err(PipelineError::new(CLI_STAGE, error)),
    };
    info!(
        processed = report.processed,
        committed = report.committed,
        bytes = report.bytes,
        "chain committed"
    );
    Ok(RunSummary {
        appended: chain.len() - built,
        chain,
        report,
    })
}

/// Closes `tap` on an error path and hands the error back.
fn abandon(tap: Option<Box<dyn Tap>>, error: PipelineError) -> PipelineError {
    if let Some(mut tap) = tap
        && let Err(close_error) = tap.close()
    {
        warn!(error = %close_error, "closing the partial chain failed");
    }
    error
}

fn append(
    entry: &'static TapEntry,
    inner: Box<dyn Tap>,
    chain: &mut Vec<&'static str>,
    context: &TapContext,
) -> Result<Box<dyn Tap>, PipelineError> {
    let tap = entry
        .instantiate(&TapArgs::default(), Some(inner), context)
        .map_err(|e| PipelineError::new(entry.ident, e))?;
    chain.push(entry.ident);
    Ok(tap)
}

fn complete_destination(
    mut tap: Box<dyn Tap>,
    chain: &mut Vec<&'static str>,
    context: &TapContext,
) -> Result<Box<dyn Tap>, PipelineError> {
    let stage = chain.last().copied().unwrap_or(CLI_STAGE);
    match tap.domain() {
        Domain::Primitive => {
            let originator = match tap.detect_originator() {
                Ok(originator) => originator,
                Err(error) => return Err(abandon(Some(tap), PipelineError::new(stage, error))),
            };
            let destination = originator
                .as_deref()
                .filter(|originator| *originator != tap.ident())
                .and_then(destination_for);
            match destination {
                Some(entry) => {
                    info!(originator = entry.ident, "writing to the originating tap");
                    append(entry, tap, chain, context)
                }
                None => {
                    debug!(
                        originator = originator.as_deref().unwrap_or("-"),
                        "no registered destination, writing JSON to stdout"
                    );
                    let json = append(lookup_static(JsonTap::IDENT)?, tap, chain, context)?;
                    append(lookup_static(StreamTap::IDENT)?, json, chain, context)
                }
            }
        }
        Domain::Bytes if !tap.accepts_writes() => {
            append(lookup_static(StreamTap::IDENT)?, tap, chain, context)
        }
        _ => Ok(tap),
    }
}

fn lookup_static(ident: &str) -> Result<&'static TapEntry, PipelineError> {
    lookup(ident).map_err(|e| PipelineError::new(CLI_STAGE, e))
}

/// Contents of a container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    pub path: PathBuf,
    pub format: ContainerFormat,
    pub members: Vec<MemberInfo>,
    pub originator: Option<String>,
}

/// Lists the members and originator of the container at `path`.
///
/// # Errors
///
/// Returns a resolution error when the format cannot be told from the file
/// name, and the reader's error when the file is not a valid container.
pub fn inspect(path: &Path) -> Result<Inventory, PipelineError> {
    let format = ContainerFormat::detect(path).ok_or_else(|| {
        PipelineError::new(
            CLI_STAGE,
            TapError::resolution(
                path.display().to_string(),
                "unknown container extension (expected .zip, .tar, .tar.gz or .tgz)",
            ),
        )
    })?;
    let ident = format.ident();
    let _span = info_span!("inspect", path = %path.display(), format = ident).entered();
    let mut tap = ContainerTap::new(format, Box::new(FileTap::open(path)))
        .map_err(|e| PipelineError::new(ident, e))?;
    let listed = tap
        .members()
        .and_then(|members| Ok((members, tap.detect_originator()?)));
    let closed = tap.close();
    let (members, originator) = listed.map_err(|e| PipelineError::new(ident, e))?;
    closed.map_err(|e| PipelineError::new(ident, e))?;
    info!(members = members.len(), "listed container");
    Ok(Inventory {
        path: path.to_path_buf(),
        format,
        members,
        originator,
    })
}
