//! Library side of the `datatap` command line tool.
//!
//! A command line names a chain of taps, leftmost first, separated by `--`:
//!
//! ```text
//! datatap run Model media.photo -- Zip -- File photos.zip
//! datatap run File photos.zip -- Zip
//! ```
//!
//! [`chain`] parses that syntax, [`registry`] maps identifiers to factories
//! and [`commands`] drives the result.

pub mod chain;
pub mod commands;
pub mod logging;
pub mod registry;

pub use chain::{ChainSegment, PipelineError, TapArgs, split_chain};
pub use commands::{Inventory, RunSummary, inspect, run_chain};
pub use registry::{REGISTRY, TapContext, TapEntry, lookup};
