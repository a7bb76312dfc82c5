//! CLI argument definitions for `datatap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "datatap",
    version,
    about = "Move records between model stores, JSON and archive containers",
    long_about = "Move records between model stores, JSON and archive containers.\n\n\
                  A pipeline is a chain of taps separated by `--`, source first.\n\
                  Run `datatap taps` to list the available taps."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Directory of the JSON model store used by the Model tap.
    #[arg(
        long = "store",
        value_name = "DIR",
        default_value = "datatap-store",
        global = true
    )]
    pub store: PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build a chain of taps and commit it into the rightmost one.
    ///
    /// Example: `datatap run Model media.photo -- Zip -- File photos.zip`.
    /// Tap arguments are positional values, `--key=value` or `--flag`.
    /// Without a destination, records go back to the tap named in the
    /// container's originator.txt, or to stdout as JSON.
    Run(RunArgs),

    /// List the registered taps.
    Taps,

    /// List the members and originator of an archive container.
    Inspect(InspectArgs),
}

#[derive(Parser)]
pub struct RunArgs {
    /// Tap invocations separated by `--`.
    #[arg(
        value_name = "TAP [ARGS]... [-- TAP [ARGS]...]...",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub chain: Vec<String>,
}

#[derive(Parser)]
pub struct InspectArgs {
    /// Path to a .zip, .tar, .tar.gz or .tgz container.
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
