//! `datatap` command line tool.

use clap::{ColorChoice, Parser};
use datatap_cli::logging::{LogConfig, LogFormat, init_logging};
use datatap_cli::{PipelineError, REGISTRY, TapContext, inspect, run_chain};
use std::io::{self, IsTerminal};
use tracing::level_filters::LevelFilter;

mod cli;
mod summary;

use crate::cli::{Cli, Command, LogFormatArg, LogLevelArg};
use crate::summary::{print_inventory, print_run_summary, print_taps};

fn main() {
    let cli = Cli::parse();
    cli.color.write_global();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }
    let exit_code = match dispatch(cli) {
        Ok(()) => 0,
        Err(error) => {
            match error.downcast_ref::<PipelineError>() {
                Some(pipeline) => eprintln!("error: {pipeline}"),
                None => eprintln!("error: {error:#}"),
            }
            1
        }
    };
    std::process::exit(exit_code);
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => {
            let context = TapContext::new(cli.store);
            let summary = run_chain(args.chain, &context)?;
            print_run_summary(&mut io::stderr().lock(), &summary)?;
        }
        Command::Taps => print_taps(&mut io::stdout().lock(), REGISTRY)?,
        Command::Inspect(args) => {
            let inventory = inspect(&args.archive)?;
            print_inventory(&mut io::stdout().lock(), &inventory)?;
        }
    }
    Ok(())
}

/// Build logging configuration from CLI flags with consistent precedence.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let mut config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        ..LogConfig::default()
    };
    config.use_env_filter = !(cli.verbosity.is_present() || cli.log_level.is_some());
    if let Some(level) = cli.log_level {
        config.level_filter = match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        };
    }
    config.format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    config.log_file = cli.log_file.clone();
    config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => cli.log_file.is_none() && io::stderr().is_terminal(),
    };
    config
}
