//! Command-line interface schema for fimward.
//!
//! Defines clap structs/enums for global flags. There are no subcommands:
//! the daemon does one thing, either once or forever.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Explicit logging level for CLI output.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// A file integrity monitoring daemon
#[derive(Parser, Debug)]
#[command(
    name = "fimward",
    about,
    long_about = "fimward watches a set of configured directories for changes to \
        file size, permissions, ownership, and content, reporting additions, \
        modifications, and deletions as they're found. Configuration lives in a \
        TOML file; see the README for the full schema.",
    disable_version_flag = true
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short = 'c', long = "config", value_name = "PATH", default_value = "/etc/fimward/syscheck.toml")]
    pub config: PathBuf,

    /// Run a single scan cycle and exit instead of looping forever
    #[arg(long)]
    pub once: bool,

    /// Scan and report without ever looping or waiting on the real-time
    /// channel; implies --once
    #[arg(long)]
    pub dry_run: bool,

    /// Increase verbosity (-v for info, -vv for debug).
    /// Takes precedence over RUST_LOG.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Set log level explicitly (error, warn, info, debug, trace).
    /// Takes precedence over RUST_LOG.
    #[arg(long = "log-level", value_enum, value_name = "LEVEL", conflicts_with = "verbose")]
    pub log_level: Option<LogLevel>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
