mod cli;
mod config;
mod database;
mod dir_list;
mod fingerprint;
mod ignore;
mod model;
mod prefilter;
mod realtime;
mod rootcheck;
mod scan;
mod scheduler;
mod sink;

use cli::{Cli, LogLevel};
use database::Database;
use ignore::IgnoreRules;
use rootcheck::NoopRootkitCheck;
use scan::NoopSeeChangesCapture;
use scheduler::Scheduler;
use sink::ReconnectingSink;
use std::fmt as stdfmt;
use std::process::ExitCode;
use tracing::{Event, Level, Subscriber, error, info};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_level);

    let config = match config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load configuration from {}: {err}", cli.config.display());
            return ExitCode::from(255);
        }
    };

    let mut db = Database::new();
    let ignore = IgnoreRules::new(config.ignore_literal.clone(), config.ignore_regex.clone());
    let mut sink = ReconnectingSink::new(std::io::stdout(), || Ok(std::io::stdout()));
    let mut rootcheck = NoopRootkitCheck;
    let mut see_changes = NoopSeeChangesCapture;

    let mut scheduler = Scheduler {
        config: &config,
        db: &mut db,
        ignore: &ignore,
        sink: &mut sink,
        rootcheck: &mut rootcheck,
        see_changes: &mut see_changes,
        realtime: None,
    };

    if cli.dry_run {
        info!("DRY RUN - running a single scan cycle, no loop");
        if let Err(err) = scheduler.run_once() {
            error!("event sink failed fatally: {err}");
            return ExitCode::from(255);
        }
        return ExitCode::SUCCESS;
    }

    if cli.once {
        info!("running a single scan cycle");
        if let Err(err) = scheduler.run_once() {
            error!("event sink failed fatally: {err}");
            return ExitCode::from(255);
        }
        return ExitCode::SUCCESS;
    }

    info!(roots = config.roots.len(), "starting fimward daemon");
    if let Err(err) = scheduler.run(|| false) {
        error!("event sink failed fatally: {err}");
        return ExitCode::from(255);
    }
    ExitCode::SUCCESS
}

fn init_tracing(verbose: u8, log_level: Option<LogLevel>) {
    let default_level = match log_level {
        Some(LogLevel::Error) => "error",
        Some(LogLevel::Warn) => "warn",
        Some(LogLevel::Info) => "info",
        Some(LogLevel::Debug) => "debug",
        Some(LogLevel::Trace) => "trace",
        None => match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        },
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_fmt::layer()
        .event_format(PlainFormatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Plain-text event formatter: no emoji, no TTY branching. fimward runs as a
/// long-lived daemon writing to a log file or the systemd journal, not an
/// interactive terminal, so there's no reader to decorate output for.
struct PlainFormatter;

impl<S, N> FormatEvent<S, N> for PlainFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        match *event.metadata().level() {
            Level::DEBUG => writer.write_str("DEBUG: ")?,
            Level::INFO => writer.write_str("INFO: ")?,
            Level::WARN => writer.write_str("WARN: ")?,
            Level::ERROR => writer.write_str("ERROR: ")?,
            Level::TRACE => writer.write_str("TRACE: ")?,
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
