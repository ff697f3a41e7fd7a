//! The daemon loop: interleaves periodic scans, calendar-triggered scans,
//! the rootkit checker, and the real-time watch channel.
//!
//! Grounded directly in `start_daemon()`'s control flow: settle sleeps
//! bracketing each scan, a `day_scanned` latch that prevents a second
//! calendar-triggered scan on the same day, and a non-fatal scheduling
//! priority hint on Linux.

use crate::config::SyscheckConfig;
use crate::database::Database;
use crate::ignore::IgnoreRules;
use crate::model::FlagsTag;
use crate::realtime::RealtimeChannel;
use crate::rootcheck::RootkitCheck;
use crate::scan::{self, ScanContext, SeeChangesCapture};
use crate::sink::{EventSink, SinkError, Topic};
use chrono::{Datelike, Local, NaiveDate, Timelike};
use std::time::{Duration, Instant};

/// How long the loop blocks waiting on the real-time channel (or sleeps, if
/// no real-time channel is wired) between scheduling checks.
const SYSCHECK_WAIT: Duration = Duration::from_secs(5);

/// Extra settle time around a scan cycle's start/end markers, matching the
/// `tsleep + 20` pause observed before the "Ending" marker is sent.
const MARKER_SETTLE: Duration = Duration::from_secs(20);

struct SchedulerState {
    last_sk: Instant,
    last_rootcheck: Instant,
    day_scanned: bool,
    last_day: Option<NaiveDate>,
}

impl SchedulerState {
    fn initial(config: &SyscheckConfig) -> Self {
        let now = Local::now();
        let day_scanned = day_already_satisfied(config, now.naive_local().date());
        SchedulerState {
            last_sk: Instant::now(),
            last_rootcheck: Instant::now(),
            day_scanned,
            last_day: Some(now.naive_local().date()),
        }
    }
}

fn day_already_satisfied(config: &SyscheckConfig, today: NaiveDate) -> bool {
    let now = Local::now();
    match (config.scan_time, config.scan_day) {
        (Some(scan_time), Some(mask)) => {
            !mask.contains(today.weekday()) || now.time() < scan_time
        }
        (Some(scan_time), None) => now.time() < scan_time,
        _ => true,
    }
}

pub struct Scheduler<'a> {
    pub config: &'a SyscheckConfig,
    pub db: &'a mut Database,
    pub ignore: &'a IgnoreRules,
    pub sink: &'a mut dyn EventSink,
    pub rootcheck: &'a mut dyn RootkitCheck,
    pub see_changes: &'a mut dyn SeeChangesCapture,
    pub realtime: Option<&'a RealtimeChannel>,
}

impl<'a> Scheduler<'a> {
    /// Runs the daemon loop until `should_stop` returns true. Checked once
    /// per iteration, matching the original's cooperative restart-signal
    /// polling at the top of the loop.
    ///
    /// Returns `Err` the first time the event sink fails fatally (its one
    /// reconnect attempt also failing). Per the sink's fatal-exit contract,
    /// the loop stops rather than keep running and silently dropping every
    /// subsequent event.
    pub fn run(&mut self, mut should_stop: impl FnMut() -> bool) -> Result<(), SinkError> {
        set_priority_hint();

        let mut state = SchedulerState::initial(self.config);
        if self.config.scan_on_start {
            self.run_scan_cycle()?;
            state.last_sk = Instant::now();
        }

        while !should_stop() {
            self.tick(&mut state)?;
        }
        Ok(())
    }

    fn tick(&mut self, state: &mut SchedulerState) -> Result<(), SinkError> {
        let now = Local::now();
        let today = now.naive_local().date();

        if state.last_day != Some(today) {
            state.day_scanned = false;
            state.last_day = Some(today);
        }

        let mut run_now = false;
        if !state.day_scanned
            && let Some(scan_time) = self.config.scan_time
        {
            let day_matches = self
                .config
                .scan_day
                .map(|mask| mask.contains(today.weekday()))
                .unwrap_or(true);
            if day_matches && now.time() >= scan_time {
                run_now = true;
                state.day_scanned = true;
            }
        }

        if state.last_rootcheck.elapsed() > self.config.rootcheck_time {
            self.rootcheck.run(self.sink);
            state.last_rootcheck = Instant::now();
        }

        if run_now || state.last_sk.elapsed() > self.config.time {
            self.run_scan_cycle()?;
            state.last_sk = Instant::now();
        }

        match self.realtime {
            Some(channel) => {
                for notification in channel.wait_and_drain(SYSCHECK_WAIT) {
                    self.process_realtime(&notification.path)?;
                }
            }
            None => std::thread::sleep(SYSCHECK_WAIT),
        }
        Ok(())
    }

    /// Runs exactly one scan cycle and returns, without setting the
    /// scheduling priority hint or touching the real-time channel. Used by
    /// `--once`/`--dry-run` instead of [`Scheduler::run`]'s infinite loop.
    pub fn run_once(&mut self) -> Result<(), SinkError> {
        self.run_scan_cycle()
    }

    fn run_scan_cycle(&mut self) -> Result<(), SinkError> {
        self.sink
            .send(Topic::Rootcheck, "Starting syscheck scan.")?;

        {
            let mut ctx = ScanContext::new(
                self.db,
                self.ignore,
                self.config.prefilter_cmd.as_deref(),
                self.sink,
                self.see_changes,
                self.config.sleep_after,
                self.config.tsleep,
            )
            .with_skip_nfs(self.config.skip_nfs);
            scan::scan_all_roots(&self.config.roots, &mut ctx)?;
        }

        std::thread::sleep(self.config.tsleep + MARKER_SETTLE);
        self.sink.send(Topic::Rootcheck, "Ending syscheck scan.")?;

        for path in self.db.sweep_deleted() {
            self.sink.send(Topic::Syscheck, &format!("-1 {path}"))?;
        }
        Ok(())
    }

    fn process_realtime(&mut self, path: &std::path::Path) -> Result<(), SinkError> {
        let Some(root) = self
            .config
            .roots
            .iter()
            .find(|r| path.starts_with(&r.path))
        else {
            return Ok(());
        };
        let flags_tag: FlagsTag = root.mask.flags_tag();
        let restriction = root.restriction.clone();
        let mut ctx = ScanContext::new(
            self.db,
            self.ignore,
            self.config.prefilter_cmd.as_deref(),
            self.sink,
            self.see_changes,
            self.config.sleep_after,
            self.config.tsleep,
        );
        scan::scan_single_path(path, &flags_tag, restriction.as_ref(), &mut ctx)
    }
}

#[cfg(target_os = "linux")]
fn set_priority_hint() {
    let param = libc::sched_param { sched_priority: 0 };
    // SAFETY: pid 0 means "this process"; param is a valid, live sched_param
    // for the duration of the call.
    let result = unsafe { libc::sched_setscheduler(0, libc::SCHED_BATCH, &param) };
    if result != 0 {
        tracing::debug!(
            error = %std::io::Error::last_os_error(),
            "failed to set SCHED_BATCH priority, continuing without it"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn set_priority_hint() {}
