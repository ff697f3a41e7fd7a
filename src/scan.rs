//! The scan engine: recursive traversal, ignore/restriction filtering,
//! fingerprinting against the database, and event emission.
//!
//! One [`ScanContext`] is created per scan cycle and threaded through every
//! configured root, because the throttle counter it carries must survive
//! across roots within a cycle without resetting (it is only ever reset by
//! the scheduler at the start of the next cycle).

use crate::database::Database;
use crate::dir_list::{self, DirListError};
use crate::fingerprint::{self, FingerprintError, StatInfo};
use crate::ignore::{self, IgnoreRules};
use crate::model::{EntryKind, FlagsTag, OptionMask, RootConfig};
use crate::sink::{EventSink, SinkError, Topic};
use regex::Regex;
use std::path::Path;
use std::time::Duration;

/// Side-effect hook invoked when `SEECHANGES` is active for a path that was
/// just added or modified. What it captures (e.g. a unified diff against
/// the prior content) is out of scope here; it is invoked purely for its
/// effect on the emitted event line.
pub trait SeeChangesCapture: Send {
    fn capture(&mut self, path: &str) -> Option<String>;
}

pub struct NoopSeeChangesCapture;

impl SeeChangesCapture for NoopSeeChangesCapture {
    fn capture(&mut self, _path: &str) -> Option<String> {
        None
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub struct ScanStats {
    pub files_scanned: u64,
    pub dirs_scanned: u64,
    pub additions: u64,
    pub modifications: u64,
}

pub struct ScanContext<'a> {
    pub db: &'a mut Database,
    pub ignore: &'a IgnoreRules,
    pub prefilter_cmd: Option<&'a str>,
    pub sink: &'a mut dyn EventSink,
    pub see_changes: &'a mut dyn SeeChangesCapture,
    pub sleep_after: u32,
    pub tsleep: Duration,
    skip_nfs: bool,
    counter: u32,
    stats: ScanStats,
}

impl<'a> ScanContext<'a> {
    pub fn new(
        db: &'a mut Database,
        ignore: &'a IgnoreRules,
        prefilter_cmd: Option<&'a str>,
        sink: &'a mut dyn EventSink,
        see_changes: &'a mut dyn SeeChangesCapture,
        sleep_after: u32,
        tsleep: Duration,
    ) -> Self {
        ScanContext {
            db,
            ignore,
            prefilter_cmd,
            sink,
            see_changes,
            sleep_after,
            tsleep,
            skip_nfs: false,
            counter: 0,
            stats: ScanStats::default(),
        }
    }

    /// Opts this scan into skipping any configured root that turns out to be
    /// an NFS mount. Off by default so tests and single-path realtime scans
    /// don't need to care about it.
    pub fn with_skip_nfs(mut self, skip_nfs: bool) -> Self {
        self.skip_nfs = skip_nfs;
        self
    }

    fn throttle_tick(&mut self) {
        self.counter += 1;
        if self.counter >= self.sleep_after {
            std::thread::sleep(self.tsleep);
            self.counter = 0;
        }
    }
}

/// Walks every configured root in order, sharing one throttle counter and
/// one database across the whole cycle.
///
/// Returns `Err` the first time the event sink fails twice in a row (its
/// one reconnect attempt also failing). Per the sink's fatal-exit contract,
/// the caller is expected to treat that as unrecoverable rather than keep
/// scanning and silently dropping every subsequent event.
pub fn scan_all_roots(roots: &[RootConfig], ctx: &mut ScanContext) -> Result<ScanStats, SinkError> {
    for root in roots {
        // The NFS check happens once here, at walk start, and is never
        // re-evaluated for anything found beneath the root during the walk.
        if ctx.skip_nfs && is_nfs_mount(&root.path) {
            tracing::debug!(path = %root.path.display(), "skipping NFS-mounted root");
            continue;
        }
        walk(&root.path, &root.mask.flags_tag(), root.restriction.as_ref(), ctx)?;
    }
    Ok(ctx.stats)
}

#[cfg(target_os = "linux")]
fn is_nfs_mount(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    const NFS_SUPER_MAGIC: i64 = 0x6969;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    let mut stat = std::mem::MaybeUninit::<libc::statfs>::uninit();
    // SAFETY: c_path is a valid NUL-terminated string and stat points to
    // enough space for a libc::statfs, which statfs() fully initializes on
    // success.
    let result = unsafe { libc::statfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if result != 0 {
        return false;
    }
    let stat = unsafe { stat.assume_init() };
    stat.f_type as i64 == NFS_SUPER_MAGIC
}

#[cfg(not(target_os = "linux"))]
fn is_nfs_mount(_path: &Path) -> bool {
    false
}

/// Scans a single path immediately, outside the normal root-by-root walk.
/// Used by the scheduler to react to a real-time change notification without
/// waiting for the next periodic cycle.
pub fn scan_single_path(
    path: &Path,
    flags_tag: &FlagsTag,
    restriction: Option<&Regex>,
    ctx: &mut ScanContext,
) -> Result<(), SinkError> {
    walk(path, flags_tag, restriction, ctx)
}

fn path_str(path: &Path) -> Option<String> {
    path.to_str().map(str::to_string)
}

fn walk(
    path: &Path,
    flags_tag: &FlagsTag,
    restriction: Option<&Regex>,
    ctx: &mut ScanContext,
) -> Result<(), SinkError> {
    let Some(path_string) = path_str(path) else {
        tracing::warn!(path = ?path, "skipping non-UTF-8 path");
        return Ok(());
    };

    if ctx.ignore.is_ignored(&path_string) {
        return Ok(());
    }

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => {
            return handle_vanished(&path_string, ctx);
        }
    };

    let kind = if metadata.file_type().is_symlink() {
        EntryKind::Symlink
    } else if metadata.file_type().is_dir() {
        EntryKind::Dir
    } else if metadata.file_type().is_file() {
        EntryKind::File
    } else {
        tracing::debug!(path = %path_string, "skipping unsupported file type");
        return Ok(());
    };

    let (mode, uid, gid) = dir_list::metadata_fields(&metadata);
    let stat = StatInfo {
        kind,
        size: metadata.len(),
        mode,
        uid,
        gid,
    };

    match kind {
        EntryKind::Dir => walk_directory(path, &path_string, flags_tag, &stat, restriction, ctx),
        EntryKind::File | EntryKind::Symlink => {
            walk_file(path, &path_string, flags_tag, &stat, restriction, ctx)
        }
    }
}

fn handle_vanished(path_string: &str, ctx: &mut ScanContext) -> Result<(), SinkError> {
    if ctx.db.remove(path_string).is_some() {
        ctx.sink.send(Topic::Syscheck, &format!("-1 {path_string}"))?;
    }
    Ok(())
}

fn walk_directory(
    path: &Path,
    path_string: &str,
    flags_tag: &FlagsTag,
    stat: &StatInfo,
    restriction: Option<&Regex>,
    ctx: &mut ScanContext,
) -> Result<(), SinkError> {
    record_and_emit(path, path_string, flags_tag, stat, ctx)?;
    ctx.stats.dirs_scanned += 1;

    match dir_list::list_directory(path) {
        Ok(entries) => {
            for name in entries.keys() {
                walk(&path.join(name), flags_tag, restriction, ctx)?;
            }
        }
        Err(DirListError::Io(e)) if e.kind() == std::io::ErrorKind::NotADirectory => {
            walk_file(path, path_string, flags_tag, stat, restriction, ctx)?;
        }
        Err(e) => {
            tracing::warn!(path = %path_string, error = %e, "failed to open directory, abandoning subtree");
        }
    }
    Ok(())
}

fn walk_file(
    path: &Path,
    path_string: &str,
    root_flags_tag: &FlagsTag,
    stat: &StatInfo,
    restriction: Option<&Regex>,
    ctx: &mut ScanContext,
) -> Result<(), SinkError> {
    if !ignore::passes_restriction(restriction, path_string) {
        return Ok(());
    }

    let existing_tag = ctx.db.lookup(path_string).map(|r| r.flags_tag);
    let flags_tag = existing_tag.unwrap_or(*root_flags_tag);

    record_and_emit(path, path_string, &flags_tag, stat, ctx)?;
    ctx.stats.files_scanned += 1;
    ctx.throttle_tick();
    Ok(())
}

/// Shared add/modify logic for both files and directories: compute the
/// fingerprint, compare it against the database, insert or update, and emit
/// the corresponding event line.
///
/// SEECHANGES only ever applies to files and symlinks: directories never
/// invoke the snapshotter, matching the original's directory-handling
/// branch, which has no `seechanges_addfile` call at all. On an addition,
/// the snapshotter is invoked purely for its side effect (capturing a
/// baseline) and its return value is discarded; only a modification's diff
/// is ever attached to the emitted line.
fn record_and_emit(
    path: &Path,
    path_string: &str,
    flags_tag: &FlagsTag,
    stat: &StatInfo,
    ctx: &mut ScanContext,
) -> Result<(), SinkError> {
    let already_present = ctx.db.lookup(path_string).is_some();

    if already_present {
        // Mirrors the upstream behavior of marking a record scanned before
        // attempting to recompute its fingerprint: a hashing failure does
        // not resurrect the record as unscanned and sweep-delete it.
        let _ = ctx.db.mark_scanned(path_string);
    }

    let fp = match fingerprint::fingerprint(path, flags_tag, stat, ctx.prefilter_cmd) {
        Ok(fp) => fp,
        Err(FingerprintError::HashIo(e)) => {
            tracing::warn!(path = %path_string, error = %e, "failed to hash file, skipping this cycle");
            return Ok(());
        }
    };

    let wants_see_changes = stat.kind != EntryKind::Dir && OptionMask::wants_see_changes(flags_tag);

    if !already_present {
        if ctx.db.insert(path_string.to_string(), *flags_tag, fp.clone()).is_err() {
            return Ok(());
        }
        ctx.stats.additions += 1;
        if wants_see_changes {
            ctx.see_changes.capture(path_string);
        }
        let line = format!("{fp} {path_string}");
        ctx.sink.send(Topic::Syscheck, &line)?;
        return Ok(());
    }

    let unchanged = ctx
        .db
        .lookup(path_string)
        .map(|r| r.last_fingerprint == fp)
        .unwrap_or(false);

    if unchanged {
        return Ok(());
    }

    if ctx.db.update_fingerprint(path_string, fp.clone()).is_err() {
        return Ok(());
    }
    ctx.stats.modifications += 1;

    let mut line = format!("{fp} {path_string}");
    if wants_see_changes
        && let Some(diff) = ctx.see_changes.capture(path_string)
    {
        line.push('\n');
        line.push_str(&diff);
    }
    ctx.sink.send(Topic::Syscheck, &line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OptionMask;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct VecSink(Arc<Mutex<Vec<String>>>);
    impl EventSink for VecSink {
        fn send(&mut self, _topic: Topic, line: &str) -> Result<(), crate::sink::SinkError> {
            self.0.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    fn mask(size: bool, md5: bool, sha1: bool) -> OptionMask {
        OptionMask {
            size,
            perm: false,
            owner: false,
            group: false,
            md5,
            sha1,
            see_changes: false,
            realtime: false,
        }
    }

    #[test]
    fn fresh_file_emits_one_addition() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hosts"), "127.0.0.1 localhost").unwrap();

        let mut db = Database::new();
        let ignore = IgnoreRules::new(vec![], vec![]);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut sink = VecSink(lines.clone());
        let mut no_see_changes = NoopSeeChangesCapture;
        let mut ctx = ScanContext::new(
            &mut db,
            &ignore,
            None,
            &mut sink,
            &mut no_see_changes,
            u32::MAX,
            Duration::from_secs(0),
        );

        let roots = vec![RootConfig {
            path: dir.path().to_path_buf(),
            mask: mask(true, true, false),
            restriction: None,
        }];
        scan_all_roots(&roots, &mut ctx).unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2); // the directory itself, then the file
        assert!(lines.iter().any(|l| l.ends_with("hosts") && l.contains(':')));
    }

    #[test]
    fn second_scan_with_no_changes_emits_nothing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hosts"), "content").unwrap();
        let mut db = Database::new();
        let ignore = IgnoreRules::new(vec![], vec![]);

        let roots = vec![RootConfig {
            path: dir.path().to_path_buf(),
            mask: mask(true, false, false),
            restriction: None,
        }];

        {
            let lines = Arc::new(Mutex::new(Vec::new()));
            let mut sink = VecSink(lines);
            let mut nop = NoopSeeChangesCapture;
            let mut ctx = ScanContext::new(
                &mut db, &ignore, None, &mut sink, &mut nop, u32::MAX, Duration::from_secs(0),
            );
            scan_all_roots(&roots, &mut ctx).unwrap();
            db.sweep_deleted();
        }

        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut sink = VecSink(lines.clone());
        let mut nop = NoopSeeChangesCapture;
        let mut ctx = ScanContext::new(
            &mut db, &ignore, None, &mut sink, &mut nop, u32::MAX, Duration::from_secs(0),
        );
        scan_all_roots(&roots, &mut ctx).unwrap();

        assert!(lines.lock().unwrap().is_empty());
    }

    #[test]
    fn deleted_file_is_emitted_by_sweep() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("gone.txt");
        fs::write(&file_path, "content").unwrap();
        let mut db = Database::new();
        let ignore = IgnoreRules::new(vec![], vec![]);
        let roots = vec![RootConfig {
            path: dir.path().to_path_buf(),
            mask: mask(true, false, false),
            restriction: None,
        }];

        {
            let lines = Arc::new(Mutex::new(Vec::new()));
            let mut sink = VecSink(lines);
            let mut nop = NoopSeeChangesCapture;
            let mut ctx = ScanContext::new(
                &mut db, &ignore, None, &mut sink, &mut nop, u32::MAX, Duration::from_secs(0),
            );
            scan_all_roots(&roots, &mut ctx).unwrap();
            db.sweep_deleted();
        }

        fs::remove_file(&file_path).unwrap();

        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut sink = VecSink(lines.clone());
        let mut nop = NoopSeeChangesCapture;
        let mut ctx = ScanContext::new(
            &mut db, &ignore, None, &mut sink, &mut nop, u32::MAX, Duration::from_secs(0),
        );
        scan_all_roots(&roots, &mut ctx).unwrap();
        let deleted = db.sweep_deleted();

        assert_eq!(deleted, vec![dir.path().join("gone.txt").to_str().unwrap().to_string()]);
    }

    #[test]
    fn restriction_excludes_non_matching_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hosts"), "content").unwrap();
        fs::write(dir.path().join("app.conf"), "content").unwrap();

        let mut db = Database::new();
        let ignore = IgnoreRules::new(vec![], vec![]);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut sink = VecSink(lines.clone());
        let mut nop = NoopSeeChangesCapture;
        let mut ctx = ScanContext::new(
            &mut db, &ignore, None, &mut sink, &mut nop, u32::MAX, Duration::from_secs(0),
        );

        let roots = vec![RootConfig {
            path: dir.path().to_path_buf(),
            mask: mask(true, false, false),
            restriction: Some(Regex::new(r"\.conf$").unwrap()),
        }];
        scan_all_roots(&roots, &mut ctx).unwrap();

        let lines = lines.lock().unwrap();
        assert!(lines.iter().any(|l| l.ends_with("app.conf")));
        assert!(!lines.iter().any(|l| l.ends_with("hosts")));
    }

    #[test]
    fn modification_updates_fingerprint_and_emits_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, "v1").unwrap();

        let mut db = Database::new();
        let ignore = IgnoreRules::new(vec![], vec![]);
        let roots = vec![RootConfig {
            path: dir.path().to_path_buf(),
            mask: mask(true, false, false),
            restriction: None,
        }];

        {
            let lines = Arc::new(Mutex::new(Vec::new()));
            let mut sink = VecSink(lines);
            let mut nop = NoopSeeChangesCapture;
            let mut ctx = ScanContext::new(
                &mut db, &ignore, None, &mut sink, &mut nop, u32::MAX, Duration::from_secs(0),
            );
            scan_all_roots(&roots, &mut ctx).unwrap();
            db.sweep_deleted();
        }

        fs::write(&path, "v2-longer").unwrap();

        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut sink = VecSink(lines.clone());
        let mut nop = NoopSeeChangesCapture;
        let mut ctx = ScanContext::new(
            &mut db, &ignore, None, &mut sink, &mut nop, u32::MAX, Duration::from_secs(0),
        );
        scan_all_roots(&roots, &mut ctx).unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.iter().filter(|l| l.ends_with("data.bin")).count(), 1);
    }

    #[test]
    fn skip_nfs_off_by_default_even_when_flag_would_not_apply() {
        // A plain tmpfs/tmpdir root is never NFS, so this just exercises that
        // with_skip_nfs(true) doesn't wrongly skip an ordinary local root.
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hosts"), "content").unwrap();

        let mut db = Database::new();
        let ignore = IgnoreRules::new(vec![], vec![]);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut sink = VecSink(lines.clone());
        let mut nop = NoopSeeChangesCapture;
        let mut ctx = ScanContext::new(
            &mut db, &ignore, None, &mut sink, &mut nop, u32::MAX, Duration::from_secs(0),
        )
        .with_skip_nfs(true);

        let roots = vec![RootConfig {
            path: dir.path().to_path_buf(),
            mask: mask(true, false, false),
            restriction: None,
        }];
        scan_all_roots(&roots, &mut ctx).unwrap();

        assert!(lines.lock().unwrap().iter().any(|l| l.ends_with("hosts")));
    }

    struct CountingCapture {
        calls: Vec<String>,
        diff: Option<String>,
    }

    impl SeeChangesCapture for CountingCapture {
        fn capture(&mut self, path: &str) -> Option<String> {
            self.calls.push(path.to_string());
            self.diff.clone()
        }
    }

    fn see_changes_mask() -> OptionMask {
        OptionMask {
            size: true,
            perm: false,
            owner: false,
            group: false,
            md5: false,
            sha1: true,
            see_changes: true,
            realtime: false,
        }
    }

    #[test]
    fn see_changes_invoked_for_side_effect_only_on_addition() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file.txt"), "content").unwrap();

        let mut db = Database::new();
        let ignore = IgnoreRules::new(vec![], vec![]);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut sink = VecSink(lines.clone());
        let mut capture = CountingCapture {
            calls: Vec::new(),
            diff: Some("DIFF-BODY".to_string()),
        };
        let mut ctx = ScanContext::new(
            &mut db, &ignore, None, &mut sink, &mut capture, u32::MAX, Duration::from_secs(0),
        );

        let roots = vec![RootConfig {
            path: dir.path().to_path_buf(),
            mask: see_changes_mask(),
            restriction: None,
        }];
        scan_all_roots(&roots, &mut ctx).unwrap();

        // Only the file should have triggered the snapshotter, never the
        // directory itself.
        assert_eq!(capture.calls.len(), 1);
        assert!(capture.calls[0].ends_with("file.txt"));

        let lines = lines.lock().unwrap();
        let file_line = lines.iter().find(|l| l.ends_with("file.txt")).unwrap();
        assert!(!file_line.contains("DIFF-BODY"));
    }

    #[test]
    fn see_changes_diff_attached_only_on_modification() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, "v1").unwrap();

        let mut db = Database::new();
        let ignore = IgnoreRules::new(vec![], vec![]);
        let roots = vec![RootConfig {
            path: dir.path().to_path_buf(),
            mask: see_changes_mask(),
            restriction: None,
        }];

        {
            let lines = Arc::new(Mutex::new(Vec::new()));
            let mut sink = VecSink(lines);
            let mut capture = CountingCapture {
                calls: Vec::new(),
                diff: Some("ignored-on-add".to_string()),
            };
            let mut ctx = ScanContext::new(
                &mut db, &ignore, None, &mut sink, &mut capture, u32::MAX, Duration::from_secs(0),
            );
            scan_all_roots(&roots, &mut ctx).unwrap();
            db.sweep_deleted();
        }

        fs::write(&path, "v2-modified").unwrap();

        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut sink = VecSink(lines.clone());
        let mut capture = CountingCapture {
            calls: Vec::new(),
            diff: Some("MODIFIED-DIFF".to_string()),
        };
        let mut ctx = ScanContext::new(
            &mut db, &ignore, None, &mut sink, &mut capture, u32::MAX, Duration::from_secs(0),
        );
        scan_all_roots(&roots, &mut ctx).unwrap();

        let lines = lines.lock().unwrap();
        let file_line = lines.iter().find(|l| l.contains("file.txt")).unwrap();
        assert!(file_line.contains("MODIFIED-DIFF"));
    }

    struct AlwaysFailingSink;

    impl EventSink for AlwaysFailingSink {
        fn send(&mut self, _topic: Topic, _line: &str) -> Result<(), SinkError> {
            Err(SinkError::Write(std::io::Error::other("boom")))
        }
    }

    #[test]
    fn sink_failure_propagates_out_of_scan_all_roots() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file.txt"), "content").unwrap();

        let mut db = Database::new();
        let ignore = IgnoreRules::new(vec![], vec![]);
        let mut sink = AlwaysFailingSink;
        let mut nop = NoopSeeChangesCapture;
        let mut ctx = ScanContext::new(
            &mut db, &ignore, None, &mut sink, &mut nop, u32::MAX, Duration::from_secs(0),
        );

        let roots = vec![RootConfig {
            path: dir.path().to_path_buf(),
            mask: mask(true, false, false),
            restriction: None,
        }];

        assert!(scan_all_roots(&roots, &mut ctx).is_err());
    }
}
