//! Core data types shared by the scan engine, database, and scheduler.
//!
//! Mirrors the `record->alert_msg` layout of the system this was ported from,
//! but split into a typed tag and an owned fingerprint string instead of one
//! packed byte buffer.

use regex::Regex;
use std::path::PathBuf;

/// Which checks are active for a monitored path, plus the two modifiers that
/// change how a check's result is reported rather than what is checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptionMask {
    pub size: bool,
    pub perm: bool,
    pub owner: bool,
    pub group: bool,
    pub md5: bool,
    pub sha1: bool,
    pub see_changes: bool,
    pub realtime: bool,
}

/// The 6-character tag recorded alongside a path's fingerprint, one character
/// per check in a fixed order: size, perm, owner, group, md5, sha1. The sha1
/// position is also used to encode `see_changes` (`s`/`n` instead of `+`/`-`).
pub type FlagsTag = [char; 6];

impl OptionMask {
    pub fn flags_tag(&self) -> FlagsTag {
        let sha1_char = match (self.sha1, self.see_changes) {
            (true, true) => 's',
            (false, true) => 'n',
            (true, false) => '+',
            (false, false) => '-',
        };
        [
            bit(self.size),
            bit(self.perm),
            bit(self.owner),
            bit(self.group),
            bit(self.md5),
            sha1_char,
        ]
    }

    pub fn wants_sha1(tag: &FlagsTag) -> bool {
        matches!(tag[5], '+' | 's')
    }

    pub fn wants_see_changes(tag: &FlagsTag) -> bool {
        matches!(tag[5], 's' | 'n')
    }
}

fn bit(on: bool) -> char {
    if on { '+' } else { '-' }
}

/// A monitored subtree: the root path, the checks to perform under it, and an
/// optional restriction limiting which files within it are actually checked.
#[derive(Clone, Debug)]
pub struct RootConfig {
    pub path: PathBuf,
    pub mask: OptionMask,
    pub restriction: Option<Regex>,
}

/// A record kept in the integrity database for one observed path.
#[derive(Clone, Debug)]
pub struct Record {
    pub flags_tag: FlagsTag,
    pub last_fingerprint: String,
    pub scanned: bool,
}

impl Record {
    pub fn new(flags_tag: FlagsTag, fingerprint: String) -> Self {
        Record {
            flags_tag,
            last_fingerprint: fingerprint,
            scanned: true,
        }
    }
}

/// Kinds of filesystem objects the scan engine distinguishes. Sockets, FIFOs,
/// and other special files are rejected before reaching this type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}
