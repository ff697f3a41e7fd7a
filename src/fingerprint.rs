//! Computes the canonical `size:mode:uid:gid:md5:sha1` fingerprint of a path.
//!
//! Directories skip hashing entirely (both hash fields become `ddd`); files
//! and symlinks are hashed through the prefilter pipeline, computing MD5 and
//! SHA-1 together in a single pass when both are requested.

use crate::model::{EntryKind, FlagsTag, OptionMask};
use crate::prefilter::{HashSource, PrefilterError};
use md5::Md5;
use sha1::Sha1;
use sha1::digest::Digest;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("hashing failed for {0}")]
    HashIo(#[from] PrefilterError),
}

/// Metadata captured by a single stat/lstat call, independent of platform.
pub struct StatInfo {
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Computes the fingerprint for a path whose metadata has already been
/// captured by the caller (the scan engine owns the single stat call so it
/// can also decide whether to recurse, without this module stat-ing twice).
pub fn fingerprint(
    path: &Path,
    flags_tag: &FlagsTag,
    stat: &StatInfo,
    prefilter_cmd: Option<&str>,
) -> Result<String, FingerprintError> {
    let want_size = flags_tag[0] == '+';
    let want_perm = flags_tag[1] == '+';
    let want_uid = flags_tag[2] == '+';
    let want_gid = flags_tag[3] == '+';
    let want_md5 = flags_tag[4] == '+';
    let want_sha1 = OptionMask::wants_sha1(flags_tag);

    let size = if want_size { stat.size } else { 0 };
    let mode = if want_perm { stat.mode } else { 0 };
    let uid = if want_uid { stat.uid } else { 0 };
    let gid = if want_gid { stat.gid } else { 0 };

    let (md5_hex, sha1_hex) = match stat.kind {
        EntryKind::Dir => ("ddd".to_string(), "ddd".to_string()),
        EntryKind::File | EntryKind::Symlink => {
            if !want_md5 && !want_sha1 {
                ("xxx".to_string(), "xxx".to_string())
            } else {
                hash_file(path, want_md5, want_sha1, prefilter_cmd)?
            }
        }
    };

    Ok(format!(
        "{size}:{mode}:{uid}:{gid}:{md5_hex}:{sha1_hex}"
    ))
}

fn hash_file(
    path: &Path,
    want_md5: bool,
    want_sha1: bool,
    prefilter_cmd: Option<&str>,
) -> Result<(String, String), FingerprintError> {
    let source = HashSource::open(path, prefilter_cmd)?;
    let mut md5_hasher = Md5::new();
    let mut sha1_hasher = Sha1::new();

    source.hash_all(|chunk| {
        if want_md5 {
            md5_hasher.update(chunk);
        }
        if want_sha1 {
            sha1_hasher.update(chunk);
        }
    })?;

    let md5_hex = if want_md5 {
        format!("{:x}", md5_hasher.finalize())
    } else {
        "xxx".to_string()
    };
    let sha1_hex = if want_sha1 {
        format!("{:x}", sha1_hasher.finalize())
    } else {
        "xxx".to_string()
    };

    Ok((md5_hex, sha1_hex))
}
