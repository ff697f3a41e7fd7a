//! Non-recursive directory listing for the scan engine.
//!
//! Lists the immediate children of a directory, collecting the metadata the
//! fingerprint computer needs for each entry. Symlinks are never followed:
//! `symlink_metadata` (lstat) is used throughout, and a symlink entry is
//! reported as such rather than resolved.

use crate::model::EntryKind;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum DirListError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("non-UTF-8 path not supported: {0:?}")]
    NonUtf8Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub symlink_target: Option<PathBuf>,
}

/// Lists the immediate children of `root`. Entries are returned in a
/// `BTreeMap` keyed by filename so scans are deterministic regardless of the
/// order the platform's `readdir` happens to return.
pub fn list_directory(root: &Path) -> Result<BTreeMap<String, FsEntry>, DirListError> {
    let read_dir = std::fs::read_dir(root).map_err(|e| classify_io(e, root))?;

    let mut entries = BTreeMap::new();

    for entry in read_dir {
        let entry = entry.map_err(DirListError::Io)?;
        let path = entry.path();

        let metadata = std::fs::symlink_metadata(&path).map_err(|e| classify_io(e, &path))?;

        let filename = path
            .file_name()
            .ok_or_else(|| DirListError::Io(std::io::Error::other("failed to get filename")))?
            .to_str()
            .ok_or_else(|| DirListError::NonUtf8Path(path.clone()))?
            .to_string();

        let file_type = metadata.file_type();

        let (kind, symlink_target) = if file_type.is_symlink() {
            let target = std::fs::read_link(&path).map_err(|e| classify_io(e, &path))?;
            (EntryKind::Symlink, Some(target))
        } else if file_type.is_dir() {
            (EntryKind::Dir, None)
        } else if file_type.is_file() {
            (EntryKind::File, None)
        } else {
            // A FIFO, socket, device, or other special file: skip it and
            // keep going, the same way the original's readdir loop simply
            // never matches it against S_ISDIR/S_ISREG/S_ISLNK and moves on
            // to the next entry. One special file must not take down
            // monitoring for the rest of the directory.
            tracing::debug!(path = %path.display(), "skipping unsupported file type");
            continue;
        };

        entries.insert(
            filename,
            FsEntry {
                kind,
                size: metadata.len(),
                mode: platform::mode(&metadata),
                uid: platform::uid(&metadata),
                gid: platform::gid(&metadata),
                symlink_target,
            },
        );
    }

    Ok(entries)
}

/// Exposes the platform-specific mode/uid/gid extraction so the scan engine
/// can reuse it for paths it stats directly (not just directory children).
pub fn metadata_fields(metadata: &std::fs::Metadata) -> (u32, u32, u32) {
    (
        platform::mode(metadata),
        platform::uid(metadata),
        platform::gid(metadata),
    )
}

fn classify_io(e: std::io::Error, path: &Path) -> DirListError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        DirListError::PermissionDenied(path.to_path_buf())
    } else {
        DirListError::Io(e)
    }
}

#[cfg(unix)]
mod platform {
    use std::fs::Metadata;
    use std::os::unix::fs::MetadataExt;

    pub fn mode(metadata: &Metadata) -> u32 {
        metadata.mode()
    }

    pub fn uid(metadata: &Metadata) -> u32 {
        metadata.uid()
    }

    pub fn gid(metadata: &Metadata) -> u32 {
        metadata.gid()
    }
}

#[cfg(not(unix))]
mod platform {
    use std::fs::Metadata;

    pub fn mode(_metadata: &Metadata) -> u32 {
        0
    }

    pub fn uid(_metadata: &Metadata) -> u32 {
        0
    }

    pub fn gid(_metadata: &Metadata) -> u32 {
        0
    }
}
