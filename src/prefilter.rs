//! Opens a file for hashing, optionally through an external filter command.
//!
//! When a prefilter command is configured, its stdout is hashed in place of
//! the file's own bytes: `<cmd> <path>`, read until EOF, then reaped.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};

#[derive(Debug, thiserror::Error)]
pub enum PrefilterError {
    #[error("failed to open {0}: {1}")]
    Open(std::path::PathBuf, std::io::Error),
    #[error("failed to spawn prefilter command {cmd}: {source}")]
    Spawn {
        cmd: String,
        source: std::io::Error,
    },
    #[error("prefilter command {cmd} exited with status {status}")]
    ChildFailed { cmd: String, status: i32 },
    #[error("I/O error reading from source: {0}")]
    Io(#[from] std::io::Error),
}

enum Source {
    Direct(File),
    Piped {
        child: Child,
        cmd: String,
    },
}

/// A byte stream to hash, plus enough bookkeeping to surface a nonzero
/// prefilter exit status after the stream has been fully consumed.
pub struct HashSource {
    source: Source,
}

impl HashSource {
    pub fn open(path: &Path, prefilter_cmd: Option<&str>) -> Result<Self, PrefilterError> {
        match prefilter_cmd {
            None => {
                let file =
                    File::open(path).map_err(|e| PrefilterError::Open(path.to_path_buf(), e))?;
                Ok(HashSource {
                    source: Source::Direct(file),
                })
            }
            Some(cmd) => {
                let mut command = Command::new(cmd);
                command.arg(path).stdout(Stdio::piped());
                let child = command.spawn().map_err(|e| PrefilterError::Spawn {
                    cmd: cmd.to_string(),
                    source: e,
                })?;
                Ok(HashSource {
                    source: Source::Piped {
                        child,
                        cmd: cmd.to_string(),
                    },
                })
            }
        }
    }

    /// Reads the entire stream into `hash_chunk`, then for a piped source
    /// waits on the child and reports a nonzero exit as an error. The bytes
    /// already hashed are not rolled back; the caller decides how to treat
    /// a caller-visible fingerprint computed from a failed prefilter run.
    pub fn hash_all(mut self, mut hash_chunk: impl FnMut(&[u8])) -> Result<(), PrefilterError> {
        let mut buffer = [0u8; 8192];
        let reader: &mut dyn Read = match &mut self.source {
            Source::Direct(file) => file,
            Source::Piped { child, .. } => child.stdout.as_mut().expect("stdout was piped"),
        };
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hash_chunk(&buffer[..n]);
        }

        if let Source::Piped { mut child, cmd } = self.source {
            let status = child.wait()?;
            if !status.success() {
                return Err(PrefilterError::ChildFailed {
                    cmd,
                    status: status.code().unwrap_or(-1),
                });
            }
        }
        Ok(())
    }
}
