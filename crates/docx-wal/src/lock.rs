//! Per-session advisory lock.
//!
//! Cross-process mutation of one session is serialized by an OS advisory
//! lock on `<id>.lock`. The OS drops the lock if the holder crashes, so a
//! surviving process can always make progress.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use fs2::FileExt;
use tracing::warn;

use docx_session_core::SessionError;

/// Holds the advisory lock for one session; released on drop.
#[derive(Debug)]
pub struct SessionLockGuard {
    file: File,
    path: PathBuf,
}

impl SessionLockGuard {
    pub(crate) fn acquire(path: PathBuf) -> Result<Self, SessionError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| SessionError::io(format!("failed to open {}", path.display()), e))?;
        file.lock_exclusive()
            .map_err(|e| SessionError::io(format!("failed to lock {}", path.display()), e))?;
        Ok(Self { file, path })
    }
}

impl Drop for SessionLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release session lock");
        }
    }
}
