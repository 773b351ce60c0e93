//! Workspace lock: one mutating operation per workspace at a time

use crate::error::RepoError;
use chrono::{DateTime, Utc};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Who holds the lock, written into the lock file for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid {} since {}", self.pid, self.acquired_at.to_rfc3339())
    }
}

/// Exclusive advisory lock on `.lode/lock`, released on drop
#[derive(Debug)]
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

impl RepoLock {
    /// Take the lock without waiting; `RepoError::LockHeld` if another
    /// process has it
    pub fn acquire(path: &Path) -> Result<Self, RepoError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                let holder = read_holder(&mut file)
                    .map(|info| info.to_string())
                    .unwrap_or_else(|| "unknown holder".to_string());
                return Err(RepoError::LockHeld(holder));
            }
            Err(err) => return Err(err.into()),
        }

        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_vec(&info)
            .map_err(|e| RepoError::ConfigError(format!("Failed to encode lock info: {}", e)))?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&body)?;
        file.flush()?;

        debug!(lock = %path.display(), pid = info.pid, "Workspace lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_holder(file: &mut File) -> Option<LockInfo> {
    let mut body = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut body).ok()?;
    serde_json::from_str(&body).ok()
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        // Clear the holder before unlocking so waiters never read a stale pid
        if let Err(e) = self.file.set_len(0) {
            warn!(lock = %self.path.display(), error = %e, "Failed to clear lock file");
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release workspace lock");
        }
    }
}
