//! # Target Locking
//!
//! Advisory lock on the target directory so that overlapping runs fail
//! fast instead of corrupting each other's view of the snapshot chain.
//! The lock file stays behind after release; only the `flock` matters.

use crate::error::{BackupError, Result};
use anyhow::Context;
use fs2::FileExt;
use log::debug;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Name of the lock file inside the target directory. Deliberately not
/// shaped like a snapshot name, so the catalog never picks it up.
const LOCK_FILE: &str = ".lttp.lock";

/// Exclusive lock on a target directory, released on drop.
pub struct TargetLock {
    file: std::fs::File,
    path: PathBuf,
}

impl TargetLock {
    /// Try to take the lock; fails immediately when another process holds it.
    pub fn acquire(target: &Path) -> Result<TargetLock> {
        let path = target.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        file.try_lock_exclusive()
            .map_err(|_| BackupError::Locked(target.to_path_buf()))?;
        debug!("locked target {}", target.display());
        Ok(TargetLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        // unlock errors on drop are ignored deliberately
        let _ = self.file.unlock();
    }
}
