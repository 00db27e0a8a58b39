//! # Editing Backups
//!
//! Sometimes it is even useful to edit backups, e.g. to remove files or
//! directories that were archived by accident. These operations break the
//! read-only seal in a controlled way: the affected parent is made
//! writable for the duration of the change and restored afterwards, and
//! the manifest is rewritten through the crash-safe `.new` dance.

use crate::error::{BackupError, Result};
use crate::filelist::{NodeId, FILE_LIST_NAME};
use crate::lock::TargetLock;
use crate::restore::Restore;
use log::{debug, warn};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Makes a path writable; the original permissions come back on drop.
struct Writable {
    path: PathBuf,
    mode: u32,
}

impl Writable {
    fn new(path: &Path) -> Result<Writable> {
        let mode = fs::symlink_metadata(path)
            .map_err(|e| BackupError::file(path, e))?
            .mode();
        fs::set_permissions(path, fs::Permissions::from_mode((mode | 0o200) & 0o7777))
            .map_err(|e| BackupError::file(path, e))?;
        Ok(Writable {
            path: path.to_path_buf(),
            mode,
        })
    }
}

impl Drop for Writable {
    fn drop(&mut self) {
        let _ = fs::set_permissions(
            &self.path,
            fs::Permissions::from_mode(self.mode & 0o7777),
        );
    }
}

impl Restore {
    /// Remove a file, or a directory with `recursive`, from this snapshot.
    /// This ultimately deletes the data from the backup. Without `force`,
    /// any removal failure aborts before the manifest is touched.
    pub fn rm(&mut self, source: &Path, recursive: bool, force: bool) -> Result<()> {
        let _lock = TargetLock::acquire(&self.backup.target_path)?;
        let id = self.root.lookup(source)?;
        if self.root.node(id).is_dir() {
            if !recursive {
                return Err(BackupError::Failed(format!(
                    "will not work on directories in non-recursive mode: {source:?}"
                )));
            }
            let parent_path = self.parent_backup_path(id);
            let guard = Writable::new(&parent_path)?;
            // every directory in the subtree must be writable before the
            // tree can go
            for entry in self.root.flattened(id, true) {
                let node = self.root.node(entry);
                if node.is_dir() {
                    let dir_path = self.root.backup_path(entry);
                    node.stat
                        .apply_chmod(&dir_path, node.stat.mode | 0o200)?;
                }
            }
            let victim = self.root.backup_path(id);
            debug!("removing tree {}", victim.display());
            fs::remove_dir_all(&victim).map_err(|e| BackupError::file(&victim, e))?;
            drop(guard);
            self.root.remove_entry(id);
        } else {
            let parent_path = self.parent_backup_path(id);
            let guard = Writable::new(&parent_path)?;
            let victim = self.root.backup_path(id);
            debug!("removing {}", victim.display());
            if let Err(e) = fs::remove_file(&victim) {
                if force {
                    warn!("could not remove file: {e}");
                } else {
                    return Err(BackupError::Failed(format!("could not remove file: {e}")));
                }
            }
            drop(guard);
            self.root.remove_entry(id);
        }
        self.write_file_list()
    }

    /// Remove the entire snapshot.
    pub fn purge(&mut self) -> Result<()> {
        let _lock = TargetLock::acquire(&self.backup.target_path)?;
        fs::set_permissions(
            &self.current_backup_path,
            fs::Permissions::from_mode(0o700),
        )
        .map_err(|e| BackupError::file(&self.current_backup_path, e))?;
        // sub-directories need to be writable for the removal
        for (dir, _, _) in self.root.walk(self.root.root()) {
            if dir == self.root.root() {
                continue;
            }
            let node = self.root.node(dir);
            let dir_path = self.root.backup_path(dir);
            node.stat.apply_chmod(&dir_path, node.stat.mode | 0o200)?;
        }
        debug!("removing tree {}", self.current_backup_path.display());
        fs::remove_dir_all(&self.current_backup_path)
            .map_err(|e| BackupError::file(&self.current_backup_path, e))
    }

    /// Rewrite this snapshot's manifest in place.
    fn write_file_list(&self) -> Result<()> {
        let _writable = Writable::new(&self.current_backup_path)?;
        self.root.save(&self.current_backup_path.join(FILE_LIST_NAME))
    }

    fn parent_backup_path(&self, id: NodeId) -> PathBuf {
        match self.root.node(id).parent {
            Some(parent) => self.root.backup_path(parent),
            None => self.current_backup_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_guard_restores_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealed");
        fs::create_dir(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o550)).unwrap();

        {
            let _guard = Writable::new(&path).unwrap();
            let mode = fs::symlink_metadata(&path).unwrap().mode();
            assert_ne!(mode & 0o200, 0);
        }
        let mode = fs::symlink_metadata(&path).unwrap().mode();
        assert_eq!(mode & 0o777, 0o550);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).unwrap();
    }
}
