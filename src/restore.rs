//! # Restore and Inspection
//!
//! Read-only operations against an existing snapshot: listing the catalog,
//! resolving a snapshot by time specification, listing its contents and
//! copying data back out of it.

use crate::backup::Backup;
use crate::error::{BackupError, Result};
use crate::filelist::{FileList, NodeId, FILE_LIST_NAME};
use crate::timespec;
use log::{error, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A snapshot opened for reading: the backup description plus the loaded
/// manifest.
pub struct Restore {
    pub backup: Backup,
    /// Manifest of the selected snapshot.
    pub root: FileList,
    /// Directory of the selected snapshot.
    pub current_backup_path: PathBuf,
    /// Name of the selected snapshot.
    pub name: String,
}

impl Restore {
    /// Select a snapshot by timespec (default: the latest) and load its
    /// manifest.
    pub fn open(backup: Backup, timespec: Option<&str>) -> Result<Restore> {
        let backups = backup.find_backups()?;
        let name = timespec::select(&backups, timespec)?.to_string();
        let current_backup_path = backup.target_path.join(&name);
        info!("active backup: {name}");
        let mut root = FileList::new();
        root.load(&current_backup_path.join(FILE_LIST_NAME))?;
        root.root_dir = current_backup_path.clone();
        Ok(Restore {
            backup,
            root,
            current_backup_path,
            name,
        })
    }

    /// Copy a file or directory out of the snapshot. Directories require
    /// the recursive flag. When the destination is an existing directory,
    /// the source's base name is appended.
    pub fn cp(&self, source: &Path, destination: &Path, recursive: bool) -> Result<()> {
        let id = self.root.lookup(source)?;
        let destination = if destination.is_dir() {
            destination.join(&self.root.node(id).name)
        } else {
            destination.to_path_buf()
        };
        if self.root.node(id).is_dir() {
            if recursive {
                self.root.copy_out_dir(id, &destination, true, true)
            } else {
                Err(BackupError::Failed(format!(
                    "will not work on directories in non-recursive mode: {source:?}"
                )))
            }
        } else {
            self.root.copy_out(id, &destination, true)
        }
    }

    /// Stream the stored bytes of a file to `out` (binary).
    pub fn cat(&self, source: &Path, out: &mut dyn Write) -> Result<()> {
        let id = self.root.lookup(source)?;
        let backup_path = self.root.backup_path(id);
        let mut file =
            std::fs::File::open(&backup_path).map_err(|e| BackupError::file(&backup_path, e))?;
        std::io::copy(&mut file, out)?;
        Ok(())
    }

    /// Print one listing line per requested path; directories list their
    /// children, or their whole subtree when `recursive` is set. Unknown
    /// paths are reported but do not abort.
    pub fn ls(&self, paths: &[PathBuf], recursive: bool, out: &mut dyn Write) -> Result<()> {
        for path in paths {
            let id = match self.root.lookup(path) {
                Ok(id) => id,
                Err(e) => {
                    error!("{e}");
                    continue;
                }
            };
            if self.root.node(id).is_dir() {
                let entries: Vec<NodeId> = if recursive {
                    self.root.flattened(id, false)
                } else {
                    self.root.children(id)
                };
                for entry in entries {
                    writeln!(out, "{}", self.root.listing_line(entry))?;
                }
            } else {
                writeln!(out, "{}", self.root.listing_line(id))?;
            }
        }
        Ok(())
    }
}

/// Print all complete snapshot names, sorted; warn when incomplete
/// snapshots exist.
pub fn list_backups(backup: &Backup, out: &mut dyn Write) -> Result<()> {
    for name in backup.find_backups()? {
        writeln!(out, "{name}")?;
    }
    let bad_backups = backup.find_incomplete_backups()?;
    if !bad_backups.is_empty() {
        warn!("incomplete {} backup(s) detected", bad_backups.len());
    }
    Ok(())
}
