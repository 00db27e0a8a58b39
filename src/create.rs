//! # Snapshot Engine
//!
//! Creates a new snapshot: scan the sources, compare against the previous
//! snapshot's manifest, then materialize every entry below a directory
//! named `YYYY-MM-DD_HHMMSS_incomplete` — unchanged files as hard links
//! into the previous snapshot, changed files as streamed copies hashed on
//! the way. The directory loses its `_incomplete` suffix only after every
//! entry is in place, the manifest is written and the tree is sealed
//! read-only, so a crash can never leave a half-built snapshot that later
//! runs would treat as complete.

use crate::backup::{Backup, INCOMPLETE_SUFFIX};
use crate::display::nice_bytes;
use crate::error::{BackupError, Result};
use crate::escape::escaped;
use crate::filelist::{compare_trees, FileList, NodeId, FILE_LIST_NAME};
use crate::indexer::Indexer;
use crate::lock::TargetLock;
use crate::timespec::NAME_FORMAT;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info};
use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

/// Options of the `create` action.
#[derive(Debug, Default, Clone, Copy)]
pub struct CreateOptions {
    /// Make a snapshot even when nothing changed.
    pub force: bool,
    /// Do not use the previous snapshot; copy everything.
    pub full: bool,
    /// Only scan and report; touch nothing.
    pub dry_run: bool,
    /// Wait for confirmation after scanning.
    pub confirm: bool,
}

/// State of one snapshot creation run.
pub struct Create {
    pub backup: Backup,
    /// Freshly scanned source tree, mutated into the new snapshot's manifest.
    pub source_root: FileList,
    /// Manifest of the reference snapshot, when one exists.
    pub backup_root: FileList,
    indexer: Indexer,
    bytes_required: u64,
    files_changed: u64,
}

impl Create {
    pub fn new(backup: Backup) -> Result<Create> {
        let indexer = Indexer::from_settings(&backup.settings)?;
        let mut source_root = FileList::new();
        source_root.hash_kind = backup.settings.hash;
        Ok(Create {
            backup,
            source_root,
            backup_root: FileList::new(),
            indexer,
            bytes_required: 0,
            files_changed: 0,
        })
    }

    /// Run the backup. Returns the path of the finished snapshot, or `None`
    /// for a dry run.
    pub fn create(&mut self, opts: &CreateOptions) -> Result<Option<PathBuf>> {
        self.indexer.scan(&mut self.source_root)?;
        if !opts.full {
            if let Some(last) = self.backup.find_latest_backup()? {
                self.backup_root.load(&last.join(FILE_LIST_NAME))?;
                self.backup_root.root_dir = last.clone();
                self.source_root.reference = Some(last);
            }
        }
        self.scan_last_backup();
        if self.files_changed == 0 && !opts.force {
            return Err(BackupError::Failed(
                "no changes detected, no need to backup".into(),
            ));
        }
        info!(
            "need to copy {} in {} files",
            nice_bytes(self.bytes_required),
            self.files_changed
        );
        if opts.confirm {
            confirm_or_abort()?;
        }
        self.check_target()?;

        if opts.dry_run {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for id in self.source_root.flattened(self.source_root.root(), false) {
                let action = if self.source_root.node(id).changed {
                    "COPY"
                } else {
                    "LINK"
                };
                writeln!(out, "{} {}", action, self.source_root.listing_line(id))?;
            }
            return Ok(None);
        }

        let _lock = TargetLock::acquire(&self.backup.target_path)?;
        let start = Instant::now();
        let (base_name, current) = self.prepare_target()?;

        debug!("copying/linking files");
        let progress = copy_progress(self.bytes_required);
        let mut failed_entries = 0usize;
        for id in self.source_root.flattened(self.source_root.root(), false) {
            match self.create_entry(id) {
                Ok(bytes) => progress.inc(bytes),
                Err(e) => {
                    error!(
                        "error backing up {}: {e}",
                        escaped(&self.source_root.node(id).path.to_string_lossy())
                    );
                    failed_entries += 1;
                }
            }
        }
        progress.finish_and_clear();

        // secure directories (make them read-only too)
        debug!("making directories read-only");
        for id in self.source_root.flattened(self.source_root.root(), false) {
            let node = self.source_root.node(id);
            if !node.is_dir() {
                continue;
            }
            if let Err(e) = node.stat.make_read_only(&self.source_root.backup_path(id)) {
                error!(
                    "error securing {}: {e}",
                    escaped(&node.path.to_string_lossy())
                );
                failed_entries += 1;
            }
        }

        self.source_root.save(&current.join(FILE_LIST_NAME))?;
        // make the snapshot itself read-only
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&current, fs::Permissions::from_mode(0o550))
            .map_err(|e| BackupError::file(&current, e))?;

        if failed_entries > 0 {
            return Err(BackupError::Failed(format!(
                "{failed_entries} entries failed, keeping {}",
                current.display()
            )));
        }
        // remove the '_incomplete' suffix
        fs::rename(&current, &base_name).map_err(|e| BackupError::file(&current, e))?;

        let elapsed = start.elapsed().as_secs_f64();
        info!(
            "copied {} in {:.1} seconds = {}/s",
            nice_bytes(self.bytes_required),
            elapsed,
            nice_bytes((self.bytes_required as f64 / elapsed.max(0.001)) as u64)
        );
        info!("created {}", base_name.display());
        Ok(Some(base_name))
    }

    /// Mark files unchanged when the previous snapshot has an equal entry,
    /// inheriting its digest, then count the work left to do.
    fn scan_last_backup(&mut self) {
        if self.source_root.reference.is_some() {
            debug!("checking for changes");
            let unchanged: Vec<(NodeId, NodeId)> = compare_trees(&self.source_root, &self.backup_root)
                .into_iter()
                .flat_map(|record| record.files.same)
                .collect();
            for (ours, theirs) in unchanged {
                let hash = self.backup_root.node(theirs).hash.clone();
                let node = self.source_root.node_mut(ours);
                node.changed = false;
                node.hash = hash;
            }
        } else {
            info!("no previous backup, create full copy of all items");
        }
        self.bytes_required = 0;
        self.files_changed = 0;
        for id in self.source_root.flattened(self.source_root.root(), false) {
            let node = self.source_root.node(id);
            if !node.is_dir() && node.changed {
                self.bytes_required += node.stat.size;
                self.files_changed += 1;
            }
        }
    }

    /// Verify that the target filesystem can hold the snapshot.
    fn check_target(&self) -> Result<()> {
        if !self.backup.target_path.exists() {
            fs::create_dir_all(&self.backup.target_path)
                .map_err(|e| BackupError::file(&self.backup.target_path, e))?;
        }
        let (bytes_free, files_free) = filesystem_stats(&self.backup.target_path)?;
        if bytes_free < self.bytes_required {
            return Err(BackupError::Capacity(format!(
                "not enough free space, {} available but {} required",
                nice_bytes(bytes_free),
                nice_bytes(self.bytes_required)
            )));
        }
        let entries = self.source_root.flattened(self.source_root.root(), false).len() as u64;
        if files_free < entries {
            return Err(BackupError::Capacity(
                "target file system will not allow to create that many files and directories"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Create the `_incomplete` snapshot directory and point the manifest
    /// at it.
    fn prepare_target(&mut self) -> Result<(PathBuf, PathBuf)> {
        let name = chrono::Local::now().format(NAME_FORMAT).to_string();
        let base_name = self.backup.target_path.join(&name);
        let current = self
            .backup
            .target_path
            .join(format!("{name}{INCOMPLETE_SUFFIX}"));
        debug!("creating backup in {}", current.display());
        fs::create_dir(&current).map_err(|e| BackupError::file(&current, e))?;
        self.source_root.root_dir = current.clone();
        Ok((base_name, current))
    }

    /// Materialize one entry; returns the number of copied bytes for the
    /// progress display.
    fn create_entry(&mut self, id: NodeId) -> Result<u64> {
        let backup_path = self.source_root.backup_path(id);
        let node = self.source_root.node(id);
        let stat = node.stat.clone();
        let path = node.path.clone();

        if node.is_dir() {
            debug!("new directory {}", escaped(&path.to_string_lossy()));
            fs::create_dir_all(&backup_path).map_err(|e| BackupError::file(&backup_path, e))?;
            if let Err(e) = filetime::set_file_times(
                &backup_path,
                stat.atime.to_filetime(),
                stat.mtime.to_filetime(),
            ) {
                error!("error setting stats on {}: {e}", backup_path.display());
            }
            // stays writable for now, files are still being added
            return Ok(0);
        }

        if node.changed {
            debug!("copying {}", escaped(&path.to_string_lossy()));
            let digest = self.source_root.copy_with_hash(&path, &backup_path)?;
            self.source_root.node_mut(id).hash = digest;
            if let Err(e) = filetime::set_symlink_file_times(
                &backup_path,
                stat.atime.to_filetime(),
                stat.mtime.to_filetime(),
            ) {
                error!("error setting stats on {}: {e}", backup_path.display());
            }
            if let Err(e) = stat.make_read_only(&backup_path) {
                error!("error setting stats on {}: {e}", backup_path.display());
            }
            Ok(stat.size)
        } else {
            debug!("hard linking {}", escaped(&path.to_string_lossy()));
            let reference = self.source_root.reference_path(id).ok_or_else(|| {
                BackupError::Failed("unchanged file without a reference snapshot".into())
            })?;
            fs::hard_link(&reference, &backup_path)
                .map_err(|e| BackupError::file(&backup_path, e))?;
            if let Err(e) = stat.make_read_only(&backup_path) {
                error!("error setting stats on {}: {e}", backup_path.display());
            }
            Ok(0)
        }
    }
}

fn confirm_or_abort() -> Result<()> {
    eprint!("type ENTER to execute ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(BackupError::Io)?;
    Ok(())
}

/// Free bytes and free inodes of the filesystem holding `path`.
fn filesystem_stats(path: &std::path::Path) -> Result<(u64, u64)> {
    use anyhow::Context;
    use std::os::unix::ffi::OsStrExt;
    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("bad target path: {path:?}"))?;
    let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) };
    if rc != 0 {
        return Err(anyhow::Error::new(std::io::Error::last_os_error())
            .context(format!("statvfs {path:?}"))
            .into());
    }
    Ok((
        stats.f_bsize as u64 * stats.f_bavail as u64,
        stats.f_favail as u64,
    ))
}

fn copy_progress(total_bytes: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_bytes);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} copying [{bar:30.cyan/dim}] {bytes}/{total_bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─"),
    );
    pb
}
