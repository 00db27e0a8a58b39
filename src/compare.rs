//! # Comparing Backups and Sources
//!
//! Three operations share the manifest tree-diff: `changes` (one snapshot
//! against another, or against the live sources), `integrity` (a snapshot's
//! files against its own manifest) and `verify` (the live sources, fully
//! hashed, against a snapshot's manifest).

use crate::backup::Backup;
use crate::error::{BackupError, Result};
use crate::escape::escaped;
use crate::filelist::{compare_trees, CompareRecord, FileList, NodeId};
use crate::indexer::Indexer;
use crate::restore::Restore;
use log::{debug, error};
use std::io::Write;

/// Print one line per entry of a comparison: a status letter (`M`odified,
/// `A`dded, `R`emoved, blank for unchanged) and the path, or the full
/// listing in long format. Entries are sorted by path within each
/// directory record.
pub fn print_changes(
    ours: &FileList,
    theirs: &FileList,
    records: &[CompareRecord],
    long_format: bool,
    show_all: bool,
    out: &mut dyn Write,
) -> Result<()> {
    for record in records {
        // (side, id, status); side false = ours, true = theirs
        let mut entries: Vec<(bool, NodeId, char)> = Vec::new();
        if show_all {
            entries.extend(record.files.same.iter().map(|&(id, _)| (false, id, ' ')));
        }
        entries.extend(record.files.changed.iter().map(|&(id, _)| (false, id, 'M')));
        entries.extend(record.files.added.iter().map(|&id| (false, id, 'A')));
        entries.extend(record.files.removed.iter().map(|&id| (true, id, 'R')));
        if show_all {
            entries.extend(record.dirs.same.iter().map(|&(id, _)| (false, id, ' ')));
        }
        entries.extend(record.dirs.added.iter().map(|&id| (false, id, 'A')));
        entries.extend(record.dirs.removed.iter().map(|&id| (true, id, 'R')));

        let list_of = |side: bool| if side { theirs } else { ours };
        entries.sort_by(|a, b| {
            let pa = &list_of(a.0).node(a.1).path;
            let pb = &list_of(b.0).node(b.1).path;
            pa.cmp(pb)
        });
        for (side, id, status) in entries {
            let list = list_of(side);
            if long_format {
                writeln!(out, "{} {}", status, list.listing_line(id))?;
            } else {
                writeln!(out, "{} {}", status, list.node(id).path.display())?;
            }
        }
    }
    Ok(())
}

/// Compare a snapshot with another one, or with the live sources when
/// `timespec2` is the literal `now`.
pub fn changes(
    backup: Backup,
    timespec: Option<&str>,
    timespec2: &str,
    long_format: bool,
    show_all: bool,
    out: &mut dyn Write,
) -> Result<()> {
    if timespec2 == "now" {
        // "now" means: scan the sources instead of loading a second backup.
        // The scan is the newer side.
        let other = Restore::open(backup.clone(), timespec)?;
        let mut scan = FileList::new();
        scan.hash_kind = other.root.hash_kind;
        Indexer::from_settings(&backup.settings)?.scan(&mut scan)?;
        let records = compare_trees(&scan, &other.root);
        print_changes(&scan, &other.root, &records, long_format, show_all, out)
    } else {
        let ours = Restore::open(backup.clone(), timespec)?;
        let other = Restore::open(backup, Some(timespec2))?;
        if ours.current_backup_path == other.current_backup_path {
            return Err(BackupError::Failed(
                "both timespecs point to the same backup".into(),
            ));
        }
        let records = compare_trees(&ours.root, &other.root);
        print_changes(&ours.root, &other.root, &records, long_format, show_all, out)
    }
}

/// Check every entry of the loaded snapshot against the data on disk:
/// `OK`, `CORRUPTED` (digest mismatch) or `MISSING`. One line per file;
/// mismatches are the output, never an abort.
pub fn integrity(restore: &Restore, out: &mut dyn Write) -> Result<()> {
    let root = &restore.root;
    for (_, dirs, files) in root.walk(root.root()) {
        for dir in dirs {
            debug!("checking {}", escaped(&root.node(dir).path.to_string_lossy()));
            if !root.backup_path(dir).is_dir() {
                writeln!(
                    out,
                    "MISSING {}",
                    escaped(&root.node(dir).path.to_string_lossy())
                )?;
            }
        }
        for file in files {
            let node = root.node(file);
            debug!("checking {}", escaped(&node.path.to_string_lossy()));
            let backup_path = root.backup_path(file);
            // existence follows symlinks: a stored symlink whose target no
            // longer resolves counts as MISSING, not as a hashable entry
            let status = if backup_path.exists() {
                match root.verify_hash(file, &backup_path) {
                    Ok(true) => "OK",
                    Ok(false) => "CORRUPTED",
                    Err(e) => {
                        error!("cannot hash {}: {e}", backup_path.display());
                        "CORRUPTED"
                    }
                }
            } else {
                "MISSING"
            };
            writeln!(out, "{} {}", status, escaped(&node.path.to_string_lossy()))?;
        }
    }
    Ok(())
}

/// Scan the live sources with the snapshot's hash algorithm, hashing every
/// file, then diff against the loaded manifest. Reveals source-side
/// changes since the snapshot was taken.
pub fn verify(
    backup: Backup,
    timespec: Option<&str>,
    long_format: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let snapshot = Restore::open(backup.clone(), timespec)?;
    let mut scan = FileList::new();
    scan.hash_kind = snapshot.root.hash_kind;
    Indexer::from_settings(&backup.settings)?.scan(&mut scan)?;
    let file_ids: Vec<NodeId> = scan
        .flattened(scan.root(), false)
        .into_iter()
        .filter(|&id| !scan.node(id).is_dir())
        .collect();
    for id in file_ids {
        if let Err(e) = scan.update_hash_from_source(id) {
            error!("cannot hash source: {e}");
        }
    }
    let records = compare_trees(&scan, &snapshot.root);
    print_changes(&scan, &snapshot.root, &records, long_format, false, out)
}
