//! # Backup Target
//!
//! Common state shared by every action: the validated configuration and the
//! catalog of snapshots found beneath the target directory. Snapshot names
//! are `YYYY-MM-DD_HHMMSS`, so lexicographic order equals chronological
//! order; an `_incomplete` suffix marks a snapshot whose construction never
//! finished and which no read operation will touch.

use crate::config::Settings;
use crate::error::{BackupError, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Suffix of snapshot directories still under construction.
pub const INCOMPLETE_SUFFIX: &str = "_incomplete";

/// Common backup description: configuration plus target-directory catalog.
#[derive(Debug, Clone)]
pub struct Backup {
    pub settings: Settings,
    pub target_path: PathBuf,
}

impl Backup {
    /// Validate loaded settings; the target directive is mandatory.
    pub fn from_settings(settings: Settings) -> Result<Backup> {
        let target_path = settings
            .target
            .clone()
            .ok_or_else(|| BackupError::Config("configuration misses target directive".into()))?;
        Ok(Backup {
            settings,
            target_path,
        })
    }

    /// Load a control file and validate it.
    pub fn load(control: &Path) -> Result<Backup> {
        debug!("loading configuration {}", control.display());
        Backup::from_settings(Settings::load(control)?)
    }

    /// Names of all complete snapshots, sorted oldest first.
    pub fn find_backups(&self) -> Result<Vec<String>> {
        self.list_names(|name| is_snapshot_name(name))
    }

    /// Names of incomplete (crashed or in-progress) snapshots.
    pub fn find_incomplete_backups(&self) -> Result<Vec<String>> {
        self.list_names(|name| {
            name.strip_suffix(INCOMPLETE_SUFFIX)
                .is_some_and(is_snapshot_name)
        })
    }

    /// Locate the most recent complete snapshot, used as reference.
    pub fn find_latest_backup(&self) -> Result<Option<PathBuf>> {
        let backups = self.find_backups()?;
        match backups.last() {
            Some(name) => {
                let path = self.target_path.join(name);
                debug!("latest backup: {}", path.display());
                Ok(Some(path))
            }
            None => {
                info!("no previous backup found");
                Ok(None)
            }
        }
    }

    fn list_names(&self, matches: impl Fn(&str) -> bool) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&self.target_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(BackupError::file(&self.target_path, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::file(&self.target_path, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if matches(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// True for names shaped `YYYY-MM-DD_HHMMSS`.
pub fn is_snapshot_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() != 17 {
        return false;
    }
    bytes.iter().enumerate().all(|(i, &b)| match i {
        4 | 7 => b == b'-',
        10 => b == b'_',
        _ => b.is_ascii_digit(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backup_at(target: &Path) -> Backup {
        Backup {
            settings: Settings {
                target: Some(target.to_path_buf()),
                ..Default::default()
            },
            target_path: target.to_path_buf(),
        }
    }

    #[test]
    fn name_pattern() {
        assert!(is_snapshot_name("2012-04-01_165500"));
        assert!(!is_snapshot_name("2012-04-01_165500_incomplete"));
        assert!(!is_snapshot_name("2012-4-1_165500"));
        assert!(!is_snapshot_name("notes"));
        assert!(!is_snapshot_name("2012_04_01-165500"));
    }

    #[test]
    fn catalog_partitions_complete_and_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "2012-04-01_165500",
            "2012-03-01_120000",
            "2012-05-01_090000_incomplete",
            "unrelated",
        ] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        let backup = backup_at(dir.path());
        assert_eq!(
            backup.find_backups().unwrap(),
            ["2012-03-01_120000", "2012-04-01_165500"]
        );
        assert_eq!(
            backup.find_incomplete_backups().unwrap(),
            ["2012-05-01_090000_incomplete"]
        );
        assert_eq!(
            backup.find_latest_backup().unwrap(),
            Some(dir.path().join("2012-04-01_165500"))
        );
    }

    #[test]
    fn missing_target_directory_is_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let backup = backup_at(&dir.path().join("not-there"));
        assert!(backup.find_backups().unwrap().is_empty());
        assert_eq!(backup.find_latest_backup().unwrap(), None);
    }

    #[test]
    fn settings_without_target_are_rejected() {
        assert!(matches!(
            Backup::from_settings(Settings::default()),
            Err(BackupError::Config(_))
        ));
    }
}
