//! # Indexer
//!
//! Walks the configured include locations and builds the manifest tree for
//! a new snapshot. Exclusion patterns are shell globs matched against the
//! full path, traversal never follows symlinks and never leaves the device
//! of the include location, and unreadable entries are logged and skipped
//! rather than aborting the scan.

use crate::config::Settings;
use crate::error::{BackupError, Result};
use crate::filelist::{FileList, NodeId, Stat};
use log::{debug, error, warn};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Source scanner: include locations plus exclusion patterns.
pub struct Indexer {
    pub includes: Vec<PathBuf>,
    pub excludes: Vec<glob::Pattern>,
}

impl Indexer {
    /// Build an indexer from loaded settings, compiling the globs.
    pub fn from_settings(settings: &Settings) -> Result<Indexer> {
        let mut excludes = Vec::with_capacity(settings.excludes.len());
        for pattern in &settings.excludes {
            excludes.push(
                glob::Pattern::new(pattern).map_err(|e| {
                    BackupError::Config(format!("bad exclude pattern {pattern:?}: {e}"))
                })?,
            );
        }
        Ok(Indexer {
            includes: settings.includes.clone(),
            excludes,
        })
    }

    /// True unless some exclude pattern matches the full path.
    pub fn is_included(&self, path: &Path) -> bool {
        !self.excludes.iter().any(|p| p.matches_path(path))
    }

    /// Scan all include locations into `list`.
    pub fn scan(&self, list: &mut FileList) -> Result<()> {
        for location in &self.includes {
            self.scan_location(location, list)?;
        }
        Ok(())
    }

    fn scan_location(&self, location: &Path, list: &mut FileList) -> Result<()> {
        let meta = fs::metadata(location)
            .map_err(|e| BackupError::Config(format!("cannot stat location {location:?}: {e}")))?;
        if !meta.is_dir() {
            return Err(BackupError::Config(format!(
                "location is not a directory: {location:?}"
            )));
        }
        let device = meta.dev();
        self.materialize_ancestry(location, list)?;
        debug!("scanning {:?}", location);

        let walker = WalkDir::new(location)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| self.keep_entry(entry, device));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    error!("access failed, ignoring: {e}");
                    continue;
                }
            };
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    error!("access failed, ignoring: {:?} ({e})", entry.path());
                    continue;
                }
            };
            let Some((parent_path, name)) = split_parent(entry.path()) else {
                continue;
            };
            let Ok(parent_id) = list.lookup(&parent_path) else {
                // parent was skipped; skip the whole subtree with it
                continue;
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                list.add_dir(parent_id, &name, Stat::extract(&meta));
            } else if file_type.is_file() || file_type.is_symlink() {
                list.add_file(parent_id, &name, Stat::extract(&meta));
            }
            // character/block devices, FIFOs and sockets are ignored
        }
        Ok(())
    }

    /// Ensure directory entries exist for every path component from the
    /// root down to (and including) the location, each stat'ed from disk.
    fn materialize_ancestry(&self, location: &Path, list: &mut FileList) -> Result<NodeId> {
        let mut parent = list.root();
        let mut walked = PathBuf::from("/");
        for component in location.components() {
            let name = match component {
                Component::Normal(name) => name.to_string_lossy().into_owned(),
                _ => continue,
            };
            walked.push(&name);
            parent = match list.child(parent, &name) {
                Some(existing) => existing,
                None => {
                    let meta = fs::symlink_metadata(&walked)
                        .map_err(|e| BackupError::file(&walked, e))?;
                    list.add_dir(parent, &name, Stat::extract(&meta))
                }
            };
        }
        Ok(parent)
    }

    fn keep_entry(&self, entry: &walkdir::DirEntry, device: u64) -> bool {
        let path = entry.path();
        if !self.is_included(path) {
            debug!("excluded {:?}", path);
            return false;
        }
        match entry.metadata() {
            Ok(meta) => {
                if meta.dev() != device {
                    warn!("will not cross filesystems, ignoring: {:?}", path);
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                error!("access failed, ignoring: {:?} ({e})", path);
                false
            }
        }
    }
}

fn split_parent(path: &Path) -> Option<(PathBuf, String)> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let parent = path.parent()?.to_path_buf();
    Some((parent, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn indexer(includes: Vec<PathBuf>, excludes: &[&str]) -> Indexer {
        Indexer {
            includes,
            excludes: excludes
                .iter()
                .map(|p| glob::Pattern::new(p).unwrap())
                .collect(),
        }
    }

    fn touch(path: &Path, content: &[u8]) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(content).unwrap();
    }

    #[test]
    fn scan_builds_ancestry_and_contents() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        touch(&src.join("a.txt"), b"hello");
        fs::create_dir(src.join("sub")).unwrap();
        touch(&src.join("sub/b.txt"), b"world");

        let mut list = FileList::new();
        indexer(vec![src.clone()], &[]).scan(&mut list).unwrap();

        // ancestry from / down to the include location exists
        assert!(list.lookup(&src).is_ok());
        let a = list.lookup(&src.join("a.txt")).unwrap();
        assert!(!list.node(a).is_dir());
        assert_eq!(list.node(a).stat.size, 5);
        assert!(list.node(list.lookup(&src.join("sub")).unwrap()).is_dir());
        assert!(list.lookup(&src.join("sub/b.txt")).is_ok());
    }

    #[test]
    fn excludes_match_full_path_and_prune_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        touch(&src.join("keep.txt"), b"keep");
        touch(&src.join("skip.bak"), b"skip");
        fs::create_dir(src.join("cache")).unwrap();
        touch(&src.join("cache/deep.txt"), b"deep");

        let mut list = FileList::new();
        indexer(vec![src.clone()], &["*.bak", "*/cache"])
            .scan(&mut list)
            .unwrap();

        assert!(list.lookup(&src.join("keep.txt")).is_ok());
        assert!(list.lookup(&src.join("skip.bak")).is_err());
        assert!(list.lookup(&src.join("cache")).is_err());
        assert!(list.lookup(&src.join("cache/deep.txt")).is_err());
    }

    #[test]
    fn unmatched_siblings_survive_an_exclude() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        touch(&src.join("one.tmp"), b"1");
        touch(&src.join("two.txt"), b"2");

        let mut list = FileList::new();
        indexer(vec![src.clone()], &["*.tmp"]).scan(&mut list).unwrap();
        assert!(list.lookup(&src.join("one.tmp")).is_err());
        assert!(list.lookup(&src.join("two.txt")).is_ok());
    }

    #[test]
    fn symlinks_are_recorded_as_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        touch(&src.join("real.txt"), b"data");
        std::os::unix::fs::symlink("real.txt", src.join("link")).unwrap();

        let mut list = FileList::new();
        indexer(vec![src.clone()], &[]).scan(&mut list).unwrap();
        let link = list.lookup(&src.join("link")).unwrap();
        assert!(!list.node(link).is_dir());
        assert!(list.node(link).stat.is_symlink());
    }

    #[test]
    fn sockets_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        touch(&src.join("file.txt"), b"x");
        let _listener = std::os::unix::net::UnixListener::bind(src.join("sock")).unwrap();

        let mut list = FileList::new();
        indexer(vec![src.clone()], &[]).scan(&mut list).unwrap();
        assert!(list.lookup(&src.join("file.txt")).is_ok());
        assert!(list.lookup(&src.join("sock")).is_err());
    }

    #[test]
    fn non_directory_location_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        touch(&file, b"x");
        let mut list = FileList::new();
        assert!(matches!(
            indexer(vec![file], &[]).scan(&mut list),
            Err(BackupError::Config(_))
        ));
    }
}
