//! # File Lists
//!
//! The manifest of a snapshot: an in-memory tree of directories and files,
//! each entry carrying metadata and a content hash, plus the parser and
//! emitter for the on-disk `file_list` format.
//!
//! A file list references two on-disk locations:
//! - `root` — the snapshot directory this list describes (`backup_path` of
//!   an entry lives beneath it),
//! - `reference` — the previous snapshot, used as the hard-link source for
//!   unchanged files while a new snapshot is under construction.
//!
//! Entries are stored in an arena (`Vec<Node>` indexed by [`NodeId`]); a
//! child holds the index of its parent, never ownership. Directory children
//! live in a `BTreeMap`, so iteration is sorted by name and the pre-order
//! emission of the manifest is deterministic.

use crate::config::{Word, WordScanner};
use crate::display::{mode_chars, nice_bytes};
use crate::error::{BackupError, Result};
use crate::escape::{escaped, unescape};
use crate::hashes::HashKind;
use filetime::FileTime;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Block size for streaming copy and hash operations (256 KiB).
pub const BLOCK_SIZE: usize = 256 * 1024;

/// Digest placeholder for "not computed".
pub const NO_HASH: &str = "-";

/// Name of the manifest file inside each snapshot directory.
pub const FILE_LIST_NAME: &str = "file_list";

// ─── Timestamps ─────────────────────────────────────────────────────────────

/// An exact file timestamp: seconds since the epoch plus nanoseconds.
///
/// Stored and emitted as a decimal with nine fractional digits. Kept as an
/// integer pair rather than `f64` so that `parse(emit(t)) == t` holds
/// exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// Comparison tolerance: 1e-5 s (10 µs), as timestamps were floats once.
    const TOLERANCE_NS: i128 = 10_000;

    pub fn new(secs: i64, nanos: i64) -> Self {
        let extra = nanos.div_euclid(1_000_000_000);
        let nanos = nanos.rem_euclid(1_000_000_000) as u32;
        Timestamp {
            secs: secs + extra,
            nanos,
        }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    fn total_nanos(&self) -> i128 {
        self.secs as i128 * 1_000_000_000 + self.nanos as i128
    }

    /// True when the two timestamps are within the comparison tolerance.
    pub fn close_to(&self, other: &Timestamp) -> bool {
        (self.total_nanos() - other.total_nanos()).abs() <= Self::TOLERANCE_NS
    }

    pub fn to_filetime(self) -> FileTime {
        FileTime::from_unix_time(self.secs, self.nanos)
    }

    /// Parse `SECONDS[.FRACTION]` with up to nine fractional digits.
    pub fn parse(text: &str) -> Option<Timestamp> {
        let (negative, rest) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (sec_part, frac_part) = match rest.split_once('.') {
            Some((s, f)) => (s, f),
            None => (rest, ""),
        };
        if sec_part.is_empty() || frac_part.len() > 9 {
            return None;
        }
        if !sec_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let secs: i64 = sec_part.parse().ok()?;
        let mut nanos: u32 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().ok()?
        };
        nanos *= 10u32.pow(9 - frac_part.len() as u32);
        if negative {
            Some(Timestamp::new(-secs, -(nanos as i64)))
        } else {
            Some(Timestamp { secs, nanos })
        }
    }
}

impl std::fmt::Display for Timestamp {
    /// Nine fractional digits, the precision the manifest format fixes.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.total_nanos();
        let sign = if total < 0 { "-" } else { "" };
        let magnitude = total.unsigned_abs();
        write!(
            f,
            "{}{}.{:09}",
            sign,
            magnitude / 1_000_000_000,
            magnitude % 1_000_000_000
        )
    }
}

// ─── Metadata ───────────────────────────────────────────────────────────────

/// File metadata as stored in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// Size in bytes; always 0 for directories.
    pub size: u64,
    /// Full `st_mode` including the file-type bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    /// BSD file flags; `None` where the platform has none.
    pub flags: Option<u64>,
}

impl Stat {
    /// Capture metadata from an `lstat` result.
    pub fn extract(meta: &fs::Metadata) -> Stat {
        Stat {
            size: if meta.is_dir() { 0 } else { meta.len() },
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            atime: Timestamp::new(meta.atime(), meta.atime_nsec()),
            mtime: Timestamp::new(meta.mtime(), meta.mtime_nsec()),
            flags: file_flags(meta),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32
    }

    /// Apply times, owner, flags and mode bits to `path`.
    pub fn apply(&self, path: &Path) -> Result<()> {
        filetime::set_symlink_file_times(
            path,
            self.atime.to_filetime(),
            self.mtime.to_filetime(),
        )
        .map_err(|e| BackupError::file(path, e))?;
        std::os::unix::fs::lchown(path, Some(self.uid), Some(self.gid))
            .map_err(|e| BackupError::file(path, e))?;
        set_file_flags(path, self.flags);
        self.apply_mode(path, self.mode)
    }

    /// Apply only the mode bits (used when re-opening sealed directories).
    pub fn apply_chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.apply_mode(path, mode)
    }

    /// Clear the write bits. Symlinks are left alone; not every platform
    /// supports changing modes on the link itself.
    pub fn make_read_only(&self, path: &Path) -> Result<()> {
        if self.is_symlink() {
            return Ok(());
        }
        self.apply_mode(path, self.mode & !0o222)
    }

    fn apply_mode(&self, path: &Path, mode: u32) -> Result<()> {
        if self.is_symlink() {
            return Ok(());
        }
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| BackupError::file(path, e))
    }
}

#[cfg(target_os = "macos")]
fn file_flags(meta: &fs::Metadata) -> Option<u64> {
    use std::os::macos::fs::MetadataExt as _;
    Some(meta.st_flags() as u64)
}

#[cfg(not(target_os = "macos"))]
fn file_flags(_meta: &fs::Metadata) -> Option<u64> {
    None
}

#[cfg(target_os = "macos")]
fn set_file_flags(path: &Path, flags: Option<u64>) {
    use std::os::unix::ffi::OsStrExt;
    if let Some(flags) = flags {
        if let Ok(c_path) = std::ffi::CString::new(path.as_os_str().as_bytes()) {
            unsafe {
                libc::lchflags(c_path.as_ptr(), flags as libc::c_uint);
            }
        }
    }
}

#[cfg(not(target_os = "macos"))]
fn set_file_flags(_path: &Path, _flags: Option<u64>) {}

// ─── Entry tree ─────────────────────────────────────────────────────────────

/// Index of an entry in its [`FileList`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Kind-specific payload of an entry.
#[derive(Debug, Clone)]
pub enum Kind {
    Directory { children: BTreeMap<String, NodeId> },
    File,
}

/// One entry of the manifest tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Final path component.
    pub name: String,
    /// Non-owning link to the parent entry; `None` only for the root.
    pub parent: Option<NodeId>,
    /// Cached full path, equal to the concatenation of the ancestry names.
    pub path: PathBuf,
    pub stat: Stat,
    /// Hex digest of the contents, or `-` when not computed.
    pub hash: String,
    /// Set during snapshot construction: copy rather than hard-link.
    pub changed: bool,
    pub kind: Kind,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, Kind::Directory { .. })
    }
}

/// Join an absolute entry path beneath another root directory.
pub fn join_under(root: &Path, path: &Path) -> PathBuf {
    root.join(path.strip_prefix("/").unwrap_or(path))
}

/// A manifest: the entry tree plus the disk locations it refers to.
pub struct FileList {
    nodes: Vec<Node>,
    /// Snapshot directory this list describes (empty until chosen).
    pub root_dir: PathBuf,
    /// Previous snapshot used as hard-link source during creation.
    pub reference: Option<PathBuf>,
    /// Hash algorithm of the digests, when one was configured.
    pub hash_kind: Option<HashKind>,
}

impl Default for FileList {
    fn default() -> Self {
        Self::new()
    }
}

impl FileList {
    pub fn new() -> FileList {
        FileList {
            nodes: vec![Node {
                name: "/".to_string(),
                parent: None,
                path: PathBuf::from("/"),
                stat: Stat::default(),
                hash: NO_HASH.to_string(),
                changed: true,
                kind: Kind::Directory {
                    children: BTreeMap::new(),
                },
            }],
            root_dir: PathBuf::new(),
            reference: None,
            hash_kind: None,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Fresh hasher for this list's algorithm (`NONE` when unset).
    pub fn hasher(&self) -> Box<dyn crate::hashes::Hasher> {
        self.hash_kind.unwrap_or(HashKind::None).hasher()
    }

    /// Absolute path of an entry inside the snapshot directory.
    pub fn backup_path(&self, id: NodeId) -> PathBuf {
        join_under(&self.root_dir, &self.node(id).path)
    }

    /// Absolute path of an entry inside the reference snapshot.
    pub fn reference_path(&self, id: NodeId) -> Option<PathBuf> {
        self.reference
            .as_deref()
            .map(|reference| join_under(reference, &self.node(id).path))
    }

    fn insert(&mut self, parent: NodeId, name: &str, stat: Stat, kind: Kind) -> NodeId {
        let path = self.node(parent).path.join(name);
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_string(),
            parent: Some(parent),
            path,
            stat,
            hash: NO_HASH.to_string(),
            changed: true,
            kind,
        });
        if let Kind::Directory { children } = &mut self.node_mut(parent).kind {
            children.insert(name.to_string(), id);
        }
        id
    }

    /// Add a sub-directory beneath `parent`.
    pub fn add_dir(&mut self, parent: NodeId, name: &str, stat: Stat) -> NodeId {
        self.insert(
            parent,
            name,
            stat,
            Kind::Directory {
                children: BTreeMap::new(),
            },
        )
    }

    /// Add a file (or symlink) entry beneath `parent`.
    pub fn add_file(&mut self, parent: NodeId, name: &str, stat: Stat) -> NodeId {
        self.insert(parent, name, stat, Kind::File)
    }

    /// Child of a directory by name.
    pub fn child(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        match &self.node(dir).kind {
            Kind::Directory { children } => children.get(name).copied(),
            Kind::File => None,
        }
    }

    /// Look up an absolute path in the tree.
    pub fn lookup(&self, path: &Path) -> Result<NodeId> {
        let mut id = self.root();
        for component in path.components() {
            match component {
                std::path::Component::RootDir => id = self.root(),
                std::path::Component::CurDir => {}
                std::path::Component::Normal(name) => {
                    let name = name.to_string_lossy();
                    id = self.child(id, &name).ok_or_else(|| {
                        BackupError::NotFound(format!(
                            "no such file or directory: {}",
                            escaped(&path.to_string_lossy())
                        ))
                    })?;
                }
                _ => {
                    return Err(BackupError::NotFound(format!(
                        "no such file or directory: {}",
                        escaped(&path.to_string_lossy())
                    )))
                }
            }
        }
        Ok(id)
    }

    /// Children of a directory, sorted by name.
    pub fn children(&self, dir: NodeId) -> Vec<NodeId> {
        match &self.node(dir).kind {
            Kind::Directory { children } => children.values().copied().collect(),
            Kind::File => Vec::new(),
        }
    }

    /// Detach an entry from its parent directory.
    pub fn remove_entry(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).parent {
            let name = self.node(id).name.clone();
            if let Kind::Directory { children } = &mut self.node_mut(parent).kind {
                children.remove(&name);
            }
        }
    }

    /// All entries beneath `id` in depth-first pre-order.
    pub fn flattened(&self, id: NodeId, include_self: bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        if include_self {
            out.push(id);
        }
        self.collect_preorder(id, &mut out);
        out
    }

    fn collect_preorder(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for child in self.children(id) {
            out.push(child);
            if self.node(child).is_dir() {
                self.collect_preorder(child, out);
            }
        }
    }

    /// Per-directory records `(dir, sub-dirs, files)`, recursively.
    pub fn walk(&self, id: NodeId) -> Vec<(NodeId, Vec<NodeId>, Vec<NodeId>)> {
        let mut out = Vec::new();
        self.walk_into(id, &mut out);
        out
    }

    fn walk_into(&self, id: NodeId, out: &mut Vec<(NodeId, Vec<NodeId>, Vec<NodeId>)>) {
        let (dirs, files): (Vec<_>, Vec<_>) = self
            .children(id)
            .into_iter()
            .partition(|&c| self.node(c).is_dir());
        out.push((id, dirs.clone(), files));
        for dir in dirs {
            self.walk_into(dir, out);
        }
    }

    /// One line of `ls`-style output for an entry.
    pub fn listing_line(&self, id: NodeId) -> String {
        let node = self.node(id);
        let mtime = chrono::DateTime::from_timestamp(node.stat.mtime.secs(), 0)
            .unwrap_or_default()
            .with_timezone(&chrono::Local);
        format!(
            "{} {:4} {:4} {:>7} {} {}",
            mode_chars(node.stat.mode),
            node.stat.uid,
            node.stat.gid,
            nice_bytes(node.stat.size),
            mtime.format("%Y-%m-%d %H:%M:%S"),
            escaped(&node.path.to_string_lossy())
        )
    }

    // ─── Parsing and emission ───────────────────────────────────────────────

    /// Load a `file_list` file into this (fresh) manifest.
    pub fn load(&mut self, filename: &Path) -> Result<()> {
        debug!("loading file list {}", filename.display());
        let mut scanner = WordScanner::open(filename)?;
        while let Some(word) = scanner.next_word() {
            match word.text.as_str() {
                "hash" => {
                    let arg = scanner.next_arg(&word)?;
                    if self.hash_kind.is_some() {
                        warn!("hash directive found multiple times");
                    }
                    self.hash_kind = Some(
                        HashKind::by_name(&arg.text)
                            .map_err(|e| scanner.error(&arg, e.to_string()))?,
                    );
                }
                "p1" => self.parse_entry(&mut scanner, &word)?,
                other => {
                    return Err(scanner.error(&word, format!("unknown directive: {other:?}")));
                }
            }
        }
        Ok(())
    }

    fn parse_entry(&mut self, scanner: &mut WordScanner, directive: &Word) -> Result<()> {
        let mode = parse_number::<u32>(scanner, directive, "mode")?;
        let uid = parse_number::<u32>(scanner, directive, "uid")?;
        let gid = parse_number::<u32>(scanner, directive, "gid")?;
        let size = parse_number::<u64>(scanner, directive, "size")?;
        let atime = parse_timestamp(scanner, directive, "atime")?;
        let mtime = parse_timestamp(scanner, directive, "mtime")?;
        let flags_word = scanner.next_arg(directive)?;
        let flags = if flags_word.text == NO_HASH {
            None
        } else {
            Some(flags_word.text.parse::<u64>().map_err(|_| {
                scanner.error(&flags_word, format!("bad flags: {:?}", flags_word.text))
            })?)
        };
        let hash = scanner.next_arg(directive)?.text;
        let path_word = scanner.next_arg(directive)?;
        let full_path = PathBuf::from(unescape(&path_word.text));

        let name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                scanner.error(&path_word, format!("bad path: {:?}", path_word.text))
            })?;
        let parent_path = full_path.parent().unwrap_or(Path::new("/"));
        let parent = self.lookup(parent_path).map_err(|_| {
            scanner.error(
                &path_word,
                format!("parent not in list: {}", escaped(&parent_path.to_string_lossy())),
            )
        })?;
        if !self.node(parent).is_dir() {
            return Err(scanner.error(
                &path_word,
                format!("parent is not a directory: {}", escaped(&parent_path.to_string_lossy())),
            ));
        }

        let stat = Stat {
            size,
            mode,
            uid,
            gid,
            atime,
            mtime,
            flags,
        };
        let id = if stat.is_dir() {
            self.add_dir(parent, &name, stat)
        } else {
            self.add_file(parent, &name, stat)
        };
        self.node_mut(id).hash = hash;
        Ok(())
    }

    fn entry_line(&self, id: NodeId) -> String {
        let node = self.node(id);
        let stat = &node.stat;
        format!(
            "p1 {} {} {} {} {} {} {} {} {}\n",
            stat.mode,
            stat.uid,
            stat.gid,
            stat.size,
            stat.atime,
            stat.mtime,
            stat.flags
                .map(|f| f.to_string())
                .unwrap_or_else(|| NO_HASH.to_string()),
            node.hash,
            escaped(&node.path.to_string_lossy())
        )
    }

    /// Render the full manifest text (pre-order, root excluded).
    pub fn emit(&self) -> String {
        let mut out = String::new();
        if let Some(kind) = self.hash_kind {
            out.push_str(&format!("hash {kind}\n"));
        }
        for id in self.flattened(self.root(), false) {
            out.push_str(&self.entry_line(id));
        }
        out
    }

    /// Write a new version of the file list.
    ///
    /// If the file already exists, the new content goes to `<name>.new`
    /// first; the old list is removed and the new one renamed over it, so a
    /// crash leaves either the old or the new list, never a torn one.
    pub fn save(&self, filename: &Path) -> Result<()> {
        let (write_to, rename_over) = if filename.exists() {
            (filename.with_extension("new"), Some(filename))
        } else {
            (filename.to_path_buf(), None)
        };
        let mut file =
            fs::File::create(&write_to).map_err(|e| BackupError::file(&write_to, e))?;
        file.write_all(self.emit().as_bytes())
            .map_err(|e| BackupError::file(&write_to, e))?;
        drop(file);
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&write_to, fs::Permissions::from_mode(0o440))
            .map_err(|e| BackupError::file(&write_to, e))?;
        if let Some(old) = rename_over {
            fs::remove_file(old).map_err(|e| BackupError::file(old, e))?;
            fs::rename(&write_to, old).map_err(|e| BackupError::file(old, e))?;
        }
        Ok(())
    }

    // ─── Content operations ─────────────────────────────────────────────────

    /// Stream-copy `src` to `dst` while hashing; returns the hex digest.
    /// Symlinks are recreated, with the digest taken over the target string.
    pub(crate) fn copy_with_hash(&self, src: &Path, dst: &Path) -> Result<String> {
        let mut hasher = self.hasher();
        let meta = fs::symlink_metadata(src).map_err(|e| BackupError::file(src, e))?;
        if meta.file_type().is_symlink() {
            let target = fs::read_link(src).map_err(|e| BackupError::file(src, e))?;
            hasher.update(target.to_string_lossy().as_bytes());
            std::os::unix::fs::symlink(&target, dst).map_err(|e| BackupError::file(dst, e))?;
        } else {
            let mut reader = fs::File::open(src).map_err(|e| BackupError::file(src, e))?;
            let mut writer = fs::File::create(dst).map_err(|e| BackupError::file(dst, e))?;
            let mut block = vec![0u8; BLOCK_SIZE];
            loop {
                let n = reader.read(&mut block).map_err(|e| BackupError::file(src, e))?;
                if n == 0 {
                    break;
                }
                hasher.update(&block[..n]);
                writer
                    .write_all(&block[..n])
                    .map_err(|e| BackupError::file(dst, e))?;
            }
        }
        Ok(hasher.hexdigest())
    }

    /// Hash the contents of an arbitrary path with this list's algorithm.
    pub fn hash_of(&self, path: &Path) -> Result<String> {
        let mut hasher = self.hasher();
        let meta = fs::symlink_metadata(path).map_err(|e| BackupError::file(path, e))?;
        if meta.file_type().is_symlink() {
            let target = fs::read_link(path).map_err(|e| BackupError::file(path, e))?;
            hasher.update(target.to_string_lossy().as_bytes());
        } else {
            let mut reader = fs::File::open(path).map_err(|e| BackupError::file(path, e))?;
            let mut block = vec![0u8; BLOCK_SIZE];
            loop {
                let n = reader.read(&mut block).map_err(|e| BackupError::file(path, e))?;
                if n == 0 {
                    break;
                }
                hasher.update(&block[..n]);
            }
        }
        Ok(hasher.hexdigest())
    }

    /// Recompute an entry's digest from its live source path.
    pub fn update_hash_from_source(&mut self, id: NodeId) -> Result<()> {
        debug!(
            "calculating hash of {}",
            escaped(&self.node(id).path.to_string_lossy())
        );
        let digest = self.hash_of(&self.node(id).path.clone())?;
        self.node_mut(id).hash = digest;
        Ok(())
    }

    /// True when the stored digest matches the data found at `path`.
    pub fn verify_hash(&self, id: NodeId, path: &Path) -> Result<bool> {
        Ok(self.node(id).hash == self.hash_of(path)?)
    }

    /// Copy a file entry out of the snapshot to `dst`, restoring metadata
    /// when `permissions` is set. A digest mismatch is reported but does
    /// not fail the copy.
    pub fn copy_out(&self, id: NodeId, dst: &Path, permissions: bool) -> Result<()> {
        let node = self.node(id);
        debug!("copying {}", escaped(&node.path.to_string_lossy()));
        let digest = self.copy_with_hash(&self.backup_path(id), dst)?;
        if permissions {
            node.stat.apply(dst)?;
        }
        if node.hash != NO_HASH && node.hash != digest {
            log::error!(
                "WARNING: hash changed! File was copied successfully but does not \
                 match the stored hash: {} (expected: {} got: {})",
                escaped(&node.path.to_string_lossy()),
                node.hash,
                digest
            );
        }
        Ok(())
    }

    /// Copy a directory entry out of the snapshot. Children are copied
    /// first; the directory's own metadata is applied last so a read-only
    /// directory can still be populated.
    pub fn copy_out_dir(
        &self,
        id: NodeId,
        dst: &Path,
        permissions: bool,
        recursive: bool,
    ) -> Result<()> {
        debug!(
            "new directory {}",
            escaped(&self.node(id).path.to_string_lossy())
        );
        fs::create_dir_all(dst).map_err(|e| BackupError::file(dst, e))?;
        if recursive {
            for child in self.children(id) {
                let child_dst = dst.join(&self.node(child).name);
                if self.node(child).is_dir() {
                    self.copy_out_dir(child, &child_dst, permissions, true)?;
                } else {
                    self.copy_out(child, &child_dst, permissions)?;
                }
            }
        }
        if permissions {
            self.node(id).stat.apply(dst)?;
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(
    scanner: &mut WordScanner,
    directive: &Word,
    what: &str,
) -> Result<T> {
    let word = scanner.next_arg(directive)?;
    word.text
        .parse::<T>()
        .map_err(|_| scanner.error(&word, format!("bad {what}: {:?}", word.text)))
}

fn parse_timestamp(
    scanner: &mut WordScanner,
    directive: &Word,
    what: &str,
) -> Result<Timestamp> {
    let word = scanner.next_arg(directive)?;
    Timestamp::parse(&word.text)
        .ok_or_else(|| scanner.error(&word, format!("bad {what}: {:?}", word.text)))
}

// ─── Tree comparison ────────────────────────────────────────────────────────

/// Result lists of one directory-level comparison. `same` and `changed`
/// pair an entry of the first tree with its counterpart in the second;
/// `added` holds entries only in the first tree, `removed` entries only in
/// the second.
#[derive(Debug, Default)]
pub struct CompareLists {
    pub same: Vec<(NodeId, NodeId)>,
    pub changed: Vec<(NodeId, NodeId)>,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

/// Per-directory comparison record.
#[derive(Debug)]
pub struct CompareRecord {
    pub path: PathBuf,
    pub dirs: CompareLists,
    pub files: CompareLists,
}

/// File equality across two manifests: metadata must match, and digests
/// must match when both sides carry one under the same algorithm. Access
/// time is never compared.
fn files_equal(ours: &FileList, a: NodeId, theirs: &FileList, b: NodeId) -> bool {
    let x = ours.node(a);
    let y = theirs.node(b);
    let mut same_hash = true;
    if ours.hash_kind == theirs.hash_kind && x.hash != NO_HASH && y.hash != NO_HASH {
        same_hash = x.hash == y.hash;
    }
    same_hash
        && x.stat.uid == y.stat.uid
        && x.stat.gid == y.stat.gid
        && x.stat.mode == y.stat.mode
        && x.stat.size == y.stat.size
        && x.stat.mtime.close_to(&y.stat.mtime)
        && x.stat.flags == y.stat.flags
}

/// Compare two manifest trees, yielding one record per directory.
///
/// Recursion proceeds into directories present on both sides; directories
/// only present on one side are reported added/removed together with their
/// entire contents.
pub fn compare_trees(ours: &FileList, theirs: &FileList) -> Vec<CompareRecord> {
    let mut out = Vec::new();
    compare_dir(ours, ours.root(), theirs, theirs.root(), &mut out);
    out
}

fn compare_dir(
    ours: &FileList,
    our_dir: NodeId,
    theirs: &FileList,
    their_dir: NodeId,
    out: &mut Vec<CompareRecord>,
) {
    let mut dirs = CompareLists::default();
    let mut files = CompareLists::default();

    for child in ours.children(our_dir) {
        let name = ours.node(child).name.clone();
        match theirs.child(their_dir, &name) {
            Some(other) => {
                let both_dirs = ours.node(child).is_dir() && theirs.node(other).is_dir();
                if both_dirs {
                    // directories can not change, presence is enough
                    dirs.same.push((child, other));
                } else if !ours.node(child).is_dir() && !theirs.node(other).is_dir() {
                    if files_equal(ours, child, theirs, other) {
                        files.same.push((child, other));
                    } else {
                        files.changed.push((child, other));
                    }
                } else if ours.node(child).is_dir() {
                    dirs.added.push(child);
                    files.removed.push(other);
                } else {
                    files.added.push(child);
                    dirs.removed.push(other);
                }
            }
            None => {
                if ours.node(child).is_dir() {
                    dirs.added.push(child);
                } else {
                    files.added.push(child);
                }
            }
        }
    }
    for other in theirs.children(their_dir) {
        if ours.child(our_dir, &theirs.node(other).name).is_none() {
            if theirs.node(other).is_dir() {
                dirs.removed.push(other);
            } else {
                files.removed.push(other);
            }
        }
    }

    let recurse: Vec<(NodeId, NodeId)> = dirs.same.clone();
    let added_dirs = dirs.added.clone();
    let removed_dirs = dirs.removed.clone();
    out.push(CompareRecord {
        path: ours.node(our_dir).path.clone(),
        dirs,
        files,
    });

    // sub-directories are reported after their parents
    for (a, b) in recurse {
        compare_dir(ours, a, theirs, b, out);
    }
    // exhaustively report the contents of whole added/removed sub-trees
    for dir in removed_dirs {
        for (walked, w_dirs, w_files) in theirs.walk(dir) {
            out.push(CompareRecord {
                path: theirs.node(walked).path.clone(),
                dirs: CompareLists {
                    removed: w_dirs,
                    ..Default::default()
                },
                files: CompareLists {
                    removed: w_files,
                    ..Default::default()
                },
            });
        }
    }
    for dir in added_dirs {
        for (walked, w_dirs, w_files) in ours.walk(dir) {
            out.push(CompareRecord {
                path: ours.node(walked).path.clone(),
                dirs: CompareLists {
                    added: w_dirs,
                    ..Default::default()
                },
                files: CompareLists {
                    added: w_files,
                    ..Default::default()
                },
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_stat(size: u64, mtime_secs: i64) -> Stat {
        Stat {
            size,
            mode: libc::S_IFREG as u32 | 0o644,
            uid: 1000,
            gid: 1000,
            atime: Timestamp::new(mtime_secs, 0),
            mtime: Timestamp::new(mtime_secs, 123_456_789),
            flags: None,
        }
    }

    fn dir_stat() -> Stat {
        Stat {
            size: 0,
            mode: libc::S_IFDIR as u32 | 0o755,
            uid: 1000,
            gid: 1000,
            atime: Timestamp::new(1_600_000_000, 0),
            mtime: Timestamp::new(1_600_000_000, 0),
            flags: None,
        }
    }

    fn sample_list() -> FileList {
        let mut list = FileList::new();
        list.hash_kind = Some(HashKind::Sha256);
        let root = list.root();
        let home = list.add_dir(root, "home", dir_stat());
        let user = list.add_dir(home, "user", dir_stat());
        let docs = list.add_dir(user, "My Documents", dir_stat());
        let f1 = list.add_file(docs, "notes.txt", file_stat(11, 1_650_000_000));
        list.node_mut(f1).hash =
            "a591a6d40bf420404a011733cfb7b190d62c65bf0bcda32b57b277d9ad9f146e".into();
        list.add_file(user, "plain", file_stat(3, 1_650_000_100));
        list
    }

    #[test]
    fn paths_follow_ancestry() {
        let list = sample_list();
        let id = list
            .lookup(Path::new("/home/user/My Documents/notes.txt"))
            .unwrap();
        assert_eq!(
            list.node(id).path,
            PathBuf::from("/home/user/My Documents/notes.txt")
        );
        let mut walked = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            walked.push(list.node(c).name.clone());
            cursor = list.node(c).parent;
        }
        assert_eq!(walked, ["notes.txt", "My Documents", "user", "home", "/"]);
    }

    #[test]
    fn preorder_is_parents_first_sorted() {
        let list = sample_list();
        let paths: Vec<_> = list
            .flattened(list.root(), false)
            .into_iter()
            .map(|id| list.node(id).path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            paths,
            [
                "/home",
                "/home/user",
                "/home/user/My Documents",
                "/home/user/My Documents/notes.txt",
                "/home/user/plain",
            ]
        );
    }

    #[test]
    fn timestamp_parse_emit_round_trip() {
        for text in ["0.000000000", "1650000000.123456789", "3.100000000"] {
            let t = Timestamp::parse(text).unwrap();
            assert_eq!(t.to_string(), text);
        }
        // short fractions widen to nine digits
        assert_eq!(
            Timestamp::parse("12.5").unwrap().to_string(),
            "12.500000000"
        );
        assert_eq!(Timestamp::parse("7").unwrap().to_string(), "7.000000000");
        assert!(Timestamp::parse("1.0123456789").is_none());
        assert!(Timestamp::parse("abc").is_none());
    }

    #[test]
    fn timestamp_tolerance_is_ten_microseconds() {
        let a = Timestamp::new(100, 0);
        assert!(a.close_to(&Timestamp::new(100, 9_000)));
        assert!(a.close_to(&Timestamp::new(100, 10_000)));
        assert!(!a.close_to(&Timestamp::new(100, 11_000)));
        assert!(!a.close_to(&Timestamp::new(101, 0)));
    }

    #[test]
    fn timestamp_negative_values() {
        let t = Timestamp::new(-1, 500_000_000);
        assert_eq!(t.to_string(), "-0.500000000");
        assert_eq!(Timestamp::parse("-0.500000000").unwrap(), t);
    }

    #[test]
    fn manifest_round_trip() {
        let list = sample_list();
        let text = list.emit();
        assert!(text.starts_with("hash SHA-256\n"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file_list");
        std::fs::write(&path, &text).unwrap();

        let mut parsed = FileList::new();
        parsed.load(&path).unwrap();
        assert_eq!(parsed.hash_kind, Some(HashKind::Sha256));
        assert_eq!(parsed.len(), list.len());
        for (a, b) in list
            .flattened(list.root(), false)
            .into_iter()
            .zip(parsed.flattened(parsed.root(), false))
        {
            assert_eq!(list.node(a).path, parsed.node(b).path);
            assert_eq!(list.node(a).stat, parsed.node(b).stat);
            assert_eq!(list.node(a).hash, parsed.node(b).hash);
            assert_eq!(list.node(a).is_dir(), parsed.node(b).is_dir());
        }
        // and the text itself is stable
        assert_eq!(parsed.emit(), text);
    }

    #[test]
    fn escaped_spaces_survive_the_tokenizer() {
        let list = sample_list();
        let text = list.emit();
        assert!(text.contains("My\\ Documents"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file_list");
        std::fs::write(&path, &text).unwrap();
        let mut parsed = FileList::new();
        parsed.load(&path).unwrap();
        assert!(parsed
            .lookup(Path::new("/home/user/My Documents/notes.txt"))
            .is_ok());
    }

    #[test]
    fn empty_and_directive_only_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file_list");

        std::fs::write(&path, "").unwrap();
        let mut parsed = FileList::new();
        parsed.load(&path).unwrap();
        assert!(parsed.is_empty());

        std::fs::write(&path, "# nothing but a comment\nhash CRC32\n").unwrap();
        let mut parsed = FileList::new();
        parsed.load(&path).unwrap();
        assert!(parsed.is_empty());
        assert_eq!(parsed.hash_kind, Some(HashKind::Crc32));
    }

    #[test]
    fn parse_errors_carry_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file_list");

        // entry whose parent was never declared
        std::fs::write(
            &path,
            "hash NONE\np1 33188 0 0 1 0.0 0.0 - - /ghost/file\n",
        )
        .unwrap();
        let mut parsed = FileList::new();
        match parsed.load(&path) {
            Err(BackupError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }

        // malformed integer
        std::fs::write(&path, "p1 x 0 0 1 0.0 0.0 - - /file\n").unwrap();
        let mut parsed = FileList::new();
        assert!(matches!(
            parsed.load(&path),
            Err(BackupError::Parse { line: 1, .. })
        ));

        // unknown directive
        std::fs::write(&path, "p2 1 2 3\n").unwrap();
        let mut parsed = FileList::new();
        assert!(matches!(parsed.load(&path), Err(BackupError::Parse { .. })));
    }

    #[test]
    fn save_is_crash_safe_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file_list");
        let list = sample_list();
        list.save(&path).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        // saving over an existing list goes through the .new dance
        list.save(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
        assert!(!path.with_extension("new").exists());

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o222, 0, "file list must be read-only");
    }

    #[test]
    fn compare_classifies_entries() {
        let mut ours = FileList::new();
        let mut theirs = FileList::new();
        for list in [&mut ours, &mut theirs] {
            list.hash_kind = Some(HashKind::Sha256);
            let root = list.root();
            list.add_dir(root, "data", dir_stat());
        }
        let our_data = ours.lookup(Path::new("/data")).unwrap();
        let their_data = theirs.lookup(Path::new("/data")).unwrap();

        // same file on both sides
        ours.add_file(our_data, "same.txt", file_stat(5, 1_000_000));
        theirs.add_file(their_data, "same.txt", file_stat(5, 1_000_000));
        // changed file (size differs)
        ours.add_file(our_data, "grown.txt", file_stat(9, 1_000_000));
        theirs.add_file(their_data, "grown.txt", file_stat(5, 1_000_000));
        // only ours
        ours.add_file(our_data, "new.txt", file_stat(1, 1_000_000));
        // only theirs
        theirs.add_file(their_data, "gone.txt", file_stat(1, 1_000_000));

        let records = compare_trees(&ours, &theirs);
        let data = &records[1];
        assert_eq!(data.path, PathBuf::from("/data"));
        assert_eq!(data.files.same.len(), 1);
        assert_eq!(data.files.changed.len(), 1);
        assert_eq!(
            ours.node(data.files.added[0]).name,
            "new.txt".to_string()
        );
        assert_eq!(
            theirs.node(data.files.removed[0]).name,
            "gone.txt".to_string()
        );
    }

    #[test]
    fn compare_mtime_within_tolerance_is_same() {
        let mut ours = FileList::new();
        let mut theirs = FileList::new();
        let a = ours.root();
        let b = theirs.root();
        let mut stat = file_stat(5, 1_000_000);
        ours.add_file(a, "f", stat.clone());
        stat.mtime = Timestamp::new(1_000_000, 123_458_000); // +1.2 µs
        theirs.add_file(b, "f", stat);
        let records = compare_trees(&ours, &theirs);
        assert_eq!(records[0].files.same.len(), 1);
        assert!(records[0].files.changed.is_empty());
    }

    #[test]
    fn compare_reports_whole_removed_subtree() {
        let ours = FileList::new();
        let mut theirs = FileList::new();
        let root = theirs.root();
        let sub = theirs.add_dir(root, "old", dir_stat());
        theirs.add_file(sub, "a.txt", file_stat(1, 1));
        let deeper = theirs.add_dir(sub, "deep", dir_stat());
        theirs.add_file(deeper, "b.txt", file_stat(1, 1));

        let records = compare_trees(&ours, &theirs);
        assert_eq!(records[0].dirs.removed.len(), 1);
        let removed_files: usize = records.iter().map(|r| r.files.removed.len()).sum();
        let removed_dirs: usize = records.iter().map(|r| r.dirs.removed.len()).sum();
        assert_eq!(removed_files, 2);
        assert_eq!(removed_dirs, 2); // "old" and "old/deep"
    }

    #[test]
    fn digests_only_compared_under_same_algorithm() {
        let mut ours = FileList::new();
        let mut theirs = FileList::new();
        ours.hash_kind = Some(HashKind::Sha256);
        theirs.hash_kind = Some(HashKind::Md5);
        let a = ours.root();
        let b = theirs.root();
        let fa = ours.add_file(a, "f", file_stat(5, 1_000_000));
        let fb = theirs.add_file(b, "f", file_stat(5, 1_000_000));
        ours.node_mut(fa).hash = "aaaa".into();
        theirs.node_mut(fb).hash = "bbbb".into();
        // differing digests under differing algorithms are not comparable
        let records = compare_trees(&ours, &theirs);
        assert_eq!(records[0].files.same.len(), 1);
    }
}
