//! # link-to-the-past
//!
//! Incremental, snapshot-style backups that share unchanged data across
//! snapshots via hard links. Every snapshot is a plain directory tree,
//! directly browsable with standard tools, plus a `file_list` manifest
//! recording metadata and a content hash for every entry.
//!
//! ## How a backup run works
//!
//! 1. The configuration names a target directory, include locations,
//!    exclude globs and a hash algorithm.
//! 2. The [`indexer`] walks the sources into a manifest tree.
//! 3. The [`create`] engine compares the tree against the previous
//!    snapshot's manifest: unchanged files will be hard-linked, everything
//!    else copied while being hashed.
//! 4. Entries are materialized under `YYYY-MM-DD_HHMMSS_incomplete`, the
//!    manifest is written, the tree is sealed read-only, and only then is
//!    the `_incomplete` suffix dropped.
//!
//! Later, [`restore`] reads data back out, [`compare`] diffs snapshots
//! against each other or the live sources, and [`edit`] removes entries or
//! whole snapshots despite the seal.

pub mod backup;
pub mod compare;
pub mod config;
pub mod create;
pub mod display;
pub mod edit;
pub mod error;
pub mod escape;
pub mod filelist;
pub mod hashes;
pub mod indexer;
pub mod lock;
pub mod restore;
pub mod timespec;

pub use backup::Backup;
pub use create::{Create, CreateOptions};
pub use error::{BackupError, Result};
pub use restore::Restore;
