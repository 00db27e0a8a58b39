//! # Error Types
//!
//! Defines a structured error hierarchy for the backup engine using `thiserror`.
//! Each variant carries enough context for meaningful diagnostics without
//! exposing internal implementation details to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type encompassing all failure modes in the backup system.
#[derive(Error, Debug)]
pub enum BackupError {
    /// Bad configuration or profile (unknown hash name, missing target, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// A manifest or control file could not be parsed. Carries the location.
    #[error("{file}:{line}: {message}")]
    Parse {
        file: PathBuf,
        line: u32,
        message: String,
    },

    /// A snapshot or a path inside a snapshot was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target filesystem cannot hold the snapshot.
    #[error("insufficient capacity on target: {0}")]
    Capacity(String),

    /// Observed divergence between stored and actual data.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Another process holds the target lock.
    #[error("target is locked: {0}")]
    Locked(PathBuf),

    /// The user declined a confirmation prompt or interrupted the run.
    #[error("aborted on user request")]
    Aborted,

    /// An operation that must not continue after per-entry failures.
    #[error("{0}")]
    Failed(String),

    #[error("{path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackupError {
    /// Attach a path to a bare I/O error.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::File {
            path: path.into(),
            source,
        }
    }

    pub fn parse(file: impl Into<PathBuf>, line: u32, message: impl Into<String>) -> Self {
        BackupError::Parse {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
