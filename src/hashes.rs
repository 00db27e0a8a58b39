//! # Content Hashing
//!
//! Streaming hash providers behind a common interface. The manifest records
//! one digest per file; which algorithm produced it is named by a `hash`
//! directive so that later verification uses the same provider.
//!
//! `NONE` is a valid choice: it skips hashing entirely and records `-`,
//! trading integrity checking for speed on slow media.

use crate::error::{BackupError, Result};
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};

/// Supported hash algorithms, selected by case-insensitive name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    None,
    Crc32,
    Md5,
    Sha256,
    Sha512,
}

impl HashKind {
    /// Look up an algorithm by its manifest name.
    pub fn by_name(name: &str) -> Result<Self> {
        match name.to_uppercase().as_str() {
            "NONE" => Ok(HashKind::None),
            "CRC32" => Ok(HashKind::Crc32),
            "MD5" => Ok(HashKind::Md5),
            "SHA-256" => Ok(HashKind::Sha256),
            "SHA-512" => Ok(HashKind::Sha512),
            _ => Err(BackupError::Config(format!("unknown hash: {name:?}"))),
        }
    }

    /// The canonical name as written to the manifest.
    pub fn name(&self) -> &'static str {
        match self {
            HashKind::None => "NONE",
            HashKind::Crc32 => "CRC32",
            HashKind::Md5 => "MD5",
            HashKind::Sha256 => "SHA-256",
            HashKind::Sha512 => "SHA-512",
        }
    }

    /// Create a fresh hasher for one stream of data.
    pub fn hasher(&self) -> Box<dyn Hasher> {
        match self {
            HashKind::None => Box::new(NoHash),
            HashKind::Crc32 => Box::new(Crc32Hasher::default()),
            HashKind::Md5 => Box::new(DigestHasher(Md5::new())),
            HashKind::Sha256 => Box::new(DigestHasher(Sha256::new())),
            HashKind::Sha512 => Box::new(DigestHasher(Sha512::new())),
        }
    }
}

impl std::fmt::Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Incremental hashing over a byte stream.
pub trait Hasher {
    fn update(&mut self, data: &[u8]);

    /// Finish and return the lowercase hex digest (`-` for `NONE`).
    fn hexdigest(self: Box<Self>) -> String;
}

/// The `NONE` provider: accepts data, records nothing.
struct NoHash;

impl Hasher for NoHash {
    fn update(&mut self, _data: &[u8]) {}

    fn hexdigest(self: Box<Self>) -> String {
        "-".to_string()
    }
}

/// zlib-compatible CRC32, seeded at 0, eight lowercase hex digits.
#[derive(Default)]
struct Crc32Hasher(crc32fast::Hasher);

impl Hasher for Crc32Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn hexdigest(self: Box<Self>) -> String {
        format!("{:08x}", self.0.finalize())
    }
}

/// Adapter for the RustCrypto `Digest` implementations.
struct DigestHasher<D: Digest>(D);

impl<D: Digest> Hasher for DigestHasher<D> {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn hexdigest(self: Box<Self>) -> String {
        let digest = self.0.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}
