//! Per-file records flowing from the walker to the manifest aggregator.

use serde::{Deserialize, Serialize};

use crate::fingerprint::{ContentHash, LegacyHash};
use crate::object_key::ObjectKey;

/// What the uploader did for a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadAction {
    /// Content was missing remotely and was uploaded
    Uploaded,
    /// Content was already present remotely (prior run)
    RemoteHit,
    /// Another file with the same content was handled earlier in this run
    RunHit,
}

/// One discovered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the source root, `/`-separated
    pub relative_path: String,
    /// Uncompressed length on disk
    pub original_size: u64,
    /// SHA-256 of the uncompressed content
    pub primary_hash: ContentHash,
    /// SHA-1 of the uncompressed content
    pub legacy_hash: Option<LegacyHash>,
    /// Length of the object stored under `key`
    pub stored_size: u64,
    /// Where the content lives in the store
    pub key: ObjectKey,
    /// Whether the stored object is compressed
    pub compressed: bool,
    /// Upload outcome
    pub action: UploadAction,
}

/// The launcher binary, tracked outside the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapInfo {
    /// SHA-256 of the executable
    pub primary_hash: ContentHash,
    /// Stored size of its object
    pub stored_size: u64,
}

impl From<&FileRecord> for BootstrapInfo {
    fn from(record: &FileRecord) -> Self {
        BootstrapInfo {
            primary_hash: record.primary_hash,
            stored_size: record.stored_size,
        }
    }
}

/// Item on the walker → aggregator queue.
#[derive(Debug, Clone)]
pub enum WalkRecord {
    /// A regular manifest entry
    File(FileRecord),
    /// The configured bootstrap executable
    Bootstrap(FileRecord),
}

impl WalkRecord {
    /// The underlying file record.
    pub fn record(&self) -> &FileRecord {
        match self {
            WalkRecord::File(r) | WalkRecord::Bootstrap(r) => r,
        }
    }
}
