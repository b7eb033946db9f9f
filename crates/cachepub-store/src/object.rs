//! The object-store capability: stat, get and put of byte blobs by key.
//!
//! Keys are store-relative strings. Nothing in this workspace ever deletes a key.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Content type used for every blob the publisher writes.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// User metadata attached to an object. Ordered so signing and logging are stable.
pub type Metadata = BTreeMap<String, String>;

/// What a successful stat reports about a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Stored length in bytes.
    pub size: u64,
    /// Content type recorded by the store, if any.
    pub content_type: Option<String>,
    /// User metadata, keys lower-cased by most S3 implementations.
    pub metadata: Metadata,
}

impl ObjectInfo {
    /// Case-insensitive metadata lookup.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Source of an upload.
#[derive(Debug, Clone)]
pub enum PutBody {
    /// In-memory bytes (manifest, pointer objects).
    Bytes(Bytes),
    /// A file on local disk, streamed by backends that can.
    File(PathBuf),
}

impl PutBody {
    /// Materialize the body in memory.
    pub async fn read_all(&self) -> StoreResult<Bytes> {
        match self {
            PutBody::Bytes(b) => Ok(b.clone()),
            PutBody::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

impl From<Vec<u8>> for PutBody {
    fn from(v: Vec<u8>) -> Self {
        PutBody::Bytes(Bytes::from(v))
    }
}

impl From<&'static str> for PutBody {
    fn from(s: &'static str) -> Self {
        PutBody::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

/// Per-put options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Content type, sent as `Content-Type`.
    pub content_type: Option<String>,
    /// User metadata, sent as `x-amz-meta-*` headers.
    pub metadata: Metadata,
}

impl PutOptions {
    /// Options carrying `application/octet-stream`.
    pub fn octet_stream() -> Self {
        Self {
            content_type: Some(OCTET_STREAM.to_string()),
            metadata: Metadata::new(),
        }
    }

    /// Add one metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Trait for object store operations (S3, MinIO, in-memory).
///
/// Implementations must be safe for concurrent use: many workers probe and
/// upload distinct keys at the same time.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Probe a key. `Ok(None)` means the key is absent.
    async fn stat(&self, key: &str) -> StoreResult<Option<ObjectInfo>>;

    /// Fetch a whole object. Absent keys yield `StoreError::NotFound`.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Store `body` under `key`, overwriting any previous object.
    /// `size` is the exact declared length of the body.
    async fn put(&self, key: &str, body: PutBody, size: u64, options: PutOptions)
        -> StoreResult<()>;

    /// Human-readable location, used in log lines.
    fn describe(&self) -> String;
}
