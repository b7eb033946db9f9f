//! Dedup-aware uploader: probe the store by content key, upload only on miss.
//!
//! Across runs the existence probe skips content a prior run already stored.
//! Within a run, an in-memory ledger keyed by object key makes every key's
//! probe/compress/upload happen once, however many files share the content
//! and however the workers interleave.

use std::path::Path;
use std::sync::Arc;

use cachepub_store::{ObjectStore, PutBody, PutOptions};
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::compression::CompressionGate;
use crate::error::{PublishError, PublishResult};
use crate::fingerprint::Fingerprint;
use crate::object_key::ObjectKey;
use crate::record::UploadAction;

/// Metadata key carrying the source path of an uploaded object.
pub const FILE_NAME_META: &str = "FileName";

/// Result of handling one file's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Content key
    pub key: ObjectKey,
    /// Size of the stored object
    pub stored_size: u64,
    /// Whether the stored object is compressed
    pub compressed: bool,
    /// What happened
    pub action: UploadAction,
}

#[derive(Debug, Clone, Copy)]
struct StoredObject {
    size: u64,
    uploaded: bool,
}

/// Uploads file content under content-derived keys, at most once per key.
pub struct DedupUploader {
    store: Arc<dyn ObjectStore>,
    gate: CompressionGate,
    ledger: DashMap<ObjectKey, Arc<OnceCell<StoredObject>>>,
}

impl DedupUploader {
    /// Create an uploader writing to `store`.
    pub fn new(store: Arc<dyn ObjectStore>, gate: CompressionGate) -> Self {
        Self {
            store,
            gate,
            ledger: DashMap::new(),
        }
    }

    /// The compression gate in use.
    pub fn gate(&self) -> &CompressionGate {
        &self.gate
    }

    /// Number of distinct keys handled so far.
    pub fn distinct_keys(&self) -> usize {
        self.ledger.len()
    }

    /// Make sure the content of `source` (fingerprinted as `fingerprint`) is
    /// stored, and report where and how large it is.
    pub async fn upload(
        &self,
        relative_path: &str,
        source: &Path,
        fingerprint: &Fingerprint,
    ) -> PublishResult<UploadOutcome> {
        let compressed = self.gate.should_compress(fingerprint.size);
        let key = ObjectKey::for_content(&fingerprint.primary, self.gate.key_suffix(fingerprint.size));
        let cell = self.ledger.entry(key.clone()).or_default().clone();

        let mut first = false;
        let stored = *cell
            .get_or_try_init(|| {
                first = true;
                self.probe_and_store(&key, relative_path, source, fingerprint.size)
            })
            .await?;

        let action = match (first, stored.uploaded) {
            (false, _) => UploadAction::RunHit,
            (true, true) => UploadAction::Uploaded,
            (true, false) => UploadAction::RemoteHit,
        };
        if action == UploadAction::RunHit {
            debug!(path = relative_path, key = %key, "content already handled this run");
        }

        Ok(UploadOutcome {
            key,
            stored_size: stored.size,
            compressed,
            action,
        })
    }

    async fn probe_and_store(
        &self,
        key: &ObjectKey,
        relative_path: &str,
        source: &Path,
        size: u64,
    ) -> PublishResult<StoredObject> {
        match self.store.stat(key.as_str()).await {
            Ok(Some(info)) => {
                debug!(path = relative_path, key = %key, remote_size = info.size, "already stored");
                return Ok(StoredObject {
                    size: info.size,
                    uploaded: false,
                });
            }
            Ok(None) => {}
            // A failed probe is treated as a miss: re-uploading identical
            // bytes is harmless, skipping an upload is not.
            Err(e) => warn!(key = %key, error = %e, "existence probe failed, uploading anyway"),
        }

        let (body, stored_size, _artifact) = if self.gate.should_compress(size) {
            let artifact = self.gate.compress(source).await?;
            let body = PutBody::File(artifact.path().to_path_buf());
            let stored_size = artifact.size();
            (body, stored_size, Some(artifact))
        } else {
            (PutBody::File(source.to_path_buf()), size, None)
        };

        let options = PutOptions::octet_stream().with_meta(FILE_NAME_META, relative_path);
        self.store
            .put(key.as_str(), body, stored_size, options)
            .await
            .map_err(|e| PublishError::store(key.as_str(), e))?;

        info!(path = relative_path, key = %key, size = stored_size, "uploaded");
        Ok(StoredObject {
            size: stored_size,
            uploaded: true,
        })
    }
}

impl std::fmt::Debug for DedupUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupUploader")
            .field("store", &self.store.describe())
            .field("gate", &self.gate)
            .field("distinct_keys", &self.ledger.len())
            .finish()
    }
}
