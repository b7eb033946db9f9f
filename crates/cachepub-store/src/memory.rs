//! In-memory object store, used by tests and by `--dry-run`.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{Metadata, ObjectInfo, ObjectStore, PutBody, PutOptions};

/// Statistics for the in-memory object store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStoreStats {
    /// Number of put operations.
    pub puts: u64,
    /// Number of get operations.
    pub gets: u64,
    /// Number of stat probes.
    pub stats: u64,
    /// Total bytes accepted by put.
    pub bytes_written: u64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    metadata: Metadata,
}

#[derive(Debug, Default)]
struct Faults {
    fail_stats: bool,
    fail_put_prefix: Option<String>,
}

/// Object store that keeps everything in a map.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    stats: Mutex<MemoryStoreStats>,
    faults: Mutex<Faults>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get statistics about store operations.
    pub fn stats(&self) -> MemoryStoreStats {
        self.stats.lock().clone()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Insert an object directly, bypassing stats. Used to seed prior-run state.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>, metadata: Metadata) {
        self.objects.lock().insert(
            key.into(),
            StoredObject {
                data: data.into(),
                content_type: None,
                metadata,
            },
        );
    }

    /// Make every subsequent stat fail with a 503.
    pub fn fail_stats(&self, fail: bool) {
        self.faults.lock().fail_stats = fail;
    }

    /// Make puts to keys starting with `prefix` fail with a 500.
    pub fn fail_puts_with_prefix(&self, prefix: impl Into<String>) {
        self.faults.lock().fail_put_prefix = Some(prefix.into());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn stat(&self, key: &str) -> StoreResult<Option<ObjectInfo>> {
        self.stats.lock().stats += 1;
        if self.faults.lock().fail_stats {
            return Err(StoreError::Status {
                method: "HEAD",
                key: key.to_string(),
                status: 503,
                message: "injected fault".into(),
            });
        }
        let info = self.objects.lock().get(key).map(|obj| ObjectInfo {
            size: obj.data.len() as u64,
            content_type: obj.content_type.clone(),
            metadata: obj.metadata.clone(),
        });
        debug!(key, found = info.is_some(), "memory stat");
        Ok(info)
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.stats.lock().gets += 1;
        self.objects
            .lock()
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        key: &str,
        body: PutBody,
        size: u64,
        options: PutOptions,
    ) -> StoreResult<()> {
        let injected = self
            .faults
            .lock()
            .fail_put_prefix
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix));
        if injected {
            return Err(StoreError::Status {
                method: "PUT",
                key: key.to_string(),
                status: 500,
                message: "injected fault".into(),
            });
        }

        let data = body.read_all().await?;
        if data.len() as u64 != size {
            return Err(StoreError::LengthMismatch {
                key: key.to_string(),
                declared: size,
                actual: data.len() as u64,
            });
        }

        {
            let mut stats = self.stats.lock();
            stats.puts += 1;
            stats.bytes_written = stats.bytes_written.saturating_add(size);
        }
        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: options.content_type,
                metadata: options.metadata,
            },
        );
        debug!(key, size, "memory put");
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_stat_and_get() {
        let store = MemoryObjectStore::new();
        let opts = PutOptions::octet_stream().with_meta("FileName", "a.txt");
        store.put("k", PutBody::from("hello"), 5, opts).await.unwrap();

        let info = store.stat("k").await.unwrap().unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.meta("filename"), Some("a.txt"));
        assert_eq!(&store.get("k").await.unwrap()[..], b"hello");

        let stats = store.stats();
        assert_eq!(stats.puts, 1);
        assert_eq!(stats.stats, 1);
        assert_eq!(stats.gets, 1);
        assert_eq!(stats.bytes_written, 5);
    }

    #[tokio::test]
    async fn missing_key() {
        let store = MemoryObjectStore::new();
        assert!(store.stat("nope").await.unwrap().is_none());
        assert!(store.get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn declared_size_must_match() {
        let store = MemoryObjectStore::new();
        let err = store
            .put("k", PutBody::from("hello"), 4, PutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LengthMismatch { declared: 4, actual: 5, .. }));
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn injected_faults() {
        let store = MemoryObjectStore::new();
        store.fail_stats(true);
        assert!(store.stat("k").await.is_err());
        store.fail_stats(false);
        assert!(store.stat("k").await.unwrap().is_none());

        store.fail_puts_with_prefix("heads/");
        assert!(store
            .put("heads/x", PutBody::from("v"), 1, PutOptions::default())
            .await
            .is_err());
        assert!(store
            .put("tags/x", PutBody::from("v"), 1, PutOptions::default())
            .await
            .is_ok());
        assert_eq!(store.keys(), vec!["tags/x".to_string()]);
    }
}
