//! One publish run, end to end.
//!
//! ```text
//! TreeWalker (N workers) ──WalkRecord──▶ ManifestAggregator
//!       │ fingerprint → gate → DedupUploader           │
//!       ▼                                              ▼
//!   content objects                        Manifest → Publisher (manifest, tag, head)
//! ```
//!
//! The manifest is only built once the walk has finished without error, so a
//! failed run never moves a branch pointer.

use std::sync::Arc;

use cachepub_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::compression::{CompressionGate, Compressor};
use crate::config::PublishConfig;
use crate::error::{PublishError, PublishResult};
use crate::fingerprint::ContentHash;
use crate::manifest::{ManifestAggregator, SerializedManifest};
use crate::object_key::ObjectKey;
use crate::publisher::{PointerMetadata, Publisher, TagWrite};
use crate::record::BootstrapInfo;
use crate::stats::PublishStats;
use crate::uploader::DedupUploader;
use crate::walker::TreeWalker;

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// SHA-256 of the serialized manifest
    pub manifest_hash: ContentHash,
    /// Where the manifest was stored
    pub manifest_key: ObjectKey,
    /// Entries in the manifest
    pub manifest_entries: usize,
    /// The bootstrap executable, if one was found
    pub bootstrap: Option<BootstrapInfo>,
    /// Run counters
    pub stats: PublishStats,
    /// Whether the version tag was written or already in place
    pub tag: TagWrite,
}

/// Summary printed by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Lower-case hex manifest hash
    pub manifest: String,
    /// Manifest key
    pub manifest_key: String,
    /// Manifest entry count
    pub entries: usize,
    /// Upper-case hex bootstrap hash, empty when absent
    pub bootstrap_object: String,
    /// Stored bootstrap size, 0 when absent
    pub bootstrap_size: u64,
    /// Whether the tag was written
    pub tag_written: bool,
    /// Run counters
    pub stats: PublishStats,
}

impl From<&PublishReport> for ReportSummary {
    fn from(report: &PublishReport) -> Self {
        Self {
            manifest: report.manifest_hash.to_hex(),
            manifest_key: report.manifest_key.to_string(),
            entries: report.manifest_entries,
            bootstrap_object: report
                .bootstrap
                .map(|b| b.primary_hash.to_hex_upper())
                .unwrap_or_default(),
            bootstrap_size: report.bootstrap.map(|b| b.stored_size).unwrap_or(0),
            tag_written: report.tag == TagWrite::Written,
            stats: report.stats.clone(),
        }
    }
}

/// A configured publish run against one store.
pub struct PublishPipeline {
    config: PublishConfig,
    store: Arc<dyn ObjectStore>,
    compressor: Arc<dyn Compressor>,
}

impl PublishPipeline {
    /// Pipeline compressing with `config.codec`.
    pub fn new(config: PublishConfig, store: Arc<dyn ObjectStore>) -> PublishResult<Self> {
        config.validate()?;
        let compressor = config.codec.build();
        Ok(Self {
            config,
            store,
            compressor,
        })
    }

    /// Use a specific compressor instead of the configured codec.
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = compressor;
        self
    }

    /// The run's configuration.
    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// Walk, upload, build the manifest and publish the branch pointers.
    #[instrument(skip_all, fields(
        source = %self.config.source.display(),
        cache = %self.config.cache_name,
        branch = %self.config.branch_name,
        version = %self.config.branch_version,
    ))]
    pub async fn run(&self) -> PublishResult<PublishReport> {
        let source = &self.config.source;
        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| PublishError::io(source, e))?;
        if !meta.is_dir() {
            return Err(PublishError::Config(format!(
                "source {} is not a directory",
                source.display()
            )));
        }

        let gate = CompressionGate::new(self.config.compression_threshold, Arc::clone(&self.compressor));
        let uploader = Arc::new(DedupUploader::new(Arc::clone(&self.store), gate));
        let walker = TreeWalker::new(source, self.config.workers, uploader)
            .with_bootstrap(self.config.bootstrap_name());

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let (walked, aggregate) = tokio::join!(walker.walk(tx), ManifestAggregator::run(rx));
        walked?;

        let manifest = aggregate.manifest();
        let serialized = SerializedManifest::new(&manifest)?;
        let publisher = Publisher::new(Arc::clone(&self.store), self.config.target())
            .allow_retag(self.config.allow_retag);
        let manifest_key = publisher.upload_manifest(&serialized).await?;

        if aggregate.bootstrap.is_none() {
            if let Some(name) = self.config.bootstrap_name() {
                warn!(bootstrap = %name, "bootstrap executable not found, publishing without it");
            }
        }

        let pointer = PointerMetadata::new(publisher.target(), serialized.hash, aggregate.bootstrap);
        let tag = publisher.write_pointers(&pointer).await?;

        let stats = aggregate.stats;
        info!(
            manifest = %serialized.hash,
            entries = manifest.len(),
            files = stats.files,
            uploaded = stats.uploaded,
            bytes_uploaded = stats.bytes_uploaded,
            dedup_hits = stats.dedup_hits(),
            compressed = stats.compressed,
            "publish complete"
        );

        Ok(PublishReport {
            manifest_hash: serialized.hash,
            manifest_key,
            manifest_entries: manifest.len(),
            bootstrap: aggregate.bootstrap,
            stats,
            tag,
        })
    }
}

impl std::fmt::Debug for PublishPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishPipeline")
            .field("config", &self.config)
            .field("store", &self.store.describe())
            .field("suffix", &self.compressor.suffix())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::ZstdCompressor;
    use cachepub_store::MemoryObjectStore;

    fn pipeline(source: &std::path::Path, store: Arc<MemoryObjectStore>) -> PublishPipeline {
        let config = PublishConfig {
            source: source.to_path_buf(),
            branch_name: "test".into(),
            branch_version: "1".into(),
            workers: 4,
            ..Default::default()
        };
        PublishPipeline::new(config, store)
            .unwrap()
            .with_compressor(Arc::new(ZstdCompressor::new(3)))
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = PublishConfig {
            workers: 0,
            ..Default::default()
        };
        let err = PublishPipeline::new(config, Arc::new(MemoryObjectStore::new())).unwrap_err();
        assert!(matches!(err, PublishError::Config(_)));
    }

    #[tokio::test]
    async fn source_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let store = Arc::new(MemoryObjectStore::new());

        let err = pipeline(&file, store.clone()).run().await.unwrap_err();
        assert!(matches!(err, PublishError::Config(_)));
        let err = pipeline(&dir.path().join("missing"), store.clone()).run().await.unwrap_err();
        assert!(matches!(err, PublishError::Io { .. }));
        assert_eq!(store.object_count(), 0);
    }

    #[tokio::test]
    async fn empty_tree_publishes_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let report = pipeline(dir.path(), store.clone()).run().await.unwrap();

        assert_eq!(report.manifest_entries, 0);
        assert!(report.bootstrap.is_none());
        assert_eq!(report.tag, TagWrite::Written);
        let keys = store.keys();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&report.manifest_key.to_string()));
        assert!(keys.contains(&"heads/fivereborn/test".to_string()));
        assert!(keys.contains(&"tags/fivereborn/test/1".to_string()));
    }

    #[tokio::test]
    async fn summary_reflects_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CitizenFX.exe"), b"MZ").unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let report = pipeline(dir.path(), store).run().await.unwrap();

        let summary = ReportSummary::from(&report);
        assert_eq!(summary.manifest, report.manifest_hash.to_hex());
        assert_eq!(summary.bootstrap_object, ContentHash::of(b"MZ").to_hex_upper());
        assert_eq!(summary.bootstrap_size, 2);
        assert_eq!(summary.entries, 0);
        assert!(summary.tag_written);
    }
}
