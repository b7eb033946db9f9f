//! Common fixtures for publish integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cachepub_pipeline::{PublishConfig, PublishPipeline, ZstdCompressor};
use cachepub_store::MemoryObjectStore;
use tempfile::TempDir;

/// A source tree on disk
pub struct SourceTree {
    dir: TempDir,
}

impl SourceTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `data` at the `/`-separated relative path `rel`, creating parents
    pub fn file(&self, rel: &str, data: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(&path, data).expect("write file");
        path
    }
}

/// Highly compressible bytes of the given length
pub fn compressible(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog\n"
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Config publishing `tree` as fivereborn/test@`version`
pub fn config(tree: &SourceTree, version: &str) -> PublishConfig {
    PublishConfig {
        source: tree.path().to_path_buf(),
        branch_name: "test".into(),
        branch_version: version.into(),
        workers: 8,
        queue_capacity: 16,
        ..Default::default()
    }
}

/// Pipeline over the memory store, compressing in-process
pub fn pipeline(config: PublishConfig, store: &Arc<MemoryObjectStore>) -> PublishPipeline {
    PublishPipeline::new(config, store.clone())
        .expect("valid config")
        .with_compressor(Arc::new(ZstdCompressor::new(3)))
}
