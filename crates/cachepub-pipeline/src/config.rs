//! Publish run configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::compression::{CompressionCodec, DEFAULT_COMPRESSION_THRESHOLD};
use crate::error::{PublishError, PublishResult};
use crate::publisher::BranchTarget;
use crate::walker::DEFAULT_WORKERS;

/// Default capacity of the result queue between workers and the aggregator.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8192;

/// Everything one publish run needs besides the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Root of the tree to publish
    pub source: PathBuf,
    /// Cache (product) name
    pub cache_name: String,
    /// Branch name
    pub branch_name: String,
    /// Version being published
    pub branch_version: String,
    /// Relative path of the bootstrap executable; `None` disables bootstrap routing
    pub bootstrap_executable: Option<String>,
    /// Version string recorded for the bootstrap
    pub bootstrap_version: String,
    /// Files processed concurrently
    pub workers: usize,
    /// Result queue capacity
    pub queue_capacity: usize,
    /// Files strictly larger than this many bytes are compressed
    pub compression_threshold: u64,
    /// Compressor to use above the threshold
    pub codec: CompressionCodec,
    /// Allow repointing an existing version tag
    pub allow_retag: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            cache_name: "fivereborn".to_string(),
            branch_name: "dummy".to_string(),
            branch_version: "dummy".to_string(),
            bootstrap_executable: Some("CitizenFX.exe".to_string()),
            bootstrap_version: "10000000".to_string(),
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            codec: CompressionCodec::default(),
            allow_retag: false,
        }
    }
}

impl PublishConfig {
    /// Reject values a run cannot proceed with.
    pub fn validate(&self) -> PublishResult<()> {
        if self.workers == 0 {
            return Err(PublishError::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PublishError::Config("queue_capacity must be at least 1".into()));
        }
        for (field, value) in [
            ("cache_name", &self.cache_name),
            ("branch_name", &self.branch_name),
            ("branch_version", &self.branch_version),
        ] {
            if value.trim().is_empty() {
                return Err(PublishError::Config(format!("{field} must not be empty")));
            }
            if value.contains('/') {
                return Err(PublishError::Config(format!(
                    "{field} must not contain '/': {value}"
                )));
            }
        }
        if let CompressionCodec::Zstd { level } = self.codec {
            if !(1..=22).contains(&level) {
                return Err(PublishError::Config(format!(
                    "zstd level must be within 1..=22, got {level}"
                )));
            }
        }
        Ok(())
    }

    /// The branch this configuration publishes to.
    pub fn target(&self) -> BranchTarget {
        BranchTarget {
            cache_name: self.cache_name.clone(),
            branch_name: self.branch_name.clone(),
            branch_version: self.branch_version.clone(),
            bootstrap_version: self.bootstrap_version.clone(),
        }
    }

    /// Bootstrap name with `\` normalized to `/` so it matches relative paths.
    pub fn bootstrap_name(&self) -> Option<String> {
        self.bootstrap_executable
            .as_deref()
            .map(|name| name.replace('\\', "/").trim_start_matches("./").to_string())
            .filter(|name| !name.is_empty())
    }
}
