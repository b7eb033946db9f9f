use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cachepub_pipeline::{CompressionCodec, PublishConfig, PublishPipeline, ReportSummary};
use cachepub_store::{MemoryObjectStore, ObjectStore, S3Config, S3ObjectStore};
use clap::{Parser, ValueEnum};

use crate::config::FileConfig;

/// Compressor choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodecArg {
    /// External `xz` utility
    Xz,
    /// In-process Zstandard
    Zstd,
}

#[derive(Parser, Debug)]
#[command(name = "cachepub")]
#[command(about = "Publish a directory tree as a content-addressed update snapshot", long_about = None)]
pub struct Cli {
    /// TOML or JSON file providing defaults for every other option
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Source of the cache
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// S3 endpoint (host[:port])
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// S3 access key id
    #[arg(long, env = "CACHEPUB_S3_KEY_ID", hide_env_values = true)]
    pub s3_key_id: Option<String>,

    /// S3 secret key
    #[arg(long, env = "CACHEPUB_S3_KEY", hide_env_values = true)]
    pub s3_key: Option<String>,

    /// S3 bucket name
    #[arg(long)]
    pub s3_name: Option<String>,

    /// S3 signing region
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Talk plain HTTP to the endpoint
    #[arg(long)]
    pub insecure: bool,

    /// Cache name
    #[arg(long)]
    pub cache_name: Option<String>,

    /// Branch name
    #[arg(long)]
    pub branch_name: Option<String>,

    /// Branch version
    #[arg(long)]
    pub branch_version: Option<String>,

    /// Current bootstrap executable, relative to the source
    #[arg(long)]
    pub bootstrap_executable: Option<String>,

    /// Current bootstrap version
    #[arg(long)]
    pub bootstrap_version: Option<String>,

    /// Files processed concurrently
    #[arg(long)]
    pub workers: Option<usize>,

    /// Capacity of the result queue
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Files larger than this many bytes are compressed
    #[arg(long)]
    pub compression_threshold: Option<u64>,

    /// Compressor for large files
    #[arg(long, value_enum)]
    pub codec: Option<CodecArg>,

    /// Zstandard level, with --codec zstd
    #[arg(long, default_value = "19")]
    pub zstd_level: i32,

    /// Allow repointing an existing version tag at a different manifest
    #[arg(long)]
    pub allow_retag: bool,

    /// Publish into an in-memory store instead of S3
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Merge the config file (if any) with the flags; flags win.
    pub fn resolve(&self) -> Result<FileConfig> {
        let mut config = match &self.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        self.apply_publish(&mut config.publish);
        self.apply_s3(&mut config.s3);
        Ok(config)
    }

    fn apply_publish(&self, p: &mut PublishConfig) {
        if let Some(v) = &self.source {
            p.source = v.clone();
        }
        if let Some(v) = &self.cache_name {
            p.cache_name = v.clone();
        }
        if let Some(v) = &self.branch_name {
            p.branch_name = v.clone();
        }
        if let Some(v) = &self.branch_version {
            p.branch_version = v.clone();
        }
        if let Some(v) = &self.bootstrap_executable {
            p.bootstrap_executable = Some(v.clone());
        }
        if let Some(v) = &self.bootstrap_version {
            p.bootstrap_version = v.clone();
        }
        if let Some(v) = self.workers {
            p.workers = v;
        }
        if let Some(v) = self.queue_capacity {
            p.queue_capacity = v;
        }
        if let Some(v) = self.compression_threshold {
            p.compression_threshold = v;
        }
        match self.codec {
            Some(CodecArg::Xz) => p.codec = CompressionCodec::Xz,
            Some(CodecArg::Zstd) => {
                p.codec = CompressionCodec::Zstd {
                    level: self.zstd_level,
                }
            }
            None => {}
        }
        p.allow_retag |= self.allow_retag;
    }

    fn apply_s3(&self, s: &mut S3Config) {
        if let Some(v) = &self.s3_endpoint {
            s.endpoint = v.clone();
        }
        if let Some(v) = &self.s3_key_id {
            s.access_key_id = v.clone();
        }
        if let Some(v) = &self.s3_key {
            s.secret_access_key = v.clone();
        }
        if let Some(v) = &self.s3_name {
            s.bucket = v.clone();
        }
        if let Some(v) = &self.s3_region {
            s.region = v.clone();
        }
        if self.insecure {
            s.secure = false;
        }
    }

    /// Run one publish and print its report.
    pub async fn run(self) -> Result<()> {
        let config = self.resolve()?;

        let store: Arc<dyn ObjectStore> = if self.dry_run {
            tracing::info!("dry run: publishing into an in-memory store");
            Arc::new(MemoryObjectStore::new())
        } else {
            Arc::new(S3ObjectStore::new(config.s3.clone()).context("configuring S3 store")?)
        };
        tracing::info!("publishing {} to {}", config.publish.source.display(), store.describe());

        let pipeline = PublishPipeline::new(config.publish, store)?;
        let report = pipeline.run().await?;
        let summary = ReportSummary::from(&report);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            println!("Manifest: {} ({} entries)", summary.manifest, summary.entries);
            println!(
                "Files: {}  Uploaded: {} ({} bytes)  Dedup hits: {}  Compressed: {}",
                summary.stats.files,
                summary.stats.uploaded,
                summary.stats.bytes_uploaded,
                summary.stats.dedup_hits(),
                summary.stats.compressed
            );
            if summary.bootstrap_object.is_empty() {
                println!("Bootstrap: not found");
            } else {
                println!(
                    "Bootstrap: {} ({} bytes)",
                    summary.bootstrap_object, summary.bootstrap_size
                );
            }
            println!(
                "Tag: {}",
                if summary.tag_written { "written" } else { "unchanged" }
            );
        }
        Ok(())
    }
}
