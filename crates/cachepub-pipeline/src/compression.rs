//! Compression gate: size-threshold decision plus the compressor capability.
//!
//! A compressor turns `path` into a sibling artifact `path + suffix`. The
//! default runs the external `xz` utility; an in-process Zstandard compressor
//! is available for hosts without it.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PublishError, PublishResult};

/// Files strictly larger than this are compressed before upload.
pub const DEFAULT_COMPRESSION_THRESHOLD: u64 = 8192;

/// Compressor selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CompressionCodec {
    /// External `xz -zfk -T 0`, artifacts end in `.xz`
    #[default]
    Xz,
    /// In-process Zstandard, artifacts end in `.zst`
    Zstd {
        /// Compression level (1=fastest, 19=best ratio)
        level: i32,
    },
}

impl CompressionCodec {
    /// Instantiate the compressor for this codec.
    pub fn build(&self) -> Arc<dyn Compressor> {
        match self {
            CompressionCodec::Xz => Arc::new(ExternalCompressor::xz()),
            CompressionCodec::Zstd { level } => Arc::new(ZstdCompressor::new(*level)),
        }
    }
}

/// Produces a compressed sibling of a file.
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Suffix appended to the source name, also appended to the object key.
    fn suffix(&self) -> &str;

    /// Compress `source` into `source + suffix`, waiting for completion.
    async fn compress(&self, source: &Path) -> PublishResult<CompressedArtifact>;
}

/// `path` with `suffix` appended to its final component.
pub fn artifact_path(source: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = source.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// A compressed artifact on disk. Removed when dropped; removal errors are ignored.
#[derive(Debug)]
pub struct CompressedArtifact {
    path: PathBuf,
    size: u64,
}

impl CompressedArtifact {
    /// Wrap an existing artifact.
    pub fn new(path: PathBuf, size: u64) -> Self {
        Self { path, size }
    }
    /// Location of the artifact
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// Compressed size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for CompressedArtifact {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn stat_artifact(source: &Path, artifact: PathBuf) -> PublishResult<CompressedArtifact> {
    let size = tokio::fs::metadata(&artifact)
        .await
        .map_err(|e| PublishError::io(&artifact, e))?
        .len();
    debug!(source = %source.display(), compressed = size, "compressed");
    Ok(CompressedArtifact::new(artifact, size))
}

/// Runs an external program as `program args... <source>`.
#[derive(Debug, Clone)]
pub struct ExternalCompressor {
    program: String,
    args: Vec<String>,
    suffix: String,
}

impl ExternalCompressor {
    /// Any program that writes `source + suffix` next to its input.
    pub fn new(program: impl Into<String>, args: Vec<String>, suffix: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            suffix: suffix.into(),
        }
    }

    /// `xz -zfk -T 0`: compress, overwrite stale artifacts, keep the input, all cores.
    pub fn xz() -> Self {
        Self::new(
            "xz",
            vec!["-zfk".into(), "-T".into(), "0".into()],
            ".xz",
        )
    }
}

#[async_trait]
impl Compressor for ExternalCompressor {
    fn suffix(&self) -> &str {
        &self.suffix
    }

    async fn compress(&self, source: &Path) -> PublishResult<CompressedArtifact> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(source)
            .status()
            .await
            .map_err(|e| PublishError::Compression {
                path: source.to_path_buf(),
                reason: format!("could not run {}: {e}", self.program),
            })?;

        if !status.success() {
            return Err(PublishError::Compression {
                path: source.to_path_buf(),
                reason: format!("{} exited with {status}", self.program),
            });
        }

        stat_artifact(source, artifact_path(source, &self.suffix)).await
    }
}

/// Zstandard, in process, on the blocking pool.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    /// Compressor at the given level.
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

fn zstd_file(source: &Path, target: &Path, level: i32) -> std::io::Result<()> {
    let reader = BufReader::new(File::open(source)?);
    let mut writer = BufWriter::new(File::create(target)?);
    zstd::stream::copy_encode(reader, &mut writer, level)?;
    writer.flush()
}

#[async_trait]
impl Compressor for ZstdCompressor {
    fn suffix(&self) -> &str {
        ".zst"
    }

    async fn compress(&self, source: &Path) -> PublishResult<CompressedArtifact> {
        let target = artifact_path(source, self.suffix());
        let (src, dst, level) = (source.to_path_buf(), target.clone(), self.level);

        let result = tokio::task::spawn_blocking(move || zstd_file(&src, &dst, level)).await?;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(PublishError::Compression {
                path: source.to_path_buf(),
                reason: e.to_string(),
            });
        }

        stat_artifact(source, target).await
    }
}

/// Decides from a file's size whether it is stored compressed.
#[derive(Clone)]
pub struct CompressionGate {
    threshold: u64,
    compressor: Arc<dyn Compressor>,
}

impl CompressionGate {
    /// Gate compressing files larger than `threshold` bytes with `compressor`.
    pub fn new(threshold: u64, compressor: Arc<dyn Compressor>) -> Self {
        Self {
            threshold,
            compressor,
        }
    }

    /// True if a file of `size` bytes is stored compressed.
    pub fn should_compress(&self, size: u64) -> bool {
        size > self.threshold
    }

    /// Key suffix for a file of `size` bytes.
    pub fn key_suffix(&self, size: u64) -> &str {
        if self.should_compress(size) {
            self.compressor.suffix()
        } else {
            ""
        }
    }

    /// True if `path` looks like one of our compressed artifacts.
    pub fn is_artifact(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().ends_with(self.compressor.suffix()))
            .unwrap_or(false)
    }

    /// Run the compressor on `source`.
    pub async fn compress(&self, source: &Path) -> PublishResult<CompressedArtifact> {
        self.compressor.compress(source).await
    }
}

impl std::fmt::Debug for CompressionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionGate")
            .field("threshold", &self.threshold)
            .field("suffix", &self.compressor.suffix())
            .finish()
    }
}
