#![warn(missing_docs)]

//! cachepub publish pipeline: parallel tree walk, dual fingerprinting (SHA-1/SHA-256),
//! compression gate, dedup-aware upload, deterministic manifest, branch pointers
//!
//! Run path: Walk → Fingerprint → Gate (compress > threshold) → Probe/Upload → Aggregate
//!           → Manifest (sorted XML) → Upload manifest → Tag → Head

pub mod compression;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod manifest;
pub mod object_key;
pub mod pipeline;
pub mod publisher;
pub mod record;
pub mod stats;
pub mod uploader;
pub mod walker;

pub use compression::{
    CompressedArtifact, CompressionCodec, CompressionGate, Compressor, ExternalCompressor,
    ZstdCompressor, DEFAULT_COMPRESSION_THRESHOLD,
};
pub use config::{PublishConfig, DEFAULT_QUEUE_CAPACITY};
pub use error::{PublishError, PublishResult};
pub use fingerprint::{fingerprint_file, ContentHash, Fingerprint, LegacyHash};
pub use manifest::{Aggregate, Manifest, ManifestAggregator, ManifestEntry, SerializedManifest};
pub use object_key::ObjectKey;
pub use pipeline::{PublishPipeline, PublishReport, ReportSummary};
pub use publisher::{BranchTarget, PointerMetadata, Publisher, TagWrite, MANIFEST_FILE_NAME};
pub use record::{BootstrapInfo, FileRecord, UploadAction, WalkRecord};
pub use stats::PublishStats;
pub use uploader::{DedupUploader, UploadOutcome, FILE_NAME_META};
pub use walker::{TreeWalker, DEFAULT_WORKERS};
