//! Error types for the cachepub-pipeline subsystem

use std::path::PathBuf;

use cachepub_store::StoreError;

/// Result type alias for publishing operations.
pub type PublishResult<T> = Result<T, PublishError>;

/// All errors that can abort a publish run.
///
/// Every variant is fatal for the run: the walker stops at the first one and
/// no manifest is written for a partially failed tree.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Opening, reading or stat-ing a local file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File the operation was working on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// Directory traversal failed
    #[error("Walk failed: {0}")]
    Walk(#[from] walkdir::Error),
    /// The compressor could not be started or did not finish successfully
    #[error("Compression of {path} failed: {reason}")]
    Compression {
        /// Source file being compressed
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
    /// Uploading an object failed
    #[error("Upload of {key} failed: {source}")]
    Store {
        /// Object key being written
        key: String,
        /// Underlying store error
        #[source]
        source: StoreError,
    },
    /// Manifest (de)serialization failed
    #[error("Serialization failed: {0}")]
    Serialization(String),
    /// The version tag already points at a different manifest
    #[error("Tag {key} already references manifest {existing}, refusing to repoint it to {new}")]
    TagConflict {
        /// Tag key
        key: String,
        /// Manifest hash the tag currently carries
        existing: String,
        /// Manifest hash of this run
        new: String,
    },
    /// Configuration is invalid or could not be loaded
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// A worker task panicked or was cancelled
    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

impl PublishError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PublishError::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a key to a store error.
    pub fn store(key: impl Into<String>, source: StoreError) -> Self {
        PublishError::Store {
            key: key.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for PublishError {
    fn from(err: tokio::task::JoinError) -> Self {
        PublishError::TaskFailed(err.to_string())
    }
}
