//! Run statistics, tallied by the single aggregator.

use serde::{Deserialize, Serialize};

use crate::record::{FileRecord, UploadAction};

/// Counters describing one publish run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStats {
    /// Files discovered, bootstrap included
    pub files: u64,
    /// Uncompressed bytes scanned
    pub bytes_scanned: u64,
    /// Objects uploaded
    pub uploaded: u64,
    /// Bytes uploaded (stored sizes)
    pub bytes_uploaded: u64,
    /// Files whose content was already in the store
    pub remote_hits: u64,
    /// Files whose content was handled earlier in this run
    pub run_hits: u64,
    /// Objects stored compressed, counted once per upload
    pub compressed: u64,
}

impl PublishStats {
    /// Account for one file.
    pub fn record(&mut self, file: &FileRecord) {
        self.files += 1;
        self.bytes_scanned += file.original_size;
        match file.action {
            UploadAction::Uploaded => {
                self.uploaded += 1;
                self.bytes_uploaded += file.stored_size;
                if file.compressed {
                    self.compressed += 1;
                }
            }
            UploadAction::RemoteHit => self.remote_hits += 1,
            UploadAction::RunHit => self.run_hits += 1,
        }
    }

    /// Files that did not need an upload.
    pub fn dedup_hits(&self) -> u64 {
        self.remote_hits + self.run_hits
    }

    /// Scanned bytes per uploaded byte; 1.0 when nothing was uploaded.
    pub fn reduction_ratio(&self) -> f64 {
        if self.bytes_uploaded > 0 {
            self.bytes_scanned as f64 / self.bytes_uploaded as f64
        } else {
            1.0
        }
    }
}
