//! Parallel tree walker.
//!
//! A blocking lister enumerates regular files (and symlinks to them) under the
//! source root and feeds a dispatcher, which keeps at most `workers` per-file
//! pipelines in flight (fingerprint → compression gate → upload). Each
//! finished file becomes a [`WalkRecord`] on the bounded result queue. The
//! first failure from any worker or from the listing cancels the remaining
//! workers and is returned.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::compression::CompressionGate;
use crate::error::{PublishError, PublishResult};
use crate::fingerprint::fingerprint_file;
use crate::record::{FileRecord, WalkRecord};
use crate::uploader::DedupUploader;

/// Default number of files processed concurrently.
pub const DEFAULT_WORKERS: usize = 64;

/// A file found by the lister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Absolute (or root-joined) path on disk
    pub path: PathBuf,
    /// `/`-separated path relative to the root
    pub relative: String,
}

/// `/`-separated form of `path` relative to `root`, whatever the platform separator.
pub fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

type Listed = Result<SourceFile, walkdir::Error>;

/// Regular files, and symlinks resolving to one. Directory links are not followed.
fn is_publishable(entry: &walkdir::DirEntry) -> bool {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return true;
    }
    if !file_type.is_symlink() {
        return false;
    }
    match std::fs::metadata(entry.path()) {
        Ok(meta) if meta.is_file() => true,
        Ok(_) => {
            debug!(path = %entry.path().display(), "skipping symlink to non-file");
            false
        }
        Err(e) => {
            debug!(path = %entry.path().display(), error = %e, "skipping dangling symlink");
            false
        }
    }
}

/// Enumerate regular files, skipping compressed artifacts. Runs on a blocking thread.
fn list_files(root: &Path, gate: &CompressionGate, tx: mpsc::Sender<Listed>) {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        if !is_publishable(&entry) || gate.is_artifact(entry.path()) {
            continue;
        }
        let Some(relative) = relative_name(root, entry.path()) else {
            continue;
        };
        let file = SourceFile {
            path: entry.into_path(),
            relative,
        };
        if tx.blocking_send(Ok(file)).is_err() {
            // dispatcher gave up
            return;
        }
    }
}

/// Full per-file pipeline.
async fn process_file(uploader: &DedupUploader, file: SourceFile) -> PublishResult<FileRecord> {
    let path = file.path.clone();
    let fingerprint = tokio::task::spawn_blocking(move || fingerprint_file(&path)).await??;
    let outcome = uploader.upload(&file.relative, &file.path, &fingerprint).await?;

    Ok(FileRecord {
        relative_path: file.relative,
        original_size: fingerprint.size,
        primary_hash: fingerprint.primary,
        legacy_hash: Some(fingerprint.legacy),
        stored_size: outcome.stored_size,
        key: outcome.key,
        compressed: outcome.compressed,
        action: outcome.action,
    })
}

/// Walks a source tree with a fixed-size worker pool.
pub struct TreeWalker {
    root: PathBuf,
    workers: usize,
    bootstrap: Option<String>,
    uploader: Arc<DedupUploader>,
}

impl TreeWalker {
    /// Walker over `root` running `workers` files at a time.
    pub fn new(root: impl Into<PathBuf>, workers: usize, uploader: Arc<DedupUploader>) -> Self {
        Self {
            root: root.into(),
            workers: workers.max(1),
            bootstrap: None,
            uploader,
        }
    }

    /// Route the file whose relative path equals `name` to [`WalkRecord::Bootstrap`].
    pub fn with_bootstrap(mut self, name: Option<String>) -> Self {
        self.bootstrap = name.filter(|n| !n.is_empty());
        self
    }

    /// Walk the tree, sending one record per file to `records`.
    ///
    /// `records` is consumed: once this returns, every sender clone is gone
    /// and the queue is closed, whether the walk succeeded or failed.
    /// Returns the number of files processed.
    #[instrument(skip_all, fields(root = %self.root.display(), workers = self.workers))]
    pub async fn walk(&self, records: mpsc::Sender<WalkRecord>) -> PublishResult<usize> {
        let (path_tx, mut path_rx) = mpsc::channel::<Listed>(self.workers * 4);
        let root = self.root.clone();
        let gate = self.uploader.gate().clone();
        let lister = tokio::task::spawn_blocking(move || list_files(&root, &gate, path_tx));

        let mut tasks = JoinSet::new();
        let result = self.dispatch(&mut tasks, &mut path_rx, &records).await;
        drop(records);

        if result.is_err() {
            tasks.abort_all();
        }
        while tasks.join_next().await.is_some() {}
        drop(path_rx);
        lister.await?;

        if let Ok(count) = &result {
            debug!(files = count, "walk complete");
        }
        result
    }

    async fn dispatch(
        &self,
        tasks: &mut JoinSet<PublishResult<()>>,
        paths: &mut mpsc::Receiver<Listed>,
        records: &mpsc::Sender<WalkRecord>,
    ) -> PublishResult<usize> {
        let mut dispatched = 0usize;

        loop {
            tokio::select! {
                Some(joined) = tasks.join_next() => joined??,
                next = paths.recv(), if tasks.len() < self.workers => match next {
                    Some(listed) => {
                        let file = listed?;
                        self.spawn_file(tasks, file, records.clone());
                        dispatched += 1;
                    }
                    None => break,
                },
            }
        }

        while let Some(joined) = tasks.join_next().await {
            joined??;
        }
        Ok(dispatched)
    }

    fn spawn_file(
        &self,
        tasks: &mut JoinSet<PublishResult<()>>,
        file: SourceFile,
        records: mpsc::Sender<WalkRecord>,
    ) {
        let uploader = Arc::clone(&self.uploader);
        let is_bootstrap = self.bootstrap.as_deref() == Some(file.relative.as_str());

        tasks.spawn(async move {
            let record = process_file(&uploader, file).await?;
            let item = if is_bootstrap {
                WalkRecord::Bootstrap(record)
            } else {
                WalkRecord::File(record)
            };
            records
                .send(item)
                .await
                .map_err(|_| PublishError::TaskFailed("result queue closed".into()))
        });
    }
}
