//! End-to-end publish runs against the in-memory store.

mod common;

use std::sync::Arc;

use cachepub_pipeline::{
    ContentHash, ExternalCompressor, LegacyHash, Manifest, ObjectKey, PublishError,
    PublishPipeline, TagWrite, FILE_NAME_META, MANIFEST_FILE_NAME,
};
use cachepub_store::{MemoryObjectStore, ObjectStore};
use common::{compressible, config, pipeline, SourceTree};

async fn stored_manifest(store: &MemoryObjectStore, key: &ObjectKey) -> Manifest {
    let body = store.get(key.as_str()).await.unwrap();
    Manifest::from_xml(std::str::from_utf8(&body).unwrap()).unwrap()
}

#[tokio::test]
async fn test_bootstrap_is_kept_out_of_manifest() {
    let tree = SourceTree::new();
    tree.file("a.txt", "hello");
    tree.file("CitizenFX.exe", b"MZ\x90\x00launcher");

    let store = Arc::new(MemoryObjectStore::new());
    let report = pipeline(config(&tree, "1"), &store).run().await.unwrap();

    let manifest = stored_manifest(&store, &report.manifest_key).await;
    assert_eq!(manifest.len(), 1);
    let entry = &manifest.files[0];
    assert_eq!(entry.name, "a.txt");
    assert_eq!(entry.size, 5);
    assert_eq!(entry.compressed_size, 5);
    assert_eq!(entry.sha256_hash, ContentHash::of(b"hello").to_hex_upper());
    assert_eq!(entry.sha1_hash, Some(LegacyHash::of(b"hello").to_hex_upper()));

    let exe = ContentHash::of(b"MZ\x90\x00launcher");
    for key in ["tags/fivereborn/test/1", "heads/fivereborn/test"] {
        let info = store.stat(key).await.unwrap().unwrap();
        assert_eq!(info.meta("bootstrap-object"), Some(exe.to_hex_upper().as_str()));
        assert_eq!(info.meta("bootstrap-size"), Some("12"));
        assert_eq!(info.meta("bootstrap-version"), Some("10000000"));
        assert_eq!(info.meta("branch-version"), Some("1"));
        assert_eq!(
            info.meta("branch-manifest"),
            Some(report.manifest_hash.to_hex().as_str())
        );
    }

    // the bootstrap content is still uploaded
    assert!(store
        .stat(ObjectKey::for_content(&exe, "").as_str())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_identical_content_uploads_once() {
    let tree = SourceTree::new();
    tree.file("x", "same payload");
    tree.file("dir/y", "same payload");
    tree.file("dir/sub/z", "same payload");

    let store = Arc::new(MemoryObjectStore::new());
    let report = pipeline(config(&tree, "1"), &store).run().await.unwrap();

    let manifest = stored_manifest(&store, &report.manifest_key).await;
    let names: Vec<&str> = manifest.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["dir/sub/z", "dir/y", "x"]);
    assert!(manifest
        .files
        .iter()
        .all(|f| f.sha256_hash == manifest.files[0].sha256_hash));

    assert_eq!(report.stats.files, 3);
    assert_eq!(report.stats.uploaded, 1);
    assert_eq!(report.stats.run_hits, 2);
    // one content object, the manifest, tag and head
    assert_eq!(store.stats().puts, 4);
}

#[tokio::test]
async fn test_large_file_is_stored_compressed() {
    let tree = SourceTree::new();
    let data = compressible(64 * 1024);
    let path = tree.file("data/big.rpf", &data);
    tree.file("data/edge.bin", compressible(8192));

    let store = Arc::new(MemoryObjectStore::new());
    let report = pipeline(config(&tree, "1"), &store).run().await.unwrap();
    let manifest = stored_manifest(&store, &report.manifest_key).await;

    let big = manifest.files.iter().find(|f| f.name == "data/big.rpf").unwrap();
    assert_eq!(big.size, data.len() as u64);
    assert!(big.compressed_size < big.size);
    let key = ObjectKey::for_content(&ContentHash::of(&data), ".zst");
    let stored = store.get(key.as_str()).await.unwrap();
    assert_eq!(stored.len() as u64, big.compressed_size);
    assert_eq!(zstd::decode_all(&stored[..]).unwrap(), data);

    // exactly at the threshold: stored verbatim, unsuffixed
    let edge = manifest.files.iter().find(|f| f.name == "data/edge.bin").unwrap();
    assert_eq!(edge.size, 8192);
    assert_eq!(edge.compressed_size, 8192);

    assert_eq!(report.stats.compressed, 1);
    assert!(!path.with_file_name("big.rpf.zst").exists());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let tree = SourceTree::new();
    tree.file("a.txt", "hello");
    tree.file("b/c.dat", compressible(20_000));
    tree.file("CitizenFX.exe", "MZ");

    let store = Arc::new(MemoryObjectStore::new());
    let first = pipeline(config(&tree, "5"), &store).run().await.unwrap();
    let objects = store.object_count();
    let puts = store.stats().puts;

    let second = pipeline(config(&tree, "5"), &store).run().await.unwrap();
    assert_eq!(second.manifest_hash, first.manifest_hash);
    assert_eq!(second.stats.uploaded, 0);
    assert_eq!(second.stats.remote_hits, 3);
    assert_eq!(second.tag, TagWrite::Unchanged);
    assert_eq!(store.object_count(), objects);
    // manifest re-put plus head
    assert_eq!(store.stats().puts, puts + 2);

    // stored sizes are adopted from the store on a hit
    let manifest = stored_manifest(&store, &second.manifest_key).await;
    let c = manifest.files.iter().find(|f| f.name == "b/c.dat").unwrap();
    assert!(c.compressed_size < 20_000);
}

#[tokio::test]
async fn test_manifest_hash_is_deterministic_across_worker_counts() {
    let tree = SourceTree::new();
    for i in 0..40 {
        tree.file(&format!("d{}/f{i:03}.bin", i % 5), format!("content {i}"));
    }

    let mut hashes = Vec::new();
    for workers in [1, 3, 16] {
        let store = Arc::new(MemoryObjectStore::new());
        let mut c = config(&tree, "1");
        c.workers = workers;
        c.queue_capacity = 1;
        hashes.push(pipeline(c, &store).run().await.unwrap().manifest_hash);
    }
    assert!(hashes.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_upload_failure_publishes_nothing() {
    let tree = SourceTree::new();
    for i in 0..30 {
        tree.file(&format!("f{i:02}"), format!("payload {i}"));
    }
    let store = Arc::new(MemoryObjectStore::new());
    store.fail_puts_with_prefix("");

    let err = pipeline(config(&tree, "1"), &store).run().await.unwrap_err();
    assert!(matches!(err, PublishError::Store { .. }));
    assert!(store.stat("heads/fivereborn/test").await.unwrap().is_none());
    assert!(store.stat("tags/fivereborn/test/1").await.unwrap().is_none());
    assert_eq!(store.object_count(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_compressor_failure_publishes_no_pointers() {
    let tree = SourceTree::new();
    tree.file("small.txt", "hello");
    tree.file("big.bin", compressible(32 * 1024));
    let store = Arc::new(MemoryObjectStore::new());

    let err = PublishPipeline::new(config(&tree, "1"), store.clone())
        .unwrap()
        .with_compressor(Arc::new(ExternalCompressor::new("false", vec![], ".xz")))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PublishError::Compression { .. }));
    assert!(store.stat("heads/fivereborn/test").await.unwrap().is_none());
    assert!(store.stat("tags/fivereborn/test/1").await.unwrap().is_none());
    assert!(store.keys().iter().all(|k| !k.starts_with("tags/") && !k.starts_with("heads/")));
    assert!(!tree.path().join("big.bin.xz").exists());
}

#[tokio::test]
async fn test_retagging_a_version_with_new_content_conflicts() {
    let tree = SourceTree::new();
    tree.file("a.txt", "v1");
    let store = Arc::new(MemoryObjectStore::new());
    let first = pipeline(config(&tree, "9"), &store).run().await.unwrap();

    tree.file("a.txt", "v2");
    let err = pipeline(config(&tree, "9"), &store).run().await.unwrap_err();
    assert!(matches!(err, PublishError::TagConflict { .. }));
    let head = store.stat("heads/fivereborn/test").await.unwrap().unwrap();
    assert_eq!(
        head.meta("branch-manifest"),
        Some(first.manifest_hash.to_hex().as_str())
    );

    let mut c = config(&tree, "9");
    c.allow_retag = true;
    let third = pipeline(c, &store).run().await.unwrap();
    assert_eq!(third.tag, TagWrite::Written);
    assert_ne!(third.manifest_hash, first.manifest_hash);
}

#[tokio::test]
async fn test_missing_bootstrap_still_publishes() {
    let tree = SourceTree::new();
    tree.file("a.txt", "hello");
    let store = Arc::new(MemoryObjectStore::new());
    let report = pipeline(config(&tree, "1"), &store).run().await.unwrap();

    assert!(report.bootstrap.is_none());
    let head = store.stat("heads/fivereborn/test").await.unwrap().unwrap();
    assert_eq!(head.meta("bootstrap-object"), Some(""));
    assert_eq!(head.meta("bootstrap-size"), Some("0"));
}

#[tokio::test]
async fn test_manifest_object_metadata() {
    let tree = SourceTree::new();
    tree.file("a.txt", "hello");
    let store = Arc::new(MemoryObjectStore::new());
    let report = pipeline(config(&tree, "1"), &store).run().await.unwrap();

    let info = store.stat(report.manifest_key.as_str()).await.unwrap().unwrap();
    assert_eq!(info.meta(FILE_NAME_META), Some(MANIFEST_FILE_NAME));
    let body = store.get(report.manifest_key.as_str()).await.unwrap();
    assert_eq!(ContentHash::of(&body), report.manifest_hash);
    assert_eq!(report.manifest_key, ObjectKey::for_manifest(&report.manifest_hash));

    let content = store
        .stat(ObjectKey::for_content(&ContentHash::of(b"hello"), "").as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(content.meta(FILE_NAME_META), Some("a.txt"));
}
