//! Manifest model, aggregation and XML serialization.
//!
//! The manifest is itself content: its SHA-256 is its object key, so the
//! serialized form must be byte-identical for the same file set no matter in
//! which order the workers finished. Records are sorted by relative path
//! before serialization and nothing iterates a hash map.
//!
//! ```xml
//! <CacheInfo>
//! 	<ContentFile Name="a.txt" Size="5" SHA1Hash="AAF4..." SHA256Hash="2CF2..." CompressedSize="5"/>
//! </CacheInfo>
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{PublishError, PublishResult};
use crate::fingerprint::ContentHash;
use crate::record::{BootstrapInfo, FileRecord, WalkRecord};
use crate::stats::PublishStats;

/// One `ContentFile` element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative path
    #[serde(rename = "@Name")]
    pub name: String,
    /// Uncompressed size
    #[serde(rename = "@Size")]
    pub size: u64,
    /// Upper-case hex SHA-1, absent when not computed
    #[serde(rename = "@SHA1Hash", default, skip_serializing_if = "Option::is_none")]
    pub sha1_hash: Option<String>,
    /// Upper-case hex SHA-256
    #[serde(rename = "@SHA256Hash")]
    pub sha256_hash: String,
    /// Size of the stored object
    #[serde(rename = "@CompressedSize")]
    pub compressed_size: u64,
}

impl From<&FileRecord> for ManifestEntry {
    fn from(record: &FileRecord) -> Self {
        ManifestEntry {
            name: record.relative_path.clone(),
            size: record.original_size,
            sha1_hash: record.legacy_hash.map(|h| h.to_hex_upper()),
            sha256_hash: record.primary_hash.to_hex_upper(),
            compressed_size: record.stored_size,
        }
    }
}

/// The sorted description of every non-bootstrap file in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "CacheInfo")]
pub struct Manifest {
    /// Entries sorted by name
    #[serde(rename = "ContentFile", default)]
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    /// Build from records in any order.
    pub fn from_records(records: &[FileRecord]) -> Self {
        let mut files: Vec<ManifestEntry> = records.iter().map(ManifestEntry::from).collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Manifest { files }
    }

    /// Tab-indented XML.
    pub fn to_xml(&self) -> PublishResult<String> {
        let mut out = String::new();
        let mut ser = quick_xml::se::Serializer::new(&mut out);
        ser.indent('\t', 1);
        self.serialize(ser)
            .map_err(|e| PublishError::Serialization(e.to_string()))?;
        Ok(out)
    }

    /// Parse a manifest produced by [`Manifest::to_xml`].
    pub fn from_xml(xml: &str) -> PublishResult<Self> {
        quick_xml::de::from_str(xml).map_err(|e| PublishError::Serialization(e.to_string()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A manifest serialized and hashed, ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedManifest {
    /// XML text
    pub xml: String,
    /// SHA-256 of `xml`
    pub hash: ContentHash,
}

impl SerializedManifest {
    /// Serialize and hash.
    pub fn new(manifest: &Manifest) -> PublishResult<Self> {
        let xml = manifest.to_xml()?;
        let hash = ContentHash::of(xml.as_bytes());
        Ok(Self { xml, hash })
    }
}

/// Everything the aggregator collected from one walk.
#[derive(Debug, Default)]
pub struct Aggregate {
    /// Manifest records, in arrival order
    pub records: Vec<FileRecord>,
    /// The bootstrap executable, if one was found
    pub bootstrap: Option<BootstrapInfo>,
    /// Run counters
    pub stats: PublishStats,
}

impl Aggregate {
    /// The sorted manifest.
    pub fn manifest(&self) -> Manifest {
        Manifest::from_records(&self.records)
    }
}

/// Single consumer of the result queue.
pub struct ManifestAggregator;

impl ManifestAggregator {
    /// Drain `rx` until every sender is gone.
    pub async fn run(mut rx: mpsc::Receiver<WalkRecord>) -> Aggregate {
        let mut agg = Aggregate::default();
        while let Some(item) = rx.recv().await {
            agg.stats.record(item.record());
            match item {
                WalkRecord::File(record) => agg.records.push(record),
                WalkRecord::Bootstrap(record) => {
                    debug!(path = %record.relative_path, "bootstrap executable found");
                    agg.bootstrap = Some(BootstrapInfo::from(&record));
                }
            }
        }
        agg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::LegacyHash;
    use crate::object_key::ObjectKey;
    use crate::record::UploadAction;
    use proptest::prelude::*;

    fn record(name: &str, content: &[u8]) -> FileRecord {
        let primary = ContentHash::of(content);
        FileRecord {
            relative_path: name.to_string(),
            original_size: content.len() as u64,
            primary_hash: primary,
            legacy_hash: Some(LegacyHash::of(content)),
            stored_size: content.len() as u64,
            key: ObjectKey::for_content(&primary, ""),
            compressed: false,
            action: UploadAction::Uploaded,
        }
    }

    #[test]
    fn xml_layout() {
        let manifest = Manifest::from_records(&[record("a.txt", b"hello")]);
        let xml = manifest.to_xml().unwrap();
        assert!(xml.starts_with("<CacheInfo>\n\t<ContentFile "));
        assert!(xml.contains(
            "Name=\"a.txt\" Size=\"5\" \
             SHA1Hash=\"AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D\" \
             SHA256Hash=\"2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824\" \
             CompressedSize=\"5\""
        ));
        assert!(xml.ends_with("</CacheInfo>"));
    }

    #[test]
    fn legacy_hash_is_omitted_when_absent() {
        let mut r = record("a.txt", b"hello");
        r.legacy_hash = None;
        let xml = Manifest::from_records(&[r]).to_xml().unwrap();
        assert!(!xml.contains("SHA1Hash"));
        assert!(xml.contains("SHA256Hash"));
    }

    #[test]
    fn parses_back() {
        let manifest = Manifest::from_records(&[
            record("b/c.dll", b"ccc"),
            record("a.txt", b"hello"),
        ]);
        let parsed = Manifest::from_xml(&manifest.to_xml().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(parsed.files[0].name, "a.txt");
    }

    #[test]
    fn empty_manifest_parses() {
        let xml = Manifest::default().to_xml().unwrap();
        assert!(Manifest::from_xml(&xml).unwrap().is_empty());
    }

    #[test]
    fn sort_is_bytewise() {
        let manifest = Manifest::from_records(&[
            record("b.txt", b"1"),
            record("B.txt", b"2"),
            record("a/z.txt", b"3"),
            record("a.txt", b"4"),
        ]);
        let names: Vec<&str> = manifest.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["B.txt", "a.txt", "a/z.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn aggregator_separates_bootstrap() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(WalkRecord::File(record("a.txt", b"hello"))).await.unwrap();
        tx.send(WalkRecord::Bootstrap(record("CitizenFX.exe", b"MZ"))).await.unwrap();
        drop(tx);

        let agg = ManifestAggregator::run(rx).await;
        assert_eq!(agg.records.len(), 1);
        assert_eq!(agg.stats.files, 2);
        let boot = agg.bootstrap.unwrap();
        assert_eq!(boot.primary_hash, ContentHash::of(b"MZ"));
        assert_eq!(boot.stored_size, 2);
        assert_eq!(agg.manifest().files[0].name, "a.txt");
    }

    proptest! {
        #[test]
        fn prop_serialization_ignores_arrival_order(
            names in prop::collection::btree_set("[a-z]{1,8}(/[a-z]{1,8})?", 1..30),
            seed in any::<u64>(),
        ) {
            let records: Vec<FileRecord> = names
                .iter()
                .map(|n| record(n, n.as_bytes()))
                .collect();
            let mut shuffled = records.clone();
            // deterministic permutation from the seed
            let len = shuffled.len();
            for i in (1..len).rev() {
                let j = (seed.wrapping_mul(i as u64 + 7).rotate_left(i as u32) % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }
            let a = SerializedManifest::new(&Manifest::from_records(&records)).unwrap();
            let b = SerializedManifest::new(&Manifest::from_records(&shuffled)).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
