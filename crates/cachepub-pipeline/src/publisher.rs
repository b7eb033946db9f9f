//! Manifest upload and branch pointers.
//!
//! A publish ends with three independent writes: the manifest under its
//! content key, the per-version tag and the branch head. The tag is written
//! only after the manifest upload succeeded, and the head only after the tag,
//! so a reader following the head never sees a manifest that is not stored.

use std::sync::Arc;

use bytes::Bytes;
use cachepub_store::{Metadata, ObjectInfo, ObjectStore, PutBody, PutOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PublishError, PublishResult};
use crate::fingerprint::ContentHash;
use crate::manifest::SerializedManifest;
use crate::object_key::ObjectKey;
use crate::record::BootstrapInfo;
use crate::uploader::FILE_NAME_META;

/// `FileName` metadata value of every manifest object.
pub const MANIFEST_FILE_NAME: &str = "info.xml";

/// Pointer metadata keys.
pub mod meta {
    /// Version string of the publish
    pub const BRANCH_VERSION: &str = "branch-version";
    /// Lower-case hex manifest hash
    pub const BRANCH_MANIFEST: &str = "branch-manifest";
    /// Bootstrap version string
    pub const BOOTSTRAP_VERSION: &str = "bootstrap-version";
    /// Stored size of the bootstrap object
    pub const BOOTSTRAP_SIZE: &str = "bootstrap-size";
    /// Upper-case hex SHA-256 of the bootstrap executable
    pub const BOOTSTRAP_OBJECT: &str = "bootstrap-object";
}

/// Which branch a publish updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchTarget {
    /// Cache (product) name
    pub cache_name: String,
    /// Branch name
    pub branch_name: String,
    /// Version being published
    pub branch_version: String,
    /// Version string of the bootstrap executable
    pub bootstrap_version: String,
}

impl BranchTarget {
    /// Key of this version's tag.
    pub fn tag_key(&self) -> ObjectKey {
        ObjectKey::tag(&self.cache_name, &self.branch_name, &self.branch_version)
    }

    /// Key of the branch head.
    pub fn head_key(&self) -> ObjectKey {
        ObjectKey::head(&self.cache_name, &self.branch_name)
    }
}

/// Metadata carried by both pointer objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerMetadata {
    /// Version being published
    pub branch_version: String,
    /// Manifest hash
    pub manifest: ContentHash,
    /// Bootstrap version string
    pub bootstrap_version: String,
    /// Bootstrap executable, if found
    pub bootstrap: Option<BootstrapInfo>,
}

impl PointerMetadata {
    /// Metadata for publishing `manifest` to `target`.
    pub fn new(target: &BranchTarget, manifest: ContentHash, bootstrap: Option<BootstrapInfo>) -> Self {
        Self {
            branch_version: target.branch_version.clone(),
            manifest,
            bootstrap_version: target.bootstrap_version.clone(),
            bootstrap,
        }
    }

    /// Store metadata map. A missing bootstrap gives an empty object hash and size 0.
    pub fn to_metadata(&self) -> Metadata {
        let (object, size) = match &self.bootstrap {
            Some(b) => (b.primary_hash.to_hex_upper(), b.stored_size),
            None => (String::new(), 0),
        };
        let mut m = Metadata::new();
        m.insert(meta::BRANCH_VERSION.into(), self.branch_version.clone());
        m.insert(meta::BRANCH_MANIFEST.into(), self.manifest.to_hex());
        m.insert(meta::BOOTSTRAP_VERSION.into(), self.bootstrap_version.clone());
        m.insert(meta::BOOTSTRAP_SIZE.into(), size.to_string());
        m.insert(meta::BOOTSTRAP_OBJECT.into(), object);
        m
    }
}

/// Whether the tag was written by this publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagWrite {
    /// The tag did not exist (or was repointed with `allow_retag`)
    Written,
    /// The tag already referenced this manifest
    Unchanged,
}

/// Writes manifests and branch pointers.
pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    target: BranchTarget,
    allow_retag: bool,
}

impl Publisher {
    /// Publisher for `target`.
    pub fn new(store: Arc<dyn ObjectStore>, target: BranchTarget) -> Self {
        Self {
            store,
            target,
            allow_retag: false,
        }
    }

    /// Allow an existing tag to be repointed at a different manifest.
    pub fn allow_retag(mut self, allow: bool) -> Self {
        self.allow_retag = allow;
        self
    }

    /// The branch this publisher updates.
    pub fn target(&self) -> &BranchTarget {
        &self.target
    }

    /// Upload a serialized manifest under its content key.
    pub async fn upload_manifest(&self, manifest: &SerializedManifest) -> PublishResult<ObjectKey> {
        let key = ObjectKey::for_manifest(&manifest.hash);
        let body = Bytes::from(manifest.xml.clone().into_bytes());
        let size = body.len() as u64;
        let options = PutOptions::octet_stream().with_meta(FILE_NAME_META, MANIFEST_FILE_NAME);

        self.store
            .put(key.as_str(), PutBody::Bytes(body), size, options)
            .await
            .map_err(|e| PublishError::store(key.as_str(), e))?;
        info!(key = %key, size, "manifest uploaded");
        Ok(key)
    }

    /// Write the tag (subject to immutability) and then the head.
    pub async fn write_pointers(&self, pointer: &PointerMetadata) -> PublishResult<TagWrite> {
        let tag_key = self.target.tag_key();
        let tag = match self.existing_tag(&tag_key).await {
            Some(info) => self.check_existing_tag(&tag_key, &info, &pointer.manifest)?,
            None => TagWrite::Written,
        };
        if tag == TagWrite::Written {
            self.put_pointer(&tag_key, pointer).await?;
        } else {
            debug!(key = %tag_key, "tag already references this manifest");
        }

        self.put_pointer(&self.target.head_key(), pointer).await?;
        Ok(tag)
    }

    async fn existing_tag(&self, key: &ObjectKey) -> Option<ObjectInfo> {
        match self.store.stat(key.as_str()).await {
            Ok(info) => info,
            Err(e) => {
                warn!(key = %key, error = %e, "tag probe failed, treating as absent");
                None
            }
        }
    }

    fn check_existing_tag(
        &self,
        key: &ObjectKey,
        info: &ObjectInfo,
        manifest: &ContentHash,
    ) -> PublishResult<TagWrite> {
        let existing = info.meta(meta::BRANCH_MANIFEST).unwrap_or_default();
        let new = manifest.to_hex();
        if existing.eq_ignore_ascii_case(&new) {
            return Ok(TagWrite::Unchanged);
        }
        if self.allow_retag {
            warn!(key = %key, existing, new = %new, "repointing existing tag");
            return Ok(TagWrite::Written);
        }
        Err(PublishError::TagConflict {
            key: key.to_string(),
            existing: existing.to_string(),
            new,
        })
    }

    async fn put_pointer(&self, key: &ObjectKey, pointer: &PointerMetadata) -> PublishResult<()> {
        let body = Bytes::from(pointer.branch_version.clone().into_bytes());
        let size = body.len() as u64;
        let options = PutOptions {
            content_type: None,
            metadata: pointer.to_metadata(),
        };
        self.store
            .put(key.as_str(), PutBody::Bytes(body), size, options)
            .await
            .map_err(|e| PublishError::store(key.as_str(), e))?;
        info!(key = %key, version = %pointer.branch_version, "pointer written");
        Ok(())
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("store", &self.store.describe())
            .field("target", &self.target)
            .field("allow_retag", &self.allow_retag)
            .finish()
    }
}
