//! Store key layout.
//!
//! Content objects live under a two-level prefix shard of their SHA-256:
//!
//! ```text
//! {h[0]:02x}/{h[1]:02x}/{hex(h)}{suffix}
//! ```
//!
//! where `suffix` is the compressor's artifact suffix (e.g. `.xz`) when the
//! stored bytes are compressed. Update clients rebuild keys with exactly this
//! layout, so it must not change. Branch pointers live under `tags/` and
//! `heads/`.

use serde::{Deserialize, Serialize};

use crate::fingerprint::ContentHash;

/// A key in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Key of a content object. `suffix` is empty for uncompressed objects.
    pub fn for_content(hash: &ContentHash, suffix: &str) -> Self {
        let h = hash.as_bytes();
        ObjectKey(format!("{:02x}/{:02x}/{}{}", h[0], h[1], hash.to_hex(), suffix))
    }

    /// Key of a serialized manifest: content layout, never suffixed.
    pub fn for_manifest(hash: &ContentHash) -> Self {
        Self::for_content(hash, "")
    }

    /// Immutable per-version branch pointer.
    pub fn tag(cache: &str, branch: &str, version: &str) -> Self {
        ObjectKey(format!("tags/{cache}/{branch}/{version}"))
    }

    /// Mutable latest-version branch pointer.
    pub fn head(cache: &str, branch: &str) -> Self {
        ObjectKey(format!("heads/{cache}/{branch}"))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
