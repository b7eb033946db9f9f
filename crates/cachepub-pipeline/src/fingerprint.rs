//! Content fingerprinting: SHA-256 (primary, the content key) and SHA-1
//! (legacy, kept for older update clients), computed in one streaming pass.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{PublishError, PublishResult};

const READ_BUFFER: usize = 64 * 1024;

/// A 32-byte SHA-256 digest identifying content. Used as the object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hash a byte slice.
    pub fn of(data: &[u8]) -> Self {
        ContentHash(Sha256::digest(data).into())
    }
    /// Return the hash as a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
    /// Return the hash as an uppercase hex string, the form written into manifests
    pub fn to_hex_upper(&self) -> String {
        hex::encode_upper(self.0)
    }
    /// Return the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A 20-byte SHA-1 digest over the same content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LegacyHash(pub [u8; 20]);

impl LegacyHash {
    /// Hash a byte slice.
    pub fn of(data: &[u8]) -> Self {
        LegacyHash(Sha1::digest(data).into())
    }
    /// Return the hash as an uppercase hex string
    pub fn to_hex_upper(&self) -> String {
        hex::encode_upper(self.0)
    }
}

/// Both digests and the byte length of one file's uncompressed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    /// SHA-1 of the content
    pub legacy: LegacyHash,
    /// SHA-256 of the content
    pub primary: ContentHash,
    /// Number of bytes hashed
    pub size: u64,
}

/// Fingerprint everything `reader` yields.
///
/// Each buffer is fed to both hashers, so the source is read exactly once and
/// never needs to be rewound.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> std::io::Result<Fingerprint> {
    let mut legacy = Sha1::new();
    let mut primary = Sha256::new();
    let mut size = 0u64;
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        legacy.update(&buf[..n]);
        primary.update(&buf[..n]);
        size += n as u64;
    }

    Ok(Fingerprint {
        legacy: LegacyHash(legacy.finalize().into()),
        primary: ContentHash(primary.finalize().into()),
        size,
    })
}

/// Fingerprint a file on disk. Any open or read error is fatal for the file.
pub fn fingerprint_file(path: &Path) -> PublishResult<Fingerprint> {
    let file = File::open(path).map_err(|e| PublishError::io(path, e))?;
    fingerprint_reader(file).map_err(|e| PublishError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct FailAfter {
        remaining: usize,
    }

    impl Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.remaining == 0 {
                return Err(std::io::Error::new(ErrorKind::Other, "disk on fire"));
            }
            let n = buf.len().min(self.remaining);
            buf[..n].fill(b'x');
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn known_vectors_for_hello() {
        let fp = fingerprint_reader(&b"hello"[..]).unwrap();
        assert_eq!(fp.size, 5);
        assert_eq!(
            fp.primary.to_hex(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(
            fp.legacy.to_hex_upper(),
            "AAF4C61DDCC5E8A2DABEDE0F3B482CD9AEA9434D"
        );
    }

    #[test]
    fn empty_input() {
        let fp = fingerprint_reader(&b""[..]).unwrap();
        assert_eq!(fp.size, 0);
        assert_eq!(
            fp.primary.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn read_error_is_propagated() {
        let err = fingerprint_reader(FailAfter { remaining: 100_000 }).unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = fingerprint_file(Path::new("/definitely/not/here.bin")).unwrap_err();
        assert!(matches!(err, PublishError::Io { .. }));
        assert!(err.to_string().contains("/definitely/not/here.bin"));
    }

    #[test]
    fn file_matches_in_memory_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        let fp = fingerprint_file(&path).unwrap();
        assert_eq!(fp.size, data.len() as u64);
        assert_eq!(fp.primary, ContentHash::of(&data));
        assert_eq!(fp.legacy, LegacyHash::of(&data));
    }

    proptest! {
        #[test]
        fn prop_streaming_matches_one_shot(data in prop::collection::vec(any::<u8>(), 0..300_000)) {
            let fp = fingerprint_reader(&data[..]).unwrap();
            prop_assert_eq!(fp.primary, ContentHash::of(&data));
            prop_assert_eq!(fp.legacy, LegacyHash::of(&data));
            prop_assert_eq!(fp.size, data.len() as u64);
        }
    }
}
