#![warn(missing_docs)]

//! cachepub object-store subsystem: the stat/get/put capability the publisher
//! writes through, with an in-memory backend and an S3-compatible HTTP backend.

pub mod error;
pub mod memory;
pub mod object;
pub mod s3;
pub mod sigv4;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryObjectStore, MemoryStoreStats};
pub use object::{Metadata, ObjectInfo, ObjectStore, PutBody, PutOptions, OCTET_STREAM};
pub use s3::{S3Config, S3ObjectStore};
