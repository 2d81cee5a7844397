//! Immutable, auditable key-value store layered on a versioned
//! S3-compatible object-storage backend.
//!
//! A single global log object, append-only and content-hash chained,
//! gives a tamper-evident total order over every write. A per-key
//! mirror object gives O(1) point reads, kept in sync best-effort and
//! self-healed by an opportunistic repair pass. An optional file
//! extension ([`file`]) layers large-payload storage over the same
//! log engine.

pub mod canonical;
pub mod config;
pub mod error;
pub mod file;
pub mod hash;
pub mod log;
pub mod store;

pub use config::Settings;
pub use error::{BackendError, Error, Result};
pub use file::metadata::{DeletedFileMetadata, FileMetadata, FileValue};
pub use file::FileStore;
pub use log::entry::Entry;
pub use log::LogEngine;
pub use store::{s3::S3ObjectStore, ObjectStore};
