//! Typed, mockable surface over the S3-compatible backend. Mirrors the
//! shape of a teacher adapter trait: a plain async trait with a
//! concrete SDK-backed implementation beside it, `#[cfg_attr(test,
//! automock)]` so call patterns can be asserted in unit tests.

pub mod fake;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

pub type StoreResult<T> = std::result::Result<T, BackendError>;

/// Nominal wrapper so a log-object version id, a key-mirror etag, and a
/// file-object version id can never be mixed up at a call site even
/// though all three are backend strings under the hood.
macro_rules! nominal_id {
	($name:ident) => {
		#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub String);

		impl $name {
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<String> for $name {
			fn from(s: String) -> Self {
				Self(s)
			}
		}
	};
}

nominal_id!(LogVersionId);
nominal_id!(KeyEtag);
nominal_id!(FileVersionId);

#[derive(Debug, Clone)]
pub struct GetResult {
	pub body: Bytes,
	pub etag: String,
	pub version_id: String,
}

#[derive(Debug, Clone)]
pub struct HeadResult {
	pub etag: String,
	pub version_id: String,
}

#[derive(Debug, Clone)]
pub struct PutResult {
	pub etag: String,
	pub version_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
	pub content_type: Option<String>,
	pub if_match: Option<String>,
	pub if_none_match: bool,
	pub kms_key_id: Option<String>,
	pub user_metadata: Option<std::collections::BTreeMap<String, String>>,
}

impl PutOptions {
	pub fn if_match(etag: impl Into<String>) -> Self {
		Self { if_match: Some(etag.into()), ..Default::default() }
	}

	pub fn if_none_match() -> Self {
		Self { if_none_match: true, ..Default::default() }
	}
}

#[derive(Debug, Clone)]
pub struct VersionEntry {
	pub key: String,
	pub version_id: String,
	pub is_latest: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListVersionsOptions {
	pub key_marker: Option<String>,
	pub version_id_marker: Option<String>,
	pub max_keys: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ListVersionsPage {
	pub entries: Vec<VersionEntry>,
	pub next_key_marker: Option<String>,
	pub next_version_id_marker: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPrefixOptions {
	pub start_after: Option<String>,
	pub continuation_token: Option<String>,
	pub max_keys: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPrefixPage {
	pub keys: Vec<String>,
	pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteResult {
	pub delete_marker_version_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersioningState {
	Enabled,
	Disabled,
}

/// The operations the log engine and file extension need from the
/// backend. Every method is a suspension point; implementations must
/// read `etag`/`version_id` only after the response body has been
/// fully consumed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
	async fn get<'a>(
		&self,
		bucket: &'a str,
		key: &'a str,
		version_id: Option<&'a str>,
	) -> StoreResult<GetResult>;

	async fn put(
		&self,
		bucket: &str,
		key: &str,
		body: Bytes,
		opts: PutOptions,
	) -> StoreResult<PutResult>;

	async fn head(&self, bucket: &str, key: &str) -> StoreResult<HeadResult>;

	async fn list_versions(
		&self,
		bucket: &str,
		prefix: &str,
		opts: ListVersionsOptions,
	) -> StoreResult<ListVersionsPage>;

	async fn list_prefix(
		&self,
		bucket: &str,
		prefix: &str,
		opts: ListPrefixOptions,
	) -> StoreResult<ListPrefixPage>;

	async fn delete(&self, bucket: &str, key: &str) -> StoreResult<DeleteResult>;

	async fn get_bucket_versioning(&self, bucket: &str) -> StoreResult<VersioningState>;
}
