//! The file extension: wraps a [`LogEngine`] whose value type is
//! [`FileValue`], adding a pre-commit upload phase for large payloads
//! while reusing the log engine's two-phase write for metadata.

pub mod metadata;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::config::{FileExtensionSettings, Settings};
use crate::error::{BackendError, Error, Result};
use crate::log::entry::Entry;
use crate::log::LogEngine;
use crate::store::{ObjectStore, PutOptions};

use metadata::{DeletedFileMetadata, FileMetadata, FileValue};

pub struct FileStore {
	log: LogEngine<FileValue>,
	store: Arc<dyn ObjectStore>,
	bucket: String,
	file_prefix: String,
	kms_key_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SetFileOptions {
	pub content_type: Option<String>,
	pub user_metadata: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Default)]
pub struct GetFileOptions {
	/// A log object version, as returned in `Entry::log_version` by a
	/// prior `set_file`/`history` call. `None` reads the current value.
	pub version_id: Option<String>,
}

impl FileStore {
	/// Builds a file store. When `file_settings` names a different
	/// bucket, prefix, or override set than `log_settings`, a fresh
	/// object-store client is built; otherwise `store` (the parent
	/// log engine's adapter) is reused and its lifetime stays owned by
	/// the caller of this constructor, matching the source's
	/// client-sharing rule.
	pub fn new(
		store: Arc<dyn ObjectStore>,
		log_settings: &Settings,
		file_settings: Option<FileExtensionSettings>,
	) -> Self {
		let file_settings = file_settings.unwrap_or(FileExtensionSettings {
			bucket: None,
			prefix: None,
			kms_key_id: None,
			validate_access: true,
			validate_versioning: true,
		});
		let bucket = file_settings.bucket.clone().unwrap_or_else(|| log_settings.bucket.clone());
		let file_prefix =
			file_settings.prefix.clone().unwrap_or_else(|| log_settings.default_file_prefix());
		let kms_key_id = file_settings.kms_key_id.clone().or_else(|| log_settings.kms_key_id.clone());

		// Metadata (the FileValue log entries) travels through the same
		// log object and key mirrors as the parent store; only the raw
		// payload bytes live under `file_prefix` in `bucket`.
		Self {
			log: LogEngine::new(store.clone(), log_settings.clone()),
			store,
			bucket,
			file_prefix,
			kms_key_id,
		}
	}

	/// Validates bucket access and versioning unless disabled, mirroring
	/// the `validate_access`/`validate_versioning` construction flags.
	pub async fn validate(&self) -> Result<()> {
		self.log.validate_backend().await
	}

	fn object_key(&self, key: &str) -> String {
		format!("{}{}", self.file_prefix, key)
	}

	#[tracing::instrument(skip(self, bytes), fields(key = %key))]
	pub async fn set_file(
		&self,
		key: &str,
		bytes: Bytes,
		opts: SetFileOptions,
	) -> Result<Entry<FileValue>> {
		let mut hasher = Sha256::new();
		hasher.update(&bytes);
		let content_hash = format!("sha256:{}", hex::encode(hasher.finalize()));
		let content_length = bytes.len() as u64;

		let put = self
			.store
			.put(
				&self.bucket,
				&self.object_key(key),
				bytes,
				PutOptions {
					content_type: Some(
						opts.content_type.clone().unwrap_or_else(|| "application/octet-stream".into()),
					),
					kms_key_id: self.kms_key_id.clone(),
					user_metadata: opts.user_metadata.clone(),
					..Default::default()
				},
			)
			.await
			.map_err(Error::from)?;

		let metadata = FileMetadata {
			s3_key: self.object_key(key),
			s3_version_id: put.version_id,
			content_hash,
			content_length,
			content_type: opts.content_type.unwrap_or_else(|| "application/octet-stream".into()),
			user_metadata: opts.user_metadata,
		};

		// Phase 0 already committed one object version; the log write
		// below may retry its own conditional loop, but it must never
		// repeat the upload.
		self.log.set(key, FileValue::Active(metadata)).await
	}

	pub async fn get_file(
		&self,
		key: &str,
		opts: GetFileOptions,
	) -> Result<(Entry<FileValue>, impl Stream<Item = Result<Bytes>> + 'static)> {
		// `version_id` is the log object's version, the only version id a
		// write exposes back to the caller (`Entry::log_version`) — never a
		// key-mirror object version, which nothing in the public API returns.
		let entry = match &opts.version_id {
			Some(v) => self.log.get_by_log_version(v).await?,
			None => self.log.get(key).await?,
		};

		let metadata = match &entry.value {
			FileValue::Active(m) => m.clone(),
			FileValue::Deleted(_) => return Err(Error::FileDeleted(key.to_string())),
		};

		let res = self
			.store
			.get(&self.bucket, &metadata.s3_key, Some(&metadata.s3_version_id))
			.await
			.map_err(Error::from)?;

		let stream = futures_util::stream::once(async move { Ok(res.body) });
		Ok((entry, stream))
	}

	/// Convenience wrapper that streams a downloaded file directly to a
	/// local path, creating parent directories as needed.
	pub async fn get_file_to_path(
		&self,
		key: &str,
		opts: GetFileOptions,
		path: impl AsRef<Path>,
	) -> Result<Entry<FileValue>> {
		use futures_util::StreamExt;

		let (entry, stream) = self.get_file(key, opts).await?;
		tokio::pin!(stream);
		if let Some(parent) = path.as_ref().parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| Error::BackendError(BackendError::Transport(anyhow::anyhow!(e))))?;
		}
		let mut file = tokio::fs::File::create(path.as_ref())
			.await
			.map_err(|e| Error::BackendError(BackendError::Transport(anyhow::anyhow!(e))))?;
		while let Some(chunk) = stream.next().await {
			let chunk = chunk?;
			file.write_all(&chunk)
				.await
				.map_err(|e| Error::BackendError(BackendError::Transport(anyhow::anyhow!(e))))?;
		}
		file.flush().await.map_err(|e| Error::BackendError(BackendError::Transport(anyhow::anyhow!(e))))?;
		Ok(entry)
	}

	pub async fn delete_file(&self, key: &str) -> Result<Entry<FileValue>> {
		let current = self.log.get(key).await?;
		let s3_key = match &current.value {
			FileValue::Active(m) => m.s3_key.clone(),
			FileValue::Deleted(_) => return Err(Error::FileDeleted(key.to_string())),
		};

		let deleted = self.store.delete(&self.bucket, &s3_key).await.map_err(Error::from)?;

		self.log
			.set(
				key,
				FileValue::Deleted(DeletedFileMetadata {
					s3_key,
					deleted_version_id: deleted.delete_marker_version_id,
					deleted: true,
				}),
			)
			.await
	}

	/// Verifies the log hash, and for an active entry, streams the
	/// referenced object version and compares its SHA-256 to
	/// `content_hash`. Tombstones pass trivially once the hash
	/// verifies. Returns `false` on a missing object/version; other
	/// backend errors propagate.
	pub async fn verify_file(&self, entry: &Entry<FileValue>) -> Result<bool> {
		if !self.log.verify(entry) {
			return Ok(false);
		}
		let metadata = match &entry.value {
			FileValue::Active(m) => m.clone(),
			FileValue::Deleted(_) => return Ok(true),
		};

		let res = match self.store.get(&self.bucket, &metadata.s3_key, Some(&metadata.s3_version_id)).await {
			Ok(r) => r,
			Err(BackendError::NotFound) => return Ok(false),
			Err(e) => return Err(e.into()),
		};

		let mut hasher = Sha256::new();
		hasher.update(&res.body);
		let recomputed = format!("sha256:{}", hex::encode(hasher.finalize()));
		if recomputed != metadata.content_hash {
			warn!(key = %entry.key, "content hash mismatch on verify");
		}
		Ok(recomputed == metadata.content_hash)
	}

	pub async fn history(
		&self,
		key: &str,
		before_key_version: Option<&str>,
		limit: Option<u32>,
	) -> Result<(Vec<Entry<FileValue>>, Option<String>)> {
		self.log.history(key, before_key_version, limit).await
	}

	pub async fn list_files(&self, prefix: Option<&str>, after_key: Option<&str>, limit: Option<u32>) -> Result<Vec<String>> {
		self.log.list_keys(prefix, after_key, limit).await
	}
}
