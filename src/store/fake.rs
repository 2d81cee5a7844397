//! In-memory [`ObjectStore`] double with the conditional-write and
//! versioning semantics the protocol depends on. Not behind `#[cfg(test)]`
//! so integration tests in `tests/` can construct one directly, matching
//! the teacher's test fixtures that live alongside (not gated behind)
//! the modules they exercise.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BackendError;

use super::{
	DeleteResult, GetResult, HeadResult, ListPrefixOptions, ListPrefixPage, ListVersionsOptions,
	ListVersionsPage, ObjectStore, PutOptions, PutResult, StoreResult, VersionEntry,
	VersioningState,
};

#[derive(Clone)]
struct Version {
	version_id: String,
	etag: String,
	body: Option<Bytes>, // None marks a delete marker
}

#[derive(Default)]
struct Object {
	versions: Vec<Version>, // oldest first
}

impl Object {
	fn latest(&self) -> Option<&Version> {
		self.versions.last()
	}
}

pub struct FakeObjectStore {
	objects: Mutex<BTreeMap<String, Object>>,
	versioning: VersioningState,
	counter: AtomicU64,
	fail_next_put_for: Mutex<Option<String>>,
	deny_put_for: Mutex<Option<String>>,
}

impl FakeObjectStore {
	pub fn new() -> Self {
		Self {
			objects: Mutex::new(BTreeMap::new()),
			versioning: VersioningState::Enabled,
			counter: AtomicU64::new(0),
			fail_next_put_for: Mutex::new(None),
			deny_put_for: Mutex::new(None),
		}
	}

	pub fn without_versioning() -> Self {
		Self { versioning: VersioningState::Disabled, ..Self::new() }
	}

	fn next_id(&self, prefix: &str) -> String {
		let n = self.counter.fetch_add(1, Ordering::SeqCst);
		format!("{prefix}-{n:08}")
	}

	/// Test hook: makes the next `put` to `key` fail silently (simulating
	/// a crash between phase 1 and phase 2) without affecting other keys.
	pub fn fail_next_put(&self, key: &str) {
		*self.fail_next_put_for.lock().unwrap() = Some(key.to_string());
	}

	/// Test hook: makes puts to `key` return `AccessDenied`.
	pub fn deny_puts_to(&self, key: &str) {
		*self.deny_put_for.lock().unwrap() = Some(key.to_string());
	}

	pub fn object_exists(&self, bucket_key: &str) -> bool {
		self.objects
			.lock()
			.unwrap()
			.get(bucket_key)
			.and_then(|o| o.latest())
			.map(|v| v.body.is_some())
			.unwrap_or(false)
	}
}

impl Default for FakeObjectStore {
	fn default() -> Self {
		Self::new()
	}
}

fn bk(bucket: &str, key: &str) -> String {
	format!("{bucket}/{key}")
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
	async fn get<'a>(
		&self,
		bucket: &'a str,
		key: &'a str,
		version_id: Option<&'a str>,
	) -> StoreResult<GetResult> {
		let objects = self.objects.lock().unwrap();
		let obj = objects.get(&bk(bucket, key)).ok_or(BackendError::NotFound)?;
		let version = match version_id {
			Some(v) => obj.versions.iter().find(|x| x.version_id == v),
			None => obj.latest(),
		}
		.ok_or(BackendError::NotFound)?;
		let body = version.body.clone().ok_or(BackendError::NotFound)?;
		Ok(GetResult { body, etag: version.etag.clone(), version_id: version.version_id.clone() })
	}

	async fn put(
		&self,
		bucket: &str,
		key: &str,
		body: Bytes,
		opts: PutOptions,
	) -> StoreResult<PutResult> {
		if self.deny_put_for.lock().unwrap().as_deref() == Some(key) {
			return Err(BackendError::AccessDenied);
		}
		let should_fail = {
			let mut guard = self.fail_next_put_for.lock().unwrap();
			if guard.as_deref() == Some(key) {
				*guard = None;
				true
			} else {
				false
			}
		};

		let mut objects = self.objects.lock().unwrap();
		let entry = objects.entry(bk(bucket, key)).or_default();
		let current = entry.latest().cloned();

		if let Some(expected) = &opts.if_match {
			match &current {
				Some(v) if &v.etag == expected => {},
				_ => return Err(BackendError::PreconditionFailed),
			}
		} else if opts.if_none_match {
			if let Some(v) = &current {
				if v.body.is_some() {
					return Err(BackendError::PreconditionFailed);
				}
			}
		}

		if should_fail {
			return Err(BackendError::Transport(anyhow::anyhow!("simulated write failure")));
		}

		let version_id = self.next_id("v");
		let etag = format!("\"{}\"", self.next_id("etag"));
		entry.versions.push(Version { version_id: version_id.clone(), etag: etag.clone(), body: Some(body) });
		Ok(PutResult { etag: etag.trim_matches('"').to_string(), version_id })
	}

	async fn head(&self, bucket: &str, key: &str) -> StoreResult<HeadResult> {
		let objects = self.objects.lock().unwrap();
		let obj = objects.get(&bk(bucket, key)).ok_or(BackendError::NotFound)?;
		let version = obj.latest().ok_or(BackendError::NotFound)?;
		if version.body.is_none() {
			return Err(BackendError::NotFound);
		}
		Ok(HeadResult {
			etag: version.etag.trim_matches('"').to_string(),
			version_id: version.version_id.clone(),
		})
	}

	async fn list_versions(
		&self,
		bucket: &str,
		prefix: &str,
		opts: ListVersionsOptions,
	) -> StoreResult<ListVersionsPage> {
		let objects = self.objects.lock().unwrap();
		let bucket_prefix = format!("{bucket}/{prefix}");
		let mut entries = Vec::new();
		for (full_key, obj) in objects.iter() {
			if !full_key.starts_with(&bucket_prefix) {
				continue;
			}
			let key = full_key[bucket.len() + 1..].to_string();
			// newest first within a key, matching S3's list-object-versions order.
			for (i, v) in obj.versions.iter().enumerate().rev() {
				entries.push((
					key.clone(),
					v.version_id.clone(),
					i + 1 == obj.versions.len(),
				));
			}
		}
		entries.sort_by(|a, b| b.1.cmp(&a.1));

		if let Some(marker) = &opts.version_id_marker {
			if let Some(pos) = entries.iter().position(|(_, v, _)| v == marker) {
				entries.drain(..=pos);
			}
		}

		let max = opts.max_keys.unwrap_or(1000) as usize;
		let next_version_id_marker =
			if entries.len() > max { Some(entries[max - 1].1.clone()) } else { None };
		entries.truncate(max);

		Ok(ListVersionsPage {
			entries: entries
				.into_iter()
				.map(|(key, version_id, is_latest)| VersionEntry { key, version_id, is_latest })
				.collect(),
			next_key_marker: None,
			next_version_id_marker,
		})
	}

	async fn list_prefix(
		&self,
		bucket: &str,
		prefix: &str,
		opts: ListPrefixOptions,
	) -> StoreResult<ListPrefixPage> {
		let objects = self.objects.lock().unwrap();
		let bucket_prefix = format!("{bucket}/{prefix}");
		let mut keys: Vec<String> = objects
			.iter()
			.filter(|(full_key, obj)| {
				full_key.starts_with(&bucket_prefix) && obj.latest().map(|v| v.body.is_some()).unwrap_or(false)
			})
			.map(|(full_key, _)| full_key[bucket.len() + 1..].to_string())
			.collect();
		keys.sort();

		if let Some(after) = &opts.start_after {
			keys.retain(|k| k.as_str() > after.as_str());
		}
		if let Some(token) = &opts.continuation_token {
			keys.retain(|k| k.as_str() > token.as_str());
		}

		let max = opts.max_keys.unwrap_or(1000) as usize;
		let next_continuation_token =
			if keys.len() > max { Some(keys[max - 1].clone()) } else { None };
		keys.truncate(max);

		Ok(ListPrefixPage { keys, next_continuation_token })
	}

	async fn delete(&self, bucket: &str, key: &str) -> StoreResult<DeleteResult> {
		let mut objects = self.objects.lock().unwrap();
		let entry = objects.entry(bk(bucket, key)).or_default();
		let version_id = self.next_id("del");
		let etag = format!("\"{}\"", self.next_id("etag"));
		entry.versions.push(Version { version_id: version_id.clone(), etag, body: None });
		Ok(DeleteResult { delete_marker_version_id: version_id })
	}

	async fn get_bucket_versioning(&self, _bucket: &str) -> StoreResult<VersioningState> {
		Ok(self.versioning)
	}
}
