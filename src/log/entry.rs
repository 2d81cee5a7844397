//! The wire shapes for `_log.json` and `keys/<key>.json`, and the
//! typed `Entry` returned at the API boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of one version of the log object. Raw JSON `value`; the user
/// codec is applied only when building an [`Entry`] at the read
/// boundary, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
	pub sequence: u64,
	pub key: String,
	pub value: Value,
	pub timestamp_ms: i64,
	pub hash: String,
	pub previous_hash: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub previous_version_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub previous_key_object_etag: Option<String>,
}

/// Body of `keys/<key>.json`. Intentionally omits `previous_version_id`
/// and `previous_key_object_etag` — those are log-internal bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMirror {
	pub sequence: u64,
	pub key: String,
	pub value: Value,
	pub timestamp_ms: i64,
	pub log_version_id: String,
	pub hash: String,
	pub previous_hash: String,
}

impl LogEntry {
	pub fn to_key_mirror(&self, log_version_id: &str) -> KeyMirror {
		KeyMirror {
			sequence: self.sequence,
			key: self.key.clone(),
			value: self.value.clone(),
			timestamp_ms: self.timestamp_ms,
			log_version_id: log_version_id.to_string(),
			hash: self.hash.clone(),
			previous_hash: self.previous_hash.clone(),
		}
	}
}

/// A decoded entry returned at the public API boundary. Generic over
/// the user's value type; `value` here has been through the user's
/// decoder, unlike [`LogEntry::value`] / [`KeyMirror::value`].
#[derive(Debug, Clone)]
pub struct Entry<V> {
	pub key: String,
	pub value: V,
	pub sequence: u64,
	pub timestamp_ms: i64,
	pub hash: String,
	pub previous_hash: String,
	pub log_version: Option<String>,
	pub previous_log_version: Option<String>,
	/// The mirror's etag after this write's phase 2, or the etag the
	/// mirror already carried at read time. `None` when phase 2 was
	/// skipped, failed, or this `Entry` was read rather than written.
	pub previous_key_object_etag: Option<String>,
}

impl<V> Entry<V> {
	pub fn map_value<W>(self, f: impl FnOnce(V) -> W) -> Entry<W> {
		Entry {
			key: self.key,
			value: f(self.value),
			sequence: self.sequence,
			timestamp_ms: self.timestamp_ms,
			hash: self.hash,
			previous_hash: self.previous_hash,
			log_version: self.log_version,
			previous_log_version: self.previous_log_version,
			previous_key_object_etag: self.previous_key_object_etag,
		}
	}
}
