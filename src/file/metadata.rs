//! The file extension's value type: `FileMetadata` for an active file,
//! `DeletedFileMetadata` as its tombstone. The decoder selects between
//! them by the presence of `deleted:true`, matching the wire contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
	pub s3_key: String,
	pub s3_version_id: String,
	pub content_hash: String,
	pub content_length: u64,
	pub content_type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_metadata: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletedFileMetadata {
	pub s3_key: String,
	pub deleted_version_id: String,
	pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FileValue {
	Deleted(DeletedFileMetadata),
	Active(FileMetadata),
}

impl FileValue {
	pub fn s3_key(&self) -> &str {
		match self {
			FileValue::Active(m) => &m.s3_key,
			FileValue::Deleted(m) => &m.s3_key,
		}
	}

	pub fn is_deleted(&self) -> bool {
		matches!(self, FileValue::Deleted(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_active_and_tombstone_by_shape() {
		let active = serde_json::json!({
			"s3_key": "files/doc",
			"s3_version_id": "v1",
			"content_hash": "sha256:abc",
			"content_length": 3,
			"content_type": "application/octet-stream",
		});
		let decoded: FileValue = serde_json::from_value(active).unwrap();
		assert!(matches!(decoded, FileValue::Active(_)));

		let tombstone = serde_json::json!({
			"s3_key": "files/doc",
			"deleted_version_id": "v2",
			"deleted": true,
		});
		let decoded: FileValue = serde_json::from_value(tombstone).unwrap();
		assert!(decoded.is_deleted());
	}
}
