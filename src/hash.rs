//! Content-hash chain: the fixed field set that participates in a log
//! entry's hash, the genesis sentinel, and single-entry / chain
//! verification.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::canonical_bytes;
use crate::error::Result;

pub const GENESIS: &str = "sha256:genesis";

/// The exact field set that participates in a log entry's hash, in the
/// order fixed by the spec: `{sequence, key, value, timestamp_ms,
/// previous_hash}`. No other field — `log_version`, `hash`,
/// `previous_key_etag` — may leak in here.
#[derive(Serialize)]
pub struct HashInput<'a> {
	pub sequence: u64,
	pub key: &'a str,
	pub value: &'a Value,
	pub timestamp_ms: i64,
	pub previous_hash: &'a str,
}

pub fn compute_hash(input: &HashInput<'_>) -> Result<String> {
	let bytes = canonical_bytes(input)?;
	Ok(hash_bytes(&bytes))
}

fn hash_bytes(bytes: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(bytes);
	format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Recomputes the hash over raw JSON fields, used by orphan repair and
/// chain verification — paths that must never invoke a user decoder
/// (a narrow decoder on a wide writer's entry must not be able to
/// corrupt or fail this).
pub fn compute_hash_raw(
	sequence: u64,
	key: &str,
	value: &Value,
	timestamp_ms: i64,
	previous_hash: &str,
) -> Result<String> {
	compute_hash(&HashInput { sequence, key, value, timestamp_ms, previous_hash })
}

/// Verifies a chain newest-first: each entry verifies individually, and
/// for every adjacent pair `(newer, older)`, `newer.previous_hash ==
/// older.hash`. The oldest entry in the slice must chain to genesis
/// only when it is truly the first entry (`sequence == 0`); a
/// truncated window (via `limit`) is allowed to bottom out elsewhere.
pub fn verify_chain_raw(entries_newest_first: &[RawHashable<'_>]) -> bool {
	for w in entries_newest_first.windows(2) {
		let (newer, older) = (&w[0], &w[1]);
		if newer.previous_hash != older.hash {
			return false;
		}
	}
	for e in entries_newest_first {
		let recomputed =
			match compute_hash_raw(e.sequence, e.key, e.value, e.timestamp_ms, e.previous_hash) {
				Ok(h) => h,
				Err(_) => return false,
			};
		if recomputed != e.hash {
			return false;
		}
	}
	if let Some(oldest) = entries_newest_first.last() {
		if oldest.sequence == 0 && oldest.previous_hash != GENESIS {
			return false;
		}
	}
	true
}

pub struct RawHashable<'a> {
	pub sequence: u64,
	pub key: &'a str,
	pub value: &'a Value,
	pub timestamp_ms: i64,
	pub previous_hash: &'a str,
	pub hash: &'a str,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn genesis_entry_hash_is_deterministic() {
		let value = json!({"temp": 20});
		let h1 = compute_hash_raw(0, "sensor-01", &value, 1_700_000_000_000, GENESIS).unwrap();
		let h2 = compute_hash_raw(0, "sensor-01", &value, 1_700_000_000_000, GENESIS).unwrap();
		assert_eq!(h1, h2);
		assert!(h1.starts_with("sha256:"));
		assert_eq!(h1.len(), "sha256:".len() + 64);
	}

	#[test]
	fn different_timestamp_changes_hash() {
		let value = json!({"temp": 20});
		let h1 = compute_hash_raw(0, "k", &value, 1, GENESIS).unwrap();
		let h2 = compute_hash_raw(0, "k", &value, 2, GENESIS).unwrap();
		assert_ne!(h1, h2);
	}

	#[test]
	fn verify_chain_detects_break() {
		let v = json!(1);
		let h0 = compute_hash_raw(0, "a", &v, 1, GENESIS).unwrap();
		let h1 = compute_hash_raw(1, "a", &v, 2, &h0).unwrap();
		let entries = vec![
			RawHashable { sequence: 1, key: "a", value: &v, timestamp_ms: 2, previous_hash: &h0, hash: &h1 },
			RawHashable { sequence: 0, key: "a", value: &v, timestamp_ms: 1, previous_hash: GENESIS, hash: &h0 },
		];
		assert!(verify_chain_raw(&entries));

		let tampered_hash = "sha256:0000000000000000000000000000000000000000000000000000000000000000".to_string();
		let entries_broken = vec![
			RawHashable { sequence: 1, key: "a", value: &v, timestamp_ms: 2, previous_hash: &tampered_hash, hash: &h1 },
			RawHashable { sequence: 0, key: "a", value: &v, timestamp_ms: 1, previous_hash: GENESIS, hash: &h0 },
		];
		assert!(!verify_chain_raw(&entries_broken));
	}
}
