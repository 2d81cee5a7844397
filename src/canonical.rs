//! Deterministic JSON encoding used for both the hash input and the
//! stored object bodies: keys sorted lexicographically, no
//! insignificant whitespace, non-ASCII escaped, `null` fields omitted.
//!
//! `serde_json`'s default string escaping only escapes control
//! characters and the characters JSON requires; it does not
//! ASCII-escape the rest of Unicode. We match the reference
//! implementation's `ensure_ascii=True` behavior with an explicit pass
//! over the serialized bytes.

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Serializes `value` to its canonical byte form.
///
/// Caller must pass a value whose `Serialize` impl does not itself
/// introduce non-canonical structure (e.g. no `HashMap`-backed object
/// with nondeterministic key order baked in before this is called) —
/// `to_value` followed by `sort_and_escape` below fixes object key
/// order regardless, so this holds for any `Serialize` type.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
	let v = serde_json::to_value(value)
		.map_err(|e| Error::ConfigurationError(format!("failed to serialize value: {e}")))?;
	Ok(canonicalize_value(&v))
}

/// Canonicalizes an already-parsed [`Value`], e.g. a user's raw JSON
/// payload, without round-tripping through a typed struct.
pub fn canonicalize_value(value: &Value) -> Vec<u8> {
	let sorted = sort_object_keys(value);
	let compact = serde_json::to_string(&sorted).expect("Value serialization is infallible");
	ascii_escape(&compact).into_bytes()
}

/// Recursively rebuilds objects with a `BTreeMap`-equivalent key order
/// (serde_json's `Map` preserves insertion order by default; we rebuild
/// using a sorted map to get lexicographic order), and drops any key
/// whose value is `Value::Null`.
fn sort_object_keys(value: &Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut sorted = serde_json::Map::new();
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort();
			for k in keys {
				let v = &map[k];
				if v.is_null() {
					continue;
				}
				sorted.insert(k.clone(), sort_object_keys(v));
			}
			Value::Object(sorted)
		},
		Value::Array(items) => Value::Array(items.iter().map(sort_object_keys).collect()),
		other => other.clone(),
	}
}

/// Escapes every non-ASCII character in a compact JSON string as
/// `\uXXXX` (surrogate pairs for characters outside the BMP), matching
/// Python's `json.dumps(..., ensure_ascii=True)`.
fn ascii_escape(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for c in s.chars() {
		if c.is_ascii() {
			out.push(c);
		} else {
			let mut buf = [0u16; 2];
			for unit in c.encode_utf16(&mut buf) {
				out.push_str(&format!("\\u{:04x}", unit));
			}
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn sorts_keys() {
		let v = json!({"b": 1, "a": 2});
		assert_eq!(canonicalize_value(&v), br#"{"a":2,"b":1}"#.to_vec());
	}

	#[test]
	fn omits_nulls() {
		let v = json!({"a": 1, "b": null});
		assert_eq!(canonicalize_value(&v), br#"{"a":1}"#.to_vec());
	}

	#[test]
	fn escapes_non_ascii() {
		let v = json!({"name": "caf\u{e9}"});
		let bytes = canonicalize_value(&v);
		let expected = b"{\"name\":\"caf\\u00e9\"}".to_vec();
		assert_eq!(bytes, expected);
	}

	#[test]
	fn no_insignificant_whitespace() {
		let v = json!({"a": [1, 2, 3]});
		assert_eq!(canonicalize_value(&v), br#"{"a":[1,2,3]}"#.to_vec());
	}

	#[test]
	fn nested_objects_sorted_recursively() {
		let v = json!({"z": {"y": 1, "x": 2}, "a": 1});
		assert_eq!(canonicalize_value(&v), br#"{"a":1,"z":{"x":2,"y":1}}"#.to_vec());
	}
}
