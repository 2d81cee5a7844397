//! The literal end-to-end scenarios the protocol is required to
//! satisfy, exercised against the in-memory fake adapter.

use std::sync::Arc;

use immukv::store::fake::FakeObjectStore;
use immukv::{Entry, FileValue, LogEngine, Settings};
use serde_json::{json, Value};

fn settings() -> Settings {
	Settings {
		bucket: "audit-bucket".into(),
		region: "us-east-1".into(),
		prefix: "".into(),
		kms_key_id: None,
		repair_check_interval_ms: 0,
		read_only: false,
		overrides: immukv::config::Overrides::default(),
		files: None,
	}
}

fn engine(store: Arc<FakeObjectStore>) -> LogEngine<Value> {
	LogEngine::new(store, settings())
}

#[tokio::test]
async fn scenario_1_genesis_write() {
	let store = Arc::new(FakeObjectStore::new());
	let engine = engine(store);

	let entry = engine.set("sensor-01", json!({"temp": 20})).await.unwrap();
	assert_eq!(entry.sequence, 0);
	assert_eq!(entry.previous_hash, immukv::hash::GENESIS);
	assert!(entry.previous_log_version.is_none());

	let got = engine.get("sensor-01").await.unwrap();
	assert_eq!(got.value, json!({"temp": 20}));
	assert_eq!(got.log_version.as_deref(), entry.log_version.as_deref());
	assert!(engine.verify_chain(None).await.unwrap());
}

#[tokio::test]
async fn scenario_2_chain_integrity_across_three_writes() {
	let store = Arc::new(FakeObjectStore::new());
	let engine = engine(store);

	let e0 = engine.set("a", json!(1)).await.unwrap();
	let e1 = engine.set("b", json!(2)).await.unwrap();
	let e2 = engine.set("a", json!(3)).await.unwrap();

	assert_eq!(e0.sequence, 0);
	assert_eq!(e1.sequence, 1);
	assert_eq!(e2.sequence, 2);
	assert_eq!(e0.previous_hash, immukv::hash::GENESIS);
	assert_eq!(e1.previous_hash, e0.hash);
	assert_eq!(e2.previous_hash, e1.hash);

	let (history, _) = engine.history("a", None, None).await.unwrap();
	assert_eq!(history.len(), 2);
	assert_eq!(history[0].value, json!(3));
	assert_eq!(history[1].value, json!(1));
}

#[tokio::test]
async fn scenario_3_optimistic_locking_race() {
	let store = Arc::new(FakeObjectStore::new());
	let engine = Arc::new(engine(store));

	let e1 = engine.clone();
	let e2 = engine.clone();
	let (r1, r2) = tokio::join!(
		tokio::spawn(async move { e1.set("k", json!("X")).await }),
		tokio::spawn(async move { e2.set("k", json!("Y")).await }),
	);
	let r1 = r1.unwrap().unwrap();
	let r2 = r2.unwrap().unwrap();

	let mut sequences = vec![r1.sequence, r2.sequence];
	sequences.sort();
	assert_eq!(sequences, vec![0, 1]);

	let keys = engine.list_keys(None, None, None).await.unwrap();
	assert_eq!(keys, vec!["k"]);

	let (history, _) = engine.history("k", None, None).await.unwrap();
	assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn scenario_4_orphan_repair() {
	let store = Arc::new(FakeObjectStore::new());

	let mut no_repair_settings = settings();
	no_repair_settings.repair_check_interval_ms = 10_000_000;
	let no_repair = LogEngine::<Value>::new(store.clone(), no_repair_settings);

	store.fail_next_put("keys/x.json");
	no_repair.set("x", json!(42)).await.unwrap();

	// repair disabled for this client: NotFound.
	assert!(no_repair.get("x").await.unwrap_err().is_not_found());

	let mut repair_settings = settings();
	repair_settings.repair_check_interval_ms = 0;
	let with_repair = LogEngine::<Value>::new(store.clone(), repair_settings);
	let repaired = with_repair.get("x").await.unwrap();
	assert_eq!(repaired.value, json!(42));

	// subsequent get without repair still returns it now that it's fixed.
	let again = no_repair.get("x").await.unwrap();
	assert_eq!(again.value, json!(42));
}

#[tokio::test]
async fn scenario_5_file_round_trip_and_deletion() {
	use bytes::Bytes;
	use futures_util::StreamExt;
	use immukv::file::{FileStore, GetFileOptions, SetFileOptions};
	use sha2::{Digest, Sha256};

	let store = Arc::new(FakeObjectStore::new());
	let log_settings = settings();
	let files = FileStore::new(store.clone(), &log_settings, None);

	let payload: Vec<u8> = (0..128 * 1024).map(|i| (i % 251) as u8).collect();
	let expected_hash = {
		let mut h = Sha256::new();
		h.update(&payload);
		format!("sha256:{}", hex::encode(h.finalize()))
	};

	let written = files.set_file("doc", Bytes::from(payload.clone()), SetFileOptions::default()).await.unwrap();
	let FileValue::Active(meta) = &written.value else { panic!("expected active metadata") };
	assert_eq!(meta.content_hash, expected_hash);

	let (_, stream) = files.get_file("doc", GetFileOptions::default()).await.unwrap();
	tokio::pin!(stream);
	let mut got = Vec::new();
	while let Some(chunk) = stream.next().await {
		got.extend_from_slice(&chunk.unwrap());
	}
	assert_eq!(got, payload);

	let active_log_version = written.log_version.clone().unwrap();

	files.delete_file("doc").await.unwrap();
	let after_delete = files.get_file("doc", GetFileOptions::default()).await;
	assert!(matches!(after_delete, Err(immukv::Error::FileDeleted(_))));

	let (history, _) = files.history("doc", None, None).await.unwrap();
	assert_eq!(history.len(), 2);
	assert!(history[0].value.is_deleted());
	assert!(!history[1].value.is_deleted());

	let (historical_entry, stream) = files
		.get_file("doc", GetFileOptions { version_id: Some(active_log_version) })
		.await
		.unwrap();
	tokio::pin!(stream);
	let mut got_again = Vec::new();
	while let Some(chunk) = stream.next().await {
		got_again.extend_from_slice(&chunk.unwrap());
	}
	assert_eq!(got_again, payload);
	assert!(files.verify_file(&historical_entry).await.unwrap());
}

#[tokio::test]
async fn scenario_6_cross_codec_resilience() {
	#[derive(serde::Serialize, serde::Deserialize, Clone)]
	struct Narrow {
		temp: f64,
	}

	let store = Arc::new(FakeObjectStore::new());
	let wide = engine(store.clone());
	wide.set("cfg", json!({"mode": "prod", "debug": false})).await.unwrap();

	let narrow: LogEngine<Narrow> = LogEngine::new(store, settings());
	let written = narrow.set("sensor", Narrow { temp: 22.5 }).await.unwrap();
	assert_eq!(written.sequence, 1);

	// narrow's pre-flight walked past the wide entry without decoding it.
	assert!(narrow.verify_chain(None).await.unwrap());
}

#[tokio::test]
async fn verify_is_total_and_detects_tampering() {
	let store = Arc::new(FakeObjectStore::new());
	let engine = engine(store);
	let entry = engine.set("a", json!(1)).await.unwrap();
	assert!(engine.verify(&entry));

	let tampered = Entry { value: json!(2), ..entry };
	assert!(!engine.verify(&tampered));
}
