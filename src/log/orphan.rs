//! The "latest orphan" cache: a small, process-wide value shared by the
//! repair pass and the read path. Plain record guarded by a mutex, no
//! queue or subscription — stale reads are tolerable by design.

use std::sync::Mutex;
use std::time::Instant;

use super::entry::LogEntry;

pub struct OrphanCache {
	inner: Mutex<OrphanState>,
}

#[derive(Clone, Default)]
struct OrphanState {
	is_orphaned: bool,
	orphan_key: Option<String>,
	orphan_entry: Option<LogEntry>,
	orphan_log_version: Option<String>,
	checked_at: Option<Instant>,
	read_only: bool,
}

impl Default for OrphanCache {
	fn default() -> Self {
		Self { inner: Mutex::new(OrphanState { checked_at: Some(Instant::now()), ..OrphanState::default() }) }
	}
}

impl OrphanCache {
	/// A freshly constructed client counts the construction moment as its
	/// last check, so `get` does not immediately re-probe the log on
	/// every single call — it waits for the configured interval, exactly
	/// as it would for any later call.
	pub fn new() -> Self {
		Self::default()
	}

	pub fn mark_repaired(&self) {
		let mut s = self.inner.lock().unwrap();
		s.is_orphaned = false;
		s.orphan_key = None;
		s.orphan_entry = None;
		s.orphan_log_version = None;
		s.checked_at = Some(Instant::now());
	}

	pub fn mark_orphaned(&self, entry: LogEntry, log_version: String) {
		let mut s = self.inner.lock().unwrap();
		s.is_orphaned = true;
		s.orphan_key = Some(entry.key.clone());
		s.orphan_entry = Some(entry);
		s.orphan_log_version = Some(log_version);
		s.checked_at = Some(Instant::now());
	}

	pub fn mark_checked(&self) {
		self.inner.lock().unwrap().checked_at = Some(Instant::now());
	}

	pub fn demote_to_read_only(&self) {
		self.inner.lock().unwrap().read_only = true;
	}

	pub fn is_read_only(&self) -> bool {
		self.inner.lock().unwrap().read_only
	}

	/// `None` means "never checked" — callers treat that as due.
	pub fn due_for_check(&self, interval: std::time::Duration) -> bool {
		let s = self.inner.lock().unwrap();
		match s.checked_at {
			Some(t) => t.elapsed() >= interval,
			None => true,
		}
	}

	pub fn for_key(&self, key: &str) -> Option<(LogEntry, String)> {
		let s = self.inner.lock().unwrap();
		if s.is_orphaned && s.orphan_key.as_deref() == Some(key) {
			s.orphan_entry.clone().zip(s.orphan_log_version.clone())
		} else {
			None
		}
	}
}
