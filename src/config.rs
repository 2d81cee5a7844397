//! Configuration surface, loaded the way the engine loads its own
//! settings: a TOML file via the `config` crate, overridable by
//! environment variables, validated once at construction.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
	pub bucket: String,
	pub region: String,
	pub prefix: String,
	pub kms_key_id: Option<String>,
	#[serde(default = "default_repair_interval_ms")]
	pub repair_check_interval_ms: u64,
	#[serde(default)]
	pub read_only: bool,
	#[serde(default)]
	pub overrides: Overrides,
	#[serde(default)]
	pub files: Option<FileExtensionSettings>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Overrides {
	pub endpoint_url: Option<String>,
	pub credentials: Option<Credentials>,
	#[serde(default)]
	pub force_path_style: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
	Static { access_key_id: String, secret_access_key: String, session_token: Option<String> },
	/// Resolved at session creation via the ambient async provider chain
	/// (environment, profile, IMDS, web identity).
	Async,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileExtensionSettings {
	pub bucket: Option<String>,
	pub prefix: Option<String>,
	pub kms_key_id: Option<String>,
	#[serde(default = "default_true")]
	pub validate_access: bool,
	#[serde(default = "default_true")]
	pub validate_versioning: bool,
}

fn default_repair_interval_ms() -> u64 {
	300_000
}

fn default_true() -> bool {
	true
}

impl Settings {
	/// Loads settings from `path`, then applies `IMMUKV_`-prefixed
	/// environment overrides (e.g. `IMMUKV_BUCKET`, `IMMUKV_READ_ONLY`),
	/// following the engine's `Settings::new` shape.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let builder = config::Config::builder()
			.add_source(config::File::from(path.as_ref()))
			.add_source(config::Environment::with_prefix("IMMUKV").separator("__"));
		let settings: Settings = builder
			.build()
			.map_err(|e| Error::ConfigurationError(e.to_string()))?
			.try_deserialize()
			.map_err(|e| Error::ConfigurationError(e.to_string()))?;
		settings.validate()?;
		Ok(settings)
	}

	pub fn validate(&self) -> Result<()> {
		if self.bucket.is_empty() {
			return Err(Error::ConfigurationError("bucket must not be empty".into()));
		}
		if self.region.is_empty() {
			return Err(Error::ConfigurationError("region must not be empty".into()));
		}
		if !self.prefix.is_empty() && !self.prefix.ends_with('/') {
			return Err(Error::ConfigurationError("prefix must end with '/'".into()));
		}
		Ok(())
	}

	pub fn log_object_key(&self) -> String {
		format!("{}_log.json", self.prefix)
	}

	pub fn key_mirror_path(&self, key: &str) -> String {
		format!("{}keys/{}.json", self.prefix, key)
	}

	pub fn key_mirror_prefix(&self) -> String {
		format!("{}keys/", self.prefix)
	}

	/// Default file prefix when the extension shares the log's bucket:
	/// `<log_prefix>files/`.
	pub fn default_file_prefix(&self) -> String {
		format!("{}files/", self.prefix)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_prefix_without_trailing_slash() {
		let s = Settings {
			bucket: "b".into(),
			region: "us-east-1".into(),
			prefix: "audit".into(),
			kms_key_id: None,
			repair_check_interval_ms: 300_000,
			read_only: false,
			overrides: Overrides::default(),
			files: None,
		};
		assert!(s.validate().is_err());
	}

	#[test]
	fn paths_are_prefixed() {
		let s = Settings {
			bucket: "b".into(),
			region: "us-east-1".into(),
			prefix: "audit/".into(),
			kms_key_id: None,
			repair_check_interval_ms: 300_000,
			read_only: false,
			overrides: Overrides::default(),
			files: None,
		};
		assert_eq!(s.log_object_key(), "audit/_log.json");
		assert_eq!(s.key_mirror_path("k"), "audit/keys/k.json");
		assert_eq!(s.default_file_prefix(), "audit/files/");
	}
}
