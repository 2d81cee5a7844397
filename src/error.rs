//! Error taxonomy for the store, mirroring the kinds in the design doc's
//! error handling section. One variant per externally-visible failure
//! mode; conditional-mismatch conflicts inside the retry loop never reach
//! this type because they are recovered locally.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("key or log version not found: {0}")]
	NotFound(String),

	#[error("client is read-only")]
	ReadOnly,

	#[error("retry budget ({attempts}) exhausted on {op}: {source}")]
	RetryBudgetExhausted {
		op: &'static str,
		attempts: u32,
		#[source]
		source: Box<Error>,
	},

	#[error("configuration error: {0}")]
	ConfigurationError(String),

	#[error("integrity error: {0}")]
	IntegrityError(String),

	#[error("file is deleted: {0}")]
	FileDeleted(String),

	#[error("key is orphaned: {0}")]
	Orphaned(String),

	#[error("backend error: {0}")]
	BackendError(#[from] BackendError),
}

impl Error {
	pub fn is_precondition_failed(&self) -> bool {
		matches!(self, Error::BackendError(BackendError::PreconditionFailed))
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, Error::NotFound(_) | Error::BackendError(BackendError::NotFound))
	}

	pub fn is_access_denied(&self) -> bool {
		matches!(self, Error::BackendError(BackendError::AccessDenied))
	}
}

/// Errors surfaced by the object-store adapter. Kept distinct from
/// [`Error`] so the log engine can match on `PreconditionFailed` without
/// the ambiguity of a `NotFound` that could otherwise mean either "no
/// mirror" or "no log object".
#[derive(Error, Debug)]
pub enum BackendError {
	#[error("object not found")]
	NotFound,

	#[error("conditional write precondition failed")]
	PreconditionFailed,

	#[error("access denied")]
	AccessDenied,

	#[error("backend did not return a version id (versioning disabled?)")]
	MissingVersionId,

	#[error("transport or SDK error: {0}")]
	Transport(#[from] anyhow::Error),
}
