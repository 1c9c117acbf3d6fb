use std::path::PathBuf;

use thiserror::Error;

use crate::driver::DriverError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// The user closed the browser before login was detected.
	#[error("login to {service} was cancelled because the browser was closed")]
	LoginCancelled { service: String },

	#[error("login to {service} failed: {reason}")]
	LoginFailed {
		service: String,
		#[source]
		reason: LoginFailure,
	},

	/// A stored entry has a missing, unknown, or malformed discriminator.
	#[error("credential store entry {key:?} could not be decoded: {reason}")]
	StoreDecode { key: String, reason: String },

	#[error("credential store {} is not valid JSON: {reason}", path.display())]
	StoreCorrupt { path: PathBuf, reason: String },

	#[error("credential store {} is not accessible", path.display())]
	StoreIo {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("browser error: {0}")]
	Browser(#[from] DriverError),

	#[error("unknown service: {0}")]
	UnknownService(String),

	#[error("a login session for {0} is already active")]
	SessionActive(String),

	#[error("configuration error: {0}")]
	Config(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

/// Why a detected login could not be turned into a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginFailure {
	#[error("login completed but no credentials were extracted")]
	NoCredentials,

	/// Expected data could not be located in traffic, storage, or the DOM.
	#[error("credential extraction failed: {0}")]
	Extraction(String),

	#[error("follow-up step `{step}` failed: {reason}")]
	Followup { step: String, reason: String },
}

impl Error {
	pub(crate) fn login_failed(service: &str, reason: LoginFailure) -> Self {
		Error::LoginFailed {
			service: service.to_string(),
			reason,
		}
	}

	pub(crate) fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Error::StoreIo { path: path.into(), source }
	}

	/// Returns true when the user cancelled the login by closing the browser.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Error::LoginCancelled { .. })
	}

	/// Returns the failure detail for [`Error::LoginFailed`].
	pub fn login_failure(&self) -> Option<&LoginFailure> {
		match self {
			Error::LoginFailed { reason, .. } => Some(reason),
			_ => None,
		}
	}

	/// Returns true for the credential-extraction subtype of a failed login.
	pub fn is_extraction_failure(&self) -> bool {
		matches!(self.login_failure(), Some(LoginFailure::Extraction(_)))
	}
}
