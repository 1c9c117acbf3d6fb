use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	/// Message already printed; exit with the given code and nothing else.
	#[error("")]
	Exit(i32),

	#[error("Could not extract URL from curl arguments.")]
	NoUrl,

	#[error("No service matches URL: {0}")]
	NoMatchingService(String),

	#[error("Unknown service: {0}")]
	UnknownService(String),

	#[error("Login cancelled.")]
	LoginCancelled,

	#[error("failed to run {command}: {source}")]
	Spawn {
		command: String,
		#[source]
		source: std::io::Error,
	},

	#[error("credential check timed out after {0}s")]
	CheckTimeout(u64),

	#[error(transparent)]
	Latchkey(latchkey::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl From<latchkey::Error> for CliError {
	fn from(err: latchkey::Error) -> Self {
		match err {
			latchkey::Error::LoginCancelled { .. } => CliError::LoginCancelled,
			latchkey::Error::UnknownService(name) => CliError::UnknownService(name),
			other => CliError::Latchkey(other),
		}
	}
}

impl CliError {
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::Exit(code) => *code,
			_ => 1,
		}
	}

	/// Follow-up line pointing at `latchkey services`, for lookup failures.
	pub fn hint(&self) -> Option<&'static str> {
		match self {
			CliError::NoMatchingService(_) | CliError::UnknownService(_) => {
				Some("Use 'latchkey services' to see available services.")
			}
			_ => None,
		}
	}

	/// Cancellation is reported as a plain notice rather than an error.
	pub fn is_cancellation(&self) -> bool {
		matches!(self, CliError::LoginCancelled)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn engine_errors_map_to_cli_errors() {
		let cancelled: CliError = latchkey::Error::LoginCancelled { service: "slack".into() }.into();
		assert!(cancelled.is_cancellation());
		assert_eq!(cancelled.to_string(), "Login cancelled.");

		let unknown: CliError = latchkey::Error::UnknownService("nope".into()).into();
		assert_eq!(unknown.to_string(), "Unknown service: nope");
		assert!(unknown.hint().is_some());
	}

	#[test]
	fn exit_codes() {
		assert_eq!(CliError::Exit(7).exit_code(), 7);
		assert_eq!(CliError::NoUrl.exit_code(), 1);
	}
}
