//! Runtime configuration.
//!
//! Layered lowest precedence first: built-in defaults, an optional JSON file
//! (`LATCHKEY_CONFIG`, else `<config dir>/latchkey/config.json`), then the
//! `LATCHKEY_STORE` and `LATCHKEY_BROWSER_STATE` environment variables.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::followup::FollowupSettings;
use crate::session::EngineSettings;

pub const CONFIG_ENV: &str = "LATCHKEY_CONFIG";
pub const STORE_ENV: &str = "LATCHKEY_STORE";
pub const BROWSER_STATE_ENV: &str = "LATCHKEY_BROWSER_STATE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
	pub min: u64,
	pub max: u64,
}

impl Default for DelayRange {
	fn default() -> Self {
		Self { min: 30, max: 100 }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	/// Credential store file. Credentials are not persisted when unset.
	pub store_path: Option<PathBuf>,
	/// Browser-state snapshot file. The snapshot stays in memory when unset.
	pub browser_state_path: Option<PathBuf>,
	pub poll_interval_ms: u64,
	pub followup_step_timeout_ms: u64,
	pub typing_delay_ms: DelayRange,
	pub curl_command: String,
	/// Extra service catalog appended after the built-in services.
	pub services_path: Option<PathBuf>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			store_path: None,
			browser_state_path: None,
			poll_interval_ms: 100,
			followup_step_timeout_ms: 8000,
			typing_delay_ms: DelayRange::default(),
			curl_command: "curl".to_string(),
			services_path: None,
		}
	}
}

impl Config {
	/// Loads configuration from the process environment.
	pub fn load() -> Result<Self> {
		Self::load_with(|key| std::env::var(key).ok())
	}

	/// Loads configuration using `lookup` for environment variables.
	pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let explicit = lookup(CONFIG_ENV).filter(|v| !v.is_empty()).map(|v| expand_home(&v));
		let mut config = match (&explicit, default_config_path()) {
			(Some(path), _) => Self::from_file(path)?,
			(None, Some(path)) if path.exists() => Self::from_file(&path)?,
			_ => Self::default(),
		};
		config.apply_env(lookup);
		config.validate()?;
		Ok(config)
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let content = fs::read_to_string(path).map_err(|e| match e.kind() {
			io::ErrorKind::NotFound => Error::Config(format!("config file {} does not exist", path.display())),
			_ => Error::Config(format!("cannot read {}: {e}", path.display())),
		})?;
		let mut config: Config =
			serde_json::from_str(&content).map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))?;
		debug!(target = "latchkey", path = %path.display(), "loaded config file");
		config.expand_paths();
		Ok(config)
	}

	/// Overrides file settings with non-empty environment values.
	pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
		if let Some(store) = lookup(STORE_ENV).filter(|v| !v.is_empty()) {
			self.store_path = Some(expand_home(&store));
		}
		if let Some(state) = lookup(BROWSER_STATE_ENV).filter(|v| !v.is_empty()) {
			self.browser_state_path = Some(expand_home(&state));
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.poll_interval_ms == 0 {
			return Err(Error::Config("pollIntervalMs must be positive".into()));
		}
		if self.followup_step_timeout_ms == 0 {
			return Err(Error::Config("followupStepTimeoutMs must be positive".into()));
		}
		if self.typing_delay_ms.min > self.typing_delay_ms.max {
			return Err(Error::Config(format!(
				"typingDelayMs.min ({}) exceeds max ({})",
				self.typing_delay_ms.min, self.typing_delay_ms.max
			)));
		}
		if self.curl_command.trim().is_empty() {
			return Err(Error::Config("curlCommand must not be empty".into()));
		}
		Ok(())
	}

	pub fn engine_settings(&self) -> EngineSettings {
		EngineSettings {
			poll_interval: Duration::from_millis(self.poll_interval_ms),
			browser_state_path: self.browser_state_path.clone(),
			followup: self.followup_settings(),
		}
	}

	pub fn followup_settings(&self) -> FollowupSettings {
		FollowupSettings {
			step_timeout: Duration::from_millis(self.followup_step_timeout_ms),
			typing_delay_ms: (self.typing_delay_ms.min, self.typing_delay_ms.max),
		}
	}

	fn expand_paths(&mut self) {
		for path in [&mut self.store_path, &mut self.browser_state_path, &mut self.services_path]
			.into_iter()
			.flatten()
		{
			if let Some(raw) = path.to_str() {
				*path = expand_home(raw);
			}
		}
	}
}

/// `<config dir>/latchkey/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join("latchkey").join("config.json"))
}

/// Expands a leading `~` to the home directory.
pub fn expand_home(raw: &str) -> PathBuf {
	let rest = match raw.strip_prefix('~') {
		Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
		_ => return PathBuf::from(raw),
	};
	match dirs::home_dir() {
		Some(home) if rest.is_empty() => home,
		Some(home) => home.join(rest),
		None => PathBuf::from(raw),
	}
}
