//! Cookie and storage state types for carrying an authenticated session.
//!
//! A [`StorageState`] is the browser state snapshot written once after the
//! headful login phase and used to seed the headless follow-up browser.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// SameSite cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
	#[serde(rename = "None")]
	None,
	#[default]
	#[serde(rename = "Lax")]
	Lax,
	#[serde(rename = "Strict")]
	Strict,
}

/// A browser cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
	pub name: String,
	pub value: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub domain: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
	/// Unix timestamp in seconds (-1 means session cookie)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub http_only: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub secure: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub same_site: Option<SameSite>,
}

impl Cookie {
	/// Creates a cookie scoped to `domain`.
	pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			value: value.into(),
			domain: Some(domain.into()),
			path: None,
			expires: None,
			http_only: None,
			secure: None,
			same_site: None,
		}
	}

	/// Sets the path for the cookie.
	pub fn path(mut self, path: impl Into<String>) -> Self {
		self.path = Some(path.into());
		self
	}

	/// Sets whether the cookie is HTTP-only.
	pub fn http_only(mut self, http_only: bool) -> Self {
		self.http_only = Some(http_only);
		self
	}

	/// Sets whether the cookie requires HTTPS.
	pub fn secure(mut self, secure: bool) -> Self {
		self.secure = Some(secure);
		self
	}

	/// Returns true when the cookie domain equals `suffix` or is a subdomain of it.
	///
	/// Leading dots are ignored on both sides, so `.slack.com` matches `slack.com`.
	pub fn domain_matches(&self, suffix: &str) -> bool {
		let Some(domain) = self.domain.as_deref() else {
			return false;
		};
		let domain = domain.trim_start_matches('.');
		let suffix = suffix.trim_start_matches('.');
		domain == suffix || domain.ends_with(&format!(".{suffix}"))
	}
}

/// A localStorage entry within an origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStorageEntry {
	pub name: String,
	pub value: String,
}

/// Storage state for a single origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginState {
	pub origin: String,
	#[serde(default)]
	pub local_storage: Vec<LocalStorageEntry>,
}

/// Complete browser storage state.
///
/// Serialized in the same shape Playwright uses for `storageState`, so files
/// written by either tool can seed the other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
	#[serde(default)]
	pub cookies: Vec<Cookie>,
	#[serde(default)]
	pub origins: Vec<OriginState>,
}

impl StorageState {
	/// Creates an empty storage state.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a storage state with cookies only.
	pub fn with_cookies(cookies: Vec<Cookie>) -> Self {
		Self { cookies, origins: Vec::new() }
	}

	/// Returns true when the snapshot carries neither cookies nor storage.
	pub fn is_empty(&self) -> bool {
		self.cookies.is_empty() && self.origins.is_empty()
	}

	/// Finds the first cookie named `name` whose domain matches `domain_suffix`.
	pub fn find_cookie(&self, name: &str, domain_suffix: &str) -> Option<&Cookie> {
		self.cookies.iter().find(|cookie| cookie.name == name && cookie.domain_matches(domain_suffix))
	}

	/// Returns the localStorage value stored under `name` for `origin`.
	pub fn local_storage_item(&self, origin: &str, name: &str) -> Option<&str> {
		self.origins
			.iter()
			.find(|state| state.origin == origin)
			.and_then(|state| state.local_storage.iter().find(|entry| entry.name == name))
			.map(|entry| entry.value.as_str())
	}

	/// Loads storage state from a JSON file.
	pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
		let content = std::fs::read_to_string(path)?;
		serde_json::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
	}

	/// Saves storage state to a JSON file, creating parent directories.
	pub fn to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
		let path = path.as_ref();
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent)?;
			}
		}
		let content = serde_json::to_string_pretty(self).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
		std::fs::write(path, content)
	}
}
