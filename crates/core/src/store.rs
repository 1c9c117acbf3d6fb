//! JSON-backed credential store keyed by service name.
//!
//! The whole document is read, modified, and rewritten on every mutation.
//! Writers in separate processes are not coordinated; the last rename wins.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::credential::Credential;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct CredentialStore {
	path: PathBuf,
}

impl CredentialStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Loads and decodes the entry for `service`.
	///
	/// Returns `Ok(None)` when the file or the entry is absent. An entry whose
	/// discriminator is missing or unknown is a [`Error::StoreDecode`].
	pub fn get(&self, service: &str) -> Result<Option<Credential>> {
		let document = self.load()?;
		match document.get(service) {
			None => Ok(None),
			Some(entry) => Credential::decode(entry).map(Some).map_err(|reason| Error::StoreDecode {
				key: service.to_string(),
				reason,
			}),
		}
	}

	/// Replaces the entry for `service`, leaving every other key untouched.
	pub fn save(&self, service: &str, credential: &Credential) -> Result<()> {
		let mut document = self.load()?;
		document.insert(service.to_string(), credential.encode());
		self.write(&document)?;
		debug!(target = "latchkey", service, path = %self.path.display(), "saved credentials");
		Ok(())
	}

	/// Removes the entry for `service`. Returns whether one existed.
	///
	/// The file is not rewritten when nothing was removed.
	pub fn delete(&self, service: &str) -> Result<bool> {
		let mut document = self.load()?;
		if document.remove(service).is_none() {
			return Ok(false);
		}
		self.write(&document)?;
		debug!(target = "latchkey", service, "deleted credentials");
		Ok(true)
	}

	/// Top-level keys in document order, including ones that do not decode.
	pub fn service_names(&self) -> Result<Vec<String>> {
		Ok(self.load()?.keys().cloned().collect())
	}

	/// Removes the store file. Returns whether it existed.
	pub fn clear_all(&self) -> Result<bool> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(Error::store_io(&self.path, e)),
		}
	}

	fn load(&self) -> Result<Map<String, Value>> {
		let content = match fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
			Err(e) => return Err(Error::store_io(&self.path, e)),
		};
		if content.trim().is_empty() {
			return Ok(Map::new());
		}
		match serde_json::from_str::<Value>(&content) {
			Ok(Value::Object(map)) => Ok(map),
			Ok(other) => Err(Error::StoreCorrupt {
				path: self.path.clone(),
				reason: format!("expected a JSON object at the top level, found {}", json_kind(&other)),
			}),
			Err(e) => Err(Error::StoreCorrupt {
				path: self.path.clone(),
				reason: e.to_string(),
			}),
		}
	}

	/// Writes to a sibling temp file and renames it over the store.
	fn write(&self, document: &Map<String, Value>) -> Result<()> {
		let parent = match self.path.parent() {
			Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
			_ => PathBuf::from("."),
		};
		fs::create_dir_all(&parent).map_err(|e| Error::store_io(&parent, e))?;

		let content = serde_json::to_string_pretty(document)?;
		let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| Error::store_io(&parent, e))?;
		temp.write_all(content.as_bytes())
			.and_then(|()| temp.flush())
			.map_err(|e| Error::store_io(temp.path(), e))?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o600))
				.map_err(|e| Error::store_io(temp.path(), e))?;
		}

		temp.persist(&self.path).map_err(|e| Error::store_io(&self.path, e.error))?;
		Ok(())
	}
}

fn json_kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "a boolean",
		Value::Number(_) => "a number",
		Value::String(_) => "a string",
		Value::Array(_) => "an array",
		Value::Object(_) => "an object",
	}
}
