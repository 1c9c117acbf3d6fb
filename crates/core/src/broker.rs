use tracing::info;

use crate::credential::Credential;
use crate::error::Result;
use crate::registry::Registry;
use crate::service::ServiceDescriptor;
use crate::session::LoginEngine;
use crate::store::CredentialStore;

/// Where a credential handed out by the broker came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
	Store,
	Login,
}

/// Resolves services and hands out credentials, logging in when needed.
///
/// The store is only written after a successful login; cancelled and failed
/// attempts leave it untouched.
#[derive(Debug)]
pub struct CredentialBroker {
	registry: Registry,
	store: Option<CredentialStore>,
	engine: LoginEngine,
}

impl CredentialBroker {
	pub fn new(registry: Registry, store: Option<CredentialStore>, engine: LoginEngine) -> Self {
		Self { registry, store, engine }
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn store(&self) -> Option<&CredentialStore> {
		self.store.as_ref()
	}

	pub fn engine(&self) -> &LoginEngine {
		&self.engine
	}

	pub fn resolve_url(&self, url: &str) -> Option<&ServiceDescriptor> {
		self.registry.by_url(url)
	}

	/// Stored credential for `service`, if any.
	pub fn stored(&self, service: &str) -> Result<Option<Credential>> {
		self.registry.require(service)?;
		match &self.store {
			Some(store) => store.get(service),
			None => Ok(None),
		}
	}

	/// Returns credentials for `service`, running a login when none are stored
	/// or `force_login` is set.
	pub async fn credentials_for(&self, service: &str, force_login: bool) -> Result<(Credential, CredentialSource)> {
		let descriptor = self.registry.require(service)?;
		if !force_login {
			if let Some(credential) = self.stored(service)? {
				return Ok((credential, CredentialSource::Store));
			}
		}

		let credential = self.engine.login(descriptor).await?;
		if let Some(store) = &self.store {
			store.save(service, &credential)?;
			info!(target = "latchkey", service, "stored new credentials");
		}
		Ok((credential, CredentialSource::Login))
	}

	/// Removes stored credentials for `service`. Returns whether any existed.
	pub fn clear(&self, service: &str) -> Result<bool> {
		self.registry.require(service)?;
		match &self.store {
			Some(store) => store.delete(service),
			None => Ok(false),
		}
	}

	/// Removes the whole store file. Returns whether it existed.
	pub fn clear_all(&self) -> Result<bool> {
		match &self.store {
			Some(store) => store.clear_all(),
			None => Ok(false),
		}
	}
}
