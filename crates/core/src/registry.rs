use std::collections::HashSet;

use crate::catalog;
use crate::error::{Error, Result};
use crate::service::ServiceDescriptor;

/// Ordered, immutable collection of service descriptors.
///
/// URL lookups are first-registered-wins, so more specific prefixes must be
/// registered before more general ones.
#[derive(Debug, Clone)]
pub struct Registry {
	services: Vec<ServiceDescriptor>,
}

impl Registry {
	/// Builds a registry, rejecting duplicate names.
	pub fn new(services: Vec<ServiceDescriptor>) -> Result<Self> {
		let mut seen = HashSet::new();
		for service in &services {
			if !seen.insert(service.name.as_str()) {
				return Err(Error::Config(format!("service {:?} is registered twice", service.name)));
			}
		}
		Ok(Self { services })
	}

	/// Registry over the built-in catalog.
	pub fn builtin() -> Self {
		Self {
			services: catalog::builtin_services(),
		}
	}

	/// Appends `extra` after the existing services.
	pub fn with_additional(self, extra: Vec<ServiceDescriptor>) -> Result<Self> {
		let mut services = self.services;
		services.extend(extra);
		Self::new(services)
	}

	pub fn by_name(&self, name: &str) -> Option<&ServiceDescriptor> {
		self.services.iter().find(|service| service.name == name)
	}

	pub fn by_url(&self, url: &str) -> Option<&ServiceDescriptor> {
		self.services.iter().find(|service| service.matches_url(url))
	}

	pub fn require(&self, name: &str) -> Result<&ServiceDescriptor> {
		self.by_name(name).ok_or_else(|| Error::UnknownService(name.to_string()))
	}

	pub fn services(&self) -> &[ServiceDescriptor] {
		&self.services
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.services.iter().map(|service| service.name.as_str())
	}
}
