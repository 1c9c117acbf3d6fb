use serde::{Deserialize, Serialize};

use crate::check::CredentialCheck;
use crate::followup::FollowupSpec;
use crate::observer::ObserverSpec;

/// Static configuration for one service. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
	pub name: String,
	pub login_url: String,
	/// Ordered prefixes of API URLs this service authenticates.
	pub api_url_prefixes: Vec<String>,
	/// Shown to the user on an interstitial page before navigating to `login_url`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub instructions: Option<Vec<String>>,
	pub observer: ObserverSpec,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub followup: Option<FollowupSpec>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub check: Option<CredentialCheck>,
}

impl ServiceDescriptor {
	pub fn new(name: impl Into<String>, login_url: impl Into<String>, observer: ObserverSpec) -> Self {
		Self {
			name: name.into(),
			login_url: login_url.into(),
			api_url_prefixes: Vec::new(),
			instructions: None,
			observer,
			followup: None,
			check: None,
		}
	}

	pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.api_url_prefixes.push(prefix.into());
		self
	}

	pub fn instructions<I, S>(mut self, lines: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.instructions = Some(lines.into_iter().map(Into::into).collect());
		self
	}

	pub fn followup(mut self, followup: FollowupSpec) -> Self {
		self.followup = Some(followup);
		self
	}

	pub fn check(mut self, check: CredentialCheck) -> Self {
		self.check = Some(check);
		self
	}

	/// Returns the first API prefix `url` starts with.
	pub fn matching_prefix(&self, url: &str) -> Option<&str> {
		self.api_url_prefixes
			.iter()
			.map(String::as_str)
			.find(|prefix| url.starts_with(prefix))
	}

	pub fn matches_url(&self, url: &str) -> bool {
		self.matching_prefix(url).is_some()
	}

	pub fn requires_followup(&self) -> bool {
		self.followup.is_some()
	}

	/// Instructions to show, treating an empty list as none.
	pub fn instruction_lines(&self) -> Option<&[String]> {
		self.instructions.as_deref().filter(|lines| !lines.is_empty())
	}
}
