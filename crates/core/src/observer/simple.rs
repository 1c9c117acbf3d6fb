use std::collections::BTreeMap;

use latchkey_protocol::{StorageState, TrafficEvent};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CaptureSlot, TrafficObserver, compile, url_matches};
use crate::credential::Credential;
use crate::error::{LoginFailure, Result};

/// Fragment name every credential shape requires.
pub const TOKEN_FIELD: &str = "token";

/// Where one credential fragment comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRule {
	pub field: String,
	/// Request/response URL prefixes the rule applies to. Empty matches every URL.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub url_prefixes: Vec<String>,
	pub source: RuleSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum RuleSource {
	/// A request header, by case-insensitive name.
	Header {
		name: String,
		#[serde(default)]
		strip_bearer: bool,
		/// Only accept values carrying a `Bearer ` scheme.
		#[serde(default)]
		require_bearer: bool,
	},
	/// First capture group of a regex over the request's `Cookie` header.
	CookiePattern { pattern: String },
	/// First capture group of a regex over a response body.
	BodyPattern { pattern: String },
	/// A non-empty string returned by evaluating `expression` in the page.
	Script { expression: String },
}

impl ExtractionRule {
	pub fn header(field: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			url_prefixes: Vec::new(),
			source: RuleSource::Header {
				name: name.into(),
				strip_bearer: false,
				require_bearer: false,
			},
		}
	}

	pub fn cookie_pattern(field: impl Into<String>, pattern: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			url_prefixes: Vec::new(),
			source: RuleSource::CookiePattern { pattern: pattern.into() },
		}
	}

	pub fn body_pattern(field: impl Into<String>, pattern: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			url_prefixes: Vec::new(),
			source: RuleSource::BodyPattern { pattern: pattern.into() },
		}
	}

	pub fn script(field: impl Into<String>, expression: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			url_prefixes: Vec::new(),
			source: RuleSource::Script {
				expression: expression.into(),
			},
		}
	}

	pub fn with_url_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.url_prefixes.push(prefix.into());
		self
	}

	/// Only accept `Bearer` values from a header rule.
	pub fn require_bearer(mut self) -> Self {
		if let RuleSource::Header { require_bearer, .. } = &mut self.source {
			*require_bearer = true;
		}
		self
	}
}

/// Cookie copied from the browser-state snapshot at finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCookie {
	pub field: String,
	pub name: String,
	/// Domain suffix the cookie must belong to.
	pub domain: String,
}

/// Which credential variant the captured fragments become.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialShape {
	#[default]
	Bearer,
	Bare,
	Composite {
		#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
		extra_headers: BTreeMap<String, String>,
	},
}

impl CredentialShape {
	fn build(&self, mut fragments: BTreeMap<String, String>) -> Option<Credential> {
		let token = fragments.remove(TOKEN_FIELD)?;
		Some(match self {
			CredentialShape::Bearer => Credential::bearer(strip_bearer(&token)),
			CredentialShape::Bare => Credential::bare(token),
			CredentialShape::Composite { extra_headers } => Credential::Composite {
				token: strip_bearer(&token).to_string(),
				extra_fields: fragments,
				extra_headers: extra_headers.clone(),
			},
		})
	}
}

#[derive(Debug)]
enum CompiledSource {
	Header {
		name: String,
		strip_bearer: bool,
		require_bearer: bool,
	},
	Cookie(Regex),
	Body(Regex),
	Script(usize),
}

#[derive(Debug)]
struct CompiledRule {
	field: String,
	url_prefixes: Vec<String>,
	source: CompiledSource,
}

/// Captures one or more fragments from traffic and completes once all are present.
#[derive(Debug)]
pub struct SimpleObserver {
	rules: Vec<CompiledRule>,
	probes: Vec<String>,
	shape: CredentialShape,
	snapshot_cookies: Vec<SnapshotCookie>,
}

impl SimpleObserver {
	pub fn new(rules: &[ExtractionRule], shape: CredentialShape, snapshot_cookies: Vec<SnapshotCookie>) -> Result<Self> {
		let mut probes = Vec::new();
		let mut compiled = Vec::with_capacity(rules.len());
		for rule in rules {
			let source = match &rule.source {
				RuleSource::Header {
					name,
					strip_bearer,
					require_bearer,
				} => CompiledSource::Header {
					name: name.to_ascii_lowercase(),
					strip_bearer: *strip_bearer,
					require_bearer: *require_bearer,
				},
				RuleSource::CookiePattern { pattern } => CompiledSource::Cookie(compile(pattern)?),
				RuleSource::BodyPattern { pattern } => CompiledSource::Body(compile(pattern)?),
				RuleSource::Script { expression } => {
					probes.push(expression.clone());
					CompiledSource::Script(probes.len() - 1)
				}
			};
			compiled.push(CompiledRule {
				field: rule.field.clone(),
				url_prefixes: rule.url_prefixes.clone(),
				source,
			});
		}
		Ok(Self {
			rules: compiled,
			probes,
			shape,
			snapshot_cookies,
		})
	}

	fn extract(rule: &CompiledRule, event: &TrafficEvent) -> Option<String> {
		if let Some(url) = event.url() {
			if !url_matches(&rule.url_prefixes, url) {
				return None;
			}
		}
		match (&rule.source, event) {
			(CompiledSource::Script(index), TrafficEvent::Script(result)) if result.probe == *index => {
				result.value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
			}
			(CompiledSource::Script(_), _) | (_, TrafficEvent::Script(_)) => None,
			(
				CompiledSource::Header {
					name,
					strip_bearer: strip,
					require_bearer,
				},
				_,
			) => {
				let value = event.request_header(name)?.trim();
				if value.is_empty() || (*require_bearer && !has_bearer_scheme(value)) {
					return None;
				}
				let value = if *strip { strip_bearer(value) } else { value };
				Some(value.to_string())
			}
			(CompiledSource::Cookie(pattern), _) => first_group(pattern, event.request_header("cookie")?),
			(CompiledSource::Body(pattern), TrafficEvent::Response(response)) => first_group(pattern, response.body.as_deref()?),
			(CompiledSource::Body(_), _) => None,
		}
	}
}

impl TrafficObserver for SimpleObserver {
	fn on_traffic(&self, event: &TrafficEvent, slot: &CaptureSlot) {
		if slot.is_complete() {
			return;
		}
		for rule in &self.rules {
			if slot.has(&rule.field) {
				continue;
			}
			if let Some(value) = Self::extract(rule, event) {
				if slot.record(&rule.field, value) {
					debug!(target = "latchkey", field = %rule.field, url = event.url().unwrap_or("<script>"), "captured fragment");
				}
			}
		}
		if self.rules.iter().all(|rule| slot.has(&rule.field)) {
			slot.mark_complete();
		}
	}

	fn probes(&self) -> &[String] {
		&self.probes
	}

	fn finalize(&self, slot: &CaptureSlot, snapshot: &StorageState) -> std::result::Result<Option<Credential>, LoginFailure> {
		let mut fragments = slot.fragments();
		for wanted in &self.snapshot_cookies {
			let cookie = snapshot
				.find_cookie(&wanted.name, &wanted.domain)
				.filter(|cookie| !cookie.value.is_empty())
				.ok_or_else(|| LoginFailure::Extraction(format!("cookie {:?} for {} not found in browser state", wanted.name, wanted.domain)))?;
			fragments.entry(wanted.field.clone()).or_insert_with(|| cookie.value.clone());
		}
		match self.shape.build(fragments) {
			Some(credential) => Ok(Some(credential)),
			None => Err(LoginFailure::NoCredentials),
		}
	}
}

const BEARER_PREFIX: &str = "bearer ";

fn has_bearer_scheme(value: &str) -> bool {
	value.len() > BEARER_PREFIX.len()
		&& value
			.get(..BEARER_PREFIX.len())
			.is_some_and(|scheme| scheme.eq_ignore_ascii_case(BEARER_PREFIX))
}

fn strip_bearer(value: &str) -> &str {
	match value.get(BEARER_PREFIX.len()..) {
		Some(rest) if has_bearer_scheme(value) => rest.trim_start(),
		_ => value,
	}
}

fn first_group(pattern: &Regex, haystack: &str) -> Option<String> {
	pattern
		.captures(haystack)
		.and_then(|captures| captures.get(1))
		.map(|m| m.as_str().to_string())
		.filter(|s| !s.is_empty())
}
