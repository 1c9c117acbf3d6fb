use latchkey_protocol::{StorageState, TrafficEvent};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::{CaptureSlot, TrafficObserver};
use crate::credential::Credential;
use crate::error::LoginFailure;

/// Condition signalling that the user is logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum LoginIndicator {
	/// A response for exactly `url` arrives with `status`.
	ResponseStatus { url: String, status: u16 },
	/// A request carries any of the cookies in `names` with a value other
	/// than `sentinel`.
	Cookie {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		url_prefix: Option<String>,
		#[serde(alias = "name", deserialize_with = "one_or_many")]
		names: Vec<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		sentinel: Option<String>,
	},
	/// A request carries header `name` with a value other than `sentinel`.
	Header {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		url_prefix: Option<String>,
		name: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		sentinel: Option<String>,
	},
}

impl LoginIndicator {
	pub fn cookie(name: impl Into<String>) -> Self {
		LoginIndicator::Cookie {
			url_prefix: None,
			names: vec![name.into()],
			sentinel: None,
		}
	}

	pub fn response_status(url: impl Into<String>, status: u16) -> Self {
		LoginIndicator::ResponseStatus { url: url.into(), status }
	}

	fn is_met(&self, event: &TrafficEvent) -> bool {
		match self {
			LoginIndicator::ResponseStatus { url, status } => {
				matches!(event, TrafficEvent::Response(response) if response.url == *url && response.status == *status)
			}
			LoginIndicator::Cookie {
				url_prefix,
				names,
				sentinel,
			} => {
				in_scope(url_prefix.as_deref(), event)
					&& names.iter().any(|name| is_live(event.request_cookie(name), sentinel.as_deref()))
			}
			LoginIndicator::Header {
				url_prefix,
				name,
				sentinel,
			} => in_scope(url_prefix.as_deref(), event) && is_live(event.request_header(name), sentinel.as_deref()),
		}
	}
}

/// Accepts a single cookie name or a list of them.
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Names {
		One(String),
		Many(Vec<String>),
	}

	Ok(match Names::deserialize(deserializer)? {
		Names::One(name) => vec![name],
		Names::Many(names) => names,
	})
}

fn in_scope(prefix: Option<&str>, event: &TrafficEvent) -> bool {
	match (prefix, event.url()) {
		(_, None) => false,
		(None, Some(_)) => true,
		(Some(prefix), Some(url)) => url.starts_with(prefix),
	}
}

fn is_live(value: Option<&str>, sentinel: Option<&str>) -> bool {
	match value.map(str::trim) {
		None | Some("") => false,
		Some(value) => sentinel != Some(value),
	}
}

/// Detects login only; the credential comes from a follow-up automation.
#[derive(Debug)]
pub struct LoginOnlyObserver {
	indicator: LoginIndicator,
}

impl LoginOnlyObserver {
	pub fn new(indicator: LoginIndicator) -> Self {
		Self { indicator }
	}
}

impl TrafficObserver for LoginOnlyObserver {
	fn on_traffic(&self, event: &TrafficEvent, slot: &CaptureSlot) {
		if slot.is_complete() {
			return;
		}
		if self.indicator.is_met(event) {
			debug!(target = "latchkey", url = event.url().unwrap_or_default(), "login indicator met");
			slot.mark_complete();
		}
	}

	fn finalize(&self, _slot: &CaptureSlot, _snapshot: &StorageState) -> std::result::Result<Option<Credential>, LoginFailure> {
		Ok(None)
	}
}
