//! Observations delivered to traffic observers during the headful login phase.
//!
//! Drivers translate their native network events into [`TrafficEvent`]s and
//! hand them to the engine in arrival order. Header names are stored lower-cased
//! so lookups do not depend on how the browser spelled them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single observation from the page under login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrafficEvent {
	/// An outgoing request.
	Request(RequestEvent),
	/// An incoming response.
	Response(ResponseEvent),
	/// Result of evaluating an observer-declared script probe on the page.
	Script(ScriptResult),
}

impl TrafficEvent {
	/// Returns the URL this event concerns, if any.
	pub fn url(&self) -> Option<&str> {
		match self {
			TrafficEvent::Request(request) => Some(&request.url),
			TrafficEvent::Response(response) => Some(&response.url),
			TrafficEvent::Script(_) => None,
		}
	}

	/// Returns the request headers carried by this event.
	///
	/// Responses carry the headers of the request that produced them when the
	/// driver knows them.
	pub fn request_headers(&self) -> Option<&BTreeMap<String, String>> {
		match self {
			TrafficEvent::Request(request) => Some(&request.headers),
			TrafficEvent::Response(response) => Some(&response.request_headers),
			TrafficEvent::Script(_) => None,
		}
	}

	/// Looks up a request header by case-insensitive name.
	pub fn request_header(&self, name: &str) -> Option<&str> {
		self.request_headers()
			.and_then(|headers| headers.get(&name.to_ascii_lowercase()))
			.map(String::as_str)
	}

	/// Looks up a cookie sent with the request.
	pub fn request_cookie(&self, name: &str) -> Option<&str> {
		self.request_header("cookie").and_then(|header| find_cookie(header, name))
	}
}

/// An outgoing request observed on the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
	pub url: String,
	#[serde(default = "default_method")]
	pub method: String,
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
	"GET".to_string()
}

impl RequestEvent {
	/// Creates a GET request with no headers.
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			method: default_method(),
			headers: BTreeMap::new(),
		}
	}

	/// Adds a header, normalising the name to lower case.
	pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.headers.insert(name.to_ascii_lowercase(), value.into());
		self
	}

	/// Returns a cookie value from the `cookie` header.
	pub fn cookie(&self, name: &str) -> Option<&str> {
		self.headers.get("cookie").and_then(|header| find_cookie(header, name))
	}
}

/// An incoming response observed on the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
	pub url: String,
	pub status: u16,
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
	#[serde(default)]
	pub request_headers: BTreeMap<String, String>,
	/// Body text, when the driver captured it.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<String>,
}

impl ResponseEvent {
	/// Creates a response with no headers or body.
	pub fn new(url: impl Into<String>, status: u16) -> Self {
		Self {
			url: url.into(),
			status,
			..Default::default()
		}
	}

	/// Adds a response header, normalising the name to lower case.
	pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.headers.insert(name.to_ascii_lowercase(), value.into());
		self
	}

	/// Adds a header of the originating request.
	pub fn request_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.request_headers.insert(name.to_ascii_lowercase(), value.into());
		self
	}

	/// Attaches a captured body.
	pub fn body(mut self, body: impl Into<String>) -> Self {
		self.body = Some(body.into());
		self
	}
}

/// Value produced by a script probe evaluated in the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptResult {
	/// Index of the probe within the observer's probe list.
	pub probe: usize,
	pub value: serde_json::Value,
}

/// Parses a `Cookie` header (`a=1; b=2`) and returns the value for `name`.
pub fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
	header.split(';').find_map(|pair| {
		let (key, value) = pair.trim().split_once('=')?;
		(key.trim() == name).then(|| value.trim())
	})
}
