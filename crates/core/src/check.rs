//! Liveness probes for stored credentials.
//!
//! The core only renders the probe as curl arguments and interprets curl's
//! output; running curl is the caller's business.

use serde::{Deserialize, Serialize};

use crate::credential::{Credential, CredentialStatus};

/// Marker curl prints after the body so the status code can be split off.
const STATUS_MARKER: &str = "\n__latchkey_status__:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialCheck {
	pub url: String,
	#[serde(default = "default_method")]
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<String>,
	/// Additional request headers as `Name: value` strings.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub headers: Vec<String>,
	pub expect: CheckExpectation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckExpectation {
	/// HTTP status code equals `code`.
	Status { code: u16 },
	/// Response body is a JSON object whose `field` is `true`.
	JsonFieldTrue { field: String },
}

fn default_method() -> String {
	"GET".to_string()
}

impl CredentialCheck {
	/// `GET url` expecting HTTP 200.
	pub fn status_ok(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			method: default_method(),
			body: None,
			headers: Vec::new(),
			expect: CheckExpectation::Status { code: 200 },
		}
	}

	pub fn post_json(mut self, body: impl Into<String>) -> Self {
		self.method = "POST".to_string();
		self.headers.push("Content-Type: application/json".to_string());
		self.body = Some(body.into());
		self
	}

	pub fn expect_json_field(mut self, field: impl Into<String>) -> Self {
		self.expect = CheckExpectation::JsonFieldTrue { field: field.into() };
		self
	}

	/// Arguments for a silent curl run that prints the body followed by the status line.
	pub fn curl_arguments(&self, credential: &Credential) -> Vec<String> {
		let mut args = vec![
			"-s".to_string(),
			"-w".to_string(),
			format!("{STATUS_MARKER}%{{http_code}}"),
		];
		if self.method != "GET" {
			args.push("-X".to_string());
			args.push(self.method.clone());
		}
		for header in &self.headers {
			args.push("-H".to_string());
			args.push(header.clone());
		}
		args.extend(credential.as_curl_arguments());
		if let Some(body) = &self.body {
			args.push("-d".to_string());
			args.push(body.clone());
		}
		args.push(self.url.clone());
		args
	}

	/// Interprets the stdout of a run made with [`CredentialCheck::curl_arguments`].
	pub fn evaluate(&self, stdout: &str) -> CredentialStatus {
		let (body, status) = match stdout.rsplit_once(STATUS_MARKER) {
			Some((body, status)) => (body, status.trim().parse::<u16>().ok()),
			None => (stdout, None),
		};
		let valid = match &self.expect {
			CheckExpectation::Status { code } => status == Some(*code),
			CheckExpectation::JsonFieldTrue { field } => serde_json::from_str::<serde_json::Value>(body)
				.ok()
				.and_then(|value| value.get(field).and_then(serde_json::Value::as_bool))
				.unwrap_or(false),
		};
		if valid { CredentialStatus::Valid } else { CredentialStatus::Invalid }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_check_arguments() {
		let check = CredentialCheck::status_ok("https://api.github.com/user");
		let args = check.curl_arguments(&Credential::bearer("t"));
		assert_eq!(
			args,
			vec![
				"-s",
				"-w",
				"\n__latchkey_status__:%{http_code}",
				"-H",
				"Authorization: Bearer t",
				"https://api.github.com/user"
			]
		);
	}

	#[test]
	fn post_check_arguments() {
		let check = CredentialCheck::status_ok("https://api.linear.app/graphql").post_json(r#"{"query": "{ viewer { id } }"}"#);
		let args = check.curl_arguments(&Credential::bearer("t"));
		assert_eq!(&args[3..7], ["-X", "POST", "-H", "Content-Type: application/json"]);
		assert_eq!(&args[args.len() - 3..], ["-d", r#"{"query": "{ viewer { id } }"}"#, "https://api.linear.app/graphql"]);
	}

	#[test]
	fn status_expectation() {
		let check = CredentialCheck::status_ok("https://x");
		assert_eq!(check.evaluate("{}\n__latchkey_status__:200"), CredentialStatus::Valid);
		assert_eq!(check.evaluate("{}\n__latchkey_status__:401"), CredentialStatus::Invalid);
		assert_eq!(check.evaluate(""), CredentialStatus::Invalid);
	}

	#[test]
	fn json_field_expectation() {
		let check = CredentialCheck::status_ok("https://slack.com/api/auth.test").expect_json_field("ok");
		assert_eq!(check.evaluate("{\"ok\": true}\n__latchkey_status__:200"), CredentialStatus::Valid);
		assert_eq!(
			check.evaluate("{\"ok\": false, \"error\": \"invalid_auth\"}\n__latchkey_status__:200"),
			CredentialStatus::Invalid
		);
		assert_eq!(check.evaluate("not json\n__latchkey_status__:200"), CredentialStatus::Invalid);
	}
}
