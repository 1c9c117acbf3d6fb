//! Credential payloads and the headers they produce.
//!
//! Every variant is persisted with an `object_type` discriminator. Decoding is
//! closed: a missing or unknown discriminator is an error, never a default.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Discriminator field written into every persisted credential.
pub const DISCRIMINATOR: &str = "object_type";

const BEARER_TAG: &str = "authorization_bearer";
const BARE_TAG: &str = "authorization_bare";
const COMPOSITE_TAG: &str = "composite";

/// Suffix marking an extra field that travels as a cookie (`d_cookie` -> `d=...`).
const COOKIE_FIELD_SUFFIX: &str = "_cookie";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "object_type")]
pub enum Credential {
	/// `Authorization: Bearer <token>`
	#[serde(rename = "authorization_bearer")]
	Bearer { token: String },

	/// `Authorization: <token>`, used verbatim.
	#[serde(rename = "authorization_bare")]
	Bare { token: String },

	/// Bearer token plus service-specific side-channel fields.
	///
	/// Fields named `<name>_cookie` are sent together in one `Cookie` header;
	/// any other field is sent as a header of the same name. `extra_headers`
	/// holds static headers the service requires (API version pins and the like).
	#[serde(rename = "composite")]
	Composite {
		token: String,
		#[serde(rename = "extraFields", default)]
		extra_fields: BTreeMap<String, String>,
		#[serde(rename = "extraHeaders", default, skip_serializing_if = "BTreeMap::is_empty")]
		extra_headers: BTreeMap<String, String>,
	},
}

impl Credential {
	pub fn bearer(token: impl Into<String>) -> Self {
		Credential::Bearer { token: token.into() }
	}

	pub fn bare(token: impl Into<String>) -> Self {
		Credential::Bare { token: token.into() }
	}

	pub fn composite(token: impl Into<String>, extra_fields: BTreeMap<String, String>) -> Self {
		Credential::Composite {
			token: token.into(),
			extra_fields,
			extra_headers: BTreeMap::new(),
		}
	}

	/// Returns the discriminator this credential is stored under.
	pub fn object_type(&self) -> &'static str {
		match self {
			Credential::Bearer { .. } => BEARER_TAG,
			Credential::Bare { .. } => BARE_TAG,
			Credential::Composite { .. } => COMPOSITE_TAG,
		}
	}

	pub fn token(&self) -> &str {
		match self {
			Credential::Bearer { token } | Credential::Bare { token } | Credential::Composite { token, .. } => token,
		}
	}

	/// Header pairs that authenticate an HTTP request, in a fixed order.
	pub fn header_pairs(&self) -> Vec<(String, String)> {
		match self {
			Credential::Bearer { token } => vec![("Authorization".into(), format!("Bearer {token}"))],
			Credential::Bare { token } => vec![("Authorization".into(), token.clone())],
			Credential::Composite {
				token,
				extra_fields,
				extra_headers,
			} => {
				let mut pairs = vec![("Authorization".to_string(), format!("Bearer {token}"))];
				pairs.extend(extra_headers.iter().map(|(name, value)| (name.clone(), value.clone())));

				let mut cookies = Vec::new();
				for (field, value) in extra_fields {
					match field.strip_suffix(COOKIE_FIELD_SUFFIX) {
						Some(cookie) if !cookie.is_empty() => cookies.push(format!("{cookie}={value}")),
						_ => pairs.push((field.clone(), value.clone())),
					}
				}
				if !cookies.is_empty() {
					pairs.push(("Cookie".into(), cookies.join("; ")));
				}
				pairs
			}
		}
	}

	/// Renders the header pairs as curl `-H` arguments.
	pub fn as_curl_arguments(&self) -> Vec<String> {
		self.header_pairs()
			.into_iter()
			.flat_map(|(name, value)| ["-H".to_string(), format!("{name}: {value}")])
			.collect()
	}

	/// Serializes into the persisted JSON shape.
	pub fn encode(&self) -> serde_json::Value {
		serde_json::to_value(self).unwrap_or_else(|_| serde_json::Value::Null)
	}

	/// Decodes a persisted entry, failing closed on the discriminator.
	pub fn decode(value: &serde_json::Value) -> Result<Self, String> {
		let object = value.as_object().ok_or_else(|| "entry is not a JSON object".to_string())?;
		let tag = match object.get(DISCRIMINATOR) {
			None => return Err(format!("missing `{DISCRIMINATOR}` discriminator")),
			Some(serde_json::Value::String(tag)) => tag.as_str(),
			Some(other) => return Err(format!("`{DISCRIMINATOR}` must be a string, found {other}")),
		};
		if ![BEARER_TAG, BARE_TAG, COMPOSITE_TAG].contains(&tag) {
			return Err(format!("unknown `{DISCRIMINATOR}` {tag:?}"));
		}
		serde_json::from_value(value.clone()).map_err(|e| format!("malformed {tag} entry: {e}"))
	}
}

/// Liveness of a stored credential as reported by `latchkey status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
	Missing,
	Valid,
	Invalid,
}

impl CredentialStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			CredentialStatus::Missing => "missing",
			CredentialStatus::Valid => "valid",
			CredentialStatus::Invalid => "invalid",
		}
	}
}

impl fmt::Display for CredentialStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn slack() -> Credential {
		Credential::composite("xoxc-1", BTreeMap::from([("d_cookie".to_string(), "xoxd-2".to_string())]))
	}

	#[test]
	fn bearer_header_pairs() {
		assert_eq!(
			Credential::bearer("tok-123").header_pairs(),
			vec![("Authorization".to_string(), "Bearer tok-123".to_string())]
		);
	}

	#[test]
	fn bare_token_is_used_verbatim() {
		assert_eq!(
			Credential::bare("mfa.abc").header_pairs(),
			vec![("Authorization".to_string(), "mfa.abc".to_string())]
		);
	}

	#[test]
	fn composite_sends_cookie_fields_as_one_cookie_header() {
		let mut fields = BTreeMap::new();
		fields.insert("d_cookie".to_string(), "xoxd".to_string());
		fields.insert("x_cookie".to_string(), "abc".to_string());
		fields.insert("X-Team".to_string(), "T1".to_string());
		let credential = Credential::Composite {
			token: "xoxc".into(),
			extra_fields: fields,
			extra_headers: BTreeMap::from([("Notion-Version".to_string(), "2022-06-28".to_string())]),
		};

		assert_eq!(
			credential.header_pairs(),
			vec![
				("Authorization".to_string(), "Bearer xoxc".to_string()),
				("Notion-Version".to_string(), "2022-06-28".to_string()),
				("X-Team".to_string(), "T1".to_string()),
				("Cookie".to_string(), "d=xoxd; x=abc".to_string()),
			]
		);
	}

	#[test]
	fn curl_arguments_pair_each_header() {
		assert_eq!(
			slack().as_curl_arguments(),
			vec!["-H", "Authorization: Bearer xoxc-1", "-H", "Cookie: d=xoxd-2"]
		);
	}

	#[test]
	fn encode_uses_named_fields() {
		assert_eq!(
			slack().encode(),
			json!({"object_type": "composite", "token": "xoxc-1", "extraFields": {"d_cookie": "xoxd-2"}})
		);
		assert_eq!(Credential::bare("t").encode(), json!({"object_type": "authorization_bare", "token": "t"}));
	}

	#[test]
	fn decode_inverts_encode() {
		for credential in [Credential::bearer("a"), Credential::bare("b"), slack()] {
			assert_eq!(Credential::decode(&credential.encode()), Ok(credential));
		}
	}

	#[test]
	fn decode_fails_closed_on_discriminator() {
		let missing = Credential::decode(&json!({"token": "a"})).unwrap_err();
		assert!(missing.contains("missing"));

		let unknown = Credential::decode(&json!({"object_type": "oauth2", "token": "a"})).unwrap_err();
		assert!(unknown.contains("oauth2"));

		let not_string = Credential::decode(&json!({"object_type": 3, "token": "a"})).unwrap_err();
		assert!(not_string.contains("must be a string"));
	}

	#[test]
	fn decode_rejects_malformed_variant_fields() {
		let err = Credential::decode(&json!({"object_type": "authorization_bearer"})).unwrap_err();
		assert!(err.contains("malformed authorization_bearer"));
	}

	#[test]
	fn status_display() {
		assert_eq!(CredentialStatus::Missing.to_string(), "missing");
		assert_eq!(serde_json::to_value(CredentialStatus::Valid).unwrap(), json!("valid"));
	}
}
