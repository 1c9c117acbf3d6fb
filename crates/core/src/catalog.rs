//! Built-in service table and loading of additional catalogs.
//!
//! Order matters: URL lookups are first-match-wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::check::CredentialCheck;
use crate::error::{Error, Result};
use crate::followup::{FollowupSpec, GITHUB_NEW_TOKEN_URL};
use crate::observer::{CredentialShape, ExtractionRule, LoginIndicator, ObserverSpec, SnapshotCookie};
use crate::service::ServiceDescriptor;

/// Bumped whenever a built-in descriptor changes shape or behavior.
pub const CATALOG_VERSION: u32 = 3;

const SLACK_TOKEN_PROBE: &str = r#"(() => {
	if (!/^https:\/\/[a-zA-Z0-9-]+\.slack\.com\/client\//.test(window.location.href)) {
		return null;
	}
	const localConfig = JSON.parse(localStorage.getItem('localConfig_v2'));
	if (localConfig && localConfig.teams && localConfig.lastActiveTeamId) {
		return localConfig.teams[localConfig.lastActiveTeamId].token;
	}
	return null;
})()"#;

const NOTION_VERSION: &str = "2022-06-28";

/// A catalog file: `{"version": 1, "services": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFile {
	#[serde(default)]
	pub version: u32,
	pub services: Vec<ServiceDescriptor>,
}

pub fn builtin_services() -> Vec<ServiceDescriptor> {
	vec![slack(), discord(), dropbox(), notion(), github(), linear()]
}

/// Reads additional service descriptors from a JSON catalog file.
pub fn load_catalog(path: &Path) -> Result<Vec<ServiceDescriptor>> {
	let content =
		fs::read_to_string(path).map_err(|e| Error::Config(format!("cannot read service catalog {}: {e}", path.display())))?;
	let catalog: CatalogFile = serde_json::from_str(&content)
		.map_err(|e| Error::Config(format!("invalid service catalog {}: {e}", path.display())))?;
	for service in &catalog.services {
		service.observer.build()?;
	}
	Ok(catalog.services)
}

fn slack() -> ServiceDescriptor {
	ServiceDescriptor::new(
		"slack",
		"https://slack.com/signin",
		ObserverSpec::Simple {
			rules: vec![ExtractionRule::script("token", SLACK_TOKEN_PROBE)],
			credential: CredentialShape::Composite {
				extra_headers: BTreeMap::new(),
			},
			snapshot_cookies: vec![SnapshotCookie {
				field: "d_cookie".into(),
				name: "d".into(),
				domain: "slack.com".into(),
			}],
		},
	)
	.api_prefix("https://slack.com/api/")
	.instructions([
		"Accept all cookies if prompted.",
		"Launch Slack in your browser (not the desktop app).",
	])
	.check(CredentialCheck::status_ok("https://slack.com/api/auth.test").expect_json_field("ok"))
}

fn discord() -> ServiceDescriptor {
	ServiceDescriptor::new(
		"discord",
		"https://discord.com/login",
		ObserverSpec::Simple {
			rules: vec![ExtractionRule::header("token", "authorization").with_url_prefix("https://discord.com/api/")],
			credential: CredentialShape::Bare,
			snapshot_cookies: Vec::new(),
		},
	)
	.api_prefix("https://discord.com/api/")
	.check(CredentialCheck::status_ok("https://discord.com/api/v9/users/@me"))
}

fn dropbox() -> ServiceDescriptor {
	ServiceDescriptor::new(
		"dropbox",
		"https://www.dropbox.com/login",
		ObserverSpec::Simple {
			rules: vec![
				ExtractionRule::header("token", "authorization")
					.with_url_prefix("https://www.dropbox.com/")
					.require_bearer(),
			],
			credential: CredentialShape::Bearer,
			snapshot_cookies: Vec::new(),
		},
	)
	.api_prefix("https://api.dropboxapi.com/")
	.api_prefix("https://content.dropboxapi.com/")
	.api_prefix("https://paper.dropboxapi.com/")
	.instructions([
		"(!) Accept all cookies if prompted.",
		"(!) Log in to your Dropbox account.",
		"(!) After logging in, navigate to any folder or file to complete the authentication.",
	])
	.check(CredentialCheck::status_ok("https://api.dropboxapi.com/2/users/get_current_account").post_json("null"))
}

fn notion() -> ServiceDescriptor {
	ServiceDescriptor::new(
		"notion",
		"https://www.notion.so/login",
		ObserverSpec::Simple {
			rules: vec![
				ExtractionRule::header("token", "authorization")
					.with_url_prefix("https://www.notion.so/api/")
					.with_url_prefix("https://api.notion.com/"),
			],
			credential: CredentialShape::Composite {
				extra_headers: BTreeMap::from([("Notion-Version".to_string(), NOTION_VERSION.to_string())]),
			},
			snapshot_cookies: Vec::new(),
		},
	)
	.api_prefix("https://api.notion.com/")
	.instructions([
		"Log in to your Notion account.",
		"After logging in, the token will be captured automatically.",
	])
	.check(CredentialCheck::status_ok("https://api.notion.com/v1/users/me"))
}

fn github() -> ServiceDescriptor {
	ServiceDescriptor::new(
		"github",
		GITHUB_NEW_TOKEN_URL,
		ObserverSpec::login_only(LoginIndicator::response_status(GITHUB_NEW_TOKEN_URL, 200)),
	)
	.api_prefix("https://api.github.com/")
	.followup(FollowupSpec::github())
	.check(CredentialCheck::status_ok("https://api.github.com/user"))
}

fn linear() -> ServiceDescriptor {
	ServiceDescriptor::new(
		"linear",
		"https://linear.app/login",
		ObserverSpec::login_only(LoginIndicator::Cookie {
			url_prefix: Some("https://linear.app/".into()),
			names: vec!["linear-session".into(), "linear_session".into()],
			sentinel: None,
		}),
	)
	.api_prefix("https://api.linear.app/")
	.followup(FollowupSpec::linear())
	.check(CredentialCheck::status_ok("https://api.linear.app/graphql").post_json(r#"{"query": "{ viewer { id } }"}"#))
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;
	use crate::registry::Registry;

	#[test]
	fn builtin_catalog_is_valid() {
		let services = builtin_services();
		let registry = Registry::new(services.clone()).unwrap();
		for service in &services {
			assert!(service.observer.build().is_ok(), "{}", service.name);
			assert!(!service.api_url_prefixes.is_empty(), "{}", service.name);
			assert!(
				service.observer.extracts_credentials() || service.requires_followup(),
				"{} can never produce a credential",
				service.name
			);
		}
		assert_eq!(
			registry.names().collect::<Vec<_>>(),
			["slack", "discord", "dropbox", "notion", "github", "linear"]
		);
	}

	#[test]
	fn builtin_urls_resolve() {
		let registry = Registry::builtin();
		let resolve = |url: &str| registry.by_url(url).map(|s| s.name.clone());
		assert_eq!(resolve("https://slack.com/api/conversations.list").as_deref(), Some("slack"));
		assert_eq!(resolve("https://content.dropboxapi.com/2/files/download").as_deref(), Some("dropbox"));
		assert_eq!(resolve("https://api.notion.com/v1/search").as_deref(), Some("notion"));
		assert_eq!(resolve("https://api.github.com/user").as_deref(), Some("github"));
		assert_eq!(resolve("https://example.com/").as_deref(), None);
	}

	#[test]
	fn catalog_file_round_trips() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("services.json");
		let file = CatalogFile {
			version: CATALOG_VERSION,
			services: vec![discord()],
		};
		fs::write(&path, serde_json::to_string_pretty(&file).unwrap()).unwrap();

		let loaded = load_catalog(&path).unwrap();
		assert_eq!(loaded, vec![discord()]);
	}

	#[test]
	fn catalog_with_bad_pattern_is_rejected() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("services.json");
		fs::write(
			&path,
			r#"{"services": [{"name": "x", "loginUrl": "https://x/", "apiUrlPrefixes": ["https://api.x/"],
			"observer": {"kind": "simple", "rules": [{"field": "token", "source": {"from": "cookie_pattern", "pattern": "("}}]}}]}"#,
		)
		.unwrap();
		assert!(matches!(load_catalog(&path), Err(Error::Config(_))));
	}
}
