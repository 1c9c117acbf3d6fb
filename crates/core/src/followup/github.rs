use async_trait::async_trait;

use super::{Automation, FollowupAutomation, StepResult};
use crate::credential::Credential;

/// New personal access token page. Also the login URL, since reaching it
/// forces GitHub's sudo prompt.
pub const NEW_TOKEN_URL: &str = "https://github.com/settings/tokens/new";

pub const DEFAULT_SCOPES: &[&str] = &[
	"repo",
	"workflow",
	"write:packages",
	"delete:packages",
	"gist",
	"notifications",
	"admin:org",
	"admin:repo_hook",
	"admin:org_hook",
	"user",
	"delete_repo",
	"write:discussion",
	"admin:enterprise",
	"read:audit_log",
	"codespace",
	"copilot",
	"write:network_configurations",
	"project",
];

const NOTE_INPUT: &str = "#oauth_access_description";
const GENERATE_BUTTON: &str = r#"button[type="submit"].btn-primary"#;
const TOKEN_OUTPUT: &str = "#new-oauth-token";

pub(super) fn default_scopes() -> Vec<String> {
	DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect()
}

fn scope_checkbox(scope: &str) -> String {
	format!(r#"input[name="oauth_access[scopes][]"][value="{scope}"]"#)
}

/// Creates a classic personal access token with the configured scopes.
#[derive(Debug, Clone)]
pub struct GithubPersonalToken {
	note: String,
	scopes: Vec<String>,
}

impl GithubPersonalToken {
	pub fn new(note: String, scopes: Vec<String>) -> Self {
		Self { note, scopes }
	}
}

#[async_trait]
impl FollowupAutomation for GithubPersonalToken {
	async fn run(&self, automation: &Automation<'_>) -> StepResult<Option<Credential>> {
		automation.navigate(NEW_TOKEN_URL).await?;
		automation.type_text(NOTE_INPUT, &self.note).await?;

		// Scopes unavailable to the account (enterprise, copilot) are not rendered.
		for scope in &self.scopes {
			let checkbox = scope_checkbox(scope);
			if automation.is_visible(&checkbox).await? {
				automation.check(&checkbox).await?;
			}
		}

		automation.click(GENERATE_BUTTON).await?;
		let token = automation.read_text(TOKEN_OUTPUT).await?;
		Ok(Some(Credential::bearer(token)))
	}
}
