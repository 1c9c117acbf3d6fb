use async_trait::async_trait;

use super::{Automation, FollowupAutomation, StepResult};
use crate::credential::Credential;

pub const API_SETTINGS_URL: &str = "https://linear.app/settings/account/security";

const NEW_KEY_BUTTON: &str = r#"button[aria-label="New API key"]"#;
const LABEL_INPUT: &str = r#"input[name="label"]"#;
const CREATE_BUTTON: &str = r#"div[role="dialog"] button[type="submit"]"#;
const KEY_OUTPUT: &str = r#"div[role="dialog"] input[readonly]"#;

/// Creates a personal API key from the account security settings.
#[derive(Debug, Clone)]
pub struct LinearApiKey {
	label: String,
}

impl LinearApiKey {
	pub fn new(label: String) -> Self {
		Self { label }
	}
}

#[async_trait]
impl FollowupAutomation for LinearApiKey {
	async fn run(&self, automation: &Automation<'_>) -> StepResult<Option<Credential>> {
		automation.navigate(API_SETTINGS_URL).await?;
		automation.click(NEW_KEY_BUTTON).await?;
		automation.type_text(LABEL_INPUT, &self.label).await?;
		automation.click(CREATE_BUTTON).await?;

		// The key is shown once, in a read-only input.
		let key = automation.read_attribute(KEY_OUTPUT, "value").await?;
		if !key.starts_with("lin_api_") {
			return Ok(None);
		}
		Ok(Some(Credential::bare(key)))
	}
}
