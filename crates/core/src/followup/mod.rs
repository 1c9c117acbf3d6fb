//! Headless follow-up automations that mint a durable API key.
//!
//! A follow-up runs after login is detected, in a fresh headless browser seeded
//! with the headful session's storage state. Each service has a fixed,
//! hand-authored script written against the small primitive vocabulary of
//! [`Automation`]. Every failing primitive reports the step it was running.

mod github;
mod linear;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use github::{DEFAULT_SCOPES as GITHUB_DEFAULT_SCOPES, GithubPersonalToken, NEW_TOKEN_URL as GITHUB_NEW_TOKEN_URL};
pub use linear::LinearApiKey;

use crate::credential::Credential;
use crate::driver::{DriverError, PageHandle};
use crate::error::LoginFailure;

pub type StepResult<T> = std::result::Result<T, LoginFailure>;

/// Name given to keys minted by follow-ups unless configured otherwise.
pub const DEFAULT_KEY_NAME: &str = "Latchkey";

/// Per-step timing for follow-up scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowupSettings {
	/// How long to wait for an element before the step fails.
	pub step_timeout: Duration,
	/// Inclusive bounds of the random delay between keystrokes, in milliseconds.
	pub typing_delay_ms: (u64, u64),
}

impl Default for FollowupSettings {
	fn default() -> Self {
		Self {
			step_timeout: Duration::from_millis(8000),
			typing_delay_ms: (30, 100),
		}
	}
}

impl FollowupSettings {
	fn keystroke_delay(&self) -> Duration {
		let (min, max) = self.typing_delay_ms;
		if max <= min {
			return Duration::from_millis(min);
		}
		Duration::from_millis(rand::rng().random_range(min..=max))
	}
}

/// A service's scripted follow-up.
#[async_trait]
pub trait FollowupAutomation: Send + Sync + Debug {
	/// Runs the script. `Ok(None)` means the script finished without finding a key.
	async fn run(&self, automation: &Automation<'_>) -> StepResult<Option<Credential>>;
}

/// Declarative follow-up selection, one variant per hand-authored script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FollowupSpec {
	GithubPersonalToken {
		#[serde(default = "default_key_name")]
		note: String,
		#[serde(default = "github::default_scopes")]
		scopes: Vec<String>,
	},
	LinearApiKey {
		#[serde(default = "default_key_name")]
		label: String,
	},
}

fn default_key_name() -> String {
	DEFAULT_KEY_NAME.to_string()
}

impl FollowupSpec {
	pub fn github() -> Self {
		FollowupSpec::GithubPersonalToken {
			note: default_key_name(),
			scopes: github::default_scopes(),
		}
	}

	pub fn linear() -> Self {
		FollowupSpec::LinearApiKey { label: default_key_name() }
	}

	pub fn build(&self) -> Arc<dyn FollowupAutomation> {
		match self {
			FollowupSpec::GithubPersonalToken { note, scopes } => Arc::new(GithubPersonalToken::new(note.clone(), scopes.clone())),
			FollowupSpec::LinearApiKey { label } => Arc::new(LinearApiKey::new(label.clone())),
		}
	}
}

/// Primitive UI actions over one headless page.
pub struct Automation<'a> {
	page: &'a dyn PageHandle,
	service: &'a str,
	settings: FollowupSettings,
}

impl<'a> Automation<'a> {
	pub fn new(page: &'a dyn PageHandle, service: &'a str, settings: FollowupSettings) -> Self {
		Self { page, service, settings }
	}

	pub fn service(&self) -> &str {
		self.service
	}

	pub async fn navigate(&self, url: &str) -> StepResult<()> {
		let step = format!("navigate({url})");
		self.trace(&step);
		self.page.goto(url).await.map_err(|e| failed(&step, e))
	}

	pub async fn wait_for_element(&self, selector: &str) -> StepResult<()> {
		let step = format!("wait_for_element({selector})");
		self.trace(&step);
		self.page
			.wait_for_selector(selector, self.settings.step_timeout)
			.await
			.map_err(|e| failed(&step, e))
	}

	pub async fn click(&self, selector: &str) -> StepResult<()> {
		self.wait_for_element(selector).await?;
		let step = format!("click({selector})");
		self.trace(&step);
		self.page.click(selector).await.map_err(|e| failed(&step, e))
	}

	/// Types `text` one key event at a time with a random pause between keys.
	///
	/// Some forms reject values that appear without key events, so this never
	/// sets the value directly.
	pub async fn type_text(&self, selector: &str, text: &str) -> StepResult<()> {
		self.click(selector).await?;
		let step = format!("type_text({selector})");
		self.trace(&step);
		for character in text.chars() {
			self.page
				.press_character(selector, character)
				.await
				.map_err(|e| failed(&step, e))?;
			tokio::time::sleep(self.settings.keystroke_delay()).await;
		}
		Ok(())
	}

	pub async fn select_option(&self, selector: &str, value: &str) -> StepResult<()> {
		self.wait_for_element(selector).await?;
		let step = format!("select_option({selector}, {value})");
		self.trace(&step);
		self.page.select_option(selector, value).await.map_err(|e| failed(&step, e))
	}

	/// Ticks a checkbox. Already-checked boxes stay checked.
	pub async fn check(&self, selector: &str) -> StepResult<()> {
		let step = format!("check({selector})");
		self.trace(&step);
		self.page.set_checked(selector, true).await.map_err(|e| failed(&step, e))
	}

	/// Visibility probe that does not wait.
	pub async fn is_visible(&self, selector: &str) -> StepResult<bool> {
		self.page
			.is_visible(selector)
			.await
			.map_err(|e| failed(&format!("is_visible({selector})"), e))
	}

	/// Reads an element's trimmed text. An empty result fails the step.
	pub async fn read_text(&self, selector: &str) -> StepResult<String> {
		self.wait_for_element(selector).await?;
		let step = format!("read_text({selector})");
		self.trace(&step);
		let text = self.page.text_content(selector).await.map_err(|e| failed(&step, e))?;
		non_empty(&step, text)
	}

	/// Reads an attribute's trimmed value. A missing or empty value fails the step.
	pub async fn read_attribute(&self, selector: &str, attribute: &str) -> StepResult<String> {
		self.wait_for_element(selector).await?;
		let step = format!("read_attribute({selector}, {attribute})");
		self.trace(&step);
		let value = self
			.page
			.attribute(selector, attribute)
			.await
			.map_err(|e| failed(&step, e))?;
		non_empty(&step, value)
	}

	fn trace(&self, step: &str) {
		debug!(target = "latchkey", service = self.service, step, "follow-up step");
	}
}

fn failed(step: &str, error: DriverError) -> LoginFailure {
	LoginFailure::Followup {
		step: step.to_string(),
		reason: error.to_string(),
	}
}

fn non_empty(step: &str, value: Option<String>) -> StepResult<String> {
	match value.as_deref().map(str::trim) {
		Some(value) if !value.is_empty() => Ok(value.to_string()),
		_ => Err(LoginFailure::Followup {
			step: step.to_string(),
			reason: "element was empty".to_string(),
		}),
	}
}
