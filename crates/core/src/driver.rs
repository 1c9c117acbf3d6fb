//! Browser automation capability consumed by the login engine.
//!
//! The engine never talks to a browser directly. It drives these traits, which a
//! runtime (the CLI's Chromium driver, or [`crate::testing`] in tests) implements:
//!
//! * [`BrowserLauncher`] - starts a browser process, visible or headless
//! * [`BrowserHandle`] - creates contexts, optionally seeded with a [`StorageState`]
//! * [`ContextHandle`] - pages, cookies, and snapshot serialization
//! * [`PageHandle`] - navigation, traffic events, script evaluation, element primitives
//!
//! Closing is signalled two ways: operations on a closed browser fail with
//! [`DriverError::Closed`], and [`PageHandle::closed`] flips to `true` so a
//! waiting caller is interrupted instead of hanging.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use latchkey_protocol::{Cookie, StorageState, TrafficEvent};
use thiserror::Error;
use tokio::sync::watch;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
	/// The browser, context, or page was closed.
	#[error("browser was closed")]
	Closed,

	#[error("timeout after {ms}ms waiting for: {what}")]
	Timeout { what: String, ms: u64 },

	#[error("element not found: {selector}")]
	ElementNotFound { selector: String },

	#[error("{0}")]
	Other(String),
}

impl DriverError {
	pub fn other(msg: impl std::fmt::Display) -> Self {
		DriverError::Other(msg.to_string())
	}

	pub fn is_closed(&self) -> bool {
		matches!(self, DriverError::Closed)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchOptions {
	pub headless: bool,
}

impl LaunchOptions {
	/// Visible browser for interactive login.
	pub fn headful() -> Self {
		Self { headless: false }
	}

	/// Invisible browser for follow-up automation.
	pub fn headless() -> Self {
		Self { headless: true }
	}
}

/// Callback invoked once per observed traffic event, possibly off the caller's task.
pub type TrafficHandler = Arc<dyn Fn(TrafficEvent) + Send + Sync>;

/// RAII handle that detaches a traffic handler when dropped.
pub struct TrafficSubscription {
	cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TrafficSubscription {
	pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
		Self {
			cancel: Some(Box::new(cancel)),
		}
	}

	/// Explicitly detaches the handler, equivalent to dropping the subscription.
	pub fn unsubscribe(mut self) {
		if let Some(cancel) = self.cancel.take() {
			cancel();
		}
	}
}

impl Drop for TrafficSubscription {
	fn drop(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			cancel();
		}
	}
}

impl std::fmt::Debug for TrafficSubscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TrafficSubscription").field("active", &self.cancel.is_some()).finish()
	}
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
	/// Starts a new browser process.
	async fn launch(&self, options: LaunchOptions) -> DriverResult<Box<dyn BrowserHandle>>;
}

#[async_trait]
pub trait BrowserHandle: Send + Sync {
	/// Creates a browser context, seeded with `state` when provided.
	async fn new_context(&self, state: Option<&StorageState>) -> DriverResult<Box<dyn ContextHandle>>;

	/// Closes the browser process. Closing an already-closed browser succeeds.
	async fn close(&self) -> DriverResult<()>;
}

#[async_trait]
pub trait ContextHandle: Send + Sync {
	async fn new_page(&self) -> DriverResult<Box<dyn PageHandle>>;

	async fn cookies(&self) -> DriverResult<Vec<Cookie>>;

	/// Serializes cookies and localStorage into a transferable snapshot.
	async fn storage_state(&self) -> DriverResult<StorageState>;

	async fn close(&self) -> DriverResult<()>;
}

#[async_trait]
pub trait PageHandle: Send + Sync {
	async fn url(&self) -> DriverResult<String>;

	async fn goto(&self, url: &str) -> DriverResult<()>;

	/// Replaces the document with `html`.
	async fn set_content(&self, html: &str) -> DriverResult<()>;

	/// Registers `handler` for every request and response on this page.
	async fn on_traffic(&self, handler: TrafficHandler) -> DriverResult<TrafficSubscription>;

	/// Receiver that turns `true` once the user closes the browser.
	fn closed(&self) -> watch::Receiver<bool>;

	/// Evaluates a JavaScript expression and returns its JSON value.
	async fn evaluate(&self, expression: &str) -> DriverResult<serde_json::Value>;

	async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<()>;

	async fn click(&self, selector: &str) -> DriverResult<()>;

	/// Dispatches real key events for one character into the focused element.
	async fn press_character(&self, selector: &str, character: char) -> DriverResult<()>;

	async fn select_option(&self, selector: &str, value: &str) -> DriverResult<()>;

	async fn set_checked(&self, selector: &str, checked: bool) -> DriverResult<()>;

	async fn is_visible(&self, selector: &str) -> DriverResult<bool>;

	async fn attribute(&self, selector: &str, name: &str) -> DriverResult<Option<String>>;

	async fn text_content(&self, selector: &str) -> DriverResult<Option<String>>;

	async fn close(&self) -> DriverResult<()>;
}
