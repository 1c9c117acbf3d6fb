//! Traffic observers: detect login completion and harvest credential fragments.
//!
//! An observer is built from a declarative [`ObserverSpec`] and is stateless
//! itself. Everything it captures goes into the session-owned [`CaptureSlot`],
//! which may be written from the driver's event task while the session polls it.

mod login_only;
mod simple;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use latchkey_protocol::{StorageState, TrafficEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

pub use login_only::{LoginIndicator, LoginOnlyObserver};
pub use simple::{CredentialShape, ExtractionRule, RuleSource, SimpleObserver, SnapshotCookie};

use crate::credential::Credential;
use crate::error::{Error, LoginFailure, Result};

/// Fragments captured during one login attempt.
///
/// Each field is first-writer-wins. Completion is a one-way flag with a
/// wakeup so the polling loop can react before its next tick.
#[derive(Debug, Default)]
pub struct CaptureSlot {
	complete: AtomicBool,
	fragments: Mutex<BTreeMap<String, String>>,
	notify: Notify,
}

impl CaptureSlot {
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores `value` under `field` unless the field already holds a value.
	///
	/// Empty values are ignored. Returns true when the value was accepted.
	pub fn record(&self, field: &str, value: impl Into<String>) -> bool {
		let value = value.into();
		if value.is_empty() {
			return false;
		}
		let mut fragments = self.fragments.lock();
		if fragments.contains_key(field) {
			return false;
		}
		fragments.insert(field.to_string(), value);
		true
	}

	pub fn fragment(&self, field: &str) -> Option<String> {
		self.fragments.lock().get(field).cloned()
	}

	pub fn fragments(&self) -> BTreeMap<String, String> {
		self.fragments.lock().clone()
	}

	pub fn has(&self, field: &str) -> bool {
		self.fragments.lock().contains_key(field)
	}

	pub fn mark_complete(&self) {
		if !self.complete.swap(true, Ordering::AcqRel) {
			self.notify.notify_one();
		}
	}

	pub fn is_complete(&self) -> bool {
		self.complete.load(Ordering::Acquire)
	}

	/// Resolves after the next [`CaptureSlot::mark_complete`], or immediately if
	/// completion was signalled while nobody was waiting.
	pub async fn notified(&self) {
		self.notify.notified().await;
	}
}

/// Per-service strategy over the headful phase's traffic.
pub trait TrafficObserver: Send + Sync + Debug {
	/// Inspects one event. Must be a no-op once `slot` is complete.
	fn on_traffic(&self, event: &TrafficEvent, slot: &CaptureSlot);

	/// Script expressions evaluated in the page on every poll tick. Results
	/// come back as [`TrafficEvent::Script`] with the expression's index.
	fn probes(&self) -> &[String] {
		&[]
	}

	/// Builds the credential once login is detected.
	///
	/// `Ok(None)` means the observer only detects login and a follow-up is
	/// expected to produce the credential.
	fn finalize(&self, slot: &CaptureSlot, snapshot: &StorageState) -> std::result::Result<Option<Credential>, LoginFailure>;
}

/// Declarative observer configuration, one variant per strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObserverSpec {
	Simple {
		rules: Vec<ExtractionRule>,
		#[serde(default)]
		credential: CredentialShape,
		#[serde(default, skip_serializing_if = "Vec::is_empty")]
		snapshot_cookies: Vec<SnapshotCookie>,
	},
	LoginOnly {
		indicator: LoginIndicator,
	},
}

impl ObserverSpec {
	/// Bearer token taken from the `authorization` header of any request under `url_prefix`.
	pub fn bearer_header(url_prefix: impl Into<String>) -> Self {
		ObserverSpec::Simple {
			rules: vec![ExtractionRule::header("token", "authorization").with_url_prefix(url_prefix)],
			credential: CredentialShape::Bearer,
			snapshot_cookies: Vec::new(),
		}
	}

	pub fn login_only(indicator: LoginIndicator) -> Self {
		ObserverSpec::LoginOnly { indicator }
	}

	/// Compiles patterns and returns the runtime observer.
	pub fn build(&self) -> Result<Arc<dyn TrafficObserver>> {
		match self {
			ObserverSpec::Simple {
				rules,
				credential,
				snapshot_cookies,
			} => Ok(Arc::new(SimpleObserver::new(rules, credential.clone(), snapshot_cookies.clone())?)),
			ObserverSpec::LoginOnly { indicator } => Ok(Arc::new(LoginOnlyObserver::new(indicator.clone()))),
		}
	}

	/// Whether this observer can produce a credential without a follow-up.
	pub fn extracts_credentials(&self) -> bool {
		matches!(self, ObserverSpec::Simple { .. })
	}
}

pub(crate) fn compile(pattern: &str) -> Result<regex::Regex> {
	regex::Regex::new(pattern).map_err(|e| Error::Config(format!("invalid pattern {pattern:?}: {e}")))
}

fn url_matches(prefixes: &[String], url: &str) -> bool {
	prefixes.is_empty() || prefixes.iter().any(|prefix| url.starts_with(prefix.as_str()))
}
