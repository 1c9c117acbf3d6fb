//! Login session state machine.
//!
//! ```text
//! INIT -> HEADFUL_LOGIN -> LOGIN_DETECTED -> FINALIZING -------------------------> FINALIZED
//!                                         \-> FOLLOWUP_PENDING -> FOLLOWUP_RUNNING -/
//! ```
//!
//! `CANCELLED` and `FAILED` are reachable from every non-terminal state. Each
//! browser the engine launches is closed before the next phase starts, on
//! every path.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use latchkey_protocol::{ScriptResult, StorageState, TrafficEvent};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::driver::{BrowserHandle, BrowserLauncher, DriverError, DriverResult, LaunchOptions, PageHandle, TrafficHandler};
use crate::error::{Error, LoginFailure, Result};
use crate::followup::{Automation, FollowupAutomation, FollowupSettings};
use crate::observer::{CaptureSlot, TrafficObserver};
use crate::service::ServiceDescriptor;

/// Expression the instructions page sets to `true` when the user continues.
pub const ACKNOWLEDGE_EXPRESSION: &str = "window.latchkeyContinue === true";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
	Init,
	HeadfulLogin,
	LoginDetected,
	Finalizing,
	FollowupPending,
	FollowupRunning,
	Finalized,
	Cancelled,
	Failed,
}

impl SessionState {
	pub fn is_terminal(self) -> bool {
		matches!(self, SessionState::Finalized | SessionState::Cancelled | SessionState::Failed)
	}

	/// Whether the machine may move from `self` to `next`.
	pub fn can_advance_to(self, next: SessionState) -> bool {
		use SessionState::*;
		if self.is_terminal() {
			return false;
		}
		match next {
			Cancelled | Failed => true,
			HeadfulLogin => self == Init,
			LoginDetected => self == HeadfulLogin,
			Finalizing | FollowupPending => self == LoginDetected,
			FollowupRunning => self == FollowupPending,
			Finalized => matches!(self, Finalizing | FollowupRunning),
			Init => false,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			SessionState::Init => "INIT",
			SessionState::HeadfulLogin => "HEADFUL_LOGIN",
			SessionState::LoginDetected => "LOGIN_DETECTED",
			SessionState::Finalizing => "FINALIZING",
			SessionState::FollowupPending => "FOLLOWUP_PENDING",
			SessionState::FollowupRunning => "FOLLOWUP_RUNNING",
			SessionState::Finalized => "FINALIZED",
			SessionState::Cancelled => "CANCELLED",
			SessionState::Failed => "FAILED",
		}
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One login attempt. Owns everything captured along the way.
#[derive(Debug)]
pub struct Session<'a> {
	descriptor: &'a ServiceDescriptor,
	state: SessionState,
	history: Vec<SessionState>,
	capture: Arc<CaptureSlot>,
	snapshot: Option<StorageState>,
}

impl<'a> Session<'a> {
	fn new(descriptor: &'a ServiceDescriptor) -> Self {
		Self {
			descriptor,
			state: SessionState::Init,
			history: vec![SessionState::Init],
			capture: Arc::new(CaptureSlot::new()),
			snapshot: None,
		}
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	fn transition(&mut self, next: SessionState) {
		debug_assert!(self.state.can_advance_to(next), "{} -> {next}", self.state);
		info!(
			target = "latchkey",
			service = %self.descriptor.name,
			from = %self.state,
			to = %next,
			"session transition"
		);
		self.state = next;
		self.history.push(next);
	}
}

/// Outcome of [`LoginEngine::attempt`], including the path the machine took.
#[derive(Debug)]
pub struct LoginAttempt {
	pub service: String,
	pub state: SessionState,
	pub history: Vec<SessionState>,
	pub result: Result<Credential>,
}

/// Runtime strategies bound to one descriptor.
#[derive(Debug, Clone)]
pub struct Strategies {
	pub observer: Arc<dyn TrafficObserver>,
	pub followup: Option<Arc<dyn FollowupAutomation>>,
}

impl Strategies {
	/// Builds the strategies the descriptor declares.
	pub fn for_service(descriptor: &ServiceDescriptor) -> Result<Self> {
		Ok(Self {
			observer: descriptor.observer.build()?,
			followup: descriptor.followup.as_ref().map(|spec| spec.build()),
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
	pub poll_interval: Duration,
	/// Where the headful session's storage state is kept between attempts.
	pub browser_state_path: Option<PathBuf>,
	pub followup: FollowupSettings,
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self {
			poll_interval: DEFAULT_POLL_INTERVAL,
			browser_state_path: None,
			followup: FollowupSettings::default(),
		}
	}
}

/// Runs login sessions against a browser launcher. At most one session per
/// service is active at a time.
pub struct LoginEngine {
	launcher: Arc<dyn BrowserLauncher>,
	settings: EngineSettings,
	active: Mutex<HashSet<String>>,
}

impl fmt::Debug for LoginEngine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LoginEngine")
			.field("settings", &self.settings)
			.field("active", &*self.active.lock())
			.finish()
	}
}

/// Claim on a service name, released on drop.
struct ActiveSession<'e> {
	active: &'e Mutex<HashSet<String>>,
	service: String,
}

impl<'e> ActiveSession<'e> {
	fn claim(active: &'e Mutex<HashSet<String>>, service: &str) -> Result<Self> {
		if !active.lock().insert(service.to_string()) {
			return Err(Error::SessionActive(service.to_string()));
		}
		Ok(Self {
			active,
			service: service.to_string(),
		})
	}
}

impl Drop for ActiveSession<'_> {
	fn drop(&mut self) {
		self.active.lock().remove(&self.service);
	}
}

impl LoginEngine {
	pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: EngineSettings) -> Self {
		Self {
			launcher,
			settings,
			active: Mutex::new(HashSet::new()),
		}
	}

	pub fn settings(&self) -> &EngineSettings {
		&self.settings
	}

	/// Runs a login for `descriptor` and returns the credential.
	pub async fn login(&self, descriptor: &ServiceDescriptor) -> Result<Credential> {
		self.attempt(descriptor).await?.result
	}

	/// Runs a login and reports the terminal state alongside the result.
	///
	/// The outer error is reserved for attempts that never started: invalid
	/// observer configuration or another active session for the same service.
	pub async fn attempt(&self, descriptor: &ServiceDescriptor) -> Result<LoginAttempt> {
		let strategies = Strategies::for_service(descriptor)?;
		self.attempt_with(descriptor, &strategies).await
	}

	/// Like [`LoginEngine::attempt`] with caller-supplied strategies.
	pub async fn attempt_with(&self, descriptor: &ServiceDescriptor, strategies: &Strategies) -> Result<LoginAttempt> {
		let _claim = ActiveSession::claim(&self.active, &descriptor.name)?;
		let mut session = Session::new(descriptor);

		let result = self.drive(&mut session, strategies).await;
		match &result {
			Ok(_) => session.transition(SessionState::Finalized),
			Err(err) if err.is_cancelled() => session.transition(SessionState::Cancelled),
			Err(err) => {
				warn!(target = "latchkey", service = %descriptor.name, error = %err, "login failed");
				session.transition(SessionState::Failed);
			}
		}

		Ok(LoginAttempt {
			service: descriptor.name.clone(),
			state: session.state,
			history: session.history,
			result,
		})
	}

	async fn drive(&self, session: &mut Session<'_>, strategies: &Strategies) -> Result<Credential> {
		let descriptor = session.descriptor;
		let service = descriptor.name.as_str();
		let prior = self.load_prior_snapshot();

		session.transition(SessionState::HeadfulLogin);
		let browser = self
			.launcher
			.launch(LaunchOptions::headful())
			.await
			.map_err(|e| headful_error(service, e))?;
		let detected = self
			.headful_phase(browser.as_ref(), session, &strategies.observer, prior.as_ref())
			.await;
		close_quietly(browser.as_ref(), service).await;
		match detected {
			Ok(true) => {}
			Ok(false) => return Err(cancelled(service)),
			Err(e) => return Err(headful_error(service, e)),
		}
		if let Some(snapshot) = &session.snapshot {
			self.persist_snapshot(service, snapshot);
		}

		let Some(followup) = &strategies.followup else {
			session.transition(SessionState::Finalizing);
			let snapshot = session.snapshot.clone().unwrap_or_default();
			return match strategies.observer.finalize(&session.capture, &snapshot) {
				Ok(Some(credential)) => Ok(credential),
				Ok(None) => Err(Error::login_failed(service, LoginFailure::NoCredentials)),
				Err(reason) => Err(Error::login_failed(service, reason)),
			};
		};

		session.transition(SessionState::FollowupPending);
		if session.snapshot.is_none() {
			return Err(Error::login_failed(
				service,
				LoginFailure::Extraction("browser closed before its state was captured".into()),
			));
		}
		let browser = self
			.launcher
			.launch(LaunchOptions::headless())
			.await
			.map_err(|e| followup_setup_failed(service, "launch_headless", e))?;
		let result = self.followup_phase(browser.as_ref(), session, followup.as_ref()).await;
		close_quietly(browser.as_ref(), service).await;
		result
	}

	/// Runs the visible phase and records the snapshot on the session.
	///
	/// `Ok(false)` means the user closed the browser before login was detected.
	/// Once detected, a browser that is already gone only costs the snapshot.
	async fn headful_phase(
		&self,
		browser: &dyn BrowserHandle,
		session: &mut Session<'_>,
		observer: &Arc<dyn TrafficObserver>,
		prior: Option<&StorageState>,
	) -> DriverResult<bool> {
		let descriptor = session.descriptor;
		let capture = Arc::clone(&session.capture);
		let context = browser.new_context(prior).await?;
		let page = context.new_page().await?;
		let mut closed = page.closed();

		if let Some(lines) = descriptor.instruction_lines() {
			page.set_content(&instructions_page(&descriptor.name, lines)).await?;
			if !self.wait_for_acknowledgement(page.as_ref(), &capture, &mut closed).await? {
				return Ok(false);
			}
		}

		let handler: TrafficHandler = {
			let observer = Arc::clone(observer);
			let capture = Arc::clone(&capture);
			Arc::new(move |event| observer.on_traffic(&event, &capture))
		};
		let _subscription = page.on_traffic(handler).await?;
		page.goto(&descriptor.login_url).await?;

		if !self
			.wait_for_login(page.as_ref(), &capture, observer.as_ref(), &mut closed)
			.await?
		{
			return Ok(false);
		}
		session.transition(SessionState::LoginDetected);

		match context.storage_state().await {
			Ok(snapshot) => session.snapshot = Some(snapshot),
			Err(e) => warn!(
				target = "latchkey",
				service = %descriptor.name,
				error = %e,
				"login detected but browser state could not be captured"
			),
		}
		Ok(true)
	}

	async fn wait_for_acknowledgement(
		&self,
		page: &dyn PageHandle,
		capture: &CaptureSlot,
		closed: &mut watch::Receiver<bool>,
	) -> DriverResult<bool> {
		loop {
			if *closed.borrow() {
				return Ok(false);
			}
			if page.evaluate(ACKNOWLEDGE_EXPRESSION).await? == serde_json::Value::Bool(true) {
				return Ok(true);
			}
			if !self.pause(capture, closed).await {
				return Ok(false);
			}
		}
	}

	/// Blocks until the observer reports completion or the browser closes.
	async fn wait_for_login(
		&self,
		page: &dyn PageHandle,
		capture: &CaptureSlot,
		observer: &dyn TrafficObserver,
		closed: &mut watch::Receiver<bool>,
	) -> DriverResult<bool> {
		loop {
			if capture.is_complete() {
				return Ok(true);
			}
			if *closed.borrow() {
				return Ok(false);
			}
			for (probe, expression) in observer.probes().iter().enumerate() {
				match page.evaluate(expression).await {
					Ok(value) => observer.on_traffic(&TrafficEvent::Script(ScriptResult { probe, value }), capture),
					Err(DriverError::Closed) => return Ok(false),
					Err(e) => debug!(target = "latchkey", probe, error = %e, "probe evaluation failed"),
				}
			}
			if capture.is_complete() {
				return Ok(true);
			}
			if !self.pause(capture, closed).await {
				return Ok(capture.is_complete());
			}
		}
	}

	/// Sleeps one poll interval, waking early on completion or close.
	/// Returns false once the browser is closed.
	async fn pause(&self, capture: &CaptureSlot, closed: &mut watch::Receiver<bool>) -> bool {
		let gone = tokio::select! {
			_ = tokio::time::sleep(self.settings.poll_interval) => false,
			_ = capture.notified() => false,
			changed = closed.changed() => changed.is_err(),
		};
		!gone && !*closed.borrow()
	}

	async fn followup_phase(
		&self,
		browser: &dyn BrowserHandle,
		session: &mut Session<'_>,
		followup: &dyn FollowupAutomation,
	) -> Result<Credential> {
		let descriptor = session.descriptor;
		let service = descriptor.name.as_str();
		let context = browser
			.new_context(session.snapshot.as_ref())
			.await
			.map_err(|e| followup_setup_failed(service, "new_context", e))?;
		let page = context
			.new_page()
			.await
			.map_err(|e| followup_setup_failed(service, "new_page", e))?;

		session.transition(SessionState::FollowupRunning);
		let automation = Automation::new(page.as_ref(), service, self.settings.followup);
		let result = followup.run(&automation).await;
		if let Err(e) = page.close().await {
			debug!(target = "latchkey", service, error = %e, "closing follow-up page failed");
		}

		match result {
			Ok(Some(credential)) => Ok(credential),
			Ok(None) => Err(Error::login_failed(service, LoginFailure::NoCredentials)),
			Err(reason) => Err(Error::login_failed(service, reason)),
		}
	}

	fn load_prior_snapshot(&self) -> Option<StorageState> {
		let path = self.settings.browser_state_path.as_ref()?;
		if !path.exists() {
			return None;
		}
		match StorageState::from_file(path) {
			Ok(state) => {
				debug!(target = "latchkey", path = %path.display(), "resuming browser state");
				Some(state)
			}
			Err(e) => {
				warn!(target = "latchkey", path = %path.display(), error = %e, "ignoring unreadable browser state");
				None
			}
		}
	}

	fn persist_snapshot(&self, service: &str, snapshot: &StorageState) {
		let Some(path) = &self.settings.browser_state_path else {
			return;
		};
		if let Err(e) = snapshot.to_file(path) {
			warn!(target = "latchkey", service, path = %path.display(), error = %e, "failed to save browser state");
		}
	}
}

fn cancelled(service: &str) -> Error {
	Error::LoginCancelled {
		service: service.to_string(),
	}
}

fn headful_error(service: &str, error: DriverError) -> Error {
	if error.is_closed() { cancelled(service) } else { Error::Browser(error) }
}

/// The headless browser could not be prepared; login itself already succeeded.
fn followup_setup_failed(service: &str, step: &str, error: DriverError) -> Error {
	Error::login_failed(
		service,
		LoginFailure::Followup {
			step: step.to_string(),
			reason: error.to_string(),
		},
	)
}

async fn close_quietly(browser: &dyn BrowserHandle, service: &str) {
	if let Err(e) = browser.close().await {
		debug!(target = "latchkey", service, error = %e, "closing browser failed");
	}
}

/// Interstitial shown before the login page.
fn instructions_page(service: &str, lines: &[String]) -> String {
	let items: String = lines.iter().map(|line| format!("<li>{}</li>", escape_html(line))).collect();
	format!(
		r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Log in to {service}</title></head>
<body style="font-family: sans-serif; max-width: 40em; margin: 4em auto;">
<h1>Log in to {service}</h1>
<ol>{items}</ol>
<button id="latchkey-continue" onclick="window.latchkeyContinue = true; this.disabled = true;">Continue</button>
</body>
</html>"#,
		service = escape_html(service),
	)
}

fn escape_html(text: &str) -> String {
	let mut escaped = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&#39;"),
			c => escaped.push(c),
		}
	}
	escaped
}
