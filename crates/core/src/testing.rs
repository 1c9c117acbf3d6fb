//! Scripted in-memory browser driver.
//!
//! [`FakeLauncher`] replays a [`FakeScript`]: traffic is dispatched from a
//! spawned task after the login page is opened, the user may "close" the
//! browser once the traffic is drained, and element queries are answered from a
//! fixed DOM. Every interaction is recorded in a shared [`FakeLog`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use latchkey_protocol::{Cookie, StorageState, TrafficEvent};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::driver::{
	BrowserHandle, BrowserLauncher, ContextHandle, DriverError, DriverResult, LaunchOptions, PageHandle, TrafficHandler,
	TrafficSubscription,
};
use crate::session::ACKNOWLEDGE_EXPRESSION;

/// Element in the fake DOM.
#[derive(Debug, Clone, Default)]
pub struct FakeElement {
	pub text: Option<String>,
	pub attributes: BTreeMap<String, String>,
	pub hidden: bool,
}

impl FakeElement {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn text(mut self, text: impl Into<String>) -> Self {
		self.text = Some(text.into());
		self
	}

	pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.insert(name.into(), value.into());
		self
	}

	pub fn hidden(mut self) -> Self {
		self.hidden = true;
		self
	}
}

/// What the fake browser does and answers.
#[derive(Debug, Clone, Default)]
pub struct FakeScript {
	traffic: Vec<TrafficEvent>,
	close_after_traffic: bool,
	evaluations: HashMap<String, Value>,
	storage_state: StorageState,
	elements: HashMap<String, FakeElement>,
	fail_launch: Option<DriverError>,
	fail_headless_launch: Option<DriverError>,
	close_before_snapshot: bool,
}

impl FakeScript {
	pub fn new() -> Self {
		Self::default()
	}

	/// Traffic dispatched, in order, after the headful page navigates.
	pub fn traffic(mut self, event: TrafficEvent) -> Self {
		self.traffic.push(event);
		self
	}

	/// The user closes the visible browser after the scripted traffic.
	pub fn close_after_traffic(mut self) -> Self {
		self.close_after_traffic = true;
		self
	}

	/// Value returned when `expression` is evaluated on any page.
	pub fn evaluation(mut self, expression: impl Into<String>, value: Value) -> Self {
		self.evaluations.insert(expression.into(), value);
		self
	}

	/// Snapshot returned by every context.
	pub fn storage_state(mut self, state: StorageState) -> Self {
		self.storage_state = state;
		self
	}

	pub fn element(mut self, selector: impl Into<String>, element: FakeElement) -> Self {
		self.elements.insert(selector.into(), element);
		self
	}

	/// Every launch fails with `error`.
	pub fn fail_launch(mut self, error: DriverError) -> Self {
		self.fail_launch = Some(error);
		self
	}

	/// Only headless launches fail with `error`.
	pub fn fail_headless_launch(mut self, error: DriverError) -> Self {
		self.fail_headless_launch = Some(error);
		self
	}

	/// The browser is gone by the time its storage state is read.
	pub fn close_before_snapshot(mut self) -> Self {
		self.close_before_snapshot = true;
		self
	}
}

/// One launched browser as seen by the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
	pub headless: bool,
	/// State each context was seeded with, in creation order.
	pub seeded: Vec<Option<StorageState>>,
	pub closed: bool,
}

#[derive(Default)]
struct LogInner {
	launches: Vec<LaunchRecord>,
	navigations: Vec<String>,
	contents: Vec<String>,
	typed: BTreeMap<String, String>,
	clicks: Vec<String>,
	checked: Vec<String>,
	closers: Vec<Arc<watch::Sender<bool>>>,
}

/// Shared record of everything the fake driver was asked to do.
#[derive(Clone, Default)]
pub struct FakeLog {
	inner: Arc<Mutex<LogInner>>,
}

impl FakeLog {
	pub fn launches(&self) -> Vec<LaunchRecord> {
		self.inner.lock().launches.clone()
	}

	/// True when every launched browser was closed.
	pub fn all_closed(&self) -> bool {
		self.inner.lock().launches.iter().all(|launch| launch.closed)
	}

	pub fn navigations(&self) -> Vec<String> {
		self.inner.lock().navigations.clone()
	}

	/// HTML documents set with `set_content`.
	pub fn contents(&self) -> Vec<String> {
		self.inner.lock().contents.clone()
	}

	pub fn typed(&self, selector: &str) -> Option<String> {
		self.inner.lock().typed.get(selector).cloned()
	}

	pub fn clicks(&self) -> Vec<String> {
		self.inner.lock().clicks.clone()
	}

	pub fn checked(&self) -> Vec<String> {
		self.inner.lock().checked.clone()
	}

	/// Simulates the user closing every open browser window.
	pub fn user_close_all(&self) {
		for closer in &self.inner.lock().closers {
			let _ = closer.send(true);
		}
	}
}

impl std::fmt::Debug for FakeLog {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FakeLog").field("launches", &self.inner.lock().launches).finish()
	}
}

/// [`BrowserLauncher`] that replays a [`FakeScript`].
#[derive(Debug, Clone)]
pub struct FakeLauncher {
	script: Arc<FakeScript>,
	log: FakeLog,
}

impl FakeLauncher {
	pub fn new(script: FakeScript) -> Self {
		Self {
			script: Arc::new(script),
			log: FakeLog::default(),
		}
	}

	pub fn log(&self) -> FakeLog {
		self.log.clone()
	}
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
	async fn launch(&self, options: LaunchOptions) -> DriverResult<Box<dyn BrowserHandle>> {
		if let Some(error) = &self.script.fail_launch {
			return Err(error.clone());
		}
		if let Some(error) = self.script.fail_headless_launch.as_ref().filter(|_| options.headless) {
			return Err(error.clone());
		}
		let (closed, _) = watch::channel(false);
		let closed = Arc::new(closed);
		let index = {
			let mut inner = self.log.inner.lock();
			inner.launches.push(LaunchRecord {
				headless: options.headless,
				seeded: Vec::new(),
				closed: false,
			});
			inner.closers.push(Arc::clone(&closed));
			inner.launches.len() - 1
		};
		Ok(Box::new(FakeBrowser {
			shared: Arc::new(Shared {
				index,
				headless: options.headless,
				script: Arc::clone(&self.script),
				log: self.log.clone(),
				closed,
				handlers: Mutex::new(Vec::new()),
				next_handler: AtomicU64::new(0),
				location: Mutex::new("about:blank".to_string()),
			}),
		}))
	}
}

struct Shared {
	index: usize,
	headless: bool,
	script: Arc<FakeScript>,
	log: FakeLog,
	closed: Arc<watch::Sender<bool>>,
	handlers: Mutex<Vec<(u64, TrafficHandler)>>,
	next_handler: AtomicU64,
	location: Mutex<String>,
}

impl Shared {
	fn ensure_open(&self) -> DriverResult<()> {
		if *self.closed.borrow() { Err(DriverError::Closed) } else { Ok(()) }
	}

	fn element(&self, selector: &str) -> DriverResult<&FakeElement> {
		self.ensure_open()?;
		self.script.elements.get(selector).ok_or_else(|| DriverError::ElementNotFound {
			selector: selector.to_string(),
		})
	}

	fn dispatch(&self, event: &TrafficEvent) {
		let handlers: Vec<TrafficHandler> = self.handlers.lock().iter().map(|(_, handler)| Arc::clone(handler)).collect();
		for handler in handlers {
			handler(event.clone());
		}
	}
}

struct FakeBrowser {
	shared: Arc<Shared>,
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
	async fn new_context(&self, state: Option<&StorageState>) -> DriverResult<Box<dyn ContextHandle>> {
		self.shared.ensure_open()?;
		let mut inner = self.shared.log.inner.lock();
		if let Some(launch) = inner.launches.get_mut(self.shared.index) {
			launch.seeded.push(state.cloned());
		}
		Ok(Box::new(FakeContext {
			shared: Arc::clone(&self.shared),
		}))
	}

	async fn close(&self) -> DriverResult<()> {
		let _ = self.shared.closed.send(true);
		let mut inner = self.shared.log.inner.lock();
		if let Some(launch) = inner.launches.get_mut(self.shared.index) {
			launch.closed = true;
		}
		Ok(())
	}
}

struct FakeContext {
	shared: Arc<Shared>,
}

#[async_trait]
impl ContextHandle for FakeContext {
	async fn new_page(&self) -> DriverResult<Box<dyn PageHandle>> {
		self.shared.ensure_open()?;
		Ok(Box::new(FakePage {
			shared: Arc::clone(&self.shared),
		}))
	}

	async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
		self.shared.ensure_open()?;
		Ok(self.shared.script.storage_state.cookies.clone())
	}

	async fn storage_state(&self) -> DriverResult<StorageState> {
		if self.shared.script.close_before_snapshot {
			let _ = self.shared.closed.send(true);
		}
		self.shared.ensure_open()?;
		Ok(self.shared.script.storage_state.clone())
	}

	async fn close(&self) -> DriverResult<()> {
		Ok(())
	}
}

struct FakePage {
	shared: Arc<Shared>,
}

#[async_trait]
impl PageHandle for FakePage {
	async fn url(&self) -> DriverResult<String> {
		self.shared.ensure_open()?;
		Ok(self.shared.location.lock().clone())
	}

	async fn goto(&self, url: &str) -> DriverResult<()> {
		self.shared.ensure_open()?;
		*self.shared.location.lock() = url.to_string();
		self.shared.log.inner.lock().navigations.push(url.to_string());

		if !self.shared.headless {
			let shared = Arc::clone(&self.shared);
			tokio::spawn(async move {
				for event in &shared.script.traffic {
					tokio::task::yield_now().await;
					shared.dispatch(event);
				}
				if shared.script.close_after_traffic {
					tokio::time::sleep(Duration::from_millis(5)).await;
					let _ = shared.closed.send(true);
				}
			});
		}
		Ok(())
	}

	async fn set_content(&self, html: &str) -> DriverResult<()> {
		self.shared.ensure_open()?;
		self.shared.log.inner.lock().contents.push(html.to_string());
		Ok(())
	}

	async fn on_traffic(&self, handler: TrafficHandler) -> DriverResult<TrafficSubscription> {
		self.shared.ensure_open()?;
		let id = self.shared.next_handler.fetch_add(1, Ordering::Relaxed);
		self.shared.handlers.lock().push((id, handler));
		let shared = Arc::clone(&self.shared);
		Ok(TrafficSubscription::new(move || {
			shared.handlers.lock().retain(|(handler_id, _)| *handler_id != id);
		}))
	}

	fn closed(&self) -> watch::Receiver<bool> {
		self.shared.closed.subscribe()
	}

	async fn evaluate(&self, expression: &str) -> DriverResult<Value> {
		self.shared.ensure_open()?;
		match self.shared.script.evaluations.get(expression) {
			Some(value) => Ok(value.clone()),
			None if expression == ACKNOWLEDGE_EXPRESSION => Ok(Value::Bool(true)),
			None => Ok(Value::Null),
		}
	}

	async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<()> {
		self.shared.ensure_open()?;
		if self.shared.script.elements.contains_key(selector) {
			Ok(())
		} else {
			Err(DriverError::Timeout {
				what: selector.to_string(),
				ms: timeout.as_millis() as u64,
			})
		}
	}

	async fn click(&self, selector: &str) -> DriverResult<()> {
		self.shared.element(selector)?;
		self.shared.log.inner.lock().clicks.push(selector.to_string());
		Ok(())
	}

	async fn press_character(&self, selector: &str, character: char) -> DriverResult<()> {
		self.shared.element(selector)?;
		self.shared
			.log
			.inner
			.lock()
			.typed
			.entry(selector.to_string())
			.or_default()
			.push(character);
		Ok(())
	}

	async fn select_option(&self, selector: &str, _value: &str) -> DriverResult<()> {
		self.shared.element(selector)?;
		Ok(())
	}

	async fn set_checked(&self, selector: &str, checked: bool) -> DriverResult<()> {
		self.shared.element(selector)?;
		if checked {
			self.shared.log.inner.lock().checked.push(selector.to_string());
		}
		Ok(())
	}

	async fn is_visible(&self, selector: &str) -> DriverResult<bool> {
		self.shared.ensure_open()?;
		Ok(self.shared.script.elements.get(selector).is_some_and(|element| !element.hidden))
	}

	async fn attribute(&self, selector: &str, name: &str) -> DriverResult<Option<String>> {
		Ok(self.shared.element(selector)?.attributes.get(name).cloned())
	}

	async fn text_content(&self, selector: &str) -> DriverResult<Option<String>> {
		Ok(self.shared.element(selector)?.text.clone())
	}

	async fn close(&self) -> DriverResult<()> {
		Ok(())
	}
}
