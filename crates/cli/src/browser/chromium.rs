//! Chromium driver over the DevTools protocol.
//!
//! Each launch gets a throwaway profile directory, so nothing from the user's
//! own browser leaks in and nothing from a login outlives the process except
//! the explicit [`StorageState`] snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
	self, CookieParam, CookieSameSite, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
	EventRequestWillBeSentExtraInfo, EventResponseReceived, GetAllCookiesParams, GetResponseBodyParams, Headers,
	TimeSinceEpoch,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use latchkey::driver::{DriverResult, TrafficHandler};
use latchkey::protocol::{Cookie, LocalStorageEntry, OriginState, RequestEvent, ResponseEvent, SameSite, StorageState, TrafficEvent};
use latchkey::{BrowserHandle, BrowserLauncher, ContextHandle, DriverError, LaunchOptions, PageHandle, TrafficSubscription};
use parking_lot::Mutex;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::script;

const SELECTOR_POLL: Duration = Duration::from_millis(100);

/// How long an error waits for the close signal before being reported as-is.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Bodies above this size are not attached to response events.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Launches a local Chromium found on the system.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
	async fn launch(&self, options: LaunchOptions) -> DriverResult<Box<dyn BrowserHandle>> {
		let profile = tempfile::Builder::new()
			.prefix("latchkey-chromium-")
			.tempdir()
			.map_err(|e| DriverError::other(format!("cannot create browser profile: {e}")))?;

		let mut builder = BrowserConfig::builder().user_data_dir(profile.path());
		if !options.headless {
			builder = builder.with_head();
		}
		let config = builder.build().map_err(|e| DriverError::other(format!("invalid browser config: {e}")))?;

		let (browser, mut handler) = Browser::launch(config)
			.await
			.map_err(|e| DriverError::other(format!("failed to launch Chromium: {e}")))?;

		let (closed_tx, _) = watch::channel(false);
		let closed_tx = Arc::new(closed_tx);
		let signal = Arc::clone(&closed_tx);
		let handler_task = tokio::spawn(async move {
			while let Some(event) = handler.next().await {
				if let Err(e) = event {
					debug!(target = "latchkey", error = %e, "browser handler error");
				}
			}
			debug!(target = "latchkey", "browser connection ended");
			signal.send_replace(true);
		});

		debug!(target = "latchkey", headless = options.headless, profile = %profile.path().display(), "launched Chromium");
		Ok(Box::new(ChromiumBrowser {
			shared: Arc::new(Shared {
				browser: tokio::sync::Mutex::new(browser),
				closed: closed_tx,
			}),
			handler_task: Mutex::new(Some(handler_task)),
			_profile: profile,
		}))
	}
}

struct Shared {
	browser: tokio::sync::Mutex<Browser>,
	closed: Arc<watch::Sender<bool>>,
}

impl Shared {
	fn is_closed(&self) -> bool {
		*self.closed.borrow()
	}

	/// Maps a protocol error, reporting [`DriverError::Closed`] once the connection is gone.
	async fn classify(&self, err: CdpError) -> DriverError {
		let mut closed = self.closed.subscribe();
		match tokio::time::timeout(CLOSE_GRACE, closed.wait_for(|c| *c)).await {
			Ok(Ok(_)) => DriverError::Closed,
			_ => DriverError::other(err),
		}
	}

	async fn settle<T>(&self, result: Result<T, CdpError>) -> DriverResult<T> {
		match result {
			Ok(value) => Ok(value),
			Err(err) => Err(self.classify(err).await),
		}
	}
}

struct ChromiumBrowser {
	shared: Arc<Shared>,
	handler_task: Mutex<Option<JoinHandle<()>>>,
	_profile: TempDir,
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
	async fn new_context(&self, state: Option<&StorageState>) -> DriverResult<Box<dyn ContextHandle>> {
		if self.shared.is_closed() {
			return Err(DriverError::Closed);
		}
		Ok(Box::new(ChromiumContext {
			shared: Arc::clone(&self.shared),
			seed: state.cloned(),
			pages: Mutex::new(Vec::new()),
		}))
	}

	async fn close(&self) -> DriverResult<()> {
		if !self.shared.is_closed() {
			let mut browser = self.shared.browser.lock().await;
			if let Err(e) = browser.close().await {
				debug!(target = "latchkey", error = %e, "browser close failed");
			}
			if let Err(e) = browser.wait().await {
				debug!(target = "latchkey", error = %e, "waiting for browser exit failed");
			}
		}
		let task = self.handler_task.lock().take();
		if let Some(task) = task {
			if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
				debug!(target = "latchkey", "browser handler did not stop in time");
			}
		}
		self.shared.closed.send_replace(true);
		Ok(())
	}
}

/// One launch maps to a single browser context; pages are tracked for snapshots.
struct ChromiumContext {
	shared: Arc<Shared>,
	seed: Option<StorageState>,
	pages: Mutex<Vec<Page>>,
}

impl ChromiumContext {
	async fn any_page(&self) -> DriverResult<Page> {
		let existing = self.pages.lock().first().cloned();
		match existing {
			Some(page) => Ok(page),
			None => {
				let browser = self.shared.browser.lock().await;
				let page = browser.new_page("about:blank").await;
				self.shared.settle(page).await
			}
		}
	}

	async fn apply_seed(&self, page: &Page, seed: &StorageState) -> DriverResult<()> {
		let cookies = seed.cookies.iter().filter_map(cookie_param).collect::<Vec<_>>();
		if !cookies.is_empty() {
			debug!(target = "latchkey", count = cookies.len(), "seeding cookies");
			let result = page.set_cookies(cookies).await.map(|_| ());
			self.shared.settle(result).await?;
		}
		for origin in &seed.origins {
			let entries = origin
				.local_storage
				.iter()
				.map(|e| (e.name.clone(), e.value.clone()))
				.collect::<Vec<_>>();
			if entries.is_empty() {
				continue;
			}
			let source = script::seed_local_storage(&origin.origin, &entries);
			let result = page
				.execute(AddScriptToEvaluateOnNewDocumentParams::new(source))
				.await
				.map(|_| ());
			self.shared.settle(result).await?;
		}
		Ok(())
	}
}

#[async_trait]
impl ContextHandle for ChromiumContext {
	async fn new_page(&self) -> DriverResult<Box<dyn PageHandle>> {
		let page = {
			let browser = self.shared.browser.lock().await;
			let page = browser.new_page("about:blank").await;
			self.shared.settle(page).await?
		};
		if let Some(seed) = &self.seed {
			self.apply_seed(&page, seed).await?;
		}
		self.pages.lock().push(page.clone());
		Ok(Box::new(ChromiumPage {
			page,
			shared: Arc::clone(&self.shared),
		}))
	}

	async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
		let page = self.any_page().await?;
		let result = page.execute(GetAllCookiesParams::default()).await;
		let response = self.shared.settle(result).await?;
		Ok(response.result.cookies.iter().map(convert_cookie).collect())
	}

	async fn storage_state(&self) -> DriverResult<StorageState> {
		let cookies = self.cookies().await?;
		let pages = self.pages.lock().clone();
		let mut origins: Vec<OriginState> = Vec::new();
		for page in pages {
			let value = match page.evaluate(script::LOCAL_STORAGE).await {
				Ok(result) => result.value().cloned().unwrap_or(Value::Null),
				Err(e) => {
					debug!(target = "latchkey", error = %e, "skipping localStorage of unreachable page");
					continue;
				}
			};
			if let Some(origin) = origin_state(&value) {
				if !origins.iter().any(|o| o.origin == origin.origin) {
					origins.push(origin);
				}
			}
		}
		Ok(StorageState { cookies, origins })
	}

	async fn close(&self) -> DriverResult<()> {
		let pages = std::mem::take(&mut *self.pages.lock());
		for page in pages {
			if let Err(e) = page.close().await {
				debug!(target = "latchkey", error = %e, "page close failed");
			}
		}
		Ok(())
	}
}

struct ChromiumPage {
	page: Page,
	shared: Arc<Shared>,
}

impl ChromiumPage {
	async fn eval(&self, expression: String) -> DriverResult<Value> {
		let result = self.page.evaluate(expression).await;
		let result = self.shared.settle(result).await?;
		Ok(result.value().cloned().unwrap_or(Value::Null))
	}

	async fn element(&self, selector: &str) -> DriverResult<chromiumoxide::Element> {
		match self.page.find_element(selector).await {
			Ok(element) => Ok(element),
			Err(_) if self.shared.is_closed() => Err(DriverError::Closed),
			Err(_) => Err(DriverError::ElementNotFound {
				selector: selector.to_string(),
			}),
		}
	}

	async fn poll_selector(&self, selector: &str) -> DriverResult<()> {
		let probe = script::exists(selector);
		loop {
			if self.eval(probe.clone()).await? == Value::Bool(true) {
				return Ok(());
			}
			tokio::time::sleep(SELECTOR_POLL).await;
		}
	}

	/// Reads a `{found, value}` probe result.
	async fn lookup(&self, selector: &str, expression: String) -> DriverResult<Option<String>> {
		let value = self.eval(expression).await?;
		if value.get("found").and_then(Value::as_bool) != Some(true) {
			return Err(DriverError::ElementNotFound {
				selector: selector.to_string(),
			});
		}
		Ok(value.get("value").and_then(Value::as_str).map(str::to_string))
	}
}

#[async_trait]
impl PageHandle for ChromiumPage {
	async fn url(&self) -> DriverResult<String> {
		let url = self.page.url().await;
		Ok(self.shared.settle(url).await?.unwrap_or_default())
	}

	async fn goto(&self, url: &str) -> DriverResult<()> {
		let result = self.page.goto(url).await.map(|_| ());
		self.shared.settle(result).await
	}

	async fn set_content(&self, html: &str) -> DriverResult<()> {
		self.eval(script::replace_document(html)).await.map(|_| ())
	}

	async fn on_traffic(&self, handler: TrafficHandler) -> DriverResult<TrafficSubscription> {
		let page = &self.page;
		let requests = page.event_listener::<EventRequestWillBeSent>().await;
		let mut requests = self.shared.settle(requests).await?;
		let extra = page.event_listener::<EventRequestWillBeSentExtraInfo>().await;
		let mut extra = self.shared.settle(extra).await?;
		let responses = page.event_listener::<EventResponseReceived>().await;
		let mut responses = self.shared.settle(responses).await?;
		let finished = page.event_listener::<EventLoadingFinished>().await;
		let mut finished = self.shared.settle(finished).await?;
		let failed = page.event_listener::<EventLoadingFailed>().await;
		let mut failed = self.shared.settle(failed).await?;

		let body_page = page.clone();
		let task = tokio::spawn(async move {
			let mut tracker = RequestTracker::default();
			loop {
				tokio::select! {
					Some(event) = requests.next() => {
						let request = tracker.started(&event);
						handler(TrafficEvent::Request(request));
					}
					Some(event) = extra.next() => {
						if let Some(request) = tracker.extra_headers(&event) {
							handler(TrafficEvent::Request(request));
						}
					}
					Some(event) = responses.next() => {
						handler(TrafficEvent::Response(tracker.responded(&event)));
					}
					Some(event) = finished.next() => {
						let id = event.request_id.inner().clone();
						if let Some(response) = tracker.take_textual(&id) {
							if let Some(body) = response_body(&body_page, &event.request_id).await {
								handler(TrafficEvent::Response(response.body(body)));
							}
						}
					}
					Some(event) = failed.next() => {
						tracker.forget(event.request_id.inner());
					}
					else => break,
				}
			}
		});
		Ok(TrafficSubscription::new(move || task.abort()))
	}

	fn closed(&self) -> watch::Receiver<bool> {
		self.shared.closed.subscribe()
	}

	async fn evaluate(&self, expression: &str) -> DriverResult<Value> {
		self.eval(expression.to_string()).await
	}

	async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> DriverResult<()> {
		match tokio::time::timeout(timeout, self.poll_selector(selector)).await {
			Ok(result) => result,
			Err(_) => Err(DriverError::Timeout {
				what: selector.to_string(),
				ms: timeout.as_millis() as u64,
			}),
		}
	}

	async fn click(&self, selector: &str) -> DriverResult<()> {
		let element = self.element(selector).await?;
		let result = element.click().await.map(|_| ());
		self.shared.settle(result).await
	}

	async fn press_character(&self, selector: &str, character: char) -> DriverResult<()> {
		let element = self.element(selector).await?;
		let focused = element.focus().await.map(|_| ());
		self.shared.settle(focused).await?;
		let typed = element.type_str(character.to_string()).await.map(|_| ());
		self.shared.settle(typed).await
	}

	async fn select_option(&self, selector: &str, value: &str) -> DriverResult<()> {
		match self.eval(script::select_value(selector, value)).await? {
			Value::Bool(true) => Ok(()),
			_ => Err(DriverError::ElementNotFound {
				selector: selector.to_string(),
			}),
		}
	}

	async fn set_checked(&self, selector: &str, checked: bool) -> DriverResult<()> {
		match self.eval(script::checked_state(selector)).await? {
			Value::Bool(current) if current == checked => Ok(()),
			Value::Bool(_) => self.click(selector).await,
			_ => Err(DriverError::ElementNotFound {
				selector: selector.to_string(),
			}),
		}
	}

	async fn is_visible(&self, selector: &str) -> DriverResult<bool> {
		Ok(self.eval(script::is_visible(selector)).await? == Value::Bool(true))
	}

	async fn attribute(&self, selector: &str, name: &str) -> DriverResult<Option<String>> {
		self.lookup(selector, script::attribute(selector, name)).await
	}

	async fn text_content(&self, selector: &str) -> DriverResult<Option<String>> {
		self.lookup(selector, script::text_content(selector)).await
	}

	async fn close(&self) -> DriverResult<()> {
		if self.shared.is_closed() {
			return Ok(());
		}
		if let Err(e) = self.page.clone().close().await {
			debug!(target = "latchkey", error = %e, "page close failed");
		}
		Ok(())
	}
}

/// In-flight request bookkeeping keyed by DevTools request id.
///
/// `requestWillBeSent` lacks cookies and some security headers; the matching
/// `ExtraInfo` event carries the full set, so requests may be reported twice.
#[derive(Default)]
struct RequestTracker {
	inflight: HashMap<String, Pending>,
}

struct Pending {
	request: RequestEvent,
	response: Option<ResponseEvent>,
}

impl RequestTracker {
	fn started(&mut self, event: &EventRequestWillBeSent) -> RequestEvent {
		let mut request = RequestEvent::new(event.request.url.clone());
		request.method = event.request.method.clone();
		request.headers = header_map(&event.request.headers);
		let id = event.request_id.inner().clone();
		// Redirects reuse the id; keep headers learned from extra info.
		let pending = self.inflight.entry(id).or_insert_with(|| Pending {
			request: RequestEvent::new(String::new()),
			response: None,
		});
		let learned = std::mem::take(&mut pending.request.headers);
		pending.request = request.clone();
		for (name, value) in learned {
			pending.request.headers.entry(name).or_insert(value);
		}
		pending.response = None;
		request
	}

	fn extra_headers(&mut self, event: &EventRequestWillBeSentExtraInfo) -> Option<RequestEvent> {
		let id = event.request_id.inner().clone();
		let pending = self.inflight.entry(id).or_insert_with(|| Pending {
			request: RequestEvent::new(String::new()),
			response: None,
		});
		pending.request.headers.extend(header_map(&event.headers));
		// Extra info can arrive first; report it once the URL is known.
		(!pending.request.url.is_empty()).then(|| pending.request.clone())
	}

	fn responded(&mut self, event: &EventResponseReceived) -> ResponseEvent {
		let status = u16::try_from(event.response.status).unwrap_or_default();
		let mut response = ResponseEvent::new(event.response.url.clone(), status);
		response.headers = header_map(&event.response.headers);
		self.record_response(event.request_id.inner(), response)
	}

	/// Pairs a response with its request. Only textual responses stay in
	/// flight to have their body read; the rest are dropped here.
	fn record_response(&mut self, id: &str, mut response: ResponseEvent) -> ResponseEvent {
		let Some(pending) = self.inflight.get_mut(id) else {
			return response;
		};
		response.request_headers = pending.request.headers.clone();
		if is_textual(&response) {
			pending.response = Some(response.clone());
		} else {
			self.inflight.remove(id);
		}
		response
	}

	/// Removes a finished request, returning its response if the body is worth reading.
	fn take_textual(&mut self, id: &str) -> Option<ResponseEvent> {
		self.inflight.remove(id)?.response.filter(is_textual)
	}

	fn forget(&mut self, id: &str) {
		self.inflight.remove(id);
	}
}

fn is_textual(response: &ResponseEvent) -> bool {
	let content_type = response.headers.get("content-type").map(String::as_str).unwrap_or_default();
	content_type.contains("json") || content_type.starts_with("text/")
}

async fn response_body(page: &Page, request_id: &network::RequestId) -> Option<String> {
	match page.execute(GetResponseBodyParams::new(request_id.clone())).await {
		Ok(response) if !response.result.base64_encoded && response.result.body.len() <= MAX_BODY_BYTES => {
			Some(response.result.body.clone())
		}
		Ok(_) => None,
		Err(e) => {
			debug!(target = "latchkey", error = %e, "response body unavailable");
			None
		}
	}
}

fn header_map(headers: &Headers) -> BTreeMap<String, String> {
	let Some(object) = headers.inner().as_object() else {
		return BTreeMap::new();
	};
	object
		.iter()
		.map(|(name, value)| {
			let value = match value {
				Value::String(s) => s.clone(),
				other => other.to_string(),
			};
			(name.to_ascii_lowercase(), value)
		})
		.collect()
}

fn convert_cookie(cookie: &network::Cookie) -> Cookie {
	let mut converted = Cookie::new(cookie.name.clone(), cookie.value.clone(), cookie.domain.clone())
		.path(cookie.path.clone())
		.http_only(cookie.http_only)
		.secure(cookie.secure);
	converted.expires = Some(if cookie.session { -1.0 } else { cookie.expires });
	converted.same_site = cookie.same_site.as_ref().map(|s| match s {
		CookieSameSite::Strict => SameSite::Strict,
		CookieSameSite::Lax => SameSite::Lax,
		CookieSameSite::None => SameSite::None,
	});
	converted
}

fn cookie_param(cookie: &Cookie) -> Option<CookieParam> {
	let mut builder = CookieParam::builder().name(cookie.name.clone()).value(cookie.value.clone());
	if let Some(domain) = &cookie.domain {
		builder = builder.domain(domain.clone());
	}
	if let Some(path) = &cookie.path {
		builder = builder.path(path.clone());
	}
	if let Some(secure) = cookie.secure {
		builder = builder.secure(secure);
	}
	if let Some(http_only) = cookie.http_only {
		builder = builder.http_only(http_only);
	}
	if let Some(expires) = cookie.expires.filter(|e| *e > 0.0) {
		builder = builder.expires(TimeSinceEpoch::new(expires));
	}
	if let Some(same_site) = cookie.same_site {
		builder = builder.same_site(match same_site {
			SameSite::Strict => CookieSameSite::Strict,
			SameSite::Lax => CookieSameSite::Lax,
			SameSite::None => CookieSameSite::None,
		});
	}
	match builder.build() {
		Ok(param) => Some(param),
		Err(e) => {
			warn!(target = "latchkey", cookie = %cookie.name, error = %e, "skipping unusable cookie");
			None
		}
	}
}

fn origin_state(value: &Value) -> Option<OriginState> {
	let origin = value.get("origin")?.as_str()?;
	if !origin.starts_with("http") {
		return None;
	}
	let local_storage = value
		.get("entries")?
		.as_array()?
		.iter()
		.filter_map(|pair| {
			let name = pair.get(0)?.as_str()?;
			let value = pair.get(1)?.as_str()?;
			Some(LocalStorageEntry {
				name: name.to_string(),
				value: value.to_string(),
			})
		})
		.collect();
	Some(OriginState {
		origin: origin.to_string(),
		local_storage,
	})
}
