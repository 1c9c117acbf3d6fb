//! Session state machine against the scripted driver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use latchkey::followup::StepResult;
use latchkey::observer::LoginIndicator;
use latchkey::protocol::{Cookie, RequestEvent, ResponseEvent, StorageState, TrafficEvent};
use latchkey::testing::{FakeElement, FakeLauncher, FakeScript};
use latchkey::{
	Automation, Credential, EngineSettings, Error, FollowupAutomation, FollowupSettings, FollowupSpec, LoginEngine, LoginFailure,
	ObserverSpec, ServiceDescriptor, SessionState, Strategies,
};
use tempfile::TempDir;

fn settings() -> EngineSettings {
	EngineSettings {
		poll_interval: Duration::from_millis(10),
		browser_state_path: None,
		followup: FollowupSettings {
			step_timeout: Duration::from_millis(20),
			typing_delay_ms: (0, 0),
		},
	}
}

fn engine(launcher: &FakeLauncher) -> LoginEngine {
	LoginEngine::new(Arc::new(launcher.clone()), settings())
}

fn example_service() -> ServiceDescriptor {
	ServiceDescriptor::new("example", "https://example.com/login", ObserverSpec::bearer_header("https://example.com/"))
		.api_prefix("https://api.example.com/")
}

fn bearer_request(url: &str, token: &str) -> TrafficEvent {
	TrafficEvent::Request(RequestEvent::new(url).header("authorization", format!("Bearer {token}")))
}

#[tokio::test]
async fn captured_bearer_token_finalizes_without_followup() {
	let launcher = FakeLauncher::new(
		FakeScript::new()
			.traffic(TrafficEvent::Request(RequestEvent::new("https://example.com/login")))
			.traffic(bearer_request("https://example.com/app", "tok-123")),
	);

	let attempt = engine(&launcher).attempt(&example_service()).await.unwrap();

	assert_eq!(attempt.state, SessionState::Finalized);
	assert_eq!(
		attempt.history,
		vec![
			SessionState::Init,
			SessionState::HeadfulLogin,
			SessionState::LoginDetected,
			SessionState::Finalizing,
			SessionState::Finalized,
		]
	);
	let credential = attempt.result.unwrap();
	assert_eq!(credential, Credential::bearer("tok-123"));
	assert_eq!(
		credential.header_pairs(),
		vec![("Authorization".to_string(), "Bearer tok-123".to_string())]
	);

	let log = launcher.log();
	assert_eq!(log.launches().len(), 1);
	assert!(!log.launches()[0].headless);
	assert!(log.all_closed());
	assert_eq!(log.navigations(), vec!["https://example.com/login"]);
}

#[tokio::test]
async fn closing_the_browser_cancels() {
	let launcher = FakeLauncher::new(
		FakeScript::new()
			.traffic(TrafficEvent::Request(RequestEvent::new("https://example.com/login")))
			.close_after_traffic(),
	);

	let attempt = engine(&launcher).attempt(&example_service()).await.unwrap();

	assert_eq!(attempt.state, SessionState::Cancelled);
	assert!(!attempt.history.contains(&SessionState::Failed));
	let err = attempt.result.unwrap_err();
	assert!(err.is_cancelled(), "{err}");
	assert!(launcher.log().all_closed());
}

#[tokio::test]
async fn closing_while_instructions_are_shown_cancels() {
	let launcher = FakeLauncher::new(
		FakeScript::new().evaluation(latchkey::session::ACKNOWLEDGE_EXPRESSION, serde_json::json!(false)),
	);
	let engine = engine(&launcher);
	let service = example_service().instructions(["Accept all cookies."]);
	let log = launcher.log();

	let closer = tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(30)).await;
		log.user_close_all();
	});
	let attempt = engine.attempt(&service).await.unwrap();
	closer.await.unwrap();

	assert_eq!(attempt.state, SessionState::Cancelled);
	let log = launcher.log();
	assert_eq!(log.contents().len(), 1);
	assert!(log.contents()[0].contains("Accept all cookies."));
	assert!(log.navigations().is_empty());
	assert!(log.all_closed());
}

#[tokio::test]
async fn instructions_are_acknowledged_before_navigation() {
	let launcher = FakeLauncher::new(FakeScript::new().traffic(bearer_request("https://example.com/app", "t")));
	let service = example_service().instructions(["Log in.", "Open any page."]);

	let credential = engine(&launcher).login(&service).await.unwrap();

	assert_eq!(credential, Credential::bearer("t"));
	let log = launcher.log();
	assert_eq!(log.contents().len(), 1);
	assert_eq!(log.navigations(), vec!["https://example.com/login"]);
}

#[tokio::test]
async fn login_only_without_followup_fails_with_no_credentials() {
	let launcher = FakeLauncher::new(FakeScript::new().traffic(TrafficEvent::Request(
		RequestEvent::new("https://x.com/").header("cookie", "jar=full"),
	)));
	let service = ServiceDescriptor::new("jar", "https://x.com/login", ObserverSpec::login_only(LoginIndicator::cookie("jar")));

	let attempt = engine(&launcher).attempt(&service).await.unwrap();

	assert_eq!(attempt.state, SessionState::Failed);
	let err = attempt.result.unwrap_err();
	assert_eq!(err.login_failure(), Some(&LoginFailure::NoCredentials));
	assert!(launcher.log().all_closed());
}

#[derive(Debug)]
struct FindsNothing;

#[async_trait]
impl FollowupAutomation for FindsNothing {
	async fn run(&self, automation: &Automation<'_>) -> StepResult<Option<Credential>> {
		automation.navigate("https://x.com/settings/keys").await?;
		Ok(None)
	}
}

#[tokio::test]
async fn followup_returning_nothing_fails() {
	let snapshot = StorageState::with_cookies(vec![Cookie::new("jar", "full", "x.com")]);
	let launcher = FakeLauncher::new(
		FakeScript::new()
			.traffic(TrafficEvent::Request(RequestEvent::new("https://x.com/").header("cookie", "jar=full")))
			.storage_state(snapshot.clone()),
	);
	let service = ServiceDescriptor::new("jar", "https://x.com/login", ObserverSpec::login_only(LoginIndicator::cookie("jar")));
	let strategies = Strategies {
		observer: service.observer.build().unwrap(),
		followup: Some(Arc::new(FindsNothing)),
	};

	let attempt = engine(&launcher).attempt_with(&service, &strategies).await.unwrap();

	assert_eq!(attempt.state, SessionState::Failed);
	assert_eq!(
		attempt.history,
		vec![
			SessionState::Init,
			SessionState::HeadfulLogin,
			SessionState::LoginDetected,
			SessionState::FollowupPending,
			SessionState::FollowupRunning,
			SessionState::Failed,
		]
	);
	assert_eq!(attempt.result.unwrap_err().login_failure(), Some(&LoginFailure::NoCredentials));

	let launches = launcher.log().launches();
	assert_eq!(launches.len(), 2);
	assert!(!launches[0].headless);
	assert!(launches[1].headless);
	assert_eq!(launches[1].seeded, vec![Some(snapshot)]);
	assert!(launches.iter().all(|launch| launch.closed));
}

#[tokio::test]
async fn github_followup_mints_token_in_fresh_headless_browser() {
	let new_token = latchkey::followup::GITHUB_NEW_TOKEN_URL;
	let launcher = FakeLauncher::new(
		FakeScript::new()
			.traffic(TrafficEvent::Response(ResponseEvent::new("https://github.com/login", 200)))
			.traffic(TrafficEvent::Response(ResponseEvent::new(new_token, 200)))
			.element("#oauth_access_description", FakeElement::new())
			.element(r#"button[type="submit"].btn-primary"#, FakeElement::new())
			.element("#new-oauth-token", FakeElement::new().text("ghp_minted")),
	);
	let service = latchkey::Registry::builtin().by_name("github").cloned().unwrap();

	let attempt = engine(&launcher).attempt(&service).await.unwrap();

	assert_eq!(attempt.state, SessionState::Finalized);
	assert_eq!(attempt.result.unwrap(), Credential::bearer("ghp_minted"));
	let log = launcher.log();
	assert_eq!(log.launches().len(), 2);
	assert!(log.all_closed());
	assert_eq!(log.navigations(), vec![new_token, new_token]);
}

#[tokio::test]
async fn followup_step_failure_names_step() {
	let launcher = FakeLauncher::new(
		FakeScript::new().traffic(TrafficEvent::Response(ResponseEvent::new(
			latchkey::followup::GITHUB_NEW_TOKEN_URL,
			200,
		))),
	);
	let service = ServiceDescriptor::new(
		"github",
		latchkey::followup::GITHUB_NEW_TOKEN_URL,
		ObserverSpec::login_only(LoginIndicator::response_status(latchkey::followup::GITHUB_NEW_TOKEN_URL, 200)),
	)
	.followup(FollowupSpec::github());

	let attempt = engine(&launcher).attempt(&service).await.unwrap();

	assert_eq!(attempt.state, SessionState::Failed);
	let err = attempt.result.unwrap_err();
	assert!(matches!(err.login_failure(), Some(LoginFailure::Followup { step, .. }) if step.contains("#oauth_access_description")));
	assert!(launcher.log().all_closed());
}

#[tokio::test]
async fn snapshot_cookie_extraction_failure_is_reported() {
	let service = latchkey::Registry::builtin().by_name("slack").cloned().unwrap();
	let launcher = FakeLauncher::new(FakeScript::new().evaluation(probe_of(&service), serde_json::json!("xoxc-1")));

	let attempt = engine(&launcher).attempt(&service).await.unwrap();

	assert_eq!(attempt.state, SessionState::Failed);
	assert!(attempt.result.unwrap_err().is_extraction_failure());
}

#[tokio::test]
async fn slack_probe_and_snapshot_cookie_build_composite() {
	let service = latchkey::Registry::builtin().by_name("slack").cloned().unwrap();
	let launcher = FakeLauncher::new(
		FakeScript::new()
			.evaluation(probe_of(&service), serde_json::json!("xoxc-1"))
			.storage_state(StorageState::with_cookies(vec![Cookie::new("d", "xoxd-2", ".slack.com")])),
	);

	let credential = engine(&launcher).login(&service).await.unwrap();

	assert_eq!(
		credential.as_curl_arguments(),
		vec!["-H", "Authorization: Bearer xoxc-1", "-H", "Cookie: d=xoxd-2"]
	);
}

#[tokio::test]
async fn prior_browser_state_seeds_headful_context_and_is_rewritten() {
	let tmp = TempDir::new().unwrap();
	let state_path = tmp.path().join("browser_state.json");
	let prior = StorageState::with_cookies(vec![Cookie::new("session", "old", "example.com")]);
	prior.to_file(&state_path).unwrap();
	let fresh = StorageState::with_cookies(vec![Cookie::new("session", "new", "example.com")]);

	let launcher = FakeLauncher::new(
		FakeScript::new()
			.traffic(bearer_request("https://example.com/app", "t"))
			.storage_state(fresh.clone()),
	);
	let engine = LoginEngine::new(
		Arc::new(launcher.clone()),
		EngineSettings {
			browser_state_path: Some(state_path.clone()),
			..settings()
		},
	);

	engine.login(&example_service()).await.unwrap();

	assert_eq!(launcher.log().launches()[0].seeded, vec![Some(prior)]);
	assert_eq!(StorageState::from_file(&state_path).unwrap(), fresh);
}

#[tokio::test]
async fn one_session_per_service() {
	let launcher = FakeLauncher::new(FakeScript::new());
	let engine = Arc::new(engine(&launcher));
	let service = example_service();

	let first = {
		let engine = Arc::clone(&engine);
		let service = service.clone();
		tokio::spawn(async move { engine.attempt(&service).await })
	};
	while launcher.log().launches().is_empty() {
		tokio::time::sleep(Duration::from_millis(5)).await;
	}

	let second = engine.attempt(&service).await;
	assert!(matches!(second, Err(Error::SessionActive(ref name)) if name == "example"));

	launcher.log().user_close_all();
	let first = first.await.unwrap().unwrap();
	assert_eq!(first.state, SessionState::Cancelled);

	// The claim is released once the first attempt ends.
	let log = launcher.log();
	let closer = tokio::spawn(async move {
		while log.launches().len() < 2 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		log.user_close_all();
	});
	let third = engine.attempt(&service).await.unwrap();
	closer.await.unwrap();
	assert_eq!(third.state, SessionState::Cancelled);
}

#[tokio::test]
async fn launch_failure_is_a_browser_error() {
	let launcher = FakeLauncher::new(FakeScript::new().fail_launch(latchkey::DriverError::other("no chromium")));

	let attempt = engine(&launcher).attempt(&example_service()).await.unwrap();

	assert_eq!(attempt.state, SessionState::Failed);
	assert!(matches!(attempt.result, Err(Error::Browser(_))));
}

#[tokio::test]
async fn browser_closed_after_detection_still_finalizes() {
	let launcher = FakeLauncher::new(
		FakeScript::new()
			.traffic(bearer_request("https://example.com/app", "tok-123"))
			.close_before_snapshot(),
	);

	let attempt = engine(&launcher).attempt(&example_service()).await.unwrap();

	assert_eq!(attempt.state, SessionState::Finalized);
	assert_eq!(
		attempt.history,
		vec![
			SessionState::Init,
			SessionState::HeadfulLogin,
			SessionState::LoginDetected,
			SessionState::Finalizing,
			SessionState::Finalized,
		]
	);
	assert_eq!(attempt.result.unwrap(), Credential::bearer("tok-123"));
	assert!(launcher.log().all_closed());
}

#[tokio::test]
async fn missing_state_after_detection_is_an_extraction_failure() {
	let service = latchkey::Registry::builtin().by_name("slack").cloned().unwrap();
	let launcher = FakeLauncher::new(
		FakeScript::new()
			.evaluation(probe_of(&service), serde_json::json!("xoxc-1"))
			.storage_state(StorageState::with_cookies(vec![Cookie::new("d", "xoxd-2", ".slack.com")]))
			.close_before_snapshot(),
	);

	let attempt = engine(&launcher).attempt(&service).await.unwrap();

	assert_eq!(attempt.state, SessionState::Failed);
	assert!(attempt.history.contains(&SessionState::LoginDetected));
	let err = attempt.result.unwrap_err();
	assert!(!err.is_cancelled(), "{err}");
	assert!(err.is_extraction_failure(), "{err}");
}

#[tokio::test]
async fn followup_without_captured_state_fails_before_headless_launch() {
	let launcher = FakeLauncher::new(
		FakeScript::new()
			.traffic(TrafficEvent::Response(ResponseEvent::new("https://github.com/login", 200)))
			.traffic(TrafficEvent::Response(ResponseEvent::new(latchkey::followup::GITHUB_NEW_TOKEN_URL, 200)))
			.close_before_snapshot(),
	);
	let service = latchkey::Registry::builtin().by_name("github").cloned().unwrap();

	let attempt = engine(&launcher).attempt(&service).await.unwrap();

	assert_eq!(attempt.state, SessionState::Failed);
	assert_eq!(attempt.history[attempt.history.len() - 2], SessionState::FollowupPending);
	assert!(attempt.result.unwrap_err().is_extraction_failure());
	assert_eq!(launcher.log().launches().len(), 1);
}

#[tokio::test]
async fn headless_launch_failure_names_the_followup_step() {
	let launcher = FakeLauncher::new(
		FakeScript::new()
			.traffic(TrafficEvent::Response(ResponseEvent::new("https://github.com/login", 200)))
			.traffic(TrafficEvent::Response(ResponseEvent::new(latchkey::followup::GITHUB_NEW_TOKEN_URL, 200)))
			.fail_headless_launch(latchkey::DriverError::other("no headless chromium")),
	);
	let service = latchkey::Registry::builtin().by_name("github").cloned().unwrap();

	let attempt = engine(&launcher).attempt(&service).await.unwrap();

	assert_eq!(attempt.state, SessionState::Failed);
	let err = attempt.result.unwrap_err();
	assert!(!matches!(err, Error::Browser(_)), "{err}");
	match err.login_failure() {
		Some(LoginFailure::Followup { step, reason }) => {
			assert_eq!(step, "launch_headless");
			assert!(reason.contains("no headless chromium"), "{reason}");
		}
		other => panic!("unexpected failure: {other:?}"),
	}
	let log = launcher.log();
	assert_eq!(log.launches().len(), 1);
	assert!(log.all_closed());
}

fn probe_of(service: &ServiceDescriptor) -> String {
	match &service.observer {
		ObserverSpec::Simple { rules, .. } => match &rules[0].source {
			latchkey::observer::RuleSource::Script { expression } => expression.clone(),
			other => panic!("not a script rule: {other:?}"),
		},
		other => panic!("not a simple observer: {other:?}"),
	}
}
