//! End-to-end tests for commands that never need a browser.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::json;
use tempfile::TempDir;

struct Workspace {
	dir: TempDir,
}

impl Workspace {
	fn new(curl_command: &str) -> Self {
		let dir = TempDir::new().unwrap();
		let config = json!({
			"storePath": dir.path().join("store.json"),
			"curlCommand": curl_command,
		});
		std::fs::write(dir.path().join("config.json"), config.to_string()).unwrap();
		Self { dir }
	}

	fn store_path(&self) -> PathBuf {
		self.dir.path().join("store.json")
	}

	fn write_store(&self, contents: serde_json::Value) {
		std::fs::write(self.store_path(), contents.to_string()).unwrap();
	}

	fn run(&self, args: &[&str]) -> Output {
		Command::new(env!("CARGO_BIN_EXE_latchkey"))
			.args(args)
			.env("LATCHKEY_CONFIG", self.dir.path().join("config.json"))
			.env_remove("LATCHKEY_STORE")
			.env_remove("LATCHKEY_BROWSER_STATE")
			.env_remove("RUST_LOG")
			.env_remove("LATCHKEY_LOG")
			.output()
			.expect("failed to execute latchkey")
	}
}

fn stdout(output: &Output) -> String {
	String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
	String::from_utf8_lossy(&output.stderr).into_owned()
}

fn exists(path: &Path) -> bool {
	path.try_exists().unwrap_or(false)
}

#[test]
fn services_lists_builtin_names() {
	let ws = Workspace::new("curl");
	let output = ws.run(&["services"]);
	assert!(output.status.success());
	let names: Vec<String> = stdout(&output).lines().map(str::to_string).collect();
	assert_eq!(names, ["slack", "discord", "dropbox", "notion", "github", "linear"]);
}

#[test]
fn match_prints_service_for_url() {
	let ws = Workspace::new("curl");
	let output = ws.run(&["match", "-X", "POST", "-v", "https://slack.com/api/conversations.list"]);
	assert!(output.status.success(), "stderr: {}", stderr(&output));
	assert_eq!(stdout(&output).trim(), "slack");
}

#[test]
fn match_reports_unknown_url() {
	let ws = Workspace::new("curl");
	let output = ws.run(&["match", "https://example.com/"]);
	assert_eq!(output.status.code(), Some(1));
	let err = stderr(&output);
	assert!(err.contains("No service matches URL: https://example.com/"), "stderr: {err}");
	assert!(err.contains("latchkey services"));
}

#[test]
fn match_without_url() {
	let ws = Workspace::new("curl");
	let output = ws.run(&["match", "-H", "Accept: */*"]);
	assert_eq!(output.status.code(), Some(1));
	assert!(stderr(&output).contains("Could not extract URL from curl arguments."));
}

#[test]
fn status_without_credentials_is_missing() {
	let ws = Workspace::new("curl");
	let output = ws.run(&["status", "github"]);
	assert!(output.status.success());
	assert_eq!(stdout(&output).trim(), "missing");
}

#[test]
fn status_of_unknown_service_fails() {
	let ws = Workspace::new("curl");
	let output = ws.run(&["status", "myspace"]);
	assert_eq!(output.status.code(), Some(1));
	assert!(stderr(&output).contains("Unknown service: myspace"));
}

#[test]
fn show_redacts_values() {
	let ws = Workspace::new("curl");
	ws.write_store(json!({
		"slack": {
			"object_type": "composite",
			"token": "xoxc-secret",
			"extraFields": {"d_cookie": "xoxd-secret"}
		}
	}));

	let output = ws.run(&["show", "slack"]);
	assert!(output.status.success(), "stderr: {}", stderr(&output));
	let out = stdout(&output);
	assert_eq!(out.lines().collect::<Vec<_>>(), ["composite", "Authorization: <redacted>", "Cookie: <redacted>"]);
	assert!(!out.contains("secret"));
}

#[test]
fn clear_single_service_then_everything() {
	let ws = Workspace::new("curl");
	ws.write_store(json!({
		"github": {"object_type": "authorization_bearer", "token": "ghp_1"},
		"discord": {"object_type": "authorization_bare", "token": "abc"}
	}));

	let output = ws.run(&["clear", "github"]);
	assert!(output.status.success());
	assert!(stdout(&output).contains("Cleared credentials for github."));
	let store: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(ws.store_path()).unwrap()).unwrap();
	assert!(store.get("github").is_none());
	assert!(store.get("discord").is_some());

	let output = ws.run(&["clear"]);
	assert!(output.status.success());
	assert!(!exists(&ws.store_path()));

	let output = ws.run(&["clear"]);
	assert!(stdout(&output).contains("No stored credentials"));
}

#[cfg(unix)]
#[test]
fn curl_prepends_stored_credentials() {
	let ws = Workspace::new("echo");
	ws.write_store(json!({
		"github": {"object_type": "authorization_bearer", "token": "ghp_stored"}
	}));

	let output = ws.run(&["curl", "-s", "https://api.github.com/user"]);
	assert!(output.status.success(), "stderr: {}", stderr(&output));
	assert_eq!(
		stdout(&output).trim(),
		"-H Authorization: Bearer ghp_stored -s https://api.github.com/user"
	);
}

#[cfg(unix)]
#[test]
fn force_login_flag_in_value_position_reaches_curl() {
	let ws = Workspace::new("echo");
	ws.write_store(json!({
		"github": {"object_type": "authorization_bearer", "token": "ghp_stored"}
	}));

	let output = ws.run(&["curl", "-d", "--latchkey-force-login", "https://api.github.com/user"]);
	assert!(output.status.success(), "stderr: {}", stderr(&output));
	assert_eq!(
		stdout(&output).trim(),
		"-H Authorization: Bearer ghp_stored -d --latchkey-force-login https://api.github.com/user"
	);
}

#[cfg(unix)]
#[test]
fn curl_passes_unmatched_requests_through() {
	let ws = Workspace::new("echo");
	let output = ws.run(&["curl", "https://example.com/"]);
	assert!(output.status.success());
	assert_eq!(stdout(&output).trim(), "https://example.com/");
}

#[cfg(unix)]
#[test]
fn curl_exit_code_is_propagated() {
	let ws = Workspace::new("false");
	let output = ws.run(&["curl", "https://example.com/"]);
	assert_eq!(output.status.code(), Some(1));
	assert!(stderr(&output).is_empty());
}
