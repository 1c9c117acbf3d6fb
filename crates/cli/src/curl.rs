//! Curl argument inspection and subprocess execution.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{CliError, Result};

/// Flags that do not affect the request target and are ignored during URL extraction.
const PASSTHROUGH_FLAGS: &[&str] = &["-v", "--verbose"];

/// Short flags whose value is the following argument (or attached, as in `-XPOST`).
const SHORT_WITH_VALUE: &[char] = &[
	'A', 'b', 'c', 'C', 'd', 'D', 'e', 'E', 'F', 'H', 'K', 'm', 'o', 'P', 'Q', 'r', 't', 'T', 'u', 'U', 'w', 'x', 'X', 'y',
	'Y', 'z',
];

/// Long flags whose value is the following argument unless given as `--flag=value`.
const LONG_WITH_VALUE: &[&str] = &[
	"--cacert",
	"--capath",
	"--cert",
	"--config",
	"--connect-timeout",
	"--cookie",
	"--cookie-jar",
	"--data",
	"--data-ascii",
	"--data-binary",
	"--data-raw",
	"--data-urlencode",
	"--dump-header",
	"--form",
	"--form-string",
	"--header",
	"--json",
	"--key",
	"--limit-rate",
	"--max-time",
	"--output",
	"--proxy",
	"--proxy-user",
	"--range",
	"--referer",
	"--request",
	"--resolve",
	"--retry",
	"--upload-file",
	"--user",
	"--user-agent",
	"--write-out",
];

/// Seconds allowed for a credential check request.
pub const CHECK_TIMEOUT_SECS: u64 = 10;

/// Finds the request URL in curl arguments.
///
/// `--url X` and `--url=X` win; otherwise the first argument that is neither a
/// flag nor a flag's value. A URL without a scheme gets `http://`, as curl does.
pub fn extract_url(args: &[String]) -> Option<String> {
	let mut positional = None;
	let mut iter = args.iter().filter(|a| !PASSTHROUGH_FLAGS.contains(&a.as_str()));

	while let Some(arg) = iter.next() {
		if arg == "--url" {
			return iter.next().and_then(|v| normalize(v));
		}
		if let Some(value) = arg.strip_prefix("--url=") {
			return normalize(value);
		}
		if arg == "--" {
			if positional.is_none() {
				positional = iter.next().cloned();
			}
			break;
		}
		if let Some(long) = arg.strip_prefix("--") {
			if !long.contains('=') && LONG_WITH_VALUE.contains(&arg.as_str()) {
				iter.next();
			}
			continue;
		}
		if let Some(short) = arg.strip_prefix('-').filter(|s| !s.is_empty()) {
			if takes_separate_value(short) {
				iter.next();
			}
			continue;
		}
		if positional.is_none() {
			positional = Some(arg.clone());
		}
	}

	positional.as_deref().and_then(normalize)
}

/// Removes `flag` wherever it stands as an option of its own and reports
/// whether it was present. Occurrences after `--` or in a flag's value
/// position belong to curl and are kept.
pub fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
	let mut found = false;
	let mut kept = Vec::with_capacity(args.len());
	let mut iter = std::mem::take(args).into_iter();

	while let Some(arg) = iter.next() {
		if arg == flag {
			found = true;
			continue;
		}
		let value_follows = if arg == "--" {
			kept.push(arg);
			kept.extend(iter.by_ref());
			break;
		} else if arg.starts_with("--") {
			arg == "--url" || LONG_WITH_VALUE.contains(&arg.as_str())
		} else {
			arg.strip_prefix('-').is_some_and(|short| !short.is_empty() && takes_separate_value(short))
		};
		kept.push(arg);
		if value_follows {
			kept.extend(iter.next());
		}
	}

	*args = kept;
	found
}

/// Whether a short flag cluster like `-sX` ends in a value-taking flag with no attached value.
fn takes_separate_value(cluster: &str) -> bool {
	for (i, c) in cluster.char_indices() {
		if SHORT_WITH_VALUE.contains(&c) {
			return i + c.len_utf8() == cluster.len();
		}
	}
	false
}

fn normalize(raw: &str) -> Option<String> {
	let raw = raw.trim();
	if raw.is_empty() {
		return None;
	}
	match url::Url::parse(raw) {
		Ok(_) => Some(raw.to_string()),
		Err(url::ParseError::RelativeUrlWithoutBase) => {
			let with_scheme = format!("http://{raw}");
			url::Url::parse(&with_scheme).ok().map(|_| with_scheme)
		}
		Err(_) => None,
	}
}

/// Runs curl with inherited stdio and returns its exit code.
pub async fn run(command: &str, args: &[String]) -> Result<i32> {
	debug!(target = "latchkey", command, args = args.len(), "running curl");
	let status = Command::new(command)
		.args(args)
		.stdin(Stdio::inherit())
		.stdout(Stdio::inherit())
		.stderr(Stdio::inherit())
		.status()
		.await
		.map_err(|source| CliError::Spawn {
			command: command.to_string(),
			source,
		})?;
	// Killed by a signal: report a generic failure.
	Ok(status.code().unwrap_or(1))
}

/// Runs curl capturing stdout, bounded by `timeout`.
pub async fn run_captured(command: &str, args: &[String], timeout: Duration) -> Result<String> {
	let child = Command::new(command)
		.args(args)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::null())
		.kill_on_drop(true)
		.output();
	let output = tokio::time::timeout(timeout, child)
		.await
		.map_err(|_| CliError::CheckTimeout(timeout.as_secs()))?
		.map_err(|source| CliError::Spawn {
			command: command.to_string(),
			source,
		})?;
	Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args(raw: &[&str]) -> Vec<String> {
		raw.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn first_positional_is_the_url() {
		assert_eq!(
			extract_url(&args(&["-s", "https://slack.com/api/auth.test"])).as_deref(),
			Some("https://slack.com/api/auth.test")
		);
	}

	#[test]
	fn flag_values_are_skipped() {
		let raw = args(&[
			"-X",
			"POST",
			"-H",
			"Content-Type: application/json",
			"--data",
			"{}",
			"https://api.linear.app/graphql",
		]);
		assert_eq!(extract_url(&raw).as_deref(), Some("https://api.linear.app/graphql"));
	}

	#[test]
	fn attached_values_do_not_consume_next_argument() {
		let raw = args(&["-XPOST", "--header=Accept: */*", "https://api.github.com/user"]);
		assert_eq!(extract_url(&raw).as_deref(), Some("https://api.github.com/user"));
	}

	#[test]
	fn clustered_short_flags() {
		let raw = args(&["-sX", "GET", "https://discord.com/api/v9/users/@me"]);
		assert_eq!(extract_url(&raw).as_deref(), Some("https://discord.com/api/v9/users/@me"));
	}

	#[test]
	fn explicit_url_flag_wins() {
		let raw = args(&["https://a.example/", "--url", "https://b.example/"]);
		assert_eq!(extract_url(&raw).as_deref(), Some("https://b.example/"));
		let raw = args(&["--url=https://c.example/x"]);
		assert_eq!(extract_url(&raw).as_deref(), Some("https://c.example/x"));
	}

	#[test]
	fn verbose_is_ignored() {
		let raw = args(&["-v", "--verbose", "https://api.notion.com/v1/users/me"]);
		assert_eq!(extract_url(&raw).as_deref(), Some("https://api.notion.com/v1/users/me"));
	}

	#[test]
	fn missing_scheme_defaults_to_http() {
		assert_eq!(extract_url(&args(&["example.com/path"])).as_deref(), Some("http://example.com/path"));
	}

	#[test]
	fn flag_is_taken_from_option_positions() {
		let mut raw = args(&["-s", "--latchkey-force-login", "https://api.github.com/user"]);
		assert!(take_flag(&mut raw, "--latchkey-force-login"));
		assert_eq!(raw, args(&["-s", "https://api.github.com/user"]));

		let mut raw = args(&["https://api.github.com/user"]);
		assert!(!take_flag(&mut raw, "--latchkey-force-login"));
		assert_eq!(raw, args(&["https://api.github.com/user"]));
	}

	#[test]
	fn flag_as_a_value_is_left_for_curl() {
		let mut raw = args(&["-d", "--latchkey-force-login", "-H", "--latchkey-force-login", "https://x.example/"]);
		assert!(!take_flag(&mut raw, "--latchkey-force-login"));
		assert_eq!(raw.len(), 5);

		let mut raw = args(&["--data", "--latchkey-force-login", "--latchkey-force-login", "https://x.example/"]);
		assert!(take_flag(&mut raw, "--latchkey-force-login"));
		assert_eq!(raw, args(&["--data", "--latchkey-force-login", "https://x.example/"]));
	}

	#[test]
	fn flag_after_double_dash_is_left_for_curl() {
		let mut raw = args(&["-s", "--", "--latchkey-force-login"]);
		assert!(!take_flag(&mut raw, "--latchkey-force-login"));
		assert_eq!(raw, args(&["-s", "--", "--latchkey-force-login"]));
	}

	#[test]
	fn no_url() {
		assert_eq!(extract_url(&args(&[])), None);
		assert_eq!(extract_url(&args(&["-H", "X: y"])), None);
	}
}
