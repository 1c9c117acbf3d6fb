use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Overrides the verbosity-derived filter when set.
pub const LOG_ENV: &str = "LATCHKEY_LOG";

/// Directives for `-v` count. Everything latchkey logs uses the `latchkey`
/// target; chromiumoxide reports unknown CDP messages as errors, so it stays
/// muted until `-vv`.
pub fn default_filter(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "off,latchkey=warn",
		1 => "warn,latchkey=info,chromiumoxide=off,tungstenite=off",
		2 => "warn,latchkey=debug,chromiumoxide=warn",
		_ => "debug,latchkey=trace,chromiumoxide=debug,tungstenite=info",
	}
}

pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_env(LOG_ENV)
		.or_else(|_| EnvFilter::try_from_default_env())
		.unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

	// stdout belongs to curl and the command output
	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(verbosity >= 2)
		.without_time()
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_filters_parse() {
		for verbosity in 0..=3 {
			let filter = default_filter(verbosity);
			assert!(EnvFilter::try_new(filter).is_ok(), "{filter}");
		}
	}

	#[test]
	fn browser_chatter_is_muted_until_very_verbose() {
		assert!(default_filter(0).starts_with("off,"));
		assert!(default_filter(1).contains("chromiumoxide=off"));
		assert!(default_filter(1).contains("latchkey=info"));
		assert!(default_filter(2).contains("chromiumoxide=warn"));
	}
}
