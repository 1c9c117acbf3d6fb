use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Parser, Subcommand};

/// Clap styles matching cargo's help colors.
pub fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "latchkey")]
#[command(about = "Inject credentials into curl requests to known public APIs")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug). Must precede the command.
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// List known services
	Services,

	/// Print the service matching a curl invocation
	Match {
		/// Arguments as they would be passed to curl
		#[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "CURL_ARGS")]
		curl_args: Vec<String>,
	},

	/// Run curl with credentials injected for the target service
	Curl {
		/// Log in again even if credentials are stored
		#[arg(long = "latchkey-force-login")]
		force_login: bool,

		/// Arguments passed through to curl
		#[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "CURL_ARGS")]
		curl_args: Vec<String>,
	},

	/// Log in to a service and store the resulting credentials
	Login {
		service: String,
	},

	/// Report stored credentials as missing, valid or invalid
	Status {
		service: String,
	},

	/// Remove stored credentials for one service, or the whole store
	Clear {
		service: Option<String>,
	},

	/// Show which headers stored credentials would add (values redacted)
	Show {
		service: String,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> Cli {
		Cli::try_parse_from(args).unwrap()
	}

	#[test]
	fn curl_keeps_hyphenated_arguments() {
		let cli = parse(&["latchkey", "curl", "-X", "POST", "-v", "https://slack.com/api/auth.test"]);
		match cli.command {
			Commands::Curl { force_login, curl_args } => {
				assert!(!force_login);
				assert_eq!(curl_args, ["-X", "POST", "-v", "https://slack.com/api/auth.test"]);
			}
			other => panic!("unexpected command: {other:?}"),
		}
		assert_eq!(cli.verbose, 0);
	}

	#[test]
	fn force_login_flag_before_curl_arguments() {
		let cli = parse(&["latchkey", "curl", "--latchkey-force-login", "https://api.github.com/user"]);
		assert!(matches!(cli.command, Commands::Curl { force_login: true, ref curl_args } if curl_args.len() == 1));
	}

	#[test]
	fn verbosity_counts_before_command() {
		let cli = parse(&["latchkey", "-vv", "services"]);
		assert_eq!(cli.verbose, 2);
		assert!(matches!(cli.command, Commands::Services));
	}

	#[test]
	fn clear_service_is_optional() {
		assert!(matches!(parse(&["latchkey", "clear"]).command, Commands::Clear { service: None }));
		assert!(matches!(
			parse(&["latchkey", "clear", "slack"]).command,
			Commands::Clear { service: Some(ref s) } if s == "slack"
		));
	}

	#[test]
	fn status_requires_service() {
		assert!(Cli::try_parse_from(["latchkey", "status"]).is_err());
	}
}
