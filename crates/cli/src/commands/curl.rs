use latchkey::CredentialSource;
use tracing::{debug, info};

use super::CommandContext;
use crate::curl::{self, extract_url, take_flag};
use crate::error::{CliError, Result};

const FORCE_LOGIN_FLAG: &str = "--latchkey-force-login";

/// Injects credentials for the matched service and runs curl.
///
/// Requests to URLs no service claims are passed through untouched.
pub async fn execute(ctx: &CommandContext, force_login: bool, mut curl_args: Vec<String>) -> Result<()> {
	// The flag is also accepted after curl arguments have started.
	let force_login = take_flag(&mut curl_args, FORCE_LOGIN_FLAG) || force_login;

	let service = extract_url(&curl_args).and_then(|url| ctx.broker.resolve_url(&url).map(|s| s.name.clone()));

	let args = match service {
		Some(service) => {
			let (credential, source) = ctx.broker.credentials_for(&service, force_login).await?;
			match source {
				CredentialSource::Store => debug!(target = "latchkey", service, "using stored credentials"),
				CredentialSource::Login => info!(target = "latchkey", service, "using freshly acquired credentials"),
			}
			let mut args = credential.as_curl_arguments();
			args.extend(curl_args);
			args
		}
		None => {
			debug!(target = "latchkey", "no service matched; running curl unchanged");
			curl_args
		}
	};

	match curl::run(&ctx.config.curl_command, &args).await? {
		0 => Ok(()),
		code => Err(CliError::Exit(code)),
	}
}
