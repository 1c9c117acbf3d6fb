use std::time::Duration;

use latchkey::CredentialStatus;
use tracing::debug;

use super::CommandContext;
use crate::curl::{self, CHECK_TIMEOUT_SECS};
use crate::error::Result;

/// Prints `missing`, `valid` or `invalid` for the service's stored credentials.
///
/// Services without a configured check report any stored credential as valid.
pub async fn execute(ctx: &CommandContext, service: &str) -> Result<()> {
	let descriptor = ctx.broker.registry().require(service)?;
	let status = match ctx.broker.stored(service)? {
		None => CredentialStatus::Missing,
		Some(credential) => match &descriptor.check {
			None => CredentialStatus::Valid,
			Some(check) => {
				let args = check.curl_arguments(&credential);
				let stdout = curl::run_captured(
					&ctx.config.curl_command,
					&args,
					Duration::from_secs(CHECK_TIMEOUT_SECS),
				)
				.await?;
				let status = check.evaluate(&stdout);
				debug!(target = "latchkey", service, url = %check.url, %status, "credential check finished");
				status
			}
		},
	};
	println!("{status}");
	Ok(())
}
