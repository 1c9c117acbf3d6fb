use super::CommandContext;
use crate::curl::extract_url;
use crate::error::{CliError, Result};

pub fn execute(ctx: &CommandContext, curl_args: &[String]) -> Result<()> {
	let url = extract_url(curl_args).ok_or(CliError::NoUrl)?;
	let service = ctx
		.broker
		.resolve_url(&url)
		.ok_or_else(|| CliError::NoMatchingService(url.clone()))?;
	println!("{}", service.name);
	Ok(())
}
