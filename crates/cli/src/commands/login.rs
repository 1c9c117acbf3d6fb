use colored::Colorize;

use super::CommandContext;
use crate::error::Result;

pub async fn execute(ctx: &CommandContext, service: &str) -> Result<()> {
	let (credential, _) = ctx.broker.credentials_for(service, true).await?;
	match ctx.broker.store() {
		Some(store) => println!("{} {service} ({})", "Logged in:".green().bold(), store.path().display()),
		None => {
			println!("{} {service}", "Logged in:".green().bold());
			eprintln!(
				"{} no credential store configured; set LATCHKEY_STORE to keep credentials",
				"note:".yellow().bold()
			);
		}
	}
	println!("{}", credential.object_type());
	Ok(())
}
