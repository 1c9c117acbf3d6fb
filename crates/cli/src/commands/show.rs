use super::CommandContext;
use crate::error::Result;

const REDACTED: &str = "<redacted>";

/// Lists the credential type and header names that would be injected. Values never leave the store.
pub fn execute(ctx: &CommandContext, service: &str) -> Result<()> {
	match ctx.broker.stored(service)? {
		None => println!("missing"),
		Some(credential) => {
			println!("{}", credential.object_type());
			for (name, _) in credential.header_pairs() {
				println!("{name}: {REDACTED}");
			}
		}
	}
	Ok(())
}
