use super::CommandContext;
use crate::error::Result;

pub fn execute(ctx: &CommandContext, service: Option<&str>) -> Result<()> {
	let removed = match service {
		Some(service) => ctx.broker.clear(service)?,
		None => ctx.broker.clear_all()?,
	};
	let scope = service.unwrap_or("all services");
	if removed {
		println!("Cleared credentials for {scope}.");
	} else {
		println!("No stored credentials for {scope}.");
	}
	Ok(())
}
