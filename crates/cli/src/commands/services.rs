use super::CommandContext;
use crate::error::Result;

pub fn execute(ctx: &CommandContext) -> Result<()> {
	for name in ctx.broker.registry().names() {
		println!("{name}");
	}
	Ok(())
}
