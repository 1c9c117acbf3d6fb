mod browser;
mod cli;
mod commands;
mod curl;
mod error;
mod logging;

use clap::Parser;
use colored::Colorize;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		report(&err);
		std::process::exit(err.exit_code());
	}
}

fn report(err: &CliError) {
	if matches!(err, CliError::Exit(_)) {
		return;
	}
	if err.is_cancellation() {
		eprintln!("{err}");
		return;
	}
	eprintln!("{} {err}", "Error:".red().bold());
	if let Some(hint) = err.hint() {
		eprintln!("{hint}");
	}
}
