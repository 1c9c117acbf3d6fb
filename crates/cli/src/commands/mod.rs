mod clear;
mod curl;
mod login;
mod matching;
mod services;
mod show;
mod status;

use std::sync::Arc;

use latchkey::catalog::load_catalog;
use latchkey::{Config, CredentialBroker, CredentialStore, LoginEngine, Registry};
use tracing::debug;

use crate::browser::ChromiumLauncher;
use crate::cli::{Cli, Commands};
use crate::error::Result;

/// Everything a command needs, built once from configuration.
pub struct CommandContext {
	pub config: Config,
	pub broker: CredentialBroker,
}

impl CommandContext {
	pub fn from_config(config: Config) -> Result<Self> {
		let mut registry = Registry::builtin();
		if let Some(path) = &config.services_path {
			registry = registry.with_additional(load_catalog(path)?)?;
		}
		let store = config.store_path.clone().map(CredentialStore::new);
		debug!(
			target = "latchkey",
			services = registry.services().len(),
			store = ?config.store_path,
			"command context ready"
		);
		let engine = LoginEngine::new(Arc::new(ChromiumLauncher::new()), config.engine_settings());
		Ok(Self {
			broker: CredentialBroker::new(registry, store, engine),
			config,
		})
	}
}

pub async fn dispatch(cli: Cli) -> Result<()> {
	let ctx = CommandContext::from_config(Config::load()?)?;

	match cli.command {
		Commands::Services => services::execute(&ctx),
		Commands::Match { curl_args } => matching::execute(&ctx, &curl_args),
		Commands::Curl { force_login, curl_args } => curl::execute(&ctx, force_login, curl_args).await,
		Commands::Login { service } => login::execute(&ctx, &service).await,
		Commands::Status { service } => status::execute(&ctx, &service).await,
		Commands::Clear { service } => clear::execute(&ctx, service.as_deref()),
		Commands::Show { service } => show::execute(&ctx, &service),
	}
}
