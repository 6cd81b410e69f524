mod backup;
mod cli;
mod compose;
mod config;
mod error;
mod events;
mod git;
mod migrate;
mod output;
mod paths;
mod registry;
mod scheduler;
mod ssh;
mod state;
#[cfg(test)]
mod testutil;
mod update;
mod version;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .without_time()
        .init();

    match cli.command {
        Command::Init => {
            cli::init::run()?;
        }

        Command::Check { package } => {
            let config = config::RefitConfig::load(&cli.config)?;
            cli::check::run(config, package.as_deref()).await?;
        }

        Command::Update { package, version } => {
            let config = config::RefitConfig::load(&cli.config)?;
            cli::update::run(config, &package, version.as_deref()).await?;
        }

        Command::Run => {
            let config = config::RefitConfig::load(&cli.config)?;
            cli::run::run(config).await?;
        }

        Command::Status => {
            let config = config::RefitConfig::load(&cli.config)?;
            cli::status::run(config).await?;
        }

        Command::Backups { package } => {
            let config = config::RefitConfig::load(&cli.config)?;
            cli::backups::run(config, &package).await?;
        }
    }

    Ok(())
}
