//! vhdup entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting vhdup");

    match cli.command {
        Command::Upload(args) => {
            let config = config::Config::load(args.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(app::upload(args, config))?;
        }
    }

    Ok(())
}
