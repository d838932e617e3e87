//! Larder CLI Binary
//!
//! Entry point for the worker daemon and operator commands.

use anyhow::Context;
use clap::Parser;
use larder::cli::{Cli, RunContext};
use larder::config::ConfigLoader;
use larder::logging::init_logging;
use std::process;
use tracing::info;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ConfigLoader::load().context("loading configuration")?,
    };

    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = Some(data_dir.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    init_logging(&config.logging).context("initializing logging")?;
    info!("Larder starting");

    let context = RunContext::new(&config).context("initializing runtime")?;
    let output = context.execute(&cli.command).await?;

    info!("Command completed successfully");
    println!("{}", output);
    Ok(())
}
