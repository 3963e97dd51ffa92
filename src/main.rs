use anyhow::Result;
use clap::Parser;

use ingestd::cli::commands::{handle_config, handle_migrate, handle_run, handle_status};
use ingestd::cli::{Cli, Commands};
use ingestd::models::Config;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    ingestd::logging::init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Run => handle_run(config).await?,
        Commands::Migrate => handle_migrate(config).await?,
        Commands::Status(args) => handle_status(args, config).await?,
        Commands::Config(command) => handle_config(command, config).await?,
    }

    Ok(())
}
