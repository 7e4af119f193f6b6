//! Remedy CLI entry point.

use clap::Parser;

use remedy::cli::{Cli, Commands};
use remedy::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => remedy::cli::handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Reliability(args) => {
            remedy::cli::commands::reliability::execute(args, &config, cli.json).await
        }
        Commands::Dag(args) => remedy::cli::commands::dag::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        remedy::cli::handle_error(err, cli.json);
    }
}
