//! Operator command-line interface.

pub mod commands;
pub mod output;
pub mod table;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::domain::models::config::Config;
use crate::infrastructure::config::ConfigLoader;

use commands::dag::DagArgs;
use commands::reliability::ReliabilityArgs;

#[derive(Parser, Debug)]
#[command(name = "remedy")]
#[command(about = "Remedy - autonomous repair loop orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .remedy/config.yaml)
    #[arg(short, long, global = true, env = "REMEDY_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reliability telemetry: dashboard, threshold analysis, retention
    Reliability(ReliabilityArgs),
    /// Inspect an error decomposition graph
    Dag(DagArgs),
}

impl Cli {
    /// Load configuration from `--config`, or the project-local hierarchy.
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => ConfigLoader::load_from_file(path),
            None => ConfigLoader::load(),
        }
    }
}

/// Print an error in the selected format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let payload = serde_json::json!({
            "error": err.to_string(),
            "causes": chain,
        });
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&payload).unwrap_or_else(|_| err.to_string())
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["remedy", "reliability", "dashboard", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Reliability(_)));
    }
}
