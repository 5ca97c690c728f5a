//! Terrastream CLI - Command-line interface
//!
//! Runs headless streaming sessions against a real tile server and inspects
//! the configuration file.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use terrastream::config::{config_file_path, StreamingConfig};
use terrastream::logging::init_logging;

use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "terrastream", version, about = "Quadtree tile streaming for virtual globes")]
struct Cli {
    /// Configuration file (defaults to ~/.terrastream/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Stream terrain and imagery tiles around a drifting camera
    Simulate(SimulateArgs),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.unwrap_or_else(config_file_path);
    let config = StreamingConfig::load_from(&config_path)?;

    match cli.command {
        Commands::Simulate(args) => {
            let _guard = init_logging(&config.logging).map_err(|e| CliError::Logging(e.to_string()))?;
            commands::simulate::run(args, config)
        }
        Commands::Config(command) => commands::config::run(command, &config, &config_path),
    }
}
