//! Configuration CLI commands.
//!
//! Provides `config show`, `config path` and `config init` for inspecting the
//! effective configuration and writing a starter file.

use std::path::Path;

use clap::Subcommand;
use terrastream::config::StreamingConfig;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (file values over defaults)
    Show {
        /// Print JSON instead of INI
        #[arg(long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Write the effective configuration to the configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config: &StreamingConfig, path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { json } => {
            println!("{}", render(config, json)?);
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Init { force } => run_init(config, path, force),
    }
}

fn render(config: &StreamingConfig, json: bool) -> Result<String, CliError> {
    if json {
        serde_json::to_string_pretty(config).map_err(|e| CliError::Output(e.to_string()))
    } else {
        Ok(config.to_ini_string())
    }
}

fn run_init(config: &StreamingConfig, path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        )));
    }

    config.save_to(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
