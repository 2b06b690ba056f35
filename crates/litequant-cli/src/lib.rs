//! Litequant CLI.

pub mod commands;
pub mod output;
pub mod progress;
pub mod prompt;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use litequant_config::{load_default_config, Config, ConfigLoader};

/// Litequant - int8 converter for the on-device image classifier.
#[derive(Parser, Debug)]
#[command(
    name = "litequant",
    version,
    about = "Convert a float image classifier into a compact int8 artifact",
    long_about = "Litequant loads a float MobileNet-style classifier, quantizes it to int8\n\
                  using random calibration inputs, writes a single self-contained artifact,\n\
                  reloads it to check that it runs, and compares its outputs against the\n\
                  source model.\n\n\
                  Running `litequant` with no subcommand performs `litequant convert`."
)]
pub struct Cli {
    /// Subcommand to run. Defaults to `convert`.
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path.
    #[arg(short, long, global = true, env = "LITEQUANT_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error). Defaults to `logging.level`.
    #[arg(short, long, global = true, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable JSON output.
    #[arg(long, global = true)]
    pub json: bool,
}

/// CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert the source model into an int8 artifact.
    Convert(commands::convert::ConvertArgs),

    /// Compare an existing artifact against its source model.
    Verify(commands::verify::VerifyArgs),

    /// Show what is inside a checkpoint or an artifact.
    Inspect(commands::inspect::InspectArgs),

    /// Download and unpack the model archive.
    Download(commands::download::DownloadArgs),

    /// Write a randomly initialized checkpoint.
    Init(commands::init::InitArgs),

    /// Validate a configuration file.
    Validate(commands::validate::ValidateArgs),

    /// Show version information.
    Version,
}

/// Load the configuration from `path`, or from the default locations.
///
/// Environment variables prefixed with `LITEQUANT_` override file values.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(path) => ConfigLoader::new()
            .with_file(path)
            .with_env_prefix("LITEQUANT")
            .load()
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => load_default_config().context("failed to load configuration")?,
    };
    Ok(config)
}
