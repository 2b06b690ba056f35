//! Litequant CLI entry point.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use litequant_cli::commands::{convert, download, init, inspect, validate, verify};
use litequant_cli::{load_config, Cli, Commands};
use litequant_config::Config;
use litequant_core::StageError;
use litequant_metrics::{init_tracing, TracingConfig};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} Error: {}", "✗".bright_red(), error_line(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Convert(convert::ConvertArgs::default()));

    let config = match command {
        Commands::Inspect(_) | Commands::Validate(_) | Commands::Version => Config::default(),
        _ => load_config(cli.config.as_deref())?,
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let format = if cli.json { "json" } else { config.logging.format.as_str() };
    init_tracing(TracingConfig::from_names(level, format)?)?;

    match command {
        Commands::Convert(args) => convert::execute(args, config, cli.json),
        Commands::Verify(args) => verify::execute(args, config, cli.json),
        Commands::Inspect(args) => inspect::execute(args, cli.json),
        Commands::Download(args) => download::execute(args, &config, cli.json),
        Commands::Init(args) => init::execute(args, &config, cli.json),
        Commands::Validate(args) => validate::execute(args, cli.json),
        Commands::Version => print_version(cli.json),
    }
}

/// Single-line rendering of a failure, with the download hint for a missing model.
fn error_line(e: &anyhow::Error) -> String {
    let hint = e
        .downcast_ref::<StageError>()
        .and_then(|s| s.error.hint())
        .or_else(|| e.downcast_ref::<litequant_core::Error>().and_then(|e| e.hint()));

    // Stage errors repeat their cause in their own message
    let mut parts: Vec<String> = Vec::new();
    for cause in e.chain() {
        let text = cause.to_string();
        if !parts.last().is_some_and(|prev| prev.contains(&text)) {
            parts.push(text);
        }
    }
    let line = parts.join(": ");

    match hint {
        Some(hint) => format!("{line} (download it from {hint})"),
        None => line,
    }
}

/// Print version information.
fn print_version(json: bool) -> Result<()> {
    if json {
        let version = serde_json::json!({
            "name": "litequant",
            "version": env!("CARGO_PKG_VERSION"),
            "rust_version": env!("CARGO_PKG_RUST_VERSION"),
            "authors": env!("CARGO_PKG_AUTHORS"),
            "description": env!("CARGO_PKG_DESCRIPTION"),
        });
        println!("{}", serde_json::to_string_pretty(&version)?);
    } else {
        println!("{} {}", "litequant".bright_green().bold(), env!("CARGO_PKG_VERSION"));
        println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
        println!("Authors: {}", env!("CARGO_PKG_AUTHORS"));
        println!();
        println!("{}", env!("CARGO_PKG_DESCRIPTION"));
    }
    Ok(())
}
