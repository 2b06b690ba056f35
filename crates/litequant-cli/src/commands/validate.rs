//! Validate command - validate configuration files.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use litequant_config::{Config, ConfigLoader};
use litequant_core::policy;
use litequant_engine::ARTIFACT_EXTENSION;

/// Validate command arguments.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration file to validate.
    pub config_file: String,

    /// Also check that the source model exists.
    #[arg(long)]
    pub check_model: bool,

    /// Verbose output.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Execute the validate command.
pub fn execute(args: ValidateArgs, json: bool) -> Result<()> {
    if !json {
        println!(
            "\n{} {}",
            "Validating".bright_green().bold(),
            args.config_file.bright_cyan()
        );
        println!();
    }

    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let config = match ConfigLoader::new().with_file(&args.config_file).load() {
        Ok(c) => {
            if !json && args.verbose {
                println!("  {} Configuration loaded successfully", "✓".bright_green());
            }
            Some(c)
        }
        Err(e) => {
            errors.push(format!("Failed to load configuration: {}", e));
            None
        }
    };

    if let Some(ref config) = config {
        if args.check_model && !Path::new(&config.model.path).exists() {
            if config.model.auto_download {
                warnings.push(format!(
                    "Model path '{}' does not exist; it will be downloaded from {}",
                    config.model.path, config.model.url
                ));
            } else {
                errors.push(format!("Model path '{}' does not exist", config.model.path));
            }
        }

        warnings.extend(collect_warnings(config));

        if !json && args.verbose {
            println!();
            println!("  {}", "Configuration Summary".bright_cyan().underline());
            println!("    Model: {}", config.model.path);
            println!("    Output: {}", config.conversion.output_path);
            println!("    Target: {}", config.conversion.target_dtype);
            println!("    Calibration Samples: {}", config.conversion.calibration_samples);
            if config.verification.enabled {
                println!(
                    "    Verification: {} samples, max diff {}",
                    config.verification.samples, config.verification.max_diff_threshold
                );
            } else {
                println!("    Verification: disabled");
            }
            println!();
        }
    }

    if json {
        let result = serde_json::json!({
            "file": args.config_file,
            "valid": errors.is_empty(),
            "errors": errors,
            "warnings": warnings,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if !errors.is_empty() {
            println!("  {}", "Errors:".bright_red().bold());
            for error in &errors {
                println!("    {} {}", "✗".bright_red(), error);
            }
            println!();
        }

        if !warnings.is_empty() {
            println!("  {}", "Warnings:".bright_yellow().bold());
            for warning in &warnings {
                println!("    {} {}", "⚠".bright_yellow(), warning);
            }
            println!();
        }

        if errors.is_empty() {
            println!(
                "  {} Configuration is {}",
                "✓".bright_green(),
                "valid".bright_green().bold()
            );
        } else {
            println!(
                "  {} Configuration is {}",
                "✗".bright_red(),
                "invalid".bright_red().bold()
            );
        }
    }

    if !errors.is_empty() {
        anyhow::bail!("Configuration validation failed");
    }

    Ok(())
}

/// Settings that load fine but are likely mistakes.
fn collect_warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.conversion.calibration_samples < policy::CALIBRATION_SAMPLES {
        warnings.push(format!(
            "conversion.calibration_samples is below {}; activation ranges may be too narrow",
            policy::CALIBRATION_SAMPLES
        ));
    }

    if config.conversion.optimizations.is_empty() {
        warnings.push("conversion.optimizations is empty; weights will not be quantized for size".to_string());
    }

    let extension = Path::new(&config.conversion.output_path)
        .extension()
        .and_then(|e| e.to_str());
    if extension != Some(ARTIFACT_EXTENSION) {
        warnings.push(format!(
            "conversion.output_path does not end in .{}",
            ARTIFACT_EXTENSION
        ));
    }

    if !config.verification.enabled {
        warnings.push("verification is disabled; the artifact will only be self-tested".to_string());
    } else if config.verification.max_diff_threshold > 1.0 {
        warnings.push(format!(
            "verification.max_diff_threshold {} exceeds the probability range; every run will pass",
            config.verification.max_diff_threshold
        ));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_no_warnings() {
        assert!(collect_warnings(&Config::default()).is_empty());
    }

    #[test]
    fn test_warnings() {
        let mut config = Config::default();
        config.conversion.calibration_samples = 10;
        config.conversion.output_path = "model.tflite".to_string();
        config.verification.max_diff_threshold = 2.0;

        let warnings = collect_warnings(&config);
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("calibration_samples"));
    }

    #[test]
    fn test_validate_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.yaml");
        std::fs::write(&good, "conversion:\n  calibration_samples: 100\n").unwrap();
        let args = ValidateArgs {
            config_file: good.display().to_string(),
            check_model: false,
            verbose: true,
        };
        assert!(execute(args, true).is_ok());

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "verification:\n  samples: 0\n").unwrap();
        let args = ValidateArgs {
            config_file: bad.display().to_string(),
            check_model: false,
            verbose: false,
        };
        assert!(execute(args, true).is_err());
    }
}
