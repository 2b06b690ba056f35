//! Convert command - run the full conversion pipeline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use litequant_config::Config;
use litequant_engine::{Pipeline, PipelineOutcome, PipelineSettings};

use crate::commands::download::fetch_and_extract;
use crate::output::{format_duration, format_kv_list, print_banner, print_report, print_section, print_warning};
use crate::prompt::confirm_stdin;

/// Convert command arguments.
#[derive(Args, Debug, Default)]
pub struct ConvertArgs {
    /// Source checkpoint (.safetensors).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Artifact destination.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Number of random calibration inputs.
    #[arg(long)]
    pub calibration_samples: Option<usize>,

    /// Number of random verification inputs.
    #[arg(long)]
    pub verification_samples: Option<usize>,

    /// Max difference below which the artifact is acceptable.
    #[arg(long)]
    pub max_diff: Option<f64>,

    /// Seed for reproducible calibration and verification.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Skip the parity check against the source model.
    #[arg(long)]
    pub skip_verify: bool,

    /// Download a missing model without asking.
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl ConvertArgs {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref model) = self.model {
            config.model.path = model.clone();
        }
        if let Some(ref output) = self.output {
            config.conversion.output_path = output.clone();
        }
        if let Some(n) = self.calibration_samples {
            config.conversion.calibration_samples = n;
        }
        if let Some(n) = self.verification_samples {
            config.verification.samples = n;
        }
        if let Some(threshold) = self.max_diff {
            config.verification.max_diff_threshold = threshold;
        }
        if let Some(seed) = self.seed {
            config.conversion.seed = Some(seed);
            config.verification.seed = Some(seed.wrapping_add(1));
        }
        if self.skip_verify {
            config.verification.enabled = false;
        }
        if self.yes {
            config.model.auto_download = true;
        }
    }
}

/// Execute the convert command.
pub fn execute(args: ConvertArgs, mut config: Config, json: bool) -> Result<()> {
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    if !json {
        print_banner("NSFW Model Conversion Tool");
    }

    let model_path = PathBuf::from(&config.model.path);
    if !model_path.exists() && !acquire_model(&model_path, &config, json)? {
        return Ok(());
    }

    info!("Converting {} to {}", config.model.path, config.conversion.output_path);
    let outcome = Pipeline::new(PipelineSettings::from_config(&config)).run()?;

    if json {
        print_json(&outcome)?;
    } else {
        print_report(&outcome.report);

        print_section("Timings");
        let timings: Vec<(String, String)> = outcome
            .timings
            .iter()
            .map(|(stage, elapsed)| (stage.action().to_string(), format_duration(*elapsed)))
            .collect();
        let items: Vec<(&str, String)> = timings.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        println!("{}", format_kv_list(&items));
        println!();

        print_banner("Conversion complete!");
    }

    Ok(())
}

/// Obtain a missing source model. Returns `false` when the operator declines.
fn acquire_model(model_path: &Path, config: &Config, json: bool) -> Result<bool> {
    if !json {
        print_warning("Model not found locally.");
    }

    let consent = if config.model.auto_download {
        true
    } else if json {
        false
    } else {
        confirm_stdin("Download model from GitHub? (y/n): ").context("failed to read answer")?
    };

    if !consent {
        if json {
            let result = serde_json::json!({
                "status": "model_missing",
                "model_path": model_path.display().to_string(),
                "releases_url": config.model.releases_url,
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            println!("\nPlease download the model manually from:");
            println!("  {}", config.model.releases_url);
            println!("and place it at: {}", model_path.display());
        }
        return Ok(false);
    }

    let dest = archive_root(model_path);
    fetch_and_extract(&config.model.url, &dest, false, !json)?;
    if !model_path.exists() {
        warn!(
            "Archive unpacked into {} but {} is still missing",
            dest.display(),
            model_path.display()
        );
    }
    Ok(true)
}

/// Directory the archive is unpacked into: the one containing the model's folder.
fn archive_root(model_path: &Path) -> PathBuf {
    model_path
        .parent()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn print_json(outcome: &PipelineOutcome) -> Result<()> {
    let timings: serde_json::Map<String, serde_json::Value> = outcome
        .timings
        .iter()
        .map(|(stage, elapsed)| (stage.to_string(), serde_json::json!(elapsed.as_secs_f64() * 1000.0)))
        .collect();

    let result = serde_json::json!({
        "status": "converted",
        "artifact": outcome.artifact_path.display().to_string(),
        "size_bytes": outcome.artifact_size,
        "self_test": outcome.self_test,
        "deviation": outcome.deviation,
        "verdict": outcome.verdict(),
        "report": outcome.report.lines,
        "timings_ms": timings,
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_tiny_checkpoint;

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        let args = ConvertArgs {
            model: Some("m.safetensors".into()),
            output: Some("out/m.lqm".into()),
            max_diff: Some(0.5),
            seed: Some(9),
            skip_verify: true,
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.model.path, "m.safetensors");
        assert_eq!(config.conversion.output_path, "out/m.lqm");
        assert_eq!(config.verification.max_diff_threshold, 0.5);
        assert_eq!(config.conversion.seed, Some(9));
        assert_eq!(config.verification.seed, Some(10));
        assert!(!config.verification.enabled);
        assert!(!config.model.auto_download);
    }

    #[test]
    fn test_archive_root() {
        assert_eq!(
            archive_root(Path::new("mobilenet_v2_140_224/nsfw.safetensors")),
            PathBuf::from(".")
        );
        assert_eq!(
            archive_root(Path::new("models/mobilenet_v2_140_224/nsfw.safetensors")),
            PathBuf::from("models")
        );
    }

    #[test]
    fn test_declined_download_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("assets/model.lqm");
        let args = ConvertArgs {
            model: Some(dir.path().join("missing.safetensors").display().to_string()),
            output: Some(output.display().to_string()),
            ..Default::default()
        };

        execute(args, Config::default(), true).unwrap();
        assert!(!output.exists());
    }

    #[test]
    fn test_convert_tiny_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_tiny_checkpoint(dir.path());
        let output = dir.path().join("assets/tiny.lqm");
        let args = ConvertArgs {
            model: Some(model.display().to_string()),
            output: Some(output.display().to_string()),
            calibration_samples: Some(4),
            verification_samples: Some(2),
            seed: Some(3),
            ..Default::default()
        };

        execute(args, Config::default(), true).unwrap();
        assert!(output.exists());
    }
}
