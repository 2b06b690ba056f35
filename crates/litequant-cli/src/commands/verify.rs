//! Verify command - compare an existing artifact against its source model.

use anyhow::{Context, Result};
use clap::Args;

use litequant_config::Config;
use litequant_engine::{verify_artifact, PipelineSettings};

use crate::output::{format_percentage, print_report_line, print_section};

/// Verify command arguments.
#[derive(Args, Debug, Default)]
pub struct VerifyArgs {
    /// Source checkpoint (.safetensors).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Artifact to check.
    #[arg(short, long)]
    pub artifact: Option<String>,

    /// Number of random inputs.
    #[arg(long)]
    pub samples: Option<usize>,

    /// Max difference below which the artifact is acceptable.
    #[arg(long)]
    pub max_diff: Option<f64>,

    /// Seed for reproducible inputs.
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Execute the verify command.
///
/// A deviation above the threshold is reported, not treated as a failure.
pub fn execute(args: VerifyArgs, mut config: Config, json: bool) -> Result<()> {
    if let Some(model) = args.model {
        config.model.path = model;
    }
    if let Some(artifact) = args.artifact {
        config.conversion.output_path = artifact;
    }
    if let Some(n) = args.samples {
        config.verification.samples = n;
    }
    if let Some(threshold) = args.max_diff {
        config.verification.max_diff_threshold = threshold;
    }
    if args.seed.is_some() {
        config.verification.seed = args.seed;
    }
    config.validate().context("invalid configuration")?;

    let settings = PipelineSettings::from_config(&config);
    let (deviation, verdict, lines) = verify_artifact(&settings.model_path, &settings.output_path, &settings)?;

    if json {
        let result = serde_json::json!({
            "model": settings.model_path.display().to_string(),
            "artifact": settings.output_path.display().to_string(),
            "threshold": settings.max_diff_threshold,
            "deviation": deviation,
            "verdict": verdict,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_section(&format!("Verifying {}", settings.output_path.display()));
        println!("  Samples: {}", deviation.samples);
        println!("  Top-1 agreement: {}", format_percentage(deviation.top1_agreement));
        for line in &lines {
            print_report_line(line);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::convert::{self, ConvertArgs};
    use crate::testing::write_tiny_checkpoint;

    #[test]
    fn test_verify_after_convert() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_tiny_checkpoint(dir.path()).display().to_string();
        let artifact = dir.path().join("tiny.lqm").display().to_string();

        let convert = ConvertArgs {
            model: Some(model.clone()),
            output: Some(artifact.clone()),
            calibration_samples: Some(4),
            skip_verify: true,
            seed: Some(1),
            ..Default::default()
        };
        convert::execute(convert, Config::default(), true).unwrap();

        let args = VerifyArgs {
            model: Some(model),
            artifact: Some(artifact),
            samples: Some(3),
            max_diff: Some(1e-12),
            seed: Some(2),
        };
        execute(args, Config::default(), true).unwrap();
    }

    #[test]
    fn test_missing_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = VerifyArgs {
            model: Some(write_tiny_checkpoint(dir.path()).display().to_string()),
            artifact: Some(dir.path().join("absent.lqm").display().to_string()),
            ..Default::default()
        };
        assert!(execute(args, Config::default(), true).is_err());
    }
}
