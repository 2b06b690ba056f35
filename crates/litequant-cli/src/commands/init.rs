//! Init command - write a randomly initialized checkpoint.
//!
//! Useful for exercising the pipeline without the real weights.

use std::path::Path;

use anyhow::{bail, Context, Result};
use candle_core::{DType, Device};
use clap::Args;

use litequant_config::Config;
use litequant_engine::make_rng;
use litequant_model::{random_weights, save_checkpoint, ClassifierConfig};

use crate::output::{format_bytes, format_number, print_success};

/// Init command arguments.
#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// Checkpoint destination. Defaults to `model.path` from the configuration.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Seed for the random weights.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Storage dtype (f32, f16, bf16).
    #[arg(long, default_value = "f32")]
    pub dtype: String,

    /// Write the architecture to a sibling config.json instead of the file metadata.
    #[arg(long)]
    pub separate_config: bool,

    /// Overwrite an existing file.
    #[arg(short, long)]
    pub force: bool,
}

/// Execute the init command.
pub fn execute(args: InitArgs, config: &Config, json: bool) -> Result<()> {
    let output = args.output.as_deref().unwrap_or(&config.model.path);
    let path = Path::new(output);
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let dtype = parse_dtype(&args.dtype)?;
    let architecture = ClassifierConfig::default();
    let weights = random_weights(&architecture, &mut make_rng(args.seed), &Device::Cpu)
        .context("failed to draw random weights")?;
    save_checkpoint(path, &architecture, &weights, dtype, !args.separate_config)
        .with_context(|| format!("failed to write {}", path.display()))?;

    if args.separate_config {
        let sibling = path.with_file_name("config.json");
        std::fs::write(&sibling, architecture.to_json()?)
            .with_context(|| format!("failed to write {}", sibling.display()))?;
    }

    let size = std::fs::metadata(path)?.len();
    if json {
        let result = serde_json::json!({
            "path": path.display().to_string(),
            "model": architecture.name,
            "parameters": architecture.num_parameters(),
            "dtype": args.dtype,
            "size_bytes": size,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_success(&format!(
            "Wrote {} ({} parameters, {})",
            path.display(),
            format_number(architecture.num_parameters() as u64),
            format_bytes(size)
        ));
    }

    Ok(())
}

fn parse_dtype(name: &str) -> Result<DType> {
    match name.to_lowercase().as_str() {
        "f32" | "float32" => Ok(DType::F32),
        "f16" | "float16" => Ok(DType::F16),
        "bf16" | "bfloat16" => Ok(DType::BF16),
        other => bail!("unsupported dtype '{other}' (expected f32, f16 or bf16)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use litequant_model::{LoaderConfig, SourceModel};

    #[test]
    fn test_parse_dtype() {
        assert_eq!(parse_dtype("F16").unwrap(), DType::F16);
        assert_eq!(parse_dtype("bfloat16").unwrap(), DType::BF16);
        assert!(parse_dtype("int8").is_err());
    }

    #[test]
    fn test_init_writes_loadable_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model/random.safetensors");
        let args = InitArgs {
            output: Some(path.display().to_string()),
            seed: Some(1),
            dtype: "f16".into(),
            ..Default::default()
        };
        execute(args, &Config::default(), true).unwrap();

        let model = SourceModel::load(&path, LoaderConfig::default()).unwrap();
        assert_eq!(model.config(), &ClassifierConfig::default());
    }

    #[test]
    fn test_init_separate_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("random.safetensors");
        let args = InitArgs {
            output: Some(path.display().to_string()),
            dtype: "f32".into(),
            separate_config: true,
            ..Default::default()
        };
        execute(args, &Config::default(), true).unwrap();

        assert!(dir.path().join("config.json").exists());
        assert!(SourceModel::load(&path, LoaderConfig::default()).is_ok());
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("random.safetensors");
        std::fs::write(&path, b"keep me").unwrap();

        let args = InitArgs {
            output: Some(path.display().to_string()),
            dtype: "f32".into(),
            ..Default::default()
        };
        assert!(execute(args, &Config::default(), true).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }
}
