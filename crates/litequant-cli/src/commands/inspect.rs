//! Inspect command - show what is inside a checkpoint or an artifact.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::Device;
use clap::Args;

use litequant_core::{format_shape, Error};
use litequant_engine::{read_schema, Interpreter, QuantizedArtifact, TensorDetails, ARTIFACT_EXTENSION};
use litequant_model::{weight_stats, LoaderConfig, SourceModel};

use crate::output::{format_bytes, format_kv_list, format_number, format_table, print_section};

/// Inspect command arguments.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Source checkpoint (.safetensors) or converted artifact (.lqm).
    pub path: String,

    /// Show per-tensor weight statistics of a source checkpoint.
    #[arg(short, long)]
    pub weights: bool,
}

/// Execute the inspect command.
pub fn execute(args: InspectArgs, json: bool) -> Result<()> {
    let path = Path::new(&args.path);
    let bytes = std::fs::read(path)
        .map_err(|e| Error::io_with_path("failed to read file", path.display().to_string(), e))?;

    let is_artifact = path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION) || read_schema(&bytes).is_ok();
    if is_artifact {
        inspect_artifact(path, bytes, json)
    } else {
        inspect_source(path, args.weights, json)
    }
}

fn inspect_artifact(path: &Path, bytes: Vec<u8>, json: bool) -> Result<()> {
    let artifact = QuantizedArtifact::from_bytes(bytes)?;
    let mut interpreter = Interpreter::new(&artifact, &Device::Cpu)?;
    interpreter.allocate_tensors()?;

    let schema = artifact.schema();
    let input = interpreter.input_details();
    let output = interpreter.output_details();

    if json {
        let result = serde_json::json!({
            "path": path.display().to_string(),
            "kind": "artifact",
            "size_bytes": artifact.len(),
            "schema": schema,
            "input_details": input,
            "output_details": output,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print_section(&format!("Artifact {}", path.display()));
    let mut items = vec![
        ("Format", format!("litequant v{}", schema.format_version)),
        ("Model", schema.model_name.clone()),
        ("Size", format_bytes(artifact.len() as u64)),
        ("Labels", schema.labels.join(", ")),
        ("Calibration", format!("{} samples", schema.calibration_samples)),
        ("Optimizations", schema.optimizations.join(", ")),
    ];
    items.extend(input.iter().map(|d| ("Input", details_line(d))));
    items.extend(output.iter().map(|d| ("Output", details_line(d))));
    println!("{}", format_kv_list(&items));

    print_section("Operations");
    let rows: Vec<Vec<String>> = schema
        .ops
        .iter()
        .enumerate()
        .map(|(i, op)| {
            let params = op.output_params();
            vec![
                i.to_string(),
                op.name().to_string(),
                op.weight_shape().map(format_shape).unwrap_or_else(|| "-".to_string()),
                params.map(|p| format!("{:.6}", p.scale)).unwrap_or_else(|| "-".to_string()),
                params.map(|p| p.zero_point.to_string()).unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print!("{}", format_table(&["#", "op", "weight", "scale", "zero point"], &rows));

    Ok(())
}

fn details_line(details: &TensorDetails) -> String {
    let quant = details
        .quantization
        .map(|q| format!(" (scale {:.6}, zero point {})", q.scale, q.zero_point))
        .unwrap_or_default();
    format!(
        "{} {} {}{}",
        details.name,
        format_shape(&details.shape),
        details.dtype,
        quant
    )
}

fn inspect_source(path: &Path, show_weights: bool, json: bool) -> Result<()> {
    let model = SourceModel::load(path, LoaderConfig::default())?;
    let config = model.config();
    let shapes = config.layer_shapes().context("invalid architecture")?;
    let stats = if show_weights {
        weight_stats(model.tensors()).context("failed to compute weight statistics")?
    } else {
        Vec::new()
    };

    if json {
        let weights: Vec<serde_json::Value> = stats
            .iter()
            .map(|s| {
                serde_json::json!({
                    "name": s.name,
                    "shape": s.shape,
                    "dtype": format!("{:?}", s.dtype),
                    "min": s.min,
                    "max": s.max,
                    "mean": s.mean,
                    "std": s.std,
                })
            })
            .collect();
        let result = serde_json::json!({
            "path": path.display().to_string(),
            "kind": "source",
            "size_bytes": model.file_size(),
            "parameters": config.num_parameters(),
            "architecture": config,
            "weights": weights,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print_section(&format!("Checkpoint {}", path.display()));
    let items = vec![
        ("Model", config.name.clone()),
        ("Size", format_bytes(model.file_size())),
        ("Parameters", format_number(config.num_parameters() as u64)),
        ("Input", config.input_spec().to_string()),
        ("Output", config.output_spec().to_string()),
        ("Labels", config.labels.join(", ")),
    ];
    println!("{}", format_kv_list(&items));

    print_section("Layers");
    let rows: Vec<Vec<String>> = config
        .layers
        .iter()
        .zip(&shapes)
        .enumerate()
        .map(|(i, (layer, shape))| {
            let params: usize = layer.parameters().iter().map(|(_, s)| s.iter().product::<usize>()).sum();
            vec![
                i.to_string(),
                layer.op_name().to_string(),
                format_shape(shape),
                format_number(params as u64),
            ]
        })
        .collect();
    print!("{}", format_table(&["#", "layer", "output", "params"], &rows));

    if show_weights {
        print_section("Weights");
        let rows: Vec<Vec<String>> = stats
            .iter()
            .map(|s| {
                vec![
                    s.name.clone(),
                    format_shape(&s.shape),
                    format!("{:?}", s.dtype).to_lowercase(),
                    format!("{:.4}", s.min),
                    format!("{:.4}", s.max),
                    format!("{:.4}", s.mean),
                    format!("{:.4}", s.std),
                ]
            })
            .collect();
        print!("{}", format_table(&["name", "shape", "dtype", "min", "max", "mean", "std"], &rows));
    }

    Ok(())
}
