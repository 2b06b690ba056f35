//! Float to int8 conversion.
//!
//! The converter loads a source checkpoint, folds batch norms into the
//! preceding layer, calibrates activation ranges on representative samples
//! and lowers the graph to a [`QuantizedArtifact`]. It also owns the two
//! filesystem steps that follow: atomic persistence and the load-and-run
//! self test.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

use candle_core::Tensor;
use litequant_config::{Config, Optimization};
use litequant_core::{format_shape, policy, Error, ModelContract, Result};
use litequant_model::{param_name, ClassifierConfig, InferenceModel, LayerSpec, LoaderConfig, SourceModel};
use litequant_tensor::{quantize_bias, quantize_per_channel, CalibrationStats, QuantParams, QuantStats};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactSchema, OpSpec, OpWeights, QuantizedArtifact, FORMAT_VERSION};
use crate::interpreter::Interpreter;
use crate::sampler::random_input;

/// Target representation supported by the converter.
pub const TARGET_INT8: &str = "int8";

/// Conversion options.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    /// Enabled optimizations.
    pub optimizations: Vec<Optimization>,

    /// Target numeric representation.
    pub target_dtype: String,

    /// How the source checkpoint is read.
    pub loader: LoaderConfig,

    /// Where operators can obtain a missing model.
    pub releases_url: String,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            optimizations: vec![Optimization::Default],
            target_dtype: TARGET_INT8.to_string(),
            loader: LoaderConfig::default(),
            releases_url: policy::MODEL_RELEASES_URL.to_string(),
        }
    }
}

impl ConversionOptions {
    /// Options from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            optimizations: config.conversion.optimizations.clone(),
            target_dtype: config.conversion.target_dtype.clone(),
            loader: LoaderConfig::default().with_mmap(config.model.use_mmap),
            releases_url: config.model.releases_url.clone(),
        }
    }
}

fn optimization_name(optimization: Optimization) -> &'static str {
    match optimization {
        Optimization::Default => "default",
    }
}

/// Outcome of a successful self test.
#[derive(Debug, Clone, Serialize)]
pub struct SelfTestReport {
    /// Declared input shape.
    pub input_shape: Vec<usize>,

    /// Declared output shape.
    pub output_shape: Vec<usize>,

    /// Shape produced by the test inference.
    pub test_output_shape: Vec<usize>,

    /// Artifact size in bytes.
    pub size_bytes: usize,
}

/// Converts float classifiers to int8 artifacts.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConversionOptions,
}

impl Converter {
    /// Create a converter.
    pub fn new(options: ConversionOptions) -> Self {
        Self { options }
    }

    /// Options in use.
    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    /// Load the source model.
    ///
    /// A missing file yields [`Error::ModelNotFound`] carrying the release
    /// page as a hint. Nothing is written.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<SourceModel> {
        let path = path.as_ref();
        info!("Loading model from {}", path.display());

        match SourceModel::load(path, self.options.loader.clone()) {
            Ok(model) => {
                info!(
                    "Loaded '{}': {} layers, {} parameters",
                    model.config().name,
                    model.config().layers.len(),
                    model.config().num_parameters()
                );
                Ok(model)
            }
            Err(Error::ModelNotFound { path, .. }) => {
                Err(Error::model_not_found_with_hint(path, self.options.releases_url.clone()))
            }
            Err(e) => Err(e),
        }
    }

    /// Quantize `model` to int8, calibrating activations on `samples`.
    pub fn convert<I>(&self, model: &SourceModel, samples: I) -> Result<QuantizedArtifact>
    where
        I: IntoIterator<Item = candle_core::Result<Tensor>>,
    {
        if !self.options.target_dtype.eq_ignore_ascii_case(TARGET_INT8) {
            return Err(Error::conversion(format!(
                "unsupported target representation '{}'",
                self.options.target_dtype
            )));
        }
        if self.options.optimizations.is_empty() {
            warn!("No optimizations enabled; activations are still calibrated for int8");
        }

        let folded = fold_batch_norms(model)?;
        let config = folded.config();
        let input_shape = folded.input_spec().shape.clone();

        let mut stats = CalibrationStats::new(config.layers.len() + 1);
        for sample in samples {
            let sample =
                sample.map_err(|e| Error::conversion_with_source("failed to draw calibration sample", e))?;
            if sample.dims() != input_shape.as_slice() {
                return Err(Error::conversion(format!(
                    "calibration sample shape {} does not match model input {}",
                    format_shape(sample.dims()),
                    format_shape(&input_shape)
                )));
            }

            let (_, taps) = folded
                .forward_with_taps(&sample)
                .map_err(|e| Error::conversion_with_source("calibration forward pass failed", e))?;
            stats
                .observe_pass(&taps)
                .map_err(|e| Error::conversion_with_source("failed to record activation ranges", e))?;
        }

        if stats.samples() == 0 {
            return Err(Error::conversion("calibration set is empty"));
        }
        debug!("Calibrated {} tensors on {} samples", stats.len(), stats.samples());

        let tap_params = |tap: usize| {
            stats
                .params(tap)
                .ok_or_else(|| Error::conversion(format!("no finite range observed for tensor {tap}")))
        };

        let mut current = tap_params(0)?;
        let mut ops = vec![OpSpec::Quantize { output: current }];
        let mut weights = BTreeMap::new();
        let mut quant_stats = QuantStats::default();

        for (i, spec) in config.layers.iter().enumerate() {
            let op_index = ops.len();
            let op = match spec {
                LayerSpec::Conv2d {
                    stride,
                    padding,
                    groups,
                    activation,
                    ..
                } => {
                    let w = quantize_layer(&folded, i, current, &mut quant_stats)?;
                    let weight_shape = w.weight.shape.clone();
                    weights.insert(op_index, w);
                    OpSpec::Conv2d {
                        weight_shape,
                        stride: *stride,
                        padding: *padding,
                        groups: *groups,
                        activation: *activation,
                        output: tap_params(i + 1)?,
                    }
                }
                LayerSpec::Dense { activation, .. } => {
                    let w = quantize_layer(&folded, i, current, &mut quant_stats)?;
                    let weight_shape = w.weight.shape.clone();
                    weights.insert(op_index, w);
                    OpSpec::Dense {
                        weight_shape,
                        activation: *activation,
                        output: tap_params(i + 1)?,
                    }
                }
                LayerSpec::GlobalAvgPool => OpSpec::GlobalAvgPool {
                    output: tap_params(i + 1)?,
                },
                LayerSpec::Softmax => OpSpec::Softmax {
                    output: QuantParams::probabilities(),
                },
                LayerSpec::BatchNorm { .. } => {
                    return Err(Error::unsupported_operation(
                        spec.op_name(),
                        format!("layer {i} could not be folded"),
                    ))
                }
            };

            if let Some(params) = op.output_params() {
                current = params;
            }
            ops.push(op);
        }
        ops.push(OpSpec::Dequantize);

        info!(
            "Quantized {} layers: {:.1}x smaller weights, mean error {:.6}, max error {:.6}",
            quant_stats.layers_quantized,
            quant_stats.compression_ratio(),
            quant_stats.mean_error,
            quant_stats.max_error
        );

        let schema = ArtifactSchema {
            format_version: FORMAT_VERSION,
            model_name: config.name.clone(),
            input: config.input_spec(),
            output: config.output_spec(),
            labels: config.labels.clone(),
            ops,
            calibration_samples: stats.samples(),
            optimizations: self
                .options
                .optimizations
                .iter()
                .map(|o| optimization_name(*o).to_string())
                .collect(),
        };

        let artifact = QuantizedArtifact::encode(schema, &weights)?;
        info!("Model converted: {} bytes", artifact.len());
        Ok(artifact)
    }

    /// Write the artifact atomically, returning its size in bytes.
    ///
    /// Bytes go to a temporary file next to `path` which is synced and then
    /// renamed over the destination.
    pub fn persist<P: AsRef<Path>>(&self, artifact: &QuantizedArtifact, path: P) -> Result<u64> {
        let path = path.as_ref();
        let dest = path.display().to_string();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        std::fs::create_dir_all(parent)
            .map_err(|e| Error::io_with_path("failed to create output directory", parent.display().to_string(), e))?;

        let mut file = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| Error::io_with_path("failed to create temporary file", dest.clone(), e))?;
        file.write_all(artifact.as_bytes())
            .map_err(|e| Error::io_with_path("failed to write artifact", dest.clone(), e))?;
        file.as_file()
            .sync_all()
            .map_err(|e| Error::io_with_path("failed to sync artifact", dest.clone(), e))?;
        file.persist(path)
            .map_err(|e| Error::io_with_path("failed to move artifact into place", dest.clone(), e.error))?;

        info!("Artifact written to {}", dest);
        Ok(artifact.len() as u64)
    }

    /// Reload a persisted artifact and run it once on a fresh random input.
    ///
    /// Checks that the declared shapes equal `expected`. Numerics are not
    /// validated.
    pub fn self_test<P, R>(
        &self,
        path: P,
        expected: &ModelContract,
        rng: &mut R,
    ) -> Result<(Interpreter, SelfTestReport)>
    where
        P: AsRef<Path>,
        R: Rng + ?Sized,
    {
        let path = path.as_ref();
        let device = self.options.loader.device.clone();

        let bytes = std::fs::read(path)
            .map_err(|e| Error::artifact_with_source(format!("cannot reload {}", path.display()), e))?;
        let mut interpreter = Interpreter::from_bytes(bytes, &device)?;
        interpreter.allocate_tensors()?;

        expected.ensure_matches(&interpreter.contract())?;

        let input_details = interpreter.input_details();
        let output_details = interpreter.output_details();
        let (input, output) = match (input_details.first(), output_details.first()) {
            (Some(i), Some(o)) => (i.clone(), o.clone()),
            _ => return Err(Error::artifact_invalid("artifact declares no input or output")),
        };

        let sample = random_input(rng, &input.shape, &device)
            .map_err(|e| Error::artifact_with_source("failed to build test input", e))?;
        interpreter.set_input(input.index, &sample)?;
        interpreter.invoke()?;
        let result = interpreter.output(output.index)?;

        if result.dims() != output.shape.as_slice() {
            return Err(Error::artifact_shape_mismatch(
                format!(
                    "test inference produced {} but {} is declared",
                    format_shape(result.dims()),
                    format_shape(&output.shape)
                ),
                output.shape.clone(),
                result.dims().to_vec(),
            ));
        }

        let report = SelfTestReport {
            input_shape: input.shape,
            output_shape: output.shape,
            test_output_shape: result.dims().to_vec(),
            size_bytes: interpreter.size_bytes(),
        };
        debug!("Self test passed: {:?}", report);
        Ok((interpreter, report))
    }
}

fn quantize_layer(
    model: &SourceModel,
    layer: usize,
    input: QuantParams,
    stats: &mut QuantStats,
) -> Result<OpWeights> {
    let failed = |e: candle_core::Error| Error::conversion_with_source(format!("failed to quantize layer {layer}"), e);

    let weight = model
        .param(layer, "weight")
        .map_err(|e| Error::conversion_with_source("missing weight", e))?;
    let bias: Vec<f32> = model
        .param(layer, "bias")
        .map_err(|e| Error::conversion_with_source("missing bias", e))?
        .to_vec1()
        .map_err(failed)?;

    let quantized = quantize_per_channel(weight).map_err(failed)?;
    let bias = quantize_bias(&bias, input.scale, &quantized.scales).map_err(failed)?;
    stats.record(weight, &quantized).map_err(failed)?;

    Ok(OpWeights {
        weight: quantized,
        bias,
    })
}

/// Fold every batch norm into the activation-free conv or dense layer
/// before it.
///
/// The folded layer takes over the batch norm's activation. A batch norm in
/// any other position is an unsupported operation.
pub fn fold_batch_norms(model: &SourceModel) -> Result<SourceModel> {
    let config = model.config();
    let mut layers: Vec<LayerSpec> = Vec::with_capacity(config.layers.len());
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    let mut folded = 0;

    for (i, spec) in config.layers.iter().enumerate() {
        let LayerSpec::BatchNorm {
            channels,
            eps,
            activation,
        } = spec
        else {
            let index = layers.len();
            for (name, _) in spec.parameters() {
                let tensor = model
                    .param(i, name)
                    .map_err(|e| Error::conversion_with_source("missing parameter", e))?;
                tensors.insert(param_name(index, name), tensor.clone());
            }
            layers.push(spec.clone());
            continue;
        };

        let unsupported = |why: &str| Error::unsupported_operation("batch_norm", format!("layer {i}: {why}"));
        let target = layers
            .len()
            .checked_sub(1)
            .ok_or_else(|| unsupported("no preceding layer to fold into"))?;

        match &mut layers[target] {
            LayerSpec::Conv2d {
                out_channels: width,
                activation: fused,
                ..
            }
            | LayerSpec::Dense {
                out_features: width,
                activation: fused,
                ..
            } => {
                if !fused.is_none() {
                    return Err(unsupported("preceding layer applies an activation"));
                }
                if *width != *channels {
                    return Err(unsupported("channel count differs from preceding layer"));
                }
                *fused = *activation;
            }
            _ => return Err(unsupported("must follow a conv2d or dense layer")),
        }

        let fold = || -> candle_core::Result<(Tensor, Tensor)> {
            let gamma = model.param(i, "gamma").map_err(candle_core::Error::wrap)?;
            let beta = model.param(i, "beta").map_err(candle_core::Error::wrap)?;
            let mean = model.param(i, "running_mean").map_err(candle_core::Error::wrap)?;
            let var = model.param(i, "running_var").map_err(candle_core::Error::wrap)?;
            let scale = (gamma / (var + *eps)?.sqrt()?)?;

            let weight_key = param_name(target, "weight");
            let bias_key = param_name(target, "bias");
            let (weight, bias) = match (tensors.get(&weight_key), tensors.get(&bias_key)) {
                (Some(w), Some(b)) => (w, b),
                _ => candle_core::bail!("layer {target} has no weights to fold into"),
            };

            let mut scale_shape = vec![1; weight.rank()];
            scale_shape[0] = *channels;
            let weight = weight.broadcast_mul(&scale.reshape(scale_shape)?)?;
            let bias = ((bias - mean)? * &scale)?.add(beta)?;
            Ok((weight, bias))
        };
        let (weight, bias) =
            fold().map_err(|e| Error::conversion_with_source(format!("failed to fold batch norm {i}"), e))?;

        tensors.insert(param_name(target, "weight"), weight);
        tensors.insert(param_name(target, "bias"), bias);
        folded += 1;
    }

    if folded > 0 {
        debug!("Folded {} batch norms", folded);
    }

    let config = ClassifierConfig {
        layers,
        ..config.clone()
    };
    SourceModel::new(config, tensors, model.device())
        .map_err(|e| Error::conversion_with_source("failed to rebuild folded graph", e))
}
