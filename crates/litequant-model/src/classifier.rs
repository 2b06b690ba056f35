//! Float classifier runtime.
//!
//! Runs a [`ClassifierConfig`] layer list on NHWC images. Activations are
//! kept in NCHW internally; the first layer permutes the input once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use litequant_core::TensorSpec;
use tracing::debug;

use crate::config::{param_name, Activation, ClassifierConfig, LayerSpec};
use crate::inference::{check_batch, InferenceModel};
use crate::loader::{Checkpoint, LoaderConfig, ModelLoader};

/// Apply a fused activation.
pub fn apply_activation(x: &Tensor, activation: Activation) -> candle_core::Result<Tensor> {
    match activation {
        Activation::None => Ok(x.clone()),
        Activation::Relu => x.relu(),
        Activation::Relu6 => x.clamp(0f32, 6f32),
    }
}

/// Fully connected layer that gives identical results per row whatever the batch size.
pub fn dense_forward(x: &Tensor, weight_t: &Tensor, bias: &Tensor) -> candle_core::Result<Tensor> {
    x.unsqueeze(1)?
        .broadcast_matmul(weight_t)?
        .squeeze(1)?
        .broadcast_add(bias)
}

/// Convolution with bias over NCHW activations.
pub fn conv_forward(
    x: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    stride: usize,
    padding: usize,
    groups: usize,
) -> candle_core::Result<Tensor> {
    let channels = bias.dim(0)?;
    x.conv2d(weight, padding, stride, 1, groups)?
        .broadcast_add(&bias.reshape((1, channels, 1, 1))?)
}

/// Per-channel affine for rank 2 or rank 4 activations.
fn channel_affine(x: &Tensor, scale: &Tensor, shift: &Tensor) -> candle_core::Result<Tensor> {
    let channels = scale.dim(0)?;
    let (scale, shift) = if x.rank() == 4 {
        (scale.reshape((1, channels, 1, 1))?, shift.reshape((1, channels, 1, 1))?)
    } else {
        (scale.reshape((1, channels))?, shift.reshape((1, channels))?)
    };
    x.broadcast_mul(&scale)?.broadcast_add(&shift)
}

#[derive(Debug)]
enum Layer {
    Conv {
        weight: Tensor,
        bias: Tensor,
        stride: usize,
        padding: usize,
        groups: usize,
        activation: Activation,
    },
    BatchNorm {
        scale: Tensor,
        shift: Tensor,
        activation: Activation,
    },
    GlobalAvgPool,
    Dense {
        weight_t: Tensor,
        bias: Tensor,
        activation: Activation,
    },
    Softmax,
}

impl Layer {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Layer::Conv {
                weight,
                bias,
                stride,
                padding,
                groups,
                activation,
            } => apply_activation(&conv_forward(x, weight, bias, *stride, *padding, *groups)?, *activation),
            Layer::BatchNorm {
                scale,
                shift,
                activation,
            } => apply_activation(&channel_affine(x, scale, shift)?, *activation),
            Layer::GlobalAvgPool => x.mean((2, 3)),
            Layer::Dense {
                weight_t,
                bias,
                activation,
            } => apply_activation(&dense_forward(x, weight_t, bias)?, *activation),
            Layer::Softmax => candle_nn::ops::softmax_last_dim(x),
        }
    }
}

/// A loaded float classifier.
#[derive(Debug)]
pub struct SourceModel {
    config: ClassifierConfig,
    tensors: HashMap<String, Tensor>,
    layers: Vec<Layer>,
    input_spec: TensorSpec,
    output_spec: TensorSpec,
    device: Device,
    path: Option<PathBuf>,
    file_size: u64,
}

impl SourceModel {
    /// Build a model from an architecture and its weights.
    pub fn new(
        config: ClassifierConfig,
        tensors: HashMap<String, Tensor>,
        device: &Device,
    ) -> Result<Self, ModelError> {
        config
            .validate()
            .map_err(|e| ModelError::ConfigError(e.to_string()))?;

        let mut layers = Vec::with_capacity(config.layers.len());
        for (i, spec) in config.layers.iter().enumerate() {
            layers.push(build_layer(i, spec, &tensors, device)?);
        }

        Ok(Self {
            input_spec: config.input_spec(),
            output_spec: config.output_spec(),
            config,
            tensors,
            layers,
            device: device.clone(),
            path: None,
            file_size: 0,
        })
    }

    /// Build a model from a loaded checkpoint.
    pub fn from_checkpoint(checkpoint: Checkpoint, device: &Device) -> Result<Self, ModelError> {
        let mut model = Self::new(checkpoint.config, checkpoint.tensors, device)?;
        model.path = Some(checkpoint.path);
        model.file_size = checkpoint.file_size;
        Ok(model)
    }

    /// Load a model from a checkpoint file.
    pub fn load<P: AsRef<Path>>(path: P, loader_config: LoaderConfig) -> litequant_core::Result<Self> {
        let device = loader_config.device.clone();
        let checkpoint = ModelLoader::new(path, loader_config)?.load()?;
        Ok(Self::from_checkpoint(checkpoint, &device)?)
    }

    /// Architecture.
    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// All weights by name.
    pub fn tensors(&self) -> &HashMap<String, Tensor> {
        &self.tensors
    }

    /// One layer parameter.
    pub fn param(&self, layer: usize, name: &str) -> Result<&Tensor, ModelError> {
        let key = param_name(layer, name);
        self.tensors.get(&key).ok_or(ModelError::MissingWeight(key))
    }

    /// Device the weights live on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Checkpoint path, if loaded from disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Checkpoint size in bytes, zero when built in memory.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Forward pass on an NHWC batch.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        let mut x = input.permute((0, 3, 1, 2))?.contiguous()?;
        for layer in &self.layers {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    /// Forward pass that also returns every intermediate activation.
    ///
    /// Index 0 holds the input, index `i + 1` the output of layer `i`.
    pub fn forward_with_taps(&self, input: &Tensor) -> Result<(Tensor, Vec<Tensor>), ModelError> {
        let mut taps = Vec::with_capacity(self.layers.len() + 1);
        taps.push(input.clone());

        let mut x = input.permute((0, 3, 1, 2))?.contiguous()?;
        for layer in &self.layers {
            x = layer.forward(&x)?;
            taps.push(x.clone());
        }

        Ok((x, taps))
    }
}

fn build_layer(
    index: usize,
    spec: &LayerSpec,
    tensors: &HashMap<String, Tensor>,
    device: &Device,
) -> Result<Layer, ModelError> {
    let mut params = HashMap::new();
    for (name, shape) in spec.parameters() {
        let key = param_name(index, name);
        let tensor = tensors
            .get(&key)
            .ok_or_else(|| ModelError::MissingWeight(key.clone()))?;
        if tensor.dims() != shape.as_slice() {
            return Err(ModelError::ShapeMismatch {
                expected: format!("{key} {:?}", shape),
                got: format!("{:?}", tensor.dims()),
            });
        }
        params.insert(name, tensor.to_device(device)?);
    }
    let mut take = |name: &str| {
        params
            .remove(name)
            .ok_or_else(|| ModelError::MissingWeight(param_name(index, name)))
    };

    let layer = match spec {
        LayerSpec::Conv2d {
            stride,
            padding,
            groups,
            activation,
            ..
        } => Layer::Conv {
            weight: take("weight")?,
            bias: take("bias")?,
            stride: *stride,
            padding: *padding,
            groups: *groups,
            activation: *activation,
        },
        LayerSpec::BatchNorm { eps, activation, .. } => {
            let gamma = take("gamma")?;
            let beta = take("beta")?;
            let mean = take("running_mean")?;
            let var = take("running_var")?;
            let scale = (gamma / (var + *eps)?.sqrt()?)?;
            let shift = (beta - (mean * &scale)?)?;
            Layer::BatchNorm {
                scale,
                shift,
                activation: *activation,
            }
        }
        LayerSpec::GlobalAvgPool => Layer::GlobalAvgPool,
        LayerSpec::Dense { activation, .. } => Layer::Dense {
            weight_t: take("weight")?.t()?.contiguous()?,
            bias: take("bias")?,
            activation: *activation,
        },
        LayerSpec::Softmax => Layer::Softmax,
    };

    debug!("Built layer {} ({})", index, spec.op_name());
    Ok(layer)
}

impl InferenceModel for SourceModel {
    fn input_spec(&self) -> &TensorSpec {
        &self.input_spec
    }

    fn output_spec(&self) -> &TensorSpec {
        &self.output_spec
    }

    fn max_batch_size(&self) -> Option<usize> {
        None
    }

    fn infer(&mut self, input: &Tensor) -> litequant_core::Result<Tensor> {
        check_batch(&self.input_spec, self.max_batch_size(), input)?;
        Ok(self.forward(input)?)
    }

    fn infer_batch(&mut self, inputs: &Tensor) -> litequant_core::Result<Tensor> {
        check_batch(&self.input_spec, None, inputs)?;
        Ok(self.forward(inputs)?)
    }
}

/// Index of the most likely class and its probability for each row.
pub fn top_classes(probabilities: &Tensor) -> candle_core::Result<Vec<(usize, f32)>> {
    let rows: Vec<Vec<f32>> = probabilities.to_vec2()?;
    Ok(rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
        })
        .collect())
}

/// Model errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Tensor error: {0}")]
    TensorError(String),

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("Missing weight: {0}")]
    MissingWeight(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<candle_core::Error> for ModelError {
    fn from(e: candle_core::Error) -> Self {
        ModelError::TensorError(e.to_string())
    }
}

impl From<ModelError> for litequant_core::Error {
    fn from(e: ModelError) -> Self {
        litequant_core::Error::model_with_source("source model failed", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::random_weights;
    use candle_core::DType;
    use rand::{rngs::StdRng, SeedableRng};

    fn model(seed: u64) -> SourceModel {
        let config = ClassifierConfig::mobilenet_lite();
        let device = Device::Cpu;
        let weights = random_weights(&config, &mut StdRng::seed_from_u64(seed), &device).unwrap();
        SourceModel::new(config, weights, &device).unwrap()
    }

    fn images(n: usize, seed: u64) -> Tensor {
        use rand::Rng;
        let mut rng = StdRng::seed_from_u64(seed);
        let data: Vec<f32> = (0..n * 224 * 224 * 3).map(|_| rng.gen::<f32>()).collect();
        Tensor::from_vec(data, (n, 224, 224, 3), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_forward_produces_probabilities() {
        let model = model(0);
        let out = model.forward(&images(2, 1)).unwrap();
        assert_eq!(out.dims(), &[2, 5]);

        let rows: Vec<Vec<f32>> = out.to_vec2().unwrap();
        for row in rows {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|p| *p >= 0.0 && *p <= 1.0));
        }
    }

    #[test]
    fn test_batch_matches_single() {
        let mut model = model(2);
        let batch = images(3, 5);
        let batched: Vec<Vec<f32>> = model.infer_batch(&batch).unwrap().to_vec2().unwrap();

        for i in 0..3 {
            let single = batch.narrow(0, i, 1).unwrap();
            let out: Vec<Vec<f32>> = model.infer(&single).unwrap().to_vec2().unwrap();
            assert_eq!(out[0], batched[i]);
        }
    }

    #[test]
    fn test_taps() {
        let model = model(3);
        let (out, taps) = model.forward_with_taps(&images(1, 0)).unwrap();
        assert_eq!(taps.len(), model.config().layers.len() + 1);
        assert_eq!(taps[0].dims(), &[1, 224, 224, 3]);
        assert_eq!(taps[1].dims(), &[1, 8, 112, 112]);

        let last: Vec<f32> = taps.last().unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let out: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(last, out);
    }

    #[test]
    fn test_relu6_bounds() {
        let model = model(4);
        let (_, taps) = model.forward_with_taps(&images(1, 1)).unwrap();
        let bn_out: Vec<f32> = taps[2].flatten_all().unwrap().to_vec1().unwrap();
        assert!(bn_out.iter().all(|v| (0.0..=6.0).contains(v)));
    }

    #[test]
    fn test_wrong_input_shape() {
        let mut model = model(5);
        let bad = Tensor::zeros((1, 3, 224, 224), DType::F32, &Device::Cpu).unwrap();
        assert!(model.infer(&bad).is_err());
    }

    #[test]
    fn test_missing_weight() {
        let config = ClassifierConfig::mobilenet_lite();
        let device = Device::Cpu;
        let mut weights = random_weights(&config, &mut StdRng::seed_from_u64(0), &device).unwrap();
        weights.remove("layers.9.bias");

        match SourceModel::new(config, weights, &device) {
            Err(ModelError::MissingWeight(name)) => assert_eq!(name, "layers.9.bias"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_wrong_weight_shape() {
        let config = ClassifierConfig::mobilenet_lite();
        let device = Device::Cpu;
        let mut weights = random_weights(&config, &mut StdRng::seed_from_u64(0), &device).unwrap();
        weights.insert(
            "layers.0.weight".to_string(),
            Tensor::zeros((8, 3, 5, 5), DType::F32, &device).unwrap(),
        );

        assert!(matches!(
            SourceModel::new(config, weights, &device),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_top_classes() {
        let probs = Tensor::new(&[[0.1f32, 0.7, 0.2], [0.5, 0.2, 0.3]], &Device::Cpu).unwrap();
        assert_eq!(top_classes(&probs).unwrap(), vec![(1, 0.7), (0, 0.5)]);
    }
}
