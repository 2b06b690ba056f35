//! Classifier architecture configuration.
//!
//! A classifier is a plain sequence of layers applied to an NHWC float
//! image. The layer list is stored next to the weights, either embedded in
//! the checkpoint metadata or in a sibling `config.json`.

use std::path::Path;

use litequant_core::{policy, ElementType, TensorSpec};
use serde::{Deserialize, Serialize};

/// Element-wise activation fused into a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    /// Identity.
    #[default]
    None,
    /// `max(x, 0)`.
    Relu,
    /// `min(max(x, 0), 6)`.
    Relu6,
}

impl Activation {
    /// Whether this is the identity.
    pub fn is_none(&self) -> bool {
        matches!(self, Activation::None)
    }
}

/// One layer of a sequential classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    /// 2D convolution over NCHW activations. Weight `[out, in / groups, k, k]`.
    Conv2d {
        /// Input channels.
        in_channels: usize,
        /// Output channels.
        out_channels: usize,
        /// Square kernel size.
        kernel_size: usize,
        /// Stride.
        #[serde(default = "default_one")]
        stride: usize,
        /// Zero padding on each side.
        #[serde(default)]
        padding: usize,
        /// Channel groups; equal to `in_channels` for depthwise.
        #[serde(default = "default_one")]
        groups: usize,
        /// Fused activation.
        #[serde(default)]
        activation: Activation,
    },

    /// Inference-mode batch normalization.
    BatchNorm {
        /// Normalized channels.
        channels: usize,
        /// Variance epsilon.
        #[serde(default = "default_eps")]
        eps: f64,
        /// Fused activation.
        #[serde(default)]
        activation: Activation,
    },

    /// Mean over the spatial dimensions.
    GlobalAvgPool,

    /// Fully connected layer. Weight `[out_features, in_features]`.
    Dense {
        /// Input features.
        in_features: usize,
        /// Output features.
        out_features: usize,
        /// Fused activation.
        #[serde(default)]
        activation: Activation,
    },

    /// Softmax over the last dimension.
    Softmax,
}

impl LayerSpec {
    /// Short operation name used in logs and errors.
    pub fn op_name(&self) -> &'static str {
        match self {
            LayerSpec::Conv2d { groups, in_channels, .. } if *groups > 1 && groups == in_channels => {
                "depthwise_conv2d"
            }
            LayerSpec::Conv2d { .. } => "conv2d",
            LayerSpec::BatchNorm { .. } => "batch_norm",
            LayerSpec::GlobalAvgPool => "global_avg_pool",
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Softmax => "softmax",
        }
    }

    /// Fused activation, if the layer carries one.
    pub fn activation(&self) -> Activation {
        match self {
            LayerSpec::Conv2d { activation, .. }
            | LayerSpec::BatchNorm { activation, .. }
            | LayerSpec::Dense { activation, .. } => *activation,
            LayerSpec::GlobalAvgPool | LayerSpec::Softmax => Activation::None,
        }
    }

    /// Parameter names and shapes this layer expects.
    pub fn parameters(&self) -> Vec<(&'static str, Vec<usize>)> {
        match self {
            LayerSpec::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                groups,
                ..
            } => vec![
                (
                    "weight",
                    vec![*out_channels, in_channels / groups.max(&1), *kernel_size, *kernel_size],
                ),
                ("bias", vec![*out_channels]),
            ],
            LayerSpec::BatchNorm { channels, .. } => vec![
                ("gamma", vec![*channels]),
                ("beta", vec![*channels]),
                ("running_mean", vec![*channels]),
                ("running_var", vec![*channels]),
            ],
            LayerSpec::Dense {
                in_features,
                out_features,
                ..
            } => vec![
                ("weight", vec![*out_features, *in_features]),
                ("bias", vec![*out_features]),
            ],
            LayerSpec::GlobalAvgPool | LayerSpec::Softmax => Vec::new(),
        }
    }
}

/// Name of a layer parameter tensor in a checkpoint.
pub fn param_name(layer: usize, param: &str) -> String {
    format!("layers.{layer}.{param}")
}

/// Sequential image classifier description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Model name.
    pub name: String,

    /// NHWC input shape, batch first.
    #[serde(default = "default_input_shape")]
    pub input_shape: Vec<usize>,

    /// Class labels, one per output.
    #[serde(default)]
    pub labels: Vec<String>,

    /// Layers in execution order.
    pub layers: Vec<LayerSpec>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::mobilenet_lite()
    }
}

impl ClassifierConfig {
    /// Small MobileNet-style network with the standard 224×224×3 → 5 contract.
    pub fn mobilenet_lite() -> Self {
        use Activation::*;

        let conv = |in_channels, out_channels, kernel_size, stride, groups, activation| {
            LayerSpec::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding: kernel_size / 2,
                groups,
                activation,
            }
        };
        let bn = |channels, activation| LayerSpec::BatchNorm {
            channels,
            eps: default_eps(),
            activation,
        };

        Self {
            name: "mobilenet-lite".to_string(),
            input_shape: policy::INPUT_SHAPE.to_vec(),
            labels: policy::CLASS_LABELS.iter().map(|s| s.to_string()).collect(),
            layers: vec![
                conv(3, 8, 3, 2, 1, None),
                bn(8, Relu6),
                conv(8, 8, 3, 2, 8, None),
                bn(8, Relu6),
                conv(8, 16, 1, 1, 1, Relu6),
                conv(16, 16, 3, 2, 16, None),
                bn(16, Relu6),
                conv(16, 32, 1, 1, 1, Relu6),
                LayerSpec::GlobalAvgPool,
                LayerSpec::Dense {
                    in_features: 32,
                    out_features: policy::NUM_CLASSES,
                    activation: None,
                },
                LayerSpec::Softmax,
            ],
        }
    }

    /// Load from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ArchitectureError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ArchitectureError::IoError(e.to_string()))?;
        Self::from_json_str(&content)
    }

    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ArchitectureError> {
        serde_json::from_str(json).map_err(|e| ArchitectureError::ParseError(e.to_string()))
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, ArchitectureError> {
        serde_json::to_string(self).map_err(|e| ArchitectureError::ParseError(e.to_string()))
    }

    /// Declared input tensor.
    pub fn input_spec(&self) -> TensorSpec {
        TensorSpec::new("input", self.input_shape.clone(), ElementType::F32)
    }

    /// Declared output tensor. Only valid after [`validate`](Self::validate).
    pub fn output_spec(&self) -> TensorSpec {
        let batch = self.input_shape.first().copied().unwrap_or(1);
        TensorSpec::new("output", vec![batch, self.num_classes()], ElementType::F32)
    }

    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| match layer {
                LayerSpec::Dense { out_features, .. } => Some(*out_features),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Total number of weight parameters.
    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.parameters())
            .map(|(_, shape)| shape.iter().product::<usize>())
            .sum()
    }

    /// Output shape of each layer for a batch of one, NCHW for feature maps.
    pub fn layer_shapes(&self) -> Result<Vec<Vec<usize>>, ArchitectureError> {
        let (h, w, c) = match self.input_shape.as_slice() {
            [_, h, w, c] => (*h, *w, *c),
            other => {
                return Err(ArchitectureError::InvalidValue(format!(
                    "input_shape must be [batch, height, width, channels], got {:?}",
                    other
                )))
            }
        };

        let mut shape = vec![1, c, h, w];
        let mut shapes = Vec::with_capacity(self.layers.len());

        for (i, layer) in self.layers.iter().enumerate() {
            shape = next_shape(i, layer, &shape)?;
            shapes.push(shape.clone());
        }

        Ok(shapes)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ArchitectureError> {
        if self.layers.is_empty() {
            return Err(ArchitectureError::InvalidValue(
                "model must have at least one layer".to_string(),
            ));
        }

        let shapes = self.layer_shapes()?;
        let out = shapes.last().map(Vec::as_slice).unwrap_or_default();

        if out.len() != 2 || out[1] == 0 {
            return Err(ArchitectureError::InvalidValue(format!(
                "model must end in a [batch, classes] tensor, got {:?}",
                out
            )));
        }

        if !self.labels.is_empty() && self.labels.len() != out[1] {
            return Err(ArchitectureError::InvalidValue(format!(
                "{} labels for {} classes",
                self.labels.len(),
                out[1]
            )));
        }

        Ok(())
    }
}

fn next_shape(index: usize, layer: &LayerSpec, shape: &[usize]) -> Result<Vec<usize>, ArchitectureError> {
    let invalid = |msg: String| ArchitectureError::InvalidValue(format!("layer {index} ({}): {msg}", layer.op_name()));

    match (layer, shape) {
        (
            LayerSpec::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
                groups,
                ..
            },
            [n, c, h, w],
        ) => {
            if c != in_channels {
                return Err(invalid(format!("expects {in_channels} channels, got {c}")));
            }
            if *groups == 0 || in_channels % groups != 0 || out_channels % groups != 0 {
                return Err(invalid(format!("groups {groups} must divide channel counts")));
            }
            if *stride == 0 || *kernel_size == 0 {
                return Err(invalid("stride and kernel_size must be > 0".to_string()));
            }
            if h + 2 * padding < *kernel_size || w + 2 * padding < *kernel_size {
                return Err(invalid(format!("kernel {kernel_size} larger than input {h}x{w}")));
            }
            let oh = (h + 2 * padding - kernel_size) / stride + 1;
            let ow = (w + 2 * padding - kernel_size) / stride + 1;
            Ok(vec![*n, *out_channels, oh, ow])
        }
        (LayerSpec::BatchNorm { channels, eps, .. }, s) if s.len() == 4 || s.len() == 2 => {
            if s[1] != *channels {
                return Err(invalid(format!("expects {channels} channels, got {}", s[1])));
            }
            if !(*eps > 0.0) {
                return Err(invalid("eps must be > 0".to_string()));
            }
            Ok(s.to_vec())
        }
        (LayerSpec::GlobalAvgPool, [n, c, _, _]) => Ok(vec![*n, *c]),
        (
            LayerSpec::Dense {
                in_features,
                out_features,
                ..
            },
            [n, f],
        ) => {
            if f != in_features {
                return Err(invalid(format!("expects {in_features} features, got {f}")));
            }
            Ok(vec![*n, *out_features])
        }
        (LayerSpec::Softmax, [n, f]) => Ok(vec![*n, *f]),
        (_, s) => Err(invalid(format!("cannot be applied to a tensor of rank {}", s.len()))),
    }
}

/// Architecture configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ArchitectureError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

fn default_one() -> usize {
    1
}

fn default_eps() -> f64 {
    1e-3
}

fn default_input_shape() -> Vec<usize> {
    policy::INPUT_SHAPE.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_architecture() {
        let config = ClassifierConfig::mobilenet_lite();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_classes(), 5);
        assert_eq!(config.labels.len(), 5);
        assert_eq!(config.output_spec().shape, vec![1, 5]);
        assert_eq!(config.input_spec().shape, vec![1, 224, 224, 3]);
    }

    #[test]
    fn test_layer_shapes() {
        let shapes = ClassifierConfig::mobilenet_lite().layer_shapes().unwrap();
        assert_eq!(shapes[0], vec![1, 8, 112, 112]);
        assert_eq!(shapes[2], vec![1, 8, 56, 56]);
        assert_eq!(shapes[7], vec![1, 32, 28, 28]);
        assert_eq!(shapes[8], vec![1, 32]);
        assert_eq!(shapes.last().unwrap(), &vec![1, 5]);
    }

    #[test]
    fn test_channel_mismatch() {
        let mut config = ClassifierConfig::mobilenet_lite();
        config.layers[4] = LayerSpec::Conv2d {
            in_channels: 4,
            out_channels: 16,
            kernel_size: 1,
            stride: 1,
            padding: 0,
            groups: 1,
            activation: Activation::None,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("layer 4"));
    }

    #[test]
    fn test_must_end_in_classes() {
        let mut config = ClassifierConfig::mobilenet_lite();
        config.layers.truncate(8);
        assert!(config.validate().is_err());

        let mut config = ClassifierConfig::mobilenet_lite();
        config.labels.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_op_names() {
        let config = ClassifierConfig::mobilenet_lite();
        assert_eq!(config.layers[0].op_name(), "conv2d");
        assert_eq!(config.layers[2].op_name(), "depthwise_conv2d");
        assert_eq!(config.layers[1].op_name(), "batch_norm");
        assert_eq!(config.layers[1].activation(), Activation::Relu6);
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "name": "tiny",
            "input_shape": [1, 8, 8, 3],
            "layers": [
                {"type": "conv2d", "in_channels": 3, "out_channels": 4, "kernel_size": 3,
                 "padding": 1, "activation": "relu"},
                {"type": "global_avg_pool"},
                {"type": "dense", "in_features": 4, "out_features": 2},
                {"type": "softmax"}
            ]
        }"#;

        let config = ClassifierConfig::from_json_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_classes(), 2);
        assert_eq!(config.layers[0].activation(), Activation::Relu);

        let round = ClassifierConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(round, config);
    }
}
