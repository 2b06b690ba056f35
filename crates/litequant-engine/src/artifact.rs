//! Quantized artifact format.
//!
//! An artifact is one SafeTensors container. Its metadata holds a JSON
//! [`ArtifactSchema`] under [`SCHEMA_METADATA_KEY`]; its tensors hold, for
//! each weighted op `i`:
//!
//! - `ops.{i}.weight`: int8 weights
//! - `ops.{i}.weight_scale`: f32 scale per output channel
//! - `ops.{i}.bias`: int32 bias at scale `input_scale * weight_scale`

use std::collections::{BTreeMap, HashMap};

use litequant_core::{policy, Error, ModelContract, Result, TensorSpec};
use litequant_model::Activation;
use litequant_tensor::{PerChannelWeights, QuantParams};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use serde::{Deserialize, Serialize};

/// Metadata key holding the schema JSON.
pub const SCHEMA_METADATA_KEY: &str = "litequant.schema";

/// Current schema version.
pub const FORMAT_VERSION: u32 = 1;

/// Conventional artifact file extension.
pub const ARTIFACT_EXTENSION: &str = "lqm";

/// One operation of the quantized graph.
///
/// Every op reads the previous op's output; `output` holds the int8
/// parameters of the tensor it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpSpec {
    /// Float32 NHWC input to int8 NCHW.
    Quantize {
        /// Output parameters.
        output: QuantParams,
    },
    /// Convolution with per-channel int8 weights.
    Conv2d {
        /// Weight shape `[out, in / groups, k, k]`.
        weight_shape: Vec<usize>,
        /// Stride.
        stride: usize,
        /// Zero padding.
        padding: usize,
        /// Channel groups.
        groups: usize,
        /// Fused activation.
        activation: Activation,
        /// Output parameters.
        output: QuantParams,
    },
    /// Spatial mean.
    GlobalAvgPool {
        /// Output parameters.
        output: QuantParams,
    },
    /// Fully connected layer with per-channel int8 weights.
    Dense {
        /// Weight shape `[out, in]`.
        weight_shape: Vec<usize>,
        /// Fused activation.
        activation: Activation,
        /// Output parameters.
        output: QuantParams,
    },
    /// Softmax over the last dimension.
    Softmax {
        /// Output parameters.
        output: QuantParams,
    },
    /// Int8 back to float32.
    Dequantize,
}

impl OpSpec {
    /// Operation name.
    pub fn name(&self) -> &'static str {
        match self {
            OpSpec::Quantize { .. } => "quantize",
            OpSpec::Conv2d { groups, weight_shape, .. } if *groups > 1 && weight_shape.get(1) == Some(&1) => {
                "depthwise_conv2d"
            }
            OpSpec::Conv2d { .. } => "conv2d",
            OpSpec::GlobalAvgPool { .. } => "global_avg_pool",
            OpSpec::Dense { .. } => "dense",
            OpSpec::Softmax { .. } => "softmax",
            OpSpec::Dequantize => "dequantize",
        }
    }

    /// Parameters of the produced tensor; `None` for the float output.
    pub fn output_params(&self) -> Option<QuantParams> {
        match self {
            OpSpec::Quantize { output }
            | OpSpec::Conv2d { output, .. }
            | OpSpec::GlobalAvgPool { output }
            | OpSpec::Dense { output, .. }
            | OpSpec::Softmax { output } => Some(*output),
            OpSpec::Dequantize => None,
        }
    }

    /// Declared weight shape for weighted ops.
    pub fn weight_shape(&self) -> Option<&[usize]> {
        match self {
            OpSpec::Conv2d { weight_shape, .. } | OpSpec::Dense { weight_shape, .. } => Some(weight_shape),
            _ => None,
        }
    }
}

/// Self-describing header of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSchema {
    /// Schema version.
    pub format_version: u32,

    /// Source model name.
    pub model_name: String,

    /// Declared float32 input.
    pub input: TensorSpec,

    /// Declared float32 output.
    pub output: TensorSpec,

    /// Class labels.
    #[serde(default)]
    pub labels: Vec<String>,

    /// Graph in execution order.
    pub ops: Vec<OpSpec>,

    /// Number of calibration samples used.
    pub calibration_samples: usize,

    /// Enabled optimizations.
    #[serde(default)]
    pub optimizations: Vec<String>,
}

impl ArtifactSchema {
    /// Declared input/output contract.
    pub fn contract(&self) -> ModelContract {
        ModelContract::new(self.input.clone(), self.output.clone())
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(Error::artifact_invalid(format!(
                "unsupported format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }

        match (self.ops.first(), self.ops.last()) {
            (Some(OpSpec::Quantize { .. }), Some(OpSpec::Dequantize)) if self.ops.len() >= 2 => {}
            _ => {
                return Err(Error::artifact_invalid(
                    "graph must start with quantize and end with dequantize",
                ))
            }
        }

        for (i, op) in self.ops.iter().enumerate() {
            let misplaced = match op {
                OpSpec::Quantize { .. } => i != 0,
                OpSpec::Dequantize => i != self.ops.len() - 1,
                _ => false,
            };
            if misplaced {
                return Err(Error::artifact_invalid(format!("op {i} ({}) is misplaced", op.name())));
            }
            let rank = match op {
                OpSpec::Conv2d { .. } => Some(4),
                OpSpec::Dense { .. } => Some(2),
                _ => None,
            };
            if let (Some(rank), Some(shape)) = (rank, op.weight_shape()) {
                if shape.len() != rank || shape.contains(&0) {
                    return Err(Error::artifact_invalid(format!(
                        "op {i} ({}) declares weight shape {:?}, expected {rank} non-zero dims",
                        op.name(),
                        shape
                    )));
                }
            }
            if let Some(params) = op.output_params() {
                if !(params.scale.is_finite() && params.scale > 0.0) {
                    return Err(Error::artifact_invalid(format!(
                        "op {i} ({}) has invalid scale {}",
                        op.name(),
                        params.scale
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Int8 weights and int32 bias of one op.
#[derive(Debug, Clone, PartialEq)]
pub struct OpWeights {
    /// Per-channel int8 weights.
    pub weight: PerChannelWeights,

    /// Int32 bias.
    pub bias: Vec<i32>,
}

fn tensor_key(op: usize, name: &str) -> String {
    format!("ops.{op}.{name}")
}

/// A serialized quantized model.
///
/// Holds the encoded bytes together with the parsed schema so callers can
/// query declared shapes without decoding the weights.
#[derive(Debug, Clone)]
pub struct QuantizedArtifact {
    bytes: Vec<u8>,
    schema: ArtifactSchema,
}

impl QuantizedArtifact {
    /// Encode a schema and its weights, keyed by op index.
    pub fn encode(schema: ArtifactSchema, weights: &BTreeMap<usize, OpWeights>) -> Result<Self> {
        schema.validate()?;

        for (i, op) in schema.ops.iter().enumerate() {
            if let Some(shape) = op.weight_shape() {
                let w = weights
                    .get(&i)
                    .ok_or_else(|| Error::conversion(format!("op {i} ({}) has no weights", op.name())))?;
                if w.weight.shape != shape {
                    return Err(Error::conversion(format!(
                        "op {i} weight shape {:?} does not match declared {:?}",
                        w.weight.shape, shape
                    )));
                }
            }
        }

        let scale_bytes: Vec<(usize, Vec<u8>)> = weights
            .iter()
            .map(|(i, w)| (*i, bytemuck::cast_slice(&w.weight.scales).to_vec()))
            .collect();
        let bias_bytes: Vec<(usize, Vec<u8>)> = weights
            .iter()
            .map(|(i, w)| (*i, bytemuck::cast_slice(&w.bias).to_vec()))
            .collect();

        let mut views: Vec<(String, TensorView<'_>)> = Vec::with_capacity(weights.len() * 3);
        let view_err =
            |e: safetensors::SafeTensorError| Error::conversion_with_source("failed to build tensor view", e);

        for (i, w) in weights {
            views.push((
                tensor_key(*i, "weight"),
                TensorView::new(Dtype::I8, w.weight.shape.clone(), bytemuck::cast_slice(&w.weight.values))
                    .map_err(view_err)?,
            ));
        }
        for (i, data) in &scale_bytes {
            let w = &weights[i];
            views.push((
                tensor_key(*i, "weight_scale"),
                TensorView::new(Dtype::F32, vec![w.weight.scales.len()], data).map_err(view_err)?,
            ));
        }
        for (i, data) in &bias_bytes {
            let w = &weights[i];
            views.push((
                tensor_key(*i, "bias"),
                TensorView::new(Dtype::I32, vec![w.bias.len()], data).map_err(view_err)?,
            ));
        }

        let json = serde_json::to_string(&schema)
            .map_err(|e| Error::conversion_with_source("failed to encode schema", e))?;
        // A single metadata key keeps the header byte-for-byte reproducible.
        let mut metadata = HashMap::new();
        metadata.insert(SCHEMA_METADATA_KEY.to_string(), json);

        let bytes = safetensors::serialize(views, &Some(metadata))
            .map_err(|e| Error::conversion_with_source("failed to serialize artifact", e))?;

        Ok(Self { bytes, schema })
    }

    /// Parse the schema out of encoded bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let schema = read_schema(&bytes)?;
        Ok(Self { bytes, schema })
    }

    /// Encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Encoded size in MiB.
    pub fn size_mib(&self) -> f64 {
        self.bytes.len() as f64 / policy::BYTES_PER_MIB
    }

    /// Parsed schema.
    pub fn schema(&self) -> &ArtifactSchema {
        &self.schema
    }

    /// Declared input.
    pub fn input_spec(&self) -> &TensorSpec {
        &self.schema.input
    }

    /// Declared output.
    pub fn output_spec(&self) -> &TensorSpec {
        &self.schema.output
    }

    /// Decode all op weights.
    pub fn weights(&self) -> Result<BTreeMap<usize, OpWeights>> {
        decode_weights(&self.bytes, &self.schema)
    }
}

/// Read and validate the schema of an encoded artifact.
pub fn read_schema(bytes: &[u8]) -> Result<ArtifactSchema> {
    let (_, metadata) = SafeTensors::read_metadata(bytes)
        .map_err(|e| Error::artifact_with_source("not a litequant artifact", e))?;

    let json = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(SCHEMA_METADATA_KEY))
        .ok_or_else(|| Error::artifact_invalid(format!("missing '{SCHEMA_METADATA_KEY}' metadata")))?;

    let schema: ArtifactSchema =
        serde_json::from_str(json).map_err(|e| Error::artifact_with_source("malformed schema", e))?;
    schema.validate()?;

    Ok(schema)
}

fn fetch<'a>(st: &SafeTensors<'a>, key: &str, dtype: Dtype) -> Result<TensorView<'a>> {
    let view = st
        .tensor(key)
        .map_err(|e| Error::artifact_with_source(format!("missing tensor '{key}'"), e))?;
    if view.dtype() != dtype {
        return Err(Error::artifact_invalid(format!(
            "tensor '{key}' has dtype {:?}, expected {:?}",
            view.dtype(),
            dtype
        )));
    }
    Ok(view)
}

fn decode_weights(bytes: &[u8], schema: &ArtifactSchema) -> Result<BTreeMap<usize, OpWeights>> {
    let st = SafeTensors::deserialize(bytes).map_err(|e| Error::artifact_with_source("corrupt tensor data", e))?;

    let mut weights = BTreeMap::new();
    for (i, op) in schema.ops.iter().enumerate() {
        let Some(shape) = op.weight_shape() else {
            continue;
        };

        let weight = fetch(&st, &tensor_key(i, "weight"), Dtype::I8)?;
        if weight.shape() != shape {
            return Err(Error::artifact_shape_mismatch(
                format!("op {i} weight shape"),
                shape.to_vec(),
                weight.shape().to_vec(),
            ));
        }
        let values: Vec<i8> = bytemuck::cast_slice(weight.data()).to_vec();

        let scales: Vec<f32> = fetch(&st, &tensor_key(i, "weight_scale"), Dtype::F32)?
            .data()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();
        let bias: Vec<i32> = fetch(&st, &tensor_key(i, "bias"), Dtype::I32)?
            .data()
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<i32>)
            .collect();

        let channels = *shape
            .first()
            .ok_or_else(|| Error::artifact_invalid(format!("op {i} declares a scalar weight")))?;
        if scales.len() != channels || bias.len() != channels {
            return Err(Error::artifact_invalid(format!(
                "op {i} has {} scales and {} biases for {} channels",
                scales.len(),
                bias.len(),
                channels
            )));
        }

        weights.insert(
            i,
            OpWeights {
                weight: PerChannelWeights {
                    values,
                    scales,
                    shape: shape.to_vec(),
                },
                bias,
            },
        );
    }

    Ok(weights)
}
