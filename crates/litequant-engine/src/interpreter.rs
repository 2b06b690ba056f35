//! Artifact interpreter.
//!
//! Runs a quantized artifact with the same call sequence as a mobile
//! runtime: load, [`allocate_tensors`](Interpreter::allocate_tensors),
//! [`set_input`](Interpreter::set_input), [`invoke`](Interpreter::invoke),
//! [`output`](Interpreter::output). Only batch size 1 is accepted.
//!
//! Int8 arithmetic is simulated: every op dequantizes its input, applies the
//! float kernel to dequantized weights and requantizes the result, which
//! matches integer accumulation up to float rounding.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use litequant_core::{format_shape, ElementType, Error, ModelContract, Result, TensorSpec};
use litequant_model::{apply_activation, check_batch, conv_forward, dense_forward, Activation, InferenceModel};
use litequant_tensor::{dequantize_bias, dequantize_tensor, quantize_tensor, QuantParams};
use serde::Serialize;
use tracing::debug;

use crate::artifact::{ArtifactSchema, OpSpec, QuantizedArtifact};

/// Description of an input or output tensor, as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorDetails {
    /// Tensor name.
    pub name: String,

    /// Tensor index.
    pub index: usize,

    /// Shape.
    pub shape: Vec<usize>,

    /// Element type.
    pub dtype: ElementType,

    /// Quantization of the adjacent int8 tensor.
    pub quantization: Option<QuantParams>,
}

#[derive(Debug)]
enum Kernel {
    Quantize,
    Conv {
        weight: Tensor,
        bias: Tensor,
        stride: usize,
        padding: usize,
        groups: usize,
        activation: Activation,
    },
    GlobalAvgPool,
    Dense {
        weight_t: Tensor,
        bias: Tensor,
        activation: Activation,
    },
    Softmax,
    Dequantize,
}

#[derive(Debug)]
struct CompiledOp {
    name: &'static str,
    kernel: Kernel,
    input: Option<QuantParams>,
    output: Option<QuantParams>,
}

impl CompiledOp {
    fn run(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        // Quantize consumes float NHWC; every other op consumes int8 values.
        let real = match (&self.kernel, self.input) {
            (Kernel::Quantize, _) => x.permute((0, 3, 1, 2))?.contiguous()?,
            (_, Some(params)) => dequantize_tensor(x, &params)?,
            (_, None) => x.clone(),
        };

        let y = match &self.kernel {
            Kernel::Quantize | Kernel::Dequantize => real,
            Kernel::Conv {
                weight,
                bias,
                stride,
                padding,
                groups,
                activation,
            } => apply_activation(
                &conv_forward(&real, weight, bias, *stride, *padding, *groups)?,
                *activation,
            )?,
            Kernel::GlobalAvgPool => real.mean((2, 3))?,
            Kernel::Dense {
                weight_t,
                bias,
                activation,
            } => apply_activation(&dense_forward(&real, weight_t, bias)?, *activation)?,
            Kernel::Softmax => candle_nn::ops::softmax_last_dim(&real)?,
        };

        match self.output {
            Some(params) => quantize_tensor(&y, &params),
            None => Ok(y),
        }
    }
}

fn compile_error(op: usize, name: &str, e: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::artifact_with_source(format!("cannot load op {op} ({name})"), e)
}

/// Runs quantized artifacts.
#[derive(Debug)]
pub struct Interpreter {
    schema: ArtifactSchema,
    ops: Vec<CompiledOp>,
    size_bytes: usize,
    allocated: bool,
    input: Option<Tensor>,
    output: Option<Tensor>,
}

impl Interpreter {
    /// Load from an in-memory artifact.
    pub fn new(artifact: &QuantizedArtifact, device: &Device) -> Result<Self> {
        let schema = artifact.schema().clone();
        let weights = artifact.weights()?;

        let mut ops = Vec::with_capacity(schema.ops.len());
        let mut current: Option<QuantParams> = None;

        for (i, spec) in schema.ops.iter().enumerate() {
            let name = spec.name();
            let weighted = |device: &Device| -> Result<(Tensor, Tensor)> {
                let w = weights
                    .get(&i)
                    .ok_or_else(|| Error::artifact_invalid(format!("op {i} ({name}) has no weights")))?;
                let input = current
                    .ok_or_else(|| Error::artifact_invalid(format!("op {i} ({name}) has no int8 input")))?;

                let weight = w.weight.dequantize(device).map_err(|e| compile_error(i, name, e))?;
                let bias = dequantize_bias(&w.bias, input.scale, &w.weight.scales)
                    .and_then(|b| Tensor::from_vec(b, w.bias.len(), device))
                    .map_err(|e| compile_error(i, name, e))?;
                Ok((weight, bias))
            };

            let kernel = match spec {
                OpSpec::Quantize { .. } => Kernel::Quantize,
                OpSpec::Conv2d {
                    stride,
                    padding,
                    groups,
                    activation,
                    ..
                } => {
                    let (weight, bias) = weighted(device)?;
                    Kernel::Conv {
                        weight,
                        bias,
                        stride: *stride,
                        padding: *padding,
                        groups: *groups,
                        activation: *activation,
                    }
                }
                OpSpec::GlobalAvgPool { .. } => Kernel::GlobalAvgPool,
                OpSpec::Dense { activation, .. } => {
                    let (weight, bias) = weighted(device)?;
                    let weight_t = weight
                        .t()
                        .and_then(|t| t.contiguous())
                        .map_err(|e| compile_error(i, name, e))?;
                    Kernel::Dense {
                        weight_t,
                        bias,
                        activation: *activation,
                    }
                }
                OpSpec::Softmax { .. } => Kernel::Softmax,
                OpSpec::Dequantize => Kernel::Dequantize,
            };

            let output = spec.output_params();
            ops.push(CompiledOp {
                name,
                kernel,
                input: current,
                output,
            });
            current = output;
        }

        debug!("Loaded artifact '{}' with {} ops", schema.model_name, ops.len());

        Ok(Self {
            schema,
            ops,
            size_bytes: artifact.len(),
            allocated: false,
            input: None,
            output: None,
        })
    }

    /// Load from encoded bytes.
    pub fn from_bytes(bytes: Vec<u8>, device: &Device) -> Result<Self> {
        Self::new(&QuantizedArtifact::from_bytes(bytes)?, device)
    }

    /// Load from a file.
    pub fn from_file<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::io_with_path("failed to read artifact", path.display().to_string(), e))?;
        Self::from_bytes(bytes, device)
    }

    /// Check the op chain against the declared shapes and prepare for inference.
    pub fn allocate_tensors(&mut self) -> Result<()> {
        let input = &self.schema.input;
        if input.dtype != ElementType::F32 || self.schema.output.dtype != ElementType::F32 {
            return Err(Error::artifact_invalid("artifact interface must be float32"));
        }

        let mut shape = match input.shape.as_slice() {
            [1, h, w, c] => vec![1, *c, *h, *w],
            other => {
                return Err(Error::artifact_invalid(format!(
                    "declared input {} must be [1, height, width, channels]",
                    format_shape(other)
                )))
            }
        };

        for (i, op) in self.schema.ops.iter().enumerate() {
            shape = op_output_shape(i, op, &shape)?;
        }

        if shape != self.schema.output.shape {
            return Err(Error::artifact_shape_mismatch(
                format!(
                    "graph produces {} but declares {}",
                    format_shape(&shape),
                    format_shape(&self.schema.output.shape)
                ),
                self.schema.output.shape.clone(),
                shape,
            ));
        }

        self.allocated = true;
        Ok(())
    }

    /// Input tensor details.
    pub fn input_details(&self) -> Vec<TensorDetails> {
        vec![TensorDetails {
            name: self.schema.input.name.clone(),
            index: 0,
            shape: self.schema.input.shape.clone(),
            dtype: self.schema.input.dtype,
            quantization: self.ops.first().and_then(|op| op.output),
        }]
    }

    /// Output tensor details.
    pub fn output_details(&self) -> Vec<TensorDetails> {
        vec![TensorDetails {
            name: self.schema.output.name.clone(),
            index: self.output_index(),
            shape: self.schema.output.shape.clone(),
            dtype: self.schema.output.dtype,
            quantization: self.ops.last().and_then(|op| op.input),
        }]
    }

    fn output_index(&self) -> usize {
        self.ops.len()
    }

    /// Set the input tensor.
    pub fn set_input(&mut self, index: usize, tensor: &Tensor) -> Result<()> {
        if !self.allocated {
            return Err(Error::artifact_invalid("allocate_tensors must be called before set_input"));
        }
        if index != 0 {
            return Err(Error::artifact_invalid(format!("no input tensor at index {index}")));
        }
        if tensor.dims() != self.schema.input.shape.as_slice() {
            return Err(Error::artifact_shape_mismatch(
                format!(
                    "input shape {} does not match declared {}",
                    format_shape(tensor.dims()),
                    format_shape(&self.schema.input.shape)
                ),
                self.schema.input.shape.clone(),
                tensor.dims().to_vec(),
            ));
        }
        if tensor.dtype() != DType::F32 {
            return Err(Error::artifact_invalid(format!(
                "input must be float32, got {:?}",
                tensor.dtype()
            )));
        }

        self.input = Some(tensor.clone());
        self.output = None;
        Ok(())
    }

    /// Run the graph on the current input.
    pub fn invoke(&mut self) -> Result<()> {
        let mut x = self
            .input
            .clone()
            .ok_or_else(|| Error::artifact_invalid("invoke called without an input"))?;

        for (i, op) in self.ops.iter().enumerate() {
            x = op
                .run(&x)
                .map_err(|e| Error::artifact_with_source(format!("op {i} ({}) failed", op.name), e))?;
        }

        self.output = Some(x);
        Ok(())
    }

    /// Output of the last invocation.
    pub fn output(&self, index: usize) -> Result<Tensor> {
        if index != self.output_index() {
            return Err(Error::artifact_invalid(format!("no output tensor at index {index}")));
        }
        self.output
            .clone()
            .ok_or_else(|| Error::artifact_invalid("output requested before invoke"))
    }

    /// Artifact schema.
    pub fn schema(&self) -> &ArtifactSchema {
        &self.schema
    }

    /// Declared contract.
    pub fn contract(&self) -> ModelContract {
        self.schema.contract()
    }

    /// Artifact size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

fn op_output_shape(index: usize, op: &OpSpec, shape: &[usize]) -> Result<Vec<usize>> {
    let mismatch = || {
        Error::artifact_invalid(format!(
            "op {index} ({}) cannot consume a tensor of shape {}",
            op.name(),
            format_shape(shape)
        ))
    };

    match (op, shape) {
        (OpSpec::Quantize { .. } | OpSpec::Softmax { .. } | OpSpec::Dequantize, _) => Ok(shape.to_vec()),
        (
            OpSpec::Conv2d {
                weight_shape,
                stride,
                padding,
                groups,
                ..
            },
            [n, c, h, w],
        ) => match weight_shape.as_slice() {
            [o, per_group, k, k2]
                if k == k2
                    && *stride > 0
                    && *groups > 0
                    && per_group * groups == *c
                    && o % groups == 0
                    && h + 2 * padding >= *k
                    && w + 2 * padding >= *k =>
            {
                Ok(vec![
                    *n,
                    *o,
                    (h + 2 * padding - k) / stride + 1,
                    (w + 2 * padding - k) / stride + 1,
                ])
            }
            _ => Err(mismatch()),
        },
        (OpSpec::GlobalAvgPool { .. }, [n, c, _, _]) => Ok(vec![*n, *c]),
        (OpSpec::Dense { weight_shape, .. }, [n, f]) => match weight_shape.as_slice() {
            [o, i] if i == f => Ok(vec![*n, *o]),
            _ => Err(mismatch()),
        },
        _ => Err(mismatch()),
    }
}

impl InferenceModel for Interpreter {
    fn input_spec(&self) -> &TensorSpec {
        &self.schema.input
    }

    fn output_spec(&self) -> &TensorSpec {
        &self.schema.output
    }

    fn max_batch_size(&self) -> Option<usize> {
        Some(1)
    }

    fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
        check_batch(&self.schema.input, self.max_batch_size(), input)?;
        if !self.allocated {
            self.allocate_tensors()?;
        }
        self.set_input(0, input)?;
        self.invoke()?;
        self.output(self.output_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::Converter;
    use crate::sampler::{make_rng, random_input, CalibrationSampler};
    use crate::testing::tiny_model;
    use litequant_model::SourceModel;

    fn converted() -> (SourceModel, QuantizedArtifact) {
        let model = tiny_model(11);
        let mut rng = make_rng(Some(12));
        let shape = model.input_spec().shape.clone();
        let samples = CalibrationSampler::new(&mut rng, 8, &shape, &Device::Cpu);
        let artifact = Converter::default().convert(&model, samples).unwrap();
        (model, artifact)
    }

    #[test]
    fn test_runtime_call_sequence() {
        let (_, artifact) = converted();
        let mut interpreter = Interpreter::new(&artifact, &Device::Cpu).unwrap();

        let input = random_input(&mut make_rng(Some(0)), &[1, 16, 16, 3], &Device::Cpu).unwrap();
        assert!(interpreter.set_input(0, &input).is_err());

        interpreter.allocate_tensors().unwrap();
        let input_details = interpreter.input_details();
        let output_details = interpreter.output_details();
        assert_eq!(input_details[0].shape, vec![1, 16, 16, 3]);
        assert_eq!(output_details[0].shape, vec![1, 3]);
        assert_eq!(output_details[0].quantization, Some(QuantParams::probabilities()));

        assert!(interpreter.invoke().is_err());
        interpreter.set_input(input_details[0].index, &input).unwrap();
        interpreter.invoke().unwrap();

        let out = interpreter.output(output_details[0].index).unwrap();
        assert_eq!(out.dims(), &[1, 3]);
        let probs: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 0.05, "probabilities sum to {sum}");
    }

    #[test]
    fn test_rejects_batches() {
        let (_, artifact) = converted();
        let mut interpreter = Interpreter::new(&artifact, &Device::Cpu).unwrap();
        interpreter.allocate_tensors().unwrap();

        let batch = random_input(&mut make_rng(Some(0)), &[2, 16, 16, 3], &Device::Cpu).unwrap();
        assert!(interpreter.set_input(0, &batch).is_err());
        assert!(interpreter.infer(&batch).is_err());

        // infer_batch splits into single-sample calls
        let out = interpreter.infer_batch(&batch).unwrap();
        assert_eq!(out.dims(), &[2, 3]);
    }

    #[test]
    fn test_close_to_source() {
        let (mut model, artifact) = converted();
        let mut interpreter = Interpreter::from_bytes(artifact.into_bytes(), &Device::Cpu).unwrap();

        let input = random_input(&mut make_rng(Some(5)), &[1, 16, 16, 3], &Device::Cpu).unwrap();
        let expected: Vec<f32> = model.infer(&input).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let actual: Vec<f32> = interpreter.infer(&input).unwrap().flatten_all().unwrap().to_vec1().unwrap();

        for (e, a) in expected.iter().zip(&actual) {
            assert!((e - a).abs() < 0.1, "expected {e}, got {a}");
        }
    }

    #[test]
    fn test_declared_output_mismatch() {
        let (_, artifact) = converted();
        let mut schema = artifact.schema().clone();
        schema.output.shape = vec![1, 4];
        let weights = artifact.weights().unwrap();
        let broken = QuantizedArtifact::encode(schema, &weights).unwrap();

        let mut interpreter = Interpreter::new(&broken, &Device::Cpu).unwrap();
        let err = interpreter.allocate_tensors().unwrap_err();
        assert!(matches!(err, Error::ArtifactInvalid { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Interpreter::from_file("/nonexistent/model.lqm", &Device::Cpu).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
