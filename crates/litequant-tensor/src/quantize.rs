//! Int8 quantization support.
//!
//! Weights are quantized symmetrically per output channel, activations
//! asymmetrically per tensor with a zero point. Quantized activations are
//! carried as f32 tensors holding integer values in `[-128, 127]` so that
//! the arithmetic can stay on the regular tensor kernels.

use candle_core::{bail, DType, Device, Result, Tensor};
use serde::{Deserialize, Serialize};

/// Smallest int8 value.
pub const QMIN: i32 = -128;

/// Largest int8 value.
pub const QMAX: i32 = 127;

/// Affine quantization parameters: `real = (q - zero_point) * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    /// Step between adjacent quantized values.
    pub scale: f32,

    /// Quantized value representing real zero.
    pub zero_point: i32,
}

impl QuantParams {
    /// Asymmetric parameters covering `[min, max]`.
    ///
    /// The range is widened to include zero so that zero padding and ReLU
    /// outputs are represented exactly.
    pub fn from_range(min: f32, max: f32) -> Self {
        let min = min.min(0.0);
        let max = max.max(0.0);
        let range = max - min;

        if !range.is_finite() || range <= f32::EPSILON {
            return Self {
                scale: 1.0,
                zero_point: 0,
            };
        }

        let scale = range / (QMAX - QMIN) as f32;
        let zero_point = (QMIN as f32 - min / scale).round() as i32;

        Self {
            scale,
            zero_point: zero_point.clamp(QMIN, QMAX),
        }
    }

    /// Symmetric parameters for values in `[-max_abs, max_abs]`.
    pub fn symmetric(max_abs: f32) -> Self {
        if !max_abs.is_finite() || max_abs <= f32::EPSILON {
            return Self {
                scale: 1.0,
                zero_point: 0,
            };
        }

        Self {
            scale: max_abs / QMAX as f32,
            zero_point: 0,
        }
    }

    /// Fixed output parameters for probabilities in `[0, 1)`.
    pub fn probabilities() -> Self {
        Self {
            scale: 1.0 / 256.0,
            zero_point: QMIN,
        }
    }

    /// Quantize one value.
    pub fn quantize(&self, x: f32) -> i8 {
        let q = (x / self.scale).round() as i32 + self.zero_point;
        q.clamp(QMIN, QMAX) as i8
    }

    /// Dequantize one value.
    pub fn dequantize(&self, q: i8) -> f32 {
        (q as i32 - self.zero_point) as f32 * self.scale
    }

    /// Real-valued interval representable with these parameters.
    pub fn representable_range(&self) -> (f32, f32) {
        (
            (QMIN - self.zero_point) as f32 * self.scale,
            (QMAX - self.zero_point) as f32 * self.scale,
        )
    }
}

/// Quantize a float tensor to int8 values stored as f32.
pub fn quantize_tensor(tensor: &Tensor, params: &QuantParams) -> Result<Tensor> {
    tensor
        .to_dtype(DType::F32)?
        .affine(1.0 / params.scale as f64, 0.0)?
        .round()?
        .affine(1.0, params.zero_point as f64)?
        .clamp(QMIN as f32, QMAX as f32)
}

/// Dequantize int8 values stored as f32.
pub fn dequantize_tensor(quantized: &Tensor, params: &QuantParams) -> Result<Tensor> {
    let scale = params.scale as f64;
    quantized.affine(scale, -(params.zero_point as f64) * scale)
}

/// Round-trip a tensor through int8.
pub fn fake_quantize(tensor: &Tensor, params: &QuantParams) -> Result<Tensor> {
    dequantize_tensor(&quantize_tensor(tensor, params)?, params)
}

/// Int8 weights with one symmetric scale per output channel (dim 0).
#[derive(Debug, Clone, PartialEq)]
pub struct PerChannelWeights {
    /// Quantized values, row-major.
    pub values: Vec<i8>,

    /// One scale per output channel.
    pub scales: Vec<f32>,

    /// Original shape.
    pub shape: Vec<usize>,
}

impl PerChannelWeights {
    /// Number of output channels.
    pub fn num_channels(&self) -> usize {
        self.scales.len()
    }

    /// Dequantize back to an f32 tensor.
    pub fn dequantize(&self, device: &Device) -> Result<Tensor> {
        let channel_size = channel_size(&self.shape)?;
        if self.values.len() != channel_size * self.scales.len() {
            bail!(
                "weight buffer holds {} values, expected {} channels of {}",
                self.values.len(),
                self.scales.len(),
                channel_size
            );
        }

        let data: Vec<f32> = self
            .values
            .chunks(channel_size)
            .zip(&self.scales)
            .flat_map(|(chunk, &scale)| chunk.iter().map(move |&q| q as f32 * scale))
            .collect();

        Tensor::from_vec(data, self.shape.as_slice(), device)
    }

    /// Size of the quantized weights in bytes (values plus scales).
    pub fn size_bytes(&self) -> usize {
        self.values.len() + self.scales.len() * std::mem::size_of::<f32>()
    }
}

fn channel_size(shape: &[usize]) -> Result<usize> {
    match shape.split_first() {
        Some((&channels, rest)) if channels > 0 => Ok(rest.iter().product()),
        _ => bail!("cannot quantize per channel with shape {:?}", shape),
    }
}

/// Quantize a weight tensor symmetrically per output channel.
pub fn quantize_per_channel(weight: &Tensor) -> Result<PerChannelWeights> {
    let shape = weight.dims().to_vec();
    let channel_size = channel_size(&shape)?;
    let data: Vec<f32> = weight.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;

    let mut values = Vec::with_capacity(data.len());
    let mut scales = Vec::with_capacity(shape[0]);

    for chunk in data.chunks(channel_size.max(1)) {
        let max_abs = chunk.iter().fold(0.0f32, |m, &x| m.max(x.abs()));
        let params = QuantParams::symmetric(max_abs);
        values.extend(chunk.iter().map(|&x| params.quantize(x)));
        scales.push(params.scale);
    }

    Ok(PerChannelWeights {
        values,
        scales,
        shape,
    })
}

/// Quantize a bias to int32 with per-channel scale `input_scale * weight_scale`.
pub fn quantize_bias(bias: &[f32], input_scale: f32, weight_scales: &[f32]) -> Result<Vec<i32>> {
    if bias.len() != weight_scales.len() {
        bail!(
            "bias has {} entries but weights have {} channels",
            bias.len(),
            weight_scales.len()
        );
    }

    Ok(bias
        .iter()
        .zip(weight_scales)
        .map(|(&b, &ws)| (b / (input_scale * ws)).round() as i32)
        .collect())
}

/// Inverse of [`quantize_bias`].
pub fn dequantize_bias(bias: &[i32], input_scale: f32, weight_scales: &[f32]) -> Result<Vec<f32>> {
    if bias.len() != weight_scales.len() {
        bail!(
            "bias has {} entries but weights have {} channels",
            bias.len(),
            weight_scales.len()
        );
    }

    Ok(bias
        .iter()
        .zip(weight_scales)
        .map(|(&b, &ws)| b as f32 * input_scale * ws)
        .collect())
}

/// Quantization statistics.
#[derive(Debug, Clone, Default)]
pub struct QuantStats {
    /// Number of layers quantized.
    pub layers_quantized: usize,

    /// Original size in bytes.
    pub original_size: usize,

    /// Quantized size in bytes.
    pub quantized_size: usize,

    /// Mean absolute weight quantization error.
    pub mean_error: f64,

    /// Max absolute weight quantization error.
    pub max_error: f64,
}

impl QuantStats {
    /// Record one quantized weight tensor.
    pub fn record(&mut self, original: &Tensor, quantized: &PerChannelWeights) -> Result<()> {
        let restored = quantized.dequantize(original.device())?;
        let diff: Vec<f32> = (original.to_dtype(DType::F32)? - restored)?
            .abs()?
            .flatten_all()?
            .to_vec1()?;

        let n = diff.len().max(1) as f64;
        let mean = diff.iter().map(|&d| d as f64).sum::<f64>() / n;
        let max = diff.iter().fold(0.0f64, |m, &d| m.max(d as f64));

        let total = self.layers_quantized as f64;
        self.mean_error = (self.mean_error * total + mean) / (total + 1.0);
        self.max_error = self.max_error.max(max);
        self.layers_quantized += 1;
        self.original_size += original.elem_count() * std::mem::size_of::<f32>();
        self.quantized_size += quantized.size_bytes();

        Ok(())
    }

    /// Get compression ratio.
    pub fn compression_ratio(&self) -> f64 {
        if self.quantized_size == 0 {
            0.0
        } else {
            self.original_size as f64 / self.quantized_size as f64
        }
    }

    /// Get memory savings percentage.
    pub fn memory_savings(&self) -> f64 {
        if self.original_size == 0 {
            0.0
        } else {
            1.0 - (self.quantized_size as f64 / self.original_size as f64)
        }
    }
}
