//! Synthetic input generation.
//!
//! Calibration and verification both run on i.i.d. uniform `[0, 1)` images.
//! The generator is always passed in by the caller so runs can be seeded.

use candle_core::{Device, Tensor};
use rand::prelude::*;

/// Create the run generator: seeded when `seed` is set, from OS entropy otherwise.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// One tensor of the given shape with values uniform in `[0, 1)`.
pub fn random_input<R: Rng + ?Sized>(
    rng: &mut R,
    shape: &[usize],
    device: &Device,
) -> candle_core::Result<Tensor> {
    let count: usize = shape.iter().product();
    let data: Vec<f32> = (0..count).map(|_| rng.gen::<f32>()).collect();
    Tensor::from_vec(data, shape, device)
}

/// `n` samples stacked along a new leading batch dimension.
pub fn random_batch<R: Rng + ?Sized>(
    rng: &mut R,
    n: usize,
    sample_shape: &[usize],
    device: &Device,
) -> candle_core::Result<Tensor> {
    let mut shape = Vec::with_capacity(sample_shape.len() + 1);
    shape.push(n);
    shape.extend_from_slice(sample_shape);
    random_input(rng, &shape, device)
}

/// Finite, lazy stream of calibration samples.
///
/// Yields exactly `count` tensors of `shape` and then stops. Each sample is
/// drawn when requested; iterating a second sampler over the same generator
/// gives fresh values.
pub struct CalibrationSampler<'a, R: Rng + ?Sized> {
    rng: &'a mut R,
    shape: Vec<usize>,
    remaining: usize,
    device: Device,
}

impl<'a, R: Rng + ?Sized> CalibrationSampler<'a, R> {
    /// Sampler yielding `count` tensors of `shape`.
    pub fn new(rng: &'a mut R, count: usize, shape: &[usize], device: &Device) -> Self {
        Self {
            rng,
            shape: shape.to_vec(),
            remaining: count,
            device: device.clone(),
        }
    }

    /// Shape of every sample.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

impl<R: Rng + ?Sized> Iterator for CalibrationSampler<'_, R> {
    type Item = candle_core::Result<Tensor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(random_input(&mut *self.rng, &self.shape, &self.device))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<R: Rng + ?Sized> ExactSizeIterator for CalibrationSampler<'_, R> {}
