//! Parity check between the source model and the converted artifact.
//!
//! A smoke test, not a certification: a handful of random inputs is run
//! through both models and the element-wise output differences are reduced
//! to max and mean.

use candle_core::{DType, Device, Tensor};
use litequant_core::{format_shape, policy, Error, Result};
use litequant_model::{top_classes, InferenceModel};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use crate::sampler::random_batch;

/// Output differences between two models on the same inputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviationReport {
    /// Largest absolute element-wise difference.
    pub max_abs_diff: f64,

    /// Mean absolute element-wise difference.
    pub mean_abs_diff: f64,

    /// Number of inputs compared.
    pub samples: usize,

    /// Fraction of inputs on which both models pick the same top class.
    pub top1_agreement: f64,
}

impl DeviationReport {
    /// Compare two stacked outputs of `samples` rows each.
    pub fn from_outputs(expected: &Tensor, actual: &Tensor) -> Result<Self> {
        if expected.dims() != actual.dims() {
            return Err(Error::verification(format!(
                "output shapes differ: {} vs {}",
                format_shape(expected.dims()),
                format_shape(actual.dims())
            )));
        }

        let failed = |e: candle_core::Error| Error::verification_with_source("failed to compare outputs", e);
        let samples = expected.dim(0).map_err(failed)?;
        let values = |t: &Tensor| t.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>();
        let a = values(expected).map_err(failed)?;
        let b = values(actual).map_err(failed)?;

        let mut max = 0.0f64;
        let mut sum = 0.0f64;
        for (x, y) in a.iter().zip(&b) {
            let d = (*x as f64 - *y as f64).abs();
            if !d.is_finite() {
                return Err(Error::verification("model produced a non-finite output"));
            }
            max = max.max(d);
            sum += d;
        }
        let mean = if a.is_empty() { 0.0 } else { sum / a.len() as f64 };

        let top1_agreement = if samples == 0 {
            1.0
        } else {
            let rows = |t: &Tensor| t.reshape((samples, ())).and_then(|t| top_classes(&t));
            let top_a = rows(expected).map_err(failed)?;
            let top_b = rows(actual).map_err(failed)?;
            let agree = top_a.iter().zip(&top_b).filter(|(x, y)| x.0 == y.0).count();
            agree as f64 / samples as f64
        };

        Ok(Self {
            max_abs_diff: max,
            mean_abs_diff: mean,
            samples,
            top1_agreement,
        })
    }
}

/// Runs the parity check.
#[derive(Debug, Clone)]
pub struct Verifier {
    samples: usize,
    device: Device,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(policy::VERIFICATION_SAMPLES)
    }
}

impl Verifier {
    /// Verifier drawing `samples` inputs.
    pub fn new(samples: usize) -> Self {
        Self {
            samples,
            device: Device::Cpu,
        }
    }

    /// Draw test inputs on `device`.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Number of inputs drawn per run.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Compare `candidate` against `reference` on fresh random inputs.
    ///
    /// The reference runs the whole batch at once; the candidate runs one
    /// input at a time. Any runtime failure is a verification error.
    pub fn verify<R: Rng + ?Sized>(
        &self,
        reference: &mut dyn InferenceModel,
        candidate: &mut dyn InferenceModel,
        rng: &mut R,
    ) -> Result<DeviationReport> {
        if self.samples == 0 {
            return Err(Error::verification("at least one verification sample is required"));
        }

        let sample_shape = reference.input_spec().sample_shape().to_vec();
        if candidate.input_spec().sample_shape() != sample_shape.as_slice() {
            return Err(Error::verification(format!(
                "models disagree on the input: {} vs {}",
                reference.input_spec(),
                candidate.input_spec()
            )));
        }

        info!("Verifying on {} random inputs", self.samples);
        let inputs = random_batch(rng, self.samples, &sample_shape, &self.device)
            .map_err(|e| Error::verification_with_source("failed to draw test inputs", e))?;

        let expected = reference
            .infer_batch(&inputs)
            .map_err(|e| Error::verification_with_source("reference model failed", e))?;

        let mut rows = Vec::with_capacity(self.samples);
        for i in 0..self.samples {
            let input = inputs
                .narrow(0, i, 1)
                .map_err(|e| Error::verification_with_source("failed to slice test inputs", e))?;
            let output = candidate
                .infer(&input)
                .map_err(|e| Error::verification_with_source(format!("candidate failed on input {i}"), e))?;
            rows.push(output);
        }
        let actual = Tensor::cat(&rows, 0)
            .map_err(|e| Error::verification_with_source("failed to join candidate outputs", e))?;

        let report = DeviationReport::from_outputs(&expected, &actual)?;
        debug!(
            "max diff {:.6}, mean diff {:.6}, top-1 agreement {:.2}",
            report.max_abs_diff, report.mean_abs_diff, report.top1_agreement
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::Converter;
    use crate::interpreter::Interpreter;
    use crate::sampler::{make_rng, CalibrationSampler};
    use crate::testing::tiny_model;

    #[test]
    fn test_model_against_itself_is_exact() {
        let mut a = tiny_model(1);
        let mut b = tiny_model(1);
        let report = Verifier::new(4).verify(&mut a, &mut b, &mut make_rng(Some(2))).unwrap();

        assert_eq!(report.max_abs_diff, 0.0);
        assert_eq!(report.mean_abs_diff, 0.0);
        assert_eq!(report.samples, 4);
        assert_eq!(report.top1_agreement, 1.0);
    }

    #[test]
    fn test_artifact_against_itself_is_exact() {
        let model = tiny_model(1);
        let mut rng = make_rng(Some(3));
        let samples = CalibrationSampler::new(&mut rng, 4, &[1, 16, 16, 3], &Device::Cpu);
        let artifact = Converter::default().convert(&model, samples).unwrap();

        let mut a = Interpreter::new(&artifact, &Device::Cpu).unwrap();
        let mut b = Interpreter::new(&artifact, &Device::Cpu).unwrap();
        let report = Verifier::new(3).verify(&mut a, &mut b, &mut rng).unwrap();
        assert_eq!(report.max_abs_diff, 0.0);
    }

    #[test]
    fn test_source_against_artifact() {
        let mut model = tiny_model(4);
        let mut rng = make_rng(Some(5));
        let samples = CalibrationSampler::new(&mut rng, 8, &[1, 16, 16, 3], &Device::Cpu);
        let artifact = Converter::default().convert(&model, samples).unwrap();
        let mut interpreter = Interpreter::new(&artifact, &Device::Cpu).unwrap();

        let report = Verifier::default().verify(&mut model, &mut interpreter, &mut rng).unwrap();
        assert_eq!(report.samples, policy::VERIFICATION_SAMPLES);
        assert!(report.max_abs_diff < 1.0);
        assert!(report.mean_abs_diff <= report.max_abs_diff);
    }

    #[test]
    fn test_from_outputs() {
        let a = Tensor::new(&[[0.1f32, 0.9], [0.6, 0.4]], &Device::Cpu).unwrap();
        let b = Tensor::new(&[[0.2f32, 0.8], [0.3, 0.7]], &Device::Cpu).unwrap();
        let report = DeviationReport::from_outputs(&a, &b).unwrap();

        assert!((report.max_abs_diff - 0.3).abs() < 1e-6);
        assert!((report.mean_abs_diff - 0.2).abs() < 1e-6);
        assert_eq!(report.top1_agreement, 0.5);

        let c = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            DeviationReport::from_outputs(&a, &c),
            Err(Error::Verification { .. })
        ));
    }

    #[test]
    fn test_zero_samples_rejected() {
        let mut a = tiny_model(1);
        let mut b = tiny_model(1);
        let err = Verifier::new(0).verify(&mut a, &mut b, &mut make_rng(Some(0))).unwrap_err();
        assert!(matches!(err, Error::Verification { .. }));
    }
}
