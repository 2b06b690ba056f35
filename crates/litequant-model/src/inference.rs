//! Common interface of runnable classifiers.

use candle_core::Tensor;
use litequant_core::{format_shape, Error, Result, TensorSpec};

/// A model that maps an input tensor to class probabilities.
///
/// Implemented by the float source model and by the quantized artifact
/// interpreter so both can be driven by the same verification code.
pub trait InferenceModel {
    /// Declared input tensor, batch dimension first.
    fn input_spec(&self) -> &TensorSpec;

    /// Declared output tensor, batch dimension first.
    fn output_spec(&self) -> &TensorSpec;

    /// Largest batch accepted by a single [`infer`](Self::infer) call;
    /// `None` when unbounded.
    fn max_batch_size(&self) -> Option<usize>;

    /// Run one input with the declared batch size.
    fn infer(&mut self, input: &Tensor) -> Result<Tensor>;

    /// Run a batch of any size stacked along dim 0.
    ///
    /// The default runs one sample at a time and concatenates the results.
    fn infer_batch(&mut self, inputs: &Tensor) -> Result<Tensor> {
        let batch = check_batch(self.input_spec(), None, inputs)?;

        let mut outputs = Vec::with_capacity(batch);
        for i in 0..batch {
            let sample = inputs
                .narrow(0, i, 1)
                .map_err(|e| Error::model_with_source("failed to slice batch", e))?;
            outputs.push(self.infer(&sample)?);
        }

        Tensor::cat(&outputs, 0).map_err(|e| Error::model_with_source("failed to join batch", e))
    }
}

/// Check that `inputs` is a batch of samples matching `spec`, returning the batch size.
pub fn check_batch(spec: &TensorSpec, max_batch: Option<usize>, inputs: &Tensor) -> Result<usize> {
    let dims = inputs.dims();
    let expected = spec.sample_shape();

    if dims.len() != spec.shape.len() || &dims[1..] != expected {
        let mut want = vec![dims.first().copied().unwrap_or(1)];
        want.extend_from_slice(expected);
        return Err(Error::model(format!(
            "input shape {} does not match declared {}",
            format_shape(dims),
            format_shape(&want)
        )));
    }

    let batch = dims[0];
    if let Some(max) = max_batch {
        if batch > max {
            return Err(Error::model(format!(
                "batch size {batch} exceeds the supported maximum of {max}"
            )));
        }
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use litequant_core::ElementType;

    struct Doubler {
        input: TensorSpec,
        output: TensorSpec,
        calls: usize,
    }

    impl InferenceModel for Doubler {
        fn input_spec(&self) -> &TensorSpec {
            &self.input
        }

        fn output_spec(&self) -> &TensorSpec {
            &self.output
        }

        fn max_batch_size(&self) -> Option<usize> {
            Some(1)
        }

        fn infer(&mut self, input: &Tensor) -> Result<Tensor> {
            check_batch(&self.input, self.max_batch_size(), input)?;
            self.calls += 1;
            input
                .affine(2.0, 0.0)
                .map_err(|e| Error::model_with_source("affine", e))
        }
    }

    fn doubler() -> Doubler {
        Doubler {
            input: TensorSpec::new("input", vec![1, 3], ElementType::F32),
            output: TensorSpec::new("output", vec![1, 3], ElementType::F32),
            calls: 0,
        }
    }

    #[test]
    fn test_check_batch() {
        let spec = TensorSpec::new("input", vec![1, 2, 2], ElementType::F32);
        let ok = Tensor::zeros((4, 2, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert_eq!(check_batch(&spec, None, &ok).unwrap(), 4);
        assert!(check_batch(&spec, Some(1), &ok).is_err());

        let bad = Tensor::zeros((1, 2, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        let err = check_batch(&spec, None, &bad).unwrap_err();
        assert!(err.to_string().contains("[1, 2, 3]"));
    }

    #[test]
    fn test_default_infer_batch_splits() {
        let mut model = doubler();
        let inputs = Tensor::new(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]], &Device::Cpu).unwrap();

        assert!(model.infer(&inputs).is_err());

        let out: Vec<Vec<f32>> = model.infer_batch(&inputs).unwrap().to_vec2().unwrap();
        assert_eq!(out, vec![vec![2.0, 4.0, 6.0], vec![8.0, 10.0, 12.0]]);
        assert_eq!(model.calls, 2);
    }
}
