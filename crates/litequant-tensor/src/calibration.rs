//! Activation range observers for post-training calibration.

use candle_core::{DType, Result, Tensor};

use crate::quantize::QuantParams;

/// Running min/max of every value seen for one tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeObserver {
    min: f32,
    max: f32,
    batches: usize,
}

impl RangeObserver {
    /// Empty observer.
    pub fn new() -> Self {
        Self {
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            batches: 0,
        }
    }

    /// Observe a tensor.
    pub fn observe(&mut self, tensor: &Tensor) -> Result<()> {
        let data: Vec<f32> = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
        self.observe_slice(&data);
        Ok(())
    }

    /// Observe raw values. Non-finite values are ignored.
    pub fn observe_slice(&mut self, data: &[f32]) {
        if data.is_empty() {
            return;
        }

        for &x in data.iter().filter(|x| x.is_finite()) {
            self.min = self.min.min(x);
            self.max = self.max.max(x);
        }
        self.batches += 1;
    }

    /// Whether anything was observed.
    pub fn is_empty(&self) -> bool {
        self.batches == 0 || self.min > self.max
    }

    /// Number of observed batches.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Observed `(min, max)`.
    pub fn range(&self) -> Option<(f32, f32)> {
        if self.is_empty() {
            None
        } else {
            Some((self.min, self.max))
        }
    }

    /// Int8 parameters for the observed range.
    pub fn params(&self) -> Option<QuantParams> {
        self.range().map(|(min, max)| QuantParams::from_range(min, max))
    }

    /// Fold another observer into this one.
    pub fn merge(&mut self, other: &RangeObserver) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.batches += other.batches;
    }
}

impl Default for RangeObserver {
    fn default() -> Self {
        Self::new()
    }
}

/// One observer per tap point of a network.
#[derive(Debug, Clone)]
pub struct CalibrationStats {
    observers: Vec<RangeObserver>,
    samples: usize,
}

impl CalibrationStats {
    /// Stats for `taps` tap points.
    pub fn new(taps: usize) -> Self {
        Self {
            observers: vec![RangeObserver::new(); taps],
            samples: 0,
        }
    }

    /// Observe one forward pass, one tensor per tap.
    pub fn observe_pass(&mut self, activations: &[Tensor]) -> Result<()> {
        if activations.len() != self.observers.len() {
            candle_core::bail!(
                "expected {} activations, got {}",
                self.observers.len(),
                activations.len()
            );
        }

        for (observer, tensor) in self.observers.iter_mut().zip(activations) {
            observer.observe(tensor)?;
        }
        self.samples += 1;

        Ok(())
    }

    /// Number of forward passes observed.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Observer for a tap.
    pub fn observer(&self, tap: usize) -> Option<&RangeObserver> {
        self.observers.get(tap)
    }

    /// Quantization parameters for a tap.
    pub fn params(&self, tap: usize) -> Option<QuantParams> {
        self.observer(tap).and_then(RangeObserver::params)
    }

    /// Number of taps.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether there are no taps.
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_observer_tracks_extremes() {
        let mut obs = RangeObserver::new();
        assert!(obs.is_empty());
        assert!(obs.params().is_none());

        obs.observe_slice(&[0.2, 0.9, 0.1]);
        obs.observe_slice(&[-0.5, 0.3]);
        assert_eq!(obs.range(), Some((-0.5, 0.9)));
        assert_eq!(obs.batches(), 2);
    }

    #[test]
    fn test_observer_ignores_non_finite() {
        let mut obs = RangeObserver::new();
        obs.observe_slice(&[f32::NAN, 1.0, f32::INFINITY]);
        assert_eq!(obs.range(), Some((1.0, 1.0)));
    }

    #[test]
    fn test_observer_merge() {
        let mut a = RangeObserver::new();
        a.observe_slice(&[0.0, 1.0]);
        let mut b = RangeObserver::new();
        b.observe_slice(&[-3.0, 0.5]);
        a.merge(&b);
        assert_eq!(a.range(), Some((-3.0, 1.0)));
        assert_eq!(a.batches(), 2);
    }

    #[test]
    fn test_calibration_stats() -> Result<()> {
        let device = Device::Cpu;
        let mut stats = CalibrationStats::new(2);

        let a = Tensor::new(&[0.0f32, 0.5, 1.0], &device)?;
        let b = Tensor::new(&[-1.0f32, 2.0], &device)?;
        stats.observe_pass(&[a, b])?;

        assert_eq!(stats.samples(), 1);
        assert_eq!(stats.observer(1).and_then(|o| o.range()), Some((-1.0, 2.0)));
        assert!(stats.params(0).is_some());
        assert!(stats.params(2).is_none());

        let only_one = Tensor::new(&[1.0f32], &device)?;
        assert!(stats.observe_pass(&[only_one]).is_err());

        Ok(())
    }
}
