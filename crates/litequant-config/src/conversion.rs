//! Conversion configuration.

use litequant_core::policy;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Optimization switches applied during conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimization {
    /// Size and latency optimizations: weight quantization plus
    /// calibrated activation quantization when a dataset is present.
    Default,
}

/// Conversion configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConversionConfig {
    /// Where the artifact is written.
    #[validate(length(min = 1, message = "Output path cannot be empty"))]
    pub output_path: String,

    /// Representative samples drawn for range calibration.
    #[validate(range(min = 1, message = "At least one calibration sample is required"))]
    pub calibration_samples: usize,

    /// Enabled optimizations.
    pub optimizations: Vec<Optimization>,

    /// Target numeric representation.
    pub target_dtype: String,

    /// Seed for the calibration sampler.
    pub seed: Option<u64>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            output_path: policy::DEFAULT_OUTPUT_PATH.to_string(),
            calibration_samples: policy::CALIBRATION_SAMPLES,
            optimizations: vec![Optimization::Default],
            target_dtype: "int8".to_string(),
            seed: None,
        }
    }
}
