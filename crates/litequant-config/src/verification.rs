//! Parity verification configuration.

use litequant_core::policy;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Parity verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VerificationConfig {
    /// Run the parity check after conversion.
    pub enabled: bool,

    /// Fresh random inputs compared between the two models.
    #[validate(range(min = 1, message = "At least one verification sample is required"))]
    pub samples: usize,

    /// Max absolute difference below which the run is acceptable.
    pub max_diff_threshold: f64,

    /// Seed for the verification inputs.
    pub seed: Option<u64>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            samples: policy::VERIFICATION_SAMPLES,
            max_diff_threshold: policy::DEFAULT_MAX_DIFF_THRESHOLD,
            seed: None,
        }
    }
}
