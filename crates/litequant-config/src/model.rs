//! Source model configuration.

use litequant_core::policy;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Where the source model lives and where to fetch it from.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ModelSourceConfig {
    /// Path to the source checkpoint.
    #[validate(length(min = 1, message = "Model path cannot be empty"))]
    pub path: String,

    /// Archive URL used when the model is missing.
    #[validate(length(min = 1, message = "Model URL cannot be empty"))]
    pub url: String,

    /// Page shown to operators who decline the download.
    pub releases_url: String,

    /// Download without prompting when the model is missing.
    pub auto_download: bool,

    /// Use memory mapping when reading weights.
    pub use_mmap: bool,
}

impl Default for ModelSourceConfig {
    fn default() -> Self {
        Self {
            path: policy::DEFAULT_MODEL_PATH.to_string(),
            url: policy::DEFAULT_MODEL_URL.to_string(),
            releases_url: policy::MODEL_RELEASES_URL.to_string(),
            auto_download: false,
            use_mmap: true,
        }
    }
}
