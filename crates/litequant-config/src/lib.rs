//! Litequant Configuration Management.
//!
//! This crate provides configuration loading and validation for the
//! litequant conversion pipeline. It supports YAML, TOML, and JSON
//! configuration files, as well as environment variable overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use litequant_config::{Config, ConfigLoader};
//!
//! let config = ConfigLoader::new()
//!     .with_file("litequant.yaml")
//!     .with_env_prefix("LITEQUANT")
//!     .load()?;
//!
//! println!("Model: {}", config.model.path);
//! println!("Output: {}", config.conversion.output_path);
//! ```

pub mod conversion;
pub mod error;
pub mod loader;
pub mod model;
pub mod validation;
pub mod verification;

pub use conversion::{ConversionConfig, Optimization};
pub use error::ConfigError;
pub use loader::{load_default_config, ConfigBuilder, ConfigFormat, ConfigLoader};
pub use model::ModelSourceConfig;
pub use verification::VerificationConfig;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Source model configuration.
    #[validate(nested)]
    #[serde(default)]
    pub model: ModelSourceConfig,

    /// Conversion configuration.
    #[validate(nested)]
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// Verification configuration.
    #[validate(nested)]
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Logging configuration.
    #[validate(nested)]
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Create a new configuration from file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        ConfigLoader::new().with_file(path).load()
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        ConfigLoader::new().with_env_prefix("LITEQUANT").load()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        <Self as Validate>::validate(self).map_err(ConfigError::from)?;
        validation::validate_config(self)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty, compact).
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use litequant_core::policy;

    #[test]
    fn test_defaults_follow_policy() {
        let config = Config::default();
        assert_eq!(config.model.path, policy::DEFAULT_MODEL_PATH);
        assert_eq!(config.conversion.output_path, policy::DEFAULT_OUTPUT_PATH);
        assert_eq!(config.conversion.calibration_samples, 100);
        assert_eq!(config.verification.samples, 10);
        assert_eq!(config.verification.max_diff_threshold, 0.1);
        assert_eq!(config.conversion.optimizations, vec![Optimization::Default]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "verification:\n  max_diff_threshold: 0.05\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.verification.max_diff_threshold, 0.05);
        assert_eq!(config.verification.samples, 10);
        assert_eq!(config.conversion.target_dtype, "int8");
    }

    #[test]
    fn test_zero_samples_rejected() {
        let mut config = Config::default();
        config.conversion.calibration_samples = 0;
        assert!(config.validate().is_err());
    }
}
