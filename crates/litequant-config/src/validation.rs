//! Configuration validation.

use std::path::Path;

use crate::error::ConfigError;
use crate::Config;

/// Validate a configuration.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_paths(config)?;
    validate_conversion_config(config)?;
    validate_verification_config(config)?;
    validate_logging_config(config)?;

    Ok(())
}

/// Validate model and artifact paths.
fn validate_paths(config: &Config) -> Result<(), ConfigError> {
    if config.model.path.is_empty() {
        return Err(ConfigError::missing_field("model.path"));
    }

    if config.conversion.output_path.is_empty() {
        return Err(ConfigError::missing_field("conversion.output_path"));
    }

    // The source checkpoint must never be overwritten by the artifact
    if Path::new(&config.model.path) == Path::new(&config.conversion.output_path) {
        return Err(ConfigError::invalid_value(
            "conversion.output_path",
            "must differ from model.path",
        ));
    }

    if !(config.model.url.starts_with("https://") || config.model.url.starts_with("http://")) {
        return Err(ConfigError::invalid_value(
            "model.url",
            "must be an http(s) URL",
        ));
    }

    Ok(())
}

/// Validate conversion configuration.
fn validate_conversion_config(config: &Config) -> Result<(), ConfigError> {
    let valid_targets = ["int8"];
    if !valid_targets.contains(&config.conversion.target_dtype.to_lowercase().as_str()) {
        return Err(ConfigError::invalid_value(
            "conversion.target_dtype",
            format!("must be one of: {}", valid_targets.join(", ")),
        ));
    }

    if config.conversion.calibration_samples == 0 {
        return Err(ConfigError::invalid_value(
            "conversion.calibration_samples",
            "must be greater than 0",
        ));
    }

    Ok(())
}

/// Validate verification configuration.
fn validate_verification_config(config: &Config) -> Result<(), ConfigError> {
    if config.verification.samples == 0 {
        return Err(ConfigError::invalid_value(
            "verification.samples",
            "must be greater than 0",
        ));
    }

    let threshold = config.verification.max_diff_threshold;
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(ConfigError::invalid_value(
            "verification.max_diff_threshold",
            "must be a positive finite number",
        ));
    }

    Ok(())
}

/// Validate logging configuration.
fn validate_logging_config(config: &Config) -> Result<(), ConfigError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.to_lowercase().as_str()) {
        return Err(ConfigError::invalid_value(
            "logging.level",
            format!("must be one of: {}", valid_levels.join(", ")),
        ));
    }

    let valid_formats = ["json", "pretty", "compact"];
    if !valid_formats.contains(&config.logging.format.to_lowercase().as_str()) {
        return Err(ConfigError::invalid_value(
            "logging.format",
            format!("must be one of: {}", valid_formats.join(", ")),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_output_must_differ_from_model() {
        let mut config = Config::default();
        config.conversion.output_path = config.model.path.clone();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "conversion.output_path"
        ));
    }

    #[test]
    fn test_invalid_target_dtype() {
        let mut config = Config::default();
        config.conversion.target_dtype = "int4".to_string();
        assert!(validate_config(&config).is_err());

        config.conversion.target_dtype = "INT8".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_threshold() {
        let mut config = Config::default();
        config.verification.max_diff_threshold = 0.0;
        assert!(validate_config(&config).is_err());

        config.verification.max_diff_threshold = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.model.url = "ftp://example.com/model.zip".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(validate_config(&config).is_err());
    }
}
