//! Errors raised while reading or checking a litequant configuration.

use std::fmt;

use thiserror::Error;
use validator::ValidationErrors;

use crate::loader::ConfigFormat;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// The file extension maps to no known format.
    #[error("Unsupported configuration format: {0} (expected .yaml, .yml, .toml or .json)")]
    UnsupportedFormat(String),

    /// The file exists but could not be read.
    #[error("Failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file content is not valid in its format.
    #[error("Malformed {format} configuration: {message}")]
    Parse { format: ConfigFormat, message: String },

    /// A `<PREFIX>_*` override could not be parsed.
    #[error("{var} has invalid value '{value}'")]
    EnvOverride { var: String, value: String },

    /// Field-level checks derived with `validator` failed.
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// A required path or URL is empty.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field holds a value the pipeline cannot use.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    /// Create a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Create an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn parse(format: ConfigFormat, err: impl fmt::Display) -> Self {
        Self::Parse {
            format,
            message: err.to_string(),
        }
    }
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let reasons: Vec<String> = errs
                    .iter()
                    .map(|e| match &e.message {
                        Some(m) => m.to_string(),
                        None => e.code.to_string(),
                    })
                    .collect();
                format!("{field}: {}", reasons.join(", "))
            })
            .collect();
        fields.sort();

        ConfigError::Validation(fields.join("; "))
    }
}

impl From<ConfigError> for litequant_core::Error {
    fn from(err: ConfigError) -> Self {
        litequant_core::Error::config_with_source("invalid configuration", err)
    }
}
