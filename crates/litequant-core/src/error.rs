//! Error types for the litequant conversion pipeline.
//!
//! Every failure a pipeline stage can produce maps onto one variant of
//! [`Error`]. The four domain variants (`ModelNotFound`, `Conversion`,
//! `ArtifactInvalid`, `Verification`) are always fatal; the remaining
//! variants cover configuration, acquisition and filesystem problems at the
//! edges of the pipeline.

use std::fmt;
use thiserror::Error;

use crate::stage::PipelineStage;

/// Specialized Result type for litequant operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for litequant operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The source model does not exist at the expected path.
    #[error("Model file not found: {path}")]
    ModelNotFound {
        /// Path that was probed
        path: String,
        /// Where the operator can obtain the model
        hint: Option<String>,
    },

    /// The source model exists but could not be read or parsed.
    #[error("Model error: {message}")]
    Model {
        /// Detailed error message
        message: String,
        /// Source error
        #[source]
        source: Option<BoxedSource>,
    },

    /// Quantization or graph lowering rejected the model.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Detailed error message
        message: String,
        /// Offending operation, if any
        operation: Option<String>,
        /// Source error
        #[source]
        source: Option<BoxedSource>,
    },

    /// The serialized artifact failed its load-and-run self test.
    #[error("Artifact invalid: {message}")]
    ArtifactInvalid {
        /// Detailed error message
        message: String,
        /// Expected shape if applicable
        expected_shape: Option<Vec<usize>>,
        /// Actual shape if applicable
        actual_shape: Option<Vec<usize>>,
        /// Source error
        #[source]
        source: Option<BoxedSource>,
    },

    /// One of the models failed while comparing outputs.
    #[error("Verification error: {message}")]
    Verification {
        /// Detailed error message
        message: String,
        /// Source error
        #[source]
        source: Option<BoxedSource>,
    },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config {
        /// Detailed error message
        message: String,
        /// Source error
        #[source]
        source: Option<BoxedSource>,
    },

    /// Fetching or unpacking the model archive failed.
    #[error("Acquisition error: {message}")]
    Acquisition {
        /// Detailed error message
        message: String,
        /// Archive URL
        url: Option<String>,
        /// Source error
        #[source]
        source: Option<BoxedSource>,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        /// Detailed error message
        message: String,
        /// Path involved if applicable
        path: Option<String>,
        /// Source error
        #[source]
        source: Option<std::io::Error>,
    },

    /// Internal errors (bugs, invariant violations)
    #[error("Internal error: {message}")]
    Internal {
        /// Detailed error message
        message: String,
    },
}

impl Error {
    /// Create a model-not-found error
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound {
            path: path.into(),
            hint: None,
        }
    }

    /// Create a model-not-found error with a download hint
    pub fn model_not_found_with_hint(path: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::ModelNotFound {
            path: path.into(),
            hint: Some(hint.into()),
        }
    }

    /// Create a model error
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
            source: None,
        }
    }

    /// Create a model error with source
    pub fn model_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Model {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a conversion error
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
            operation: None,
            source: None,
        }
    }

    /// Create a conversion error for an operation the converter cannot lower
    pub fn unsupported_operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
            operation: Some(operation.into()),
            source: None,
        }
    }

    /// Create a conversion error with source
    pub fn conversion_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Conversion {
            message: message.into(),
            operation: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create an artifact error
    pub fn artifact_invalid(message: impl Into<String>) -> Self {
        Self::ArtifactInvalid {
            message: message.into(),
            expected_shape: None,
            actual_shape: None,
            source: None,
        }
    }

    /// Create an artifact shape mismatch error
    pub fn artifact_shape_mismatch(
        message: impl Into<String>,
        expected: Vec<usize>,
        actual: Vec<usize>,
    ) -> Self {
        Self::ArtifactInvalid {
            message: message.into(),
            expected_shape: Some(expected),
            actual_shape: Some(actual),
            source: None,
        }
    }

    /// Create an artifact error with source
    pub fn artifact_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ArtifactInvalid {
            message: message.into(),
            expected_shape: None,
            actual_shape: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a verification error
    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification {
            message: message.into(),
            source: None,
        }
    }

    /// Create a verification error with source
    pub fn verification_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Verification {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an acquisition error
    pub fn acquisition(message: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Acquisition {
            message: message.into(),
            url: Some(url.into()),
            source: None,
        }
    }

    /// Create an acquisition error with source
    pub fn acquisition_with_source(
        message: impl Into<String>,
        url: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Acquisition {
            message: message.into(),
            url: Some(url.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Create an IO error
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            path: None,
            source: Some(source),
        }
    }

    /// Create an IO error with path
    pub fn io_with_path(
        message: impl Into<String>,
        path: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable error code for logs and JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            Error::Model { .. } => "MODEL_ERROR",
            Error::Conversion { .. } => "CONVERSION_ERROR",
            Error::ArtifactInvalid { .. } => "ARTIFACT_INVALID",
            Error::Verification { .. } => "VERIFICATION_ERROR",
            Error::Config { .. } => "CONFIG_ERROR",
            Error::Acquisition { .. } => "ACQUISITION_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Download hint attached to a missing model, if any
    pub fn hint(&self) -> Option<&str> {
        match self {
            Error::ModelNotFound { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    /// Whether the artifact may already exist on disk when this error surfaces.
    pub fn artifact_may_exist(&self) -> bool {
        matches!(self, Error::ArtifactInvalid { .. } | Error::Verification { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Config {
            message: format!("JSON parsing error: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

/// A failure tagged with the pipeline stage that was being entered.
#[derive(Debug)]
pub struct StageError {
    /// Stage whose transition failed
    pub stage: PipelineStage,
    /// Underlying error
    pub error: Error,
}

impl StageError {
    /// Tag an error with a stage.
    pub fn new(stage: PipelineStage, error: Error) -> Self {
        Self { stage, error }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage '{}' failed: {}", self.stage.action(), self.error)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Result of a single pipeline stage.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Extension trait for tagging errors with the stage they belong to
pub trait AtStage<T> {
    /// Tag the error with `stage`
    fn at_stage(self, stage: PipelineStage) -> StageResult<T>;
}

impl<T> AtStage<T> for Result<T> {
    fn at_stage(self, stage: PipelineStage) -> StageResult<T> {
        self.map_err(|e| StageError::new(stage, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::model_not_found("m.safetensors").error_code(), "MODEL_NOT_FOUND");
        assert_eq!(Error::conversion("bad graph").error_code(), "CONVERSION_ERROR");
        assert_eq!(Error::artifact_invalid("x").error_code(), "ARTIFACT_INVALID");
        assert_eq!(Error::verification("x").error_code(), "VERIFICATION_ERROR");
    }

    #[test]
    fn test_model_not_found_hint() {
        let err = Error::model_not_found_with_hint("a/b.safetensors", "https://example.com/releases");
        assert_eq!(err.hint(), Some("https://example.com/releases"));
        assert!(err.to_string().contains("a/b.safetensors"));
        assert!(Error::conversion("x").hint().is_none());
    }

    #[test]
    fn test_artifact_may_exist() {
        assert!(Error::verification("x").artifact_may_exist());
        assert!(Error::artifact_invalid("x").artifact_may_exist());
        assert!(!Error::conversion("x").artifact_may_exist());
        assert!(!Error::model_not_found("x").artifact_may_exist());
    }

    #[test]
    fn test_stage_tagging() {
        let result: Result<()> = Err(Error::conversion("unsupported op"));
        let err = result.at_stage(PipelineStage::Converted).unwrap_err();
        assert_eq!(err.stage, PipelineStage::Converted);
        assert!(err.to_string().starts_with("stage 'convert' failed"));
    }
}
