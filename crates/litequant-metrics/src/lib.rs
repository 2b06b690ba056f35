//! Litequant logging and timing.
//!
//! This crate wires up `tracing-subscriber` for the CLI and times the
//! stages of a conversion run.
//!
//! # Example
//!
//! ```rust,ignore
//! use litequant_metrics::{init_tracing, StageTimer, TracingConfig};
//! use litequant_core::PipelineStage;
//!
//! init_tracing(TracingConfig::default())?;
//!
//! let timer = StageTimer::start(PipelineStage::Loaded);
//! // ... load the model ...
//! let elapsed = timer.finish();
//! ```

pub mod timing;
pub mod tracing_setup;

pub use timing::{StageTimer, StageTimings};
pub use tracing_setup::{init_tracing, LogFormat, TracingConfig};

use thiserror::Error;

/// Metrics error.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Tracing error: {0}")]
    TracingError(String),

    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),
}

impl From<MetricsError> for litequant_core::Error {
    fn from(e: MetricsError) -> Self {
        litequant_core::Error::config_with_source("failed to initialize logging", e)
    }
}
