//! # Litequant Engine
//!
//! Post-training int8 conversion of image classifiers.
//!
//! ## Architecture
//!
//! The engine consists of several key components:
//!
//! - **Sampler**: seeded uniform `[0, 1)` inputs for calibration and testing
//! - **Converter**: batch norm folding, range calibration, int8 lowering,
//!   atomic persistence and the load-and-run self test
//! - **Artifact**: the self-describing SafeTensors container
//! - **Interpreter**: runs artifacts one input at a time
//! - **Verifier**: output parity between the source model and the artifact
//! - **Report**: operator-facing summary lines and the pass/warn verdict
//! - **Pipeline**: the staged end-to-end run
//!
//! ## Example
//!
//! ```rust,ignore
//! use litequant_engine::{Pipeline, PipelineSettings};
//!
//! let outcome = Pipeline::new(PipelineSettings::default()).run()?;
//! print!("{}", outcome.report);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod artifact;
pub mod converter;
pub mod interpreter;
pub mod pipeline;
pub mod report;
pub mod sampler;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use artifact::*;
pub use converter::*;
pub use interpreter::*;
pub use pipeline::*;
pub use report::*;
pub use sampler::*;
pub use verifier::*;

/// Prelude for common imports
pub mod prelude {
    pub use super::converter::{ConversionOptions, Converter};
    pub use super::interpreter::Interpreter;
    pub use super::pipeline::{Pipeline, PipelineOutcome, PipelineSettings};
    pub use super::report::{Report, Verdict};
    pub use super::sampler::*;
    pub use super::verifier::{DeviationReport, Verifier};
}
