//! # Litequant Model
//!
//! Float image classifiers for the litequant converter.
//!
//! This crate provides:
//!
//! - **Architecture**: a sequential layer list (`conv2d`, `batch_norm`,
//!   `global_avg_pool`, `dense`, `softmax`) with shape inference
//! - **Model loading**: SafeTensors checkpoints, memory-mapped, with
//!   F16/BF16 weights widened to F32
//! - **Runtime**: the float forward pass and the [`InferenceModel`] trait
//!   shared with the quantized interpreter
//! - **Weights**: seeded random initialization and checkpoint writing
//!
//! ## Example
//!
//! ```rust,ignore
//! use litequant_model::{LoaderConfig, SourceModel};
//!
//! let model = SourceModel::load("mobilenet_v2_140_224/nsfw_mobilenet2.safetensors", LoaderConfig::default())?;
//! println!("{}", model.config().name);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod classifier;
pub mod config;
pub mod inference;
pub mod loader;
pub mod weights;

pub use classifier::*;
pub use config::*;
pub use inference::*;
pub use loader::*;
pub use weights::*;

/// Prelude for common imports
pub mod prelude {
    pub use super::classifier::{SourceModel, ModelError};
    pub use super::config::*;
    pub use super::inference::InferenceModel;
    pub use super::loader::*;
    pub use super::weights::*;
}
