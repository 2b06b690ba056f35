//! # Litequant Core
//!
//! Core types shared by every litequant crate:
//!
//! - **Error handling**: the fatal error taxonomy of the conversion pipeline
//! - **Tensor contract**: declared input/output shapes and element types
//! - **Stages**: the one-way pipeline state machine
//! - **Policy**: fixed sample counts, thresholds and default paths
//!
//! ## Example
//!
//! ```rust
//! use litequant_core::{ElementType, ModelContract, TensorSpec, policy};
//!
//! let contract = ModelContract::new(
//!     TensorSpec::new("input", policy::INPUT_SHAPE.to_vec(), ElementType::F32),
//!     TensorSpec::new("output", policy::OUTPUT_SHAPE.to_vec(), ElementType::F32),
//! );
//! assert!(contract.ensure_matches(&contract.clone()).is_ok());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod policy;
pub mod stage;
pub mod types;

pub use error::{AtStage, Error, Result, StageError, StageResult};
pub use stage::{PipelineStage, StageTracker};
pub use types::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{AtStage, Error, Result, StageError, StageResult};
    pub use crate::policy;
    pub use crate::stage::{PipelineStage, StageTracker};
    pub use crate::types::*;
}
