//! # Litequant Tensor
//!
//! Quantization primitives for the litequant converter:
//!
//! - **Quantization**: affine int8 parameters, per-channel weight
//!   quantization, int32 bias quantization
//! - **Calibration**: running min/max observers for activation ranges

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod calibration;
pub mod quantize;

pub use calibration::*;
pub use quantize::*;

/// Re-export candle types for convenience
pub mod candle {
    pub use candle_core::{DType, Device, Error as CandleError, Shape, Tensor};
}

/// Prelude for common imports
pub mod prelude {
    pub use super::calibration::*;
    pub use super::candle::*;
    pub use super::quantize::*;
}
