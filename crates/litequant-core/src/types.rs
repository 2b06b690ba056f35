//! Core types used throughout litequant.
//!
//! These describe the public tensor contract of a classifier: the shape and
//! element type of its single input and single output.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Element type of a declared tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    /// 32-bit float
    F32,
    /// 8-bit signed integer
    I8,
    /// 8-bit unsigned integer
    U8,
    /// 32-bit signed integer
    I32,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::I8 | ElementType::U8 => 1,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::F32 => write!(f, "float32"),
            ElementType::I8 => write!(f, "int8"),
            ElementType::U8 => write!(f, "uint8"),
            ElementType::I32 => write!(f, "int32"),
        }
    }
}

impl std::str::FromStr for ElementType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "f32" | "float32" => Ok(ElementType::F32),
            "i8" | "int8" => Ok(ElementType::I8),
            "u8" | "uint8" => Ok(ElementType::U8),
            "i32" | "int32" => Ok(ElementType::I32),
            _ => Err(Error::config(format!(
                "Unknown element type: {s}. Valid options: float32, int8, uint8, int32"
            ))),
        }
    }
}

/// Declared shape and element type of a model input or output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    /// Tensor name
    pub name: String,
    /// Shape, batch dimension first
    pub shape: Vec<usize>,
    /// Element type
    pub dtype: ElementType,
}

impl TensorSpec {
    /// Create a new spec.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, dtype: ElementType) -> Self {
        Self {
            name: name.into(),
            shape,
            dtype,
        }
    }

    /// Number of elements.
    pub fn elem_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Batch dimension.
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Shape without the batch dimension.
    pub fn sample_shape(&self) -> &[usize] {
        self.shape.get(1..).unwrap_or(&[])
    }

    /// Same shape and dtype, ignoring the name.
    pub fn same_layout(&self, other: &TensorSpec) -> bool {
        self.shape == other.shape && self.dtype == other.dtype
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, format_shape(&self.shape), self.dtype)
    }
}

/// Input/output contract of a single-input single-output classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelContract {
    /// Input tensor
    pub input: TensorSpec,
    /// Output tensor
    pub output: TensorSpec,
}

impl ModelContract {
    /// Create a contract.
    pub fn new(input: TensorSpec, output: TensorSpec) -> Self {
        Self { input, output }
    }

    /// Check that `other` declares the same shapes and dtypes.
    pub fn ensure_matches(&self, other: &ModelContract) -> Result<()> {
        if !self.input.same_layout(&other.input) {
            return Err(Error::artifact_shape_mismatch(
                format!("input tensor mismatch: expected {}, got {}", self.input, other.input),
                self.input.shape.clone(),
                other.input.shape.clone(),
            ));
        }
        if !self.output.same_layout(&other.output) {
            return Err(Error::artifact_shape_mismatch(
                format!("output tensor mismatch: expected {}, got {}", self.output, other.output),
                self.output.shape.clone(),
                other.output.shape.clone(),
            ));
        }
        Ok(())
    }
}

/// Format a shape the way the mobile runtime prints it: `[1, 224, 224, 3]`.
pub fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> ModelContract {
        ModelContract::new(
            TensorSpec::new("input", vec![1, 224, 224, 3], ElementType::F32),
            TensorSpec::new("output", vec![1, 5], ElementType::F32),
        )
    }

    #[test]
    fn test_tensor_spec() {
        let spec = TensorSpec::new("input", vec![1, 224, 224, 3], ElementType::F32);
        assert_eq!(spec.elem_count(), 150_528);
        assert_eq!(spec.batch_size(), 1);
        assert_eq!(spec.sample_shape(), &[224, 224, 3]);
    }

    #[test]
    fn test_element_type_parsing() {
        assert_eq!("int8".parse::<ElementType>().unwrap(), ElementType::I8);
        assert_eq!("F32".parse::<ElementType>().unwrap(), ElementType::F32);
        assert!("q4".parse::<ElementType>().is_err());
    }

    #[test]
    fn test_contract_ignores_names() {
        let a = contract();
        let mut b = contract();
        b.input.name = "serving_default_input:0".to_string();
        assert!(a.ensure_matches(&b).is_ok());
    }

    #[test]
    fn test_contract_mismatch() {
        let a = contract();
        let mut b = contract();
        b.output.shape = vec![1, 1001];
        match a.ensure_matches(&b) {
            Err(Error::ArtifactInvalid { expected_shape, actual_shape, .. }) => {
                assert_eq!(expected_shape, Some(vec![1, 5]));
                assert_eq!(actual_shape, Some(vec![1, 1001]));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_format_shape() {
        assert_eq!(format_shape(&[1, 224, 224, 3]), "[1, 224, 224, 3]");
        assert_eq!(format_shape(&[]), "[]");
    }
}
