//! Element types and operand descriptors.

use bytemuck::Pod;
use std::fmt;

/// Element data type of an operand.
///
/// This is the closed set of numeric types a graph may declare. Which of them
/// a backend can execute is decided at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    I32,
    U32,
    I64,
    I8,
    U8,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F16 => 2,
            DataType::I64 => 8,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Lowercase name used in messages (e.g. `float32`).
    pub fn name(&self) -> &'static str {
        match self {
            DataType::F32 => "float32",
            DataType::F16 => "float16",
            DataType::I32 => "int32",
            DataType::U32 => "uint32",
            DataType::I64 => "int64",
            DataType::I8 => "int8",
            DataType::U8 => "uint8",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust element types that map onto a [`DataType`].
pub trait Element: Pod {
    const DTYPE: DataType;
}

impl Element for f32 {
    const DTYPE: DataType = DataType::F32;
}

impl Element for i32 {
    const DTYPE: DataType = DataType::I32;
}

impl Element for u32 {
    const DTYPE: DataType = DataType::U32;
}

impl Element for i64 {
    const DTYPE: DataType = DataType::I64;
}

impl Element for i8 {
    const DTYPE: DataType = DataType::I8;
}

impl Element for u8 {
    const DTYPE: DataType = DataType::U8;
}

/// Data type and shape of an operand.
///
/// An empty shape describes a scalar. Zero-sized dimensions are allowed and
/// describe an empty tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperandDescriptor {
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

impl OperandDescriptor {
    /// Create a descriptor from a data type and shape.
    pub fn new(dtype: DataType, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            dtype,
            shape: shape.into(),
        }
    }

    /// Create a scalar descriptor.
    pub fn scalar(dtype: DataType) -> Self {
        Self::new(dtype, Vec::new())
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements, or `None` on overflow.
    pub fn checked_element_count(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Size in bytes, or `None` on overflow.
    pub fn checked_byte_length(&self) -> Option<usize> {
        self.checked_element_count()?.checked_mul(self.dtype.size())
    }

    /// Number of elements.
    ///
    /// Descriptors created through the builder are validated, so this only
    /// saturates for hand-built descriptors.
    pub fn element_count(&self) -> usize {
        self.checked_element_count().unwrap_or(usize::MAX)
    }

    /// Size in bytes.
    pub fn byte_length(&self) -> usize {
        self.checked_byte_length().unwrap_or(usize::MAX)
    }
}

impl fmt::Display for OperandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_sizes() {
        let desc = OperandDescriptor::new(DataType::F32, vec![2, 3]);
        assert_eq!(desc.rank(), 2);
        assert_eq!(desc.element_count(), 6);
        assert_eq!(desc.byte_length(), 24);

        let scalar = OperandDescriptor::scalar(DataType::I64);
        assert_eq!(scalar.rank(), 0);
        assert_eq!(scalar.element_count(), 1);
        assert_eq!(scalar.byte_length(), 8);
    }

    #[test]
    fn test_descriptor_overflow() {
        let desc = OperandDescriptor::new(DataType::F32, vec![usize::MAX, 2]);
        assert_eq!(desc.checked_element_count(), None);
        assert_eq!(desc.checked_byte_length(), None);
    }

    #[test]
    fn test_descriptor_display() {
        let desc = OperandDescriptor::new(DataType::I32, vec![4]);
        assert_eq!(desc.to_string(), "int32[4]");
    }
}
