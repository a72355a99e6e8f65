//! Caller-owned tensor buffers for compute inputs and outputs.

use kiln_core::{DataType, Element, Error, OperandDescriptor, Result};

/// Host tensor: raw bytes plus the data type and shape they encode.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<u8>,
    shape: Vec<usize>,
    dtype: DataType,
}

impl Tensor {
    /// Create a tensor from a vector with a given shape.
    ///
    /// # Example
    /// ```
    /// # use kiln_runtime::Tensor;
    /// let tensor = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
    /// assert_eq!(tensor.len(), 4);
    /// ```
    ///
    /// # Errors
    /// `InvalidParameter` if the element count doesn't match the shape.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let expected = element_count(shape)?;
        if data.len() != expected {
            return Err(Error::InvalidParameter(format!(
                "data length {} doesn't match shape {shape:?} (expected {expected})",
                data.len()
            )));
        }
        Ok(Self {
            data: bytemuck::cast_slice(&data).to_vec(),
            shape: shape.to_vec(),
            dtype: T::DTYPE,
        })
    }

    /// Zero-filled tensor matching a descriptor, e.g. to receive an output.
    pub fn zeros(descriptor: &OperandDescriptor) -> Result<Self> {
        let len = descriptor.checked_byte_length().ok_or_else(|| {
            Error::InvalidParameter(format!("{descriptor} is too large to allocate"))
        })?;
        Ok(Self {
            data: vec![0; len],
            shape: descriptor.shape.clone(),
            dtype: descriptor.dtype,
        })
    }

    /// Copy the elements out as `T`.
    ///
    /// # Errors
    /// `InvalidParameter` if `T` is not the tensor's data type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(Error::InvalidParameter(format!(
                "tensor holds {} elements, not {}",
                self.dtype,
                T::DTYPE
            )));
        }
        // The byte vector is only byte-aligned, so read element by element.
        Ok(self
            .data
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Data type and shape as a descriptor.
    pub fn descriptor(&self) -> OperandDescriptor {
        OperandDescriptor::new(self.dtype, self.shape.clone())
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| Error::InvalidParameter(format!("shape {shape:?} overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::ErrorKind;

    #[test]
    fn test_tensor_from_vec() {
        let tensor = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();

        assert_eq!(tensor.shape(), &[2, 2]);
        assert_eq!(tensor.dtype(), DataType::F32);
        assert_eq!(tensor.len(), 4);
        assert_eq!(tensor.as_bytes().len(), 16);
        assert!(!tensor.is_empty());
    }

    #[test]
    fn test_tensor_to_vec() {
        let data = vec![1i32, -2, 3];
        let tensor = Tensor::from_vec(data.clone(), &[3]).unwrap();
        assert_eq!(tensor.to_vec::<i32>().unwrap(), data);

        let err = tensor.to_vec::<f32>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_tensor_shape_mismatch() {
        let err = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], &[2, 2]).unwrap_err();
        assert!(err.message().contains("doesn't match shape"));
    }

    #[test]
    fn test_zeros_and_write() {
        let desc = OperandDescriptor::new(DataType::F32, vec![2]);
        let mut tensor = Tensor::zeros(&desc).unwrap();
        assert_eq!(tensor.to_vec::<f32>().unwrap(), vec![0.0, 0.0]);
        assert_eq!(tensor.descriptor(), desc);

        tensor
            .as_bytes_mut()
            .copy_from_slice(bytemuck::cast_slice::<f32, u8>(&[1.5, -1.0]));
        assert_eq!(tensor.to_vec::<f32>().unwrap(), vec![1.5, -1.0]);
    }

    #[test]
    fn test_scalar_tensor() {
        let tensor = Tensor::from_vec(vec![7u8], &[]).unwrap();
        assert_eq!(tensor.len(), 1);
        assert_eq!(tensor.dtype(), DataType::U8);
    }
}
