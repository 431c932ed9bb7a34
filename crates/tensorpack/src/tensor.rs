// Tensor values handed to and returned from the codecs
//
// TensorView<'a> borrows its bytes: it is what `encode` consumes and what
// `Container::get` hands back (pointing into the container's buffer).
// Tensor owns its bytes: it is what a producer builds from typed values and
// what the stream-based checkpoint codec returns.

use tensorpack_core::dtype::{from_le_bytes, to_le_bytes};
use tensorpack_core::{DType, Error, Result, Shape, WithDType};

/// Borrowed (dtype, shape, raw little-endian bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorView<'a> {
    pub dtype: DType,
    pub shape: Shape,
    pub data: &'a [u8],
}

impl<'a> TensorView<'a> {
    /// Wrap raw bytes. The byte length is checked when the view is encoded.
    pub fn new(dtype: DType, shape: impl Into<Shape>, data: &'a [u8]) -> Self {
        TensorView {
            dtype,
            shape: shape.into(),
            data,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// The raw bytes, borrowed for the lifetime of the underlying buffer.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Reinterpret the bytes as values of `T`.
    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(Error::DTypeMismatch {
                stored: self.dtype,
                requested: T::DTYPE,
            });
        }
        from_le_bytes(self.data)
    }

    pub fn to_tensor(&self) -> Tensor {
        Tensor {
            dtype: self.dtype,
            shape: self.shape.clone(),
            data: self.data.to_vec(),
        }
    }
}

/// Owned (dtype, shape, raw little-endian bytes), size-checked on creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    dtype: DType,
    shape: Shape,
    data: Vec<u8>,
}

impl Tensor {
    /// Build a tensor from typed values.
    ///
    /// ```
    /// use tensorpack::Tensor;
    ///
    /// let t = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], (2, 2)).unwrap();
    /// assert_eq!(t.data().len(), 16);
    /// ```
    pub fn from_slice<T: WithDType>(values: &[T], shape: impl Into<Shape>) -> Result<Self> {
        Self::from_bytes(T::DTYPE, shape, to_le_bytes(values))
    }

    /// Wrap raw bytes, failing with `SizeMismatch` if their length does not
    /// match the dtype and shape.
    pub fn from_bytes(dtype: DType, shape: impl Into<Shape>, data: Vec<u8>) -> Result<Self> {
        let shape = shape.into();
        let expected = shape.byte_len(dtype)?;
        if expected != data.len() {
            return Err(Error::SizeMismatch {
                name: format!("{dtype}{shape}"),
                expected,
                got: data.len(),
            });
        }
        Ok(Tensor { dtype, shape, data })
    }

    /// A zero-filled tensor.
    pub fn zeros(dtype: DType, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        let len = shape.byte_len(dtype)?;
        Ok(Tensor {
            dtype,
            shape,
            data: vec![0u8; len],
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            dtype: self.dtype,
            shape: self.shape.clone(),
            data: &self.data,
        }
    }

    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        self.view().to_vec()
    }
}
