//! # tensorpack
//!
//! A flat, memory-mappable container format for named tensors.
//!
//! This is the top-level crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use tensorpack::{container, DType, Tensor};
//!
//! let a = Tensor::from_slice(&[1.0f32, 2.0, 3.0], 3).unwrap();
//! let b = Tensor::from_slice(&[true, false, false, true], (2, 2)).unwrap();
//!
//! let bytes = container::encode([("a", a.view()), ("b", b.view())]).unwrap();
//! let c = container::decode(&bytes).unwrap();
//!
//! let view = c.get("b").unwrap();
//! assert_eq!(view.dtype(), DType::BOOL);
//! assert_eq!(view.dims(), &[2, 2]);
//! assert_eq!(view.data(), b.data());
//! ```
//!
//! ## Modules
//!
//! - [`container`] — zero-copy container codec (safetensors layout)
//! - [`checkpoint`] — sequential binary checkpoint codec
//! - [`codec`] — [`TensorCodec`] trait and runtime [`Format`] selection
//! - [`io`] — save/load files, memory-mapped loading
//! - [`tensor`] — [`Tensor`] and [`TensorView`]

/// Re-export core types.
pub use tensorpack_core::{
    bail, CodecConfig, DType, DescriptorTable, Error, ErrorKind, Header, Limits, Metadata,
    Result, Shape, TableBuilder, TensorDescriptor, WithDType,
};

/// Zero-copy tensor container (safetensors layout).
pub mod container;

/// Sequential binary tensor stream.
pub mod checkpoint;

/// Codec trait and format selection.
pub mod codec;

/// Save and load tensor files.
pub mod io;

/// Owned and borrowed tensor values.
pub mod tensor;

pub use codec::{CheckpointCodec, Format, SafeTensorsCodec, TensorCodec};
pub use container::{decode, encode, Container};
pub use tensor::{Tensor, TensorView};
