//! # tensorpack-core
//!
//! Core types for the tensorpack container format.
//!
//! This crate provides:
//! - [`DType`] / [`WithDType`] — element types and their little-endian encodings
//! - [`Shape`] — dimension sizes and byte-size arithmetic
//! - [`TableBuilder`] / [`DescriptorTable`] — the name → byte-range table
//! - [`Header`] — canonical JSON encoding of a descriptor table
//! - [`CodecConfig`] / [`Limits`] — encode options and allocation bounds
//! - [`Error`] / [`ErrorKind`] — the single error type

pub mod config;
pub mod descriptor;
pub mod dtype;
pub mod error;
pub mod header;
pub mod shape;

pub use config::{CodecConfig, Limits};
pub use descriptor::{DescriptorTable, TableBuilder, TensorDescriptor};
pub use dtype::{DType, WithDType};
pub use error::{Error, ErrorKind, Result};
pub use header::{Header, Metadata, HEADER_ALIGN, METADATA_KEY};
pub use shape::Shape;
