//! Format-agnostic codec interface.
//!
//! Both on-disk formats sit behind [`TensorCodec`], so code that only needs
//! "named tensors in, bytes out" (and back) can pick a format at runtime:
//!
//! ```
//! use tensorpack::{CodecConfig, Format, Tensor};
//!
//! let t = Tensor::from_slice(&[1.0f32, 2.0], 2).unwrap();
//! let codec = Format::Checkpoint.codec(CodecConfig::default());
//! let bytes = codec.encode(&[("w".to_string(), t.view())]).unwrap();
//! assert_eq!(Format::detect(&bytes), Some(Format::Checkpoint));
//! let back = codec.decode(&bytes).unwrap();
//! assert_eq!(back[0].1, t);
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tensorpack_core::{CodecConfig, Error, Result};

use crate::tensor::{Tensor, TensorView};
use crate::{checkpoint, container};

/// Encode and decode named tensors in one specific format.
pub trait TensorCodec: Send + Sync {
    fn format(&self) -> Format;

    fn encode(&self, tensors: &[(String, TensorView<'_>)]) -> Result<Vec<u8>>;

    /// Decode into owned tensors, in stored order.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<(String, Tensor)>>;
}

/// The container format (zero-copy, safetensors layout).
#[derive(Debug, Clone, Default)]
pub struct SafeTensorsCodec {
    pub config: CodecConfig,
}

impl TensorCodec for SafeTensorsCodec {
    fn format(&self) -> Format {
        Format::SafeTensors
    }

    fn encode(&self, tensors: &[(String, TensorView<'_>)]) -> Result<Vec<u8>> {
        container::encode_with(
            tensors.iter().map(|(n, v)| (n, v.clone())),
            &self.config,
        )
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<(String, Tensor)>> {
        let c = container::decode_with(bytes, &self.config.limits)?;
        Ok(c.tensors()
            .into_iter()
            .map(|(name, view)| (name.to_string(), view.to_tensor()))
            .collect())
    }
}

/// The sequential checkpoint stream format.
#[derive(Debug, Clone, Default)]
pub struct CheckpointCodec {
    pub config: CodecConfig,
}

impl TensorCodec for CheckpointCodec {
    fn format(&self) -> Format {
        Format::Checkpoint
    }

    fn encode(&self, tensors: &[(String, TensorView<'_>)]) -> Result<Vec<u8>> {
        checkpoint::to_bytes(tensors.iter().map(|(n, v)| (n, v.clone())), &self.config)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<(String, Tensor)>> {
        checkpoint::from_bytes(bytes, &self.config.limits)
    }
}

/// Which on-disk format a byte stream or file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    SafeTensors,
    Checkpoint,
}

impl Format {
    /// Guess the format from a file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Format> {
        let ext = path.as_ref().extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "safetensors" | "sft" => Some(Format::SafeTensors),
            "tpck" | "ckpt" => Some(Format::Checkpoint),
            _ => None,
        }
    }

    /// Guess the format from the first bytes of a stream.
    pub fn detect(bytes: &[u8]) -> Option<Format> {
        if bytes.starts_with(checkpoint::MAGIC) {
            Some(Format::Checkpoint)
        } else if bytes.get(container::PREFIX_LEN) == Some(&b'{') {
            Some(Format::SafeTensors)
        } else {
            None
        }
    }

    pub fn codec(self, config: CodecConfig) -> Box<dyn TensorCodec> {
        match self {
            Format::SafeTensors => Box::new(SafeTensorsCodec { config }),
            Format::Checkpoint => Box::new(CheckpointCodec { config }),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::SafeTensors => f.write_str("safetensors"),
            Format::Checkpoint => f.write_str("checkpoint"),
        }
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "safetensors" | "sft" => Ok(Format::SafeTensors),
            "checkpoint" | "tpck" | "ckpt" => Ok(Format::Checkpoint),
            _ => Err(Error::msg(format!("unknown format '{s}'"))),
        }
    }
}
