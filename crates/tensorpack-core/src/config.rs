//! Codec configuration: resource limits and encode options.
//!
//! Both structs deserialize from TOML with every field optional:
//!
//! ```toml
//! allow_empty = true
//!
//! [limits]
//! max_header_len = 1048576
//! max_payload_len = 4294967296
//!
//! [metadata]
//! format = "pt"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

/// Upper bounds applied to sizes before anything is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest accepted JSON header, in bytes.
    pub max_header_len: u64,
    /// Largest accepted data block (sum of all tensor payloads), in bytes.
    pub max_payload_len: u64,
    /// Largest accepted tensor name, in bytes.
    pub max_name_len: u64,
}

impl Limits {
    pub const DEFAULT_MAX_HEADER_LEN: u64 = 100_000_000;
    pub const DEFAULT_MAX_PAYLOAD_LEN: u64 = 64 << 30;
    pub const DEFAULT_MAX_NAME_LEN: u64 = 65_536;

    /// No limits beyond what the address space allows.
    pub fn unbounded() -> Self {
        Limits {
            max_header_len: u64::MAX,
            max_payload_len: u64::MAX,
            max_name_len: u64::MAX,
        }
    }

    pub fn check_header(&self, len: u64) -> crate::Result<()> {
        check("header", len, self.max_header_len)
    }

    pub fn check_payload(&self, len: u64) -> crate::Result<()> {
        check("data block", len, self.max_payload_len)
    }

    pub fn check_name(&self, len: u64) -> crate::Result<()> {
        check("tensor name", len, self.max_name_len)
    }
}

fn check(what: &'static str, size: u64, limit: u64) -> crate::Result<()> {
    if size > limit {
        return Err(crate::Error::PayloadTooLarge { what, size, limit });
    }
    Ok(())
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_header_len: Self::DEFAULT_MAX_HEADER_LEN,
            max_payload_len: Self::DEFAULT_MAX_PAYLOAD_LEN,
            max_name_len: Self::DEFAULT_MAX_NAME_LEN,
        }
    }
}

/// Options for encoding and decoding containers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub limits: Limits,
    /// Whether a container with zero tensors may be written.
    pub allow_empty: bool,
    /// Free-form string metadata stored under `__metadata__`.
    pub metadata: BTreeMap<String, String>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            limits: Limits::default(),
            allow_empty: true,
            metadata: BTreeMap::new(),
        }
    }
}

impl CodecConfig {
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn from_toml_str(s: &str) -> crate::Result<Self> {
        toml::from_str(s).map_err(|e| crate::Error::msg(format!("invalid codec config: {e}")))
    }

    /// Load a config file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), ?config, "loaded codec config");
        Ok(config)
    }
}
