// File API: save and load tensor files
//
// Usage:
//   io::save("model.safetensors", [("w", w.view())], &CodecConfig::default())?;
//   let c = io::load_mmap("model.safetensors")?;     // zero-copy
//   let w: Vec<f32> = c.get("w")?.to_vec()?;
//
//   io::save_checkpoint("model.tpck", [("w", w.view())], &CodecConfig::default())?;
//   let tensors = io::load_checkpoint("model.tpck", &Limits::default())?;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use tracing::debug;

use tensorpack_core::{bail, CodecConfig, Limits, Result};

use crate::checkpoint;
use crate::codec::Format;
use crate::container::{self, Container};
use crate::tensor::{Tensor, TensorView};

/// Write named tensors to a container file.
pub fn save<'a, I, N>(path: impl AsRef<Path>, tensors: I, config: &CodecConfig) -> Result<()>
where
    I: IntoIterator<Item = (N, TensorView<'a>)>,
    N: AsRef<str>,
{
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    container::write_to(&mut writer, tensors, config)?;
    writer.flush()?;
    debug!(path = %path.display(), "saved container");
    Ok(())
}

/// Read a whole container file into memory.
pub fn load(path: impl AsRef<Path>) -> Result<Container<Vec<u8>>> {
    load_with(path, &Limits::default())
}

pub fn load_with(path: impl AsRef<Path>, limits: &Limits) -> Result<Container<Vec<u8>>> {
    let bytes = std::fs::read(path.as_ref())?;
    Container::from_buffer_with(bytes, limits)
}

/// Memory-map a container file read-only. Tensor payloads are never copied.
pub fn load_mmap(path: impl AsRef<Path>) -> Result<Container<Mmap>> {
    load_mmap_with(path, &Limits::default())
}

pub fn load_mmap_with(path: impl AsRef<Path>, limits: &Limits) -> Result<Container<Mmap>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    // SAFETY: the file is opened read-only. If another process truncates or
    // rewrites it while mapped, reads through the map are undefined; callers
    // own that contract for the files they pass in.
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    debug!(path = %path.display(), len = mmap.len(), "mapped container");
    Container::from_buffer_with(mmap, limits)
}

/// Write named tensors to a checkpoint file.
pub fn save_checkpoint<'a, I, N>(
    path: impl AsRef<Path>,
    tensors: I,
    config: &CodecConfig,
) -> Result<()>
where
    I: IntoIterator<Item = (N, TensorView<'a>)>,
    N: AsRef<str>,
{
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    checkpoint::write_checkpoint(&mut writer, tensors, config)?;
    writer.flush()?;
    Ok(())
}

/// Read a checkpoint file into owned tensors.
pub fn load_checkpoint(path: impl AsRef<Path>, limits: &Limits) -> Result<Vec<(String, Tensor)>> {
    let file = File::open(path.as_ref())?;
    checkpoint::read_checkpoint(BufReader::new(file), limits)
}

/// Work out a file's format: from its extension, else from its first bytes.
pub fn detect_format(path: impl AsRef<Path>) -> Result<Format> {
    let path = path.as_ref();
    if let Some(format) = Format::from_path(path) {
        return Ok(format);
    }
    let mut head = Vec::with_capacity(container::PREFIX_LEN + 1);
    File::open(path)?
        .take((container::PREFIX_LEN + 1) as u64)
        .read_to_end(&mut head)?;
    match Format::detect(&head) {
        Some(format) => Ok(format),
        None => bail!("cannot tell the format of {}", path.display()),
    }
}
