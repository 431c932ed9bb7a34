// Checkpoint: sequential binary tensor stream
//
// The second on-disk format: every tensor is written as a self-describing
// record, one after another. Unlike a container it cannot be memory mapped
// or read out of order, so decoding copies each payload into an owned
// Tensor.
//
//   Header:
//     magic:   [u8; 4]  = b"TPCK"
//     version: u32 LE   = 1
//     count:   u32 LE   = number of tensors
//
//   For each tensor:
//     name_len: u32 LE
//     name:     [u8; name_len]  (UTF-8)
//     dtype:    u8              (see dtype_to_u8)
//     ndim:     u32 LE
//     dims:     [u64 LE; ndim]
//     data_len: u64 LE          (in bytes)
//     data:     [u8; data_len]  (raw little-endian typed data)
//
// Every length read from the stream is checked against Limits before it
// drives an allocation, and payloads are read through `take` so memory only
// grows as bytes actually arrive.

use std::io::{self, Read, Write};

use tracing::{debug, trace};

use tensorpack_core::{CodecConfig, DType, Error, ErrorKind, Limits, Result, Shape, TableBuilder};

use crate::tensor::{Tensor, TensorView};

pub const MAGIC: &[u8; 4] = b"TPCK";
pub const VERSION: u32 = 1;

/// Records are never pre-allocated beyond this many entries.
const MAX_PREALLOC: usize = 1024;

// DType <-> u8 encoding

fn dtype_to_u8(dtype: DType) -> u8 {
    match dtype {
        DType::F32 => 0,
        DType::F64 => 1,
        DType::U8 => 2,
        DType::I32 => 3,
        DType::I64 => 4,
        DType::F16 => 5,
        DType::BF16 => 6,
        DType::BOOL => 7,
        DType::I8 => 8,
        DType::I16 => 9,
    }
}

fn u8_to_dtype(v: u8) -> Result<DType> {
    match v {
        0 => Ok(DType::F32),
        1 => Ok(DType::F64),
        2 => Ok(DType::U8),
        3 => Ok(DType::I32),
        4 => Ok(DType::I64),
        5 => Ok(DType::F16),
        6 => Ok(DType::BF16),
        7 => Ok(DType::BOOL),
        8 => Ok(DType::I8),
        9 => Ok(DType::I16),
        _ => Err(Error::MalformedHeader(format!("unknown dtype tag: {v}"))),
    }
}

// Low-level IO helpers

fn write_u8(w: &mut impl Write, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Reader that counts consumed bytes, so a short read can report how far
/// into the stream it got.
struct Counted<R> {
    inner: R,
    pos: u64,
}

impl<R: Read> Counted<R> {
    fn new(inner: R) -> Self {
        Counted { inner, pos: 0 }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        let mut filled = 0;
        while filled < N {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::TruncatedInput {
                        needed: self.pos + N as u64,
                        available: self.pos + filled as u64,
                    })
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.pos += N as u64;
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut self.inner).take(len).read_to_end(&mut buf)?;
        let got = buf.len() as u64;
        if got < len {
            return Err(Error::TruncatedInput {
                needed: self.pos + len,
                available: self.pos + got,
            });
        }
        self.pos += len;
        Ok(buf)
    }

    fn at_end(&mut self) -> Result<bool> {
        let mut probe = [0u8; 1];
        loop {
            match self.inner.read(&mut probe) {
                Ok(n) => return Ok(n == 0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// Write checkpoint

fn name_len_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::PayloadTooLarge {
        what: "name",
        size: len as u64,
        limit: u32::MAX as u64,
    })
}

fn rank_u32(name: &str, rank: usize) -> Result<u32> {
    u32::try_from(rank)
        .map_err(|_| Error::InvalidShape(format!("'{name}': rank {rank} does not fit in a record")))
}

/// Write named tensors to `writer` in the checkpoint format.
///
/// All entries are validated (names, sizes, limits) before anything is
/// written.
pub fn write_checkpoint<'a, W, I, N>(writer: &mut W, tensors: I, config: &CodecConfig) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (N, TensorView<'a>)>,
    N: AsRef<str>,
{
    let mut builder = TableBuilder::new().allow_empty(config.allow_empty);
    let mut records = Vec::new();
    for (name, view) in tensors {
        let name = name.as_ref();
        config.limits.check_name(name.len() as u64)?;
        builder.insert(name, view.dtype, view.shape.clone(), view.data.len())?;
        let name_len = name_len_u32(name.len())?;
        let rank = rank_u32(name, view.shape.rank())?;
        records.push((name.to_string(), name_len, rank, view));
    }
    let table = builder.finalize()?;
    config.limits.check_payload(table.data_len() as u64)?;
    let count = u32::try_from(records.len()).map_err(|_| Error::PayloadTooLarge {
        what: "tensor count",
        size: records.len() as u64,
        limit: u32::MAX as u64,
    })?;

    writer.write_all(MAGIC)?;
    write_u32(writer, VERSION)?;
    write_u32(writer, count)?;

    for (name, name_len, rank, view) in &records {
        write_u32(writer, *name_len)?;
        writer.write_all(name.as_bytes())?;

        write_u8(writer, dtype_to_u8(view.dtype))?;

        write_u32(writer, *rank)?;
        for &d in view.dims() {
            write_u64(writer, d as u64)?;
        }

        write_u64(writer, view.data.len() as u64)?;
        writer.write_all(view.data)?;
        trace!(%name, dtype = %view.dtype, shape = %view.shape, "wrote checkpoint record");
    }

    debug!(tensors = records.len(), data_len = table.data_len(), "wrote checkpoint");
    Ok(())
}

// Read checkpoint

/// Read named tensors from `reader`. The stream must end after the last
/// record.
pub fn read_checkpoint(reader: impl Read, limits: &Limits) -> Result<Vec<(String, Tensor)>> {
    let mut r = Counted::new(reader);

    let magic: [u8; 4] = r.read_array()?;
    if &magic != MAGIC {
        return Err(Error::MalformedHeader(format!(
            "invalid checkpoint: expected magic {:?}, got {:?}",
            MAGIC, magic
        )));
    }

    let version = r.read_u32()?;
    if version != VERSION {
        return Err(Error::MalformedHeader(format!(
            "unsupported checkpoint version: {} (expected {})",
            version, VERSION
        )));
    }

    let count = r.read_u32()? as usize;
    let mut builder = TableBuilder::new();
    let mut tensors = Vec::with_capacity(count.min(MAX_PREALLOC));
    let mut total = 0u64;

    for _ in 0..count {
        let name_len = r.read_u32()? as u64;
        limits.check_name(name_len)?;
        let name = String::from_utf8(r.read_bytes(name_len)?)
            .map_err(|e| Error::MalformedHeader(format!("invalid UTF-8 tensor name: {e}")))?;

        let dtype = u8_to_dtype(r.read_u8()?)?;

        let ndim = r.read_u32()? as usize;
        let mut dims = Vec::with_capacity(ndim.min(MAX_PREALLOC));
        for _ in 0..ndim {
            let d = r.read_u64()?;
            let d = usize::try_from(d)
                .map_err(|_| Error::InvalidShape(format!("'{name}': dimension {d} too large")))?;
            dims.push(d);
        }
        let shape = Shape::new(dims);

        let data_len = r.read_u64()?;
        total = total.saturating_add(data_len);
        limits.check_payload(total)?;
        let data = r.read_bytes(data_len)?;

        builder
            .insert(name.clone(), dtype, shape.clone(), data.len())
            .map_err(|e| match e.kind() {
                ErrorKind::DuplicateName => {
                    Error::MalformedHeader(format!("duplicate tensor name '{name}'"))
                }
                _ => e,
            })?;
        trace!(%name, %dtype, %shape, "read checkpoint record");
        tensors.push((name, Tensor::from_bytes(dtype, shape, data)?));
    }

    if !r.at_end()? {
        return Err(Error::MalformedHeader(format!(
            "trailing bytes after {count} checkpoint records"
        )));
    }

    debug!(tensors = tensors.len(), data_len = total, "read checkpoint");
    Ok(tensors)
}

// In-memory checkpoint

/// Serialize named tensors to an in-memory byte vector.
pub fn to_bytes<'a, I, N>(tensors: I, config: &CodecConfig) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (N, TensorView<'a>)>,
    N: AsRef<str>,
{
    let mut buf = Vec::new();
    write_checkpoint(&mut buf, tensors, config)?;
    Ok(buf)
}

/// Deserialize named tensors from an in-memory byte slice.
pub fn from_bytes(data: &[u8], limits: &Limits) -> Result<Vec<(String, Tensor)>> {
    read_checkpoint(data, limits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(tensors: &[(String, Tensor)]) -> Vec<(String, Tensor)> {
        let bytes = to_bytes(
            tensors.iter().map(|(n, t)| (n, t.view())),
            &CodecConfig::default(),
        )
        .unwrap();
        from_bytes(&bytes, &Limits::default()).unwrap()
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_record_lengths_fit_u32() {
        let too_long = u32::MAX as usize + 1;
        assert_eq!(name_len_u32(16).unwrap(), 16);
        assert_eq!(
            name_len_u32(too_long).unwrap_err().kind(),
            ErrorKind::PayloadTooLarge
        );
        assert_eq!(rank_u32("w", 3).unwrap(), 3);
        assert_eq!(
            rank_u32("w", too_long).unwrap_err().kind(),
            ErrorKind::InvalidShape
        );
    }

    #[test]
    fn test_dtype_tags_are_distinct() {
        for d in DType::ALL {
            assert_eq!(u8_to_dtype(dtype_to_u8(d)).unwrap(), d);
        }
        assert!(u8_to_dtype(10).is_err());
    }

    #[test]
    fn test_roundtrip_multiple_tensors() {
        let tensors = vec![
            (
                "layer.weight".to_string(),
                Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3)).unwrap(),
            ),
            (
                "layer.bias".to_string(),
                Tensor::from_slice(&[half::f16::from_f32(0.5); 3], 3).unwrap(),
            ),
            ("step".to_string(), Tensor::from_slice(&[7i64], ()).unwrap()),
        ];
        let loaded = roundtrip(&tensors);
        assert_eq!(loaded, tensors);
    }

    #[test]
    fn test_invalid_magic() {
        let err = from_bytes(b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00", &Limits::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);
    }

    #[test]
    fn test_empty_checkpoint() {
        let loaded = roundtrip(&[]);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_truncated_stream() {
        let tensors = vec![("w".to_string(), Tensor::from_slice(&[1u8, 2, 3], 3).unwrap())];
        let bytes = to_bytes(
            tensors.iter().map(|(n, t)| (n, t.view())),
            &CodecConfig::default(),
        )
        .unwrap();
        for len in 0..bytes.len() {
            let err = from_bytes(&bytes[..len], &Limits::default()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TruncatedInput, "prefix of {len} bytes");
        }
    }

    #[test]
    fn test_declared_length_over_limit() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(b'w');
        bytes.push(dtype_to_u8(DType::U8));
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(u64::MAX).to_le_bytes());
        bytes.extend_from_slice(&(u64::MAX).to_le_bytes());
        let err = from_bytes(&bytes, &Limits::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn test_record_size_mismatch() {
        let t = Tensor::from_slice(&[1u8, 2, 3, 4], 4).unwrap();
        let mut bytes = to_bytes([("w", t.view())], &CodecConfig::default()).unwrap();
        // Patch the F32 tag over U8: 4 bytes no longer match shape [4].
        let tag_pos = 4 + 4 + 4 + 4 + 1;
        bytes[tag_pos] = dtype_to_u8(DType::F32);
        let err = from_bytes(&bytes, &Limits::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn test_duplicate_rejected_on_write() {
        let t = Tensor::from_slice(&[1u8], 1).unwrap();
        let err = to_bytes([("w", t.view()), ("w", t.view())], &CodecConfig::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateName);
    }
}
