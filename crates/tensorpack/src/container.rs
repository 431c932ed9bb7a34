// =============================================================================
// Container: zero-copy tensor container (safetensors layout)
// =============================================================================
//
// A container is a single flat byte stream:
//
//   ┌──────────────┬──────────────────────┬───────────────────────┐
//   │ 8 bytes      │ N bytes              │ raw data bytes        │
//   │ header size  │ JSON header (UTF-8)  │ (max end offset long) │
//   │ (u64 LE)     │ padded to 8          │                       │
//   └──────────────┴──────────────────────┴───────────────────────┘
//
// JSON header example:
//   {
//     "__metadata__": { "format": "pt" },
//     "a": { "dtype": "F32",  "shape": [3],    "data_offsets": [0, 12] },
//     "b": { "dtype": "BOOL", "shape": [2, 2], "data_offsets": [12, 16] }
//   }
//
// Decoding never copies the data block: a Container keeps the buffer it was
// given (a slice, a Vec, a memory map) and hands out views into it.
//
// Usage:
//   let bytes = container::encode([("a", a.view()), ("b", b.view())])?;
//   let c = container::decode(&bytes)?;
//   let a: Vec<f32> = c.get("a")?.to_vec()?;

use std::io::Write;

use tracing::{debug, warn};

use tensorpack_core::{
    CodecConfig, DescriptorTable, Error, Header, Limits, Metadata, Result, TableBuilder,
};

use crate::tensor::TensorView;

/// Size of the little-endian header length prefix.
pub const PREFIX_LEN: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Encode
// ─────────────────────────────────────────────────────────────────────────────

/// Header bytes plus the payloads to write after them, in offset order.
struct Prepared<'a> {
    header_bytes: Vec<u8>,
    payloads: Vec<&'a [u8]>,
    data_len: usize,
}

impl Prepared<'_> {
    fn total_len(&self) -> usize {
        PREFIX_LEN + self.header_bytes.len() + self.data_len
    }
}

fn prepare<'a, I, N>(tensors: I, config: &CodecConfig) -> Result<Prepared<'a>>
where
    I: IntoIterator<Item = (N, TensorView<'a>)>,
    N: AsRef<str>,
{
    let mut builder = TableBuilder::new().allow_empty(config.allow_empty);
    let mut payloads = Vec::new();
    for (name, view) in tensors {
        let TensorView { dtype, shape, data } = view;
        builder.insert(name.as_ref(), dtype, shape, data.len())?;
        payloads.push(data);
    }
    let table = builder.finalize()?;
    let data_len = table.data_len();
    config.limits.check_payload(data_len as u64)?;

    let header = Header::new(table, config.metadata.clone());
    let header_bytes = header.to_bytes()?;
    config.limits.check_header(header_bytes.len() as u64)?;

    // Both were bounded above; make sure the sum is addressable too.
    (PREFIX_LEN + header_bytes.len())
        .checked_add(data_len)
        .ok_or(Error::PayloadTooLarge {
            what: "container",
            size: u64::MAX,
            limit: usize::MAX as u64,
        })?;

    Ok(Prepared {
        header_bytes,
        payloads,
        data_len,
    })
}

fn write_prepared(writer: &mut impl Write, prepared: &Prepared<'_>) -> Result<()> {
    writer.write_all(&(prepared.header_bytes.len() as u64).to_le_bytes())?;
    writer.write_all(&prepared.header_bytes)?;
    for payload in &prepared.payloads {
        writer.write_all(payload)?;
    }
    Ok(())
}

/// Encode named tensors with the default [`CodecConfig`].
pub fn encode<'a, I, N>(tensors: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (N, TensorView<'a>)>,
    N: AsRef<str>,
{
    encode_with(tensors, &CodecConfig::default())
}

/// Encode named tensors into one contiguous buffer.
///
/// Tensors are laid out in iteration order. Fails with `DuplicateName`,
/// `InvalidShape`, `SizeMismatch`, `EmptyContainer` (when the config
/// disallows empty containers) or `PayloadTooLarge`; the size limits are
/// checked before the output buffer is allocated.
pub fn encode_with<'a, I, N>(tensors: I, config: &CodecConfig) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = (N, TensorView<'a>)>,
    N: AsRef<str>,
{
    let prepared = prepare(tensors, config)?;
    let mut out = Vec::with_capacity(prepared.total_len());
    write_prepared(&mut out, &prepared)?;
    debug!(
        tensors = prepared.payloads.len(),
        header_len = prepared.header_bytes.len(),
        data_len = prepared.data_len,
        "encoded container"
    );
    Ok(out)
}

/// Stream an encoded container to `writer`.
///
/// All validation happens before the first byte is written, so a failed
/// call leaves nothing behind except what the writer itself buffered.
pub fn write_to<'a, W, I, N>(writer: &mut W, tensors: I, config: &CodecConfig) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = (N, TensorView<'a>)>,
    N: AsRef<str>,
{
    let prepared = prepare(tensors, config)?;
    write_prepared(writer, &prepared)?;
    debug!(
        tensors = prepared.payloads.len(),
        bytes = prepared.total_len(),
        "wrote container"
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Decode
// ─────────────────────────────────────────────────────────────────────────────

fn truncated(needed: u64, available: usize) -> Error {
    Error::TruncatedInput {
        needed,
        available: available as u64,
    }
}

/// Parse only the length prefix and header of an encoded container.
///
/// Returns the header and the offset at which the data block starts. The
/// data block itself is not checked.
pub fn read_header(bytes: &[u8], limits: &Limits) -> Result<(Header, usize)> {
    let prefix: [u8; PREFIX_LEN] = match bytes.get(..PREFIX_LEN) {
        Some(p) => p.try_into().map_err(|_| truncated(PREFIX_LEN as u64, bytes.len()))?,
        None => return Err(truncated(PREFIX_LEN as u64, bytes.len())),
    };
    let header_len = u64::from_le_bytes(prefix);
    limits.check_header(header_len)?;

    let data_start = (PREFIX_LEN as u64)
        .checked_add(header_len)
        .ok_or(Error::PayloadTooLarge {
            what: "header",
            size: header_len,
            limit: u64::MAX - PREFIX_LEN as u64,
        })?;
    if (bytes.len() as u64) < data_start {
        return Err(truncated(data_start, bytes.len()));
    }
    // data_start <= bytes.len(), so it fits in usize.
    let data_start = data_start as usize;

    let header = Header::parse(&bytes[PREFIX_LEN..data_start])?;
    Ok((header, data_start))
}

/// Validate the whole layout: header, then data block length.
fn read_layout(bytes: &[u8], limits: &Limits) -> Result<(Header, usize)> {
    let (header, data_start) = read_header(bytes, limits)?;
    let data_len = header.table.data_len();
    limits.check_payload(data_len as u64)?;

    let available = bytes.len() - data_start;
    if available < data_len {
        let needed = (data_start as u64).saturating_add(data_len as u64);
        return Err(truncated(needed, bytes.len()));
    }
    if available > data_len {
        return Err(Error::MalformedHeader(format!(
            "{} trailing bytes after the last tensor",
            available - data_len
        )));
    }

    let used: usize = header.table.iter().map(|d| d.byte_len()).sum();
    if used < data_len {
        warn!(gap_bytes = data_len - used, "data block has unused gaps");
    }
    Ok((header, data_start))
}

/// Decode a container borrowing `bytes`, with default [`Limits`].
pub fn decode(bytes: &[u8]) -> Result<Container<&[u8]>> {
    Container::from_buffer(bytes)
}

/// Decode a container borrowing `bytes`.
pub fn decode_with<'a>(bytes: &'a [u8], limits: &Limits) -> Result<Container<&'a [u8]>> {
    Container::from_buffer_with(bytes, limits)
}

// ─────────────────────────────────────────────────────────────────────────────
// Container
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded container over some byte buffer `B`.
///
/// `B` is whatever holds the encoded stream: `&[u8]`, `Vec<u8>`, or a
/// memory map. Tensor payloads are never copied out of it.
#[derive(Debug, Clone)]
pub struct Container<B> {
    header: Header,
    buffer: B,
    data_start: usize,
}

impl<B: AsRef<[u8]>> Container<B> {
    /// Validate `buffer` as an encoded container and take ownership of it.
    pub fn from_buffer(buffer: B) -> Result<Self> {
        Self::from_buffer_with(buffer, &Limits::default())
    }

    pub fn from_buffer_with(buffer: B, limits: &Limits) -> Result<Self> {
        let (header, data_start) = read_layout(buffer.as_ref(), limits)?;
        debug!(
            tensors = header.table.len(),
            data_start,
            data_len = header.table.data_len(),
            "decoded container"
        );
        Ok(Container {
            header,
            buffer,
            data_start,
        })
    }

    /// Look up a tensor by name.
    pub fn get(&self, name: &str) -> Result<TensorView<'_>> {
        let desc = self
            .header
            .table
            .get(name)
            .ok_or_else(|| Error::NameNotFound(name.to_string()))?;
        let start = self.data_start + desc.data_offsets.0;
        let end = self.data_start + desc.data_offsets.1;
        Ok(TensorView {
            dtype: desc.dtype,
            shape: desc.shape.clone(),
            data: &self.buffer.as_ref()[start..end],
        })
    }

    /// All tensors in header order.
    pub fn tensors(&self) -> Vec<(&str, TensorView<'_>)> {
        let data = self.data();
        self.header
            .table
            .iter()
            .map(|d| {
                let view = TensorView {
                    dtype: d.dtype,
                    shape: d.shape.clone(),
                    data: &data[d.range()],
                };
                (d.name.as_str(), view)
            })
            .collect()
    }

    /// The data block.
    pub fn data(&self) -> &[u8] {
        &self.buffer.as_ref()[self.data_start..]
    }
}

impl<B> Container<B> {
    pub fn names(&self) -> Vec<&str> {
        self.header.table.names()
    }

    pub fn len(&self) -> usize {
        self.header.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.table.is_empty()
    }

    pub fn descriptors(&self) -> &DescriptorTable {
        &self.header.table
    }

    pub fn metadata(&self) -> &Metadata {
        &self.header.metadata
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Offset of the data block from the start of the buffer.
    pub fn data_start(&self) -> usize {
        self.data_start
    }

    pub fn into_buffer(self) -> B {
        self.buffer
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Tensor;
    use tensorpack_core::{DType, ErrorKind, HEADER_ALIGN};

    fn sample() -> Vec<(String, Tensor)> {
        vec![
            (
                "a".to_string(),
                Tensor::from_slice(&[1.0f32, 2.0, 3.0], 3).unwrap(),
            ),
            (
                "b".to_string(),
                Tensor::from_slice(&[true, false, false, true], (2, 2)).unwrap(),
            ),
        ]
    }

    fn encode_all(tensors: &[(String, Tensor)]) -> Vec<u8> {
        encode(tensors.iter().map(|(n, t)| (n, t.view()))).unwrap()
    }

    #[test]
    fn test_get_scenario() {
        let tensors = sample();
        let bytes = encode_all(&tensors);
        let c = decode(&bytes).unwrap();

        let a = c.get("a").unwrap();
        assert_eq!(a.dtype(), DType::F32);
        assert_eq!(a.dims(), &[3]);
        assert_eq!(a.data(), tensors[0].1.data());
        assert_eq!(a.data().len(), 12);

        let b = c.get("b").unwrap();
        assert_eq!(b.dtype(), DType::BOOL);
        assert_eq!(b.dims(), &[2, 2]);
        assert_eq!(b.data(), &[1, 0, 0, 1]);

        let err = c.get("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NameNotFound);
    }

    #[test]
    fn test_views_point_into_buffer() {
        let bytes = encode_all(&sample());
        let c = decode(&bytes).unwrap();
        let range = bytes.as_ptr_range();
        for (_, view) in c.tensors() {
            assert!(range.contains(&view.data().as_ptr()));
        }
    }

    #[test]
    fn test_data_block_is_aligned() {
        let bytes = encode_all(&sample());
        let c = decode(&bytes).unwrap();
        assert_eq!(c.data_start() % HEADER_ALIGN, 0);
        assert_eq!(c.data().len(), 16);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let tensors = sample();
        let config = CodecConfig::default().with_metadata("format", "pt");
        let bytes = encode_with(tensors.iter().map(|(n, t)| (n, t.view())), &config).unwrap();
        let c = decode(&bytes).unwrap();
        assert_eq!(c.metadata().get("format").map(String::as_str), Some("pt"));
        assert_eq!(c.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_container() {
        let bytes = encode(Vec::<(&str, TensorView<'_>)>::new()).unwrap();
        let c = decode(&bytes).unwrap();
        assert!(c.is_empty());
        assert!(c.data().is_empty());

        let config = CodecConfig {
            allow_empty: false,
            ..CodecConfig::default()
        };
        let err = encode_with(Vec::<(&str, TensorView<'_>)>::new(), &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyContainer);
    }

    #[test]
    fn test_duplicate_and_size_errors() {
        let t = Tensor::from_slice(&[1u8, 2], 2).unwrap();
        let err = encode([("x", t.view()), ("x", t.view())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateName);

        let bad = TensorView::new(DType::F32, 3, &[0u8; 10]);
        let err = encode([("x", bad)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn test_payload_limit_checked_on_encode() {
        let t = Tensor::zeros(DType::F64, 16).unwrap();
        let config = CodecConfig {
            limits: Limits {
                max_payload_len: 64,
                ..Limits::default()
            },
            ..CodecConfig::default()
        };
        let err = encode_with([("big", t.view())], &config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn test_huge_header_len_rejected_before_reading() {
        let mut bytes = u64::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);

        let err = decode_with(&bytes, &Limits::unbounded()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn test_truncation() {
        let bytes = encode_all(&sample());
        for len in 0..bytes.len() {
            let err = decode(&bytes[..len]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TruncatedInput, "prefix of {len} bytes");
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode_all(&sample());
        bytes.push(0);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);
    }

    fn raw_container(header: &str, data: &[u8]) -> Vec<u8> {
        let mut out = (header.len() as u64).to_le_bytes().to_vec();
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_gaps_are_ignored() {
        let bytes = raw_container(
            r#"{"a":{"dtype":"U8","shape":[2],"data_offsets":[0,2]},"b":{"dtype":"U8","shape":[2],"data_offsets":[6,8]}}"#,
            &[1, 2, 0xff, 0xff, 0xff, 0xff, 3, 4],
        );
        let c = decode(&bytes).unwrap();
        assert_eq!(c.get("a").unwrap().data(), &[1, 2]);
        assert_eq!(c.get("b").unwrap().data(), &[3, 4]);
    }

    #[test]
    fn test_declared_size_mismatch() {
        let bytes = raw_container(
            r#"{"a":{"dtype":"F32","shape":[2],"data_offsets":[0,4]}}"#,
            &[0; 4],
        );
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn test_header_strictness_on_decode() {
        let overflow = raw_container(
            r#"{"a":{"dtype":"U8","shape":[18446744073709551615,2],"data_offsets":[0,0]}}"#,
            &[],
        );
        assert_eq!(decode(&overflow).unwrap_err().kind(), ErrorKind::MalformedHeader);

        let dup_meta = raw_container(r#"{"__metadata__":{"k":"1","k":"2"}}"#, &[]);
        assert_eq!(decode(&dup_meta).unwrap_err().kind(), ErrorKind::MalformedHeader);
    }

    #[test]
    fn test_read_header_skips_data_checks() {
        let bytes = encode_all(&sample());
        let (header, data_start) = read_header(&bytes[..bytes.len() - 1], &Limits::default())
            .unwrap();
        assert_eq!(header.table.len(), 2);
        assert_eq!(data_start, bytes.len() - 16);
    }

    #[test]
    fn test_owned_buffer() {
        let bytes = encode_all(&sample());
        let c = Container::from_buffer(bytes.clone()).unwrap();
        assert_eq!(c.get("a").unwrap().to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(c.into_buffer(), bytes);
    }
}
