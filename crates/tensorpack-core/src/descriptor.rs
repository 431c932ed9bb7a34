// Descriptor table — name → (dtype, shape, byte range) mapping
//
// A container's header is an ordered table of descriptors. Each descriptor
// points at a byte range of the shared data block; descriptors never own
// bytes. Ranges are relative to the start of the data block, not the file.
//
// Producing a table (encode side):
//
//   let mut b = TableBuilder::new();
//   b.insert("a", DType::F32, [3], 12)?;
//   b.insert("b", DType::BOOL, [2, 2], 4)?;
//   let table = b.finalize()?;      // a → [0, 12), b → [12, 16)
//
// Offsets are assigned contiguously in insertion order, and the header
// lists entries in that same order, so decode sees them in the order the
// producer inserted them.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use tracing::trace;

use crate::header::{Header, METADATA_KEY};
use crate::{DType, Error, Result, Shape};

/// Metadata for one tensor in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
    /// `(start, end)` relative to the start of the data block.
    pub data_offsets: (usize, usize),
}

impl TensorDescriptor {
    pub fn byte_len(&self) -> usize {
        self.data_offsets.1 - self.data_offsets.0
    }

    pub fn range(&self) -> Range<usize> {
        self.data_offsets.0..self.data_offsets.1
    }
}

/// Collects tensor entries and lays them out into a [`DescriptorTable`].
#[derive(Debug, Clone)]
pub struct TableBuilder {
    pending: Vec<(String, DType, Shape, usize)>,
    names: HashSet<String>,
    allow_empty: bool,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        TableBuilder {
            pending: Vec::new(),
            names: HashSet::new(),
            allow_empty: true,
        }
    }

    /// Whether [`finalize`](Self::finalize) accepts a table with no entries.
    /// Defaults to `true`.
    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Add a tensor entry whose payload is `byte_length` bytes long.
    ///
    /// Fails with `DuplicateName` if the name was already inserted,
    /// `InvalidShape` if the shape's byte size overflows, and
    /// `SizeMismatch` if `byte_length` differs from what dtype and shape
    /// require.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        dtype: DType,
        shape: impl Into<Shape>,
        byte_length: usize,
    ) -> Result<()> {
        let name = name.into();
        let shape = shape.into();
        if name == METADATA_KEY {
            return Err(Error::malformed(format!(
                "tensor name '{METADATA_KEY}' is reserved"
            )));
        }
        if self.names.contains(&name) {
            return Err(Error::DuplicateName(name));
        }
        let expected = shape.byte_len(dtype)?;
        if expected != byte_length {
            return Err(Error::SizeMismatch {
                name,
                expected,
                got: byte_length,
            });
        }
        self.names.insert(name.clone());
        self.pending.push((name, dtype, shape, byte_length));
        Ok(())
    }

    /// Like [`insert`](Self::insert) but takes signed dimensions, as
    /// producers coming from other ecosystems often hand them over.
    /// A negative dimension fails with `InvalidShape`.
    pub fn insert_signed(
        &mut self,
        name: impl Into<String>,
        dtype: DType,
        dims: &[i64],
        byte_length: usize,
    ) -> Result<()> {
        let shape = Shape::from_signed(dims)?;
        self.insert(name, dtype, shape, byte_length)
    }

    /// Assign contiguous offsets in insertion order.
    pub fn finalize(self) -> Result<DescriptorTable> {
        if self.pending.is_empty() && !self.allow_empty {
            return Err(Error::EmptyContainer);
        }
        let mut offset = 0usize;
        let mut entries = Vec::with_capacity(self.pending.len());
        for (name, dtype, shape, len) in self.pending {
            let end = offset.checked_add(len).ok_or(Error::PayloadTooLarge {
                what: "data block",
                size: u64::MAX,
                limit: usize::MAX as u64,
            })?;
            trace!(%name, %dtype, %shape, start = offset, end, "laid out tensor");
            entries.push(TensorDescriptor {
                name,
                dtype,
                shape,
                data_offsets: (offset, end),
            });
            offset = end;
        }
        Ok(DescriptorTable::from_ordered(entries))
    }
}

/// Validated, immutable, ordered descriptor table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorTable {
    entries: Vec<TensorDescriptor>,
    index: HashMap<String, usize>,
}

impl DescriptorTable {
    fn from_ordered(entries: Vec<TensorDescriptor>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        DescriptorTable { entries, index }
    }

    /// Build a table from descriptors read out of a header, in header order.
    ///
    /// Checks name uniqueness, per-entry sizes and that no two non-empty
    /// ranges overlap. Gaps between ranges are allowed. A shape whose byte
    /// size overflows is reported as a malformed header.
    pub fn from_descriptors(entries: Vec<TensorDescriptor>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for d in &entries {
            if !seen.insert(d.name.as_str()) {
                return Err(Error::malformed(format!("duplicate tensor name '{}'", d.name)));
            }
        }

        for d in &entries {
            let (start, end) = d.data_offsets;
            if start > end {
                return Err(Error::malformed(format!(
                    "'{}' has data_offsets [{start}, {end}] with start after end",
                    d.name
                )));
            }
            let expected = d
                .shape
                .byte_len(d.dtype)
                .map_err(|e| Error::malformed(format!("'{}': {e}", d.name)))?;
            if expected != end - start {
                return Err(Error::SizeMismatch {
                    name: d.name.clone(),
                    expected,
                    got: end - start,
                });
            }
        }

        let mut ranges: Vec<(usize, usize, &str)> = entries
            .iter()
            .filter(|d| d.byte_len() > 0)
            .map(|d| (d.data_offsets.0, d.data_offsets.1, d.name.as_str()))
            .collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            let (_, prev_end, prev) = pair[0];
            let (start, _, name) = pair[1];
            if start < prev_end {
                return Err(Error::malformed(format!(
                    "data ranges of '{prev}' and '{name}' overlap"
                )));
            }
        }

        Ok(Self::from_ordered(entries))
    }

    /// Parse the JSON header region of a container into a table.
    /// String metadata, if any, is discarded; use [`Header::parse`] to keep it.
    pub fn parse(raw_header_bytes: &[u8]) -> Result<Self> {
        Header::parse(raw_header_bytes).map(|h| h.table)
    }

    pub fn get(&self, name: &str) -> Option<&TensorDescriptor> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TensorDescriptor> {
        self.entries.iter()
    }

    pub fn descriptors(&self) -> &[TensorDescriptor] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|d| d.name.as_str()).collect()
    }

    /// Length the data block must have: the largest end offset.
    pub fn data_len(&self) -> usize {
        self.entries
            .iter()
            .map(|d| d.data_offsets.1)
            .max()
            .unwrap_or(0)
    }
}

impl<'a> IntoIterator for &'a DescriptorTable {
    type Item = &'a TensorDescriptor;
    type IntoIter = std::slice::Iter<'a, TensorDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn desc(name: &str, dtype: DType, dims: &[usize], start: usize, end: usize) -> TensorDescriptor {
        TensorDescriptor {
            name: name.to_string(),
            dtype,
            shape: Shape::from(dims),
            data_offsets: (start, end),
        }
    }

    #[test]
    fn test_finalize_assigns_contiguous_offsets() {
        let mut b = TableBuilder::new();
        b.insert("a", DType::F32, [3], 12).unwrap();
        b.insert("b", DType::BOOL, [2, 2], 4).unwrap();
        b.insert("s", DType::F64, (), 8).unwrap();
        let t = b.finalize().unwrap();

        assert_eq!(t.names(), vec!["a", "b", "s"]);
        assert_eq!(t.get("a").unwrap().data_offsets, (0, 12));
        assert_eq!(t.get("b").unwrap().data_offsets, (12, 16));
        assert_eq!(t.get("s").unwrap().data_offsets, (16, 24));
        assert_eq!(t.data_len(), 24);
    }

    #[test]
    fn test_duplicate_name() {
        let mut b = TableBuilder::new();
        b.insert("w", DType::U8, [1], 1).unwrap();
        let err = b.insert("w", DType::U8, [1], 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateName);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_size_mismatch() {
        let mut b = TableBuilder::new();
        let err = b.insert("w", DType::F32, [3], 11).unwrap_err();
        match err {
            Error::SizeMismatch { expected, got, .. } => {
                assert_eq!(expected, 12);
                assert_eq!(got, 11);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(b.is_empty());
    }

    #[test]
    fn test_negative_dimension() {
        let mut b = TableBuilder::new();
        let err = b.insert_signed("w", DType::I8, &[2, -3], 6).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidShape);
        b.insert_signed("w", DType::I8, &[2, 3], 6).unwrap();
    }

    #[test]
    fn test_reserved_name() {
        let mut b = TableBuilder::new();
        let err = b.insert(METADATA_KEY, DType::U8, [0], 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);
    }

    #[test]
    fn test_empty_policy() {
        let t = TableBuilder::new().finalize().unwrap();
        assert!(t.is_empty());
        assert_eq!(t.data_len(), 0);

        let err = TableBuilder::new().allow_empty(false).finalize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyContainer);
    }

    #[test]
    fn test_zero_sized_tensors_share_offsets() {
        let mut b = TableBuilder::new();
        b.insert("e0", DType::F32, [0], 0).unwrap();
        b.insert("e1", DType::F32, [0, 5], 0).unwrap();
        let t = b.finalize().unwrap();
        assert_eq!(t.get("e0").unwrap().data_offsets, (0, 0));
        assert_eq!(t.get("e1").unwrap().data_offsets, (0, 0));
    }

    #[test]
    fn test_from_descriptors_allows_gaps() {
        let t = DescriptorTable::from_descriptors(vec![
            desc("b", DType::U8, &[4], 8, 12),
            desc("a", DType::U8, &[4], 0, 4),
        ])
        .unwrap();
        assert_eq!(t.names(), vec!["b", "a"]);
        assert_eq!(t.data_len(), 12);
    }

    #[test]
    fn test_from_descriptors_rejects_overlap() {
        let err = DescriptorTable::from_descriptors(vec![
            desc("a", DType::U8, &[4], 0, 4),
            desc("b", DType::U8, &[4], 2, 6),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);
    }

    #[test]
    fn test_from_descriptors_rejects_bad_range() {
        let err = DescriptorTable::from_descriptors(vec![desc("a", DType::U8, &[4], 4, 0)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);

        let err = DescriptorTable::from_descriptors(vec![desc("a", DType::F32, &[4], 0, 8)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn test_from_descriptors_overflowing_shape() {
        let overflowing = desc("a", DType::U8, &[usize::MAX, 2], 0, 0);
        let err = DescriptorTable::from_descriptors(vec![overflowing]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader);
    }
}
