// Header — JSON encoding of a descriptor table
//
//   {"__metadata__":{"format":"pt"},
//    "a":{"dtype":"F32","shape":[3],"data_offsets":[0,12]},
//    "b":{"dtype":"BOOL","shape":[2,2],"data_offsets":[12,16]}}
//
// Written compact, `__metadata__` first (keys sorted), tensors in table
// order, then padded with spaces to a multiple of HEADER_ALIGN bytes. The
// encoding is a pure function of the table and metadata, so equal inputs
// give byte-identical headers.
//
// Parsing keeps the header's key order and is strict: unknown dtype tags,
// negative or fractional dims, bad offsets, unknown entry fields and
// duplicate keys are all MalformedHeader.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::descriptor::{DescriptorTable, TensorDescriptor};
use crate::{DType, Error, Result, Shape};

/// Key reserved for free-form string metadata.
pub const METADATA_KEY: &str = "__metadata__";

/// The data block starts on a multiple of this many bytes from the start of
/// the stream (8-byte length prefix + padded header).
pub const HEADER_ALIGN: usize = 8;

/// Free-form string → string metadata.
pub type Metadata = BTreeMap<String, String>;

/// A descriptor table plus its optional metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub table: DescriptorTable,
    pub metadata: Metadata,
}

impl Header {
    pub fn new(table: DescriptorTable, metadata: Metadata) -> Self {
        Header { table, metadata }
    }

    /// Canonical, padded JSON bytes for this header.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)
            .map_err(|e| Error::msg(format!("failed to serialize header: {e}")))?;
        let padded = bytes.len().div_ceil(HEADER_ALIGN) * HEADER_ALIGN;
        bytes.resize(padded, b' ');
        Ok(bytes)
    }

    /// Parse a raw header region (trailing whitespace allowed).
    pub fn parse(raw: &[u8]) -> Result<Header> {
        let RawHeader(entries) = serde_json::from_slice(raw)
            .map_err(|e| Error::malformed(format!("invalid JSON header: {e}")))?;

        let mut metadata = None;
        let mut descriptors = Vec::with_capacity(entries.len());
        for (key, val) in entries {
            if key == METADATA_KEY {
                if metadata.is_some() {
                    return Err(Error::malformed(format!("duplicate '{METADATA_KEY}' entry")));
                }
                metadata = Some(parse_metadata(val)?);
                continue;
            }
            descriptors.push(parse_entry(key, &val)?);
        }

        let table = DescriptorTable::from_descriptors(descriptors)?;
        Ok(Header {
            table,
            metadata: metadata.unwrap_or_default(),
        })
    }
}

#[derive(Serialize)]
struct EntryRef<'a> {
    dtype: &'static str,
    shape: &'a [usize],
    data_offsets: [usize; 2],
}

impl Serialize for Header {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let has_meta = !self.metadata.is_empty();
        let mut map = serializer.serialize_map(Some(self.table.len() + usize::from(has_meta)))?;
        if has_meta {
            map.serialize_entry(METADATA_KEY, &self.metadata)?;
        }
        for d in &self.table {
            let entry = EntryRef {
                dtype: d.dtype.as_str(),
                shape: d.shape.dims(),
                data_offsets: [d.data_offsets.0, d.data_offsets.1],
            };
            map.serialize_entry(&d.name, &entry)?;
        }
        map.end()
    }
}

// Top-level object read as an ordered list of (key, value) pairs, so that
// key order survives and duplicate keys can be detected instead of being
// silently collapsed by a map.
struct RawHeader(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for RawHeader {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RawHeaderVisitor;

        impl<'de> Visitor<'de> for RawHeaderVisitor {
            type Value = RawHeader;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object of tensor entries")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<RawHeader, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, StrictValue(val))) = map.next_entry::<String, StrictValue>()? {
                    entries.push((key, val));
                }
                Ok(RawHeader(entries))
            }
        }

        deserializer.deserialize_map(RawHeaderVisitor)
    }
}

// A JSON value whose objects, at any depth, reject repeated keys.
struct StrictValue(Value);

impl<'de> Deserialize<'de> for StrictValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct StrictVisitor;

        impl<'de> Visitor<'de> for StrictVisitor {
            type Value = StrictValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<StrictValue, E> {
                Ok(StrictValue(Value::Bool(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<StrictValue, E> {
                Ok(StrictValue(Value::from(v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<StrictValue, E> {
                Ok(StrictValue(Value::from(v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<StrictValue, E> {
                Ok(StrictValue(Value::from(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<StrictValue, E> {
                Ok(StrictValue(Value::String(v.to_owned())))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<StrictValue, E> {
                Ok(StrictValue(Value::String(v)))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<StrictValue, E> {
                Ok(StrictValue(Value::Null))
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<StrictValue, E> {
                Ok(StrictValue(Value::Null))
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> std::result::Result<StrictValue, D::Error> {
                StrictValue::deserialize(deserializer)
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<StrictValue, A::Error> {
                let mut items = Vec::new();
                while let Some(StrictValue(v)) = seq.next_element()? {
                    items.push(v);
                }
                Ok(StrictValue(Value::Array(items)))
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<StrictValue, A::Error> {
                let mut obj = Map::new();
                while let Some((key, StrictValue(v))) = map.next_entry::<String, StrictValue>()? {
                    if obj.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate key '{key}'")));
                    }
                    obj.insert(key, v);
                }
                Ok(StrictValue(Value::Object(obj)))
            }
        }

        deserializer.deserialize_any(StrictVisitor)
    }
}

fn parse_metadata(val: Value) -> Result<Metadata> {
    let Value::Object(obj) = val else {
        return Err(Error::malformed(format!("'{METADATA_KEY}' is not an object")));
    };
    obj.into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k, s)),
            other => Err(Error::malformed(format!(
                "metadata value for '{k}' is not a string: {other}"
            ))),
        })
        .collect()
}

fn parse_entry(name: String, val: &Value) -> Result<TensorDescriptor> {
    let obj = val
        .as_object()
        .ok_or_else(|| Error::malformed(format!("entry '{name}' is not an object")))?;

    if let Some(field) = obj
        .keys()
        .find(|k| !matches!(k.as_str(), "dtype" | "shape" | "data_offsets"))
    {
        return Err(Error::malformed(format!("'{name}' has unknown field '{field}'")));
    }

    let dtype: DType = obj
        .get("dtype")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::malformed(format!("'{name}' missing dtype")))?
        .parse()?;

    let dims = obj
        .get("shape")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::malformed(format!("'{name}' missing shape")))?
        .iter()
        .map(|v| as_index(v).map_err(|why| Error::malformed(format!("'{name}' shape: {why}"))))
        .collect::<Result<Vec<usize>>>()?;

    let offsets = obj
        .get("data_offsets")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::malformed(format!("'{name}' missing data_offsets")))?;
    if offsets.len() != 2 {
        return Err(Error::malformed(format!(
            "'{name}' data_offsets must have exactly 2 elements"
        )));
    }
    let start = as_index(&offsets[0])
        .map_err(|why| Error::malformed(format!("'{name}' data_offsets: {why}")))?;
    let end = as_index(&offsets[1])
        .map_err(|why| Error::malformed(format!("'{name}' data_offsets: {why}")))?;

    Ok(TensorDescriptor {
        name,
        dtype,
        shape: Shape::new(dims),
        data_offsets: (start, end),
    })
}

fn as_index(v: &Value) -> std::result::Result<usize, String> {
    match v.as_u64() {
        Some(n) => usize::try_from(n).map_err(|_| format!("{n} does not fit in usize")),
        None if v.as_i64().is_some() => Err(format!("negative value {v}")),
        None => Err(format!("{v} is not a non-negative integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TableBuilder;
    use crate::ErrorKind;

    fn sample_header() -> Header {
        let mut b = TableBuilder::new();
        b.insert("a", DType::F32, [3], 12).unwrap();
        b.insert("b", DType::BOOL, [2, 2], 4).unwrap();
        Header::new(b.finalize().unwrap(), Metadata::new())
    }

    #[test]
    fn test_exact_bytes() {
        let bytes = sample_header().to_bytes().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(
            text.trim_end(),
            r#"{"a":{"dtype":"F32","shape":[3],"data_offsets":[0,12]},"b":{"dtype":"BOOL","shape":[2,2],"data_offsets":[12,16]}}"#
        );
        assert_eq!(bytes.len() % HEADER_ALIGN, 0);
    }

    #[test]
    fn test_metadata_first_and_sorted() {
        let mut h = sample_header();
        h.metadata.insert("z".into(), "1".into());
        h.metadata.insert("format".into(), "pt".into());
        let bytes = h.to_bytes().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with(r#"{"__metadata__":{"format":"pt","z":"1"},"a":"#));

        let parsed = Header::parse(&bytes).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn test_parse_keeps_key_order() {
        let raw = br#"{"z":{"dtype":"U8","shape":[1],"data_offsets":[0,1]},
                       "a":{"dtype":"U8","shape":[1],"data_offsets":[1,2]}}"#;
        let t = DescriptorTable::parse(raw).unwrap();
        assert_eq!(t.names(), vec!["z", "a"]);
    }

    fn malformed(raw: &str) {
        let err = Header::parse(raw.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedHeader, "{raw} gave {err}");
    }

    #[test]
    fn test_parse_rejects_bad_headers() {
        malformed("[]");
        malformed("{");
        malformed(r#"{"a":{"dtype":"Q4","shape":[1],"data_offsets":[0,1]}}"#);
        malformed(r#"{"a":{"dtype":"U8","shape":[-1],"data_offsets":[0,1]}}"#);
        malformed(r#"{"a":{"dtype":"U8","shape":[1.5],"data_offsets":[0,1]}}"#);
        malformed(r#"{"a":{"dtype":"U8","shape":[1],"data_offsets":[0]}}"#);
        malformed(r#"{"a":{"dtype":"U8","shape":[1],"data_offsets":[-1,0]}}"#);
        malformed(r#"{"a":{"dtype":"U8","shape":[1]}}"#);
        malformed(r#"{"a":{"dtype":"U8","shape":[1],"data_offsets":[0,1],"x":1}}"#);
        malformed(r#"{"__metadata__":{"k":1}}"#);
        malformed(r#"{"__metadata__":{"k":"1","k":"2"}}"#);
        malformed(r#"{"a":{"dtype":"U8","dtype":"I8","shape":[1],"data_offsets":[0,1]}}"#);
        malformed(r#"{"a":{"dtype":"U8","shape":[18446744073709551615,2],"data_offsets":[0,0]}}"#);
        malformed(
            r#"{"a":{"dtype":"U8","shape":[1],"data_offsets":[0,1]},
                "a":{"dtype":"U8","shape":[1],"data_offsets":[1,2]}}"#,
        );
        malformed(
            r#"{"a":{"dtype":"U8","shape":[2],"data_offsets":[0,2]},
                "b":{"dtype":"U8","shape":[2],"data_offsets":[1,3]}}"#,
        );
    }

    #[test]
    fn test_parse_size_mismatch() {
        let err = Header::parse(br#"{"a":{"dtype":"F32","shape":[2],"data_offsets":[0,4]}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn test_empty_header() {
        let h = Header::default();
        let bytes = h.to_bytes().unwrap();
        assert_eq!(bytes, b"{}      ");
        assert!(Header::parse(&bytes).unwrap().table.is_empty());
    }
}
