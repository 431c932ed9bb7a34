use std::fmt;
use std::str::FromStr;

// DType — Element types a container can hold
//
// Every tensor entry in a container carries a DType that fixes its element
// width. The header stores the upper-case tag ("F32", "BOOL", ...):
//
//   BOOL — one byte per element, 0 = false, anything else = true
//   U8   — unsigned byte
//   I8 / I16 / I32 / I64 — signed little-endian integers
//   F16  — 16-bit IEEE half float
//   BF16 — 16-bit brain float
//   F32 / F64 — IEEE single / double precision

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    BOOL,
    U8,
    I8,
    I16,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    /// Every variant, in tag order.
    pub const ALL: [DType; 10] = [
        DType::BOOL,
        DType::U8,
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
    ];

    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::BOOL | DType::U8 | DType::I8 => 1,
            DType::I16 | DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    /// The tag written into container headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::BOOL => "BOOL",
            DType::U8 => "U8",
            DType::I8 => "I8",
            DType::I16 => "I16",
            DType::I32 => "I32",
            DType::I64 => "I64",
            DType::F16 => "F16",
            DType::BF16 => "BF16",
            DType::F32 => "F32",
            DType::F64 => "F64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        DType::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| crate::Error::MalformedHeader(format!("unknown dtype tag '{s}'")))
    }
}

// WithDType — Trait that connects Rust types to DType enum
//
// Containers only ever hold raw bytes. This trait is how callers turn a
// byte view back into typed values (and typed values into bytes):
//
//   let weights: Vec<f32> = container.get("w")?.to_vec::<f32>()?;
//
// All element encodings are little-endian.

/// Trait implemented by Rust types that can be stored in a container.
pub trait WithDType: Copy + Send + Sync + 'static + fmt::Debug {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Append the little-endian encoding of `self` to `out`.
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode one element. `chunk` is exactly `DTYPE.size_in_bytes()` long.
    fn read_le(chunk: &[u8]) -> Self;
}

macro_rules! impl_with_dtype {
    ($ty:ty, $dtype:expr, $n:expr) => {
        impl WithDType for $ty {
            const DTYPE: DType = $dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(chunk: &[u8]) -> Self {
                let mut buf = [0u8; $n];
                buf.copy_from_slice(chunk);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

impl_with_dtype!(u8, DType::U8, 1);
impl_with_dtype!(i8, DType::I8, 1);
impl_with_dtype!(i16, DType::I16, 2);
impl_with_dtype!(i32, DType::I32, 4);
impl_with_dtype!(i64, DType::I64, 8);
impl_with_dtype!(half::f16, DType::F16, 2);
impl_with_dtype!(half::bf16, DType::BF16, 2);
impl_with_dtype!(f32, DType::F32, 4);
impl_with_dtype!(f64, DType::F64, 8);

impl WithDType for bool {
    const DTYPE: DType = DType::BOOL;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_le(chunk: &[u8]) -> Self {
        chunk[0] != 0
    }
}

/// Encode a typed slice as little-endian bytes.
pub fn to_le_bytes<T: WithDType>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::DTYPE.size_in_bytes());
    for &v in values {
        v.write_le(&mut out);
    }
    out
}

/// Decode little-endian bytes into typed values.
///
/// Fails with `SizeMismatch` if the byte length is not a multiple of the
/// element width.
pub fn from_le_bytes<T: WithDType>(bytes: &[u8]) -> crate::Result<Vec<T>> {
    let width = T::DTYPE.size_in_bytes();
    if bytes.len() % width != 0 {
        return Err(crate::Error::SizeMismatch {
            name: format!("<{}>", T::DTYPE),
            expected: bytes.len() - bytes.len() % width,
            got: bytes.len(),
        });
    }
    Ok(bytes.chunks_exact(width).map(T::read_le).collect())
}
