use crate::DType;

/// All errors that can occur while building, encoding or decoding a container.
///
/// Every failure is detected locally and is deterministic for a given input,
/// so nothing here is retried. Use [`Error::kind`] to branch on the failure
/// without matching on payloads.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two tensors share a name.
    #[error("duplicate tensor name '{0}'")]
    DuplicateName(String),

    /// A dimension is negative, or the shape's byte size overflows.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Byte length disagrees with `product(shape) * dtype width`.
    #[error("size mismatch for '{name}': expected {expected} bytes, got {got}")]
    SizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// The container has no tensors and the caller disallowed that.
    #[error("container holds no tensors")]
    EmptyContainer,

    /// The header is not a valid descriptor table.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The input ends before the declared header or data block does.
    #[error("truncated input: need {needed} bytes, have {available}")]
    TruncatedInput { needed: u64, available: u64 },

    /// A declared or computed size exceeds the configured limit.
    #[error("{what} of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge {
        what: &'static str,
        size: u64,
        limit: u64,
    },

    /// No tensor with this name in the container.
    #[error("tensor '{0}' not found")]
    NameNotFound(String),

    /// Typed access with an element type that does not match the stored dtype.
    #[error("dtype mismatch: stored {stored}, requested {requested}")]
    DTypeMismatch { stored: DType, requested: DType },

    /// Underlying reader/writer failure (file API only).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

/// Fieldless tag for each [`Error`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateName,
    InvalidShape,
    SizeMismatch,
    EmptyContainer,
    MalformedHeader,
    TruncatedInput,
    PayloadTooLarge,
    NameNotFound,
    DTypeMismatch,
    Io,
    Msg,
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateName(_) => ErrorKind::DuplicateName,
            Error::InvalidShape(_) => ErrorKind::InvalidShape,
            Error::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Error::EmptyContainer => ErrorKind::EmptyContainer,
            Error::MalformedHeader(_) => ErrorKind::MalformedHeader,
            Error::TruncatedInput { .. } => ErrorKind::TruncatedInput,
            Error::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Error::NameNotFound(_) => ErrorKind::NameNotFound,
            Error::DTypeMismatch { .. } => ErrorKind::DTypeMismatch,
            Error::Io(_) => ErrorKind::Io,
            Error::Msg(_) => ErrorKind::Msg,
        }
    }

    pub(crate) fn malformed(s: impl Into<String>) -> Self {
        Error::MalformedHeader(s.into())
    }
}

/// Convenience Result type used throughout tensorpack.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
