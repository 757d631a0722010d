//! Codec and pool error types.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while encoding a document.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The scratch buffer cannot take another byte at its configured
    /// capacity. Top-level entry points convert this into `SizeExceeded`;
    /// the chunked insert builder rolls back and starts a fresh message.
    #[error("encoder buffer full (capacity {capacity} bytes)")]
    BufferFull { capacity: usize },

    #[error("document exceeds maximum encoded size of {max} bytes")]
    SizeExceeded { max: usize },

    #[error("interior NUL byte in {0}")]
    InteriorNul(&'static str),

    #[error("encoder already flipped for reading")]
    Flipped,
}

/// Errors raised while decoding a document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("document truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("invalid document length {0}")]
    InvalidLength(i32),

    #[error("declared length {declared} disagrees with decoded span {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("missing document terminator")]
    MissingTerminator,

    #[error("string not NUL-terminated")]
    UnterminatedString,

    #[error("string length field {0} out of bounds")]
    BadStringLength(i32),

    #[error("binary length field {0} out of bounds")]
    BadBinaryLength(i32),

    #[error("invalid UTF-8 in string data")]
    InvalidUtf8,

    #[error("unknown type tag {tag:#04x} for key {key:?}")]
    UnknownTypeTag { tag: u8, key: String },
}

/// Errors raised by the encoder pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configured memory budget cannot back a single encoder buffer.
    #[error("memory budget too small for any encoder buffer")]
    NoCapacity,

    #[error("no encoder became available within {0:?}")]
    Exhausted(Duration),
}
