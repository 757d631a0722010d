//! Protocol-level error types.

use fenndb_document::{DecodeError, EncodeError};
use thiserror::Error;

/// Errors raised while framing messages or parsing replies.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("reply truncated: {0} bytes is shorter than the reply header")]
    TruncatedReply(usize),

    #[error("reply declared a negative document count: {0}")]
    BadDocumentCount(i32),
}
