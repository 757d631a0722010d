//! Client error taxonomy.

use crate::transport::ChannelError;
use fenndb_document::{DecodeError, EncodeError, PoolError};
use fenndb_protocol::ProtocolError;
use thiserror::Error;

/// Classification of a server-reported write failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorKind {
    /// A unique-index constraint rejected the write.
    DuplicateKey,
    Other,
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("encoder pool: {0}")]
    Pool(#[from] PoolError),

    #[error("transport: {0}")]
    Channel(#[from] ChannelError),

    #[error("query failed: {message}")]
    QueryFailure { message: String },

    #[error("write failed: {message}")]
    WriteFailure {
        message: String,
        code: Option<i32>,
        kind: WriteErrorKind,
    },

    #[error("cursor is exhausted")]
    CursorExhausted,
}

impl ClientError {
    /// Whether the operation may be retried after backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Channel(
                ChannelError::Io(_) | ChannelError::Timeout | ChannelError::ConnectionClosed,
            ) => true,
            ClientError::Pool(PoolError::Exhausted(_)) => true,
            _ => false,
        }
    }
}
