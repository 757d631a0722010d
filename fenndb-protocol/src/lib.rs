//! # fenndb-protocol
//!
//! Wire protocol framing for fenndb.
//!
//! This crate provides:
//! - Opcode and flag constants for the request/reply envelope
//! - Per-operation message builders writing into pooled encoders
//! - Reply header and document parsing

pub mod error;
pub mod message;
pub mod reply;

pub use error::ProtocolError;
pub use message::{
    build_delete, build_get_more, build_insert, build_kill_cursors, build_query, build_update,
    next_request_id, InsertMessage, OpCode, QueryOptions,
};
pub use reply::{parse_reply, Reply, ReplyFlags, REPLY_HEADER_SIZE};

/// Size of the fixed message header in bytes (4 x int32).
pub const MESSAGE_HEADER_SIZE: usize = 16;
