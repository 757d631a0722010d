//! # fenndb-document
//!
//! Binary document codec for the fenndb wire protocol.
//!
//! This crate provides:
//! - An ordered, string-keyed [`Document`] value model with a closed
//!   [`Value`] type set
//! - A length-prefixed, type-tagged binary [`Encoder`] with
//!   reserve-then-patch size fields
//! - The symmetric [`decode_document`] parser
//! - A bounded, scoped-checkout [`EncoderPool`] shared across caller
//!   threads

pub mod decode;
pub mod encode;
pub mod error;
pub mod pool;
pub mod value;

pub use decode::{decode_document, document_len};
pub use encode::{Encoder, ID_KEY, TRANSIENT_FIELDS_KEY};
pub use error::{DecodeError, EncodeError, PoolError};
pub use pool::{EncoderGuard, EncoderPool, PoolConfig};
pub use value::{Document, Value};

/// Default maximum encoded size of a single document (4 MiB).
pub const DEFAULT_MAX_DOCUMENT_SIZE: usize = 4 * 1024 * 1024;

/// Wire type tags for document elements.
pub mod element {
    pub const EOO: u8 = 0x00;
    pub const DOUBLE: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const DOCUMENT: u8 = 0x03;
    pub const ARRAY: u8 = 0x04;
    pub const BINARY: u8 = 0x05;
    /// Legacy tag still seen from old servers; decoded as null.
    pub const UNDEFINED: u8 = 0x06;
    pub const BOOL: u8 = 0x08;
    pub const DATETIME: u8 = 0x09;
    pub const NULL: u8 = 0x0A;
    pub const REGEX: u8 = 0x0B;
    pub const POINTER: u8 = 0x0C;
    pub const SYMBOL: u8 = 0x0E;
    pub const CODE_WITH_SCOPE: u8 = 0x0F;
    pub const INT32: u8 = 0x10;
    pub const TIMESTAMP: u8 = 0x11;
    pub const INT64: u8 = 0x12;
}
