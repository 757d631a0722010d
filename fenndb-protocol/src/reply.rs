//! Reply parsing.
//!
//! A reply body (after the standard message header) is:
//!
//! ```text
//! +-----------+------------+---------------+-----------------+--------+
//! |   flags   |  cursor_id | starting_from | number_returned | docs   |
//! | int32 LE  |  int64 LE  |   int32 LE    |    int32 LE     |  ...   |
//! +-----------+------------+---------------+-----------------+--------+
//! ```

use crate::error::ProtocolError;
use bytes::Buf;
use fenndb_document::{decode_document, document_len, Document};

/// Size of the reply header that follows the message header.
pub const REPLY_HEADER_SIZE: usize = 20;

/// Reply flag bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyFlags(i32);

impl ReplyFlags {
    /// The requested cursor handle is no longer known to the server.
    pub const CURSOR_NOT_FOUND: i32 = 1;
    /// The single returned document describes a query failure.
    pub const ERROR_SET: i32 = 2;
    /// Routing metadata went stale; the client should refresh.
    pub const SHARD_CONFIG_STALE: i32 = 4;
    /// The server supports holding tailable queries open (await-data).
    pub const AWAIT_CAPABLE: i32 = 8;

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn cursor_not_found(&self) -> bool {
        self.0 & Self::CURSOR_NOT_FOUND != 0
    }

    pub fn error_set(&self) -> bool {
        self.0 & Self::ERROR_SET != 0
    }

    pub fn shard_config_stale(&self) -> bool {
        self.0 & Self::SHARD_CONFIG_STALE != 0
    }

    pub fn await_capable(&self) -> bool {
        self.0 & Self::AWAIT_CAPABLE != 0
    }
}

/// A parsed reply.
#[derive(Debug)]
pub struct Reply {
    pub flags: ReplyFlags,
    /// Remote cursor handle; non-positive means the stream is complete.
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
    pub documents: Vec<Document>,
    /// Total reply body length, tracked for transfer diagnostics.
    pub body_len: usize,
}

/// Parses a reply body into its header fields and documents. Exactly
/// `number_returned` documents are decoded, stopping early only when the
/// body runs out of bytes.
pub fn parse_reply(body: &[u8]) -> Result<Reply, ProtocolError> {
    if body.len() < REPLY_HEADER_SIZE {
        return Err(ProtocolError::TruncatedReply(body.len()));
    }

    let mut header = &body[..REPLY_HEADER_SIZE];
    let flags = ReplyFlags::from_bits(header.get_i32_le());
    let cursor_id = header.get_i64_le();
    let starting_from = header.get_i32_le();
    let number_returned = header.get_i32_le();
    if number_returned < 0 {
        return Err(ProtocolError::BadDocumentCount(number_returned));
    }

    let mut documents = Vec::with_capacity(number_returned.min(512) as usize);
    let mut pos = REPLY_HEADER_SIZE;
    while documents.len() < number_returned as usize && pos < body.len() {
        let span = document_len(&body[pos..])?;
        if pos + span > body.len() {
            return Err(ProtocolError::Decode(
                fenndb_document::DecodeError::Truncated {
                    needed: pos + span - body.len(),
                },
            ));
        }
        documents.push(decode_document(&body[pos..pos + span])?);
        pos += span;
    }

    Ok(Reply {
        flags,
        cursor_id,
        starting_from,
        number_returned,
        documents,
        body_len: body.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use fenndb_document::{doc, Encoder, DEFAULT_MAX_DOCUMENT_SIZE};

    fn reply_body(flags: i32, cursor_id: i64, docs: &[Document]) -> Vec<u8> {
        let mut body = Vec::new();
        body.put_i32_le(flags);
        body.put_i64_le(cursor_id);
        body.put_i32_le(0);
        body.put_i32_le(docs.len() as i32);
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        for doc in docs {
            enc.encode_document(doc).unwrap();
        }
        body.extend_from_slice(enc.finish());
        body
    }

    #[test]
    fn test_parse_reply() {
        let docs = vec![doc! { "a" => 1 }, doc! { "b" => "two" }];
        let body = reply_body(ReplyFlags::AWAIT_CAPABLE, 42, &docs);
        let reply = parse_reply(&body).unwrap();

        assert!(reply.flags.await_capable());
        assert!(!reply.flags.cursor_not_found());
        assert_eq!(reply.cursor_id, 42);
        assert_eq!(reply.starting_from, 0);
        assert_eq!(reply.number_returned, 2);
        assert_eq!(reply.documents, docs);
        assert_eq!(reply.body_len, body.len());
    }

    #[test]
    fn test_parse_empty_reply() {
        let body = reply_body(0, 0, &[]);
        let reply = parse_reply(&body).unwrap();
        assert_eq!(reply.number_returned, 0);
        assert!(reply.documents.is_empty());
    }

    #[test]
    fn test_truncated_header() {
        let result = parse_reply(&[0u8; 10]);
        assert!(matches!(result, Err(ProtocolError::TruncatedReply(10))));
    }

    #[test]
    fn test_truncated_document_body() {
        let docs = vec![doc! { "a" => 1 }];
        let mut body = reply_body(0, 0, &docs);
        body.truncate(body.len() - 3);
        assert!(parse_reply(&body).is_err());
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut body = Vec::new();
        body.put_i32_le(0);
        body.put_i64_le(0);
        body.put_i32_le(0);
        body.put_i32_le(-2);
        assert!(matches!(
            parse_reply(&body),
            Err(ProtocolError::BadDocumentCount(-2))
        ));
    }

    #[test]
    fn test_reply_flags() {
        let flags = ReplyFlags::from_bits(
            ReplyFlags::CURSOR_NOT_FOUND | ReplyFlags::ERROR_SET | ReplyFlags::SHARD_CONFIG_STALE,
        );
        assert!(flags.cursor_not_found());
        assert!(flags.error_set());
        assert!(flags.shard_config_stale());
        assert!(!flags.await_capable());
    }
}
