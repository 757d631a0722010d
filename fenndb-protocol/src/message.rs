//! Wire message builders.
//!
//! Message layout (16-byte header + opcode-specific body):
//!
//! ```text
//! +--------------+---------------+---------------+--------------+
//! | total_length |  request_id   |  response_to  |    opcode    |
//! |  int32 LE    |   int32 LE    |   int32 LE    |   int32 LE   |
//! +--------------+---------------+---------------+--------------+
//! | body (documents, namespaces, cursor handles, ...)           |
//! +-------------------------------------------------------------+
//! ```
//!
//! Builders write into a borrowed pooled [`Encoder`], reserve the header,
//! write the body, then backpatch the total length. Each builder expects a
//! freshly reset encoder and owns the whole buffer for one message.

use crate::error::ProtocolError;
use fenndb_document::{Document, EncodeError, Encoder};
use std::sync::atomic::{AtomicI32, Ordering};

/// Wire operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl OpCode {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            1 => Some(OpCode::Reply),
            2001 => Some(OpCode::Update),
            2002 => Some(OpCode::Insert),
            2004 => Some(OpCode::Query),
            2005 => Some(OpCode::GetMore),
            2006 => Some(OpCode::Delete),
            2007 => Some(OpCode::KillCursors),
            _ => None,
        }
    }
}

/// Query option bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions(i32);

impl QueryOptions {
    /// Cursor stays open at the end of an append-only collection.
    pub const TAILABLE: i32 = 1 << 1;
    /// The query may run against a secondary.
    pub const SECONDARY_OK: i32 = 1 << 2;
    /// Replay an operation log from a position instead of scanning.
    pub const OPLOG_REPLAY: i32 = 1 << 3;
    /// The server must not reap the cursor on its idle timeout.
    pub const NO_TIMEOUT: i32 = 1 << 4;
    /// The server holds a tailable query open briefly when no data exists.
    pub const AWAIT_DATA: i32 = 1 << 5;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn with_tailable(mut self) -> Self {
        self.0 |= Self::TAILABLE;
        self
    }

    pub fn with_secondary_ok(mut self) -> Self {
        self.0 |= Self::SECONDARY_OK;
        self
    }

    pub fn with_oplog_replay(mut self) -> Self {
        self.0 |= Self::OPLOG_REPLAY;
        self
    }

    pub fn with_no_timeout(mut self) -> Self {
        self.0 |= Self::NO_TIMEOUT;
        self
    }

    pub fn with_await_data(mut self) -> Self {
        self.0 |= Self::AWAIT_DATA;
        self
    }

    pub fn is_tailable(&self) -> bool {
        self.0 & Self::TAILABLE != 0
    }

    pub fn is_secondary_ok(&self) -> bool {
        self.0 & Self::SECONDARY_OK != 0
    }

    pub fn has_await_data(&self) -> bool {
        self.0 & Self::AWAIT_DATA != 0
    }

    pub fn has_no_timeout(&self) -> bool {
        self.0 & Self::NO_TIMEOUT != 0
    }
}

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Allocates a request id for one wire message.
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// A chunked insert result: the request id of the message just built and
/// the index of the first document that did not fit.
#[derive(Debug, Clone, Copy)]
pub struct InsertMessage {
    pub request_id: i32,
    pub next_index: usize,
}

fn begin(enc: &mut Encoder, op: OpCode) -> Result<(usize, i32), ProtocolError> {
    let start = enc.position();
    let request_id = next_request_id();
    enc.put_i32(0)?; // total length, patched below
    enc.put_i32(request_id)?;
    enc.put_i32(0)?; // response_to: unused on requests
    enc.put_i32(op as i32)?;
    Ok((start, request_id))
}

fn finish(enc: &mut Encoder, start: usize) {
    let total = enc.position() - start;
    enc.patch_i32(start, total as i32);
}

/// Builds an insert message starting at `docs[start]`. Documents are
/// appended until the next one would overflow the buffer; the message is
/// then closed and `next_index` tells the caller where to resume. A
/// document that does not fit even alone fails with `SizeExceeded`.
pub fn build_insert(
    enc: &mut Encoder,
    namespace: &str,
    docs: &[Document],
    start: usize,
) -> Result<InsertMessage, ProtocolError> {
    let (header, request_id) = begin(enc, OpCode::Insert)?;
    enc.put_i32(0)?; // reserved
    enc.put_cstring(namespace, "namespace")?;

    let mut cur = start;
    let mut appended = 0usize;
    while cur < docs.len() {
        match enc.try_put_document(&docs[cur], true) {
            Ok(_) => {
                appended += 1;
                cur += 1;
            }
            Err(EncodeError::BufferFull { .. }) => {
                if appended == 0 {
                    enc.reset();
                    return Err(EncodeError::SizeExceeded {
                        max: enc.max_document_size(),
                    }
                    .into());
                }
                tracing::debug!(appended, remaining = docs.len() - cur, "insert message full");
                break;
            }
            Err(e) => {
                enc.reset();
                return Err(e.into());
            }
        }
    }

    finish(enc, header);
    Ok(InsertMessage {
        request_id,
        next_index: cur,
    })
}

/// Update flag: insert the document when the filter matches nothing.
pub const UPDATE_FLAG_UPSERT: i32 = 1;
/// Update flag: apply to every matching document, not just the first.
pub const UPDATE_FLAG_MULTI: i32 = 2;

pub fn build_update(
    enc: &mut Encoder,
    namespace: &str,
    filter: &Document,
    update: &Document,
    upsert: bool,
    multi: bool,
) -> Result<i32, ProtocolError> {
    let (header, request_id) = begin(enc, OpCode::Update)?;
    enc.put_i32(0)?; // reserved
    enc.put_cstring(namespace, "namespace")?;

    let mut flags = 0;
    if upsert {
        flags |= UPDATE_FLAG_UPSERT;
    }
    if multi {
        flags |= UPDATE_FLAG_MULTI;
    }
    enc.put_i32(flags)?;

    enc.encode_document(filter)?;
    enc.encode_document(update)?;

    finish(enc, header);
    Ok(request_id)
}

pub fn build_delete(
    enc: &mut Encoder,
    namespace: &str,
    filter: &Document,
) -> Result<i32, ProtocolError> {
    let (header, request_id) = begin(enc, OpCode::Delete)?;
    enc.put_i32(0)?; // reserved
    enc.put_cstring(namespace, "namespace")?;

    // single-match fast path: the filter is exactly one identifier field
    let single = filter.len() == 1 && filter.keys().next() == Some(fenndb_document::ID_KEY);
    enc.put_i32(i32::from(single))?;

    enc.encode_document(filter)?;

    finish(enc, header);
    Ok(request_id)
}

#[allow(clippy::too_many_arguments)]
pub fn build_query(
    enc: &mut Encoder,
    namespace: &str,
    options: QueryOptions,
    skip: i32,
    batch_size: i32,
    filter: &Document,
    projection: Option<&Document>,
) -> Result<i32, ProtocolError> {
    let (header, request_id) = begin(enc, OpCode::Query)?;
    enc.put_i32(options.bits())?;
    enc.put_cstring(namespace, "namespace")?;
    enc.put_i32(skip)?;
    enc.put_i32(batch_size)?;
    enc.encode_document(filter)?;
    if let Some(projection) = projection {
        enc.encode_document(projection)?;
    }

    finish(enc, header);
    Ok(request_id)
}

pub fn build_get_more(
    enc: &mut Encoder,
    namespace: &str,
    batch_size: i32,
    cursor_id: i64,
) -> Result<i32, ProtocolError> {
    let (header, request_id) = begin(enc, OpCode::GetMore)?;
    enc.put_i32(0)?; // reserved
    enc.put_cstring(namespace, "namespace")?;
    enc.put_i32(batch_size)?;
    enc.put_i64(cursor_id)?;

    finish(enc, header);
    Ok(request_id)
}

pub fn build_kill_cursors(enc: &mut Encoder, cursor_ids: &[i64]) -> Result<i32, ProtocolError> {
    let (header, request_id) = begin(enc, OpCode::KillCursors)?;
    enc.put_i32(0)?; // reserved
    enc.put_i32(cursor_ids.len() as i32)?;
    for id in cursor_ids {
        enc.put_i64(*id)?;
    }

    finish(enc, header);
    Ok(request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fenndb_document::{doc, Value, DEFAULT_MAX_DOCUMENT_SIZE};

    fn read_i32(bytes: &[u8], at: usize) -> i32 {
        i32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn read_i64(bytes: &[u8], at: usize) -> i64 {
        i64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
    }

    #[test]
    fn test_query_message_layout() {
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        let options = QueryOptions::new().with_tailable().with_await_data();
        let request_id = build_query(
            &mut enc,
            "db.items",
            options,
            5,
            100,
            &doc! { "kind" => "a" },
            None,
        )
        .unwrap();
        let bytes = enc.finish();

        assert_eq!(read_i32(bytes, 0), bytes.len() as i32);
        assert_eq!(read_i32(bytes, 4), request_id);
        assert_eq!(read_i32(bytes, 8), 0);
        assert_eq!(read_i32(bytes, 12), OpCode::Query as i32);
        assert_eq!(read_i32(bytes, 16), options.bits());
        assert_eq!(&bytes[20..29], b"db.items\0");
        assert_eq!(read_i32(bytes, 29), 5);
        assert_eq!(read_i32(bytes, 33), 100);
    }

    #[test]
    fn test_query_with_projection_appends_second_document() {
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        build_query(
            &mut enc,
            "db.c",
            QueryOptions::new(),
            0,
            0,
            &doc! {},
            Some(&doc! { "name" => 1 }),
        )
        .unwrap();
        let without = {
            let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
            build_query(&mut enc, "db.c", QueryOptions::new(), 0, 0, &doc! {}, None).unwrap();
            enc.finish().len()
        };
        assert!(enc.finish().len() > without);
    }

    #[test]
    fn test_request_ids_increase() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }

    #[test]
    fn test_insert_single_message() {
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        let docs = vec![doc! { "a" => 1 }, doc! { "b" => 2 }];
        let msg = build_insert(&mut enc, "db.c", &docs, 0).unwrap();
        assert_eq!(msg.next_index, 2);
        let bytes = enc.finish();
        assert_eq!(read_i32(bytes, 0), bytes.len() as i32);
        assert_eq!(read_i32(bytes, 12), OpCode::Insert as i32);
        assert_eq!(read_i32(bytes, 16), 0);
        assert_eq!(&bytes[20..25], b"db.c\0");
    }

    #[test]
    fn test_insert_chunks_when_buffer_fills() {
        // 256-byte maximum: capacity is max + slack, so ~30 documents of
        // ~90 bytes each cannot fit one message
        let docs: Vec<_> = (0..30)
            .map(|i| {
                doc! {
                    "i" => i,
                    "pad" => Value::Binary { subtype: 0, bytes: vec![0u8; 64] },
                }
            })
            .collect();

        let mut covered = 0;
        let mut messages = 0;
        while covered < docs.len() {
            let mut enc = Encoder::new(256);
            let msg = build_insert(&mut enc, "db.c", &docs, covered).unwrap();
            assert!(msg.next_index > covered, "each message must make progress");
            let bytes = enc.finish();
            assert_eq!(read_i32(bytes, 0), bytes.len() as i32);
            covered = msg.next_index;
            messages += 1;
        }
        assert!(messages > 1, "expected the insert to span several messages");
    }

    #[test]
    fn test_insert_rejects_document_that_never_fits() {
        let mut enc = Encoder::new(64);
        let docs = vec![doc! {
            "blob" => Value::Binary { subtype: 0, bytes: vec![0u8; 4096] },
        }];
        let result = build_insert(&mut enc, "db.c", &docs, 0);
        assert!(matches!(
            result,
            Err(ProtocolError::Encode(EncodeError::SizeExceeded { .. }))
        ));
        assert_eq!(enc.position(), 0);
    }

    #[test]
    fn test_update_flags() {
        for (upsert, multi, expected) in [
            (false, false, 0),
            (true, false, 1),
            (false, true, 2),
            (true, true, 3),
        ] {
            let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
            build_update(
                &mut enc,
                "db.c",
                &doc! { "k" => 1 },
                &doc! { "k" => 2 },
                upsert,
                multi,
            )
            .unwrap();
            let bytes = enc.finish();
            // flags sit after header, reserved int32, and "db.c\0"
            assert_eq!(read_i32(bytes, 16 + 4 + 5), expected);
        }
    }

    #[test]
    fn test_delete_single_match_flag() {
        let cases = [
            (doc! { "_id" => 9 }, 1),
            (doc! { "_id" => "any value works" }, 1),
            (doc! { "_id" => 9, "other" => 1 }, 0),
            (doc! { "name" => "x" }, 0),
        ];
        for (filter, expected) in cases {
            let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
            build_delete(&mut enc, "db.c", &filter).unwrap();
            let bytes = enc.finish();
            assert_eq!(read_i32(bytes, 16 + 4 + 5), expected, "filter {filter}");
        }
    }

    #[test]
    fn test_get_more_layout() {
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        build_get_more(&mut enc, "db.c", 50, 0x0102_0304_0506_0708).unwrap();
        let bytes = enc.finish();
        assert_eq!(read_i32(bytes, 12), OpCode::GetMore as i32);
        let after_ns = 16 + 4 + 5;
        assert_eq!(read_i32(bytes, after_ns), 50);
        assert_eq!(read_i64(bytes, after_ns + 4), 0x0102_0304_0506_0708);
        assert_eq!(bytes.len(), after_ns + 4 + 8);
    }

    #[test]
    fn test_kill_cursors_layout() {
        let ids = [11i64, 22, 33];
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        build_kill_cursors(&mut enc, &ids).unwrap();
        let bytes = enc.finish();
        assert_eq!(read_i32(bytes, 12), OpCode::KillCursors as i32);
        assert_eq!(read_i32(bytes, 16), 0);
        assert_eq!(read_i32(bytes, 20), 3);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(read_i64(bytes, 24 + i * 8), *id);
        }
        assert_eq!(read_i32(bytes, 0), bytes.len() as i32);
    }

    #[test]
    fn test_insert_reorders_identifier() {
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        build_insert(
            &mut enc,
            "db.c",
            &[doc! { "name" => "n", "_id" => 4 }],
            0,
        )
        .unwrap();
        let bytes = enc.finish();
        // first element of the document body must be the identifier
        let doc_start = 16 + 4 + 5;
        assert_eq!(bytes[doc_start + 4], fenndb_document::element::INT32);
        assert_eq!(&bytes[doc_start + 5..doc_start + 9], b"_id\0");
    }

    #[test]
    fn test_opcode_from_i32() {
        assert_eq!(OpCode::from_i32(1), Some(OpCode::Reply));
        assert_eq!(OpCode::from_i32(2004), Some(OpCode::Query));
        assert_eq!(OpCode::from_i32(9999), None);
    }

    #[test]
    fn test_query_options_bits() {
        let options = QueryOptions::new()
            .with_tailable()
            .with_secondary_ok()
            .with_oplog_replay()
            .with_no_timeout()
            .with_await_data();
        assert_eq!(options.bits(), 0b111110);
        assert!(options.is_tailable());
        assert!(options.is_secondary_ok());
        assert!(options.has_await_data());
        assert!(options.has_no_timeout());
        assert!(!QueryOptions::new().is_tailable());
    }
}
