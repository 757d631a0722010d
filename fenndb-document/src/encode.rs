//! Binary document encoder.
//!
//! Encoded layout per document:
//!
//! ```text
//! +-----------+----------------------------------------+------+
//! | int32 len | (type byte, cstring key, payload) ...  | 0x00 |
//! +-----------+----------------------------------------+------+
//! ```
//!
//! `len` spans from its own first byte through the terminator, little-endian
//! like every other fixed-width field. Embedded documents, arrays, and
//! code-with-scope values carry their own prefixes, finalized by patching
//! the reserved slot once the sub-region is written.

use crate::element;
use crate::error::EncodeError;
use crate::value::{Document, Value};
use bytes::{BufMut, BytesMut};

/// Slack beyond the maximum document size so message headers and namespace
/// strings fit in the same scratch buffer as the documents they frame.
pub const BUFFER_SLACK: usize = 2048;

/// Reserved top-level field naming sibling fields to omit from encoding.
/// The field itself is never encoded.
pub const TRANSIENT_FIELDS_KEY: &str = "_transient_fields";

/// Identifier field written ahead of all others in insert documents.
pub const ID_KEY: &str = "_id";

/// A reusable scratch buffer that serializes documents and wire messages.
///
/// Encoders are stateful: a caller writes into one, reads the finished
/// bytes after [`finish`](Encoder::finish) flips it read-only, and must
/// leave it either freshly [`reset`](Encoder::reset) or flipped. The
/// [`EncoderPool`](crate::pool::EncoderPool) enforces this on checkout.
pub struct Encoder {
    buf: BytesMut,
    capacity: usize,
    max_document_size: usize,
    flipped: bool,
}

impl Encoder {
    pub fn new(max_document_size: usize) -> Self {
        let capacity = max_document_size + BUFFER_SLACK;
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            max_document_size,
            flipped: false,
        }
    }

    /// Current write position (bytes written so far).
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn max_document_size(&self) -> usize {
        self.max_document_size
    }

    /// Returns the encoder to its starting state, ready to encode again.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.flipped = false;
    }

    /// Flips the encoder read-only and returns everything written.
    pub fn finish(&mut self) -> &[u8] {
        self.flipped = true;
        &self.buf
    }

    /// Discards everything written at or after `position`.
    pub fn truncate_to(&mut self, position: usize) {
        self.buf.truncate(position);
    }

    fn ensure(&mut self, additional: usize) -> Result<(), EncodeError> {
        if self.flipped {
            return Err(EncodeError::Flipped);
        }
        if self.buf.len() + additional > self.capacity {
            return Err(EncodeError::BufferFull {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), EncodeError> {
        self.ensure(1)?;
        self.buf.put_u8(v);
        Ok(())
    }

    pub fn put_i32(&mut self, v: i32) -> Result<(), EncodeError> {
        self.ensure(4)?;
        self.buf.put_i32_le(v);
        Ok(())
    }

    pub fn put_i64(&mut self, v: i64) -> Result<(), EncodeError> {
        self.ensure(8)?;
        self.buf.put_i64_le(v);
        Ok(())
    }

    pub fn put_f64(&mut self, v: f64) -> Result<(), EncodeError> {
        self.ensure(8)?;
        self.buf.put_f64_le(v);
        Ok(())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.ensure(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// Writes a NUL-terminated string. `what` names the field class for the
    /// error raised on interior NUL bytes.
    pub fn put_cstring(&mut self, s: &str, what: &'static str) -> Result<(), EncodeError> {
        if s.as_bytes().contains(&0) {
            return Err(EncodeError::InteriorNul(what));
        }
        self.ensure(s.len() + 1)?;
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    /// Writes a length-prefixed string; the length counts the terminator.
    fn put_string(&mut self, s: &str) -> Result<(), EncodeError> {
        self.put_i32(s.len() as i32 + 1)?;
        self.ensure(s.len() + 1)?;
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        Ok(())
    }

    /// Reserves four bytes for a length to be patched later; returns the
    /// offset to hand back to [`patch_i32`](Encoder::patch_i32).
    pub fn reserve_i32(&mut self) -> Result<usize, EncodeError> {
        let pos = self.buf.len();
        self.put_i32(0)?;
        Ok(pos)
    }

    /// Overwrites a previously reserved length slot.
    pub fn patch_i32(&mut self, position: usize, v: i32) {
        self.buf[position..position + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Encodes a top-level document with no identifier reordering (filters,
    /// updates, command documents). Overflow resets the buffer and becomes
    /// `SizeExceeded`, so the encoder is always reusable after a failure.
    pub fn encode_document(&mut self, doc: &Document) -> Result<usize, EncodeError> {
        self.encode_checked(doc, false)
    }

    /// Encodes a top-level insert document: an `_id` field, if present, is
    /// written ahead of all other fields.
    pub fn encode_insert_document(&mut self, doc: &Document) -> Result<usize, EncodeError> {
        self.encode_checked(doc, true)
    }

    fn encode_checked(&mut self, doc: &Document, reorder_id: bool) -> Result<usize, EncodeError> {
        match self.try_put_document(doc, reorder_id) {
            Ok(len) => Ok(len),
            Err(EncodeError::BufferFull { .. }) => {
                self.reset();
                Err(EncodeError::SizeExceeded {
                    max: self.max_document_size,
                })
            }
            Err(e @ EncodeError::SizeExceeded { .. }) => {
                self.reset();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Encodes a top-level document without converting overflow: the buffer
    /// is rolled back to the call position and the raw error is returned.
    /// The chunked insert builder uses this to close a message and retry
    /// the document in the next one.
    pub fn try_put_document(
        &mut self,
        doc: &Document,
        reorder_id: bool,
    ) -> Result<usize, EncodeError> {
        let start = self.position();
        match self.put_object(None, doc, reorder_id) {
            Ok(len) => {
                if len > self.max_document_size {
                    self.truncate_to(start);
                    return Err(EncodeError::SizeExceeded {
                        max: self.max_document_size,
                    });
                }
                Ok(len)
            }
            Err(e) => {
                self.truncate_to(start);
                Err(e)
            }
        }
    }

    fn put_object(
        &mut self,
        name: Option<&str>,
        doc: &Document,
        reorder_id: bool,
    ) -> Result<usize, EncodeError> {
        if let Some(name) = name {
            self.put_element_header(element::DOCUMENT, name)?;
        }
        let size_pos = self.reserve_i32()?;

        let transient = doc.get_array(TRANSIENT_FIELDS_KEY);
        let skip_transient = |key: &str| {
            transient.is_some_and(|fields| fields.iter().any(|f| f.as_str() == Some(key)))
        };

        let reorder = reorder_id && name.is_none();
        if reorder {
            if let Some(id) = doc.get(ID_KEY) {
                self.put_field(ID_KEY, id)?;
            }
        }

        for (key, value) in doc.iter() {
            if reorder && key == ID_KEY {
                continue;
            }
            if key == TRANSIENT_FIELDS_KEY || skip_transient(key) {
                continue;
            }
            self.put_field(key, value)?;
        }

        self.put_u8(element::EOO)?;
        let len = self.position() - size_pos;
        self.patch_i32(size_pos, len as i32);
        Ok(len)
    }

    fn put_element_header(&mut self, tag: u8, name: &str) -> Result<(), EncodeError> {
        self.put_u8(tag)?;
        self.put_cstring(name, "field name")
    }

    fn put_field(&mut self, name: &str, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Null => self.put_element_header(element::NULL, name),
            Value::Bool(b) => {
                self.put_element_header(element::BOOL, name)?;
                self.put_u8(u8::from(*b))
            }
            Value::Int32(v) => {
                self.put_element_header(element::INT32, name)?;
                self.put_i32(*v)
            }
            Value::Int64(v) => {
                self.put_element_header(element::INT64, name)?;
                self.put_i64(*v)
            }
            Value::Double(v) => {
                self.put_element_header(element::DOUBLE, name)?;
                self.put_f64(*v)
            }
            Value::String(s) => {
                self.put_element_header(element::STRING, name)?;
                self.put_string(s)
            }
            Value::Symbol(s) => {
                self.put_element_header(element::SYMBOL, name)?;
                self.put_string(s)
            }
            Value::Binary { subtype, bytes } => {
                self.put_element_header(element::BINARY, name)?;
                self.put_i32(bytes.len() as i32)?;
                self.put_u8(*subtype)?;
                self.put_bytes(bytes)
            }
            Value::Timestamp { time, increment } => {
                self.put_element_header(element::TIMESTAMP, name)?;
                self.put_i32(*increment as i32)?;
                self.put_i32(*time as i32)
            }
            Value::DateTime(millis) => {
                self.put_element_header(element::DATETIME, name)?;
                self.put_i64(*millis)
            }
            Value::Regex { pattern, flags } => {
                self.put_element_header(element::REGEX, name)?;
                self.put_cstring(pattern, "regex pattern")?;
                self.put_cstring(&normalize_regex_flags(flags), "regex flags")
            }
            Value::Document(doc) => self.put_object(Some(name), doc, false).map(|_| ()),
            Value::Array(items) => self.put_array(name, items),
            Value::CodeWithScope { code, scope } => {
                self.put_element_header(element::CODE_WITH_SCOPE, name)?;
                let size_pos = self.reserve_i32()?;
                self.put_string(code)?;
                self.put_object(None, scope, false)?;
                let len = self.position() - size_pos;
                self.patch_i32(size_pos, len as i32);
                Ok(())
            }
            Value::Pointer { namespace, id } => {
                self.put_element_header(element::POINTER, name)?;
                self.put_string(namespace)?;
                self.put_bytes(id)
            }
            Value::Reference { collection, id } => {
                self.put_element_header(element::DOCUMENT, name)?;
                let size_pos = self.reserve_i32()?;
                self.put_element_header(element::STRING, "$ref")?;
                self.put_string(collection)?;
                self.put_field("$id", id)?;
                self.put_u8(element::EOO)?;
                let len = self.position() - size_pos;
                self.patch_i32(size_pos, len as i32);
                Ok(())
            }
        }
    }

    fn put_array(&mut self, name: &str, items: &[Value]) -> Result<(), EncodeError> {
        self.put_element_header(element::ARRAY, name)?;
        let size_pos = self.reserve_i32()?;
        for (i, item) in items.iter().enumerate() {
            let key = i.to_string();
            self.put_field(&key, item)?;
        }
        self.put_u8(element::EOO)?;
        let len = self.position() - size_pos;
        self.patch_i32(size_pos, len as i32);
        Ok(())
    }
}

/// Canonicalizes regex flag letters: sorted, deduplicated.
fn normalize_regex_flags(flags: &str) -> String {
    let mut letters: Vec<char> = flags.chars().collect();
    letters.sort_unstable();
    letters.dedup();
    letters.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{doc, DEFAULT_MAX_DOCUMENT_SIZE};

    fn encode(doc: &Document) -> Vec<u8> {
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        enc.encode_document(doc).unwrap();
        enc.finish().to_vec()
    }

    #[test]
    fn test_int32_layout() {
        let bytes = encode(&doc! { "a" => 1 });
        assert_eq!(
            bytes,
            vec![
                0x0C, 0x00, 0x00, 0x00, // total length = 12
                0x10, b'a', 0x00, // int32 element, key "a"
                0x01, 0x00, 0x00, 0x00, // value 1
                0x00, // terminator
            ]
        );
    }

    #[test]
    fn test_string_layout() {
        let bytes = encode(&doc! { "s" => "hi" });
        assert_eq!(
            bytes,
            vec![
                0x0E, 0x00, 0x00, 0x00, // total length = 14
                0x02, b's', 0x00, // string element, key "s"
                0x03, 0x00, 0x00, 0x00, // length 3 (counts NUL)
                b'h', b'i', 0x00, // payload
                0x00, // terminator
            ]
        );
    }

    #[test]
    fn test_empty_document() {
        let bytes = encode(&Document::new());
        assert_eq!(bytes, vec![0x05, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_timestamp_writes_increment_then_time() {
        let bytes = encode(&doc! {
            "ts" => Value::Timestamp { time: 7, increment: 3 },
        });
        // element starts after the 4-byte prefix: tag, "ts\0", then payload
        let payload = &bytes[8..16];
        assert_eq!(&payload[..4], &3i32.to_le_bytes());
        assert_eq!(&payload[4..], &7i32.to_le_bytes());
    }

    #[test]
    fn test_insert_reorders_id_first() {
        let doc = doc! { "name" => "x", "_id" => 42, "age" => 7 };

        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        enc.encode_insert_document(&doc).unwrap();
        let bytes = enc.finish().to_vec();
        // first element after the prefix must be the identifier
        assert_eq!(bytes[4], element::INT32);
        assert_eq!(&bytes[5..9], b"_id\0");

        // the plain entry point keeps stored order
        let plain = encode(&doc);
        assert_eq!(plain[4], element::STRING);
        assert_eq!(&plain[5..10], b"name\0");
    }

    #[test]
    fn test_nested_document_is_never_reordered() {
        let doc = doc! {
            "child" => doc! { "z" => 1, "_id" => 2 },
        };
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        enc.encode_insert_document(&doc).unwrap();
        let bytes = enc.finish().to_vec();
        // inside the child document the stored order survives: "z" first
        let child_first_key = &bytes[4 + 1 + 6 + 4 + 1..4 + 1 + 6 + 4 + 3];
        assert_eq!(child_first_key, b"z\0");
    }

    #[test]
    fn test_transient_fields_are_skipped() {
        let doc = doc! {
            "keep" => 1,
            "drop" => 2,
            TRANSIENT_FIELDS_KEY => vec![Value::String("drop".into())],
        };
        let bytes = encode(&doc);
        let decoded = crate::decode::decode_document(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get_i32("keep"), Some(1));
        assert!(!decoded.contains_key("drop"));
        assert!(!decoded.contains_key(TRANSIENT_FIELDS_KEY));
    }

    #[test]
    fn test_regex_flags_are_canonicalized() {
        let bytes = encode(&doc! {
            "r" => Value::Regex { pattern: "^a".into(), flags: "smi".into() },
        });
        let decoded = crate::decode::decode_document(&bytes).unwrap();
        match decoded.get("r").unwrap() {
            Value::Regex { pattern, flags } => {
                assert_eq!(pattern, "^a");
                assert_eq!(flags, "ims");
            }
            other => panic!("expected regex, got {other:?}"),
        }
    }

    #[test]
    fn test_size_prefixes_span_regions() {
        let doc = doc! {
            "outer" => doc! {
                "inner" => doc! { "v" => 1 },
                "list" => vec![Value::Int32(1), Value::String("two".into())],
            },
            "tail" => true,
        };
        let bytes = encode(&doc);

        // every length-prefixed region: stored length == distance from the
        // prefix start to just past the region terminator
        fn check(bytes: &[u8], start: usize) -> usize {
            let declared =
                i32::from_le_bytes(bytes[start..start + 4].try_into().unwrap()) as usize;
            let end = start + declared;
            assert_eq!(bytes[end - 1], 0x00, "region must end with terminator");
            let mut pos = start + 4;
            while bytes[pos] != 0x00 {
                let tag = bytes[pos];
                pos += 1;
                while bytes[pos] != 0 {
                    pos += 1;
                }
                pos += 1; // key terminator
                match tag {
                    0x03 | 0x04 => pos = check(bytes, pos),
                    0x10 => pos += 4,
                    0x08 => pos += 1,
                    0x02 => {
                        let len =
                            i32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
                        pos += 4 + len;
                    }
                    other => panic!("unexpected tag {other:#x} in test document"),
                }
            }
            assert_eq!(pos + 1, end, "declared length must match actual span");
            end
        }
        let end = check(&bytes, 0);
        assert_eq!(end, bytes.len());
    }

    #[test]
    fn test_size_exceeded_resets_encoder() {
        let mut enc = Encoder::new(64);
        let big = doc! { "blob" => Value::Binary { subtype: 0, bytes: vec![0u8; 128] } };
        match enc.encode_document(&big) {
            Err(EncodeError::SizeExceeded { max }) => assert_eq!(max, 64),
            other => panic!("expected SizeExceeded, got {other:?}"),
        }
        // buffer must be reusable, not partially written or flipped
        assert_eq!(enc.position(), 0);
        enc.encode_document(&doc! { "a" => 1 }).unwrap();
        assert_eq!(enc.position(), 12);
    }

    #[test]
    fn test_buffer_overflow_becomes_size_exceeded() {
        // fits the document maximum but not the physical buffer: exercised
        // via a value larger than max + slack
        let mut enc = Encoder::new(16);
        let big = doc! { "b" => Value::Binary { subtype: 0, bytes: vec![0u8; 4096] } };
        assert!(matches!(
            enc.encode_document(&big),
            Err(EncodeError::SizeExceeded { .. })
        ));
        assert_eq!(enc.position(), 0);
    }

    #[test]
    fn test_interior_nul_in_key() {
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        let mut doc = Document::new();
        doc.insert("bad\0key", 1);
        assert!(matches!(
            enc.encode_document(&doc),
            Err(EncodeError::InteriorNul("field name"))
        ));
    }

    #[test]
    fn test_flipped_encoder_rejects_writes() {
        let mut enc = Encoder::new(DEFAULT_MAX_DOCUMENT_SIZE);
        enc.encode_document(&doc! { "a" => 1 }).unwrap();
        let _ = enc.finish();
        assert!(matches!(enc.put_i32(1), Err(EncodeError::Flipped)));
        enc.reset();
        assert!(enc.put_i32(1).is_ok());
    }

    #[test]
    fn test_reference_encodes_as_ref_id_document() {
        let bytes = encode(&doc! {
            "link" => Value::Reference {
                collection: "users".into(),
                id: Box::new(Value::Int32(9)),
            },
        });
        let decoded = crate::decode::decode_document(&bytes).unwrap();
        let link = decoded.get_document("link").unwrap();
        assert_eq!(link.get_str("$ref"), Some("users"));
        assert_eq!(link.get_i32("$id"), Some(9));
    }

    #[test]
    fn test_normalize_regex_flags() {
        assert_eq!(normalize_regex_flags("smi"), "ims");
        assert_eq!(normalize_regex_flags("iim"), "im");
        assert_eq!(normalize_regex_flags(""), "");
    }
}
