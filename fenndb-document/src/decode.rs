//! Binary document decoder. Mirrors the encoder exactly; anything the
//! encoder would not have produced is rejected as malformed.

use crate::element;
use crate::error::DecodeError;
use crate::value::{Document, Value};

/// Decodes a complete document from `bytes`. The slice must span exactly
/// one document; trailing bytes are a length mismatch.
pub fn decode_document(bytes: &[u8]) -> Result<Document, DecodeError> {
    let mut reader = Reader::new(bytes);
    let doc = reader.read_document()?;
    if reader.pos != bytes.len() {
        return Err(DecodeError::LengthMismatch {
            declared: reader.pos,
            actual: bytes.len(),
        });
    }
    Ok(doc)
}

/// Reads the declared length of the document at the front of `bytes`
/// without decoding it. Used to split replies into per-document slices.
pub fn document_len(bytes: &[u8]) -> Result<usize, DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::Truncated {
            needed: 4 - bytes.len(),
        });
    }
    let declared = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if declared < 5 {
        return Err(DecodeError::InvalidLength(declared));
    }
    Ok(declared as usize)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < n {
            Err(DecodeError::Truncated {
                needed: n - remaining,
            })
        } else {
            Ok(())
        }
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        let v = i32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.need(8)?;
        let v = i64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.need(8)?;
        let v = f64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.need(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_cstring(&mut self) -> Result<&'a str, DecodeError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::UnterminatedString)?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|_| DecodeError::InvalidUtf8)?;
        self.pos += nul + 1;
        Ok(s)
    }

    /// Length-prefixed string: the prefix counts the NUL terminator.
    fn read_string(&mut self) -> Result<String, DecodeError> {
        let declared = self.read_i32()?;
        if declared < 1 {
            return Err(DecodeError::BadStringLength(declared));
        }
        let len = declared as usize;
        let raw = self.read_bytes(len)?;
        if raw[len - 1] != 0 {
            return Err(DecodeError::UnterminatedString);
        }
        let s = std::str::from_utf8(&raw[..len - 1]).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok(s.to_string())
    }

    fn read_document(&mut self) -> Result<Document, DecodeError> {
        let start = self.pos;
        let declared = self.read_i32()?;
        if declared < 5 {
            return Err(DecodeError::InvalidLength(declared));
        }
        let declared = declared as usize;
        if start + declared > self.buf.len() {
            return Err(DecodeError::Truncated {
                needed: start + declared - self.buf.len(),
            });
        }
        let end = start + declared;

        let mut doc = Document::new();
        loop {
            if self.pos >= end {
                return Err(DecodeError::MissingTerminator);
            }
            let tag = self.read_u8()?;
            if tag == element::EOO {
                break;
            }
            let key = self.read_cstring()?.to_string();
            let value = self.read_value(tag, &key)?;
            doc.insert(key, value);
        }

        if self.pos != end {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: self.pos - start,
            });
        }
        Ok(doc)
    }

    fn read_value(&mut self, tag: u8, key: &str) -> Result<Value, DecodeError> {
        match tag {
            element::DOUBLE => Ok(Value::Double(self.read_f64()?)),
            element::STRING => Ok(Value::String(self.read_string()?)),
            element::DOCUMENT => Ok(Value::Document(self.read_document()?)),
            element::ARRAY => {
                let entries = self.read_document()?;
                Ok(Value::Array(entries.into_values()))
            }
            element::BINARY => {
                let declared = self.read_i32()?;
                if declared < 0 {
                    return Err(DecodeError::BadBinaryLength(declared));
                }
                let subtype = self.read_u8()?;
                let bytes = self.read_bytes(declared as usize)?.to_vec();
                Ok(Value::Binary { subtype, bytes })
            }
            // legacy undefined: surfaced as null rather than rejected
            element::UNDEFINED => Ok(Value::Null),
            element::BOOL => Ok(Value::Bool(self.read_u8()? != 0)),
            element::DATETIME => Ok(Value::DateTime(self.read_i64()?)),
            element::NULL => Ok(Value::Null),
            element::REGEX => {
                let pattern = self.read_cstring()?.to_string();
                let flags = self.read_cstring()?.to_string();
                Ok(Value::Regex { pattern, flags })
            }
            element::POINTER => {
                let namespace = self.read_string()?;
                let raw = self.read_bytes(12)?;
                let mut id = [0u8; 12];
                id.copy_from_slice(raw);
                Ok(Value::Pointer { namespace, id })
            }
            element::SYMBOL => Ok(Value::Symbol(self.read_string()?)),
            element::CODE_WITH_SCOPE => {
                let region_start = self.pos;
                let declared = self.read_i32()?;
                if declared < 4 {
                    return Err(DecodeError::InvalidLength(declared));
                }
                let code = self.read_string()?;
                let scope = self.read_document()?;
                let actual = self.pos - region_start;
                if actual != declared as usize {
                    return Err(DecodeError::LengthMismatch {
                        declared: declared as usize,
                        actual,
                    });
                }
                Ok(Value::CodeWithScope { code, scope })
            }
            element::INT32 => Ok(Value::Int32(self.read_i32()?)),
            element::TIMESTAMP => {
                let increment = self.read_i32()? as u32;
                let time = self.read_i32()? as u32;
                Ok(Value::Timestamp { time, increment })
            }
            element::INT64 => Ok(Value::Int64(self.read_i64()?)),
            other => Err(DecodeError::UnknownTypeTag {
                tag: other,
                key: key.to_string(),
            }),
        }
    }
}
