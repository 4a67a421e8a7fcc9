//! Closed tagged-value format used by object reads and writes
//!
//! ```text
//! Null   = 0x00
//! Bool   = 0x01 u8
//! Int    = 0x02 i32
//! Long   = 0x03 i64
//! Text   = 0x04 u32 len, UTF-8
//! Bytes  = 0x05 u32 len, raw
//! List   = 0x06 u32 count, values
//! Map    = 0x07 u32 count, (text key, value) pairs
//! Record = 0x08 text class, u32 count, (text field, value) pairs
//! ```
//!
//! Integers are big-endian. Only these shapes can be decoded at all; a record's
//! class is passed to the [`ClassFilter`] before its fields are read.

use crate::error::ChannelError;
use crate::filter::ClassFilter;
use crate::MAX_VALUE_DEPTH;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_LONG: u8 = 0x03;
const TAG_TEXT: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_LIST: u8 = 0x06;
const TAG_MAP: u8 = 0x07;
const TAG_RECORD: u8 = 0x08;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Record {
        class: String,
        fields: BTreeMap<String, Value>,
    },
}

impl Value {
    /// Convenience constructor for a record
    pub fn record<I, K>(class: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Record {
            class: class.into(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Value::Null => buf.put_u8(TAG_NULL),
            Value::Bool(b) => {
                buf.put_u8(TAG_BOOL);
                buf.put_u8(*b as u8);
            }
            Value::Int(i) => {
                buf.put_u8(TAG_INT);
                buf.put_i32(*i);
            }
            Value::Long(l) => {
                buf.put_u8(TAG_LONG);
                buf.put_i64(*l);
            }
            Value::Text(s) => {
                buf.put_u8(TAG_TEXT);
                put_text(buf, s);
            }
            Value::Bytes(b) => {
                buf.put_u8(TAG_BYTES);
                buf.put_u32(b.len() as u32);
                buf.put_slice(b);
            }
            Value::List(items) => {
                buf.put_u8(TAG_LIST);
                buf.put_u32(items.len() as u32);
                for item in items {
                    item.encode_into(buf);
                }
            }
            Value::Map(entries) => {
                buf.put_u8(TAG_MAP);
                put_entries(buf, entries);
            }
            Value::Record { class, fields } => {
                buf.put_u8(TAG_RECORD);
                put_text(buf, class);
                put_entries(buf, fields);
            }
        }
    }

    /// Decode one value, consulting `filter` for every record class
    ///
    /// Trailing bytes after the value are an error.
    pub fn decode(mut src: Bytes, filter: &ClassFilter) -> Result<Self, ChannelError> {
        let value = Decoder { filter }.value(&mut src, 0)?;
        if src.has_remaining() {
            return Err(ChannelError::MalformedObject(format!(
                "{} trailing bytes",
                src.remaining()
            )));
        }
        Ok(value)
    }
}

fn put_text(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_entries(buf: &mut BytesMut, entries: &BTreeMap<String, Value>) {
    buf.put_u32(entries.len() as u32);
    for (key, value) in entries {
        put_text(buf, key);
        value.encode_into(buf);
    }
}

fn short(what: &str) -> ChannelError {
    ChannelError::MalformedObject(format!("truncated {}", what))
}

struct Decoder<'a> {
    filter: &'a ClassFilter,
}

impl Decoder<'_> {
    fn value(&self, src: &mut Bytes, depth: usize) -> Result<Value, ChannelError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(ChannelError::MalformedObject(format!(
                "nesting deeper than {}",
                MAX_VALUE_DEPTH
            )));
        }
        if !src.has_remaining() {
            return Err(short("tag"));
        }

        let value = match src.get_u8() {
            TAG_NULL => Value::Null,
            TAG_BOOL => {
                if src.remaining() < 1 {
                    return Err(short("bool"));
                }
                Value::Bool(src.get_u8() != 0)
            }
            TAG_INT => {
                if src.remaining() < 4 {
                    return Err(short("int"));
                }
                Value::Int(src.get_i32())
            }
            TAG_LONG => {
                if src.remaining() < 8 {
                    return Err(short("long"));
                }
                Value::Long(src.get_i64())
            }
            TAG_TEXT => Value::Text(self.text(src)?),
            TAG_BYTES => {
                let len = self.length(src, "bytes")?;
                Value::Bytes(src.split_to(len).to_vec())
            }
            TAG_LIST => {
                let count = self.count(src)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.value(src, depth + 1)?);
                }
                Value::List(items)
            }
            TAG_MAP => Value::Map(self.entries(src, depth)?),
            TAG_RECORD => {
                let class = self.text(src)?;
                self.filter.check(&class)?;
                let fields = self.entries(src, depth)?;
                Value::Record { class, fields }
            }
            other => {
                return Err(ChannelError::SecurityViolation {
                    class: format!("<tag {:#04x}>", other),
                })
            }
        };
        Ok(value)
    }

    /// A u32 length that must fit in what is left of `src`
    fn length(&self, src: &mut Bytes, what: &str) -> Result<usize, ChannelError> {
        if src.remaining() < 4 {
            return Err(short(what));
        }
        let len = src.get_u32() as usize;
        if len > src.remaining() {
            return Err(short(what));
        }
        Ok(len)
    }

    /// An element count; every element takes at least one byte
    fn count(&self, src: &mut Bytes) -> Result<usize, ChannelError> {
        self.length(src, "collection")
    }

    fn text(&self, src: &mut Bytes) -> Result<String, ChannelError> {
        let len = self.length(src, "text")?;
        String::from_utf8(src.split_to(len).to_vec()).map_err(|_| ChannelError::InvalidUtf8)
    }

    fn entries(
        &self,
        src: &mut Bytes,
        depth: usize,
    ) -> Result<BTreeMap<String, Value>, ChannelError> {
        let count = self.count(src)?;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let key = self.text(src)?;
            let value = self.value(src, depth + 1)?;
            entries.insert(key, value);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ClassFilter {
        ClassFilter::standard().allow("hudson.model.Result")
    }

    #[test]
    fn test_nested_value() {
        let mut map = BTreeMap::new();
        map.insert("count".to_string(), Value::Long(7));
        map.insert("tags".to_string(), Value::List(vec![Value::Text("a".into()), Value::Null]));
        let value = Value::List(vec![
            Value::Map(map),
            Value::record("hudson.model.Result", [("ordinal", Value::Int(2))]),
            Value::Bytes(vec![1, 2, 3]),
            Value::Bool(true),
        ]);

        assert_eq!(Value::decode(value.encode(), &filter()).unwrap(), value);
    }

    #[test]
    fn test_denied_record_fields_are_never_read() {
        // A record whose field section is garbage: the class check must fail first.
        let mut buf = BytesMut::new();
        buf.put_u8(TAG_RECORD);
        put_text(&mut buf, "org.codehaus.groovy.runtime.MethodClosure");
        buf.put_slice(&[0xff, 0xff, 0xff, 0xff, 0xee]);

        let err = Value::decode(buf.freeze(), &filter()).unwrap_err();
        match err {
            ChannelError::SecurityViolation { class } => {
                assert_eq!(class, "org.codehaus.groovy.runtime.MethodClosure")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = Value::decode(Bytes::from_static(&[0x42]), &filter()).unwrap_err();
        assert!(err.is_security_violation());
        assert!(err.to_string().contains("0x42"));
    }

    #[test]
    fn test_depth_limit() {
        let mut value = Value::Null;
        for _ in 0..(MAX_VALUE_DEPTH + 2) {
            value = Value::List(vec![value]);
        }

        let err = Value::decode(value.encode(), &filter()).unwrap_err();
        assert!(matches!(err, ChannelError::MalformedObject(_)));
    }

    #[test]
    fn test_truncated_and_trailing() {
        let encoded = Value::Text("hello".into()).encode();

        let err = Value::decode(encoded.slice(..encoded.len() - 1), &filter()).unwrap_err();
        assert!(matches!(err, ChannelError::MalformedObject(_)));

        let mut padded = BytesMut::from(&encoded[..]);
        padded.put_u8(0);
        let err = Value::decode(padded.freeze(), &filter()).unwrap_err();
        assert!(matches!(err, ChannelError::MalformedObject(_)));
    }
}
