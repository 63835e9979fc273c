//! Bencode codec.
//!
//! Decoding is a single-pass recursive descent over a byte cursor. Strings are
//! surfaced as [`Value::Text`] when they are valid UTF-8 and as
//! [`Value::Bytes`] otherwise, so binary fields such as `pieces` survive a
//! decode/encode cycle untouched.
//!
//! Encoding is canonical: dictionary keys are emitted in byte-lexicographic
//! order, which is what makes info-hashes reproducible.

use std::{collections::BTreeMap, io::Write};

use crate::UTorrentError;

/// Nesting limit for lists and dictionaries.
const MAX_DEPTH: usize = 64;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `i<digits>e`
    Integer(i64),
    /// A byte string holding valid UTF-8.
    Text(String),
    /// A byte string that is not valid UTF-8.
    Bytes(Vec<u8>),
    /// `l ... e`
    List(Vec<Value>),
    /// `d ... e`, keyed by raw byte strings.
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Looks up `key` when this value is a dictionary.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(map) => map.get(key.as_bytes()),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string payload when it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the raw bytes of either kind of byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Text(s) => Some(s.as_bytes()),
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the list payload, if any.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the dictionary payload, if any.
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Builds a [`Value::Text`] or [`Value::Bytes`] depending on whether `raw` is UTF-8.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        match String::from_utf8(raw) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// One step of the decoder: either a complete value or the `e` terminator
/// closing the enclosing list or dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// A complete value.
    Value(Value),
    /// The `e` terminator.
    End,
}

/// A cursor over an encoded byte stream.
#[derive(Debug)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        let data: &'a [u8] = self.data;
        &data[self.pos..]
    }

    /// Consumes exactly one encoded value, or the terminator of the enclosing
    /// container, leaving the cursor right after it.
    pub fn next_item(&mut self) -> Result<Item, UTorrentError> {
        let tag = self.next_byte()?;
        match tag {
            b'e' => Ok(Item::End),
            b'i' => {
                let digits = self.take_until(b'e')?;
                parse_integer(digits).map(|n| Item::Value(Value::Integer(n)))
            }
            b'l' => {
                self.enter()?;
                let mut items = Vec::new();
                while let Item::Value(value) = self.next_item()? {
                    items.push(value);
                }
                self.depth -= 1;
                Ok(Item::Value(Value::List(items)))
            }
            b'd' => {
                self.enter()?;
                let mut map = BTreeMap::new();
                while let Item::Value(key) = self.next_item()? {
                    let key = match key {
                        Value::Text(s) => s.into_bytes(),
                        Value::Bytes(b) => b,
                        _ => return Err(malformed("dictionary key is not a string")),
                    };
                    match self.next_item()? {
                        Item::Value(value) => {
                            map.insert(key, value);
                        }
                        Item::End => return Err(malformed("dictionary key without a value")),
                    }
                }
                self.depth -= 1;
                Ok(Item::Value(Value::Dict(map)))
            }
            b'0'..=b'9' => {
                let rest = self.take_until(b':')?;
                let len_text = std::str::from_utf8(rest)
                    .map_err(|_| malformed("string length prefix is not numeric"))?;
                let mut len_digits = String::with_capacity(rest.len() + 1);
                len_digits.push(tag as char);
                len_digits.push_str(len_text);
                let len: usize = len_digits
                    .parse()
                    .map_err(|_| malformed("string length prefix is not numeric"))?;
                let end = self
                    .pos
                    .checked_add(len)
                    .filter(|end| *end <= self.data.len())
                    .ok_or_else(|| malformed("stream ended inside a string"))?;
                let raw = self.data[self.pos..end].to_vec();
                self.pos = end;
                Ok(Item::Value(Value::from_raw(raw)))
            }
            other => Err(malformed(&format!(
                "unexpected byte 0x{other:02x} at offset {}",
                self.pos - 1
            ))),
        }
    }

    fn next_byte(&mut self) -> Result<u8, UTorrentError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| malformed("stream ended mid-value"))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Returns the bytes up to `delimiter` and moves past the delimiter.
    fn take_until(&mut self, delimiter: u8) -> Result<&'a [u8], UTorrentError> {
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        let idx = rest
            .iter()
            .position(|b| *b == delimiter)
            .ok_or_else(|| malformed("missing terminator"))?;
        self.pos += idx + 1;
        Ok(&rest[..idx])
    }

    fn enter(&mut self) -> Result<(), UTorrentError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(malformed("nesting too deep"));
        }
        Ok(())
    }
}

fn parse_integer(digits: &[u8]) -> Result<i64, UTorrentError> {
    std::str::from_utf8(digits)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed("integer is not numeric"))
}

fn malformed(msg: &str) -> UTorrentError {
    UTorrentError::MalformedEncoding(msg.to_owned())
}

/// Decodes the first value in `data`. Trailing bytes are ignored.
pub fn decode(data: &[u8]) -> Result<Value, UTorrentError> {
    match Decoder::new(data).next_item()? {
        Item::Value(value) => Ok(value),
        Item::End => Err(malformed("unexpected end marker")),
    }
}

/// Encodes `value` canonically.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        // writing into a Vec cannot fail
        Value::Integer(n) => {
            let _ = write!(out, "i{n}e");
        }
        Value::Text(s) => encode_bytes(s.as_bytes(), out),
        Value::Bytes(b) => encode_bytes(b, out),
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(map) => {
            out.push(b'd');
            // BTreeMap<Vec<u8>, _> iterates in byte-lexicographic key order.
            for (key, item) in map {
                encode_bytes(key, out);
                encode_into(item, out);
            }
            out.push(b'e');
        }
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    let _ = write!(out, "{}:", bytes.len());
    out.extend_from_slice(bytes);
}
