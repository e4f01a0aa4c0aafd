//! Bencode, the dictionary encoding torrents are written in.
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` |
//! | Byte string | `<length>:<data>` | `4:spam` |
//! | List | `l<items>e` | `l4:spami42ee` |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` |
//!
//! Dictionaries are held in a `BTreeMap`, so encoding always writes keys in
//! byte order whatever order they were inserted in. That makes the output
//! canonical, which matters because the info dictionary's bytes are hashed.
//!
//! ```
//! use orphtor_core::bencode::{encode, Value};
//! use std::collections::BTreeMap;
//!
//! let mut dict = BTreeMap::new();
//! dict.insert(b"b".to_vec(), Value::Integer(2));
//! dict.insert(b"a".to_vec(), Value::string("x"));
//! assert_eq!(encode(&Value::Dict(dict)), b"d1:a1:x1:bi2ee");
//! ```

use std::collections::BTreeMap;
use std::ops::Range;

use thiserror::Error;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("unexpected end of input at byte {0}")]
    UnexpectedEof(usize),

    #[error("invalid integer at byte {0}")]
    InvalidInteger(usize),

    #[error("invalid string length at byte {0}")]
    InvalidStringLength(usize),

    #[error("unexpected character {0:?} at byte {1}")]
    UnexpectedChar(char, usize),

    #[error("duplicate dictionary key at byte {0}")]
    DuplicateKey(usize),

    #[error("trailing data after value at byte {0}")]
    TrailingData(usize),

    #[error("nesting too deep")]
    NestingTooDeep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
    /// Already-encoded bencode written out verbatim. Lets a sub-structure be
    /// hashed and embedded from the very same bytes. Never produced by [`decode`].
    Raw(Vec<u8>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::Bytes(s.into().into_bytes())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }
}

pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_bytes(b: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(b);
}

pub fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Integer(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(b) => encode_bytes(b, out),
        Value::List(l) => {
            out.push(b'l');
            for item in l {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(d) => {
            out.push(b'd');
            for (k, v) in d {
                encode_bytes(k, out);
                encode_into(v, out);
            }
            out.push(b'e');
        }
        Value::Raw(raw) => out.extend_from_slice(raw),
    }
}

/// Decodes exactly one value; anything after it is an error.
pub fn decode(input: &[u8]) -> Result<Value, BencodeError> {
    let mut p = Parser { input, pos: 0 };
    let v = p.value(0)?;
    if p.pos != input.len() {
        return Err(BencodeError::TrailingData(p.pos));
    }
    Ok(v)
}

/// Raw bytes of `key`'s value in a top-level dictionary, exactly as they sit
/// in `input`. Used to hash an embedded info dictionary without re-encoding.
pub fn dict_entry_raw<'a>(input: &'a [u8], key: &[u8]) -> Result<Option<&'a [u8]>, BencodeError> {
    let mut p = Parser { input, pos: 0 };
    p.expect(b'd')?;
    let mut found = None;
    while p.peek()? != b'e' {
        let k = p.bytes()?;
        let span = p.skip(1)?;
        if k == key {
            found = Some(&input[span]);
        }
    }
    p.pos += 1;
    if p.pos != input.len() {
        return Err(BencodeError::TrailingData(p.pos));
    }
    Ok(found)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.input.get(self.pos).copied().ok_or(BencodeError::UnexpectedEof(self.pos))
    }

    fn expect(&mut self, c: u8) -> Result<(), BencodeError> {
        let got = self.peek()?;
        if got != c {
            return Err(BencodeError::UnexpectedChar(got as char, self.pos));
        }
        self.pos += 1;
        Ok(())
    }

    fn integer(&mut self) -> Result<i64, BencodeError> {
        let start = self.pos;
        self.expect(b'i')?;
        let end = self.input[self.pos..]
            .iter()
            .position(|&c| c == b'e')
            .map(|n| self.pos + n)
            .ok_or(BencodeError::UnexpectedEof(self.input.len()))?;
        let digits = &self.input[self.pos..end];
        let magnitude = digits.strip_prefix(b"-").unwrap_or(digits);
        let canonical = !magnitude.is_empty()
            && magnitude.iter().all(u8::is_ascii_digit)
            && !(magnitude[0] == b'0' && (magnitude.len() > 1 || magnitude.len() < digits.len()));
        if !canonical {
            return Err(BencodeError::InvalidInteger(start));
        }
        let n = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(BencodeError::InvalidInteger(start))?;
        self.pos = end + 1;
        Ok(n)
    }

    fn bytes(&mut self) -> Result<&'a [u8], BencodeError> {
        let start = self.pos;
        let colon = self.input[self.pos..]
            .iter()
            .position(|&c| c == b':')
            .map(|n| self.pos + n)
            .ok_or(BencodeError::UnexpectedEof(self.input.len()))?;
        let digits = &self.input[self.pos..colon];
        if digits.is_empty()
            || !digits.iter().all(u8::is_ascii_digit)
            || (digits.len() > 1 && digits[0] == b'0')
        {
            return Err(BencodeError::InvalidStringLength(start));
        }
        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::InvalidStringLength(start))?;
        let body = colon + 1;
        let end = body.checked_add(len).ok_or(BencodeError::InvalidStringLength(start))?;
        if end > self.input.len() {
            return Err(BencodeError::UnexpectedEof(self.input.len()));
        }
        self.pos = end;
        Ok(&self.input[body..end])
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }
        match self.peek()? {
            b'i' => Ok(Value::Integer(self.integer()?)),
            b'0'..=b'9' => Ok(Value::Bytes(self.bytes()?.to_vec())),
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut dict = BTreeMap::new();
                while self.peek()? != b'e' {
                    let at = self.pos;
                    let k = self.bytes()?.to_vec();
                    let v = self.value(depth + 1)?;
                    if dict.insert(k, v).is_some() {
                        return Err(BencodeError::DuplicateKey(at));
                    }
                }
                self.pos += 1;
                Ok(Value::Dict(dict))
            }
            c => Err(BencodeError::UnexpectedChar(c as char, self.pos)),
        }
    }

    /// Skips one value, returning the range it occupied.
    fn skip(&mut self, depth: usize) -> Result<Range<usize>, BencodeError> {
        let start = self.pos;
        self.value(depth)?;
        Ok(start..self.pos)
    }
}
