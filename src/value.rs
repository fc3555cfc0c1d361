use crate::io_helper::{
    write_len_prefixed, write_signed_vbyte, write_vbyte, DataInputStream, InputStream,
};
use crate::Error;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Dynamic field value as it appears in stored documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(x) => Some(*x),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(x) => Some(*x as f64),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(s)
    }
}
impl From<i64> for Value {
    fn from(x: i64) -> Value {
        Value::Int(x)
    }
}
impl From<f64> for Value {
    fn from(x: f64) -> Value {
        Value::Float(x)
    }
}
impl From<bool> for Value {
    fn from(x: bool) -> Value {
        Value::Bool(x)
    }
}

const TAG_NULL: u8 = 0;
const TAG_BOOL_FALSE: u8 = 1;
const TAG_BOOL_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_STR: u8 = 6;
const TAG_LIST: u8 = 7;
const TAG_MAP: u8 = 8;

impl Value {
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self {
            Value::Null => out.write_all(&[TAG_NULL])?,
            Value::Bool(false) => out.write_all(&[TAG_BOOL_FALSE])?,
            Value::Bool(true) => out.write_all(&[TAG_BOOL_TRUE])?,
            Value::Int(x) => {
                out.write_all(&[TAG_INT])?;
                write_signed_vbyte(*x, out)?;
            }
            Value::Float(x) => {
                out.write_all(&[TAG_FLOAT])?;
                out.write_all(&x.to_bits().to_be_bytes())?;
            }
            Value::Bytes(b) => {
                out.write_all(&[TAG_BYTES])?;
                write_len_prefixed(b, out)?;
            }
            Value::Str(s) => {
                out.write_all(&[TAG_STR])?;
                write_len_prefixed(s.as_bytes(), out)?;
            }
            Value::List(items) => {
                out.write_all(&[TAG_LIST])?;
                write_vbyte(items.len() as u32, out)?;
                for item in items {
                    item.encode(out)?;
                }
            }
            Value::Map(entries) => {
                out.write_all(&[TAG_MAP])?;
                write_vbyte(entries.len() as u32, out)?;
                for (key, val) in entries {
                    write_len_prefixed(key.as_bytes(), out)?;
                    val.encode(out)?;
                }
            }
        }
        Ok(())
    }

    pub fn decode<I: InputStream>(input: &mut I) -> Result<Value, Error> {
        let tag = input.get()?;
        Ok(match tag {
            TAG_NULL => Value::Null,
            TAG_BOOL_FALSE => Value::Bool(false),
            TAG_BOOL_TRUE => Value::Bool(true),
            TAG_INT => Value::Int(input.read_signed_vbyte()?),
            TAG_FLOAT => Value::Float(f64::from_bits(input.read_u64()?)),
            TAG_BYTES => Value::Bytes(input.read_len_prefixed()?),
            TAG_STR => {
                let raw = input.read_len_prefixed()?;
                Value::Str(String::from_utf8(raw).map_err(|e| e.utf8_error())?)
            }
            TAG_LIST => {
                let n = input.read_vbyte()? as usize;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(Value::decode(input)?);
                }
                Value::List(items)
            }
            TAG_MAP => {
                let n = input.read_vbyte()? as usize;
                let mut entries = BTreeMap::new();
                for _ in 0..n {
                    let raw = input.read_len_prefixed()?;
                    let key = String::from_utf8(raw).map_err(|e| e.utf8_error())?;
                    entries.insert(key, Value::decode(input)?);
                }
                Value::Map(entries)
            }
            wat => return Err(Error::Corrupt(format!("bad value tag: {}", wat))),
        })
    }
}
