//! Byte-level encoder and decoder underneath every codec.
//!
//! Scalars are written with bincode's standard configuration, so integers are
//! variable-length and small values (type tags, ids, counts) take one byte.

use crate::error::{DecodeError, EncodeError};
use bincode::config::{self, Configuration};
use serde::de::DeserializeOwned;
use serde::Serialize;

fn wire() -> Configuration {
    config::standard()
}

/// Append-only output buffer for one serialization stream.
#[derive(Debug, Default)]
pub struct StreamWriter {
    buf: Vec<u8>,
}

impl StreamWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    fn put<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), EncodeError> {
        bincode::serde::encode_into_std_write(value, &mut self.buf, wire())
            .map(|_| ())
            .map_err(|e| EncodeError::Stream(e.to_string()))
    }

    /// Writes a boolean.
    pub fn write_bool(&mut self, value: bool) -> Result<(), EncodeError> {
        self.put(&value)
    }

    /// Writes a single byte.
    pub fn write_byte(&mut self, value: u8) -> Result<(), EncodeError> {
        self.buf.push(value);
        Ok(())
    }

    /// Writes a signed 32-bit integer.
    pub fn write_int(&mut self, value: i32) -> Result<(), EncodeError> {
        self.put(&value)
    }

    /// Writes a signed 64-bit integer.
    pub fn write_long(&mut self, value: i64) -> Result<(), EncodeError> {
        self.put(&value)
    }

    /// Writes a 64-bit float.
    pub fn write_double(&mut self, value: f64) -> Result<(), EncodeError> {
        self.put(&value)
    }

    /// Writes a character.
    pub fn write_char(&mut self, value: char) -> Result<(), EncodeError> {
        self.put(&value)
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<(), EncodeError> {
        self.put(value)
    }

    /// Writes a length-prefixed byte blob.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        self.write_len(value.len())?;
        self.buf.extend_from_slice(value);
        Ok(())
    }

    /// Writes a collection size.
    pub fn write_len(&mut self, len: usize) -> Result<(), EncodeError> {
        self.put(&(len as u64))
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an encoded stream.
#[derive(Debug)]
pub struct StreamReader {
    data: Vec<u8>,
    pos: usize,
}

impl StreamReader {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    fn take<T: DeserializeOwned>(&mut self) -> Result<T, DecodeError> {
        if self.pos >= self.data.len() {
            return Err(DecodeError::UnexpectedEof { offset: self.pos });
        }
        let (value, read) = bincode::serde::decode_from_slice(&self.data[self.pos..], wire())
            .map_err(|e| DecodeError::Stream(e.to_string()))?;
        self.pos += read;
        Ok(value)
    }

    /// Reads a boolean.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        self.take()
    }

    /// Reads a single byte.
    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads a signed 32-bit integer.
    pub fn read_int(&mut self) -> Result<i32, DecodeError> {
        self.take()
    }

    /// Reads a signed 64-bit integer.
    pub fn read_long(&mut self) -> Result<i64, DecodeError> {
        self.take()
    }

    /// Reads a 64-bit float.
    pub fn read_double(&mut self) -> Result<f64, DecodeError> {
        self.take()
    }

    /// Reads a character.
    pub fn read_char(&mut self) -> Result<char, DecodeError> {
        self.take()
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        self.take()
    }

    /// Reads a length-prefixed byte blob.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_len()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::UnexpectedEof { offset: self.pos })?;
        let bytes = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(bytes)
    }

    /// Reads a collection size.
    pub fn read_len(&mut self) -> Result<usize, DecodeError> {
        let len: u64 = self.take()?;
        usize::try_from(len).map_err(|_| DecodeError::UnexpectedDiscriminant {
            what: "collection size",
            value: len as i64,
        })
    }

    /// Returns the current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}
