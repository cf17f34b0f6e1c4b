//! Strict Latin-1 (ISO/IEC 8859-1) codec for the strings exchanged with the server.
//!
//! Every byte maps to the code point of the same value, but only the graphic
//! characters of the standard plus TAB, LF and CR are accepted. C0 controls, DEL
//! and the unassigned range 0x80..=0x9F are rejected. These bytes typically show up
//! when a server writes Windows-1252 or UTF-8 into a Latin-1 field.

use std::convert::TryFrom;
use std::fmt::{self, Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};

pub fn is_strict(byte: u8) -> bool {
    matches!(byte, b'\t' | b'\n' | b'\r' | 0x20..=0x7E | 0xA0..=0xFF)
}

pub fn decode_strict(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut ret = String::with_capacity(bytes.len());
    for (offset, byte) in bytes.iter().copied().enumerate() {
        if !is_strict(byte) {
            return Err(DecodeError { byte, offset });
        }
        ret.push(char::from(byte));
    }
    Ok(ret)
}

pub fn encode_strict(data: &str) -> Result<Vec<u8>, EncodeError> {
    data.chars()
        .enumerate()
        .map(|(offset, ch)| {
            let code = ch as u32;
            if code <= 0xFF && is_strict(code as u8) {
                Ok(code as u8)
            } else {
                Err(EncodeError { ch, offset })
            }
        })
        .collect()
}

/// Undecoded Latin-1 bytes as handed out by a transport.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Latin1(Vec<u8>);

impl Latin1 {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Takes the contents of a fixed-size, NUL-terminated C buffer. Bytes after the
    /// first NUL are ignored.
    pub fn from_c_buffer(buf: &[u8]) -> Self {
        let end = buf.iter().position(|x| *x == 0).unwrap_or(buf.len());
        Self(buf[..end].to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn decode(&self) -> Result<String, DecodeError> {
        decode_strict(&self.0)
    }
}

impl From<Vec<u8>> for Latin1 {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl From<&[u8]> for Latin1 {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl TryFrom<&str> for Latin1 {
    type Error = EncodeError;

    fn try_from(data: &str) -> Result<Self, EncodeError> {
        encode_strict(data).map(Self)
    }
}

impl Debug for Latin1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let escaped: String = self
            .0
            .iter()
            .flat_map(|x| std::ascii::escape_default(*x))
            .map(char::from)
            .collect();
        write!(f, "Latin1(\"{}\")", escaped)
    }
}
