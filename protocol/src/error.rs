use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tri-state result attached to nearly every IcAPI call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ReturnCode {
    Ok = 0,
    Error = 1,
    Timeout = 2,
}

impl ReturnCode {
    /// Maps a raw return value. Anything besides 0, 1 and 2 is not a valid code.
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(ReturnCode::Ok),
            1 => Some(ReturnCode::Error),
            2 => Some(ReturnCode::Timeout),
            _ => None,
        }
    }

    pub fn raw(self) -> u16 {
        self as u16
    }
}

/// A string payload contained a byte outside the strict Latin-1 repertoire.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("invalid Latin-1 byte 0x{byte:02x} at offset {offset}")]
pub struct DecodeError {
    pub byte: u8,
    pub offset: usize,
}

/// A string cannot be represented in strict Latin-1.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("character {ch:?} at offset {offset} is not representable in Latin-1")]
pub struct EncodeError {
    pub ch: char,
    pub offset: usize,
}

/// The server reported an integer that does not map to a known enumeration value.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownValue {
    pub kind: String,
    pub value: i64,
}

impl UnknownValue {
    pub fn new<T: Into<i64>>(kind: &str, value: T) -> Self {
        Self {
            kind: kind.to_string(),
            value: value.into(),
        }
    }
}
