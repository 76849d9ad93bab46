use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Scalar GGUF metadata values kept by the header probe.
///
/// Arrays (vocabularies, merges, score tables) are skipped while probing,
/// so only scalar variants exist here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GGUFValue {
    /// String value type for text data
    String(String),
    /// Integer value type for whole numbers, stored as i64
    Int(i64),
    /// Float value type for decimal numbers, stored as f32
    Float(f32),
    /// Boolean value type for true/false values
    Bool(bool),
}

impl GGUFValue {
    /// Attempts to convert the value to an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            GGUFValue::Int(i) => Some(*i),
            GGUFValue::Float(f) => Some(*f as i64),
            GGUFValue::String(s) => s.parse().ok(),
            GGUFValue::Bool(_) => None,
        }
    }

    /// Borrows the value as a string slice when it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GGUFValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric code of the value type in the GGUF format
    pub(crate) fn type_code(&self) -> u32 {
        match self {
            GGUFValue::String(_) => GGUF_TYPE_STRING,
            GGUFValue::Int(_) => GGUF_TYPE_INT64,
            GGUFValue::Float(_) => GGUF_TYPE_FLOAT32,
            GGUFValue::Bool(_) => GGUF_TYPE_BOOL,
        }
    }
}

impl fmt::Display for GGUFValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GGUFValue::String(s) => write!(f, "{}", s),
            GGUFValue::Int(i) => write!(f, "{}", i),
            GGUFValue::Float(fl) => write!(f, "{}", fl),
            GGUFValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Errors raised while probing a GGUF file
#[derive(Debug, Error)]
pub enum GGUFError {
    /// Wraps std::io::Error for file operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    /// Invalid format errors with a message
    #[error("Invalid GGUF format: {0}")]
    InvalidFormat(String),
    /// Header version this reader does not understand
    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
}

// Value type identifiers from the GGUF format
pub(crate) const GGUF_TYPE_UINT8: u32 = 0;
pub(crate) const GGUF_TYPE_INT8: u32 = 1;
pub(crate) const GGUF_TYPE_UINT16: u32 = 2;
pub(crate) const GGUF_TYPE_INT16: u32 = 3;
pub(crate) const GGUF_TYPE_UINT32: u32 = 4;
pub(crate) const GGUF_TYPE_INT32: u32 = 5;
pub(crate) const GGUF_TYPE_FLOAT32: u32 = 6;
pub(crate) const GGUF_TYPE_BOOL: u32 = 7;
pub(crate) const GGUF_TYPE_STRING: u32 = 8;
pub(crate) const GGUF_TYPE_ARRAY: u32 = 9;
pub(crate) const GGUF_TYPE_UINT64: u32 = 10;
pub(crate) const GGUF_TYPE_INT64: u32 = 11;
pub(crate) const GGUF_TYPE_FLOAT64: u32 = 12;
