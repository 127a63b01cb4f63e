//! Heat pump register model
//!
//! A [`Register`] describes one addressable value on the heat pump: its bus address,
//! symbolic name, storage width and how raw little-endian bytes map to a typed [`Value`].
//! Registers are immutable once loaded and shared as `Arc<Register>`.

mod directory;

pub use directory::{DirectoryError, RegisterDirectory, RegisterRecord, BUILTIN_MODELS};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the value field in read-response and write-request frames
pub const RAW_VALUE_LEN: usize = 4;

/// Raw value as carried by a write request
pub type RawValue = [u8; RAW_VALUE_LEN];

/// Decoded register value as exchanged with the message bus
///
/// Serialized untagged, so JSON `1`, `21.5` and `"ECONOMY"` map directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

/// Storage width and signedness of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterSize {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
}

impl RegisterSize {
    /// Number of bytes the value occupies on the bus
    pub const fn width(self) -> usize {
        match self {
            RegisterSize::U8 | RegisterSize::S8 => 1,
            RegisterSize::U16 | RegisterSize::S16 => 2,
            RegisterSize::U32 | RegisterSize::S32 => 4,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, RegisterSize::S8 | RegisterSize::S16 | RegisterSize::S32)
    }

    /// Inclusive range of representable raw integers
    pub const fn bounds(self) -> (i64, i64) {
        match self {
            RegisterSize::U8 => (0, u8::MAX as i64),
            RegisterSize::S8 => (i8::MIN as i64, i8::MAX as i64),
            RegisterSize::U16 => (0, u16::MAX as i64),
            RegisterSize::S16 => (i16::MIN as i64, i16::MAX as i64),
            RegisterSize::U32 => (0, u32::MAX as i64),
            RegisterSize::S32 => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

/// Failure to turn raw bytes into a value
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Not enough bytes for the declared width; the batch decoder stitches on this
    #[error("register {address}: need {expected} bytes, got {actual}")]
    TooShort {
        address: u16,
        expected: usize,
        actual: usize,
    },

    #[error("register {address}: raw value {raw} has no mapping")]
    UnknownMapping { address: u16, raw: i64 },
}

/// Failure to turn a value into raw bytes for a write request
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("register {0} is read-only")]
    ReadOnly(String),

    #[error("register {name}: '{label}' is not one of its mapped values")]
    UnknownLabel { name: String, label: String },

    #[error("register {name}: '{text}' is not a number")]
    NotANumber { name: String, text: String },

    #[error("register {name}: raw value {raw} has no mapping")]
    UnmappedValue { name: String, raw: i64 },

    #[error("register {name}: raw value {raw} out of range [{min}, {max}]")]
    OutOfRange {
        name: String,
        raw: i64,
        min: i64,
        max: i64,
    },
}

/// Register descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub address: u16,
    pub name: String,
    pub title: String,
    pub size: RegisterSize,
    /// Raw integer is divided by this to get the engineering value
    pub factor: u32,
    pub unit: Option<String>,
    pub writable: bool,
    /// Raw integer to label, for enumerated registers
    pub mappings: BTreeMap<i64, String>,
}

impl Register {
    /// Read-only register with factor 1 and no mappings
    pub fn new(address: u16, name: impl Into<String>, size: RegisterSize) -> Self {
        let name = name.into();
        Self {
            address,
            title: name.clone(),
            name,
            size,
            factor: 1,
            unit: None,
            writable: false,
            mappings: BTreeMap::new(),
        }
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor.max(1);
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    pub fn with_mapping(mut self, raw: i64, label: impl Into<String>) -> Self {
        self.mappings.insert(raw, label.into());
        self
    }

    /// Decode little-endian raw bytes, reading `size.width()` bytes from the front
    pub fn decode(&self, raw: &[u8]) -> Result<Value, DecodeError> {
        let width = self.size.width();
        if raw.len() < width {
            return Err(DecodeError::TooShort {
                address: self.address,
                expected: width,
                actual: raw.len(),
            });
        }

        let bytes = &raw[..width];
        let integer = match self.size {
            RegisterSize::U8 => i64::from(bytes[0]),
            RegisterSize::S8 => i64::from(bytes[0] as i8),
            RegisterSize::U16 => i64::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            RegisterSize::S16 => i64::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            RegisterSize::U32 => {
                i64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            },
            RegisterSize::S32 => {
                i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            },
        };

        if !self.mappings.is_empty() {
            return self
                .mappings
                .get(&integer)
                .map(|label| Value::Text(label.clone()))
                .ok_or(DecodeError::UnknownMapping {
                    address: self.address,
                    raw: integer,
                });
        }

        if self.factor > 1 {
            Ok(Value::Float(integer as f64 / f64::from(self.factor)))
        } else {
            Ok(Value::Integer(integer))
        }
    }

    /// Encode a value into the 4-byte little-endian word of a write request
    pub fn encode(&self, value: &Value) -> Result<RawValue, EncodeError> {
        if !self.writable {
            return Err(EncodeError::ReadOnly(self.name.clone()));
        }

        let raw = match value {
            Value::Text(text) if !self.mappings.is_empty() => self
                .mappings
                .iter()
                .find(|(_, label)| label.eq_ignore_ascii_case(text.trim()))
                .map(|(raw, _)| *raw)
                .ok_or_else(|| EncodeError::UnknownLabel {
                    name: self.name.clone(),
                    label: text.clone(),
                })?,
            Value::Text(text) => {
                let number: f64 = text.trim().parse().map_err(|_| EncodeError::NotANumber {
                    name: self.name.clone(),
                    text: text.clone(),
                })?;
                self.scale(number, text)?
            },
            Value::Integer(v) => v.saturating_mul(i64::from(self.factor)),
            Value::Float(v) => self.scale(*v, &v.to_string())?,
        };

        if !self.mappings.is_empty() && !self.mappings.contains_key(&raw) {
            return Err(EncodeError::UnmappedValue {
                name: self.name.clone(),
                raw,
            });
        }

        let (min, max) = self.size.bounds();
        if raw < min || raw > max {
            return Err(EncodeError::OutOfRange {
                name: self.name.clone(),
                raw,
                min,
                max,
            });
        }

        // Signed widths travel sign-extended in the 32-bit word
        let word = if self.size.is_signed() {
            (raw as i32).to_le_bytes()
        } else {
            (raw as u32).to_le_bytes()
        };
        Ok(word)
    }

    /// Scale to the raw integer; `NaN` and infinities have none
    fn scale(&self, value: f64, text: &str) -> Result<i64, EncodeError> {
        let scaled = (value * f64::from(self.factor)).round();
        if !scaled.is_finite() {
            return Err(EncodeError::NotANumber {
                name: self.name.clone(),
                text: text.to_string(),
            });
        }
        Ok(scaled as i64)
    }
}
