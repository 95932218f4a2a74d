//! # Register Value Decoding
//!
//! Turns the raw byte span of one parameter into a scaled number.
//!
//! ## Supported Data Types
//!
//! | Type | Widths (bytes) | Catalog aliases |
//! |------|----------------|-----------------|
//! | unsigned | 1..=8 | int, uint, unsigned, u16, u32, u64 |
//! | signed | 1, 2, 4 | sint, signed, i16, i32 |
//! | float | ≥ 4 (first 4 bytes) | float, f32, float32, real |
//!
//! Decoding never yields a partial value: a span that cannot be interpreted
//! as the requested type is a [`MeterError::Decode`].

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::byte_order::{BytePermutation, MAX_VALUE_WIDTH};
use crate::error::{MeterError, MeterResult};

/// Declared interpretation of a parameter's registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// Unsigned big-endian integer of the span's width
    UnsignedInt,
    /// Two's-complement big-endian integer (1, 2 or 4 bytes)
    SignedInt,
    /// IEEE-754 single precision
    #[default]
    Float,
}

impl DataType {
    /// Whether a span of `width` bytes can be decoded as this type
    pub fn supports_width(&self, width: usize) -> bool {
        match self {
            DataType::UnsignedInt => (1..=MAX_VALUE_WIDTH).contains(&width),
            DataType::SignedInt => matches!(width, 1 | 2 | 4),
            DataType::Float => (4..=MAX_VALUE_WIDTH).contains(&width),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::UnsignedInt => "int",
            DataType::SignedInt => "sint",
            DataType::Float => "float",
        }
    }
}

impl FromStr for DataType {
    type Err = MeterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int" | "uint" | "unsigned" | "u16" | "uint16" | "u32" | "uint32" | "u64"
            | "uint64" => Ok(DataType::UnsignedInt),
            "sint" | "signed" | "i16" | "int16" | "i32" | "int32" => Ok(DataType::SignedInt),
            "float" | "f32" | "float32" | "real" => Ok(DataType::Float),
            _ => Err(MeterError::configuration(format!(
                "Unsupported data type: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Raw decoded value before scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    Unsigned(u64),
    Signed(i64),
    Float(f32),
}

impl RegisterValue {
    /// Convert to f64 for scaling
    pub fn as_f64(&self) -> f64 {
        match self {
            RegisterValue::Unsigned(v) => *v as f64,
            RegisterValue::Signed(v) => *v as f64,
            RegisterValue::Float(v) => *v as f64,
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Unsigned(v) => write!(f, "{}", v),
            RegisterValue::Signed(v) => write!(f, "{}", v),
            RegisterValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Decode a byte span into a [`RegisterValue`] without scaling.
///
/// # Example
///
/// ```rust
/// use voltage_meter_logger::{decode_raw, BytePermutation, DataType, RegisterValue};
///
/// let value = decode_raw(&[0xFF, 0x38], DataType::SignedInt, &BytePermutation::default()).unwrap();
/// assert_eq!(value, RegisterValue::Signed(-200));
/// ```
pub fn decode_raw(
    span: &[u8],
    data_type: DataType,
    byte_order: &BytePermutation,
) -> MeterResult<RegisterValue> {
    let width = span.len();
    if width == 0 {
        return Err(MeterError::decode("empty register span"));
    }
    if !data_type.supports_width(width) {
        return Err(MeterError::decode(format!(
            "{} cannot be decoded from {} bytes",
            data_type, width
        )));
    }

    let bytes = byte_order.reorder(span).ok_or_else(|| {
        MeterError::decode(format!(
            "byte order {} does not fit a {}-byte value",
            byte_order, width
        ))
    })?;
    let bytes = &bytes[..width];

    let value = match data_type {
        DataType::UnsignedInt => RegisterValue::Unsigned(
            bytes
                .iter()
                .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        ),
        DataType::SignedInt => RegisterValue::Signed(match width {
            1 => i64::from(bytes[0] as i8),
            2 => i64::from(i16::from_be_bytes([bytes[0], bytes[1]])),
            _ => i64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        }),
        DataType::Float => {
            RegisterValue::Float(f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
    };

    Ok(value)
}

/// Decode, scale and round a parameter span.
///
/// The result is rounded to 3 decimal places. NaN and infinite results are
/// rejected.
///
/// # Example
///
/// ```rust
/// use voltage_meter_logger::{decode_value, BytePermutation, DataType};
///
/// let order = BytePermutation::parse("3412").unwrap();
/// let volts = decode_value(&[0x00, 0x00, 0x43, 0x65], DataType::Float, &order, 1.0).unwrap();
/// assert_eq!(volts, 229.0);
/// ```
pub fn decode_value(
    span: &[u8],
    data_type: DataType,
    byte_order: &BytePermutation,
    scale: f64,
) -> MeterResult<f64> {
    let raw = decode_raw(span, data_type, byte_order)?;
    let scaled = round3(raw.as_f64() * scale);
    if !scaled.is_finite() {
        return Err(MeterError::decode(format!(
            "non-finite value {} (raw {})",
            scaled, raw
        )));
    }
    Ok(scaled)
}

/// Round to 3 decimal places
#[inline]
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
