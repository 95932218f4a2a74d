//! # Byte Order Permutations
//!
//! Meters rarely agree on how a multi-register value is laid out on the wire.
//! Instead of a fixed set of named orders, each parameter carries a
//! permutation of 1-based source byte positions that maps the device's byte
//! stream onto standard big-endian order.
//!
//! ## Notation
//!
//! Digits name source bytes, one per output byte:
//!
//! | Permutation | Letters | Input `[b0 b1 b2 b3]` becomes |
//! |-------------|---------|-------------------------------|
//! | `1234` | ABCD | `[b0 b1 b2 b3]` (big-endian) |
//! | `3412` | CDAB | `[b2 b3 b0 b1]` (word swap, very common) |
//! | `2143` | BADC | `[b1 b0 b3 b2]` (byte swap) |
//! | `4321` | DCBA | `[b3 b2 b1 b0]` (little-endian) |
//!
//! A permutation shorter than the value width falls back to identity, so the
//! catalog default `1234` also serves 8-byte values.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

/// Widest value a permutation can describe (4 registers)
pub const MAX_VALUE_WIDTH: usize = 8;

/// Byte-order permutation of 1-based source positions.
///
/// # Example
///
/// ```rust
/// use voltage_meter_logger::BytePermutation;
///
/// let order = BytePermutation::parse("3412").unwrap();
/// let out = order.reorder(&[0x00, 0x00, 0x43, 0x65]).unwrap();
/// assert_eq!(&out[..4], &[0x43, 0x65, 0x00, 0x00]);
/// assert_eq!(BytePermutation::parse("CDAB"), Some(order));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BytePermutation {
    positions: [u8; MAX_VALUE_WIDTH],
    len: u8,
}

impl BytePermutation {
    /// Build from 1-based positions. Rejects empty, oversized, out-of-range
    /// and repeated positions.
    pub fn new(positions: &[u8]) -> Option<Self> {
        if positions.is_empty() || positions.len() > MAX_VALUE_WIDTH {
            return None;
        }

        let mut seen = [false; MAX_VALUE_WIDTH];
        let mut buf = [0u8; MAX_VALUE_WIDTH];
        for (i, &pos) in positions.iter().enumerate() {
            if pos == 0 || pos as usize > MAX_VALUE_WIDTH || seen[pos as usize - 1] {
                return None;
            }
            seen[pos as usize - 1] = true;
            buf[i] = pos;
        }

        Some(Self {
            positions: buf,
            len: positions.len() as u8,
        })
    }

    /// Parse digit (`"3412"`, `"3,4,1,2"`) or letter (`"CDAB"`) notation.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: Vec<char> = s
            .chars()
            .filter(|c| !matches!(c, ',' | '-' | '_' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.is_empty() {
            return None;
        }

        let positions: Option<Vec<u8>> = if normalized.iter().all(char::is_ascii_digit) {
            normalized
                .iter()
                .map(|c| c.to_digit(10).map(|d| d as u8))
                .collect()
        } else {
            normalized
                .iter()
                .map(|&c| match c {
                    'A'..='H' => Some(c as u8 - b'A' + 1),
                    _ => None,
                })
                .collect()
        };

        Self::new(&positions?)
    }

    /// Parse the integer form used by catalogs (`endian: 3412`).
    pub fn from_number(value: u64) -> Option<Self> {
        Self::parse(&value.to_string())
    }

    /// The 1-based positions as given
    #[inline]
    pub fn positions(&self) -> &[u8] {
        &self.positions[..self.len as usize]
    }

    /// Number of positions in the permutation
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Never true for a constructed permutation
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Positions that apply to a value of `width` bytes, or `None` when the
    /// permutation is too short and identity order applies.
    fn effective(&self, width: usize) -> Option<&[u8]> {
        if self.len() < width {
            None
        } else {
            Some(&self.positions[..width])
        }
    }

    /// Whether every applicable position lies inside a `width`-byte value.
    pub fn fits(&self, width: usize) -> bool {
        if width == 0 || width > MAX_VALUE_WIDTH {
            return false;
        }
        match self.effective(width) {
            None => true,
            Some(positions) => positions.iter().all(|&p| p as usize <= width),
        }
    }

    /// Reorder `input` into big-endian order.
    ///
    /// Only the first `input.len()` bytes of the result are meaningful.
    /// Returns `None` for an empty or oversized input, or when a position
    /// points past the end of `input`.
    pub fn reorder(&self, input: &[u8]) -> Option<[u8; MAX_VALUE_WIDTH]> {
        let width = input.len();
        if !self.fits(width) {
            return None;
        }

        let mut out = [0u8; MAX_VALUE_WIDTH];
        match self.effective(width) {
            None => out[..width].copy_from_slice(input),
            Some(positions) => {
                for (slot, &pos) in out.iter_mut().zip(positions) {
                    *slot = input[pos as usize - 1];
                }
            }
        }
        Some(out)
    }
}

impl Default for BytePermutation {
    /// `1234`, which degrades to identity for every width.
    fn default() -> Self {
        Self {
            positions: [1, 2, 3, 4, 0, 0, 0, 0],
            len: 4,
        }
    }
}

impl fmt::Display for BytePermutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pos in self.positions() {
            write!(f, "{}", pos)?;
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for BytePermutation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PermutationVisitor;

        impl Visitor<'_> for PermutationVisitor {
            type Value = BytePermutation;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte order such as 1234, \"3412\" or \"CDAB\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                BytePermutation::from_number(v)
                    .ok_or_else(|| E::custom(format!("invalid byte order: {}", v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom(format!("invalid byte order: {}", v)))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                BytePermutation::parse(v)
                    .ok_or_else(|| E::custom(format!("invalid byte order: {:?}", v)))
            }
        }

        deserializer.deserialize_any(PermutationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_swap_worked_example() {
        let order = BytePermutation::parse("3,4,1,2").unwrap();
        let out = order.reorder(&[0x00, 0x00, 0x43, 0x65]).unwrap();
        assert_eq!(&out[..4], &[0x43, 0x65, 0x00, 0x00]);
    }

    #[test]
    fn test_notations_agree() {
        let digits = BytePermutation::parse("2143").unwrap();
        assert_eq!(BytePermutation::parse("BADC"), Some(digits));
        assert_eq!(BytePermutation::parse("ba-dc"), Some(digits));
        assert_eq!(BytePermutation::from_number(2143), Some(digits));
        assert_eq!(digits.to_string(), "2143");
    }

    #[test]
    fn test_common_orders_on_four_bytes() {
        let input = [0x12, 0x34, 0x56, 0x78];
        let cases = [
            ("1234", [0x12, 0x34, 0x56, 0x78]),
            ("4321", [0x78, 0x56, 0x34, 0x12]),
            ("3412", [0x56, 0x78, 0x12, 0x34]),
            ("2143", [0x34, 0x12, 0x78, 0x56]),
        ];
        for (perm, expected) in cases {
            let out = BytePermutation::parse(perm).unwrap().reorder(&input).unwrap();
            assert_eq!(&out[..4], &expected, "permutation {}", perm);
        }
    }

    #[test]
    fn test_two_and_eight_byte_spans() {
        let swap = BytePermutation::parse("21").unwrap();
        assert_eq!(&swap.reorder(&[0xAB, 0xCD]).unwrap()[..2], &[0xCD, 0xAB]);

        let words = BytePermutation::parse("78563412").unwrap();
        let out = words
            .reorder(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08])
            .unwrap();
        assert_eq!(out, [0x07, 0x08, 0x05, 0x06, 0x03, 0x04, 0x01, 0x02]);
    }

    #[test]
    fn test_short_permutation_is_identity() {
        let order = BytePermutation::default();
        let input = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(order.reorder(&input).unwrap(), input);

        // "21" is too short for a 4-byte value
        let swap = BytePermutation::parse("21").unwrap();
        assert_eq!(&swap.reorder(&[9, 8, 7, 6]).unwrap()[..4], &[9, 8, 7, 6]);
    }

    #[test]
    fn test_positions_outside_width_are_rejected() {
        // First two positions of "3412" point past a 2-byte value
        let order = BytePermutation::parse("3412").unwrap();
        assert!(!order.fits(2));
        assert!(order.reorder(&[0x12, 0x34]).is_none());
        assert!(order.fits(4));
    }

    #[test]
    fn test_invalid_permutations() {
        assert!(BytePermutation::parse("").is_none());
        assert!(BytePermutation::parse("1134").is_none());
        assert!(BytePermutation::parse("0123").is_none());
        assert!(BytePermutation::parse("9").is_none());
        assert!(BytePermutation::parse("ABCX").is_none());
        assert!(BytePermutation::parse("123456789").is_none());
    }

    #[test]
    fn test_reorder_rejects_bad_widths() {
        let order = BytePermutation::default();
        assert!(order.reorder(&[]).is_none());
        assert!(order.reorder(&[0u8; 9]).is_none());
    }

    #[test]
    fn test_deserialize_number_and_string() {
        let from_int: BytePermutation = serde_json::from_str("3412").unwrap();
        let from_str: BytePermutation = serde_json::from_str("\"CDAB\"").unwrap();
        assert_eq!(from_int, from_str);
        assert!(serde_json::from_str::<BytePermutation>("1134").is_err());
        assert!(serde_json::from_str::<BytePermutation>("-1").is_err());
    }
}
