//! Lossy fixed-point codec for transaction amounts
//!
//! An encoded amount is `exponent << mantissa_bits | mantissa` and decodes to
//! `mantissa * 10^exponent` base units. The engine only ever does arithmetic
//! on decoded integers; encoding happens when transactions are serialised.

use serde::{Deserialize, Serialize};

use crate::error::EncodingError;

/// Mantissa/exponent layout plus the number of decimals of the token
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecimalCodec {
    exponent_bits: u32,
    mantissa_bits: u32,
    place: u32,
}

impl DecimalCodec {
    /// 16-bit layout used for USDT-style tokens with 6 decimals
    pub const USDT: Self = Self {
        exponent_bits: 4,
        mantissa_bits: 12,
        place: 6,
    };

    /// Create a codec. The two widths must fill whole bytes, at most eight.
    pub fn new(exponent_bits: u32, mantissa_bits: u32, place: u32) -> Result<Self, EncodingError> {
        let total = exponent_bits + mantissa_bits;
        if exponent_bits == 0
            || exponent_bits > 8
            || mantissa_bits == 0
            || total % 8 != 0
            || total > 64
        {
            return Err(EncodingError::InvalidLayout {
                exponent_bits,
                mantissa_bits,
            });
        }
        // 10^place must fit in u128
        if place > 38 {
            return Err(EncodingError::Overflow);
        }
        Ok(Self {
            exponent_bits,
            mantissa_bits,
            place,
        })
    }

    /// Decimals of the human representation
    pub fn place(&self) -> u32 {
        self.place
    }

    /// Size of one encoded amount on the wire
    pub fn bytes_len(&self) -> usize {
        ((self.exponent_bits + self.mantissa_bits) / 8) as usize
    }

    /// Largest mantissa, `2^m - 1`
    pub fn mantissa_max(&self) -> u128 {
        (1u128 << self.mantissa_bits) - 1
    }

    /// Largest exponent, `2^e - 1`
    pub fn exponent_max(&self) -> u32 {
        (1u32 << self.exponent_bits) - 1
    }

    /// Encode an integer amount exactly, or fail.
    ///
    /// Trailing factors of ten move into the exponent, at most
    /// `exponent_max` of them.
    pub fn encode_int(&self, value: u128) -> Result<u64, EncodingError> {
        let mut mantissa = value;
        let mut exponent = 0u32;
        while exponent < self.exponent_max() && mantissa != 0 && mantissa % 10 == 0 {
            mantissa /= 10;
            exponent += 1;
        }
        if mantissa > self.mantissa_max() {
            return Err(EncodingError::MantissaOverflow {
                value,
                mantissa,
                max: self.mantissa_max(),
            });
        }
        Ok(((exponent as u64) << self.mantissa_bits) | mantissa as u64)
    }

    /// Inverse of [`Self::encode_int`]
    pub fn decode_int(&self, encoded: u64) -> Result<u128, EncodingError> {
        let total = self.exponent_bits + self.mantissa_bits;
        if total < 64 && encoded >> total != 0 {
            return Err(EncodingError::Overflow);
        }
        let mantissa = u128::from(encoded) & self.mantissa_max();
        let exponent = (encoded >> self.mantissa_bits) as u32 & self.exponent_max();
        10u128
            .checked_pow(exponent)
            .and_then(|scale| mantissa.checked_mul(scale))
            .ok_or(EncodingError::Overflow)
    }

    /// Whether `value` survives an encode/decode cycle
    pub fn is_encodable(&self, value: u128) -> bool {
        self.encode_int(value).is_ok()
    }

    /// Round `value` down to the nearest encodable amount
    pub fn cast(&self, value: u128) -> Result<u128, EncodingError> {
        let mut mantissa = value;
        let mut exponent = 0u32;
        while mantissa > self.mantissa_max() && exponent < self.exponent_max() {
            mantissa /= 10;
            exponent += 1;
        }
        if mantissa > self.mantissa_max() {
            return Err(EncodingError::Overflow);
        }
        Ok(mantissa * 10u128.pow(exponent))
    }

    /// Encode to the big-endian wire form
    pub fn encode_bytes(&self, value: u128) -> Result<Vec<u8>, EncodingError> {
        let encoded = self.encode_int(value)?.to_be_bytes();
        Ok(encoded[8 - self.bytes_len()..].to_vec())
    }

    /// Decode the big-endian wire form
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<u128, EncodingError> {
        if bytes.len() != self.bytes_len() {
            return Err(EncodingError::InvalidLength {
                expected: self.bytes_len(),
                actual: bytes.len(),
            });
        }
        let encoded = bytes
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        self.decode_int(encoded)
    }

    /// Parse a human amount such as `"39.99"` into base units
    pub fn parse_units(&self, input: &str) -> Result<u128, EncodingError> {
        let invalid = |reason| EncodingError::InvalidDecimal {
            input: input.to_string(),
            reason,
        };
        let (whole, fraction) = match input.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (input, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid("no digits"));
        }
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid("not a decimal number"));
        }
        if fraction.len() > self.place as usize {
            return Err(invalid("too many decimals"));
        }

        let digits = |part: &str| {
            part.bytes().try_fold(0u128, |acc, b| {
                acc.checked_mul(10)?.checked_add(u128::from(b - b'0'))
            })
        };
        let whole = digits(whole).ok_or(EncodingError::Overflow)?;
        let fraction_scale = 10u128.pow(self.place - fraction.len() as u32);
        let fraction = digits(fraction)
            .and_then(|value| value.checked_mul(fraction_scale))
            .ok_or(EncodingError::Overflow)?;
        whole
            .checked_mul(10u128.pow(self.place))
            .and_then(|value| value.checked_add(fraction))
            .ok_or(EncodingError::Overflow)
    }

    /// Render base units as a human amount, trimming trailing zeros
    pub fn format_units(&self, value: u128) -> String {
        if self.place == 0 {
            return value.to_string();
        }
        let scale = 10u128.pow(self.place);
        let fraction = format!("{:0width$}", value % scale, width = self.place as usize);
        let fraction = fraction.trim_end_matches('0');
        let fraction = if fraction.is_empty() { "0" } else { fraction };
        format!("{}.{}", value / scale, fraction)
    }
}

impl Default for DecimalCodec {
    fn default() -> Self {
        Self::USDT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CODEC: DecimalCodec = DecimalCodec::USDT;

    #[test]
    fn test_encode_known_values() {
        assert_eq!(CODEC.encode_int(0).unwrap(), 0);
        // 39.99 USDT = 3999 * 10^4
        let encoded = CODEC.encode_int(39_990_000).unwrap();
        assert_eq!(encoded, (4 << 12) | 3999);
        assert_eq!(CODEC.decode_int(encoded).unwrap(), 39_990_000);
        assert_eq!(CODEC.encode_bytes(39_990_000).unwrap(), vec![0x4f, 0x9f]);
        assert_eq!(CODEC.decode_bytes(&[0x4f, 0x9f]).unwrap(), 39_990_000);
    }

    #[test]
    fn test_encode_rejects_wide_mantissa() {
        assert_eq!(
            CODEC.encode_int(4097),
            Err(EncodingError::MantissaOverflow {
                value: 4097,
                mantissa: 4097,
                max: 4095,
            })
        );
        assert!(!CODEC.is_encodable(12_345_678));
        assert_eq!(CODEC.cast(12_345_678).unwrap(), 12_340_000);
    }

    #[test]
    fn test_exponent_is_capped() {
        // sixteen trailing zeros, only fifteen fit in the exponent
        let value = 10u128.pow(16);
        assert_eq!(CODEC.encode_int(value).unwrap(), (15 << 12) | 10);
        assert_eq!(CODEC.decode_int((15 << 12) | 10).unwrap(), value);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(CODEC.decode_int(1 << 16), Err(EncodingError::Overflow));
        assert_eq!(
            CODEC.decode_bytes(&[1, 2, 3]),
            Err(EncodingError::InvalidLength {
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_layout_validation() {
        assert!(DecimalCodec::new(4, 12, 6).is_ok());
        assert!(DecimalCodec::new(5, 12, 6).is_err());
        assert!(DecimalCodec::new(0, 16, 6).is_err());
        assert_eq!(DecimalCodec::new(8, 56, 18).unwrap().bytes_len(), 8);
    }

    #[test]
    fn test_units() {
        assert_eq!(CODEC.parse_units("39.99").unwrap(), 39_990_000);
        assert_eq!(CODEC.parse_units("0.01").unwrap(), 10_000);
        assert_eq!(CODEC.parse_units("1000").unwrap(), 1_000_000_000);
        assert_eq!(CODEC.parse_units("1000.0").unwrap(), 1_000_000_000);
        assert_eq!(CODEC.parse_units(".5").unwrap(), 500_000);
        assert!(CODEC.parse_units("0.0000001").is_err());
        assert!(CODEC.parse_units("1e3").is_err());
        assert!(CODEC.parse_units("").is_err());
        assert!(CODEC.parse_units(".").is_err());

        assert_eq!(CODEC.format_units(960_000_000), "960.0");
        assert_eq!(CODEC.format_units(39_990_000), "39.99");
        assert_eq!(CODEC.format_units(10_000), "0.01");
    }

    proptest! {
        #[test]
        fn prop_representable_values_round_trip(mantissa in 0u128..4096, exponent in 0u32..16) {
            let value = mantissa * 10u128.pow(exponent);
            let encoded = CODEC.encode_int(value).unwrap();
            prop_assert_eq!(CODEC.decode_int(encoded).unwrap(), value);
        }

        #[test]
        fn prop_canonical_encodings_round_trip(encoded in 0u64..(1 << 16)) {
            let mantissa = encoded & 0xfff;
            let exponent = encoded >> 12;
            // a mantissa with a trailing zero re-encodes with a larger exponent
            prop_assume!(mantissa % 10 != 0 || (exponent == 15 && mantissa != 0) || encoded == 0);
            let value = CODEC.decode_int(encoded).unwrap();
            prop_assert_eq!(CODEC.encode_int(value).unwrap(), encoded);
        }

        #[test]
        fn prop_encode_never_truncates(value in any::<u64>()) {
            if let Ok(encoded) = CODEC.encode_int(u128::from(value)) {
                prop_assert_eq!(CODEC.decode_int(encoded).unwrap(), u128::from(value));
            }
        }
    }
}
