//! Base64 VLQ codec used by the `mappings` field of source maps.

use thiserror::Error;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const CONTINUATION: u8 = 0b10_0000;
const DIGIT_MASK: u8 = 0b01_1111;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VlqError {
    #[error("invalid base64 digit {0:?}")]
    InvalidDigit(char),
    #[error("value continues past end of segment")]
    Truncated,
    #[error("value does not fit in 32 bits")]
    Overflow,
}

fn digit_value(byte: u8) -> Result<u8, VlqError> {
    match byte {
        b'A'..=b'Z' => Ok(byte - b'A'),
        b'a'..=b'z' => Ok(byte - b'a' + 26),
        b'0'..=b'9' => Ok(byte - b'0' + 52),
        b'+' => Ok(62),
        b'/' => Ok(63),
        other => Err(VlqError::InvalidDigit(other as char)),
    }
}

/// Decode every value in one comma-free segment.
pub fn decode_segment(segment: &str) -> Result<Vec<i64>, VlqError> {
    let mut values = Vec::with_capacity(5);
    let mut accum: u64 = 0;
    let mut shift = 0u32;
    let mut in_value = false;

    for byte in segment.bytes() {
        let digit = digit_value(byte)?;
        accum |= u64::from(digit & DIGIT_MASK) << shift;
        in_value = true;
        if digit & CONTINUATION != 0 {
            shift += 5;
            if shift > 32 {
                return Err(VlqError::Overflow);
            }
            continue;
        }
        let magnitude = (accum >> 1) as i64;
        values.push(if accum & 1 == 1 { -magnitude } else { magnitude });
        accum = 0;
        shift = 0;
        in_value = false;
    }

    if in_value {
        return Err(VlqError::Truncated);
    }
    Ok(values)
}

/// Encode one value, appending to `out`.
pub fn encode_value(value: i64, out: &mut String) {
    let mut vlq: u64 = if value < 0 {
        (value.unsigned_abs() << 1) | 1
    } else {
        (value as u64) << 1
    };
    loop {
        let mut digit = (vlq & u64::from(DIGIT_MASK)) as u8;
        vlq >>= 5;
        if vlq > 0 {
            digit |= CONTINUATION;
        }
        out.push(ALPHABET[digit as usize] as char);
        if vlq == 0 {
            break;
        }
    }
}

/// Encode a whole segment.
pub fn encode_segment(values: &[i64]) -> String {
    let mut out = String::new();
    for value in values {
        encode_value(*value, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_known_segments() {
        assert_eq!(decode_segment("AAAA").unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(decode_segment("AACA").unwrap(), vec![0, 0, 1, 0]);
        assert_eq!(decode_segment("D").unwrap(), vec![-1]);
        // 16 needs a continuation digit.
        assert_eq!(decode_segment("gB").unwrap(), vec![16]);
        assert_eq!(decode_segment("SAAQA").unwrap(), vec![9, 0, 0, 8, 0]);
    }

    #[test]
    fn test_encode_matches_decode() {
        for value in [0i64, 1, -1, 15, 16, -16, 1000, -123456, 1 << 20] {
            let encoded = encode_segment(&[value]);
            assert_eq!(decode_segment(&encoded).unwrap(), vec![value], "{value}");
        }
    }

    #[test]
    fn test_invalid_digit() {
        assert_eq!(decode_segment("A!"), Err(VlqError::InvalidDigit('!')));
    }

    #[test]
    fn test_truncated_value() {
        // 'g' sets the continuation bit with nothing after it.
        assert_eq!(decode_segment("Ag"), Err(VlqError::Truncated));
    }
}
