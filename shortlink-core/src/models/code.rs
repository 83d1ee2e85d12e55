//! Base-62 short-code codec.
//!
//! Ids are encoded least-significant-digit first and reversed, then
//! left-padded with the zero digit so early sequential ids don't
//! produce one- or two-character codes. Decoding exists for
//! diagnostics only; the serving path never decodes.

use crate::{Error, Result};

pub const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Custom codes share the generated-code alphabet and must fit the
/// `VARCHAR(12)` column.
const CUSTOM_CODE_MAX: usize = 12;

/// Encode a non-negative id to base-62, left-padded to `min_length`.
pub fn encode_base62(id: i64, min_length: usize) -> Result<String> {
    if id < 0 {
        return Err(Error::InvalidInput("id must be non-negative".to_string()));
    }

    let mut digits = Vec::new();
    let mut n = id as u64;
    loop {
        digits.push(BASE62_ALPHABET[(n % 62) as usize]);
        n /= 62;
        if n == 0 {
            break;
        }
    }
    digits.reverse();

    let mut code = String::with_capacity(digits.len().max(min_length));
    for _ in digits.len()..min_length {
        code.push(BASE62_ALPHABET[0] as char);
    }
    code.push_str(std::str::from_utf8(&digits).expect("alphabet is ASCII"));
    Ok(code)
}

/// Decode a base-62 code back to its id. Leading zero digits (the
/// padding) are ignored, so `decode(encode(id, n)) == id` for any `n`.
pub fn decode_base62(code: &str) -> Result<i64> {
    if code.is_empty() {
        return Err(Error::InvalidInput("empty code".to_string()));
    }

    let mut value: i64 = 0;
    for byte in code.bytes() {
        let digit = digit_value(byte)
            .ok_or_else(|| Error::InvalidInput(format!("invalid base62 char: {}", byte as char)))?;
        value = value
            .checked_mul(62)
            .and_then(|v| v.checked_add(i64::from(digit)))
            .ok_or_else(|| Error::InvalidInput("code overflows i64".to_string()))?;
    }
    Ok(value)
}

fn digit_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'z' => Some(byte - b'a' + 10),
        b'A'..=b'Z' => Some(byte - b'A' + 36),
        _ => None,
    }
}

/// Validate a caller-supplied custom code.
pub fn validate_custom_code(code: &str) -> Result<()> {
    if code.is_empty() || code.len() > CUSTOM_CODE_MAX {
        return Err(Error::InvalidInput(format!(
            "custom code must be between 1 and {CUSTOM_CODE_MAX} characters"
        )));
    }
    if let Some(bad) = code.bytes().find(|b| digit_value(*b).is_none()) {
        return Err(Error::InvalidInput(format!(
            "custom code contains invalid char: {}",
            bad as char
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_values() {
        assert_eq!(encode_base62(0, 0).unwrap(), "0");
        assert_eq!(encode_base62(61, 0).unwrap(), "Z");
        assert_eq!(encode_base62(62, 0).unwrap(), "10");
        assert_eq!(encode_base62(12345, 0).unwrap(), "3d7");
    }

    #[test]
    fn encode_pads_to_minimum_length() {
        let code = encode_base62(1, 7).unwrap();
        assert_eq!(code, "0000001");
        assert_eq!(code.len(), 7);

        // Values wider than the minimum are not truncated.
        let wide = encode_base62(i64::MAX, 7).unwrap();
        assert!(wide.len() > 7);
    }

    #[test]
    fn encode_rejects_negative() {
        assert!(encode_base62(-1, 7).is_err());
    }

    #[test]
    fn round_trip_identity() {
        for id in [0, 1, 61, 62, 3843, 3844, 12345, 1_000_000, i64::MAX] {
            let code = encode_base62(id, 7).unwrap();
            assert_eq!(decode_base62(&code).unwrap(), id, "id {id} code {code}");
        }
    }

    #[test]
    fn round_trip_identity_over_range() {
        for id in (0..500_000).step_by(7919) {
            let code = encode_base62(id, 7).unwrap();
            assert_eq!(decode_base62(&code).unwrap(), id);
        }
    }

    #[test]
    fn decode_rejects_invalid_chars() {
        assert!(decode_base62("abc-def").is_err());
        assert!(decode_base62("").is_err());
    }

    #[test]
    fn custom_code_validation() {
        assert!(validate_custom_code("gh").is_ok());
        assert!(validate_custom_code("aB3xK9m").is_ok());
        assert!(validate_custom_code("").is_err());
        assert!(validate_custom_code(&"a".repeat(13)).is_err());
        assert!(validate_custom_code("has space").is_err());
        assert!(validate_custom_code("semi;colon").is_err());
    }
}
