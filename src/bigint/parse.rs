//! Parsing and rendering of [`super::BigInt`] in arbitrary bases.

use std::fmt;

use super::{BigInt, Sign};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRadixError(pub(crate) String);

impl fmt::Display for ParseRadixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid integer literal: {}", self.0)
    }
}

impl std::error::Error for ParseRadixError {}

fn digit_value(c: char) -> Option<u32> {
    c.to_digit(36)
}

/// Parses an optional sign, an optional `0x`/`0X` prefix selecting
/// hexadecimal (otherwise decimal), then digits.
pub fn parse(s: &str) -> Result<BigInt, ParseRadixError> {
    let s = s.trim();
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (Sign::Negative, rest),
        None => (Sign::Positive, s.strip_prefix('+').unwrap_or(s)),
    };
    let (radix, digits) = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, hex)
    } else {
        (10, rest)
    };
    parse_digits(digits, radix, sign)
}

/// Parses an optional leading sign then digits in an explicit base, with no
/// base prefix.
pub fn parse_radix(s: &str, radix: u32) -> Result<BigInt, ParseRadixError> {
    let s = s.trim();
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (Sign::Negative, rest),
        None => (Sign::Positive, s.strip_prefix('+').unwrap_or(s)),
    };
    parse_digits(rest, radix, sign)
}

fn parse_digits(digits: &str, radix: u32, sign: Sign) -> Result<BigInt, ParseRadixError> {
    if digits.is_empty() {
        return Err(ParseRadixError("no digits".to_string()));
    }
    let mut value = BigInt::zero();
    let base = BigInt::from_u64(radix as u64);
    for c in digits.chars() {
        let d = digit_value(c).ok_or_else(|| ParseRadixError(format!("bad digit {c:?}")))?;
        if d >= radix {
            return Err(ParseRadixError(format!("digit {c:?} out of range for base {radix}")));
        }
        value = value.mul(&base).add(&BigInt::from_u64(d as u64));
    }
    if sign == Sign::Negative {
        value = value.neg();
    }
    Ok(value)
}

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Renders in the given base, least-significant digit collected first then
/// reversed. `radix` must be in `2..=36`.
pub fn render(value: &BigInt, radix: u32) -> String {
    assert!((2..=36).contains(&radix), "radix out of range");
    if value.is_zero() {
        return "0".to_string();
    }
    let mut mag = value.magnitude.clone();
    let mut digits = Vec::new();
    while !mag.is_empty() {
        let (q, r) = crate::bigint::div::div_rem_magnitude(&mag, &[radix]);
        let digit = r.first().copied().unwrap_or(0);
        digits.push(ALPHABET[digit as usize]);
        mag = q;
    }
    if value.is_negative() {
        digits.push(b'-');
    }
    digits.reverse();
    String::from_utf8(digits).expect("digit alphabet is ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decimal() {
        assert_eq!(parse("42").unwrap(), BigInt::from_i64(42));
        assert_eq!(parse("-42").unwrap(), BigInt::from_i64(-42));
    }

    #[test]
    fn parse_hex_prefix() {
        assert_eq!(parse("0x2A").unwrap(), BigInt::from_i64(42));
    }

    #[test]
    fn render_zero() {
        assert_eq!(render(&BigInt::zero(), 16), "0");
    }

    #[test]
    fn render_negative() {
        assert_eq!(render(&BigInt::from_i64(-255), 16), "-ff");
    }

    #[test]
    fn rejects_bad_digit() {
        assert!(parse("12x4").is_err());
    }
}
