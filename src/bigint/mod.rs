//! Arbitrary-precision signed integer.
//!
//! Magnitude is a little-endian vector of base-2^32 limbs; sign is tracked
//! separately. Every mutating operation normalizes afterwards (trims
//! trailing zero limbs); zero is canonicalized to `(Positive, [])`.
//!
//! This is the leaf of the dependency order in the spec: the ASN-style codec
//! (`crate::asn`) builds its DER integer encode/decode on top of
//! [`BigInt::from_signed_be_bytes`] / [`BigInt::to_signed_be_bytes`].

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

mod div;
mod mul;
mod parse;

pub use parse::ParseRadixError;

/// The sign of a [`BigInt`]. Zero is always [`Sign::Positive`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sign {
    Positive,
    Negative,
}

/// A signed arbitrary-precision integer.
///
/// Invariant: `magnitude` has no trailing (most-significant) zero limb, and
/// zero is represented as `(Sign::Positive, vec![])`.
#[derive(Clone, Eq)]
pub struct BigInt {
    sign: Sign,
    // Little-endian, base 2^32.
    magnitude: Vec<u32>,
}

impl BigInt {
    /// The additive identity.
    pub fn zero() -> BigInt {
        BigInt {
            sign: Sign::Positive,
            magnitude: Vec::new(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_empty()
    }

    pub fn sign(&self) -> Sign {
        self.sign
    }

    pub fn is_negative(&self) -> bool {
        self.sign == Sign::Negative && !self.is_zero()
    }

    /// Limbs in little-endian base-2^32 order, normalized.
    pub fn limbs(&self) -> &[u32] {
        &self.magnitude
    }

    fn from_parts(sign: Sign, mut magnitude: Vec<u32>) -> BigInt {
        while magnitude.last() == Some(&0) {
            magnitude.pop();
        }
        let sign = if magnitude.is_empty() {
            Sign::Positive
        } else {
            sign
        };
        BigInt { sign, magnitude }
    }

    pub fn from_u64(value: u64) -> BigInt {
        let lo = (value & 0xFFFF_FFFF) as u32;
        let hi = (value >> 32) as u32;
        BigInt::from_parts(Sign::Positive, vec![lo, hi])
    }

    pub fn from_i64(value: i64) -> BigInt {
        if value < 0 {
            let mag = (value as i128).unsigned_abs() as u64;
            let mut b = BigInt::from_u64(mag);
            b.sign = Sign::Negative;
            b
        } else {
            BigInt::from_u64(value as u64)
        }
    }

    /// Fails with [`Error::Limit`] if the value doesn't fit in a `u64`.
    pub fn to_u64(&self) -> Result<u64> {
        if self.is_negative() {
            return Err(Error::Limit);
        }
        if self.magnitude.len() > 2 {
            return Err(Error::Limit);
        }
        let lo = *self.magnitude.first().unwrap_or(&0) as u64;
        let hi = *self.magnitude.get(1).unwrap_or(&0) as u64;
        Ok(lo | (hi << 32))
    }

    /// Fails with [`Error::Limit`] if the value doesn't fit in an `i64`.
    pub fn to_i64(&self) -> Result<i64> {
        let mag = self.unsigned_magnitude_u64()?;
        if self.is_negative() {
            if mag > (i64::MAX as u64) + 1 {
                return Err(Error::Limit);
            }
            Ok((mag as i128 * -1) as i64)
        } else {
            if mag > i64::MAX as u64 {
                return Err(Error::Limit);
            }
            Ok(mag as i64)
        }
    }

    fn unsigned_magnitude_u64(&self) -> Result<u64> {
        if self.magnitude.len() > 2 {
            return Err(Error::Limit);
        }
        let lo = *self.magnitude.first().unwrap_or(&0) as u64;
        let hi = *self.magnitude.get(1).unwrap_or(&0) as u64;
        Ok(lo | (hi << 32))
    }

    fn cmp_magnitude(a: &[u32], b: &[u32]) -> Ordering {
        if a.len() != b.len() {
            return a.len().cmp(&b.len());
        }
        for i in (0..a.len()).rev() {
            if a[i] != b[i] {
                return a[i].cmp(&b[i]);
            }
        }
        Ordering::Equal
    }

    fn add_magnitude(a: &[u32], b: &[u32]) -> Vec<u32> {
        let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
        let mut out = Vec::with_capacity(long.len() + 1);
        let mut carry = 0u64;
        for i in 0..long.len() {
            let x = long[i] as u64;
            let y = *short.get(i).unwrap_or(&0) as u64;
            let sum = x + y + carry;
            out.push(sum as u32);
            carry = sum >> 32;
        }
        if carry != 0 {
            out.push(carry as u32);
        }
        out
    }

    /// Requires `a >= b` as magnitudes.
    fn sub_magnitude(a: &[u32], b: &[u32]) -> Vec<u32> {
        let mut out = Vec::with_capacity(a.len());
        let mut borrow = 0i64;
        for i in 0..a.len() {
            let x = a[i] as i64;
            let y = *b.get(i).unwrap_or(&0) as i64;
            let mut diff = x - y - borrow;
            if diff < 0 {
                diff += 1 << 32;
                borrow = 1;
            } else {
                borrow = 0;
            }
            out.push(diff as u32);
        }
        debug_assert_eq!(borrow, 0, "sub_magnitude called with a < b");
        out
    }

    pub fn add(&self, other: &BigInt) -> BigInt {
        if self.sign == other.sign {
            BigInt::from_parts(
                self.sign,
                BigInt::add_magnitude(&self.magnitude, &other.magnitude),
            )
        } else {
            // Opposite signs: subtract the smaller magnitude from the
            // larger, take the sign of the larger.
            match BigInt::cmp_magnitude(&self.magnitude, &other.magnitude) {
                Ordering::Equal => BigInt::zero(),
                Ordering::Greater => BigInt::from_parts(
                    self.sign,
                    BigInt::sub_magnitude(&self.magnitude, &other.magnitude),
                ),
                Ordering::Less => BigInt::from_parts(
                    other.sign,
                    BigInt::sub_magnitude(&other.magnitude, &self.magnitude),
                ),
            }
        }
    }

    pub fn neg(&self) -> BigInt {
        if self.is_zero() {
            self.clone()
        } else {
            BigInt::from_parts(
                if self.sign == Sign::Positive {
                    Sign::Negative
                } else {
                    Sign::Positive
                },
                self.magnitude.clone(),
            )
        }
    }

    pub fn sub(&self, other: &BigInt) -> BigInt {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &BigInt) -> BigInt {
        if self.is_zero() || other.is_zero() {
            return BigInt::zero();
        }
        let mag = mul::mul_magnitude(&self.magnitude, &other.magnitude);
        let sign = if self.sign == other.sign {
            Sign::Positive
        } else {
            Sign::Negative
        };
        BigInt::from_parts(sign, mag)
    }

    /// Divide-by-zero returns `(zero, dividend)` rather than faulting, per
    /// §4.1.
    pub fn div_rem(&self, other: &BigInt) -> (BigInt, BigInt) {
        if other.is_zero() {
            return (BigInt::zero(), self.clone());
        }
        let (q_mag, r_mag) = div::div_rem_magnitude(&self.magnitude, &other.magnitude);
        let q_sign = if self.sign == other.sign {
            Sign::Positive
        } else {
            Sign::Negative
        };
        // Remainder takes the sign of the dividend (truncating division),
        // matching the round-trip law `a mod b + (a / b) * b = a`.
        (
            BigInt::from_parts(q_sign, q_mag),
            BigInt::from_parts(self.sign, r_mag),
        )
    }

    pub fn div(&self, other: &BigInt) -> BigInt {
        self.div_rem(other).0
    }

    pub fn rem(&self, other: &BigInt) -> BigInt {
        self.div_rem(other).1
    }

    /// Parses an integer with an optional sign, an optional `0x` prefix
    /// selecting hexadecimal (otherwise decimal), then digits.
    pub fn parse(s: &str) -> std::result::Result<BigInt, ParseRadixError> {
        parse::parse(s)
    }

    /// Parses digits in an explicit base (2, 8, 10, 16, ...), with an
    /// optional leading sign but no base prefix.
    pub fn parse_radix(s: &str, radix: u32) -> std::result::Result<BigInt, ParseRadixError> {
        parse::parse_radix(s, radix)
    }

    /// Renders the magnitude in the given base, least-significant digit
    /// last, with a leading `-` for negative values. `radix` must be in
    /// `2..=36`.
    pub fn to_string_radix(&self, radix: u32) -> String {
        parse::render(self, radix)
    }

    /// Interprets `bytes` as a big-endian two's-complement integer of
    /// arbitrary width (the DER INTEGER content octets).
    pub fn from_signed_be_bytes(bytes: &[u8]) -> BigInt {
        if bytes.is_empty() {
            return BigInt::zero();
        }
        let negative = bytes[0] & 0x80 != 0;
        if !negative {
            return BigInt::from_parts(Sign::Positive, magnitude_from_be_bytes(bytes));
        }
        // Two's complement: invert and add one to get the magnitude.
        let inverted: Vec<u8> = bytes.iter().map(|b| !b).collect();
        let mut mag = magnitude_from_be_bytes(&inverted);
        mag = BigInt::add_magnitude(&mag, &[1]);
        BigInt::from_parts(Sign::Negative, mag)
    }

    /// Inverse of [`BigInt::from_signed_be_bytes`]: minimal-width two's
    /// complement, big-endian, with a leading `0x00` prepended whenever a
    /// positive value's top bit would otherwise read as negative.
    pub fn to_signed_be_bytes(&self) -> Vec<u8> {
        if self.is_zero() {
            return vec![0];
        }
        if !self.is_negative() {
            let mut bytes = be_bytes_from_magnitude(&self.magnitude);
            if bytes[0] & 0x80 != 0 {
                bytes.insert(0, 0);
            }
            bytes
        } else {
            // Two's complement of the magnitude, at the minimal byte width
            // that leaves the top bit set.
            let mut bytes = be_bytes_from_magnitude(&self.magnitude);
            // Decrement the magnitude by one, invert, see if that needs a
            // wider representation (the magnitude is an exact power of
            // 256^n, e.g. -256 needs 2 bytes: 0xFF 0x00).
            let mag_minus_one = BigInt::sub_magnitude(&self.magnitude, &[1]);
            let mut inv = be_bytes_from_magnitude(&mag_minus_one);
            // Pad to the same width as `bytes` before inverting bitwise.
            while inv.len() < bytes.len() {
                inv.insert(0, 0);
            }
            for b in inv.iter_mut() {
                *b = !*b;
            }
            bytes = inv;
            if bytes[0] & 0x80 == 0 {
                bytes.insert(0, 0xFF);
            }
            bytes
        }
    }
}

fn magnitude_from_be_bytes(bytes: &[u8]) -> Vec<u32> {
    let mut limbs = Vec::new();
    let mut chunk_end = bytes.len();
    while chunk_end > 0 {
        let chunk_start = chunk_end.saturating_sub(4);
        let mut limb = 0u32;
        for &b in &bytes[chunk_start..chunk_end] {
            limb = (limb << 8) | b as u32;
        }
        limbs.push(limb);
        chunk_end = chunk_start;
    }
    while limbs.last() == Some(&0) {
        limbs.pop();
    }
    limbs
}

fn be_bytes_from_magnitude(limbs: &[u32]) -> Vec<u8> {
    if limbs.is_empty() {
        return vec![0];
    }
    let mut bytes = Vec::with_capacity(limbs.len() * 4);
    for &limb in limbs.iter().rev() {
        bytes.extend_from_slice(&limb.to_be_bytes());
    }
    while bytes.len() > 1 && bytes[0] == 0 {
        bytes.remove(0);
    }
    bytes
}

impl PartialEq for BigInt {
    fn eq(&self, other: &BigInt) -> bool {
        self.sign == other.sign && self.magnitude == other.magnitude
    }
}

impl Ord for BigInt {
    fn cmp(&self, other: &BigInt) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => BigInt::cmp_magnitude(&self.magnitude, &other.magnitude),
            (true, true) => BigInt::cmp_magnitude(&other.magnitude, &self.magnitude),
        }
    }
}

impl PartialOrd for BigInt {
    fn partial_cmp(&self, other: &BigInt) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BigInt({})", self.to_string_radix(10))
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_radix(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_canonical() {
        let z = BigInt::zero();
        assert_eq!(z.sign(), Sign::Positive);
        assert!(z.limbs().is_empty());

        let also_zero = BigInt::from_i64(5).sub(&BigInt::from_i64(5));
        assert_eq!(also_zero.sign(), Sign::Positive);
        assert!(also_zero.is_zero());
    }

    #[test]
    fn add_sub_roundtrip() {
        let a = BigInt::from_i64(123_456_789);
        let b = BigInt::from_i64(-987_654_321);
        assert_eq!(a.add(&b).sub(&b), a);
    }

    #[test]
    fn mul_div_roundtrip() {
        let a = BigInt::parse("123456789012345678901234567890").unwrap();
        let b = BigInt::from_i64(98765);
        let prod = a.mul(&b);
        assert_eq!(prod.div(&b), a);
    }

    #[test]
    fn mod_law() {
        let a = BigInt::parse("99999999999999999999999").unwrap();
        let b = BigInt::from_i64(7);
        let (q, r) = a.div_rem(&b);
        assert_eq!(q.mul(&b).add(&r), a);
    }

    #[test]
    fn divide_by_zero_is_documented_not_fault() {
        let a = BigInt::from_i64(42);
        let (q, r) = a.div_rem(&BigInt::zero());
        assert!(q.is_zero());
        assert_eq!(r, a);
    }

    #[test]
    fn big_power_division() {
        // a = 2^128 + 7, b = 2^64 + 3
        let two = BigInt::from_i64(2);
        let a = pow(&two, 128).add(&BigInt::from_i64(7));
        let b = pow(&two, 64).add(&BigInt::from_i64(3));
        let (q, r) = a.div_rem(&b);
        assert_eq!(q.mul(&b).add(&r), a);
    }

    fn pow(base: &BigInt, exp: u32) -> BigInt {
        let mut result = BigInt::from_i64(1);
        for _ in 0..exp {
            result = result.mul(base);
        }
        result
    }

    #[test]
    fn render_parse_roundtrip_all_bases() {
        let x = BigInt::parse("-123456789123456789").unwrap();
        for base in [2u32, 8, 10, 16] {
            let rendered = x.to_string_radix(base);
            let parsed = BigInt::parse_radix(&rendered, base).unwrap();
            assert_eq!(parsed, x);
        }
    }

    #[test]
    fn hex_prefix_parsing() {
        assert_eq!(BigInt::parse("0xFF").unwrap(), BigInt::from_i64(255));
        assert_eq!(BigInt::parse("-0x10").unwrap(), BigInt::from_i64(-16));
    }

    #[test]
    fn der_integer_minus_one() {
        let v = BigInt::from_i64(-1);
        assert_eq!(v.to_signed_be_bytes(), vec![0xFF]);
        assert_eq!(BigInt::from_signed_be_bytes(&[0xFF]), v);
    }

    #[test]
    fn der_integer_plus_128_needs_leading_zero() {
        let v = BigInt::from_i64(128);
        assert_eq!(v.to_signed_be_bytes(), vec![0x00, 0x80]);
        assert_eq!(BigInt::from_signed_be_bytes(&[0x00, 0x80]), v);
    }

    #[test]
    fn der_integer_zero() {
        let v = BigInt::zero();
        assert_eq!(v.to_signed_be_bytes(), vec![0x00]);
        assert_eq!(BigInt::from_signed_be_bytes(&[0x00]), v);
    }

    #[test]
    fn der_integer_negative_256() {
        let v = BigInt::from_i64(-256);
        let bytes = v.to_signed_be_bytes();
        assert_eq!(bytes, vec![0xFF, 0x00]);
        assert_eq!(BigInt::from_signed_be_bytes(&bytes), v);
    }

    #[test]
    fn der_roundtrip_is_identity_for_many_values() {
        for n in [-70000i64, -300, -1, 0, 1, 127, 128, 255, 256, 70000] {
            let v = BigInt::from_i64(n);
            let bytes = v.to_signed_be_bytes();
            assert_eq!(BigInt::from_signed_be_bytes(&bytes), v, "n={n}");
        }
    }
}
