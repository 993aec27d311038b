//! Identifier octet (tag) and length octet encoding, shared by the encoder
//! and the decoder so the two stay bit-exact mirrors of each other, per §4.2.

use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TagClass {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

impl TagClass {
    fn bits(self) -> u8 {
        match self {
            TagClass::Universal => 0b00,
            TagClass::Application => 0b01,
            TagClass::ContextSpecific => 0b10,
            TagClass::Private => 0b11,
        }
    }

    fn from_bits(bits: u8) -> TagClass {
        match bits & 0b11 {
            0b00 => TagClass::Universal,
            0b01 => TagClass::Application,
            0b10 => TagClass::ContextSpecific,
            _ => TagClass::Private,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TagForm {
    Primitive,
    Constructed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub class: TagClass,
    pub form: TagForm,
    pub number: u64,
}

impl Tag {
    pub fn universal(form: TagForm, number: u64) -> Tag {
        Tag {
            class: TagClass::Universal,
            form,
            number,
        }
    }

    pub fn context(number: u64, form: TagForm) -> Tag {
        Tag {
            class: TagClass::ContextSpecific,
            form,
            number,
        }
    }
}

// Universal tag numbers used by the primitive encodings in §4.2.
pub const UNIV_BOOLEAN: u64 = 1;
pub const UNIV_INTEGER: u64 = 2;
pub const UNIV_BIT_STRING: u64 = 3;
pub const UNIV_OCTET_STRING: u64 = 4;
pub const UNIV_NULL: u64 = 5;
pub const UNIV_OBJECT_IDENTIFIER: u64 = 6;
pub const UNIV_UTF8_STRING: u64 = 12;
pub const UNIV_SEQUENCE: u64 = 16;
pub const UNIV_SET: u64 = 17;
pub const UNIV_PRINTABLE_STRING: u64 = 19;
pub const UNIV_UTC_TIME: u64 = 23;
pub const UNIV_GENERALIZED_TIME: u64 = 24;
pub const UNIV_VISIBLE_STRING: u64 = 26;

/// Encodes the identifier octet(s) for `tag`, per §4.2 Tag encoding.
pub fn encode_identifier(tag: Tag, out: &mut Vec<u8>) {
    let class_bits = tag.class.bits() << 6;
    let form_bit = match tag.form {
        TagForm::Primitive => 0,
        TagForm::Constructed => 1 << 5,
    };
    if tag.number <= 30 {
        out.push(class_bits | form_bit | tag.number as u8);
        return;
    }
    out.push(class_bits | form_bit | 0x1F);
    // Base-128, most significant group first, continuation bit set on all
    // but the last octet.
    let mut groups = Vec::new();
    let mut n = tag.number;
    loop {
        groups.push((n & 0x7F) as u8);
        n >>= 7;
        if n == 0 {
            break;
        }
    }
    for (i, g) in groups.iter().rev().enumerate() {
        let is_last = i == groups.len() - 1;
        out.push(if is_last { *g } else { g | 0x80 });
    }
}

/// Decodes the identifier octet(s) starting at `input[0]`, returning the
/// decoded tag and the number of octets consumed.
pub fn decode_identifier(input: &[u8]) -> Result<(Tag, usize)> {
    let first = *input
        .first()
        .ok_or_else(|| crate::invalid!("truncated tag: no identifier octet"))?;
    let class = TagClass::from_bits(first >> 6);
    let form = if first & 0x20 != 0 {
        TagForm::Constructed
    } else {
        TagForm::Primitive
    };
    let low5 = first & 0x1F;
    if low5 != 0x1F {
        return Ok((
            Tag {
                class,
                form,
                number: low5 as u64,
            },
            1,
        ));
    }

    // Long form: base-128 continuation bytes.
    let mut number: u64 = 0;
    let mut consumed = 1;
    let mut saw_first_long_byte = true;
    loop {
        let byte = *input
            .get(consumed)
            .ok_or_else(|| crate::invalid!("truncated long-form tag number"))?;
        if saw_first_long_byte && byte & 0x7F == 0 {
            return Err(crate::invalid!("long-form tag has leading continuation padding"));
        }
        saw_first_long_byte = false;
        number = number
            .checked_shl(7)
            .ok_or_else(|| crate::invalid!("tag number overflow"))?
            | (byte & 0x7F) as u64;
        consumed += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if number <= 30 {
        return Err(Error::Invalid(
            "long-form tag encodes a value representable in short form".to_string(),
        ));
    }
    Ok((
        Tag {
            class,
            form,
            number,
        },
        consumed,
    ))
}

/// A decoded length: either definite (with a byte count) or indefinite
/// (terminated by `00 00`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Length {
    Definite(usize),
    Indefinite,
}

/// Encodes `len` using the minimal number of length octets (definite form
/// only — the canonical output never uses indefinite length, per §4.2).
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len <= 127 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    let significant = &bytes[first_nonzero..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

/// Decodes a length octet sequence starting at `input[0]`, returning the
/// length and the number of octets consumed.
pub fn decode_length(input: &[u8]) -> Result<(Length, usize)> {
    let first = *input
        .first()
        .ok_or_else(|| crate::invalid!("truncated length: no length octet"))?;
    if first & 0x80 == 0 {
        return Ok((Length::Definite(first as usize), 1));
    }
    let n = (first & 0x7F) as usize;
    if n == 0 {
        return Ok((Length::Indefinite, 1));
    }
    let bytes = input
        .get(1..1 + n)
        .ok_or_else(|| crate::invalid!("truncated long-form length"))?;
    if bytes[0] == 0 && n > 1 {
        return Err(crate::invalid!("length encoding is not minimal"));
    }
    if n > std::mem::size_of::<usize>() {
        return Err(Error::Limit);
    }
    let mut value: usize = 0;
    for &b in bytes {
        value = value
            .checked_shl(8)
            .ok_or(Error::Limit)?
            | b as usize;
    }
    Ok((Length::Definite(value), 1 + n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_tag_roundtrip() {
        let tag = Tag::universal(TagForm::Primitive, UNIV_INTEGER);
        let mut buf = Vec::new();
        encode_identifier(tag, &mut buf);
        assert_eq!(buf, vec![0x02]);
        let (decoded, consumed) = decode_identifier(&buf).unwrap();
        assert_eq!(decoded, tag);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn long_form_tag_roundtrip() {
        let tag = Tag::context(1000, TagForm::Constructed);
        let mut buf = Vec::new();
        encode_identifier(tag, &mut buf);
        let (decoded, consumed) = decode_identifier(&buf).unwrap();
        assert_eq!(decoded, tag);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn length_short_and_long_form() {
        let mut buf = Vec::new();
        encode_length(100, &mut buf);
        assert_eq!(buf, vec![100]);

        let mut buf = Vec::new();
        encode_length(300, &mut buf);
        assert_eq!(buf, vec![0x82, 0x01, 0x2C]);
        let (len, consumed) = decode_length(&buf).unwrap();
        assert_eq!(len, Length::Definite(300));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn indefinite_length_decodes() {
        let (len, consumed) = decode_length(&[0x80]).unwrap();
        assert_eq!(len, Length::Indefinite);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn rejects_non_minimal_length() {
        assert!(decode_length(&[0x82, 0x00, 0x05]).is_err());
    }
}
