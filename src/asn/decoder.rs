//! Context-stack DER decoder: the mirror image of [`super::encoder::Encoder`].
//!
//! `decode_tag` reads an identifier and a length and pushes a context frame
//! bounding the tag's content; `decode_value` reads a primitive out of the
//! current frame's remaining bytes; `decode_tag_complete` pops the frame,
//! requiring it to have been fully consumed (or explicitly `skip`ped); per
//! §4.2.

use crate::bigint::BigInt;
use crate::config::CodecConfig;
use crate::error::Result;

use super::tag::{self, Length, Tag, TagClass, TagForm};
use super::value::{GeneralizedTime, Oid, UtcTime};

struct Context {
    tag: Tag,
    /// Absolute end offset of this tag's content, or `None` for an
    /// indefinite-length tag whose end is found by scanning for the
    /// two-octet End-of-Contents marker.
    end: Option<usize>,
    /// Bound inherited from the enclosing frame at the time this one was
    /// pushed, used to keep an indefinite-length scan from running past it.
    outer_limit: usize,
}

/// Walks a DER byte stream tag by tag without copying it.
pub struct Decoder<'a> {
    input: &'a [u8],
    position: usize,
    stack: Vec<Context>,
    max_depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(input: &'a [u8]) -> Decoder<'a> {
        Decoder {
            input,
            position: 0,
            stack: Vec::new(),
            max_depth: CodecConfig::default().max_nesting_depth,
        }
    }

    /// Builds a decoder that rejects tags nested past `config.max_nesting_depth`.
    pub fn with_config(input: &'a [u8], config: &CodecConfig) -> Decoder<'a> {
        Decoder {
            input,
            position: 0,
            stack: Vec::new(),
            max_depth: config.max_nesting_depth,
        }
    }

    /// Current absolute read offset.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Repositions to an absolute offset within the original input. Does not
    /// validate against the currently open context's bounds; callers that
    /// need that should check [`Decoder::position`] against the tag's
    /// content bounds themselves.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.input.len() {
            return Err(crate::invalid!("seek past end of input"));
        }
        self.position = position;
        Ok(())
    }

    fn remaining(&self) -> &'a [u8] {
        let limit = self.current_limit();
        &self.input[self.position..limit]
    }

    fn current_limit(&self) -> usize {
        self.stack.last().map_or(self.input.len(), |c| c.end.unwrap_or(c.outer_limit))
    }

    /// Whether the two octets at `pos` are the indefinite-length
    /// End-of-Contents marker (`00 00`), bounded by `limit`.
    fn eoc_at(&self, pos: usize, limit: usize) -> bool {
        pos + 2 <= limit && self.input[pos] == 0 && self.input[pos + 1] == 0
    }

    /// Reads an identifier and a length, pushing a context frame for the
    /// decoded tag's content and returning it. A `Length::Indefinite` tag
    /// pushes a frame with no known end; its content must be terminated by
    /// two zero octets, found by [`Decoder::skip`] or [`Decoder::decode_tag_complete`].
    pub fn decode_tag(&mut self) -> Result<Tag> {
        let outer_limit = self.current_limit();
        let remaining = self.remaining();
        let (decoded_tag, tag_len) = tag::decode_identifier(remaining)?;
        let (len, len_len) = tag::decode_length(&remaining[tag_len..])?;
        let content_start = self.position + tag_len + len_len;
        let end = match len {
            Length::Definite(n) => {
                let end = content_start
                    .checked_add(n)
                    .ok_or_else(|| crate::invalid!("tag length overflows input size"))?;
                if end > outer_limit {
                    return Err(crate::invalid!("tag content runs past its enclosing tag"));
                }
                Some(end)
            }
            Length::Indefinite => {
                if decoded_tag.form != TagForm::Constructed {
                    return Err(crate::invalid!(
                        "indefinite length is only valid on a constructed tag"
                    ));
                }
                None
            }
        };
        if self.stack.len() >= self.max_depth {
            return Err(crate::invalid!("tag nesting exceeds the configured maximum depth"));
        }
        self.position = content_start;
        self.stack.push(Context {
            tag: decoded_tag,
            end,
            outer_limit,
        });
        Ok(decoded_tag)
    }

    /// Pops the current context. A definite-length tag's content must have
    /// been fully consumed by `decode_value` calls, nested
    /// `decode_tag`/`decode_tag_complete` pairs, or an explicit
    /// [`Decoder::skip`]; an indefinite-length tag must have the two-octet
    /// End-of-Contents marker next, which this consumes.
    pub fn decode_tag_complete(&mut self) -> Result<()> {
        let ctx = self
            .stack
            .pop()
            .ok_or_else(|| crate::invalid!("decode_tag_complete with no open tag"))?;
        match ctx.end {
            Some(end) => {
                if self.position != end {
                    return Err(crate::invalid!(
                        "tag content was not fully consumed before decode_tag_complete"
                    ));
                }
            }
            None => {
                if !self.eoc_at(self.position, ctx.outer_limit) {
                    return Err(crate::invalid!(
                        "indefinite-length content was not terminated by two zero octets"
                    ));
                }
                self.position += 2;
            }
        }
        Ok(())
    }

    /// Skips to the end of the current tag's content without interpreting
    /// it, for unknown or uninteresting tags. For an indefinite-length tag
    /// this walks its nested tags (recursively skipping indefinite-length
    /// children) until it reaches the End-of-Contents marker, leaving it
    /// unconsumed for the matching [`Decoder::decode_tag_complete`].
    pub fn skip(&mut self) -> Result<()> {
        let ctx_end = self
            .stack
            .last()
            .ok_or_else(|| crate::invalid!("skip with no open tag"))?
            .end;
        match ctx_end {
            Some(end) => {
                self.position = end;
            }
            None => {
                loop {
                    let limit = self.stack.last().unwrap().outer_limit;
                    if self.eoc_at(self.position, limit) {
                        break;
                    }
                    self.decode_tag()?;
                    self.skip()?;
                    self.decode_tag_complete()?;
                }
            }
        }
        Ok(())
    }

    fn take_content(&mut self) -> Result<&'a [u8]> {
        let ctx = self
            .stack
            .last()
            .ok_or_else(|| crate::invalid!("decode_value with no open tag"))?;
        let end = ctx
            .end
            .ok_or_else(|| crate::invalid!("primitive content requires a definite-length tag"))?;
        let bytes = &self.input[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Validates the currently open frame's tag against `expected`, per
    /// §4.2 Primitive decode — a universal tag must match exactly, but a
    /// context-specific tag (an explicit `[n]`) is accepted regardless of
    /// number.
    fn expect_tag(&self, expected: u64) -> Result<()> {
        let ctx = self
            .stack
            .last()
            .ok_or_else(|| crate::invalid!("decode_value with no open tag"))?;
        match ctx.tag.class {
            TagClass::ContextSpecific => Ok(()),
            TagClass::Universal if ctx.tag.number == expected => Ok(()),
            _ => Err(crate::invalid!(
                "expected universal tag {expected}, found {:?} tag {}",
                ctx.tag.class,
                ctx.tag.number
            )),
        }
    }

    pub fn decode_boolean(&mut self) -> Result<bool> {
        self.expect_tag(tag::UNIV_BOOLEAN)?;
        let bytes = self.take_content()?;
        match bytes {
            [b] => Ok(*b != 0),
            _ => Err(crate::invalid!("BOOLEAN content must be exactly one octet")),
        }
    }

    pub fn decode_integer(&mut self) -> Result<BigInt> {
        self.expect_tag(tag::UNIV_INTEGER)?;
        let bytes = self.take_content()?;
        if bytes.is_empty() {
            return Err(crate::invalid!("INTEGER content must not be empty"));
        }
        Ok(BigInt::from_signed_be_bytes(bytes))
    }

    pub fn decode_null(&mut self) -> Result<()> {
        self.expect_tag(tag::UNIV_NULL)?;
        let bytes = self.take_content()?;
        if !bytes.is_empty() {
            return Err(crate::invalid!("NULL content must be empty"));
        }
        Ok(())
    }

    pub fn decode_object_identifier(&mut self) -> Result<Oid> {
        self.expect_tag(tag::UNIV_OBJECT_IDENTIFIER)?;
        let bytes = self.take_content()?;
        if bytes.is_empty() {
            return Err(crate::invalid!("OBJECT IDENTIFIER content must not be empty"));
        }
        let mut arcs = Vec::new();
        let mut rest = bytes;
        let (first, consumed) = decode_base128(rest)?;
        rest = &rest[consumed..];
        if first < 40 {
            arcs.push(0);
            arcs.push(first);
        } else if first < 80 {
            arcs.push(1);
            arcs.push(first - 40);
        } else {
            arcs.push(2);
            arcs.push(first - 80);
        }
        while !rest.is_empty() {
            let (value, consumed) = decode_base128(rest)?;
            arcs.push(value);
            rest = &rest[consumed..];
        }
        Ok(Oid::new(arcs))
    }

    pub fn decode_utf8_string(&mut self) -> Result<String> {
        self.expect_tag(tag::UNIV_UTF8_STRING)?;
        let bytes = self.take_content()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| crate::invalid!("UTF8String is not valid UTF-8"))
    }

    pub fn decode_printable_string(&mut self) -> Result<String> {
        self.expect_tag(tag::UNIV_PRINTABLE_STRING)?;
        self.decode_ascii_string("PrintableString")
    }

    pub fn decode_visible_string(&mut self) -> Result<String> {
        self.expect_tag(tag::UNIV_VISIBLE_STRING)?;
        self.decode_ascii_string("VisibleString")
    }

    fn decode_ascii_string(&mut self, kind: &str) -> Result<String> {
        let bytes = self.take_content()?;
        if !bytes.is_ascii() {
            return Err(crate::invalid!("{kind} content must be ASCII"));
        }
        Ok(String::from_utf8(bytes.to_vec()).expect("ASCII is valid UTF-8"))
    }

    pub fn decode_octet_string(&mut self) -> Result<Vec<u8>> {
        self.expect_tag(tag::UNIV_OCTET_STRING)?;
        Ok(self.take_content()?.to_vec())
    }

    /// Returns `(unused_bits, data)`.
    pub fn decode_bit_string(&mut self) -> Result<(u8, Vec<u8>)> {
        self.expect_tag(tag::UNIV_BIT_STRING)?;
        let bytes = self.take_content()?;
        let (unused, data) = bytes
            .split_first()
            .ok_or_else(|| crate::invalid!("BIT STRING content must have a leading unused-bit count"))?;
        if *unused > 7 {
            return Err(crate::invalid!("unused bit count must be 0..=7"));
        }
        Ok((*unused, data.to_vec()))
    }

    pub fn decode_utc_time(&mut self) -> Result<UtcTime> {
        self.expect_tag(tag::UNIV_UTC_TIME)?;
        let bytes = self.take_content()?;
        let s = std::str::from_utf8(bytes).map_err(|_| crate::invalid!("UTCTime content is not ASCII"))?;
        UtcTime::parse(s)
    }

    pub fn decode_generalized_time(&mut self) -> Result<GeneralizedTime> {
        self.expect_tag(tag::UNIV_GENERALIZED_TIME)?;
        let bytes = self.take_content()?;
        let s =
            std::str::from_utf8(bytes).map_err(|_| crate::invalid!("GeneralizedTime content is not ASCII"))?;
        GeneralizedTime::parse(s)
    }
}

fn decode_base128(input: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut consumed = 0;
    loop {
        let byte = *input
            .get(consumed)
            .ok_or_else(|| crate::invalid!("truncated base-128 value"))?;
        value = value
            .checked_shl(7)
            .ok_or_else(|| crate::invalid!("base-128 value overflow"))?
            | (byte & 0x7F) as u64;
        consumed += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((value, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn::encoder::Encoder;
    use crate::asn::tag::{TagForm, UNIV_INTEGER, UNIV_OBJECT_IDENTIFIER, UNIV_SEQUENCE};

    #[test]
    fn decodes_minus_one() {
        let bytes = [0x02, 0x01, 0xFF];
        let mut dec = Decoder::new(&bytes);
        let t = dec.decode_tag().unwrap();
        assert_eq!(t.number, UNIV_INTEGER);
        assert_eq!(dec.decode_integer().unwrap(), BigInt::from_i64(-1));
        dec.decode_tag_complete().unwrap();
    }

    #[test]
    fn decodes_sequence_of_two_integers() {
        let mut enc = Encoder::new();
        enc.encode_tag(Tag::universal(TagForm::Constructed, UNIV_SEQUENCE))
            .unwrap();
        enc.encode_tag(Tag::universal(TagForm::Primitive, UNIV_INTEGER))
            .unwrap();
        enc.encode_integer(&BigInt::from_i64(7)).unwrap();
        enc.encode_tag_complete().unwrap();
        enc.encode_tag(Tag::universal(TagForm::Primitive, UNIV_INTEGER))
            .unwrap();
        enc.encode_integer(&BigInt::from_i64(8)).unwrap();
        enc.encode_tag_complete().unwrap();
        enc.encode_tag_complete().unwrap();
        let bytes = enc.finish().unwrap();

        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        dec.decode_tag().unwrap();
        assert_eq!(dec.decode_integer().unwrap(), BigInt::from_i64(7));
        dec.decode_tag_complete().unwrap();
        dec.decode_tag().unwrap();
        assert_eq!(dec.decode_integer().unwrap(), BigInt::from_i64(8));
        dec.decode_tag_complete().unwrap();
        dec.decode_tag_complete().unwrap();
    }

    #[test]
    fn rejects_incomplete_consumption() {
        let bytes = [0x30, 0x03, 0x02, 0x01, 0x01];
        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        assert!(dec.decode_tag_complete().is_err());
    }

    #[test]
    fn skip_consumes_unread_tag() {
        let bytes = [0x30, 0x03, 0x02, 0x01, 0x01];
        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        dec.skip().unwrap();
        dec.decode_tag_complete().unwrap();
    }

    #[test]
    fn nesting_past_configured_depth_is_rejected() {
        let mut enc = Encoder::new();
        for _ in 0..4 {
            enc.encode_tag(Tag::universal(TagForm::Constructed, UNIV_SEQUENCE)).unwrap();
        }
        enc.encode_tag(Tag::universal(TagForm::Primitive, UNIV_INTEGER)).unwrap();
        enc.encode_integer(&BigInt::from_i64(1)).unwrap();
        enc.encode_tag_complete().unwrap();
        for _ in 0..4 {
            enc.encode_tag_complete().unwrap();
        }
        let bytes = enc.finish().unwrap();

        let config = CodecConfig { max_nesting_depth: 2 };
        let mut dec = Decoder::with_config(&bytes, &config);
        dec.decode_tag().unwrap();
        dec.decode_tag().unwrap();
        assert!(dec.decode_tag().is_err());
    }

    #[test]
    fn object_identifier_roundtrip() {
        let mut enc = Encoder::new();
        enc.encode_tag(Tag::universal(TagForm::Primitive, UNIV_OBJECT_IDENTIFIER))
            .unwrap();
        enc.encode_object_identifier(&Oid::new(vec![1, 2, 840, 113549, 1, 1, 11]))
            .unwrap();
        enc.encode_tag_complete().unwrap();
        let bytes = enc.finish().unwrap();

        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        let oid = dec.decode_object_identifier().unwrap();
        dec.decode_tag_complete().unwrap();
        assert_eq!(oid, Oid::new(vec![1, 2, 840, 113549, 1, 1, 11]));
    }

    #[test]
    fn decode_integer_rejects_mismatched_tag() {
        let bytes = [0x04, 0x01, 0x01]; // OCTET STRING, not INTEGER
        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        assert!(dec.decode_integer().is_err());
    }

    #[test]
    fn decode_integer_accepts_context_specific_tag() {
        let mut enc = Encoder::new();
        enc.encode_tag(Tag::context(0, TagForm::Primitive)).unwrap();
        enc.encode_integer(&BigInt::from_i64(9)).unwrap();
        enc.encode_tag_complete().unwrap();
        let bytes = enc.finish().unwrap();

        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        assert_eq!(dec.decode_integer().unwrap(), BigInt::from_i64(9));
        dec.decode_tag_complete().unwrap();
    }

    #[test]
    fn indefinite_length_sequence_decodes() {
        // SEQUENCE, indefinite length, one INTEGER 7, then the
        // End-of-Contents marker.
        let bytes = [0x30, 0x80, 0x02, 0x01, 0x07, 0x00, 0x00];
        let mut dec = Decoder::new(&bytes);
        let t = dec.decode_tag().unwrap();
        assert_eq!(t.number, UNIV_SEQUENCE);
        dec.decode_tag().unwrap();
        assert_eq!(dec.decode_integer().unwrap(), BigInt::from_i64(7));
        dec.decode_tag_complete().unwrap();
        dec.decode_tag_complete().unwrap();
        assert_eq!(dec.position(), bytes.len());
    }

    #[test]
    fn indefinite_length_skip_finds_terminator() {
        let bytes = [0x30, 0x80, 0x02, 0x01, 0x07, 0x00, 0x00];
        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        dec.skip().unwrap();
        dec.decode_tag_complete().unwrap();
        assert_eq!(dec.position(), bytes.len());
    }

    #[test]
    fn indefinite_length_nested_in_definite_parent() {
        // Outer SEQUENCE (definite, 9 bytes) wrapping an inner SEQUENCE
        // (indefinite) wrapping one INTEGER 7.
        let bytes = [0x30, 0x09, 0x30, 0x80, 0x02, 0x01, 0x07, 0x00, 0x00];
        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        dec.decode_tag().unwrap();
        dec.decode_tag().unwrap();
        assert_eq!(dec.decode_integer().unwrap(), BigInt::from_i64(7));
        dec.decode_tag_complete().unwrap();
        dec.decode_tag_complete().unwrap();
        dec.decode_tag_complete().unwrap();
    }

    #[test]
    fn indefinite_length_on_primitive_tag_is_rejected() {
        let bytes = [0x02, 0x80, 0x00, 0x00];
        let mut dec = Decoder::new(&bytes);
        assert!(dec.decode_tag().is_err());
    }

    #[test]
    fn indefinite_length_missing_terminator_is_rejected() {
        let bytes = [0x30, 0x80, 0x02, 0x01, 0x07];
        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        dec.decode_tag().unwrap();
        dec.decode_integer().unwrap();
        dec.decode_tag_complete().unwrap();
        assert!(dec.decode_tag_complete().is_err());
    }
}
