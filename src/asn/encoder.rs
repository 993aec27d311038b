//! Tree-building DER encoder.
//!
//! `encode_tag` pushes a new frame, `encode_*` appends primitive content to
//! the current frame, `encode_tag_complete` pops it and folds it into its
//! parent (or, at the root, marks the encoder ready to flush). Synchronizing
//! a tag computes its serialized header length plus the sum of its
//! children's lengths (or its buffered content length), propagating up to
//! ancestors on their own completion, per §4.2.

use crate::bigint::BigInt;
use crate::error::Result;

use super::tag::{self, Tag, TagForm};
use super::value::{GeneralizedTime, Oid, UtcTime};

enum Body {
    Empty,
    Bytes(Vec<u8>),
    Children(Vec<Frame>),
}

struct Frame {
    tag: Tag,
    body: Body,
}

impl Frame {
    fn content_len(&self) -> usize {
        match &self.body {
            Body::Empty => 0,
            Body::Bytes(b) => b.len(),
            Body::Children(cs) => cs.iter().map(Frame::total_len).sum(),
        }
    }

    fn header_len(&self) -> usize {
        let mut header = Vec::new();
        tag::encode_identifier(self.tag, &mut header);
        tag::encode_length(self.content_len(), &mut header);
        header.len()
    }

    fn total_len(&self) -> usize {
        self.header_len() + self.content_len()
    }

    fn write(&self, out: &mut Vec<u8>) {
        tag::encode_identifier(self.tag, out);
        tag::encode_length(self.content_len(), out);
        match &self.body {
            Body::Empty => {}
            Body::Bytes(b) => out.extend_from_slice(b),
            Body::Children(cs) => {
                for c in cs {
                    c.write(out);
                }
            }
        }
    }
}

/// A DER tree builder. See the module documentation for the API shape.
#[derive(Default)]
pub struct Encoder {
    stack: Vec<Frame>,
    finished: Option<Frame>,
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder {
            stack: Vec::new(),
            finished: None,
        }
    }

    /// Pushes a new frame with the given tag. Content added with
    /// `encode_*` calls, or nested tags, belong to this frame until the
    /// matching `encode_tag_complete`.
    pub fn encode_tag(&mut self, tag: Tag) -> Result<()> {
        if self.finished.is_some() {
            return Err(crate::invalid!("encoder already has a completed root frame"));
        }
        self.stack.push(Frame {
            tag,
            body: Body::Empty,
        });
        Ok(())
    }

    fn append_bytes(&mut self, bytes: Vec<u8>) -> Result<()> {
        let top = self
            .stack
            .last_mut()
            .ok_or_else(|| crate::invalid!("encode_value called with no open tag"))?;
        match &mut top.body {
            Body::Empty => top.body = Body::Bytes(bytes),
            Body::Bytes(existing) => existing.extend(bytes),
            Body::Children(_) => {
                return Err(crate::invalid!(
                    "cannot mix encode_value with nested frames in the same tag"
                ))
            }
        }
        Ok(())
    }

    /// Pops the current frame and folds it into its parent's children (or,
    /// at the root, marks the tree ready to flush).
    pub fn encode_tag_complete(&mut self) -> Result<()> {
        let frame = self
            .stack
            .pop()
            .ok_or_else(|| crate::invalid!("encode_tag_complete with no open tag"))?;
        match self.stack.last_mut() {
            Some(parent) => match &mut parent.body {
                Body::Empty => parent.body = Body::Children(vec![frame]),
                Body::Children(cs) => cs.push(frame),
                Body::Bytes(_) => {
                    return Err(crate::invalid!(
                        "cannot mix encode_value with nested frames in the same tag"
                    ))
                }
            },
            None => self.finished = Some(frame),
        }
        Ok(())
    }

    /// Serializes the completed tree: header then content (or recursively
    /// children) into a fresh output buffer. Requires every tag opened with
    /// `encode_tag` to have been completed.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if !self.stack.is_empty() {
            return Err(crate::invalid!("encoder has unclosed frames"));
        }
        let frame = self
            .finished
            .take()
            .ok_or_else(|| crate::invalid!("encoder has no completed frame to flush"))?;
        let mut out = Vec::with_capacity(frame.total_len());
        frame.write(&mut out);
        Ok(out)
    }

    pub fn encode_boolean(&mut self, value: bool) -> Result<()> {
        self.append_bytes(vec![if value { 0xFF } else { 0x00 }])
    }

    pub fn encode_integer(&mut self, value: &BigInt) -> Result<()> {
        self.append_bytes(value.to_signed_be_bytes())
    }

    pub fn encode_null(&mut self) -> Result<()> {
        self.append_bytes(Vec::new())
    }

    pub fn encode_object_identifier(&mut self, oid: &Oid) -> Result<()> {
        if oid.0.len() < 2 {
            return Err(crate::invalid!("object identifier needs at least two arcs"));
        }
        let (a, b) = (oid.0[0], oid.0[1]);
        if a > 2 || (a < 2 && b > 39) {
            return Err(crate::invalid!("invalid first two OID arcs ({a}, {b})"));
        }
        let mut out = Vec::new();
        encode_base128(40 * a + b, &mut out);
        for &arc in &oid.0[2..] {
            encode_base128(arc, &mut out);
        }
        self.append_bytes(out)
    }

    pub fn encode_utf8_string(&mut self, s: &str) -> Result<()> {
        self.append_bytes(s.as_bytes().to_vec())
    }

    pub fn encode_printable_string(&mut self, s: &str) -> Result<()> {
        self.append_bytes(s.as_bytes().to_vec())
    }

    pub fn encode_visible_string(&mut self, s: &str) -> Result<()> {
        self.append_bytes(s.as_bytes().to_vec())
    }

    pub fn encode_bit_string(&mut self, unused_bits: u8, data: &[u8]) -> Result<()> {
        if unused_bits > 7 {
            return Err(crate::invalid!("unused bit count must be 0..=7"));
        }
        let mut out = Vec::with_capacity(data.len() + 1);
        out.push(unused_bits);
        out.extend_from_slice(data);
        self.append_bytes(out)
    }

    pub fn encode_octet_string(&mut self, data: &[u8]) -> Result<()> {
        self.append_bytes(data.to_vec())
    }

    pub fn encode_utc_time(&mut self, value: &UtcTime) -> Result<()> {
        self.append_bytes(value.format().into_bytes())
    }

    pub fn encode_generalized_time(&mut self, value: &GeneralizedTime) -> Result<()> {
        self.append_bytes(value.format().into_bytes())
    }
}

fn encode_base128(mut n: u64, out: &mut Vec<u8>) {
    let mut groups = Vec::new();
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

#[cfg(test)]
mod tests {
    use super::*;

    fn universal(form: TagForm, number: u64) -> Tag {
        Tag::universal(form, number)
    }

    #[test]
    fn encodes_minus_one() {
        let mut enc = Encoder::new();
        enc.encode_tag(universal(TagForm::Primitive, super::tag::UNIV_INTEGER))
            .unwrap();
        enc.encode_integer(&BigInt::from_i64(-1)).unwrap();
        enc.encode_tag_complete().unwrap();
        assert_eq!(enc.finish().unwrap(), vec![0x02, 0x01, 0xFF]);
    }

    #[test]
    fn encodes_sequence_of_two_integers() {
        let mut enc = Encoder::new();
        enc.encode_tag(universal(TagForm::Constructed, super::tag::UNIV_SEQUENCE))
            .unwrap();
        enc.encode_tag(universal(TagForm::Primitive, super::tag::UNIV_INTEGER))
            .unwrap();
        enc.encode_integer(&BigInt::from_i64(1)).unwrap();
        enc.encode_tag_complete().unwrap();
        enc.encode_tag(universal(TagForm::Primitive, super::tag::UNIV_INTEGER))
            .unwrap();
        enc.encode_integer(&BigInt::from_i64(2)).unwrap();
        enc.encode_tag_complete().unwrap();
        enc.encode_tag_complete().unwrap();
        let bytes = enc.finish().unwrap();
        assert_eq!(bytes, vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn rejects_unclosed_frame() {
        let mut enc = Encoder::new();
        enc.encode_tag(universal(TagForm::Primitive, super::tag::UNIV_NULL))
            .unwrap();
        assert!(enc.finish().is_err());
    }

    #[test]
    fn object_identifier_encodes_first_two_arcs_combined() {
        let mut enc = Encoder::new();
        enc.encode_tag(universal(TagForm::Primitive, super::tag::UNIV_OBJECT_IDENTIFIER))
            .unwrap();
        // 1.2.840.113549 (rsadsi), a well-known OID prefix.
        enc.encode_object_identifier(&Oid::new(vec![1, 2, 840, 113549]))
            .unwrap();
        enc.encode_tag_complete().unwrap();
        let bytes = enc.finish().unwrap();
        assert_eq!(bytes[0], 0x06);
        // 40*1+2 = 42 = 0x2A as a single byte.
        assert_eq!(bytes[2], 0x2A);
    }
}
