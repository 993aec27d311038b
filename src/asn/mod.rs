//! DER-style tag/length/value codec, built on [`crate::bigint::BigInt`] for
//! arbitrary-precision INTEGER content, per §4.2.
//!
//! [`encoder::Encoder`] builds a tree of tags bottom-up; [`decoder::Decoder`]
//! walks a byte stream tag by tag. Both share the identifier/length octet
//! logic in [`tag`] so the two stay exact mirrors of each other.

pub mod decoder;
pub mod encoder;
pub mod tag;
pub mod value;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use tag::{Length, Tag, TagClass, TagForm};
pub use value::{GeneralizedTime, Oid, TimeZone, UtcTime};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bigint::BigInt;

    #[test]
    fn round_trips_a_small_sequence() {
        let mut enc = Encoder::new();
        enc.encode_tag(Tag::universal(TagForm::Constructed, tag::UNIV_SEQUENCE))
            .unwrap();
        enc.encode_tag(Tag::universal(TagForm::Primitive, tag::UNIV_BOOLEAN))
            .unwrap();
        enc.encode_boolean(true).unwrap();
        enc.encode_tag_complete().unwrap();
        enc.encode_tag(Tag::universal(TagForm::Primitive, tag::UNIV_INTEGER))
            .unwrap();
        enc.encode_integer(&BigInt::from_i64(-42)).unwrap();
        enc.encode_tag_complete().unwrap();
        enc.encode_tag(Tag::universal(TagForm::Primitive, tag::UNIV_UTF8_STRING))
            .unwrap();
        enc.encode_utf8_string("hello").unwrap();
        enc.encode_tag_complete().unwrap();
        enc.encode_tag_complete().unwrap();
        let bytes = enc.finish().unwrap();

        let mut dec = Decoder::new(&bytes);
        dec.decode_tag().unwrap();
        dec.decode_tag().unwrap();
        assert!(dec.decode_boolean().unwrap());
        dec.decode_tag_complete().unwrap();
        dec.decode_tag().unwrap();
        assert_eq!(dec.decode_integer().unwrap(), BigInt::from_i64(-42));
        dec.decode_tag_complete().unwrap();
        dec.decode_tag().unwrap();
        assert_eq!(dec.decode_utf8_string().unwrap(), "hello");
        dec.decode_tag_complete().unwrap();
        dec.decode_tag_complete().unwrap();
    }
}
