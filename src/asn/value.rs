//! Primitive value types with no natural Rust std equivalent: ASN.1
//! UTCTime, GeneralizedTime, and object identifiers. Encoding/decoding
//! lives alongside the rest of the primitive table in `encoder`/`decoder`;
//! this module only holds the value types themselves.

use crate::error::{Error, Result};

/// An object identifier, stored as its arc components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Oid(pub Vec<u64>);

impl Oid {
    pub fn new(arcs: Vec<u64>) -> Oid {
        Oid(arcs)
    }
}

/// A UTC time value: `YYMMDDhhmm[ss](Z|±hhmm)`. This codec always requires
/// the seconds group, per §4.2.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UtcTime {
    pub year: u8, // 00-99, interpretation (19xx/20xx) is left to the caller
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub offset: TimeZone,
}

/// A generalized time value: `YYYYMMDDhhmm[ss[.fff]](Z|±hhmm)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GeneralizedTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: Option<u8>,
    pub millis: Option<u16>,
    pub offset: TimeZone,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeZone {
    Utc,
    Offset { positive: bool, hours: u8, minutes: u8 },
}

impl UtcTime {
    pub fn format(&self) -> String {
        let mut s = format!(
            "{:02}{:02}{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        );
        s.push_str(&format_offset(self.offset));
        s
    }

    pub fn parse(s: &str) -> Result<UtcTime> {
        let bytes = s.as_bytes();
        if bytes.len() < 12 {
            return Err(crate::invalid!("UTCTime too short: {s:?}"));
        }
        let year = parse_two_digits(s, 0)?;
        let month = parse_two_digits(s, 2)?;
        let day = parse_two_digits(s, 4)?;
        let hour = parse_two_digits(s, 6)?;
        let minute = parse_two_digits(s, 8)?;
        let second = parse_two_digits(s, 10)?;
        let offset = parse_offset(&s[12..])?;
        Ok(UtcTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
            offset,
        })
    }
}

impl GeneralizedTime {
    pub fn format(&self) -> String {
        let mut s = format!(
            "{:04}{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        );
        if let Some(sec) = self.second {
            s.push_str(&format!("{sec:02}"));
            if let Some(ms) = self.millis {
                s.push_str(&format!(".{ms:03}"));
            }
        }
        s.push_str(&format_offset(self.offset));
        s
    }

    pub fn parse(s: &str) -> Result<GeneralizedTime> {
        if s.len() < 10 {
            return Err(crate::invalid!("GeneralizedTime too short: {s:?}"));
        }
        let year: u16 = s[0..4]
            .parse()
            .map_err(|_| crate::invalid!("bad year in {s:?}"))?;
        let month = parse_two_digits(s, 4)?;
        let day = parse_two_digits(s, 6)?;
        let hour = parse_two_digits(s, 8)?;
        let minute = parse_two_digits(s, 10)?;
        let mut rest = &s[12..];
        let mut second = None;
        let mut millis = None;
        if rest.len() >= 2 && rest.as_bytes()[0].is_ascii_digit() {
            second = Some(parse_two_digits(rest, 0)?);
            rest = &rest[2..];
            if let Some(stripped) = rest.strip_prefix('.') {
                let frac_len = stripped
                    .bytes()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                let frac = &stripped[..frac_len];
                millis = Some(
                    format!("{:0<3}", &frac[..frac_len.min(3)])
                        .parse()
                        .map_err(|_| crate::invalid!("bad fractional seconds"))?,
                );
                rest = &stripped[frac_len..];
            }
        }
        let offset = parse_offset(rest)?;
        Ok(GeneralizedTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millis,
            offset,
        })
    }
}

fn parse_two_digits(s: &str, at: usize) -> Result<u8> {
    s.get(at..at + 2)
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| crate::invalid!("bad two-digit field at offset {at} in {s:?}"))
}

fn format_offset(offset: TimeZone) -> String {
    match offset {
        TimeZone::Utc => "Z".to_string(),
        TimeZone::Offset {
            positive,
            hours,
            minutes,
        } => format!(
            "{}{:02}{:02}",
            if positive { '+' } else { '-' },
            hours,
            minutes
        ),
    }
}

fn parse_offset(s: &str) -> Result<TimeZone> {
    if s == "Z" {
        return Ok(TimeZone::Utc);
    }
    if s.len() == 5 {
        let positive = match s.as_bytes()[0] {
            b'+' => true,
            b'-' => false,
            _ => return Err(crate::invalid!("bad time zone offset {s:?}")),
        };
        let hours = parse_two_digits(s, 1)?;
        let minutes = parse_two_digits(s, 3)?;
        return Ok(TimeZone::Offset {
            positive,
            hours,
            minutes,
        });
    }
    Err(Error::Invalid(format!("bad time zone offset {s:?}")))
}
