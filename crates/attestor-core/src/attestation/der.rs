//! Minimal DER TLV codec with high-tag-number support.
//!
//! The attestation schema tags authorization entries with context-specific
//! numbers up to 719 (and beyond for newer tags), which generic DER derive
//! crates cannot express. Values are kept as raw TLVs so unknown entries
//! survive a decode/encode cycle untouched.

use crate::error::DerError;

pub const TAG_BOOLEAN: u32 = 1;
pub const TAG_INTEGER: u32 = 2;
pub const TAG_BIT_STRING: u32 = 3;
pub const TAG_OCTET_STRING: u32 = 4;
pub const TAG_NULL: u32 = 5;
pub const TAG_ENUMERATED: u32 = 10;
pub const TAG_SEQUENCE: u32 = 16;
pub const TAG_SET: u32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Class {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

impl Class {
    fn bits(self) -> u8 {
        match self {
            Class::Universal => 0x00,
            Class::Application => 0x40,
            Class::ContextSpecific => 0x80,
            Class::Private => 0xc0,
        }
    }

    fn from_bits(b: u8) -> Self {
        match b & 0xc0 {
            0x00 => Class::Universal,
            0x40 => Class::Application,
            0x80 => Class::ContextSpecific,
            _ => Class::Private,
        }
    }
}

/// One decoded TLV. `value` holds the raw content octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub class: Class,
    pub constructed: bool,
    pub tag: u32,
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn new(class: Class, constructed: bool, tag: u32, value: Vec<u8>) -> Self {
        Self {
            class,
            constructed,
            tag,
            value,
        }
    }

    pub fn integer(v: i64) -> Self {
        Self::new(Class::Universal, false, TAG_INTEGER, encode_integer(v))
    }

    pub fn enumerated(v: i64) -> Self {
        Self::new(Class::Universal, false, TAG_ENUMERATED, encode_integer(v))
    }

    pub fn boolean(v: bool) -> Self {
        Self::new(Class::Universal, false, TAG_BOOLEAN, vec![if v { 0xff } else { 0x00 }])
    }

    pub fn octet_string(bytes: &[u8]) -> Self {
        Self::new(Class::Universal, false, TAG_OCTET_STRING, bytes.to_vec())
    }

    pub fn null() -> Self {
        Self::new(Class::Universal, false, TAG_NULL, Vec::new())
    }

    /// BIT STRING with `bits` numbered from the most significant bit of the first octet,
    /// trailing zero bits trimmed as DER requires for named bit lists.
    pub fn named_bits(bits: u16) -> Self {
        if bits == 0 {
            return Self::new(Class::Universal, false, TAG_BIT_STRING, vec![0]);
        }
        let highest = 15 - bits.trailing_zeros() as usize;
        let octets = highest / 8 + 1;
        let unused = (octets * 8 - 1 - highest) as u8;
        let bytes = bits.to_be_bytes();
        let mut value = vec![unused];
        value.extend_from_slice(&bytes[..octets]);
        Self::new(Class::Universal, false, TAG_BIT_STRING, value)
    }

    pub fn sequence(children: Vec<Tlv>) -> Self {
        Self::new(Class::Universal, true, TAG_SEQUENCE, concat(&children))
    }

    /// SET OF, elements sorted by their encodings.
    pub fn set_of(children: Vec<Tlv>) -> Self {
        let mut encoded: Vec<Vec<u8>> = children.iter().map(Tlv::to_der).collect();
        encoded.sort();
        Self::new(Class::Universal, true, TAG_SET, encoded.concat())
    }

    /// `[tag] EXPLICIT inner`.
    pub fn explicit(tag: u32, inner: &Tlv) -> Self {
        Self::new(Class::ContextSpecific, true, tag, inner.to_der())
    }

    pub fn is(&self, class: Class, tag: u32) -> bool {
        self.class == class && self.tag == tag
    }

    fn expect(&self, class: Class, tag: u32) -> Result<(), DerError> {
        if self.is(class, tag) {
            Ok(())
        } else {
            Err(DerError::UnexpectedTag {
                expected: format!("{class:?} {tag}"),
                found: format!("{:?} {}", self.class, self.tag),
            })
        }
    }

    pub fn as_integer(&self) -> Result<i64, DerError> {
        if !self.is(Class::Universal, TAG_ENUMERATED) {
            self.expect(Class::Universal, TAG_INTEGER)?;
        }
        decode_integer(&self.value)
    }

    pub fn as_bool(&self) -> Result<bool, DerError> {
        self.expect(Class::Universal, TAG_BOOLEAN)?;
        match self.value.as_slice() {
            [0x00] => Ok(false),
            [_] => Ok(true),
            _ => Err(DerError::Malformed("BOOLEAN must be one octet".into())),
        }
    }

    pub fn as_octets(&self) -> Result<&[u8], DerError> {
        self.expect(Class::Universal, TAG_OCTET_STRING)?;
        Ok(&self.value)
    }

    /// Decode the content of a constructed TLV.
    pub fn children(&self) -> Result<Vec<Tlv>, DerError> {
        if !self.constructed {
            return Err(DerError::Malformed("primitive value has no children".into()));
        }
        Tlv::parse_all(&self.value)
    }

    /// The single TLV wrapped by an EXPLICIT tag.
    pub fn unwrap_explicit(&self) -> Result<Tlv, DerError> {
        let mut children = self.children()?;
        if children.len() != 1 {
            return Err(DerError::Malformed(format!(
                "explicit [{}] wraps {} values",
                self.tag,
                children.len()
            )));
        }
        Ok(children.remove(0))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let first = self.class.bits() | if self.constructed { 0x20 } else { 0 };
        if self.tag < 31 {
            out.push(first | self.tag as u8);
        } else {
            out.push(first | 0x1f);
            let mut groups = Vec::new();
            let mut t = self.tag;
            loop {
                groups.push((t & 0x7f) as u8);
                t >>= 7;
                if t == 0 {
                    break;
                }
            }
            for (i, g) in groups.iter().enumerate().rev() {
                out.push(if i == 0 { *g } else { g | 0x80 });
            }
        }
        encode_length(self.value.len(), out);
        out.extend_from_slice(&self.value);
    }

    pub fn to_der(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.value.len() + 6);
        self.encode(&mut out);
        out
    }

    /// Parse one TLV, returning it and the remaining input.
    pub fn parse(input: &[u8]) -> Result<(Tlv, &[u8]), DerError> {
        let (&first, mut rest) = input.split_first().ok_or(DerError::Truncated)?;
        let class = Class::from_bits(first);
        let constructed = first & 0x20 != 0;
        let mut tag = u32::from(first & 0x1f);
        if tag == 0x1f {
            tag = 0;
            loop {
                let (&b, r) = rest.split_first().ok_or(DerError::Truncated)?;
                rest = r;
                if tag > (u32::MAX >> 7) {
                    return Err(DerError::TagOverflow);
                }
                tag = (tag << 7) | u32::from(b & 0x7f);
                if b & 0x80 == 0 {
                    break;
                }
            }
        }

        let (&len_byte, r) = rest.split_first().ok_or(DerError::Truncated)?;
        rest = r;
        let len = if len_byte < 0x80 {
            usize::from(len_byte)
        } else {
            let n = usize::from(len_byte & 0x7f);
            if n == 0 || n > std::mem::size_of::<usize>() {
                return Err(DerError::BadLength);
            }
            if rest.len() < n {
                return Err(DerError::Truncated);
            }
            let (len_bytes, r) = rest.split_at(n);
            rest = r;
            len_bytes.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b))
        };

        if rest.len() < len {
            return Err(DerError::Truncated);
        }
        let (value, rest) = rest.split_at(len);
        Ok((Tlv::new(class, constructed, tag, value.to_vec()), rest))
    }

    /// Parse exactly one TLV spanning the whole input.
    pub fn parse_exact(input: &[u8]) -> Result<Tlv, DerError> {
        let (tlv, rest) = Tlv::parse(input)?;
        if !rest.is_empty() {
            return Err(DerError::Malformed(format!("{} trailing bytes", rest.len())));
        }
        Ok(tlv)
    }

    pub fn parse_all(mut input: &[u8]) -> Result<Vec<Tlv>, DerError> {
        let mut out = Vec::new();
        while !input.is_empty() {
            let (tlv, rest) = Tlv::parse(input)?;
            out.push(tlv);
            input = rest;
        }
        Ok(out)
    }
}

fn concat(children: &[Tlv]) -> Vec<u8> {
    let mut out = Vec::new();
    for c in children {
        c.encode(&mut out);
    }
    out
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

/// Minimal two's-complement big-endian encoding.
fn encode_integer(v: i64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let (b, next) = (bytes[start], bytes[start + 1]);
        let redundant = (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn decode_integer(bytes: &[u8]) -> Result<i64, DerError> {
    if bytes.is_empty() {
        return Err(DerError::Malformed("empty INTEGER".into()));
    }
    // A leading 0x00 pad may push an unsigned 64-bit value to nine octets.
    let significant = if bytes.len() > 8 && bytes[0] == 0 { &bytes[1..] } else { bytes };
    if significant.len() > 8 {
        return Err(DerError::IntegerOverflow);
    }
    let negative = bytes[0] & 0x80 != 0;
    let mut v: i64 = if negative { -1 } else { 0 };
    for b in significant {
        v = (v << 8) | i64::from(*b);
    }
    if !negative && v < 0 {
        return Err(DerError::IntegerOverflow);
    }
    Ok(v)
}
