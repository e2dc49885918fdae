//! X.501 Distinguished Names: DER traversal, textual conversion, and the
//! order-insensitive matching used when comparing certificate subjects.
//!
//! A DN is `SEQUENCE OF RDN`, an RDN is `SET OF AVA`, and an AVA is
//! `SEQUENCE { OID, value }`.  The walker below reads exactly that shape
//! (definite lengths only) rather than a general ASN.1 tree; matching needs
//! direct RDN traversal and nothing more.

use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;

use crate::errors::Error;

/* DER universal tags */
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_OID: u8 = 0x06;
const TAG_UTF8_STRING: u8 = 0x0c;
const TAG_NUMERIC_STRING: u8 = 0x12;
const TAG_PRINTABLE_STRING: u8 = 0x13;
const TAG_T61_STRING: u8 = 0x14;
const TAG_IA5_STRING: u8 = 0x16;
const TAG_VISIBLE_STRING: u8 = 0x1a;

/// One attribute-value assertion: `OID=value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ava<'a> {
    pub oid: &'a [u8],
    pub tag: u8,
    pub value: &'a [u8],
}

/// One relative distinguished name: a set of one or more AVAs.
#[derive(Debug, Clone, PartialEq)]
pub struct Rdn<'a> {
    pub avas: Vec<Ava<'a>>,
}

impl<'a> Ava<'a> {
    /// The value as text, when the DER string type permits.
    fn decoded(&self) -> Option<&'a str> {
        match self.tag {
            TAG_UTF8_STRING | TAG_NUMERIC_STRING | TAG_PRINTABLE_STRING | TAG_T61_STRING
            | TAG_IA5_STRING | TAG_VISIBLE_STRING => std::str::from_utf8(self.value).ok(),
            _ => None,
        }
    }

    fn is_wildcard(&self) -> bool {
        self.decoded() == Some("*")
    }
}

fn der_header(i: &[u8]) -> IResult<&[u8], (u8, usize)> {
    let (i, tag) = be_u8(i)?;
    if tag & 0x1f == 0x1f {
        // high tag numbers never appear in a DN
        return Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Tag,
        )));
    }
    let (i, l0) = be_u8(i)?;
    if l0 & 0x80 == 0 {
        return Ok((i, (tag, l0 as usize)));
    }
    let n = (l0 & 0x7f) as usize;
    if n == 0 || n > 4 {
        return Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::LengthValue,
        )));
    }
    let (i, len_bytes) = take(n)(i)?;
    let mut len = 0usize;
    for &b in len_bytes {
        len = (len << 8) | b as usize;
    }
    Ok((i, (tag, len)))
}

fn der_tlv(i: &[u8]) -> IResult<&[u8], (u8, &[u8])> {
    let (i, (tag, len)) = der_header(i)?;
    let (i, value) = take(len)(i)?;
    Ok((i, (tag, value)))
}

/// Decodes a DER DN into its RDN sequence.
pub fn parse_dn(der: &[u8]) -> Result<Vec<Rdn<'_>>, Error> {
    let bad = || Error::Malformed("malformed ASN.1 distinguished name".to_string());
    let (rest, (tag, mut seq)) = der_tlv(der).map_err(|_| bad())?;
    if tag != TAG_SEQUENCE || !rest.is_empty() {
        return Err(bad());
    }
    let mut rdns = Vec::new();
    while !seq.is_empty() {
        let (after_set, (tag, mut set)) = der_tlv(seq).map_err(|_| bad())?;
        if tag != TAG_SET {
            return Err(bad());
        }
        seq = after_set;
        let mut avas = Vec::new();
        while !set.is_empty() {
            let (after_ava, (tag, ava)) = der_tlv(set).map_err(|_| bad())?;
            if tag != TAG_SEQUENCE {
                return Err(bad());
            }
            set = after_ava;
            let (value_part, (tag, oid)) = der_tlv(ava).map_err(|_| bad())?;
            if tag != TAG_OID {
                return Err(bad());
            }
            let (tail, (vtag, value)) = der_tlv(value_part).map_err(|_| bad())?;
            if !tail.is_empty() {
                return Err(bad());
            }
            avas.push(Ava {
                oid,
                tag: vtag,
                value,
            });
        }
        if avas.is_empty() {
            return Err(bad());
        }
        rdns.push(Rdn { avas });
    }
    Ok(rdns)
}

/*
 * Attribute types understood in textual DNs.  First entry per OID is the
 * canonical print name; later entries are accepted aliases.
 */
const OID_CN: &[u8] = &[0x55, 0x04, 0x03];
const OID_SN: &[u8] = &[0x55, 0x04, 0x04];
const OID_SERIAL_NUMBER: &[u8] = &[0x55, 0x04, 0x05];
const OID_C: &[u8] = &[0x55, 0x04, 0x06];
const OID_L: &[u8] = &[0x55, 0x04, 0x07];
const OID_ST: &[u8] = &[0x55, 0x04, 0x08];
const OID_STREET: &[u8] = &[0x55, 0x04, 0x09];
const OID_O: &[u8] = &[0x55, 0x04, 0x0a];
const OID_OU: &[u8] = &[0x55, 0x04, 0x0b];
const OID_T: &[u8] = &[0x55, 0x04, 0x0c];
const OID_D: &[u8] = &[0x55, 0x04, 0x0d];
const OID_NAME: &[u8] = &[0x55, 0x04, 0x29];
const OID_G: &[u8] = &[0x55, 0x04, 0x2a];
const OID_I: &[u8] = &[0x55, 0x04, 0x2b];
const OID_E: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x01];
const OID_UN: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x02];
const OID_UID: &[u8] = &[0x09, 0x92, 0x26, 0x89, 0x93, 0xf2, 0x2c, 0x64, 0x01, 0x01];
const OID_DC: &[u8] = &[0x09, 0x92, 0x26, 0x89, 0x93, 0xf2, 0x2c, 0x64, 0x01, 0x19];

const ATTR_TYPES: &[(&str, &[u8])] = &[
    ("CN", OID_CN),
    ("SN", OID_SN),
    ("SERIALNUMBER", OID_SERIAL_NUMBER),
    ("C", OID_C),
    ("L", OID_L),
    ("ST", OID_ST),
    ("S", OID_ST),
    ("STREET", OID_STREET),
    ("O", OID_O),
    ("OU", OID_OU),
    ("T", OID_T),
    ("D", OID_D),
    ("N", OID_NAME),
    ("G", OID_G),
    ("I", OID_I),
    ("E", OID_E),
    ("EMAIL", OID_E),
    ("EMAILADDRESS", OID_E),
    ("UN", OID_UN),
    ("UNSTRUCTUREDNAME", OID_UN),
    ("UID", OID_UID),
    ("DC", OID_DC),
];

fn oid_for_name(name: &str) -> Option<&'static [u8]> {
    let upper = name.trim().to_ascii_uppercase();
    ATTR_TYPES
        .iter()
        .find(|(n, _)| *n == upper)
        .map(|(_, oid)| *oid)
}

fn name_for_oid(oid: &[u8]) -> Option<&'static str> {
    ATTR_TYPES.iter().find(|(_, o)| *o == oid).map(|(n, _)| *n)
}

/// Dotted-decimal rendering for attribute types not in the table.
fn oid_to_dotted(oid: &[u8]) -> String {
    let mut out = String::new();
    let mut iter = oid.iter();
    if let Some(&first) = iter.next() {
        let (x, y) = if first < 40 {
            (0, first)
        } else if first < 80 {
            (1, first - 40)
        } else {
            (2, first - 80)
        };
        out.push_str(&format!("{x}.{y}"));
        let mut arc: u64 = 0;
        for &b in iter {
            arc = (arc << 7) | (b & 0x7f) as u64;
            if b & 0x80 == 0 {
                out.push_str(&format!(".{arc}"));
                arc = 0;
            }
        }
    }
    out
}

fn push_len(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    push_len(out, content.len());
    out.extend_from_slice(content);
}

fn is_printable_string(s: &str) -> bool {
    s.bytes().all(|b| {
        b.is_ascii_alphanumeric() || matches!(b, b' ' | b'\'' | b'(' | b')' | b'+' | b',' | b'-' | b'.' | b'/' | b':' | b'=' | b'?')
    })
}

/// Splits a textual DN into `attr=value` parts on unescaped `,` or `/`.
fn split_dn_text(src: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;
    for c in src.chars() {
        if escaped {
            cur.push('\\');
            cur.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ',' || c == '/' {
            parts.push(std::mem::take(&mut cur));
        } else {
            cur.push(c);
        }
    }
    if escaped {
        cur.push('\\');
    }
    parts.push(cur);
    parts.retain(|p| !p.trim().is_empty());
    parts
}

fn unescape_value(v: &str) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let mut chars = v.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            None => return Err(Error::Malformed("dangling escape in DN value".to_string())),
            Some(e) if "\"+,;<>\\=# /".contains(e) => out.push(e as u8),
            Some(h1) => {
                // \XX hex escape
                let h2 = chars
                    .next()
                    .ok_or_else(|| Error::Malformed("truncated hex escape in DN".to_string()))?;
                let byte = u8::from_str_radix(&format!("{h1}{h2}"), 16)
                    .map_err(|_| Error::Malformed(format!("bad hex escape \\{h1}{h2} in DN")))?;
                out.push(byte);
            }
        }
    }
    Ok(out)
}

/// Converts an LDAP- or OpenSSL-style textual DN to its DER encoding.
///
/// Accepts `CN=Example, O=Acme` as well as `/CN=Example/O=Acme`; attribute
/// names are case-insensitive.  Every RDN holds a single AVA, which is how
/// configured DNs are written.
pub fn text_to_dn(src: &str) -> Result<Vec<u8>, Error> {
    let parts = split_dn_text(src);
    if parts.is_empty() {
        return Err(Error::Malformed("empty distinguished name".to_string()));
    }
    let mut rdns = Vec::new();
    for part in &parts {
        let (attr, value) = part.split_once('=').ok_or_else(|| {
            Error::Malformed(format!("expected attribute=value in DN near \"{part}\""))
        })?;
        let oid = oid_for_name(attr).ok_or_else(|| {
            Error::Malformed(format!("unknown attribute type \"{}\" in DN", attr.trim()))
        })?;
        let raw = unescape_value(value.trim())?;
        let tag = match std::str::from_utf8(&raw) {
            Ok(s) if is_printable_string(s) => TAG_PRINTABLE_STRING,
            _ => TAG_UTF8_STRING,
        };
        let mut ava = Vec::new();
        push_tlv(&mut ava, TAG_OID, oid);
        push_tlv(&mut ava, tag, &raw);
        let mut ava_seq = Vec::new();
        push_tlv(&mut ava_seq, TAG_SEQUENCE, &ava);
        let mut set = Vec::new();
        push_tlv(&mut set, TAG_SET, &ava_seq);
        rdns.push(set);
    }
    let content: Vec<u8> = rdns.concat();
    let mut dn = Vec::new();
    push_tlv(&mut dn, TAG_SEQUENCE, &content);
    Ok(dn)
}

fn escape_value(s: &str, out: &mut String) {
    let bytes = s.as_bytes();
    for (i, c) in s.char_indices() {
        let escape = match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' => true,
            '#' | ' ' if i == 0 => true,
            ' ' if i == bytes.len() - 1 => true,
            _ => false,
        };
        if escape {
            out.push('\\');
            out.push(c);
        } else if (c as u32) < 0x20 {
            out.push_str(&format!("\\{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
}

/// Renders a DER DN as RFC 4514-style text, in DER order with `, `
/// separators.  Unknown attribute types print in dotted decimal; values
/// that are not character strings print as `#<hex>`.
pub fn dn_to_text(der: &[u8]) -> Result<String, Error> {
    let rdns = parse_dn(der)?;
    let mut out = String::new();
    for (i, rdn) in rdns.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        for (j, ava) in rdn.avas.iter().enumerate() {
            if j > 0 {
                out.push('+');
            }
            match name_for_oid(ava.oid) {
                Some(name) => out.push_str(name),
                None => out.push_str(&oid_to_dotted(ava.oid)),
            }
            out.push('=');
            match ava.decoded() {
                Some(s) => escape_value(s, &mut out),
                None => {
                    out.push('#');
                    out.push_str(&hex::encode(ava.value));
                }
            }
        }
    }
    Ok(out)
}

/// Case-insensitive comparison with internal whitespace runs collapsed,
/// the canonical form certificate libraries use for directory strings.
fn dir_string_eq(a: &str, b: &str) -> bool {
    let canon = |s: &str| {
        let mut out = String::with_capacity(s.len());
        let mut in_space = false;
        for c in s.trim().chars() {
            if c.is_whitespace() {
                in_space = true;
            } else {
                if in_space {
                    out.push(' ');
                    in_space = false;
                }
                out.push(c.to_ascii_lowercase());
            }
        }
        out
    };
    canon(a) == canon(b)
}

fn ava_eq(a: &Ava<'_>, b: &Ava<'_>) -> bool {
    match (a.decoded(), b.decoded()) {
        (Some(x), Some(y)) => dir_string_eq(x, y),
        _ => a.tag == b.tag && a.value == b.value,
    }
}

/// Matches one RDN against another: every AVA on the right must find a
/// partner on the left with the same type.  When `wild` is supplied, a
/// right-hand value of `*` matches any left value and is recorded.
fn match_rdn(a: &Rdn<'_>, b: &Rdn<'_>, mut wild: Option<&mut bool>) -> bool {
    let mut matched = 0usize;
    for ava_b in &b.avas {
        for ava_a in &a.avas {
            if ava_a.oid != ava_b.oid {
                continue;
            }
            if let Some(w) = wild.as_deref_mut() {
                if ava_b.is_wildcard() {
                    *w = true;
                    matched += 1;
                    break;
                }
            }
            if ava_eq(ava_a, ava_b) {
                matched += 1;
                break;
            }
        }
    }
    matched > 0 && matched == b.avas.len()
}

/// Ordered comparison: RDN `i` of one side against RDN `i` of the other.
fn match_dn_ordered(a: &[u8], b: &[u8], mut wildcards: Option<&mut u32>) -> bool {
    let (da, db) = match (parse_dn(a), parse_dn(b)) {
        (Ok(da), Ok(db)) => (da, db),
        _ => return false,
    };
    if da.is_empty() || da.len() != db.len() {
        return false;
    }
    for (rdn_a, rdn_b) in da.iter().zip(&db) {
        let mut has_wild = false;
        let wild_arg = if wildcards.is_some() {
            Some(&mut has_wild)
        } else {
            None
        };
        if !match_rdn(rdn_a, rdn_b, wild_arg) {
            return false;
        }
        if let Some(w) = wildcards.as_deref_mut() {
            if has_wild {
                *w += 1;
            }
        }
    }
    true
}

/// Permutation comparison: each right RDN must match some left RDN, and
/// both sides must hold the same nonzero number of RDNs.
fn match_dn_unordered(a: &[u8], b: &[u8], mut wildcards: Option<&mut u32>) -> bool {
    let (da, db) = match (parse_dn(a), parse_dn(b)) {
        (Ok(da), Ok(db)) => (da, db),
        _ => return false,
    };
    let rdn_num = db.len();
    let mut matched = 0usize;
    for rdn_b in &db {
        for rdn_a in &da {
            let mut has_wild = false;
            let wild_arg = if wildcards.is_some() {
                Some(&mut has_wild)
            } else {
                None
            };
            if match_rdn(rdn_a, rdn_b, wild_arg) {
                matched += 1;
                if let Some(w) = wildcards.as_deref_mut() {
                    if has_wild {
                        *w += 1;
                    }
                }
                break;
            }
        }
    }
    matched > 0 && rdn_num > 0 && matched == rdn_num && da.len() == db.len()
}

/// Strict equality up to value canonicalization; RDN order matters.
pub fn same_dn(a: &[u8], b: &[u8]) -> bool {
    match_dn_ordered(a, b, None)
}

/// Equality under any RDN order.  The ordered walk runs first; the
/// permutation search is only the fallback.
pub fn same_dn_any_order(a: &[u8], b: &[u8]) -> bool {
    if same_dn(a, b) {
        return true;
    }
    log::debug!("DNs differ in order, retrying with any RDN order");
    match_dn_unordered(a, b, None)
}

/// Wildcard-aware match under any RDN order; `b` is the pattern side.
/// Returns the number of RDNs matched through a `*` value.
pub fn match_dn_any_order_wild(a: &[u8], b: &[u8]) -> Option<u32> {
    let mut wildcards = 0;
    if match_dn_ordered(a, b, Some(&mut wildcards)) {
        return Some(wildcards);
    }
    log::debug!(
        "DNs differ in order, retrying with any RDN order ({wildcards} wildcards so far)"
    );
    wildcards = 0;
    if match_dn_unordered(a, b, Some(&mut wildcards)) {
        Some(wildcards)
    } else {
        None
    }
}

/// Number of RDNs whose value is exactly `*`.
pub fn dn_count_wildcards(der: &[u8]) -> u32 {
    match parse_dn(der) {
        Ok(rdns) => rdns
            .iter()
            .filter(|rdn| rdn.avas.iter().any(Ava::is_wildcard))
            .count() as u32,
        Err(_) => 0,
    }
}
