//! IKE peer identities, as carried in IKE ID payloads (RFC 2407 DOI
//! 4.6.2.1): IP addresses, DNS names, user FQDNs, binary key IDs, and X.509
//! Distinguished Names.
//!
//! Parsing borrows from the caller's text where it can; [`Id::into_owned`]
//! deep-copies the name bytes when an identity outlives its source buffer.

use std::borrow::Cow;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::constants::MAX_WILDCARDS;
use crate::dn;
use crate::errors::Error;

/// A peer identity.  The name-carrying variants hold the raw bytes; for
/// `DerAsn1Dn` that is the DER encoding of the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Id<'a> {
    /// Take the identity from the peer certificate's Subject.
    FromCert,
    /// Wildcard: matches any identity.
    None,
    /// RFC 7619 NULL authentication.
    Null,
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    /// DNS name, stored without the leading `@` of the textual form.
    Fqdn(Cow<'a, [u8]>),
    /// `user@domain`; the `@` is retained per DOI 4.6.2.4.
    UserFqdn(Cow<'a, [u8]>),
    /// X.501 Distinguished Name, DER encoded.
    DerAsn1Dn(Cow<'a, [u8]>),
    /// Opaque binary identifier.
    KeyId(Cow<'a, [u8]>),
}

/// Discriminant of an [`Id`], for the places that dispatch on kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    FromCert,
    None,
    Null,
    Ipv4,
    Ipv6,
    Fqdn,
    UserFqdn,
    DerAsn1Dn,
    KeyId,
}

fn decode_hex_id(s: &str) -> Result<Vec<u8>, Error> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    hex::decode(digits).map_err(|_| Error::Malformed(format!("bad hex in id \"{s}\"")))
}

fn parse_addr<T: std::str::FromStr>(src: &str) -> Result<T, Error> {
    src.parse()
        .map_err(|_| Error::Malformed(format!("malformed address \"{src}\" in id")))
}

impl<'a> Id<'a> {
    /// The "match anything" identity (`%any`).
    pub fn any() -> Id<'static> {
        Id::None
    }

    /// Converts the textual form of an identity.
    ///
    /// With `oe_only` set (opportunistic encryption) only addresses and the
    /// plain `@fqdn` / `user@fqdn` forms are recognized; the `%` keywords
    /// and the binary `@#` / `@~` / `@[` forms are not special.
    pub fn parse(src: &'a str, oe_only: bool) -> Result<Id<'a>, Error> {
        if !oe_only && src == "%fromcert" {
            Ok(Id::FromCert)
        } else if !oe_only && src == "%none" {
            Ok(Id::None)
        } else if !oe_only && src == "%null" {
            Ok(Id::Null)
        } else if !oe_only && src.contains('=') {
            // ASCII X.501 DN, LDAP or openssl style; optional leading @
            let text = src.strip_prefix('@').unwrap_or(src);
            Ok(Id::DerAsn1Dn(Cow::Owned(dn::text_to_dn(text)?)))
        } else if !src.contains('@') {
            if src == "%any" || src == "0.0.0.0" {
                Ok(Id::None)
            } else if src.contains(':') {
                // !!! a colon selects IPv6; there is no notation to ask for
                // an FQDN resolved as IPv6
                let bare = src
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .unwrap_or(src);
                Ok(Id::Ipv6(parse_addr(bare)?))
            } else {
                Ok(Id::Ipv4(parse_addr(src)?))
            }
        } else if let Some(rest) = src.strip_prefix('@') {
            if !oe_only && rest.starts_with('#') {
                Ok(Id::KeyId(Cow::Owned(decode_hex_id(&rest[1..])?)))
            } else if !oe_only && rest.starts_with('~') {
                Ok(Id::DerAsn1Dn(Cow::Owned(decode_hex_id(&rest[1..])?)))
            } else if !oe_only && rest.starts_with('[') {
                let text = rest[1..].strip_suffix(']').unwrap_or(&rest[1..]);
                Ok(Id::KeyId(Cow::Borrowed(text.as_bytes())))
            } else {
                Ok(Id::Fqdn(Cow::Borrowed(rest.as_bytes())))
            }
        } else {
            Ok(Id::UserFqdn(Cow::Borrowed(src.as_bytes())))
        }
    }

    pub fn kind(&self) -> IdKind {
        match self {
            Id::FromCert => IdKind::FromCert,
            Id::None => IdKind::None,
            Id::Null => IdKind::Null,
            Id::Ipv4(_) => IdKind::Ipv4,
            Id::Ipv6(_) => IdKind::Ipv6,
            Id::Fqdn(_) => IdKind::Fqdn,
            Id::UserFqdn(_) => IdKind::UserFqdn,
            Id::DerAsn1Dn(_) => IdKind::DerAsn1Dn,
            Id::KeyId(_) => IdKind::KeyId,
        }
    }

    /// Name bytes of the identity; empty for the kinds that carry none.
    fn name(&self) -> &[u8] {
        match self {
            Id::Fqdn(n) | Id::UserFqdn(n) | Id::DerAsn1Dn(n) | Id::KeyId(n) => n,
            _ => &[],
        }
    }

    /// Is this a "match anything" id?
    pub fn is_any(&self) -> bool {
        match self {
            Id::None => true,
            Id::Ipv4(a) => a.is_unspecified(),
            Id::Ipv6(a) => a.is_unspecified(),
            _ => false,
        }
    }

    pub fn is_ipaddr(&self) -> bool {
        matches!(self, Id::Ipv4(_) | Id::Ipv6(_))
    }

    /// Detaches the identity from the buffer it was parsed from.
    pub fn into_owned(self) -> Id<'static> {
        match self {
            Id::FromCert => Id::FromCert,
            Id::None => Id::None,
            Id::Null => Id::Null,
            Id::Ipv4(a) => Id::Ipv4(a),
            Id::Ipv6(a) => Id::Ipv6(a),
            Id::Fqdn(n) => Id::Fqdn(Cow::Owned(n.into_owned())),
            Id::UserFqdn(n) => Id::UserFqdn(Cow::Owned(n.into_owned())),
            Id::DerAsn1Dn(n) => Id::DerAsn1Dn(Cow::Owned(n.into_owned())),
            Id::KeyId(n) => Id::KeyId(Cow::Owned(n.into_owned())),
        }
    }

    /// Identity equality.  `None` on either side is a wildcard and matches
    /// everything; otherwise the kinds must agree.
    pub fn same_id(&self, other: &Id<'_>) -> bool {
        if matches!(self, Id::None) || matches!(other, Id::None) {
            log::debug!("id of kind ID_NONE means wildcard match");
            return true;
        }
        if self.kind() != other.kind() {
            return false;
        }
        match self {
            Id::None => true,
            Id::Null => true,
            Id::Ipv4(_) | Id::Ipv6(_) => self == other,
            Id::Fqdn(_) | Id::UserFqdn(_) => fqdn_eq(self.name(), other.name()),
            Id::FromCert => {
                log::debug!("same_id() comparing ID_FROMCERT - unexpected");
                dn::same_dn_any_order(self.name(), other.name())
            }
            Id::DerAsn1Dn(_) => dn::same_dn_any_order(self.name(), other.name()),
            Id::KeyId(_) => self.name() == other.name(),
        }
    }

    /// Wildcard-aware match of this identity against `pattern`.  Returns
    /// the wildcard count on success.
    pub fn match_id(&self, pattern: &Id<'_>) -> Option<u32> {
        let result = if matches!(pattern, Id::None) {
            Some(MAX_WILDCARDS)
        } else if self.kind() != pattern.kind() {
            None
        } else if matches!(self, Id::DerAsn1Dn(_)) {
            dn::match_dn_any_order_wild(self.name(), pattern.name())
        } else if self.same_id(pattern) {
            Some(0)
        } else {
            None
        };
        log::debug!(
            "match_id a={} b={} results {}",
            self,
            pattern,
            if result.is_some() { "matched" } else { "fail" }
        );
        result
    }

    /// Number of wildcards carried by the identity when used as a pattern.
    pub fn count_wildcards(&self) -> u32 {
        match self {
            Id::None => MAX_WILDCARDS,
            Id::DerAsn1Dn(n) => dn::dn_count_wildcards(n),
            _ => 0,
        }
    }
}

/// FQDN comparison: case is ignored and trailing dots are ignored (even a
/// lone dot).
fn fqdn_eq(a: &[u8], b: &[u8]) -> bool {
    fn strip(mut s: &[u8]) -> &[u8] {
        while let [head @ .., b'.'] = s {
            s = head;
        }
        s
    }
    strip(a).eq_ignore_ascii_case(strip(b))
}

/// Emits printable ASCII, escaping everything else as `\HH`.
fn write_bytes(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for &b in bytes {
        if (0x20..0x7f).contains(&b) {
            write!(f, "{}", b as char)?;
        } else {
            write!(f, "\\{b:02X}")?;
        }
    }
    Ok(())
}

impl fmt::Display for Id<'_> {
    /// Textual form of the identity; only printable ASCII is emitted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::FromCert => write!(f, "%fromcert"),
            Id::None => write!(f, "(none)"),
            Id::Null => write!(f, "ID_NULL"),
            Id::Ipv4(a) => {
                if a.is_unspecified() {
                    write!(f, "%any")
                } else {
                    write!(f, "{a}")
                }
            }
            Id::Ipv6(a) => {
                if a.is_unspecified() {
                    write!(f, "%any")
                } else {
                    write!(f, "{a}")
                }
            }
            Id::Fqdn(n) => {
                write!(f, "@")?;
                write_bytes(f, n)
            }
            Id::UserFqdn(n) => write_bytes(f, n),
            Id::DerAsn1Dn(n) => match dn::dn_to_text(n) {
                Ok(text) => write!(f, "{text}"),
                // undecodable DN: fall back to the binary form
                Err(_) => write!(f, "@~{}", hex::encode(n)),
            },
            Id::KeyId(n) => write!(f, "@#0x{}", hex::encode(n)),
        }
    }
}

/// Placeholder identity usable where a connection end has none yet.
impl Default for Id<'static> {
    fn default() -> Self {
        Id::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Id<'_> {
        Id::parse(s, false).unwrap()
    }

    #[test]
    fn keyword_forms() {
        assert_eq!(parse("%fromcert"), Id::FromCert);
        assert_eq!(parse("%none"), Id::None);
        assert_eq!(parse("%null"), Id::Null);
        assert_eq!(parse("%any"), Id::None);
        assert_eq!(parse("0.0.0.0"), Id::None);
    }

    #[test]
    fn address_forms() {
        assert_eq!(parse("192.0.2.1"), Id::Ipv4("192.0.2.1".parse().unwrap()));
        assert_eq!(parse("2001:db8::1"), Id::Ipv6("2001:db8::1".parse().unwrap()));
        assert_eq!(parse("[2001:db8::1]"), Id::Ipv6("2001:db8::1".parse().unwrap()));
        assert!(Id::parse("192.0.2.999", false).is_err());
        assert!(Id::parse("not an id", false).is_err());
    }

    #[test]
    fn name_forms() {
        assert_eq!(parse("@gw.example"), Id::Fqdn(b"gw.example"[..].into()));
        assert_eq!(
            parse("user@example"),
            Id::UserFqdn(b"user@example"[..].into())
        );
    }

    #[test]
    fn key_id_forms() {
        assert_eq!(
            parse("@#0xdeadbeef"),
            Id::KeyId(vec![0xde, 0xad, 0xbe, 0xef].into())
        );
        assert_eq!(
            parse("@#deadbeef"),
            Id::KeyId(vec![0xde, 0xad, 0xbe, 0xef].into())
        );
        assert_eq!(parse("@[raw key]"), Id::KeyId(b"raw key"[..].into()));
        // only one trailing ] is stripped
        assert_eq!(parse("@[raw key]]"), Id::KeyId(b"raw key]"[..].into()));
        assert!(Id::parse("@#0xdeadbee", false).is_err());
        assert!(Id::parse("@#zzzz", false).is_err());
    }

    #[test]
    fn dn_forms() {
        let id = parse("CN=Example, O=Acme");
        assert_eq!(id.kind(), IdKind::DerAsn1Dn);
        assert_eq!(parse("@CN=Example, O=Acme"), id);
        let Id::DerAsn1Dn(der) = &id else { panic!() };
        let binary = format!("@~{}", hex::encode(der));
        assert_eq!(parse(&binary), id);
    }

    #[test]
    fn oe_only_restricts_the_grammar() {
        assert_eq!(
            Id::parse("@#x", true).unwrap(),
            Id::Fqdn(b"#x"[..].into())
        );
        assert_eq!(
            Id::parse("@[x]", true).unwrap(),
            Id::Fqdn(b"[x]"[..].into())
        );
        assert!(Id::parse("%fromcert", true).is_err());
    }

    #[test]
    fn formatting() {
        assert_eq!(parse("%fromcert").to_string(), "%fromcert");
        assert_eq!(parse("%any").to_string(), "(none)");
        assert_eq!(parse("%null").to_string(), "ID_NULL");
        assert_eq!(Id::Ipv4(Ipv4Addr::UNSPECIFIED).to_string(), "%any");
        assert_eq!(parse("192.0.2.1").to_string(), "192.0.2.1");
        assert_eq!(parse("@gw.example").to_string(), "@gw.example");
        assert_eq!(parse("user@example").to_string(), "user@example");
        assert_eq!(parse("@#0xdeadbeef").to_string(), "@#0xdeadbeef");
        assert_eq!(
            parse("CN=Example, O=Acme").to_string(),
            "CN=Example, O=Acme"
        );
    }

    #[test]
    fn non_printable_bytes_are_escaped() {
        let id = Id::Fqdn(Cow::Owned(b"a\x01b".to_vec()));
        assert_eq!(id.to_string(), "@a\\01b");
    }

    #[test]
    fn same_id_wildcard_and_kinds() {
        let fqdn = parse("@gw.example");
        assert!(Id::None.same_id(&fqdn));
        assert!(fqdn.same_id(&Id::None));
        assert!(fqdn.same_id(&fqdn));
        assert!(!fqdn.same_id(&parse("user@example")));
        assert!(parse("%null").same_id(&parse("%null")));
    }

    #[test]
    fn fqdn_comparison_ignores_case_and_trailing_dots() {
        assert!(parse("@GW.Example.").same_id(&parse("@gw.example")));
        assert!(parse("user@Example").same_id(&parse("USER@example...")));
        assert!(!parse("@gw.example").same_id(&parse("@gw.example.org")));
    }

    #[test]
    fn dn_identities_match_in_any_order() {
        let a = parse("CN=Example, O=Acme");
        let b = parse("O=Acme, CN=Example");
        assert!(a.same_id(&b));
    }

    #[test]
    fn match_id_counts_wildcards() {
        let fqdn = parse("@gw.example");
        assert_eq!(fqdn.match_id(&Id::None), Some(MAX_WILDCARDS));
        assert_eq!(fqdn.match_id(&fqdn), Some(0));
        assert_eq!(fqdn.match_id(&parse("@other.example")), None);
        assert_eq!(fqdn.match_id(&parse("user@example")), None);

        let subject = parse("CN=gw.example, O=Acme");
        let pattern = parse("CN=*, O=Acme");
        assert_eq!(subject.match_id(&pattern), Some(1));
        assert_eq!(pattern.count_wildcards(), 1);
        assert_eq!(Id::None.count_wildcards(), MAX_WILDCARDS);
        assert_eq!(fqdn.count_wildcards(), 0);
    }

    #[test]
    fn is_any_and_is_ipaddr() {
        assert!(Id::None.is_any());
        assert!(Id::Ipv4(Ipv4Addr::UNSPECIFIED).is_any());
        assert!(Id::Ipv6(Ipv6Addr::UNSPECIFIED).is_any());
        assert!(!parse("192.0.2.1").is_any());
        assert!(parse("192.0.2.1").is_ipaddr());
        assert!(!parse("@gw.example").is_ipaddr());
    }

    #[test]
    fn into_owned_preserves_value() {
        let text = String::from("@gw.example");
        let id = Id::parse(&text, false).unwrap();
        let owned: Id<'static> = id.clone().into_owned();
        assert_eq!(owned, Id::Fqdn(b"gw.example".to_vec().into()));
        assert!(owned.same_id(&id));
    }
}
