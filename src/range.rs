//! Inclusive IP address ranges, the unit in which address pools are declared.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::errors::Error;
use crate::helpers::{addr_as_u128, cmp_addr};

/// An inclusive range of addresses of one family.
///
/// A range never contains the unspecified address (`0.0.0.0` / `::`);
/// `lease_an_address` relies on this when it adds a slot index to the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    start: IpAddr,
    end: IpAddr,
}

impl IpRange {
    pub fn new(start: IpAddr, end: IpAddr) -> Result<IpRange, Error> {
        if start.is_ipv4() != end.is_ipv4() {
            return Err(Error::Malformed(format!(
                "address range {start}-{end} mixes families"
            )));
        }
        if cmp_addr(&start, &end) == std::cmp::Ordering::Greater {
            return Err(Error::Malformed(format!(
                "address range {start}-{end} is empty"
            )));
        }
        // start is the minimum, so the range holds the unspecified address
        // exactly when start is it.
        if start.is_unspecified() {
            return Err(Error::Malformed(format!(
                "address range {start}-{end} includes the unspecified address"
            )));
        }
        Ok(IpRange { start, end })
    }

    pub fn start(&self) -> IpAddr {
        self.start
    }

    pub fn end(&self) -> IpAddr {
        self.end
    }

    /// Number of addresses in the range, saturated to `u32::MAX`.  The
    /// second value reports whether truncation happened (large IPv6 pools).
    pub fn size(&self) -> (u32, bool) {
        let d = addr_as_u128(&self.end) - addr_as_u128(&self.start);
        if d >= u32::MAX as u128 {
            (u32::MAX, true)
        } else {
            (d as u32 + 1, false)
        }
    }
}

impl FromStr for IpRange {
    type Err = Error;

    /// Parses the `start-end` form used by pool declarations.
    fn from_str(s: &str) -> Result<IpRange, Error> {
        let (a, b) = s
            .split_once('-')
            .ok_or_else(|| Error::Malformed(format!("expected <start>-<end> in \"{s}\"")))?;
        let start: IpAddr = a
            .trim()
            .parse()
            .map_err(|_| Error::Malformed(format!("bad address \"{a}\" in range")))?;
        let end: IpAddr = b
            .trim()
            .parse()
            .map_err(|_| Error::Malformed(format!("bad address \"{b}\" in range")))?;
        IpRange::new(start, end)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_prints() {
        let r: IpRange = "192.0.2.10-192.0.2.12".parse().unwrap();
        assert_eq!(r.start(), "192.0.2.10".parse::<IpAddr>().unwrap());
        assert_eq!(r.end(), "192.0.2.12".parse::<IpAddr>().unwrap());
        assert_eq!(r.to_string(), "192.0.2.10-192.0.2.12");
        assert_eq!(r.size(), (3, false));
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!("192.0.2.12-192.0.2.10".parse::<IpRange>().is_err());
        assert!("0.0.0.0-0.0.0.10".parse::<IpRange>().is_err());
        assert!("192.0.2.1-2001:db8::1".parse::<IpRange>().is_err());
        assert!("192.0.2.1".parse::<IpRange>().is_err());
    }

    #[test]
    fn oversized_v6_range_truncates() {
        let r: IpRange = "2001:db8::-2001:db8:0:1::".parse().unwrap();
        let (size, truncated) = r.size();
        assert_eq!(size, u32::MAX);
        assert!(truncated);
    }

    #[test]
    fn single_address_range() {
        let r: IpRange = "10.0.0.1-10.0.0.1".parse().unwrap();
        assert_eq!(r.size(), (1, false));
    }
}
