//! Helper functions for address arithmetic and lease-name hashing.

use std::cmp::Ordering;
use std::net::IpAddr;

use crate::constants::NAME_HASH_MULTIPLIER;

/// Hash of a lease's reusable name, used to pick a bucket chain.
pub fn hasher(name: &str) -> u32 {
    let mut hash = 0u32;
    for &b in name.as_bytes() {
        hash = hash.wrapping_mul(NAME_HASH_MULTIPLIER).wrapping_add(b as u32);
    }
    hash
}

/// Last four octets of an address as a host-order integer.  Pool arithmetic
/// works on this window for both families; larger IPv6 pools are truncated
/// at install time.
fn low32(addr: &IpAddr) -> u32 {
    match addr {
        IpAddr::V4(a) => u32::from_be_bytes(a.octets()),
        IpAddr::V6(a) => {
            let o = a.octets();
            u32::from_be_bytes([o[12], o[13], o[14], o[15]])
        }
    }
}

/// `addr + i` computed in network byte order on the last four octets.
pub fn add_to_address(addr: &IpAddr, i: u32) -> IpAddr {
    match addr {
        IpAddr::V4(a) => {
            let n = u32::from_be_bytes(a.octets()).wrapping_add(i);
            IpAddr::V4(n.to_be_bytes().into())
        }
        IpAddr::V6(a) => {
            let mut o = a.octets();
            let n = u32::from_be_bytes([o[12], o[13], o[14], o[15]]).wrapping_add(i);
            o[12..16].copy_from_slice(&n.to_be_bytes());
            IpAddr::V6(o.into())
        }
    }
}

/// Offset of `addr` from `start`, as unsigned arithmetic on the last four
/// octets.  An address below `start` wraps to a huge value, so a single
/// bounds test against the lease count detects foreign addresses.
pub fn address_offset(start: &IpAddr, addr: &IpAddr) -> u32 {
    assert_eq!(
        start.is_ipv4(),
        addr.is_ipv4(),
        "address family mismatch against pool range"
    );
    low32(addr).wrapping_sub(low32(start))
}

/// Total order over addresses: family first, then octets.  Ranges of
/// different families never overlap under this order.
pub fn cmp_addr(a: &IpAddr, b: &IpAddr) -> Ordering {
    match (a, b) {
        (IpAddr::V4(x), IpAddr::V4(y)) => x.octets().cmp(&y.octets()),
        (IpAddr::V6(x), IpAddr::V6(y)) => x.octets().cmp(&y.octets()),
        (IpAddr::V4(_), IpAddr::V6(_)) => Ordering::Less,
        (IpAddr::V6(_), IpAddr::V4(_)) => Ordering::Greater,
    }
}

/// 128-bit value of an address, for range sizing.
pub fn addr_as_u128(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(a) => u32::from_be_bytes(a.octets()) as u128,
        IpAddr::V6(a) => u128::from_be_bytes(a.octets()),
    }
}
