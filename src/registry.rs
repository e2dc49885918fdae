//! The registry of installed address pools and the lease operations the IKE
//! responder calls against it.
//!
//! Pools are declared by connection configuration; declaring the same range
//! twice yields the same pool, and a range that partially overlaps an
//! installed pool is refused.  Connections hold a [`PoolId`], never a
//! reference: pools live in slots so a freed pool does not renumber the
//! rest, mirroring how leases are addressed inside a pool.
//!
//! All operations are serialized by the daemon's single-threaded event
//! loop; the registry is plain mutable state handed around explicitly.

use std::cmp::Ordering;
use std::net::IpAddr;

use log::{debug, error, warn};
use metrics::counter;

use crate::errors::Error;
use crate::helpers::{address_offset, cmp_addr};
use crate::id::{Id, IdKind};
use crate::pool::IpPool;
use crate::range::IpRange;

/// Stable handle to an installed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolId(usize);

/// How the remote peer authenticates itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authby {
    Rsasig,
    Ecdsa,
    Psk,
    Null,
}

/// The slice of a connection the address-pool code consumes.
#[derive(Debug)]
pub struct Connection {
    pub name: String,
    pub authby: Authby,
    pub policy_psk: bool,
    pub policy_auth_null: bool,
    /// The remote peer's identity.
    pub that_id: Id<'static>,
    /// Address assigned to the peer, once the caller installs a lease.
    pub client: Option<IpAddr>,
    pub has_lease: bool,
    pub pool: Option<PoolId>,
}

impl Connection {
    pub fn new(name: &str, authby: Authby, that_id: Id<'static>) -> Connection {
        Connection {
            name: name.to_string(),
            authby,
            policy_psk: false,
            policy_auth_null: false,
            that_id,
            client: None,
            has_lease: false,
            pool: None,
        }
    }
}

pub struct PoolRegistry {
    /// Installed pools; a freed pool leaves a reusable hole.
    pools: Vec<Option<IpPool>>,
    /// The daemon's uniqueids setting.  When off, multiple clients may
    /// present the same ID, so leases are never bound to a name.
    unique_ids: bool,
}

/// A lease can be re-offered to "the same peer" only when the identity is
/// distinctive: not PSK (group IDs, pre-NAT addresses), not NULL
/// authentication, not an ID that is merely an IP address, and only with
/// uniqueids enabled.
fn can_reuse_lease(unique_ids: bool, c: &Connection) -> bool {
    if c.policy_psk || c.authby == Authby::Psk {
        return false;
    }
    if c.policy_auth_null || c.authby == Authby::Null {
        return false;
    }
    if matches!(
        c.that_id.kind(),
        IdKind::Null | IdKind::None | IdKind::Ipv4 | IdKind::Ipv6
    ) {
        return false;
    }
    if !unique_ids {
        return false;
    }
    true
}

impl PoolRegistry {
    pub fn new(unique_ids: bool) -> PoolRegistry {
        crate::ensure_logging();
        PoolRegistry {
            pools: Vec::new(),
            unique_ids,
        }
    }

    pub fn pool(&self, id: PoolId) -> Option<&IpPool> {
        self.pools.get(id.0).and_then(Option::as_ref)
    }

    fn pool_mut(&mut self, id: PoolId) -> &mut IpPool {
        self.pools
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .expect("stale pool id")
    }

    /// Installed pools, in no particular order.
    pub fn pools(&self) -> impl Iterator<Item = (PoolId, &IpPool)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (PoolId(i), p)))
    }

    /// Finds a pool with exactly matching bounds.  A partial overlap with
    /// any installed pool is logged and returned as an error.
    pub fn find_addresspool(&self, pool_range: &IpRange) -> Result<Option<PoolId>, Error> {
        for (id, pool) in self.pools() {
            let a = pool_range;
            let b = pool.range();

            let sc = cmp_addr(&a.start(), &b.start());

            if sc == Ordering::Equal && cmp_addr(&a.end(), &b.end()) == Ordering::Equal {
                return Ok(Some(id));
            } else if match sc {
                Ordering::Less => cmp_addr(&a.end(), &b.start()) == Ordering::Less,
                _ => cmp_addr(&a.start(), &b.end()) == Ordering::Greater,
            } {
                // before or after
            } else {
                error!(
                    "ERROR: new addresspool {a} INEXACTLY OVERLAPS with existing one {b}."
                );
                return Err(Error::PoolOverlap);
            }
        }
        Ok(None)
    }

    /// Installs a pool for `pool_range`, reusing an exact match.
    ///
    /// The caller enforces that the range is non-empty and excludes the
    /// unspecified address ([`IpRange`] cannot be built otherwise).
    pub fn install_addresspool(&mut self, pool_range: IpRange) -> Result<PoolId, Error> {
        if let Some(id) = self.find_addresspool(&pool_range)? {
            let pool = self.pool_mut(id);
            debug!(
                "pool {}: reusing existing address pool; pool-refcount {} size {}",
                pool.range(),
                pool.pool_refcount,
                pool.size()
            );
            return Ok(id);
        }
        let (size, truncated) = pool_range.size();
        if truncated {
            warn!("WARNING addresspool size overflow truncated to {size}");
        }
        let pool = IpPool::new(pool_range, size);
        debug!("pool {}: creating new address pool, size {size}", pool.range());
        // reuse a hole left by a freed pool before growing the table
        let id = match self.pools.iter().position(Option::is_none) {
            Some(i) => {
                self.pools[i] = Some(pool);
                PoolId(i)
            }
            None => {
                self.pools.push(Some(pool));
                PoolId(self.pools.len() - 1)
            }
        };
        Ok(id)
    }

    /// Attaches `c` to the pool, taking a reference.
    pub fn reference_addresspool(&mut self, c: &mut Connection, id: PoolId) {
        let pool = self.pool_mut(id);
        pool.pool_refcount += 1;
        debug!(
            "pool {}: adding connection \"{}\"; pool-refcount {}",
            pool.range(),
            c.name,
            pool.pool_refcount
        );
        c.pool = Some(id);
    }

    /// Drops `c`'s reference; the last reference frees the pool.
    pub fn unreference_addresspool(&mut self, c: &mut Connection) {
        let id = c.pool.take().expect("connection has no address pool");
        let pool = self.pool_mut(id);
        debug!(
            "pool {}: unreference addresspool of conn \"{}\"; pool-refcount {}",
            pool.range(),
            c.name,
            pool.pool_refcount
        );
        assert!(pool.pool_refcount > 0);
        pool.pool_refcount -= 1;
        if pool.pool_refcount == 0 {
            debug!("pool {}: freeing address pool", pool.range());
            self.pools[id.0] = None;
        }
    }

    /// Assigns an address from the connection's pool to its peer.
    ///
    /// The address is only returned; the caller stores it on the connection
    /// and sets `has_lease` once the exchange commits to it.
    pub fn lease_an_address(&mut self, c: &Connection) -> Result<IpAddr, Error> {
        let id = c.pool.expect("connection has no address pool");
        let reusable = can_reuse_lease(self.unique_ids, c);
        let that_name = c.that_id.to_string();
        let pool = self.pool_mut(id);
        debug!(
            "pool {}: requesting {} lease for connection \"{}\" with '{}'",
            pool.range(),
            if reusable { "reusable" } else { "one-time" },
            c.name,
            that_name
        );
        let (slot, recovered) = pool.lease(&that_name, reusable)?;
        let addr = pool.address(slot);
        if recovered {
            counter!("ikepool_lease_recoveries_total").increment(1);
        } else {
            counter!("ikepool_leases_total").increment(1);
        }
        debug!(
            "pool {}: assigning {} lease {} to \"{}\" with ID '{}'",
            pool.range(),
            if reusable { "reusable" } else { "one-time" },
            addr,
            c.name,
            that_name
        );
        Ok(addr)
    }

    /// Returns the peer's leased address to the pool: reusable leases
    /// linger for the same identity, one-time leases free immediately.
    pub fn rel_lease_addr(&mut self, c: &mut Connection) {
        if !c.has_lease {
            return; // not from the addresspool, nothing to free
        }
        let id = c.pool.expect("lease without an address pool");
        let addr = c.client.expect("lease without a client address");
        let pool = self.pool_mut(id);
        let slot = address_offset(&pool.range().start(), &addr);
        pool.release(slot);
        c.has_lease = false;
        counter!("ikepool_lease_releases_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(name: &str, id_text: &str) -> Connection {
        let id = Id::parse(id_text, false).unwrap().into_owned();
        Connection::new(name, Authby::Rsasig, id)
    }

    fn registry_with(range: &str) -> (PoolRegistry, PoolId) {
        let mut reg = PoolRegistry::new(true);
        let id = reg
            .install_addresspool(range.parse().unwrap())
            .unwrap();
        (reg, id)
    }

    #[test]
    fn psk_and_null_auth_never_reuse() {
        let mut c = conn("c", "user-a@example");
        assert!(can_reuse_lease(true, &c));
        c.authby = Authby::Psk;
        assert!(!can_reuse_lease(true, &c));
        c.authby = Authby::Rsasig;
        c.policy_psk = true;
        assert!(!can_reuse_lease(true, &c));

        let mut c = conn("c", "user-a@example");
        c.policy_auth_null = true;
        assert!(!can_reuse_lease(true, &c));
        c.policy_auth_null = false;
        c.authby = Authby::Null;
        assert!(!can_reuse_lease(true, &c));
    }

    #[test]
    fn indistinct_ids_never_reuse() {
        assert!(!can_reuse_lease(true, &conn("c", "%any")));
        assert!(!can_reuse_lease(true, &conn("c", "%null")));
        assert!(!can_reuse_lease(true, &conn("c", "192.0.2.1")));
        assert!(!can_reuse_lease(true, &conn("c", "2001:db8::1")));
        assert!(can_reuse_lease(true, &conn("c", "@gw.example")));
        assert!(can_reuse_lease(true, &conn("c", "CN=gw, O=Acme")));
        // uniqueids=no disables sharing across the board
        assert!(!can_reuse_lease(false, &conn("c", "@gw.example")));
    }

    #[test]
    fn exact_range_reinstall_reuses_the_pool() {
        let (mut reg, id) = registry_with("10.0.0.1-10.0.0.8");
        let again = reg
            .install_addresspool("10.0.0.1-10.0.0.8".parse().unwrap())
            .unwrap();
        assert_eq!(id, again);
        assert_eq!(reg.pools().count(), 1);
    }

    #[test]
    fn overlapping_install_is_refused() {
        let (mut reg, _) = registry_with("10.0.0.0-10.0.0.255");
        let err = reg
            .install_addresspool("10.0.0.128-10.0.1.127".parse().unwrap())
            .unwrap_err();
        assert_eq!(err, Error::PoolOverlap);
        assert_eq!(reg.pools().count(), 1);
    }

    #[test]
    fn disjoint_pools_coexist() {
        let (mut reg, a) = registry_with("10.0.0.1-10.0.0.8");
        let b = reg
            .install_addresspool("10.0.1.1-10.0.1.8".parse().unwrap())
            .unwrap();
        let v6 = reg
            .install_addresspool("2001:db8::1-2001:db8::10".parse().unwrap())
            .unwrap();
        assert_ne!(a, b);
        assert_ne!(b, v6);
        assert_eq!(reg.pools().count(), 3);
    }

    #[test]
    fn refcount_drops_free_the_pool() {
        let (mut reg, id) = registry_with("10.0.0.1-10.0.0.8");
        let mut c1 = conn("one", "user-a@example");
        let mut c2 = conn("two", "user-b@example");
        reg.reference_addresspool(&mut c1, id);
        reg.reference_addresspool(&mut c2, id);
        assert_eq!(reg.pool(id).unwrap().pool_refcount(), 2);
        reg.unreference_addresspool(&mut c1);
        assert!(reg.pool(id).is_some());
        reg.unreference_addresspool(&mut c2);
        assert!(reg.pool(id).is_none());
        assert_eq!(c2.pool, None);
        // the slot is reusable for the next install
        let next = reg
            .install_addresspool("192.0.2.1-192.0.2.8".parse().unwrap())
            .unwrap();
        assert_eq!(next, id);
    }

    #[test]
    fn lease_and_release_round_trip() {
        let (mut reg, id) = registry_with("192.0.2.10-192.0.2.12");
        let mut c = conn("road", "user-a@example");
        reg.reference_addresspool(&mut c, id);
        let ip = reg.lease_an_address(&c).unwrap();
        assert_eq!(ip, "192.0.2.10".parse::<IpAddr>().unwrap());
        // the caller commits the lease to the connection
        c.client = Some(ip);
        c.has_lease = true;
        reg.rel_lease_addr(&mut c);
        assert!(!c.has_lease);
        assert_eq!(reg.pool(id).unwrap().nr_in_use(), 0);
        // releasing again is a no-op without has_lease
        reg.rel_lease_addr(&mut c);
    }
}
