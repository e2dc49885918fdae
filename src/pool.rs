//! The lease arena behind an address pool.
//!
//! A pool owns an array of lease slots; slot `i` stands for address
//! `range.start + i`.  Slots link into intrusive doubly-linked lists (the
//! pool's free list, and one reusable chain per hash bucket) through integer
//! indices, never references, so the array can be resized in place.  Every
//! slot doubles as a bucket head for the chain `hash(name) % nr_leases`.
//!
//! A released lease with a bound name "lingers" at the tail of the free
//! list so the same peer is likely to recover its previous address; one-time
//! leases go back to the head and are recycled promptly.

use log::debug;

use crate::constants::SENTINEL;
use crate::errors::Error;
use crate::helpers::{add_to_address, hasher};
use crate::range::IpRange;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy)]
struct Entry {
    prev: u32,
    next: u32,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            prev: SENTINEL,
            next: SENTINEL,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ListHead {
    first: u32,
    last: u32,
    nr: u32,
}

impl Default for ListHead {
    fn default() -> Self {
        ListHead {
            first: SENTINEL,
            last: SENTINEL,
            nr: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Lease {
    lease_refcount: u32,

    free_entry: Entry,
    reusable_entry: Entry,

    /// Identity the lease is bound to; `None` means one-time.
    reusable_name: Option<String>,
    /// Chain of reusable leases hashing to this slot's index.
    reusable_bucket: ListHead,
}

/// Which intrusive list an operation works on.  The pairing is fixed: the
/// free list threads `free_entry`, bucket chains thread `reusable_entry`.
#[derive(Debug, Clone, Copy)]
enum ListId {
    Free,
    Bucket(u32),
}

/// A range of addresses leased out one at a time.
///
/// Shared by every connection that references the same range, hence the
/// reference count (maintained by the registry).
pub struct IpPool {
    pub(crate) pool_refcount: u32,
    r: IpRange,
    /// Number of addresses within the range (saturated for huge IPv6).
    size: u32,

    nr_reusable: u32,
    free_list: ListHead,
    nr_in_use: u32,
    /* free_list.nr + nr_in_use == leases.len() <= size */
    leases: Vec<Lease>,
}

impl IpPool {
    pub(crate) fn new(r: IpRange, size: u32) -> IpPool {
        assert!(size > 0);
        IpPool {
            pool_refcount: 0,
            r,
            size,
            nr_reusable: 0,
            free_list: ListHead::default(),
            nr_in_use: 0,
            leases: Vec::new(),
        }
    }

    pub fn range(&self) -> &IpRange {
        &self.r
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn nr_leases(&self) -> u32 {
        self.leases.len() as u32
    }

    pub fn nr_in_use(&self) -> u32 {
        self.nr_in_use
    }

    pub fn nr_free(&self) -> u32 {
        self.free_list.nr
    }

    pub fn nr_reusable(&self) -> u32 {
        self.nr_reusable
    }

    pub fn pool_refcount(&self) -> u32 {
        self.pool_refcount
    }

    /// Address of a slot: `range.start + index` on the last four octets.
    pub(crate) fn address(&self, slot: u32) -> IpAddr {
        add_to_address(&self.r.start(), slot)
    }

    /* ---- intrusive list primitives ---- */

    fn list(&self, id: ListId) -> ListHead {
        match id {
            ListId::Free => self.free_list,
            ListId::Bucket(b) => self.leases[b as usize].reusable_bucket,
        }
    }

    fn set_list(&mut self, id: ListId, l: ListHead) {
        match id {
            ListId::Free => self.free_list = l,
            ListId::Bucket(b) => self.leases[b as usize].reusable_bucket = l,
        }
    }

    fn entry(&self, slot: u32, id: ListId) -> Entry {
        let lease = &self.leases[slot as usize];
        match id {
            ListId::Free => lease.free_entry,
            ListId::Bucket(_) => lease.reusable_entry,
        }
    }

    fn set_entry(&mut self, slot: u32, id: ListId, e: Entry) {
        let lease = &mut self.leases[slot as usize];
        match id {
            ListId::Free => lease.free_entry = e,
            ListId::Bucket(_) => lease.reusable_entry = e,
        }
    }

    fn is_empty(&self, id: ListId) -> bool {
        let l = self.list(id);
        let nr_leases = self.leases.len() as u32;
        if l.nr == 0 {
            assert!(l.first == SENTINEL);
            assert!(l.last == SENTINEL);
            true
        } else {
            assert!(l.first != SENTINEL && l.first < nr_leases);
            assert!(l.last != SENTINEL && l.last < nr_leases);
            false
        }
    }

    fn head(&self, id: ListId) -> Option<u32> {
        if self.is_empty(id) {
            None
        } else {
            Some(self.list(id).first)
        }
    }

    fn append(&mut self, id: ListId, slot: u32) {
        let mut l = self.list(id);
        if self.is_empty(id) {
            l.first = slot;
            l.last = slot;
            self.set_entry(slot, id, Entry::default());
        } else {
            let old_last = l.last;
            self.set_entry(
                slot,
                id,
                Entry {
                    prev: old_last,
                    next: SENTINEL,
                },
            );
            let mut last_e = self.entry(old_last, id);
            last_e.next = slot;
            self.set_entry(old_last, id, last_e);
            l.last = slot;
        }
        l.nr += 1;
        self.set_list(id, l);
    }

    fn prepend(&mut self, id: ListId, slot: u32) {
        let mut l = self.list(id);
        if self.is_empty(id) {
            l.first = slot;
            l.last = slot;
            self.set_entry(slot, id, Entry::default());
        } else {
            let old_first = l.first;
            self.set_entry(
                slot,
                id,
                Entry {
                    prev: SENTINEL,
                    next: old_first,
                },
            );
            let mut first_e = self.entry(old_first, id);
            first_e.prev = slot;
            self.set_entry(old_first, id, first_e);
            l.first = slot;
        }
        l.nr += 1;
        self.set_list(id, l);
    }

    fn remove(&mut self, id: ListId, slot: u32) {
        let nr_leases = self.leases.len() as u32;
        let mut l = self.list(id);
        let e = self.entry(slot, id);
        if l.first == slot {
            l.first = e.next;
        } else {
            // not first; must have a prev
            assert!(e.prev != SENTINEL && e.prev < nr_leases);
            let mut prev_e = self.entry(e.prev, id);
            prev_e.next = e.next;
            self.set_entry(e.prev, id, prev_e);
        }
        if l.last == slot {
            l.last = e.prev;
        } else {
            // not last; must have a next
            assert!(e.next != SENTINEL && e.next < nr_leases);
            let mut next_e = self.entry(e.next, id);
            next_e.prev = e.prev;
            self.set_entry(e.next, id, next_e);
        }
        self.set_entry(slot, id, Entry::default());
        assert!(l.nr > 0);
        l.nr -= 1;
        self.set_list(id, l);
    }

    /// Links a named slot into its bucket chain.
    fn hash_lease(&mut self, slot: u32) {
        let lease = &self.leases[slot as usize];
        assert!(lease.reusable_entry.prev == SENTINEL);
        assert!(lease.reusable_entry.next == SENTINEL);
        let name = lease
            .reusable_name
            .as_deref()
            .expect("hashing a lease without a name");
        let bucket = hasher(name) % self.leases.len() as u32;
        self.append(ListId::Bucket(bucket), slot);
    }

    /* ---- lease lifecycle ---- */

    /// Looks for a lease lingering (or still active) under the same name.
    fn recover_lease(&mut self, that_name: &str) -> Option<u32> {
        if self.leases.is_empty() {
            return None;
        }
        let bucket = hasher(that_name) % self.leases.len() as u32;
        let mut current = self.list(ListId::Bucket(bucket)).first;
        while current != SENTINEL {
            let idx = current as usize;
            assert!(idx < self.leases.len());
            let next = self.leases[idx].reusable_entry.next;
            let found = self.leases[idx]
                .reusable_name
                .as_deref()
                .expect("reusable chain entry without a name")
                == that_name;
            if found {
                if self.leases[idx].lease_refcount == 0 {
                    self.remove(ListId::Free, current);
                    self.nr_in_use += 1;
                }
                self.leases[idx].lease_refcount += 1;
                debug!(
                    "pool {} lease {}: reclaimed using '{}'",
                    self.r,
                    self.address(current),
                    that_name
                );
                return Some(current);
            }
            current = next;
        }
        None
    }

    /// Doubles the arena (capped by the range size) and rebuilds the hash
    /// chains, which the resize invalidated.
    fn grow(&mut self) -> Result<(), Error> {
        let old_nr_leases = self.leases.len() as u32;
        if old_nr_leases >= self.size {
            debug!(
                "pool {}: no free address and no space to grow; size {} leases {} in-use {} free {} reusable {}",
                self.r, self.size, old_nr_leases, self.nr_in_use, self.free_list.nr, self.nr_reusable
            );
            return Err(Error::PoolExhausted);
        }
        let new_nr_leases = if old_nr_leases == 0 {
            1.min(self.size)
        } else {
            old_nr_leases.saturating_mul(2).min(self.size)
        };
        debug!(
            "pool {}: growing address pool from {} to {}",
            self.r, old_nr_leases, new_nr_leases
        );
        self.leases.resize_with(new_nr_leases as usize, Lease::default);
        // destroy the existing hash table
        for l in 0..old_nr_leases {
            let lease = &mut self.leases[l as usize];
            lease.reusable_entry = Entry::default();
            lease.reusable_bucket = ListHead::default();
        }
        // initialize the new leases and add them to the free list
        for l in old_nr_leases..new_nr_leases {
            self.prepend(ListId::Free, l);
        }
        // build a new hash table containing the old leases
        for l in 0..old_nr_leases {
            if self.leases[l as usize].reusable_name.is_some() {
                self.hash_lease(l);
            }
        }
        Ok(())
    }

    /// Takes the free-list head, stealing it from its previous owner if it
    /// was lingering, and binds `that_name` when the lease is reusable.
    fn allocate(&mut self, that_name: &str, reusable: bool) -> Result<u32, Error> {
        if self.is_empty(ListId::Free) {
            self.grow()?;
        }
        let slot = self.head(ListId::Free).expect("free list empty after growth");
        self.remove(ListId::Free, slot);
        if self.leases[slot as usize].reusable_name.is_some() {
            let old_name = self.leases[slot as usize]
                .reusable_name
                .take()
                .expect("checked above");
            debug!(
                "pool {} lease {}: stealing reusable lease from '{}'",
                self.r,
                self.address(slot),
                old_name
            );
            let bucket = hasher(&old_name) % self.leases.len() as u32;
            self.remove(ListId::Bucket(bucket), slot);
            self.nr_reusable -= 1;
        }
        if reusable {
            self.leases[slot as usize].reusable_name = Some(that_name.to_string());
            self.nr_reusable += 1;
            self.hash_lease(slot);
        }
        self.nr_in_use += 1;
        let lease = &mut self.leases[slot as usize];
        assert_eq!(lease.lease_refcount, 0);
        lease.lease_refcount += 1;
        Ok(slot)
    }

    /// Acquires a lease for `that_name`.  Returns the slot index and
    /// whether an existing lease was recovered.
    pub(crate) fn lease(&mut self, that_name: &str, reusable: bool) -> Result<(u32, bool), Error> {
        if reusable {
            if let Some(slot) = self.recover_lease(that_name) {
                return Ok((slot, true));
            }
        }
        let slot = self.allocate(that_name, reusable)?;
        Ok((slot, false))
    }

    /// Ends one reference to the lease in `slot`.  Releasing an address the
    /// pool never handed out is a caller bug and asserts.
    pub(crate) fn release(&mut self, slot: u32) {
        assert!(self.leases.len() as u32 <= self.size);
        assert!(
            slot < self.leases.len() as u32,
            "released address is not from this pool"
        );
        let idx = slot as usize;
        assert!(self.leases[idx].lease_refcount > 0);
        self.leases[idx].lease_refcount -= 1;
        if let Some(name) = self.leases[idx].reusable_name.as_deref() {
            if self.leases[idx].lease_refcount == 0 {
                debug!(
                    "pool {} lease {}: lingering reusable lease '{}'",
                    self.r,
                    self.address(slot),
                    name
                );
                self.append(ListId::Free, slot);
            } else {
                debug!(
                    "pool {} lease {}: returning reusable lease '{}' (still shared)",
                    self.r,
                    self.address(slot),
                    name
                );
            }
        } else {
            // cannot share: straight back to the head of the free list
            assert_eq!(self.leases[idx].lease_refcount, 0);
            self.prepend(ListId::Free, slot);
            debug!(
                "pool {} lease {}: returning one-time lease",
                self.r,
                self.address(slot)
            );
        }
    }
}
