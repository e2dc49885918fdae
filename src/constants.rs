//! Constants shared across the identity and address-pool modules.

/// Terminator for intrusive list links.  Lease slots refer to each other by
/// index so the backing array can be resized; `SENTINEL` marks "no slot".
pub const SENTINEL: u32 = u32::MAX;

/// Wildcard count reported for an ID that matches anything.
pub const MAX_WILDCARDS: u32 = 15;

/// Multiplier for the lease-name hash.  251 is a prime close to 256 (so
/// almost a byte shift).  There is no stronger requirement.
pub const NAME_HASH_MULTIPLIER: u32 = 251;
