//! Peer identities and address-pool lease allocation for an IKE daemon.
//!
//! Two tightly-coupled subsystems:
//!
//! - [`id`]: the polymorphic IKE identity (RFC 2407 DOI 4.6.2.1) with
//!   textual parsing, canonical comparison, and wildcard matching, backed by
//!   the Distinguished Name machinery in [`dn`].
//! - [`pool`] / [`registry`]: lease allocation of single addresses from
//!   configured ranges during IKEv1 XAUTH/Mode-Config and IKEv2 CP
//!   exchanges, with lease reuse by peer identity.

pub mod constants;
pub mod dn;
pub mod errors;
pub mod helpers;
pub mod id;
pub mod pool;
pub mod range;
pub mod registry;
pub mod telemetry;

pub use errors::Error;
pub use id::{Id, IdKind};
pub use pool::IpPool;
pub use range::IpRange;
pub use registry::{Authby, Connection, PoolId, PoolRegistry};

use once_cell::sync::OnceCell;

// ---- logging bootstraper -------------------------------------------------
pub(crate) fn ensure_logging() {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_init(|| {
        // Fallback: simple env_logger with timestamps off.
        let _ = env_logger::builder()
            .format_timestamp(None)
            .is_test(std::env::var("RUST_TEST_THREADS").is_ok())
            .try_init();
    });
}
