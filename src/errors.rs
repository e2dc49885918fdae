//! Error type for identity parsing and address-pool operations.
//!
//! Only recoverable conditions are represented here.  Internal invariant
//! violations (sentinel where a live index was expected, refcount underflow,
//! slot index out of range) are programmer errors and panic instead.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Textual identity, DN, or range failed to parse.
    Malformed(String),
    /// New address pool partially overlaps an installed one.
    PoolOverlap,
    /// Every address in the pool is leased and the arena cannot grow.
    PoolExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed(msg) => write!(f, "{msg}"),
            Error::PoolOverlap => write!(f, "ERROR: partial overlap of addresspool"),
            Error::PoolExhausted => write!(f, "no free address in addresspool"),
        }
    }
}

impl std::error::Error for Error {}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Malformed(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Malformed(msg.to_string())
    }
}
