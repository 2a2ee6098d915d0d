//! Error taxonomy for the SLIQ core.
//!
//! Mirrors the error categories from the design: most are absorbed at the
//! component boundary and surfaced (if at all) through facade callbacks. Only
//! [`SliqError::Fatal`] is meant to terminate the process, via [`log_fatal!`].

use std::fmt;

/// The SLIQ error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliqError {
    /// Decoder validation failed. The caller should silently drop the frame
    /// and keep the connection alive.
    MalformedHeader(&'static str),
    /// A received sequence number fell outside the advertised window.
    OutOfWindow { seq: u32, rcv_min: u32, rcv_max: u32 },
    /// An FEC group does not yet have enough members to decode.
    Undecodable { group_id: u32, have: u8, need: u8 },
    /// The peer opened too many streams, or reused a stream id.
    StreamLimitExceeded(u8),
    /// The handshake failed or timed out.
    HandshakeFailed(&'static str),
    /// The peer closed the connection in an orderly fashion.
    PeerClosed,
    /// The RTT manager has declared an outage on this connection.
    Outage,
    /// The packet pool could not satisfy an allocation.
    ResourceExhausted,
    /// An internal invariant was violated. Unrecoverable.
    Fatal(String),
}

impl fmt::Display for SliqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliqError::MalformedHeader(reason) => write!(f, "malformed header: {reason}"),
            SliqError::OutOfWindow { seq, rcv_min, rcv_max } => write!(
                f,
                "seq {seq} outside receive window [{rcv_min}, {rcv_max}]"
            ),
            SliqError::Undecodable { group_id, have, need } => write!(
                f,
                "fec group {group_id} undecodable: have {have}, need {need}"
            ),
            SliqError::StreamLimitExceeded(id) => {
                write!(f, "stream limit exceeded or id {id} reused")
            }
            SliqError::HandshakeFailed(reason) => write!(f, "handshake failed: {reason}"),
            SliqError::PeerClosed => write!(f, "peer closed the connection"),
            SliqError::Outage => write!(f, "connection is in an outage"),
            SliqError::ResourceExhausted => write!(f, "packet pool exhausted"),
            SliqError::Fatal(reason) => write!(f, "fatal invariant violation: {reason}"),
        }
    }
}

impl std::error::Error for SliqError {}

pub type Result<T> = std::result::Result<T, SliqError>;

/// Log a fatal invariant violation and abort the process.
///
/// Replaces the C++ side's Coverity-only abort hack buried inside logging
/// macros: here the diverging contract is visible at every call site and
/// enforced by the compiler (`-> !`).
#[macro_export]
macro_rules! log_fatal {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        panic!($($arg)*);
    }};
}
