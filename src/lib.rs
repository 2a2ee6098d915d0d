//! # sliq
//!
//! SLIQ: a UDP-based, connection-oriented, multi-stream reliable transport
//! with pluggable congestion control, configurable per-stream reliability
//! (best-effort, semi-reliable ARQ, semi-reliable ARQ+FEC, fully reliable
//! ARQ), ordered or unordered delivery, and in-band forward error correction
//! using systematic Vandermonde MDS codes over GF(256).
//!
//! ## Crate structure
//!
//! - [`wire`] — Frame encode/decode for every SLIQ header variant (C1)
//! - [`socket`] — Non-blocking UDP socket set, batched read/write (C2)
//! - [`rtt`] — SRTT/RTTVAR/RTO estimation and outage detection (C3)
//! - [`capacity`] — Channel/transport capacity estimation (C4)
//! - [`gf256`] / [`vdm_fec`] — Systematic Vandermonde MDS FEC codec (C5)
//! - [`received`] — Per-stream reorder buffer, FEC regeneration, ACK synthesis (C6)
//! - [`sent`] — Per-stream transmit window, retransmission, FEC grouping (C7)
//! - [`congestion`] — Pluggable congestion controllers: Cubic, Copa, Copa2, Copa3, FixedRate (C8)
//! - [`stream`] — Per-stream state machine and transmit queue (C9)
//! - [`connection`] — Connection state machine, handshake, dispatch (C10)
//! - [`connection_manager`] — Endpoint lookup and deferred connection reaping (C11)
//! - [`facade`] — Application-facing transport API (C12)
//! - [`stats`] — Rate counters, EWMAs, and per-link/aggregate statistics
//! - [`types`] — Shared data model: ids, reliability specs, congestion parameters
//! - [`error`] — The `SliqError` taxonomy

pub mod capacity;
pub mod congestion;
pub mod connection;
pub mod connection_manager;
pub mod error;
pub mod facade;
pub mod gf256;
pub mod received;
pub mod rtt;
pub mod sent;
pub mod socket;
pub mod stats;
pub mod stream;
pub mod types;
pub mod vdm_fec;
pub mod wire;
