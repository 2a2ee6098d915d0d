//! Socket Manager (C2).
//!
//! Owns a set of non-blocking UDP sockets and provides the batched
//! read/write boundary the rest of the core treats as its I/O provider.
//! Timers and packet-buffer pooling are injected by the application per
//! the design's scope cut; this module only ever touches sockets.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};

use bytes::Bytes;

use crate::error::SliqError;

/// Opaque handle for a socket owned by the manager.
pub type SocketId = u32;

/// Result of a single non-blocking write.
#[derive(Debug)]
pub enum SocketWriteResult {
    /// The full payload was accepted by the kernel.
    Ok(usize),
    /// The socket's send buffer is full; retry once writable.
    Blocked,
    Err(SliqError),
}

/// Default number of datagrams drained per [`SocketManager::read_packets`]
/// call, bounding how long one service loop iteration can run.
pub const DEFAULT_READ_BATCH: usize = 64;

struct Socket {
    udp: UdpSocket,
    local_addr: SocketAddr,
}

/// Owns a set of non-blocking UDP sockets, keyed by an opaque [`SocketId`].
pub struct SocketManager {
    sockets: HashMap<SocketId, Socket>,
    next_id: SocketId,
    read_batch: usize,
}

impl SocketManager {
    pub fn new() -> Self {
        SocketManager {
            sockets: HashMap::new(),
            next_id: 0,
            read_batch: DEFAULT_READ_BATCH,
        }
    }

    pub fn with_read_batch(mut self, batch: usize) -> Self {
        self.read_batch = batch.max(1);
        self
    }

    /// Create and bind a non-blocking UDP socket to `addr`.
    pub fn create(&mut self, addr: SocketAddr) -> Result<SocketId, SliqError> {
        let udp = UdpSocket::bind(addr).map_err(io_err)?;
        udp.set_nonblocking(true).map_err(io_err)?;
        let local_addr = udp.local_addr().map_err(io_err)?;
        let id = self.next_id;
        self.next_id += 1;
        self.sockets.insert(id, Socket { udp, local_addr });
        Ok(id)
    }

    /// Connect a socket to a single peer, so `send`/`recv` without an
    /// explicit address can be used (the client-data endpoint case).
    pub fn connect(&mut self, id: SocketId, peer: SocketAddr) -> Result<(), SliqError> {
        let sock = self.sockets.get(&id).ok_or(SliqError::ResourceExhausted)?;
        sock.udp.connect(peer).map_err(io_err)
    }

    pub fn local_addr(&self, id: SocketId) -> Option<SocketAddr> {
        self.sockets.get(&id).map(|s| s.local_addr)
    }

    pub fn remove(&mut self, id: SocketId) {
        self.sockets.remove(&id);
    }

    pub fn socket_ids(&self) -> Vec<SocketId> {
        self.sockets.keys().copied().collect()
    }

    /// The underlying raw file descriptor for `id`, for applications that
    /// drive their own `select`/`poll`/`epoll` main loop rather than using
    /// a higher-level event library.
    #[cfg(unix)]
    pub fn as_raw_fd(&self, id: SocketId) -> Option<std::os::fd::RawFd> {
        use std::os::fd::AsRawFd;
        self.sockets.get(&id).map(|s| s.udp.as_raw_fd())
    }

    /// Write one datagram to `dst`. Never blocks: a full send buffer
    /// reports [`SocketWriteResult::Blocked`] rather than waiting.
    pub fn write_packet(&self, id: SocketId, dst: SocketAddr, payload: &[u8]) -> SocketWriteResult {
        let Some(sock) = self.sockets.get(&id) else {
            return SocketWriteResult::Err(SliqError::ResourceExhausted);
        };
        match sock.udp.send_to(payload, dst) {
            Ok(n) => SocketWriteResult::Ok(n),
            Err(e) if would_block(&e) => SocketWriteResult::Blocked,
            Err(e) => SocketWriteResult::Err(io_err(e)),
        }
    }

    /// Drain up to the configured batch size of waiting datagrams from
    /// socket `id`. Returns an empty vec once nothing more is ready.
    pub fn read_packets(&self, id: SocketId) -> Result<Vec<(SocketAddr, Bytes)>, SliqError> {
        let sock = self.sockets.get(&id).ok_or(SliqError::ResourceExhausted)?;
        let mut out = Vec::new();
        let mut buf = [0u8; 65536];
        for _ in 0..self.read_batch {
            match sock.udp.recv_from(&mut buf) {
                Ok((n, addr)) => out.push((addr, Bytes::copy_from_slice(&buf[..n]))),
                Err(e) if would_block(&e) => break,
                Err(e) => return Err(io_err(e)),
            }
        }
        Ok(out)
    }
}

impl Default for SocketManager {
    fn default() -> Self {
        Self::new()
    }
}

fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}

fn io_err(e: io::Error) -> SliqError {
    SliqError::Fatal(format!("socket io error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_exchange_datagram() {
        let mut a = SocketManager::new();
        let mut b = SocketManager::new();
        let id_a = a.create("127.0.0.1:0".parse().unwrap()).unwrap();
        let id_b = b.create("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr_b = b.local_addr(id_b).unwrap();

        match a.write_packet(id_a, addr_b, b"hello") {
            SocketWriteResult::Ok(n) => assert_eq!(n, 5),
            other => panic!("unexpected write result: {other:?}"),
        }

        std::thread::sleep(std::time::Duration::from_millis(20));
        let pkts = b.read_packets(id_b).unwrap();
        assert_eq!(pkts.len(), 1);
        assert_eq!(&pkts[0].1[..], b"hello");
    }

    #[test]
    fn read_with_nothing_waiting_is_empty() {
        let mut a = SocketManager::new();
        let id = a.create("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(a.read_packets(id).unwrap().is_empty());
    }
}

impl std::fmt::Debug for SocketWriteResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketWriteResult::Ok(n) => write!(f, "Ok({n})"),
            SocketWriteResult::Blocked => write!(f, "Blocked"),
            SocketWriteResult::Err(e) => write!(f, "Err({e})"),
        }
    }
}
