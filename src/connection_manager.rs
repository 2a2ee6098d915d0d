//! Connection Manager (C11).
//!
//! Indexes live connections two ways: a 16x64 block/slot table keyed by
//! endpoint id (the primary index, sized to bound worst-case lookup to two
//! array derefs), and a linear secondary index keyed by peer socket
//! address for demultiplexing inbound datagrams before the endpoint id is
//! known. Deletion is deferred: a reaper sweep collects endpoint ids
//! marked closed rather than freeing them inline, so a closing
//! connection's last few in-flight frames don't land on a slot already
//! reused by a new one.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::connection::Connection;
use crate::types::EndptId;

const NUM_BLOCKS: usize = 16;
const SLOTS_PER_BLOCK: usize = 64;
const MAX_CONNECTIONS: usize = NUM_BLOCKS * SLOTS_PER_BLOCK;

struct Slot {
    endpt_id: EndptId,
    conn: Connection,
    peer: SocketAddr,
    pending_delete: bool,
}

/// Owns every live connection on one transport instance.
pub struct ConnectionManager {
    blocks: Vec<Vec<Option<Slot>>>,
    by_peer: HashMap<SocketAddr, EndptId>,
    next_endpt_id: EndptId,
    reap_queue: Vec<EndptId>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        ConnectionManager {
            blocks: (0..NUM_BLOCKS).map(|_| (0..SLOTS_PER_BLOCK).map(|_| None).collect()).collect(),
            by_peer: HashMap::new(),
            next_endpt_id: 1,
            reap_queue: Vec::new(),
        }
    }

    fn locate(endpt_id: EndptId) -> (usize, usize) {
        let idx = (endpt_id.unsigned_abs() as usize) % MAX_CONNECTIONS;
        (idx / SLOTS_PER_BLOCK, idx % SLOTS_PER_BLOCK)
    }

    /// Insert a new connection, allocating its endpoint id. Returns
    /// `Err` if every slot is occupied (reap first).
    pub fn insert(&mut self, peer: SocketAddr, conn: Connection) -> Result<EndptId, &'static str> {
        for _ in 0..MAX_CONNECTIONS {
            let id = self.next_endpt_id;
            self.next_endpt_id = self.next_endpt_id.wrapping_add(1).max(1);
            let (block, slot) = Self::locate(id);
            if self.blocks[block][slot].is_none() {
                self.blocks[block][slot] = Some(Slot {
                    endpt_id: id,
                    conn,
                    peer,
                    pending_delete: false,
                });
                self.by_peer.insert(peer, id);
                return Ok(id);
            }
        }
        Err("connection table full")
    }

    pub fn get(&self, endpt_id: EndptId) -> Option<&Connection> {
        let (block, slot) = Self::locate(endpt_id);
        self.blocks[block][slot].as_ref().filter(|s| s.endpt_id == endpt_id && !s.pending_delete).map(|s| &s.conn)
    }

    pub fn get_mut(&mut self, endpt_id: EndptId) -> Option<&mut Connection> {
        let (block, slot) = Self::locate(endpt_id);
        self.blocks[block][slot]
            .as_mut()
            .filter(|s| s.endpt_id == endpt_id && !s.pending_delete)
            .map(|s| &mut s.conn)
    }

    pub fn find_by_peer(&self, peer: &SocketAddr) -> Option<EndptId> {
        self.by_peer.get(peer).copied().filter(|&id| self.get(id).is_some())
    }

    /// Mark a connection for deletion; it remains readable/writable until
    /// the next [`Self::reap`] call.
    pub fn mark_closed(&mut self, endpt_id: EndptId) {
        let (block, slot) = Self::locate(endpt_id);
        if let Some(s) = self.blocks[block][slot].as_mut() {
            if s.endpt_id == endpt_id {
                s.pending_delete = true;
                self.reap_queue.push(endpt_id);
            }
        }
    }

    /// Free every slot marked closed since the last sweep.
    pub fn reap(&mut self) -> usize {
        let mut freed = 0;
        for endpt_id in self.reap_queue.drain(..) {
            let (block, slot) = Self::locate(endpt_id);
            if let Some(s) = self.blocks[block][slot].take_if(|s| s.endpt_id == endpt_id) {
                self.by_peer.remove(&s.peer);
                freed += 1;
            }
        }
        freed
    }

    pub fn len(&self) -> usize {
        self.blocks
            .iter()
            .flatten()
            .filter(|s| s.as_ref().map(|s| !s.pending_delete).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn endpoint_ids(&self) -> Vec<EndptId> {
        self.blocks
            .iter()
            .flatten()
            .filter_map(|s| s.as_ref())
            .filter(|s| !s.pending_delete)
            .map(|s| s.endpt_id)
            .collect()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
