//! Stream (C9).
//!
//! Holds a stream's transmit queue, its reliability/delivery configuration,
//! its half-close state machine, and — per spec §3's "Stream" attribute
//! list — its own sent- and received-packet manager. `cc_id` only selects
//! which of the connection's (at most two) congestion controller instances
//! arbitrates this stream's sends; the ARQ sequence space, FEC grouping,
//! reorder buffer, and ACK synthesis all belong to the stream itself.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::{Result, SliqError};
use crate::received::ReceivedPacketManager;
use crate::sent::SentPacketManager;
use crate::types::{CcId, DeliveryMode, DequeueRule, DropRule, Priority, Reliability, StreamId};

/// Per-stream flow-control window (`kFlowCtrlWindowPkts`), bounding both
/// the send window (`snd_nxt - snd_fec < window`) and the receive window.
pub const FLOW_CTRL_WINDOW_PKTS: u32 = 256;

/// Stream half-close state machine (spec independently tracks send and
/// receive directions so a half-closed stream can still drain the other).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    SendClosed,
    RecvClosed,
    Closed,
}

struct TxQueue {
    items: VecDeque<Bytes>,
    max_len: usize,
    dequeue_rule: DequeueRule,
    drop_rule: DropRule,
}

impl TxQueue {
    fn new(max_len: usize, dequeue_rule: DequeueRule, drop_rule: DropRule) -> Self {
        TxQueue {
            items: VecDeque::new(),
            max_len: max_len.max(1),
            dequeue_rule,
            drop_rule,
        }
    }

    fn push(&mut self, data: Bytes) -> Result<()> {
        if self.items.len() >= self.max_len {
            match self.drop_rule {
                DropRule::NoDrop => return Err(SliqError::ResourceExhausted),
                DropRule::HeadDrop => {
                    self.items.pop_front();
                }
                DropRule::TailDrop => return Ok(()),
            }
        }
        self.items.push_back(data);
        Ok(())
    }

    fn pop(&mut self) -> Option<Bytes> {
        match self.dequeue_rule {
            DequeueRule::Fifo => self.items.pop_front(),
            DequeueRule::Lifo => self.items.pop_back(),
        }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One multiplexed stream within a connection.
pub struct Stream {
    pub id: StreamId,
    pub priority: Priority,
    pub reliability: Reliability,
    pub delivery_mode: DeliveryMode,
    pub cc_id: CcId,
    state: StreamState,
    tx_queue: TxQueue,
    rx_queue: VecDeque<Bytes>,
    pub sent: SentPacketManager,
    pub received: ReceivedPacketManager,
}

impl Stream {
    pub fn new(
        id: StreamId,
        priority: Priority,
        reliability: Reliability,
        delivery_mode: DeliveryMode,
        cc_id: CcId,
        tx_queue_len: usize,
        dequeue_rule: DequeueRule,
        drop_rule: DropRule,
    ) -> Self {
        Stream {
            id,
            priority,
            reliability,
            delivery_mode,
            cc_id,
            state: StreamState::Open,
            tx_queue: TxQueue::new(tx_queue_len, dequeue_rule, drop_rule),
            rx_queue: VecDeque::new(),
            sent: SentPacketManager::new(FLOW_CTRL_WINDOW_PKTS, 1),
            received: ReceivedPacketManager::new(FLOW_CTRL_WINDOW_PKTS),
        }
    }

    /// Reconfigure the transmit queue's capacity and drop/dequeue rules in
    /// place, preserving whatever is already queued (subject to the new
    /// capacity and drop rule on the next push).
    pub fn configure_tx_queue(&mut self, max_len: usize, dequeue_rule: DequeueRule, drop_rule: DropRule) {
        let items = std::mem::take(&mut self.tx_queue.items);
        self.tx_queue = TxQueue::new(max_len, dequeue_rule, drop_rule);
        self.tx_queue.items = items;
    }

    pub fn tx_queue_len_packets(&self) -> usize {
        self.tx_queue.items.len()
    }

    pub fn tx_queue_len_bytes(&self) -> usize {
        self.tx_queue.items.iter().map(|b| b.len()).sum()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// Queue application data for transmission. Fails once the stream's
    /// send side is closed.
    pub fn enqueue(&mut self, data: Bytes) -> Result<()> {
        if matches!(self.state, StreamState::SendClosed | StreamState::Closed) {
            return Err(SliqError::HandshakeFailed("stream send side is closed"));
        }
        self.tx_queue.push(data)
    }

    /// Pop the next payload queued for transmission on this stream,
    /// regardless of window state (the connection-level sent manager for
    /// this stream's `cc_id` gates whether it may actually go out).
    pub fn next_to_send(&mut self) -> Option<Bytes> {
        self.tx_queue.pop()
    }

    pub fn has_pending_send(&self) -> bool {
        !self.tx_queue.is_empty()
    }

    /// Record a payload delivered to this stream by the connection's
    /// shared receive pipeline.
    pub fn deliver(&mut self, payload: Bytes) {
        self.rx_queue.push_back(payload);
    }

    /// Drain everything delivered so far, in arrival order.
    pub fn take_received(&mut self) -> Vec<Bytes> {
        self.rx_queue.drain(..).collect()
    }

    /// Close the send direction (FIN sent). Transitions to fully `Closed`
    /// if the receive direction was already closed.
    pub fn close_send(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::SendClosed,
            StreamState::RecvClosed => StreamState::Closed,
            other => other,
        };
    }

    /// Close the receive direction (peer FIN observed). Transitions to
    /// fully `Closed` if the send direction was already closed.
    pub fn close_recv(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::RecvClosed,
            StreamState::SendClosed => StreamState::Closed,
            other => other,
        };
    }

    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
    }

    pub fn is_idle(&self) -> bool {
        self.tx_queue.is_empty() && self.rx_queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Stream {
        Stream::new(1, 0, Reliability::reliable_arq(), DeliveryMode::Ordered, 0, 8, DequeueRule::Fifo, DropRule::NoDrop)
    }

    #[test]
    fn enqueue_and_dequeue_fifo() {
        let mut s = stream();
        s.enqueue(Bytes::from_static(b"a")).unwrap();
        s.enqueue(Bytes::from_static(b"b")).unwrap();
        assert_eq!(s.next_to_send(), Some(Bytes::from_static(b"a")));
        assert_eq!(s.next_to_send(), Some(Bytes::from_static(b"b")));
    }

    #[test]
    fn no_drop_queue_rejects_when_full() {
        let mut s = Stream::new(1, 0, Reliability::reliable_arq(), DeliveryMode::Ordered, 0, 1, DequeueRule::Fifo, DropRule::NoDrop);
        s.enqueue(Bytes::from_static(b"a")).unwrap();
        assert!(s.enqueue(Bytes::from_static(b"b")).is_err());
    }

    #[test]
    fn half_close_then_full_close() {
        let mut s = stream();
        s.close_send();
        assert_eq!(s.state(), StreamState::SendClosed);
        assert!(s.enqueue(Bytes::from_static(b"x")).is_err());
        s.close_recv();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn delivered_payloads_drain_in_order() {
        let mut s = stream();
        s.deliver(Bytes::from_static(b"a"));
        s.deliver(Bytes::from_static(b"b"));
        assert_eq!(s.take_received(), vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert!(s.take_received().is_empty());
    }
}
