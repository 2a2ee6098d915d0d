//! Transport Facade (C12).
//!
//! The application-facing surface of the crate: `listen`/`connect`,
//! `add_stream`, `send`, `close_stream`/`close`, the per-stream transmit
//! queue/retransmission-limit/TCP-friendliness configuration knobs, and the
//! `svc_file_descriptor` pump that drives everything else. Per §5, nothing
//! here blocks or suspends: every method either completes synchronously or
//! reports back through [`SliqCallbacks`] on a later `svc_file_descriptor`
//! call. All calls are expected from one thread, in the pattern:
//!
//! 1. `file_descriptor_list()` — what to wait on,
//! 2. the application's own `select`/`epoll`/equivalent,
//! 3. `svc_file_descriptor(id)` for each ready socket,
//! 4. `service_timers()` once per loop iteration to drive RTO/outage/FEC
//!    round timing that isn't gated on any one socket being readable.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use quanta::Instant;

use crate::capacity::CapacityEstimate;
use crate::connection::{ConnState, Connection};
use crate::connection_manager::ConnectionManager;
use crate::error::{Result, SliqError};
use crate::socket::{SocketId, SocketManager, SocketWriteResult};
use crate::types::{
    CcId, CongCtrl, DeliveryMode, DequeueRule, DropRule, EndptId, Priority, Reliability,
    RexmitLimit, RttPdd, StreamId,
};
use crate::wire::Frame;

/// Application callbacks, per spec §4.12's `SliqApp` contract. Methods
/// marked "(opt)" there default to a no-op; the rest must be implemented.
pub trait SliqCallbacks {
    /// A listener received an inbound connection attempt. Return `false`
    /// to refuse it (the endpoint is torn down without a
    /// `process_connection_result`).
    fn process_connection_request(&mut self, endpt_id: EndptId, peer: SocketAddr) -> bool {
        let _ = (endpt_id, peer);
        true
    }

    /// A locally-initiated `connect` completed (or failed) its handshake.
    fn process_connection_result(&mut self, endpt_id: EndptId, success: bool);

    /// The peer opened a new stream on `endpt_id`.
    fn process_new_stream(&mut self, endpt_id: EndptId, stream_id: StreamId);

    /// A payload was delivered to the application per the stream's
    /// delivery policy.
    fn recv(&mut self, endpt_id: EndptId, stream_id: StreamId, payload: Bytes);

    /// A queued packet was dropped by a `HEAD_DROP` transmit queue. (opt)
    fn process_packet_drop(&mut self, endpt_id: EndptId, stream_id: StreamId) {
        let _ = (endpt_id, stream_id);
    }

    /// The transmit queue's occupancy changed. (opt)
    fn process_transmit_queue_size(&mut self, endpt_id: EndptId, stream_id: StreamId, bytes: usize, packets: usize) {
        let _ = (endpt_id, stream_id, bytes, packets);
    }

    /// A new channel/transport capacity estimate is available.
    fn process_capacity_estimate(&mut self, endpt_id: EndptId, estimate: CapacityEstimate);

    /// A fresh RTT/packet-delivery-delay sample. (opt)
    fn process_rtt_pdd_samples(&mut self, endpt_id: EndptId, sample: RttPdd) {
        let _ = (endpt_id, sample);
    }

    /// The peer (or a local `close_stream`) closed a stream.
    fn process_close_stream(&mut self, endpt_id: EndptId, stream_id: StreamId);

    /// The connection is fully closed and its endpoint id is no longer
    /// valid after this call returns.
    fn process_close(&mut self, endpt_id: EndptId);

    /// The set of sockets to wait on changed (a new listener or connection
    /// was created, or one was torn down). (opt)
    fn process_file_descriptor_change(&mut self) {}
}

struct EndpointState {
    socket: SocketId,
    /// `true` for server-accepted connections sharing the listen socket;
    /// `false` for client-initiated connections with their own dedicated
    /// connected socket.
    shares_listen_socket: bool,
    peer: SocketAddr,
}

/// Owns the socket set, the connection table, and the application's
/// callback implementation; the single entry point applications hold.
pub struct Facade<C: SliqCallbacks> {
    sockets: SocketManager,
    connections: ConnectionManager,
    callbacks: C,
    endpoints: HashMap<EndptId, EndpointState>,
    listen_endpt: Option<EndptId>,
    listen_socket: Option<SocketId>,
    server_offered_cc: Vec<CongCtrl>,
    epoch: Instant,
    next_listener_id: EndptId,
}

impl<C: SliqCallbacks> Facade<C> {
    /// `InitializeSliqApp`.
    pub fn new(callbacks: C) -> Self {
        Facade {
            sockets: SocketManager::new(),
            connections: ConnectionManager::new(),
            callbacks,
            endpoints: HashMap::new(),
            listen_endpt: None,
            listen_socket: None,
            server_offered_cc: Vec::new(),
            epoch: Instant::now(),
            next_listener_id: -1,
        }
    }

    fn now_us(&self) -> u32 {
        let micros = Instant::now().duration_since(self.epoch).as_micros();
        (micros % (u32::MAX as u128 + 1)) as u32
    }

    /// Bind a listening socket and accept inbound connections on it,
    /// offering `offered_cc` during each handshake.
    pub fn listen(&mut self, addr: SocketAddr, offered_cc: Vec<CongCtrl>) -> Result<EndptId> {
        if self.listen_socket.is_some() {
            return Err(SliqError::Fatal("listen called twice".into()));
        }
        let socket_id = self.sockets.create(addr)?;
        let id = self.next_listener_id;
        self.next_listener_id -= 1;
        self.listen_endpt = Some(id);
        self.listen_socket = Some(socket_id);
        self.server_offered_cc = offered_cc;
        self.callbacks.process_file_descriptor_change();
        Ok(id)
    }

    /// `Connect`/`SetupClientDataEndpoint`: bind a dedicated socket to
    /// `peer`, send `CONN_HELLO`, and return the new client endpoint id.
    /// `process_connection_result` fires once the handshake completes.
    pub fn connect(&mut self, peer: SocketAddr, offered_cc: Vec<CongCtrl>) -> Result<EndptId> {
        let socket_id = self.sockets.create("0.0.0.0:0".parse().unwrap())?;
        self.sockets.connect(socket_id, peer)?;
        let mut conn = Connection::new(0, true, offered_cc);
        let hello = conn.initiate(self.now_us());
        let id = self.connections.insert(peer, conn).map_err(|e| SliqError::Fatal(e.into()))?;
        self.connections.get_mut(id).unwrap().endpt_id = id;
        self.endpoints.insert(id, EndpointState { socket: socket_id, shares_listen_socket: false, peer });
        self.send_frame(id, hello)?;
        self.callbacks.process_file_descriptor_change();
        Ok(id)
    }

    fn send_frame(&mut self, endpt_id: EndptId, frame: Frame) -> Result<()> {
        let Some(ep) = self.endpoints.get(&endpt_id) else {
            return Err(SliqError::Fatal(format!("send_frame: unknown endpoint {endpt_id}")));
        };
        let payload = frame.encode();
        let result = self.sockets.write_packet(ep.socket, ep.peer, &payload);
        match result {
            SocketWriteResult::Ok(_) => Ok(()),
            SocketWriteResult::Blocked => Ok(()),
            SocketWriteResult::Err(e) => Err(e),
        }
    }

    /// `AddStream`. Stream ids 1..=32 only (odd for client-initiated, even
    /// for server-initiated); anything else is rejected per spec §8's
    /// boundary behavior.
    #[allow(clippy::too_many_arguments)]
    pub fn add_stream(
        &mut self,
        endpt_id: EndptId,
        stream_id: StreamId,
        priority: Priority,
        reliability: Reliability,
        delivery_mode: DeliveryMode,
        cc_id: CcId,
    ) -> Result<()> {
        reliability.validate().map_err(SliqError::HandshakeFailed)?;
        let conn = self.conn_mut(endpt_id)?;
        let frame = conn.create_stream(stream_id, priority, reliability, delivery_mode, cc_id)?;
        self.send_frame(endpt_id, frame)
    }

    /// `ConfigureTransmitQueue`.
    pub fn configure_transmit_queue(
        &mut self,
        endpt_id: EndptId,
        stream_id: StreamId,
        max_len: usize,
        dequeue_rule: DequeueRule,
        drop_rule: DropRule,
    ) -> Result<()> {
        let conn = self.conn_mut(endpt_id)?;
        let stream = conn
            .stream_mut(stream_id)
            .ok_or(SliqError::StreamLimitExceeded(stream_id))?;
        stream.configure_tx_queue(max_len, dequeue_rule, drop_rule);
        Ok(())
    }

    /// `ConfigureRetransmissionLimit`: only meaningful for
    /// `SEMI_RELIABLE_ARQ`/`SEMI_RELIABLE_ARQ_FEC` streams.
    pub fn configure_retransmission_limit(
        &mut self,
        endpt_id: EndptId,
        stream_id: StreamId,
        rexmit_limit: RexmitLimit,
    ) -> Result<()> {
        let conn = self.conn_mut(endpt_id)?;
        let stream = conn
            .stream_mut(stream_id)
            .ok_or(SliqError::StreamLimitExceeded(stream_id))?;
        stream.reliability.rexmit_limit = rexmit_limit;
        Ok(())
    }

    /// `ConfigureTcpFriendliness`. Returns `false` if `cc_id`'s controller
    /// doesn't support the adjustment.
    pub fn configure_tcp_friendliness(&mut self, endpt_id: EndptId, cc_id: CcId, num_flows: u32) -> Result<bool> {
        Ok(self.conn_mut(endpt_id)?.set_tcp_friendliness(cc_id, num_flows))
    }

    /// `Send`: enqueue `payload` on `stream_id`'s transmit queue. Actual
    /// transmission happens on the next `svc_file_descriptor`/`service_
    /// timers` pump, gated by the stream's congestion controller.
    pub fn send(&mut self, endpt_id: EndptId, stream_id: StreamId, payload: Bytes) -> Result<()> {
        let conn = self.conn_mut(endpt_id)?;
        let stream = conn
            .stream_mut(stream_id)
            .ok_or(SliqError::StreamLimitExceeded(stream_id))?;
        let before = stream.tx_queue_len_packets();
        stream.enqueue(payload)?;
        if stream.tx_queue_len_packets() < before {
            // A HEAD_DROP queue displaced the oldest packet to make room.
            self.callbacks.process_packet_drop(endpt_id, stream_id);
        }
        let (bytes, packets) = {
            let s = conn.stream_mut(stream_id).unwrap();
            (s.tx_queue_len_bytes(), s.tx_queue_len_packets())
        };
        self.callbacks.process_transmit_queue_size(endpt_id, stream_id, bytes, packets);
        Ok(())
    }

    pub fn transmit_queue_size_bytes(&self, endpt_id: EndptId, stream_id: StreamId) -> Result<usize> {
        Ok(self.conn(endpt_id)?.stream(stream_id).ok_or(SliqError::StreamLimitExceeded(stream_id))?.tx_queue_len_bytes())
    }

    pub fn transmit_queue_size_packets(&self, endpt_id: EndptId, stream_id: StreamId) -> Result<usize> {
        Ok(self
            .conn(endpt_id)?
            .stream(stream_id)
            .ok_or(SliqError::StreamLimitExceeded(stream_id))?
            .tx_queue_len_packets())
    }

    /// `CloseStream`: send `FIN` (handled on the next poll of the stream's
    /// transmit queue) and half-close the local send direction now.
    pub fn close_stream(&mut self, endpt_id: EndptId, stream_id: StreamId) -> Result<()> {
        let conn = self.conn_mut(endpt_id)?;
        let frame = conn
            .reset_stream(stream_id)
            .ok_or(SliqError::StreamLimitExceeded(stream_id))?;
        self.send_frame(endpt_id, frame)?;
        self.callbacks.process_close_stream(endpt_id, stream_id);
        Ok(())
    }

    /// `Close`: begin an orderly close; `process_close` fires once the
    /// peer acknowledges (or, for a listener, immediately).
    pub fn close(&mut self, endpt_id: EndptId) -> Result<()> {
        if Some(endpt_id) == self.listen_endpt {
            if let Some(socket) = self.listen_socket.take() {
                self.sockets.remove(socket);
            }
            self.listen_endpt = None;
            self.callbacks.process_close(endpt_id);
            self.callbacks.process_file_descriptor_change();
            return Ok(());
        }
        let frame = self.conn_mut(endpt_id)?.close();
        self.send_frame(endpt_id, frame)?;
        self.connections.mark_closed(endpt_id);
        if let Some(ep) = self.endpoints.remove(&endpt_id) {
            if !ep.shares_listen_socket {
                self.sockets.remove(ep.socket);
            }
        }
        self.callbacks.process_close(endpt_id);
        self.callbacks.process_file_descriptor_change();
        Ok(())
    }

    /// `GetFileDescriptorList`: the socket ids the application should wait
    /// for readability (and, for a blocked write, writability) on.
    pub fn file_descriptor_list(&self) -> Vec<SocketId> {
        self.sockets.socket_ids()
    }

    /// `SvcFileDescriptor`: drain and process every datagram waiting on
    /// `socket_id`, then push outbound frames (new sends, ACKs, CC syncs)
    /// ready as a result.
    pub fn svc_file_descriptor(&mut self, socket_id: SocketId) -> Result<()> {
        let now = Instant::now();
        let now_us = self.now_us();
        let packets = self.sockets.read_packets(socket_id)?;
        for (peer, payload) in packets {
            self.dispatch_inbound(socket_id, peer, payload, now, now_us)?;
        }
        self.drain_sends(now, now_us);
        Ok(())
    }

    fn dispatch_inbound(
        &mut self,
        socket_id: SocketId,
        peer: SocketAddr,
        payload: Bytes,
        now: Instant,
        now_us: u32,
    ) -> Result<()> {
        let frame = match Frame::decode(payload) {
            Ok(f) => f,
            Err(_) => return Ok(()), // MalformedHeader: silently drop, keep connection alive.
        };

        let endpt_id = match self.connections.find_by_peer(&peer) {
            Some(id) => id,
            None => {
                // Unknown peer on the listen socket: a new inbound
                // connection attempt. Any other socket receiving from an
                // unrecognized peer is spoofed/stale traffic; drop it.
                if Some(socket_id) != self.listen_socket {
                    return Ok(());
                }
                let placeholder_id = -(self.connections.len() as EndptId) - 1000;
                if !self.callbacks.process_connection_request(placeholder_id, peer) {
                    return Ok(());
                }
                let conn = Connection::new(0, false, self.server_offered_cc.clone());
                let id = self
                    .connections
                    .insert(peer, conn)
                    .map_err(|e| SliqError::Fatal(e.into()))?;
                self.connections.get_mut(id).unwrap().endpt_id = id;
                self.endpoints.insert(id, EndpointState { socket: socket_id, shares_listen_socket: true, peer });
                id
            }
        };

        let was_connected = self.connections.get(endpt_id).map(|c| c.state() == ConnState::Connected).unwrap_or(false);
        let Some(conn) = self.connections.get_mut(endpt_id) else { return Ok(()) };
        let is_data = matches!(frame, Frame::Data(..));
        let reset_stream_id = if let Frame::ResetStream(ref rs) = frame { Some(rs.stream_id) } else { None };
        let replies = match conn.on_frame(frame, now, now_us) {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };
        let now_connected = conn.state() == ConnState::Connected;
        let is_closed = conn.is_closed();
        drop(conn);

        if is_data {
            self.drain_recv(endpt_id);
        }
        if let Some(stream_id) = reset_stream_id {
            self.callbacks.process_close_stream(endpt_id, stream_id);
        }
        if !was_connected && now_connected {
            self.callbacks.process_connection_result(endpt_id, true);
        }
        for reply in replies {
            self.send_frame(endpt_id, reply)?;
        }
        if is_closed {
            self.connections.mark_closed(endpt_id);
            self.endpoints.remove(&endpt_id);
            self.callbacks.process_close(endpt_id);
        }
        Ok(())
    }

    fn drain_recv(&mut self, endpt_id: EndptId) {
        let Some(conn) = self.connections.get_mut(endpt_id) else { return };
        for stream_id in conn.stream_ids() {
            if let Some(stream) = conn.stream_mut(stream_id) {
                for payload in stream.take_received() {
                    self.callbacks.recv(endpt_id, stream_id, payload);
                }
            }
        }
    }

    fn drain_sends(&mut self, now: Instant, now_us: u32) {
        let endpt_ids: Vec<EndptId> = self.connections.endpoint_ids();
        for endpt_id in endpt_ids {
            let stream_ids = match self.connections.get(endpt_id) {
                Some(c) => c.stream_ids(),
                None => continue,
            };
            for stream_id in stream_ids.iter().copied() {
                loop {
                    let frame = match self.connections.get_mut(endpt_id) {
                        Some(c) => c.poll_send(stream_id, now, now_us),
                        None => None,
                    };
                    match frame {
                        Some(f) => {
                            if self.send_frame(endpt_id, f).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            for stream_id in stream_ids.iter().copied() {
                loop {
                    let frame = match self.connections.get_mut(endpt_id) {
                        Some(c) => c.poll_retransmit(stream_id, now, now_us),
                        None => None,
                    };
                    match frame {
                        Some(f) => {
                            if self.send_frame(endpt_id, f).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                if let Some(ack) = self.connections.get(endpt_id).and_then(|c| c.build_ack(stream_id, now_us)) {
                    let _ = self.send_frame(endpt_id, ack);
                }
            }
            for stream_id in stream_ids.iter().copied() {
                loop {
                    let frame = match self.connections.get_mut(endpt_id) {
                        Some(c) => c.poll_fec_repair(stream_id, now, now_us),
                        None => None,
                    };
                    match frame {
                        Some(f) => {
                            if self.send_frame(endpt_id, f).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            let num_controllers = self.connections.get(endpt_id).map(|c| c.num_controllers()).unwrap_or(0);
            for cc_id in 0..num_controllers as CcId {
                if let Some(sync) = self.connections.get_mut(endpt_id).and_then(|c| c.poll_cc_sync(cc_id)) {
                    let _ = self.send_frame(endpt_id, sync);
                }
            }
            if let Some(conn) = self.connections.get_mut(endpt_id) {
                if conn.check_outage() {
                    // Outage transition surfaced via capacity/RTT polling
                    // below; no dedicated callback per spec (IsInOutage is
                    // a query, not a push notification).
                }
            }
            if let Some(estimate) = self
                .connections
                .get_mut(endpt_id)
                .and_then(|c| c.tick_capacity(now))
            {
                self.callbacks.process_capacity_estimate(endpt_id, estimate);
            }
        }
    }

    /// Drive RTO expiration and connection reaping. Applications call this
    /// once per main-loop iteration regardless of which sockets were
    /// readable, since retransmit timers aren't tied to socket readiness.
    pub fn service_timers(&mut self) {
        let now = Instant::now();
        for endpt_id in self.connections.endpoint_ids() {
            if let Some(conn) = self.connections.get_mut(endpt_id) {
                conn.on_rto(now);
            }
        }
        self.connections.reap();
    }

    pub fn is_in_outage(&self, endpt_id: EndptId) -> bool {
        self.connections.get(endpt_id).map(|c| c.rtt().in_outage()).unwrap_or(false)
    }

    fn conn(&self, endpt_id: EndptId) -> Result<&Connection> {
        self.connections
            .get(endpt_id)
            .ok_or_else(|| SliqError::Fatal(format!("unknown endpoint {endpt_id}")))
    }

    fn conn_mut(&mut self, endpt_id: EndptId) -> Result<&mut Connection> {
        self.connections
            .get_mut(endpt_id)
            .ok_or_else(|| SliqError::Fatal(format!("unknown endpoint {endpt_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CongCtrl;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recorder {
        delivered: Arc<Mutex<Vec<(EndptId, StreamId, Bytes)>>>,
        connected: Arc<Mutex<Vec<(EndptId, bool)>>>,
    }

    impl SliqCallbacks for Recorder {
        fn process_connection_result(&mut self, endpt_id: EndptId, success: bool) {
            self.connected.lock().unwrap().push((endpt_id, success));
        }
        fn process_new_stream(&mut self, _endpt_id: EndptId, _stream_id: StreamId) {}
        fn recv(&mut self, endpt_id: EndptId, stream_id: StreamId, payload: Bytes) {
            self.delivered.lock().unwrap().push((endpt_id, stream_id, payload));
        }
        fn process_capacity_estimate(&mut self, _endpt_id: EndptId, _estimate: CapacityEstimate) {}
        fn process_close_stream(&mut self, _endpt_id: EndptId, _stream_id: StreamId) {}
        fn process_close(&mut self, _endpt_id: EndptId) {}
    }

    #[test]
    fn connect_handshake_and_send_delivers_payload() {
        let mut server = Facade::new(Recorder::default());
        let mut client = Facade::new(Recorder::default());

        let server_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server_endpt = server.listen(server_addr, vec![CongCtrl::tcp_cubic(false)]).unwrap();
        let bound_addr = server.sockets.local_addr(server.listen_socket.unwrap()).unwrap();

        let client_endpt = client.connect(bound_addr, vec![CongCtrl::tcp_cubic(false)]).unwrap();

        // Client's CONN_HELLO is sitting in the server's listen socket.
        std::thread::sleep(std::time::Duration::from_millis(5));
        server.svc_file_descriptor(server.listen_socket.unwrap()).unwrap();

        // Server's CONN_HELLO_ACK is sitting in the client's socket.
        let client_socket = client.endpoints.get(&client_endpt).unwrap().socket;
        std::thread::sleep(std::time::Duration::from_millis(5));
        client.svc_file_descriptor(client_socket).unwrap();

        assert_eq!(client.callbacks.connected.lock().unwrap().len(), 1);
        assert!(client.callbacks.connected.lock().unwrap()[0].1);

        let server_endpt_id = *server.connections.endpoint_ids().first().unwrap();
        assert_ne!(server_endpt_id, server_endpt); // server_endpt is the listener marker, not the accepted conn

        client
            .add_stream(client_endpt, 1, 0, Reliability::reliable_arq(), DeliveryMode::Ordered, 0)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        server.svc_file_descriptor(server.listen_socket.unwrap()).unwrap();

        client.send(client_endpt, 1, Bytes::from_static(b"hello sliq")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        client.svc_file_descriptor(client_socket).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        server.svc_file_descriptor(server.listen_socket.unwrap()).unwrap();

        let delivered = server.callbacks.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(&delivered[0].2[..], b"hello sliq");
    }

    #[test]
    fn add_stream_rejects_invalid_reliability() {
        let mut client = Facade::new(Recorder::default());
        let endpt = client.connect("127.0.0.1:1".parse().unwrap(), vec![CongCtrl::tcp_cubic(false)]).unwrap();
        let bad = Reliability::semi_reliable_arq(0); // rexmit_limit must be >= 1
        assert!(client
            .add_stream(endpt, 1, 0, bad, DeliveryMode::Unordered, 0)
            .is_err());
    }
}
