//! Connection (C10).
//!
//! One connection's handshake state machine, its up-to-two congestion
//! controller instances, its RTT/capacity estimators, and its multiplexed
//! streams — each stream owning its own [`SentPacketManager`]/
//! [`ReceivedPacketManager`] (spec §3 lists both as Stream attributes; a
//! controller only arbitrates sends, per spec §3's "up to two CC
//! instances" and the trait's stream-scoped callback signatures). Frame
//! dispatch lives here: the facade hands inbound frames to
//! [`Connection::on_frame`] and drains outbound frames from
//! [`Connection::poll_send`].

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use crate::capacity::CapacityEstimator;
use crate::congestion::Controller;
use crate::error::{Result, SliqError};
use crate::rtt::RttManager;
use crate::stream::Stream;
use crate::types::{
    is_valid_stream_id, CcId, CongCtrl, DeliveryMode, DequeueRule, DropRule, EndptId, Priority,
    Reliability, StreamId, MAX_STREAMS_PER_CONN,
};
use crate::wire::{
    AckHeader, CcSync, ConnHello, ConnHelloAck, CreateStream, DataFlags, DataHeader, Frame,
    ResetStream,
};

/// Connection handshake/lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Closed,
    SentHello,
    Connected,
    AppCloseWait,
    PeerCloseWait,
    ClosedWait,
}

const DEFAULT_TX_QUEUE_LEN: usize = 256;

/// One SLIQ connection: handshake state, congestion controllers, RTT and
/// capacity estimation, and the streams multiplexed over it.
pub struct Connection {
    pub endpt_id: EndptId,
    is_client: bool,
    state: ConnState,
    streams: HashMap<StreamId, Stream>,
    controllers: Vec<Controller>,
    offered_cc: Vec<CongCtrl>,
    rtt: RttManager,
    capacity: CapacityEstimator,
    local_send_timestamp: u32,
}

impl Connection {
    pub fn new(endpt_id: EndptId, is_client: bool, offered_cc: Vec<CongCtrl>) -> Self {
        Connection {
            endpt_id,
            is_client,
            state: ConnState::Closed,
            streams: HashMap::new(),
            controllers: Vec::new(),
            offered_cc,
            rtt: RttManager::new(Duration::from_millis(200), Duration::from_secs(60)),
            capacity: CapacityEstimator::new(),
            local_send_timestamp: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Client side: produce the initial `CONN_HELLO`.
    pub fn initiate(&mut self, now_us: u32) -> Frame {
        self.state = ConnState::SentHello;
        self.local_send_timestamp = now_us;
        Frame::ConnHello(ConnHello {
            send_timestamp: now_us,
            cc_algorithms: self.offered_cc.iter().map(|c| c.algorithm as u16 as u8).collect(),
        })
    }

    fn activate_controllers(&mut self, chosen: &[u8]) {
        self.controllers.clear();
        let ids: Vec<u8> = if chosen.is_empty() { vec![0] } else { chosen.to_vec() };
        for (cc_id, alg_byte) in ids.iter().enumerate().take(2) {
            let params = self
                .offered_cc
                .iter()
                .find(|c| c.algorithm as u16 as u8 == *alg_byte)
                .copied()
                .unwrap_or_default();
            let mut cc = Controller::new(params.algorithm, cc_id as CcId);
            cc.as_mut().configure(&params);
            self.controllers.push(cc);
        }
    }

    fn controller_mut(&mut self, cc_id: CcId) -> Option<&mut Controller> {
        self.controllers.get_mut(cc_id as usize)
    }

    /// Dispatch one inbound frame. Returns frames that must be sent back
    /// to the peer as a direct consequence (handshake replies only; ACKs
    /// are left to the normal send loop).
    pub fn on_frame(&mut self, frame: Frame, now: Instant, now_us: u32) -> Result<Vec<Frame>> {
        match frame {
            Frame::ConnHello(hello) => self.on_conn_hello(hello, now, now_us),
            Frame::ConnHelloAck(ack) => self.on_conn_hello_ack(ack, now, now_us),
            Frame::ResetConn => {
                self.state = ConnState::ClosedWait;
                Ok(vec![])
            }
            Frame::CloseConn => {
                self.state = match self.state {
                    ConnState::AppCloseWait => ConnState::ClosedWait,
                    _ => ConnState::PeerCloseWait,
                };
                Ok(vec![])
            }
            Frame::CreateStream(cs) => self.on_create_stream(cs),
            Frame::ResetStream(rs) => self.on_reset_stream(rs),
            Frame::Data(header, body) => self.on_data(header, body, now_us),
            Frame::Ack(ack) => self.on_ack(ack, now),
            Frame::CcSync(sync) => self.on_cc_sync(sync, now),
            Frame::RcvdPktCnt(_) => Ok(vec![]),
            Frame::CcPktTrain(train) => {
                if let Some(controller) = self.controller_mut(train.cc_id) {
                    controller
                        .as_mut()
                        .process_cc_pkt_train(now, train.train_seq, train.packet_index, train.packet_count);
                }
                Ok(vec![])
            }
        }
    }

    fn on_conn_hello(&mut self, hello: ConnHello, now: Instant, now_us: u32) -> Result<Vec<Frame>> {
        if self.is_client {
            return Err(SliqError::HandshakeFailed("client received CONN_HELLO"));
        }
        let chosen: Vec<u8> = hello
            .cc_algorithms
            .iter()
            .filter(|a| self.offered_cc.iter().any(|c| c.algorithm as u16 as u8 == **a))
            .take(2)
            .copied()
            .collect();
        self.activate_controllers(&chosen);
        let rtt_estimate = Duration::from_micros(now_us.saturating_sub(hello.send_timestamp).max(1) as u64);
        for controller in &mut self.controllers {
            controller.as_mut().connected(now, rtt_estimate);
        }
        self.state = ConnState::Connected;
        Ok(vec![Frame::ConnHelloAck(ConnHelloAck {
            echo_timestamp: hello.send_timestamp,
            chosen_cc_algorithms: chosen,
        })])
    }

    fn on_conn_hello_ack(&mut self, ack: ConnHelloAck, now: Instant, now_us: u32) -> Result<Vec<Frame>> {
        if !self.is_client || self.state != ConnState::SentHello {
            return Err(SliqError::HandshakeFailed("unexpected CONN_HELLO_ACK"));
        }
        self.activate_controllers(&ack.chosen_cc_algorithms);
        let rtt_estimate =
            Duration::from_micros(now_us.saturating_sub(self.local_send_timestamp).max(1) as u64);
        let _ = ack.echo_timestamp;
        for controller in &mut self.controllers {
            controller.as_mut().connected(now, rtt_estimate);
        }
        self.state = ConnState::Connected;
        Ok(vec![])
    }

    /// Create a locally-initiated stream. `is_valid_stream_id` enforces
    /// the client-odd/server-even id partitioning. `cc_id` selects which
    /// congestion controller's sequence space the stream's data shares.
    pub fn create_stream(
        &mut self,
        id: StreamId,
        priority: Priority,
        reliability: Reliability,
        delivery_mode: DeliveryMode,
        cc_id: CcId,
    ) -> Result<Frame> {
        if !is_valid_stream_id(id, self.is_client) {
            return Err(SliqError::StreamLimitExceeded(id));
        }
        if self.streams.len() >= MAX_STREAMS_PER_CONN || self.streams.contains_key(&id) {
            return Err(SliqError::StreamLimitExceeded(id));
        }
        if matches!(delivery_mode, DeliveryMode::Ordered) && !reliability.allows_ordered() {
            return Err(SliqError::HandshakeFailed(
                "ordered delivery requires RELIABLE_ARQ",
            ));
        }
        self.streams.insert(
            id,
            Stream::new(
                id,
                priority,
                reliability,
                delivery_mode,
                cc_id,
                DEFAULT_TX_QUEUE_LEN,
                DequeueRule::Fifo,
                DropRule::NoDrop,
            ),
        );
        Ok(Frame::CreateStream(CreateStream { stream_id: id, priority }))
    }

    fn on_create_stream(&mut self, cs: CreateStream) -> Result<Vec<Frame>> {
        if !is_valid_stream_id(cs.stream_id, !self.is_client) {
            return Err(SliqError::StreamLimitExceeded(cs.stream_id));
        }
        if self.streams.len() >= MAX_STREAMS_PER_CONN || self.streams.contains_key(&cs.stream_id) {
            return Err(SliqError::StreamLimitExceeded(cs.stream_id));
        }
        self.streams.insert(
            cs.stream_id,
            Stream::new(
                cs.stream_id,
                cs.priority,
                Reliability::reliable_arq(),
                DeliveryMode::Ordered,
                0,
                DEFAULT_TX_QUEUE_LEN,
                DequeueRule::Fifo,
                DropRule::NoDrop,
            ),
        );
        Ok(vec![])
    }

    fn on_reset_stream(&mut self, rs: ResetStream) -> Result<Vec<Frame>> {
        if let Some(s) = self.streams.get_mut(&rs.stream_id) {
            s.reset();
        }
        Ok(vec![])
    }

    pub fn reset_stream(&mut self, id: StreamId) -> Option<Frame> {
        self.streams.get_mut(&id).map(|s| {
            s.reset();
            Frame::ResetStream(ResetStream { stream_id: id })
        })
    }

    fn on_data(&mut self, header: DataHeader, body: Bytes, now_us: u32) -> Result<Vec<Frame>> {
        let stream_id = header.stream_id;
        let fin = header.flags.contains(DataFlags::FIN);
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Err(SliqError::StreamLimitExceeded(stream_id));
        };
        let delivery_mode = stream.delivery_mode;
        let delivered = stream.received.on_data(&header, body, now_us, delivery_mode)?;
        for (_, payload) in delivered {
            stream.deliver(payload);
        }
        if fin {
            stream.close_recv();
        }
        Ok(vec![])
    }

    fn on_ack(&mut self, ack: AckHeader, now: Instant) -> Result<Vec<Frame>> {
        // AckHeader carries no stream id, so apply it to every stream and
        // let each stream's own sequence-number bounds reject acks for
        // sequences it never sent.
        for stream in self.streams.values_mut() {
            let (rtts, candidates) = stream.sent.on_ack(&ack, now, 0);
            if rtts.is_empty() && candidates.is_empty() {
                continue;
            }
            let stream_id = stream.id;
            let Some(controller) = self.controllers.get_mut(stream.cc_id as usize) else {
                continue;
            };
            let counts = stream.sent.flight();
            for rtt_us in &rtts {
                self.rtt.on_rtt_sample(*rtt_us);
                controller
                    .as_mut()
                    .on_rtt_update(stream_id, now, Duration::from_micros(*rtt_us as u64));
            }
            for seq in &candidates {
                let bytes = stream.sent.packet_bytes(*seq).unwrap_or(0);
                if controller.as_mut().on_packet_lost(stream_id, now, *seq, bytes) {
                    stream.sent.confirm_loss(*seq);
                }
            }
            for _ in 0..rtts.len() {
                controller.as_mut().on_packet_acked(stream_id, now, 0, 0, counts);
            }
        }
        Ok(vec![])
    }

    fn on_cc_sync(&mut self, sync: CcSync, now: Instant) -> Result<Vec<Frame>> {
        if let Some(controller) = self.controller_mut(sync.cc_id) {
            controller.as_mut().process_sync_params(now, sync.seq_num, sync.cc_params);
        }
        Ok(vec![])
    }

    /// Pop the next payload ready to send for `stream_id`, gated by that
    /// stream's own sent-packet window and its controller's send gate, and
    /// build its `DATA` frame.
    pub fn poll_send(&mut self, stream_id: StreamId, now: Instant, now_us: u32) -> Option<Frame> {
        let cc_id = self.streams.get(&stream_id)?.cc_id;
        if !self.streams.get(&stream_id)?.sent.window_has_room() {
            return None;
        }
        let stream = self.streams.get_mut(&stream_id)?;
        let payload = stream.next_to_send()?;
        let controller = self.controllers.get_mut(cc_id as usize)?;
        if !controller.as_mut().can_send(now, payload.len() as u32) {
            self.streams.get_mut(&stream_id).unwrap().enqueue(payload).ok();
            return None;
        }
        let stream = self.streams.get_mut(&stream_id).unwrap();
        let reliability = stream.reliability.clone();
        let (seq, fec) = stream.sent.on_send(stream_id, reliability, payload.clone(), now);
        self.controllers
            .get_mut(cc_id as usize)
            .unwrap()
            .as_mut()
            .on_packet_sent(stream_id, now, seq, payload.len() as u32);
        self.capacity.on_channel_bytes(payload.len() as u64);
        self.capacity.on_transport_bytes(payload.len() as u64);
        Some(Frame::Data(
            DataHeader {
                flags: DataFlags::empty(),
                cc_id,
                stream_id,
                retransmit_count: 0,
                payload_length: payload.len() as u16,
                seq_num: seq,
                timestamp: now_us,
                timestamp_delta: 0,
                move_forward_seq: None,
                fec,
                ttg: vec![],
            },
            payload,
        ))
    }

    /// Pop the next retransmission ready to go out on `stream_id`'s sequence
    /// space, if one is queued (from fast retransmit or RTO expiration).
    /// Attaches `MOVE_FWD` when the retransmit limit was just exhausted on
    /// an earlier packet and the window needs to slide past it.
    pub fn poll_retransmit(&mut self, stream_id: StreamId, now: Instant, now_us: u32) -> Option<Frame> {
        let stream = self.streams.get_mut(&stream_id)?;
        let cc_id = stream.cc_id;
        let retransmit = stream.sent.next_retransmit(now)?;
        let move_forward_seq = stream.sent.take_move_forward();
        let mut flags = DataFlags::empty();
        if move_forward_seq.is_some() {
            flags.insert(DataFlags::MOVE_FWD);
        }
        if let Some(controller) = self.controllers.get_mut(cc_id as usize) {
            controller.as_mut().on_packet_sent(
                retransmit.stream_id,
                now,
                retransmit.seq,
                retransmit.payload.len() as u32,
            );
        }
        Some(Frame::Data(
            DataHeader {
                flags,
                cc_id,
                stream_id: retransmit.stream_id,
                retransmit_count: retransmit.retransmit_count,
                payload_length: retransmit.payload.len() as u16,
                seq_num: retransmit.seq,
                timestamp: now_us,
                timestamp_delta: 0,
                move_forward_seq,
                fec: None,
                ttg: vec![],
            },
            retransmit.payload,
        ))
    }

    /// Pop the next FEC repair symbol ready to go out on `stream_id`,
    /// closing its currently-open group (or advancing an already-closed
    /// group to its next round) first if one is ready. Repair packets
    /// never slot into the receive window (the receiver routes any `DATA`
    /// frame with `fec.pkt_type == Encoded` straight to the FEC group
    /// decoder) so `seq_num` here comes from the stream's own repair
    /// sequence space, not `snd_nxt`'s — but it's still a real tracked
    /// send: the owning controller and capacity estimator see it exactly
    /// like a source packet, via the same `on_packet_sent`/byte-counter
    /// calls as [`Self::poll_send`].
    pub fn poll_fec_repair(&mut self, stream_id: StreamId, now: Instant, now_us: u32) -> Option<Frame> {
        let stream = self.streams.get_mut(&stream_id)?;
        let cc_id = stream.cc_id;
        let rtt = Duration::from_micros(self.rtt.srtt_us().max(1.0) as u64);
        let stream = self.streams.get_mut(&stream_id)?;
        let (seq, fec_block, payload) = stream.sent.next_fec_repair(stream_id, now, rtt)?;
        if let Some(controller) = self.controllers.get_mut(cc_id as usize) {
            controller
                .as_mut()
                .on_packet_sent(stream_id, now, seq, payload.len() as u32);
        }
        self.capacity.on_channel_bytes(payload.len() as u64);
        self.capacity.on_transport_bytes(payload.len() as u64);
        Some(Frame::Data(
            DataHeader {
                flags: DataFlags::empty(),
                cc_id,
                stream_id,
                retransmit_count: 0,
                payload_length: payload.len() as u16,
                seq_num: seq,
                timestamp: now_us,
                timestamp_delta: 0,
                move_forward_seq: None,
                fec: Some(fec_block),
                ttg: vec![],
            },
            payload,
        ))
    }

    /// Build the next ACK frame for `stream_id`, if that stream has
    /// anything to acknowledge.
    pub fn build_ack(&self, stream_id: StreamId, now_us: u32) -> Option<Frame> {
        let stream = self.streams.get(&stream_id)?;
        Some(Frame::Ack(stream.received.build_ack(now_us)))
    }

    /// Poll the RTT manager for an outage transition and, if one just
    /// began, force every stream's unacked packets lost and notify the
    /// active controllers.
    pub fn check_outage(&mut self) -> bool {
        let now_in_outage = self.rtt.in_outage();
        if now_in_outage {
            for stream in self.streams.values_mut() {
                let counts = stream.sent.force_lost();
                if let Some(controller) = self.controllers.get_mut(stream.cc_id as usize) {
                    controller.as_mut().update_counts(-counts.pif, -counts.bif);
                }
            }
        }
        now_in_outage
    }

    /// Drive RTO-based loss detection: any stream's packet outstanding
    /// longer than the current RTO is marked lost and queued for
    /// retransmission, independent of the global outage declaration below.
    /// RTO expiry bypasses the controller's loss veto entirely.
    pub fn on_rto(&mut self, now: Instant) {
        let declared = self.rtt.on_rto_expiration();
        let rto = self.rtt.rto();
        for stream in self.streams.values_mut() {
            stream.sent.expire_rto(now, rto);
            stream.sent.reap_repairs(now, rto);
        }
        if declared {
            for controller in &mut self.controllers {
                controller.as_mut().on_rto(true);
            }
        }
    }

    pub fn close(&mut self) -> Frame {
        self.state = match self.state {
            ConnState::PeerCloseWait => ConnState::ClosedWait,
            _ => ConnState::AppCloseWait,
        };
        Frame::CloseConn
    }

    pub fn reset(&mut self) -> Frame {
        self.state = ConnState::ClosedWait;
        Frame::ResetConn
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::ClosedWait
    }

    pub fn stream(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    pub fn stream_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    pub fn streams_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.streams.values_mut()
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    pub fn num_controllers(&self) -> usize {
        self.controllers.len()
    }

    /// Tell the controller on `cc_id` to coexist with `num_flows` other TCP
    /// flows sharing the bottleneck. Returns false if that controller
    /// doesn't support TCP-friendliness adjustment.
    pub fn set_tcp_friendliness(&mut self, cc_id: CcId, num_flows: u32) -> bool {
        self.controllers
            .get_mut(cc_id as usize)
            .map(|controller| controller.as_mut().set_tcp_friendliness(num_flows))
            .unwrap_or(false)
    }

    /// Poll `cc_id`'s controller for a pending `CC_SYNC` payload to send to
    /// the peer, if it has one this round.
    pub fn poll_cc_sync(&mut self, cc_id: CcId) -> Option<Frame> {
        let controller = self.controllers.get(cc_id as usize)?;
        let (seq_num, cc_params) = controller.as_ref().get_sync_params()?;
        Some(Frame::CcSync(CcSync { cc_id, seq_num, cc_params }))
    }

    pub fn capacity_mut(&mut self) -> &mut CapacityEstimator {
        &mut self.capacity
    }

    /// The `(cwnd_bytes, rtt_us)` pair the capacity estimator's tumbling
    /// window needs this tick, if `cc_id`'s controller wants its rate
    /// derived from cwnd/SRTT rather than from the channel's own byte
    /// counters (`use_cwnd_for_cap_est`). `None` defers to the byte-counter
    /// path, which every algorithm but a cwnd-reporting one relies on.
    fn cap_est_input(&self, cc_id: CcId) -> Option<(u64, f64)> {
        let controller = self.controllers.get(cc_id as usize)?;
        if !controller.as_ref().use_cwnd_for_cap_est() {
            return None;
        }
        Some((controller.as_ref().congestion_window() as u64, self.rtt.srtt_us()))
    }

    /// Advance the capacity estimator's tumbling window by one tick,
    /// sourcing its cwnd/SRTT input from the connection's primary
    /// controller (`cc_id` 0) when that controller asks for it.
    pub fn tick_capacity(&mut self, now: Instant) -> Option<crate::capacity::CapacityEstimate> {
        let input = self.cap_est_input(0);
        self.capacity.tick(now, input)
    }

    pub fn rtt(&self) -> &RttManager {
        &self.rtt
    }

    /// Snapshot `cc_id`'s link statistics by combining the shared RTT
    /// estimate with the sent/received counters of every stream riding this
    /// controller and the controller's own current state.
    pub fn link_stats(&mut self, cc_id: CcId) -> Option<crate::stats::LinkStats> {
        let is_closed = self.is_closed();
        let srtt_us = self.rtt.srtt_us();
        let rttvar_us = self.rtt.rttvar_us();
        let min_rtt_us = self.rtt.min_rtt_us();
        let mut packets_sent = 0u64;
        let mut packets_acked = 0u64;
        let mut packets_received = 0u64;
        for stream in self.streams.values().filter(|s| s.cc_id == cc_id) {
            let sender = stream.sent.stats();
            let receiver = stream.received.stats();
            packets_sent += sender.packets_sent;
            packets_acked += sender.packets_acked;
            packets_received += receiver.packets_received;
        }
        let loss_rate = if packets_sent == 0 {
            0.0
        } else {
            (packets_sent.saturating_sub(packets_acked)) as f64 / packets_sent as f64
        };
        let controller = self.controllers.get_mut(cc_id as usize)?;
        Some(crate::stats::LinkStats {
            link_id: cc_id,
            srtt_us,
            rttvar_us,
            min_rtt_us,
            capacity_bps: 0.0,
            pacing_rate_bps: controller.as_mut().send_pacing_rate() as f64,
            cwnd: controller.as_ref().congestion_window() as f64,
            loss_rate,
            packets_sent,
            packets_received,
            active: !is_closed,
            cc_state: format!("{:?}", controller.as_ref().congestion_control_type()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CongCtrlAlg;

    fn pair() -> (Connection, Connection) {
        let offered = vec![CongCtrl::tcp_cubic(false)];
        (
            Connection::new(1, true, offered.clone()),
            Connection::new(2, false, offered),
        )
    }

    #[test]
    fn handshake_reaches_connected_both_sides() {
        let (mut client, mut server) = pair();
        let hello = client.initiate(0);
        let now = Instant::now();
        let replies = server.on_frame(hello, now, 100).unwrap();
        assert_eq!(server.state(), ConnState::Connected);
        assert_eq!(replies.len(), 1);
        let client_replies = client.on_frame(replies.into_iter().next().unwrap(), now, 200).unwrap();
        assert!(client_replies.is_empty());
        assert_eq!(client.state(), ConnState::Connected);
        assert_eq!(client.num_controllers(), 1);
    }

    #[test]
    fn create_stream_rejects_wrong_parity_for_client() {
        let (mut client, _server) = pair();
        client.initiate(0);
        assert!(client
            .create_stream(2, 0, Reliability::reliable_arq(), DeliveryMode::Ordered, 0)
            .is_err());
        assert!(client
            .create_stream(1, 0, Reliability::reliable_arq(), DeliveryMode::Ordered, 0)
            .is_ok());
    }

    #[test]
    fn ordered_delivery_requires_reliable_arq() {
        let (mut client, _server) = pair();
        assert!(client
            .create_stream(1, 0, Reliability::best_effort(), DeliveryMode::Unordered, 0)
            .is_ok());
        assert!(client
            .create_stream(3, 0, Reliability::best_effort(), DeliveryMode::Ordered, 0)
            .is_err());
    }

    #[test]
    fn cc_algorithm_negotiation_falls_back_to_offered_list() {
        let offered = vec![CongCtrl::copa2(), CongCtrl::tcp_cubic(false)];
        let mut server = Connection::new(9, false, offered.clone());
        let mut client = Connection::new(10, true, offered);
        let hello = client.initiate(0);
        let now = Instant::now();
        server.on_frame(hello, now, 0).unwrap();
        assert_eq!(server.controllers[0].as_ref().congestion_control_type(), CongCtrlAlg::Copa2Cc);
    }

    #[test]
    fn data_round_trip_delivers_to_stream() {
        let (mut client, mut server) = pair();
        let hello = client.initiate(0);
        let now = Instant::now();
        let replies = server.on_frame(hello, now, 0).unwrap();
        client.on_frame(replies.into_iter().next().unwrap(), now, 0).unwrap();

        let create = client
            .create_stream(1, 0, Reliability::reliable_arq(), DeliveryMode::Ordered, 0)
            .unwrap();
        server.on_frame(create, now, 0).unwrap();

        client.stream_mut(1).unwrap().enqueue(Bytes::from_static(b"hi")).unwrap();
        let data_frame = client.poll_send(1, now, 0).expect("should have data to send");
        server.on_frame(data_frame, now, 0).unwrap();

        let delivered = server.stream_mut(1).unwrap().take_received();
        assert_eq!(delivered, vec![Bytes::from_static(b"hi")]);
    }

    #[test]
    fn rto_retransmit_redelivers_payload() {
        let (mut client, mut server) = pair();
        let hello = client.initiate(0);
        let now = Instant::now();
        let replies = server.on_frame(hello, now, 0).unwrap();
        client.on_frame(replies.into_iter().next().unwrap(), now, 0).unwrap();

        let create = client
            .create_stream(1, 0, Reliability::reliable_arq(), DeliveryMode::Ordered, 0)
            .unwrap();
        server.on_frame(create, now, 0).unwrap();

        client.stream_mut(1).unwrap().enqueue(Bytes::from_static(b"hi")).unwrap();
        // Send but never deliver to the server: simulate the packet lost on the wire.
        client.poll_send(1, now, 0).expect("should have data to send");
        assert!(client.poll_retransmit(1, now, 0).is_none());

        let later = now + Duration::from_secs(5);
        client.on_rto(later);
        let retransmit = client.poll_retransmit(1, later, 0).expect("lost packet should be requeued");
        match retransmit {
            Frame::Data(header, payload) => {
                assert_eq!(header.retransmit_count, 1);
                assert_eq!(header.seq_num, 1);
                assert_eq!(payload, Bytes::from_static(b"hi"));
            }
            other => panic!("expected Data frame, got {other:?}"),
        }
        assert!(client.poll_retransmit(1, later, 0).is_none());
    }
}
