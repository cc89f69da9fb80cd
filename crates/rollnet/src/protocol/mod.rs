//! Per-peer protocol state machine.
//!
//! One [`PeerProtocol`] exists per remote endpoint. It runs the handshake,
//! turns local inputs into delta-coded input messages, decodes the peer's
//! inputs into [`ProtocolEvent::Input`] events, and watches the link for
//! interruptions. Outgoing messages are queued and flushed to the socket by
//! [`PeerProtocol::pump_send_queue`].

pub mod compression;
pub mod event;

use std::collections::VecDeque;

use rand::{Rng, SeedableRng, rngs::StdRng};
use rollnet_proto::{
    ConnectStatus, MessageBody, UdpMessage,
    constants::{MAX_PLAYERS, UDP_HEADER_SIZE},
    messages::{InputMsg, QualityReply, QualityReport, SyncReply, SyncRequest},
};
use tracing::{debug, trace, warn};

use crate::{
    config::NetworkConditions,
    input::{Frame, GameInput, NULL_FRAME},
    player::PlayerHandle,
    stats::NetworkStats,
    time_sync::TimeSync,
    transport::NonBlockingSocket,
};

pub use event::ProtocolEvent;

pub const NUM_SYNC_PACKETS: u32 = 5;
pub const SYNC_RETRY_INTERVAL: u32 = 2000;
pub const SYNC_FIRST_RETRY_INTERVAL: u32 = 500;
pub const RUNNING_RETRY_INTERVAL: u32 = 200;
pub const KEEP_ALIVE_INTERVAL: u32 = 200;
pub const QUALITY_REPORT_INTERVAL: u32 = 1000;
pub const NETWORK_STATS_INTERVAL: u32 = 1000;
pub const SHUTDOWN_TIMER: u32 = 5000;
pub const MAX_SEQ_DISTANCE: u16 = 1 << 15;
pub const PENDING_OUTPUT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolState {
    Syncing {
        roundtrips_remaining: u32,
        random: u32,
    },
    Running {
        last_quality_report_time: u32,
        last_network_stats_interval: u32,
        last_input_packet_recv_time: u32,
    },
    Disconnected,
}

#[derive(Debug)]
struct QueueEntry {
    queue_time: u32,
    msg: UdpMessage,
}

#[derive(Debug)]
struct OutOfOrderPacket {
    send_time: u32,
    msg: UdpMessage,
}

#[derive(Debug)]
pub struct PeerProtocol<A> {
    handle: PlayerHandle,
    peer_addr: A,
    state: ProtocolState,
    /// Set once the shutdown timer expires; the peer then ignores all traffic.
    shut_down: bool,
    connected: bool,

    magic_number: u16,
    remote_magic_number: u16,
    next_send_seq: u16,
    next_recv_seq: u16,

    send_queue: VecDeque<QueueEntry>,
    oo_packet: Option<OutOfOrderPacket>,
    conditions: NetworkConditions,
    rng: StdRng,

    round_trip_time: u32,
    kbps_sent: u32,
    bytes_sent: usize,
    packets_sent: usize,
    stats_start_time: u32,

    peer_connect_status: [ConnectStatus; MAX_PLAYERS],
    local_frame_advantage: i32,
    remote_frame_advantage: i32,

    pending_output: VecDeque<GameInput>,
    last_received_input: GameInput,
    last_acked_input: GameInput,
    /// `ack_frame` of the last input message sent.
    last_ack_sent: Frame,

    last_send_time: u32,
    last_recv_time: u32,
    shutdown_timeout: u32,
    disconnect_timeout: u32,
    disconnect_notify_start: u32,
    disconnect_event_sent: bool,
    disconnect_notify_sent: bool,

    time_sync: TimeSync,
    events: VecDeque<ProtocolEvent>,
}

impl<A: Clone + PartialEq + std::fmt::Debug> PeerProtocol<A> {
    pub fn new(handle: PlayerHandle, peer_addr: A, conditions: NetworkConditions) -> Self {
        let mut rng = StdRng::from_os_rng();
        let magic_number = rng.random_range(1..=u16::MAX);
        Self {
            handle,
            peer_addr,
            state: ProtocolState::Syncing {
                roundtrips_remaining: NUM_SYNC_PACKETS,
                random: 0,
            },
            shut_down: false,
            connected: false,
            magic_number,
            remote_magic_number: 0,
            next_send_seq: 0,
            next_recv_seq: 0,
            send_queue: VecDeque::new(),
            oo_packet: None,
            conditions,
            rng,
            round_trip_time: 0,
            kbps_sent: 0,
            bytes_sent: 0,
            packets_sent: 0,
            stats_start_time: 0,
            peer_connect_status: [ConnectStatus::default(); MAX_PLAYERS],
            local_frame_advantage: 0,
            remote_frame_advantage: 0,
            pending_output: VecDeque::with_capacity(PENDING_OUTPUT_CAPACITY),
            last_received_input: GameInput::blank(NULL_FRAME, 1),
            last_acked_input: GameInput::blank(NULL_FRAME, 1),
            last_ack_sent: NULL_FRAME,
            last_send_time: 0,
            last_recv_time: 0,
            shutdown_timeout: 0,
            disconnect_timeout: 0,
            disconnect_notify_start: 0,
            disconnect_event_sent: false,
            disconnect_notify_sent: false,
            time_sync: TimeSync::default(),
            events: VecDeque::new(),
        }
    }

    pub fn handle(&self) -> PlayerHandle {
        self.handle
    }

    pub fn peer_addr(&self) -> &A {
        &self.peer_addr
    }

    pub fn magic_number(&self) -> u16 {
        self.magic_number
    }

    /// False once the shutdown timer after a disconnect has expired.
    pub fn is_initialized(&self) -> bool {
        !self.shut_down
    }

    pub fn is_synchronized(&self) -> bool {
        self.is_running()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ProtocolState::Running { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        self.state == ProtocolState::Disconnected
    }

    /// True when no more input can be queued until the peer acknowledges some.
    pub fn is_send_queue_full(&self) -> bool {
        self.pending_output.len() >= PENDING_OUTPUT_CAPACITY
    }

    /// Starts the handshake.
    pub fn synchronize(&mut self, now: u32) {
        if self.shut_down {
            return;
        }
        self.state = ProtocolState::Syncing {
            roundtrips_remaining: NUM_SYNC_PACKETS,
            random: 0,
        };
        self.send_sync_request(now);
    }

    /// Whether this peer reports player `id` as connected, and the last frame
    /// it has from that player.
    pub fn peer_connect_status(&self, id: usize) -> (bool, Frame) {
        let status = self.peer_connect_status[id];
        (!status.disconnected, status.last_frame)
    }

    pub fn set_disconnect_timeout(&mut self, timeout_ms: u32) {
        self.disconnect_timeout = timeout_ms;
    }

    pub fn set_disconnect_notify_start(&mut self, timeout_ms: u32) {
        self.disconnect_notify_start = timeout_ms;
    }

    /// Moves to `Disconnected`; the peer shuts down [`SHUTDOWN_TIMER`] ms later.
    pub fn disconnect(&mut self, now: u32) {
        debug!(player = %self.handle, "disconnecting endpoint");
        self.state = ProtocolState::Disconnected;
        self.shutdown_timeout = now.wrapping_add(SHUTDOWN_TIMER);
    }

    pub fn network_stats(&self) -> NetworkStats {
        NetworkStats {
            send_queue_len: self.pending_output.len(),
            ping: self.round_trip_time,
            kbps_sent: self.kbps_sent,
            local_frames_behind: self.local_frame_advantage,
            remote_frames_behind: self.remote_frame_advantage,
        }
    }

    /// Updates the local frame advantage from the current local frame.
    pub fn set_local_frame_number(&mut self, local_frame: Frame) {
        let rtt_frames =
            (u64::from(self.round_trip_time) * 60 / 1000).min(i32::MAX as u64) as i32;
        let remote_frame = self.last_received_input.frame.saturating_add(rtt_frames);
        self.local_frame_advantage = remote_frame.saturating_sub(local_frame);
    }

    pub fn recommend_frame_delay(&self) -> i32 {
        self.time_sync.recommend_frame_wait_duration(false)
    }

    pub fn poll_event(&mut self) -> Option<ProtocolEvent> {
        self.events.pop_front()
    }

    /// Queues `input` for the peer and sends everything still unacknowledged.
    pub fn send_input(&mut self, input: &GameInput, local_status: &[ConnectStatus], now: u32) {
        if self.shut_down {
            return;
        }
        if self.is_running() {
            self.time_sync.advance_frame(
                input,
                self.local_frame_advantage,
                self.remote_frame_advantage,
            );
            assert!(
                self.pending_output.len() < PENDING_OUTPUT_CAPACITY,
                "pending output overflow for player {}",
                self.handle
            );
            self.pending_output.push_back(*input);
        }
        self.send_pending_output(local_status, now);
    }

    /// Runs the protocol timers.
    pub fn poll(&mut self, local_status: &[ConnectStatus], now: u32) {
        if self.shut_down {
            return;
        }

        match self.state {
            ProtocolState::Syncing {
                roundtrips_remaining,
                ..
            } => {
                let next_interval = if roundtrips_remaining == NUM_SYNC_PACKETS {
                    SYNC_FIRST_RETRY_INTERVAL
                } else {
                    SYNC_RETRY_INTERVAL
                };
                if self.last_send_time > 0 && self.last_send_time.wrapping_add(next_interval) < now {
                    debug!(
                        player = %self.handle,
                        next_interval,
                        "no luck syncing, re-queueing sync request"
                    );
                    self.send_sync_request(now);
                }
            }
            ProtocolState::Running {
                mut last_quality_report_time,
                mut last_network_stats_interval,
                mut last_input_packet_recv_time,
            } => {
                if last_input_packet_recv_time == 0
                    || last_input_packet_recv_time.wrapping_add(RUNNING_RETRY_INTERVAL) < now
                {
                    trace!(
                        player = %self.handle,
                        last_received = self.last_received_input.frame,
                        "no input in a while, resending"
                    );
                    self.send_pending_output(local_status, now);
                    last_input_packet_recv_time = now;
                } else if self.last_received_input.frame > self.last_ack_sent {
                    // Receive-only peers (spectators) still have to acknowledge.
                    self.send_pending_output(local_status, now);
                }

                if last_quality_report_time == 0
                    || last_quality_report_time.wrapping_add(QUALITY_REPORT_INTERVAL) < now
                {
                    let frame_advantage = self
                        .local_frame_advantage
                        .clamp(i8::MIN as i32, i8::MAX as i32)
                        as i8;
                    self.send_msg(
                        MessageBody::QualityReport(QualityReport {
                            ping: now,
                            frame_advantage,
                        }),
                        now,
                    );
                    last_quality_report_time = now;
                }

                if last_network_stats_interval == 0
                    || last_network_stats_interval.wrapping_add(NETWORK_STATS_INTERVAL) < now
                {
                    self.update_network_stats(now);
                    last_network_stats_interval = now;
                }

                if self.last_send_time > 0
                    && self.last_send_time.wrapping_add(KEEP_ALIVE_INTERVAL) < now
                {
                    trace!(player = %self.handle, "sending keep alive");
                    self.send_msg(MessageBody::KeepAlive, now);
                }

                if self.disconnect_timeout > 0
                    && self.disconnect_notify_start > 0
                    && !self.disconnect_notify_sent
                    && self.last_recv_time.wrapping_add(self.disconnect_notify_start) < now
                {
                    debug!(
                        player = %self.handle,
                        after_ms = self.disconnect_notify_start,
                        "endpoint stopped sending, notifying"
                    );
                    self.events.push_back(ProtocolEvent::NetworkInterrupted {
                        disconnect_timeout_ms: self
                            .disconnect_timeout
                            .saturating_sub(self.disconnect_notify_start),
                    });
                    self.disconnect_notify_sent = true;
                }

                if self.disconnect_timeout > 0
                    && self.last_recv_time.wrapping_add(self.disconnect_timeout) < now
                    && !self.disconnect_event_sent
                {
                    debug!(
                        player = %self.handle,
                        after_ms = self.disconnect_timeout,
                        "endpoint timed out, disconnecting"
                    );
                    self.events.push_back(ProtocolEvent::Disconnected);
                    self.disconnect_event_sent = true;
                }

                if let ProtocolState::Running { .. } = self.state {
                    self.state = ProtocolState::Running {
                        last_quality_report_time,
                        last_network_stats_interval,
                        last_input_packet_recv_time,
                    };
                }
            }
            ProtocolState::Disconnected => {
                if self.shutdown_timeout < now {
                    debug!(player = %self.handle, "shutting down endpoint");
                    self.shut_down = true;
                    self.shutdown_timeout = 0;
                    self.send_queue.clear();
                    self.oo_packet = None;
                }
            }
        }
    }

    /// Whether datagrams from `from` belong to this peer.
    pub fn handles_msg(&self, from: &A) -> bool {
        !self.shut_down && self.peer_addr == *from
    }

    /// Processes one datagram from the peer.
    pub fn on_msg(&mut self, msg: &UdpMessage, now: u32) {
        if self.shut_down {
            return;
        }

        let seq = msg.header.sequence;
        if !msg.msg_type().is_handshake() {
            if msg.header.magic != self.remote_magic_number {
                trace!(player = %self.handle, magic = msg.header.magic, "rejecting packet with bad magic");
                return;
            }
            let skipped = seq.wrapping_sub(self.next_recv_seq);
            if skipped > MAX_SEQ_DISTANCE {
                trace!(
                    player = %self.handle,
                    seq,
                    last_seq = self.next_recv_seq,
                    "dropping out of order packet"
                );
                return;
            }
        }
        self.next_recv_seq = seq;

        let handled = match &msg.body {
            MessageBody::SyncRequest(req) => self.on_sync_request(msg.header.magic, req, now),
            MessageBody::SyncReply(reply) => self.on_sync_reply(msg.header.magic, reply, now),
            MessageBody::Input(input) => self.on_input(input, now),
            MessageBody::QualityReport(report) => self.on_quality_report(report, now),
            MessageBody::QualityReply(reply) => self.on_quality_reply(reply, now),
            MessageBody::KeepAlive => true,
        };

        if handled {
            self.last_recv_time = now;
            if self.disconnect_notify_sent && self.is_running() {
                debug!(player = %self.handle, "endpoint resumed");
                self.events.push_back(ProtocolEvent::NetworkResumed);
                self.disconnect_notify_sent = false;
            }
        }
    }

    /// Flushes queued datagrams whose (simulated) send time has come.
    pub fn pump_send_queue<S>(&mut self, socket: &mut S, now: u32)
    where
        S: NonBlockingSocket<Address = A>,
    {
        if self.shut_down {
            return;
        }

        let latency = self.conditions.send_latency_ms;
        while let Some(entry) = self.send_queue.front() {
            if latency != 0 {
                let jitter = latency * 2 / 3 + self.rng.random_range(0..latency) / 3;
                if now < entry.queue_time.wrapping_add(jitter) {
                    break;
                }
            }
            let Some(entry) = self.send_queue.pop_front() else {
                break;
            };

            let oop = self.conditions.out_of_order_percent;
            if oop > 0 && self.oo_packet.is_none() && self.rng.random_range(0..100) < oop {
                let delay = self.rng.random_range(0..latency * 10 + 1000);
                trace!(seq = entry.msg.header.sequence, delay, "holding packet back");
                self.oo_packet = Some(OutOfOrderPacket {
                    send_time: now.wrapping_add(delay),
                    msg: entry.msg,
                });
            } else {
                socket.send_to(&entry.msg, &self.peer_addr);
            }
        }

        if self.oo_packet.as_ref().is_some_and(|p| p.send_time < now)
            && let Some(packet) = self.oo_packet.take()
        {
            trace!(seq = packet.msg.header.sequence, "sending held back packet");
            socket.send_to(&packet.msg, &self.peer_addr);
        }
    }

    fn send_sync_request(&mut self, now: u32) {
        let random = self.rng.random::<u32>() & 0xFFFF;
        if let ProtocolState::Syncing {
            roundtrips_remaining,
            ..
        } = self.state
        {
            self.state = ProtocolState::Syncing {
                roundtrips_remaining,
                random,
            };
        }
        self.send_msg(
            MessageBody::SyncRequest(SyncRequest {
                random_request: random,
            }),
            now,
        );
    }

    fn send_msg(&mut self, body: MessageBody, now: u32) {
        let mut msg = UdpMessage::new(body);
        msg.header.magic = self.magic_number;
        msg.header.sequence = self.next_send_seq;
        self.next_send_seq = self.next_send_seq.wrapping_add(1);

        self.packets_sent += 1;
        self.bytes_sent += msg.encoded_len();
        self.last_send_time = now;

        trace!(player = %self.handle, msg_type = ?msg.msg_type(), seq = msg.header.sequence, "queueing message");
        self.send_queue.push_back(QueueEntry {
            queue_time: now,
            msg,
        });
    }

    fn send_pending_output(&mut self, local_status: &[ConnectStatus], now: u32) {
        let mut input = InputMsg {
            ack_frame: self.last_received_input.frame,
            disconnect_requested: self.is_disconnected(),
            ..InputMsg::default()
        };

        if let Some(first) = self.pending_output.front() {
            assert!(
                self.last_acked_input.frame == NULL_FRAME
                    || self.last_acked_input.frame + 1 == first.frame,
                "pending output does not follow last acked input"
            );
            input.start_frame = first.frame as u32;
            input.input_size = first.size() as u8;

            match compression::encode(&self.last_acked_input, &self.pending_output) {
                Ok(encoded) => {
                    input.num_bits = encoded.num_bits as u16;
                    input.bits = encoded.bits;
                }
                Err(err) => {
                    warn!(player = %self.handle, %err, "failed to encode pending output");
                    return;
                }
            }
        }

        for (dst, src) in input.peer_connect_status.iter_mut().zip(local_status) {
            *dst = *src;
        }
        self.last_ack_sent = input.ack_frame;

        self.send_msg(MessageBody::Input(input), now);
    }

    fn on_sync_request(&mut self, magic: u16, req: &SyncRequest, now: u32) -> bool {
        if self.remote_magic_number != 0 && magic != self.remote_magic_number {
            trace!(player = %self.handle, magic, "ignoring sync request from unknown endpoint");
            return false;
        }
        self.send_msg(
            MessageBody::SyncReply(SyncReply {
                random_reply: req.random_request,
            }),
            now,
        );
        true
    }

    fn on_sync_reply(&mut self, magic: u16, reply: &SyncReply, now: u32) -> bool {
        let ProtocolState::Syncing {
            roundtrips_remaining,
            random,
        } = self.state
        else {
            return magic == self.remote_magic_number;
        };

        if reply.random_reply != random {
            trace!(
                player = %self.handle,
                got = reply.random_reply,
                expected = random,
                "sync reply does not match, keep looking"
            );
            return false;
        }

        if !self.connected {
            self.events.push_back(ProtocolEvent::Connected);
            self.connected = true;
        }

        let remaining = roundtrips_remaining - 1;
        if remaining == 0 {
            debug!(player = %self.handle, "synchronized");
            self.events.push_back(ProtocolEvent::Synchronized);
            self.state = ProtocolState::Running {
                last_quality_report_time: 0,
                last_network_stats_interval: 0,
                last_input_packet_recv_time: 0,
            };
            self.last_received_input.frame = NULL_FRAME;
            self.remote_magic_number = magic;
        } else {
            self.state = ProtocolState::Syncing {
                roundtrips_remaining: remaining,
                random,
            };
            self.events.push_back(ProtocolEvent::Synchronizing {
                count: NUM_SYNC_PACKETS - remaining,
                total: NUM_SYNC_PACKETS,
            });
            self.send_sync_request(now);
        }
        true
    }

    fn on_input(&mut self, msg: &InputMsg, now: u32) -> bool {
        if msg.disconnect_requested {
            if !self.is_disconnected() && !self.disconnect_event_sent {
                debug!(player = %self.handle, "disconnecting endpoint on remote request");
                self.events.push_back(ProtocolEvent::Disconnected);
                self.disconnect_event_sent = true;
            }
        } else {
            for (mine, theirs) in self
                .peer_connect_status
                .iter_mut()
                .zip(msg.peer_connect_status.iter())
            {
                mine.disconnected |= theirs.disconnected;
                mine.last_frame = mine.last_frame.max(theirs.last_frame);
            }
        }

        let mut received = Vec::new();
        if let Err(err) =
            compression::decode(msg, &mut self.last_received_input, |i| received.push(*i))
        {
            debug!(player = %self.handle, %err, "dropping rest of malformed input message");
        }
        if !received.is_empty() {
            if let ProtocolState::Running {
                ref mut last_input_packet_recv_time,
                ..
            } = self.state
            {
                *last_input_packet_recv_time = now;
            }
            for input in received {
                trace!(player = %self.handle, frame = input.frame, "received input");
                self.events.push_back(ProtocolEvent::Input(input));
            }
        }

        while let Some(front) = self.pending_output.front() {
            if front.frame >= msg.ack_frame {
                break;
            }
            trace!(player = %self.handle, frame = front.frame, "throwing away acked output");
            if let Some(acked) = self.pending_output.pop_front() {
                self.last_acked_input = acked;
            }
        }
        true
    }

    fn on_quality_report(&mut self, report: &QualityReport, now: u32) -> bool {
        self.remote_frame_advantage = report.frame_advantage as i32;
        self.send_msg(
            MessageBody::QualityReply(QualityReply { pong: report.ping }),
            now,
        );
        true
    }

    fn on_quality_reply(&mut self, reply: &QualityReply, now: u32) -> bool {
        if reply.pong > now {
            debug!(
                player = %self.handle,
                pong = reply.pong,
                now,
                "dropping quality reply from the future"
            );
            return false;
        }
        self.round_trip_time = now - reply.pong;
        true
    }

    fn update_network_stats(&mut self, now: u32) {
        if self.stats_start_time == 0 {
            self.stats_start_time = now;
        }
        let total_bytes_sent = self.bytes_sent + UDP_HEADER_SIZE * self.packets_sent;
        let seconds = now.wrapping_sub(self.stats_start_time) as f32 / 1000.0;
        if seconds <= 0.0 {
            return;
        }
        let bytes_per_sec = total_bytes_sent as f32 / seconds;
        self.kbps_sent = (bytes_per_sec / 1024.0) as u32;
        trace!(
            player = %self.handle,
            kbps = self.kbps_sent,
            packets = self.packets_sent,
            "network stats updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CaptureSocket {
        sent: Vec<(u8, UdpMessage)>,
    }

    impl NonBlockingSocket for CaptureSocket {
        type Address = u8;

        fn send_to(&mut self, msg: &UdpMessage, addr: &u8) {
            self.sent.push((*addr, msg.clone()));
        }

        fn receive_all_messages(&mut self) -> Vec<(u8, UdpMessage)> {
            Vec::new()
        }
    }

    fn status() -> [ConnectStatus; MAX_PLAYERS] {
        [ConnectStatus::default(); MAX_PLAYERS]
    }

    fn peer(addr: u8) -> PeerProtocol<u8> {
        PeerProtocol::new(
            PlayerHandle(addr as usize),
            addr,
            NetworkConditions::default(),
        )
    }

    /// Moves everything queued on `from` into `to`.
    fn deliver(from: &mut PeerProtocol<u8>, to: &mut PeerProtocol<u8>, now: u32) -> usize {
        let mut socket = CaptureSocket::default();
        from.pump_send_queue(&mut socket, now);
        let n = socket.sent.len();
        for (_, msg) in socket.sent {
            to.on_msg(&msg, now);
        }
        n
    }

    fn events(p: &mut PeerProtocol<u8>) -> Vec<ProtocolEvent> {
        std::iter::from_fn(|| p.poll_event()).collect()
    }

    fn connected_pair(now: u32) -> (PeerProtocol<u8>, PeerProtocol<u8>) {
        let mut a = peer(2);
        let mut b = peer(1);
        a.synchronize(now);
        b.synchronize(now);
        for _ in 0..20 {
            deliver(&mut a, &mut b, now);
            deliver(&mut b, &mut a, now);
            if a.is_running() && b.is_running() {
                break;
            }
        }
        assert!(a.is_running() && b.is_running());
        events(&mut a);
        events(&mut b);
        (a, b)
    }

    fn input(frame: Frame, byte: u8) -> GameInput {
        GameInput::new(frame, Some(&[byte]), 1)
    }

    #[test]
    fn handshake_reports_progress_then_synchronizes() {
        let mut a = peer(2);
        let mut b = peer(1);
        a.synchronize(1);
        b.synchronize(1);
        for _ in 0..20 {
            deliver(&mut a, &mut b, 1);
            deliver(&mut b, &mut a, 1);
        }

        let expected: Vec<ProtocolEvent> = std::iter::once(ProtocolEvent::Connected)
            .chain((1..NUM_SYNC_PACKETS).map(|count| ProtocolEvent::Synchronizing {
                count,
                total: NUM_SYNC_PACKETS,
            }))
            .chain(std::iter::once(ProtocolEvent::Synchronized))
            .collect();
        assert_eq!(events(&mut a), expected);
        assert_eq!(events(&mut b), expected);
        assert_eq!(a.remote_magic_number, b.magic_number());
        assert_eq!(b.remote_magic_number, a.magic_number());
    }

    #[test]
    fn stale_sync_reply_is_ignored() {
        let mut a = peer(2);
        let mut b = peer(1);
        a.synchronize(1);
        let mut socket = CaptureSocket::default();
        a.pump_send_queue(&mut socket, 1);
        let (_, request) = socket.sent.remove(0);
        let MessageBody::SyncRequest(req) = request.body else {
            panic!("expected sync request");
        };

        let mut reply = UdpMessage::new(MessageBody::SyncReply(SyncReply {
            random_reply: req.random_request ^ 1,
        }));
        reply.header.magic = b.magic_number();
        a.on_msg(&reply, 1);
        assert!(events(&mut a).is_empty());
        assert!(!a.is_running());
    }

    #[test]
    fn sync_request_is_retried() {
        let mut a = peer(2);
        let mut socket = CaptureSocket::default();
        a.synchronize(1);
        a.pump_send_queue(&mut socket, 1);
        assert_eq!(socket.sent.len(), 1);

        a.poll(&status(), 400);
        a.pump_send_queue(&mut socket, 400);
        assert_eq!(socket.sent.len(), 1);

        a.poll(&status(), 502);
        a.pump_send_queue(&mut socket, 502);
        assert_eq!(socket.sent.len(), 2);
        assert!(socket.sent.iter().all(|(addr, _)| *addr == 2));
    }

    #[test]
    fn inputs_are_delivered_and_acked() {
        let (mut a, mut b) = connected_pair(1);
        for frame in 0..3 {
            a.send_input(&input(frame, frame as u8 + 1), &status(), 1);
        }
        deliver(&mut a, &mut b, 1);

        let received: Vec<GameInput> = events(&mut b)
            .into_iter()
            .filter_map(|e| match e {
                ProtocolEvent::Input(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(received, vec![input(0, 1), input(1, 2), input(2, 3)]);

        assert_eq!(a.network_stats().send_queue_len, 3);
        b.send_input(&input(0, 9), &status(), 1);
        deliver(&mut b, &mut a, 1);
        // Acks everything before the last frame the peer received.
        assert_eq!(a.network_stats().send_queue_len, 1);
        assert_eq!(a.last_acked_input, input(1, 2));
    }

    #[test]
    fn wrong_magic_and_old_sequence_are_dropped() {
        let (mut a, mut b) = connected_pair(1);
        a.send_input(&input(0, 4), &status(), 1);
        let mut socket = CaptureSocket::default();
        a.pump_send_queue(&mut socket, 1);
        let (_, msg) = socket.sent.remove(0);

        let mut bad_magic = msg.clone();
        bad_magic.header.magic = msg.header.magic.wrapping_add(1);
        b.on_msg(&bad_magic, 1);
        assert!(events(&mut b).is_empty());

        let mut old = msg.clone();
        old.header.sequence = b.next_recv_seq.wrapping_sub(10);
        b.on_msg(&old, 1);
        assert!(events(&mut b).is_empty());

        b.on_msg(&msg, 1);
        assert_eq!(events(&mut b), vec![ProtocolEvent::Input(input(0, 4))]);
    }

    #[test]
    fn quality_report_measures_round_trip() {
        let (mut a, mut b) = connected_pair(1);
        a.set_local_frame_number(0);
        a.poll(&status(), 100);
        deliver(&mut a, &mut b, 100);
        deliver(&mut b, &mut a, 130);
        assert_eq!(a.network_stats().ping, 30);
        assert_eq!(b.network_stats().remote_frames_behind, a.local_frame_advantage);
    }

    #[test]
    fn quality_reply_from_the_future_is_dropped() {
        let (mut a, b) = connected_pair(1);
        let mut reply = UdpMessage::new(MessageBody::QualityReply(QualityReply { pong: 500 }));
        reply.header.magic = b.magic_number();
        reply.header.sequence = a.next_recv_seq.wrapping_add(1);
        a.on_msg(&reply, 100);
        assert_eq!(a.network_stats().ping, 0);
        assert_eq!(a.last_recv_time, 1);

        reply.header.sequence = reply.header.sequence.wrapping_add(1);
        a.on_msg(&reply, 540);
        assert_eq!(a.network_stats().ping, 40);
    }

    #[test]
    fn huge_round_trip_saturates_frame_advantage() {
        let (mut a, _b) = connected_pair(1);
        a.round_trip_time = 100_000_000;
        a.set_local_frame_number(10);
        assert_eq!(a.local_frame_advantage, NULL_FRAME + 6_000_000 - 10);

        a.round_trip_time = u32::MAX;
        a.set_local_frame_number(0);
        assert_eq!(a.local_frame_advantage, NULL_FRAME + 257_698_037);
    }

    #[test]
    fn send_queue_fills_without_acks() {
        let (mut a, mut b) = connected_pair(1);
        for frame in 0..PENDING_OUTPUT_CAPACITY as Frame {
            assert!(!a.is_send_queue_full());
            a.send_input(&input(frame, 1), &status(), 1);
        }
        assert!(a.is_send_queue_full());

        deliver(&mut a, &mut b, 1);
        b.send_input(&input(0, 0), &status(), 1);
        deliver(&mut b, &mut a, 1);
        assert!(!a.is_send_queue_full());
    }

    #[test]
    fn silence_interrupts_then_disconnects_once() {
        let (mut a, mut b) = connected_pair(1);
        a.set_disconnect_timeout(5000);
        a.set_disconnect_notify_start(750);

        a.poll(&status(), 700);
        assert!(events(&mut a).is_empty());

        a.poll(&status(), 752);
        assert_eq!(
            events(&mut a),
            vec![ProtocolEvent::NetworkInterrupted {
                disconnect_timeout_ms: 4250
            }]
        );

        a.poll(&status(), 5002);
        assert_eq!(events(&mut a), vec![ProtocolEvent::Disconnected]);
        a.poll(&status(), 6000);
        assert!(events(&mut a).is_empty());

        b.poll(&status(), 6000);
        deliver(&mut b, &mut a, 6000);
        assert!(events(&mut a).contains(&ProtocolEvent::NetworkResumed));
    }

    #[test]
    fn resumes_before_timeout() {
        let (mut a, mut b) = connected_pair(1);
        a.set_disconnect_timeout(5000);
        a.set_disconnect_notify_start(750);
        a.poll(&status(), 800);
        assert_eq!(events(&mut a).len(), 1);

        b.poll(&status(), 900);
        deliver(&mut b, &mut a, 900);
        assert_eq!(events(&mut a), vec![ProtocolEvent::NetworkResumed]);

        a.poll(&status(), 1700);
        assert_eq!(events(&mut a).len(), 1);
    }

    #[test]
    fn disconnect_request_reaches_peer_and_shuts_down() {
        let (mut a, mut b) = connected_pair(1);
        a.disconnect(10);
        assert!(a.is_disconnected());
        a.send_input(&input(0, 1), &status(), 10);
        deliver(&mut a, &mut b, 10);
        assert_eq!(events(&mut b), vec![ProtocolEvent::Disconnected]);

        a.poll(&status(), 5000);
        assert!(a.is_initialized());
        a.poll(&status(), 5011);
        assert!(!a.is_initialized());
        assert!(!a.handles_msg(&1));
    }

    #[test]
    fn peer_connect_status_merges() {
        let (mut a, mut b) = connected_pair(1);
        let mut remote = status();
        remote[1] = ConnectStatus {
            disconnected: true,
            last_frame: 12,
        };
        remote[2].last_frame = 4;
        b.send_input(&input(0, 0), &remote, 1);
        deliver(&mut b, &mut a, 1);

        assert_eq!(a.peer_connect_status(0), (true, NULL_FRAME));
        assert_eq!(a.peer_connect_status(1), (false, 12));
        assert_eq!(a.peer_connect_status(2), (true, 4));

        remote[1].disconnected = false;
        remote[2].last_frame = 2;
        b.send_input(&input(1, 0), &remote, 1);
        deliver(&mut b, &mut a, 1);
        assert_eq!(a.peer_connect_status(1), (false, 12));
        assert_eq!(a.peer_connect_status(2), (true, 4));
    }

    #[test]
    fn send_latency_delays_datagrams() {
        let mut a = PeerProtocol::new(
            PlayerHandle(1),
            1u8,
            NetworkConditions {
                send_latency_ms: 90,
                out_of_order_percent: 0,
            },
        );
        let mut socket = CaptureSocket::default();
        a.synchronize(10);
        a.pump_send_queue(&mut socket, 10);
        assert!(socket.sent.is_empty());
        a.pump_send_queue(&mut socket, 100);
        assert_eq!(socket.sent.len(), 1);
    }
}
