//! The TP/ETP session engine.
//!
//! The engine never touches a CAN endpoint directly: every method that
//! needs to put bytes on the wire returns the frames to send, the same way
//! the address claimer does (see `isobus-network`). The network manager is
//! the only component that owns a port and actually calls `Endpoint::send`.

use isobus_core::message::Message;
use isobus_core::pgn::Pgn;
use isobus_core::{Address, Event, Priority, BROADCAST_ADDRESS};
use isobus_j1939::Frame;

use crate::config::TransportConfig;
use crate::control::{AbortReason, EtpControl, TpControl};
use crate::data::{self, DataTransfer};
use crate::session::{Session, SessionKey, SessionMode, SessionRole, SessionRoleKey, SessionState};

/// Raised when a session ends abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportAbortEvent {
    pub pgn: Pgn,
    pub source: Address,
    pub destination: Address,
    pub reason: AbortReason,
}

/// Returned synchronously by [`TransportEngine::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    TooManySessions,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManySessions => write!(f, "no free transport session slot"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Manages every in-flight TP/ETP session for one network manager.
pub struct TransportEngine {
    config: TransportConfig,
    sessions: Vec<Session>,
    now_ms: u64,
    pub on_message_received: Event<Message>,
    pub on_abort: Event<TransportAbortEvent>,
}

impl TransportEngine {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            sessions: Vec::new(),
            now_ms: 0,
            on_message_received: Event::new(),
            on_abort: Event::new(),
        }
    }

    fn active_session_count(&self) -> usize {
        self.sessions.iter().filter(|s| !s.is_done()).count()
    }

    fn find_session_mut(
        &mut self,
        role: SessionRoleKey,
        source: Address,
        destination: Address,
    ) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| {
            !s.is_done()
                && s.key.role == role
                && s.key.source == source
                && (s.key.destination == destination
                    || s.key.destination == BROADCAST_ADDRESS
                    || destination == BROADCAST_ADDRESS)
        })
    }

    /// Begin sending `payload` as `pgn` from `source` to `destination`
    /// (`BROADCAST_ADDRESS` for a BAM transfer). Payloads of 8 bytes or
    /// fewer should be sent as a single frame by the caller instead — this
    /// engine always opens a session.
    pub fn send(
        &mut self,
        pgn: Pgn,
        source: Address,
        destination: Address,
        payload: Vec<u8>,
    ) -> Result<Vec<Frame>, TransportError> {
        if self.active_session_count() >= self.config.max_concurrent_sessions {
            return Err(TransportError::TooManySessions);
        }

        let mode = SessionMode::for_payload_len(payload.len());
        let key = SessionKey {
            role: SessionRoleKey::Sender,
            source,
            destination,
            pgn,
        };

        if destination == BROADCAST_ADDRESS {
            let total_packets = data::packet_count(payload.len()) as u32;
            let bam = TpControl::Bam {
                pgn,
                total_size: payload.len() as u16,
                total_packets: total_packets as u8,
            }
            .encode(source, destination);
            let session = Session::new_broadcast_sender(key, mode, payload, self.now_ms);
            self.sessions.push(session);
            return Ok(vec![bam]);
        }

        let total_packets = data::packet_count(payload.len()) as u32;
        let rts = match mode {
            SessionMode::Tp => TpControl::Rts {
                pgn,
                total_size: payload.len() as u16,
                total_packets: total_packets as u8,
                max_packets_per_cts: self.config.cts_window_packets,
            }
            .encode(source, destination),
            SessionMode::Etp => EtpControl::Rts {
                pgn,
                total_size: payload.len() as u32,
            }
            .encode(source, destination),
        };

        let session = Session::new_sender(key, mode, payload, self.now_ms);
        self.sessions.push(session);
        Ok(vec![rts])
    }

    /// Abort a session the caller identifies by its sender-side key,
    /// returning the Abort control frame to send.
    pub fn abort(&mut self, pgn: Pgn, source: Address, destination: Address, reason: AbortReason) -> Vec<Frame> {
        let mut frames = Vec::new();
        if let Some(session) =
            self.find_session_mut(SessionRoleKey::Sender, source, destination)
        {
            session.state = SessionState::Done;
        }
        if let Some(session) =
            self.find_session_mut(SessionRoleKey::Receiver, destination, source)
        {
            session.state = SessionState::Done;
        }
        frames.push(match SessionMode::for_payload_len(0) {
            SessionMode::Tp => TpControl::Abort { pgn, reason }.encode(source, destination),
            SessionMode::Etp => EtpControl::Abort { pgn, reason }.encode(source, destination),
        });
        self.on_abort.emit(TransportAbortEvent {
            pgn,
            source,
            destination,
            reason,
        });
        frames
    }

    /// Handle one inbound frame whose PGN is TP.CM, TP.DT, ETP.CM or
    /// ETP.DT. `local_addresses` lists every address this network manager
    /// currently owns, so the engine can tell a frame addressed to us apart
    /// from one merely observed on the bus between two other peers.
    pub fn handle_frame(&mut self, frame: &Frame, local_addresses: &[Address]) -> Vec<Frame> {
        let pgn = frame.pgn();
        if pgn == Pgn::TP_CM {
            return self.handle_tp_control(frame, local_addresses);
        }
        if pgn == Pgn::ETP_CM {
            return self.handle_etp_control(frame, local_addresses);
        }
        if pgn == Pgn::TP_DT {
            return self.handle_data(frame, false, local_addresses);
        }
        if pgn == Pgn::ETP_DT {
            return self.handle_data(frame, true, local_addresses);
        }
        Vec::new()
    }

    fn is_local(local_addresses: &[Address], address: Address) -> bool {
        address == BROADCAST_ADDRESS || local_addresses.contains(&address)
    }

    fn handle_tp_control(&mut self, frame: &Frame, local_addresses: &[Address]) -> Vec<Frame> {
        let Some(destination) = frame.destination().or(Some(BROADCAST_ADDRESS)) else {
            return Vec::new();
        };
        let is_broadcast = frame.is_broadcast();
        let Some(control) = TpControl::decode(frame.pdu(), is_broadcast) else {
            return Vec::new();
        };
        if !Self::is_local(local_addresses, destination) {
            return Vec::new();
        }

        let remote = frame.source();
        let now = self.now_ms;

        match control {
            TpControl::Bam { pgn, total_size, total_packets } => {
                let key = SessionKey {
                    role: SessionRoleKey::Receiver,
                    source: remote,
                    destination: BROADCAST_ADDRESS,
                    pgn,
                };
                self.sessions.push(Session::new_broadcast_receiver(
                    key,
                    SessionMode::Tp,
                    total_size as u32,
                    total_packets as u32,
                    now,
                ));
                Vec::new()
            }
            TpControl::Rts { pgn, total_size, total_packets, max_packets_per_cts } => {
                let key = SessionKey { role: SessionRoleKey::Receiver, source: remote, destination, pgn };
                if self.sessions.iter().any(|s| s.key == key && !s.is_done()) {
                    return vec![TpControl::Abort { pgn, reason: AbortReason::AlreadyInSession }
                        .encode(destination, remote)];
                }
                if self.active_session_count() >= self.config.max_concurrent_sessions {
                    return vec![TpControl::Abort { pgn, reason: AbortReason::ResourcesUnavailable }
                        .encode(destination, remote)];
                }
                let window_end = total_packets.min(max_packets_per_cts.max(1).min(self.config.cts_window_packets)) as u32;
                self.sessions.push(Session::new_receiver(
                    key,
                    SessionMode::Tp,
                    total_size as u32,
                    total_packets as u32,
                    window_end,
                    now,
                ));
                vec![TpControl::Cts {
                    pgn,
                    packets_to_send: window_end as u8,
                    next_packet: 1,
                }
                .encode(destination, remote)]
            }
            TpControl::Cts { pgn, packets_to_send, next_packet } => {
                let Some(session) = self.find_session_mut(SessionRoleKey::Sender, destination, remote) else {
                    return Vec::new();
                };
                if matches!(session.state, SessionState::SenderSendingWindow { .. }) {
                    session.state = SessionState::Done;
                    self.on_abort.emit(TransportAbortEvent {
                        pgn,
                        source: remote,
                        destination,
                        reason: AbortReason::CtsWhileInDataTransfer,
                    });
                    return vec![TpControl::Abort { pgn, reason: AbortReason::CtsWhileInDataTransfer }
                        .encode(destination, remote)];
                }
                if packets_to_send == 0 {
                    // Receiver asks us to hold; treated as a keep-alive.
                    session.last_activity_ms = now;
                    return Vec::new();
                }
                session.last_activity_ms = now;
                session.state = SessionState::SenderSendingWindow {
                    next_seq: next_packet as u32,
                    window_end: next_packet as u32 + packets_to_send as u32 - 1,
                };
                Vec::new()
            }
            TpControl::EndOfMessageAck { .. } => {
                if let Some(session) = self.find_session_mut(SessionRoleKey::Sender, destination, remote) {
                    session.state = SessionState::Done;
                }
                Vec::new()
            }
            TpControl::Abort { pgn, reason } => self.handle_abort(pgn, remote, destination, reason),
        }
    }

    fn handle_etp_control(&mut self, frame: &Frame, local_addresses: &[Address]) -> Vec<Frame> {
        let Some(destination) = frame.destination() else {
            return Vec::new();
        };
        if !Self::is_local(local_addresses, destination) {
            return Vec::new();
        }
        let Some(control) = EtpControl::decode(frame.pdu()) else {
            return Vec::new();
        };
        let remote = frame.source();
        let now = self.now_ms;

        match control {
            EtpControl::Rts { pgn, total_size } => {
                let key = SessionKey { role: SessionRoleKey::Receiver, source: remote, destination, pgn };
                if self.sessions.iter().any(|s| s.key == key && !s.is_done()) {
                    return vec![EtpControl::Abort { pgn, reason: AbortReason::AlreadyInSession }
                        .encode(destination, remote)];
                }
                if self.active_session_count() >= self.config.max_concurrent_sessions {
                    return vec![EtpControl::Abort { pgn, reason: AbortReason::ResourcesUnavailable }
                        .encode(destination, remote)];
                }
                let total_packets = data::packet_count(total_size as usize) as u32;
                let window_end = total_packets.min(self.config.cts_window_packets as u32);
                self.sessions.push(Session::new_receiver(
                    key,
                    SessionMode::Etp,
                    total_size,
                    total_packets,
                    window_end,
                    now,
                ));
                vec![EtpControl::Cts {
                    pgn,
                    packets_to_send: window_end as u8,
                    next_packet: 1,
                }
                .encode(destination, remote)]
            }
            EtpControl::Cts { pgn, packets_to_send, next_packet } => {
                let Some(session) = self.find_session_mut(SessionRoleKey::Sender, destination, remote) else {
                    return Vec::new();
                };
                if matches!(session.state, SessionState::SenderSendingWindow { .. }) {
                    session.state = SessionState::Done;
                    self.on_abort.emit(TransportAbortEvent {
                        pgn,
                        source: remote,
                        destination,
                        reason: AbortReason::CtsWhileInDataTransfer,
                    });
                    return vec![EtpControl::Abort { pgn, reason: AbortReason::CtsWhileInDataTransfer }
                        .encode(destination, remote)];
                }
                session.last_activity_ms = now;
                let dpo = EtpControl::DataPacketOffset {
                    pgn,
                    packets_in_window: packets_to_send,
                    packet_offset: next_packet - 1,
                }
                .encode(destination, remote);
                session.state = SessionState::SenderSendingWindow {
                    next_seq: next_packet,
                    window_end: next_packet + packets_to_send as u32 - 1,
                };
                vec![dpo]
            }
            EtpControl::DataPacketOffset { packet_offset, packets_in_window, .. } => {
                if let Some(session) = self.find_session_mut(SessionRoleKey::Receiver, remote, destination) {
                    session.state = SessionState::ReceiverAwaitingData {
                        window_end: packet_offset + packets_in_window as u32,
                    };
                    session.last_activity_ms = now;
                }
                Vec::new()
            }
            EtpControl::EndOfMessageAck { .. } => {
                if let Some(session) = self.find_session_mut(SessionRoleKey::Sender, destination, remote) {
                    session.state = SessionState::Done;
                }
                Vec::new()
            }
            EtpControl::Abort { pgn, reason } => self.handle_abort(pgn, remote, destination, reason),
        }
    }

    fn handle_abort(&mut self, pgn: Pgn, remote: Address, local: Address, reason: AbortReason) -> Vec<Frame> {
        if let Some(session) = self.find_session_mut(SessionRoleKey::Sender, local, remote) {
            session.state = SessionState::Done;
        }
        if let Some(session) = self.find_session_mut(SessionRoleKey::Receiver, remote, local) {
            session.state = SessionState::Done;
        }
        self.on_abort.emit(TransportAbortEvent {
            pgn,
            source: remote,
            destination: local,
            reason,
        });
        Vec::new()
    }

    fn handle_data(&mut self, frame: &Frame, is_etp: bool, local_addresses: &[Address]) -> Vec<Frame> {
        let Some(dt) = DataTransfer::decode(frame.pdu()) else {
            return Vec::new();
        };
        let remote = frame.source();
        let destination = frame.destination().unwrap_or(BROADCAST_ADDRESS);
        if !Self::is_local(local_addresses, destination) {
            return Vec::new();
        }

        let mode = if is_etp { SessionMode::Etp } else { SessionMode::Tp };
        let now = self.now_ms;

        let Some(session) = self.find_session_mut(SessionRoleKey::Receiver, remote, destination) else {
            return Vec::new();
        };
        if session.mode != mode {
            return Vec::new();
        }

        let index = dt.sequence_number as usize;
        if index == 0 || index > session.received.len() {
            return Vec::new();
        }

        // A DT frame must arrive in order: the next sequence number after
        // the lowest one still unreceived. Anything else is either a
        // duplicate (already received) or genuinely out of order, and both
        // are a hard abort per the transport's reassembly contract.
        let expected = session.received.iter().position(|&seen| !seen).map(|i| i + 1);
        if Some(index) != expected {
            let reason = if session.received[index - 1] {
                AbortReason::DuplicateSequence
            } else {
                AbortReason::BadSequence
            };
            let pgn = session.key.pgn;
            session.state = SessionState::Done;
            let abort = if is_etp {
                EtpControl::Abort { pgn, reason }.encode(destination, remote)
            } else {
                TpControl::Abort { pgn, reason }.encode(destination, remote)
            };
            self.on_abort.emit(TransportAbortEvent { pgn, source: remote, destination, reason });
            return vec![abort];
        }

        let start = (index - 1) * data::DATA_BYTES_PER_FRAME;
        let remaining = session.buffer.len().saturating_sub(start);
        let take = remaining.min(data::DATA_BYTES_PER_FRAME);
        session.buffer[start..start + take].copy_from_slice(&dt.data[..take]);
        session.received[index - 1] = true;
        session.last_activity_ms = now;

        let key = session.key;
        let all_received = session.all_received();
        let is_broadcast_session = matches!(session.state, SessionState::ReceiverAwaitingBamData);

        if !all_received {
            if let SessionState::ReceiverAwaitingData { window_end } = session.state {
                if index as u32 == window_end {
                    // Window exhausted: either request more or deliver an EoMA upstream.
                    let total = session.total_packets;
                    let pgn = key.pgn;
                    if window_end >= total {
                        session.state = SessionState::Done;
                    } else {
                        let next_window_end = total.min(window_end + self.config.cts_window_packets as u32);
                        session.state = SessionState::ReceiverAwaitingData { window_end: next_window_end };
                        return vec![TpControl::Cts {
                            pgn,
                            packets_to_send: (next_window_end - window_end) as u8,
                            next_packet: (window_end + 1) as u8,
                        }
                        .encode(destination, remote)];
                    }
                }
            }
            return Vec::new();
        }

        // Fully reassembled.
        let buffer = std::mem::take(&mut session.buffer);
        let total_packets = session.total_packets;
        session.state = SessionState::Done;

        let message = Message::new(key.pgn, remote, destination, buffer)
            .with_priority(Priority::default())
            .with_timestamp(now);
        self.on_message_received.emit(message);

        if is_broadcast_session {
            Vec::new()
        } else {
            vec![TpControl::EndOfMessageAck {
                pgn: key.pgn,
                total_size: 0,
                total_packets: total_packets as u8,
            }
            .encode(destination, remote)]
        }
    }

    /// Advance virtual time by `elapsed_ms`, pacing outbound data frames and
    /// detecting timeouts. Returns every frame that must now be sent.
    pub fn update(&mut self, elapsed_ms: u64) -> Vec<Frame> {
        self.now_ms += elapsed_ms;
        let now = self.now_ms;
        let mut out = Vec::new();

        for i in 0..self.sessions.len() {
            let (key, mode, due) = {
                let s = &self.sessions[i];
                if s.is_done() {
                    continue;
                }
                (s.key, s.mode, s.last_activity_ms)
            };

            let timed_out = match self.sessions[i].state {
                SessionState::SenderAwaitingCts => now.saturating_sub(due) > self.config.t4_ms,
                SessionState::SenderAwaitingCtsOrEom => now.saturating_sub(due) > self.config.t3_ms,
                SessionState::ReceiverAwaitingData { .. } => now.saturating_sub(due) > self.config.t2_ms,
                SessionState::ReceiverAwaitingBamData => now.saturating_sub(due) > self.config.t1_ms,
                _ => false,
            };

            if timed_out {
                if let SessionState::ReceiverAwaitingData { window_end } = self.sessions[i].state {
                    if self.sessions[i].retries == 0 {
                        // Receiver may retry the CTS once before giving up.
                        self.sessions[i].retries += 1;
                        self.sessions[i].last_activity_ms = now;
                        let next_packet = self.sessions[i]
                            .received
                            .iter()
                            .position(|&seen| !seen)
                            .map(|i| i + 1)
                            .unwrap_or(1) as u32;
                        let packets_to_send = window_end.saturating_sub(next_packet - 1);
                        let cts = match mode {
                            SessionMode::Tp => TpControl::Cts {
                                pgn: key.pgn,
                                packets_to_send: packets_to_send as u8,
                                next_packet: next_packet as u8,
                            }
                            .encode(key.destination, key.source),
                            SessionMode::Etp => EtpControl::Cts {
                                pgn: key.pgn,
                                packets_to_send: packets_to_send as u8,
                                next_packet,
                            }
                            .encode(key.destination, key.source),
                        };
                        out.push(cts);
                        continue;
                    }
                }
                self.sessions[i].state = SessionState::Done;
                self.on_abort.emit(TransportAbortEvent {
                    pgn: key.pgn,
                    source: key.source,
                    destination: key.destination,
                    reason: AbortReason::Timeout,
                });
                continue;
            }

            match self.sessions[i].state {
                SessionState::SenderBroadcasting { next_seq } => {
                    if now.saturating_sub(self.sessions[i].last_activity_ms) >= self.config.bam_interval_ms {
                        let frame = Self::send_next_data_frame(&mut self.sessions[i], next_seq, mode, now);
                        if let Some(frame) = frame {
                            out.push(frame);
                        }
                    }
                }
                SessionState::SenderSendingWindow { next_seq, .. } => {
                    if now.saturating_sub(self.sessions[i].last_activity_ms) >= self.config.tr_ms {
                        if let Some(frame) = Self::send_next_data_frame(&mut self.sessions[i], next_seq, mode, now) {
                            out.push(frame);
                        }
                    }
                }
                _ => {}
            }
        }

        self.sessions.retain(|s| !s.is_done());
        out
    }

    fn send_next_data_frame(session: &mut Session, seq: u32, mode: SessionMode, now: u64) -> Option<Frame> {
        if seq > session.total_packets {
            session.state = if matches!(mode, SessionMode::Tp | SessionMode::Etp) && session.key.destination == BROADCAST_ADDRESS {
                SessionState::Done
            } else {
                SessionState::SenderAwaitingCtsOrEom
            };
            return None;
        }

        let start = (seq as usize - 1) * data::DATA_BYTES_PER_FRAME;
        let remaining = session.buffer.len().saturating_sub(start);
        let take = remaining.min(data::DATA_BYTES_PER_FRAME);
        let mut chunk = [0xFFu8; 7];
        chunk[..take].copy_from_slice(&session.buffer[start..start + take]);

        let dt = DataTransfer {
            sequence_number: seq as u8,
            data: chunk,
        };
        let frame = dt.encode(matches!(mode, SessionMode::Etp), session.key.source, session.key.destination);

        session.last_activity_ms = now;
        match session.state {
            SessionState::SenderBroadcasting { .. } => {
                let next = seq + 1;
                session.state = if next > session.total_packets {
                    SessionState::Done
                } else {
                    SessionState::SenderBroadcasting { next_seq: next }
                };
            }
            SessionState::SenderSendingWindow { window_end, .. } => {
                let next = seq + 1;
                session.state = if next > window_end {
                    SessionState::SenderAwaitingCtsOrEom
                } else {
                    SessionState::SenderSendingWindow { next_seq: next, window_end }
                };
            }
            _ => {}
        }

        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_completion(
        sender: &mut TransportEngine,
        receiver: &mut TransportEngine,
        sender_addr: Address,
        receiver_addr: Address,
        pgn: Pgn,
        payload: Vec<u8>,
    ) {
        let frames = sender.send(pgn, sender_addr, receiver_addr, payload).unwrap();
        let mut in_flight = frames;

        for _ in 0..200 {
            if in_flight.is_empty() {
                let from_sender = sender.update(10);
                let from_receiver = receiver.update(10);
                in_flight.extend(from_sender);
                in_flight.extend(from_receiver);
                if in_flight.is_empty() {
                    break;
                }
                continue;
            }
            let mut next_round = Vec::new();
            for frame in in_flight.drain(..) {
                if frame.destination() == Some(receiver_addr) {
                    next_round.extend(receiver.handle_frame(&frame, &[receiver_addr]));
                } else if frame.destination() == Some(sender_addr) {
                    next_round.extend(sender.handle_frame(&frame, &[sender_addr]));
                }
            }
            in_flight = next_round;
        }
    }

    #[test]
    fn destination_specific_transfer_completes() {
        let mut sender = TransportEngine::new(TransportConfig::default());
        let mut receiver = TransportEngine::new(TransportConfig::default());

        let received = std::rc::Rc::new(std::cell::RefCell::new(None));
        let r = received.clone();
        receiver.on_message_received.subscribe(move |m: &Message| {
            *r.borrow_mut() = Some(m.data.clone());
        });

        let payload: Vec<u8> = (0..20u8).collect();
        run_to_completion(&mut sender, &mut receiver, 0x10, 0x20, Pgn::new(0x1234), payload.clone());

        assert_eq!(*received.borrow(), Some(payload));
    }

    #[test]
    fn too_many_sessions_rejected() {
        let config = TransportConfig::default().with_max_concurrent_sessions(1);
        let mut engine = TransportEngine::new(config);
        engine.send(Pgn::new(0x1000), 0x10, 0x20, vec![0u8; 20]).unwrap();
        let result = engine.send(Pgn::new(0x1001), 0x10, 0x21, vec![0u8; 20]);
        assert_eq!(result.unwrap_err(), TransportError::TooManySessions);
    }

    #[test]
    fn broadcast_bam_delivers_with_no_ack() {
        let mut sender = TransportEngine::new(TransportConfig::default());
        let mut receiver = TransportEngine::new(TransportConfig::default());

        let received = std::rc::Rc::new(std::cell::RefCell::new(false));
        let r = received.clone();
        receiver.on_message_received.subscribe(move |_: &Message| {
            *r.borrow_mut() = true;
        });

        let frames = sender
            .send(Pgn::DM1, 0x10, BROADCAST_ADDRESS, vec![1, 2, 3, 4, 5, 6, 7, 8, 9])
            .unwrap();
        for f in &frames {
            receiver.handle_frame(f, &[0x20]);
        }

        for _ in 0..50 {
            let frames = sender.update(60);
            for f in &frames {
                receiver.handle_frame(f, &[0x20]);
            }
            receiver.update(60);
        }

        assert!(*received.borrow());
    }

    fn open_receiver_session(pgn: Pgn, total_packets: u8) -> TransportEngine {
        let mut receiver = TransportEngine::new(TransportConfig::default());
        let rts = TpControl::Rts {
            pgn,
            total_size: total_packets as u16 * 7,
            total_packets,
            max_packets_per_cts: total_packets,
        }
        .encode(0x20, 0x10);
        receiver.handle_frame(&rts, &[0x10]);
        receiver
    }

    #[test]
    fn duplicate_dt_frame_aborts_the_session() {
        let pgn = Pgn::new(0x1234);
        let mut receiver = open_receiver_session(pgn, 3);

        let aborted = std::rc::Rc::new(std::cell::RefCell::new(None));
        let a = aborted.clone();
        receiver.on_abort.subscribe(move |e: &TransportAbortEvent| *a.borrow_mut() = Some(e.reason));

        let dt1 = DataTransfer { sequence_number: 1, data: [0; 7] }.encode(false, 0x20, 0x10);
        receiver.handle_frame(&dt1, &[0x10]);
        receiver.handle_frame(&dt1, &[0x10]);

        assert_eq!(*aborted.borrow(), Some(AbortReason::DuplicateSequence));
    }

    #[test]
    fn out_of_order_dt_frame_aborts_the_session() {
        let pgn = Pgn::new(0x1234);
        let mut receiver = open_receiver_session(pgn, 3);

        let aborted = std::rc::Rc::new(std::cell::RefCell::new(None));
        let a = aborted.clone();
        receiver.on_abort.subscribe(move |e: &TransportAbortEvent| *a.borrow_mut() = Some(e.reason));

        let dt2 = DataTransfer { sequence_number: 2, data: [0; 7] }.encode(false, 0x20, 0x10);
        receiver.handle_frame(&dt2, &[0x10]);

        assert_eq!(*aborted.borrow(), Some(AbortReason::BadSequence));
    }

    #[test]
    fn repeated_rts_while_in_session_is_rejected() {
        let pgn = Pgn::new(0x1234);
        let mut receiver = open_receiver_session(pgn, 3);

        let rts = TpControl::Rts {
            pgn,
            total_size: 21,
            total_packets: 3,
            max_packets_per_cts: 3,
        }
        .encode(0x20, 0x10);
        let response = receiver.handle_frame(&rts, &[0x10]);

        assert_eq!(response.len(), 1);
        let control = TpControl::decode(response[0].pdu(), false).unwrap();
        assert_eq!(control, TpControl::Abort { pgn, reason: AbortReason::AlreadyInSession });
    }

    #[test]
    fn cts_mid_transfer_is_rejected() {
        let pgn = Pgn::new(0x1234);
        let mut sender = TransportEngine::new(TransportConfig::default());
        sender.send(pgn, 0x20, 0x10, vec![0u8; 21]).unwrap();

        let first_cts = TpControl::Cts { pgn, packets_to_send: 3, next_packet: 1 }.encode(0x10, 0x20);
        sender.handle_frame(&first_cts, &[0x20]);

        let aborted = std::rc::Rc::new(std::cell::RefCell::new(None));
        let a = aborted.clone();
        sender.on_abort.subscribe(move |e: &TransportAbortEvent| *a.borrow_mut() = Some(e.reason));

        let second_cts = TpControl::Cts { pgn, packets_to_send: 3, next_packet: 1 }.encode(0x10, 0x20);
        sender.handle_frame(&second_cts, &[0x20]);

        assert_eq!(*aborted.borrow(), Some(AbortReason::CtsWhileInDataTransfer));
    }

    #[test]
    fn receiver_retries_cts_once_before_aborting() {
        let pgn = Pgn::new(0x1234);
        let mut receiver = open_receiver_session(pgn, 3);

        let aborted = std::rc::Rc::new(std::cell::RefCell::new(false));
        let a = aborted.clone();
        receiver.on_abort.subscribe(move |_: &TransportAbortEvent| *a.borrow_mut() = true);

        let t2 = TransportConfig::default().t2_ms;
        let retry = receiver.update(t2 + 1);
        assert_eq!(retry.len(), 1);
        assert!(!*aborted.borrow(), "first T2 timeout should retry, not abort");

        receiver.update(t2 + 1);
        assert!(*aborted.borrow(), "second T2 timeout should abort");
    }
}
