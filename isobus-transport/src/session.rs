//! A single TP or ETP session: one in-flight multi-frame message between a
//! specific sender and receiver (or one sender and everybody, for BAM).

use isobus_core::pgn::Pgn;
use isobus_core::Address;

use crate::data::packet_count;

/// TP (payload 9..1785 bytes) or ETP (payload up to ~117 MB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Tp,
    Etp,
}

impl SessionMode {
    pub fn for_payload_len(len: usize) -> Self {
        if len > 1785 {
            Self::Etp
        } else {
            Self::Tp
        }
    }
}

/// Whether this side of the session is producing or consuming the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Sender,
    Receiver,
}

/// Identifies a session: per spec, sessions are keyed by direction plus the
/// (source, destination, PGN) triple. `role` stands in for "direction"
/// here — a sender session and a receiver session with the same addresses
/// and PGN are distinct entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub role: SessionRoleKey,
    pub source: Address,
    pub destination: Address,
    pub pgn: Pgn,
}

/// Hashable twin of [`SessionRole`] (the real enum isn't `Hash` because it
/// never needs to be outside of this key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRoleKey {
    Sender,
    Receiver,
}

impl From<SessionRole> for SessionRoleKey {
    fn from(role: SessionRole) -> Self {
        match role {
            SessionRole::Sender => Self::Sender,
            SessionRole::Receiver => Self::Receiver,
        }
    }
}

/// Internal state of one session's progress through the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Sender: RTS sent (or about to be), waiting for CTS.
    SenderAwaitingCts,
    /// Sender: a CTS window is open; `next_seq` is the next DT frame to
    /// send, `window_end` the last sequence number granted by the CTS.
    SenderSendingWindow { next_seq: u32, window_end: u32 },
    /// Sender: last window sent, waiting for the next CTS or the final
    /// End-of-Message ACK.
    SenderAwaitingCtsOrEom,
    /// Sender (BAM only): pacing broadcast DT frames with no flow control.
    SenderBroadcasting { next_seq: u32 },
    /// Receiver: CTS sent, waiting for the first DT frame of the window.
    ReceiverAwaitingData { window_end: u32 },
    /// Receiver (BAM only): waiting for the next DT frame; no CTS involved.
    ReceiverAwaitingBamData,
    /// Terminal: the message was fully reassembled/sent, or the session was
    /// aborted. Sessions in this state are removed on the next sweep.
    Done,
}

/// One TP or ETP session.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: SessionKey,
    pub mode: SessionMode,
    pub state: SessionState,
    pub total_size: u32,
    pub total_packets: u32,
    pub max_packets_per_cts: u8,
    /// Reassembly buffer (receiver) or the full payload to send (sender).
    pub buffer: Vec<u8>,
    /// Bitmap of which 1-indexed packet numbers have been received so far
    /// (receiver only), used to detect duplicates and gaps.
    pub received: Vec<bool>,
    pub last_activity_ms: u64,
    pub retries: u8,
}

impl Session {
    pub fn new_sender(key: SessionKey, mode: SessionMode, payload: Vec<u8>, now_ms: u64) -> Self {
        let total_packets = packet_count(payload.len()) as u32;
        Self {
            key,
            mode,
            state: if matches!(key.role, SessionRoleKey::Sender) {
                SessionState::SenderAwaitingCts
            } else {
                unreachable!("sender session built with a non-sender key")
            },
            total_size: payload.len() as u32,
            total_packets,
            max_packets_per_cts: 0xFF,
            buffer: payload,
            received: Vec::new(),
            last_activity_ms: now_ms,
            retries: 0,
        }
    }

    pub fn new_broadcast_sender(key: SessionKey, mode: SessionMode, payload: Vec<u8>, now_ms: u64) -> Self {
        let total_packets = packet_count(payload.len()) as u32;
        Self {
            key,
            mode,
            state: SessionState::SenderBroadcasting { next_seq: 1 },
            total_size: payload.len() as u32,
            total_packets,
            max_packets_per_cts: 0xFF,
            buffer: payload,
            received: Vec::new(),
            last_activity_ms: now_ms,
            retries: 0,
        }
    }

    pub fn new_receiver(
        key: SessionKey,
        mode: SessionMode,
        total_size: u32,
        total_packets: u32,
        window_end: u32,
        now_ms: u64,
    ) -> Self {
        Self {
            key,
            mode,
            state: SessionState::ReceiverAwaitingData { window_end },
            total_size,
            total_packets,
            max_packets_per_cts: 0xFF,
            buffer: vec![0u8; total_size as usize],
            received: vec![false; total_packets as usize],
            last_activity_ms: now_ms,
            retries: 0,
        }
    }

    pub fn new_broadcast_receiver(
        key: SessionKey,
        mode: SessionMode,
        total_size: u32,
        total_packets: u32,
        now_ms: u64,
    ) -> Self {
        Self {
            key,
            mode,
            state: SessionState::ReceiverAwaitingBamData,
            total_size,
            total_packets,
            max_packets_per_cts: 0xFF,
            buffer: vec![0u8; total_size as usize],
            received: vec![false; total_packets as usize],
            last_activity_ms: now_ms,
            retries: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, SessionState::Done)
    }

    pub fn all_received(&self) -> bool {
        self.received.iter().all(|&b| b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_selection_by_payload_length() {
        assert_eq!(SessionMode::for_payload_len(100), SessionMode::Tp);
        assert_eq!(SessionMode::for_payload_len(1785), SessionMode::Tp);
        assert_eq!(SessionMode::for_payload_len(1786), SessionMode::Etp);
    }

    #[test]
    fn receiver_tracks_completion() {
        let key = SessionKey {
            role: SessionRoleKey::Receiver,
            source: 0x10,
            destination: 0x20,
            pgn: Pgn::new(0x1234),
        };
        let mut session = Session::new_receiver(key, SessionMode::Tp, 14, 2, 2, 0);
        assert!(!session.all_received());
        session.received[0] = true;
        session.received[1] = true;
        assert!(session.all_received());
    }
}
