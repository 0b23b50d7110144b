//! The logical, reassembled message that application protocols exchange
//! with the network manager — as opposed to a single on-wire [`crate::identifier::Identifier`]
//! plus up to 8 data bytes.

use crate::identifier::Priority;
use crate::pgn::Pgn;
use crate::Address;

/// A logical application message: a PGN plus a payload of 1 to roughly 117
/// million bytes. Payloads of 8 bytes or fewer are carried on a single CAN
/// frame; larger payloads are fragmented by the transport layer and
/// reassembled before being delivered here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub pgn: Pgn,
    pub priority: Priority,
    pub source: Address,
    pub destination: Address,
    pub data: Vec<u8>,
    /// Virtual-clock milliseconds at which this message was observed
    /// complete (single-frame arrival, or transport reassembly finishing).
    /// Zero unless the caller stamps it with [`Message::with_timestamp`].
    pub timestamp: u64,
}

impl Message {
    pub fn new(pgn: Pgn, source: Address, destination: Address, data: Vec<u8>) -> Self {
        Self {
            pgn,
            priority: Priority::default(),
            source,
            destination,
            data,
            timestamp: 0,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// `true` if this message fits in a single CAN frame.
    pub fn is_single_frame(&self) -> bool {
        self.data.len() <= 8
    }

    /// Read a single byte from the payload, returning `0xFF` (the standard
    /// "not available" filler) if the payload is shorter than `index + 1`.
    pub fn get_u8(&self, index: usize) -> u8 {
        self.data.get(index).copied().unwrap_or(0xFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_detection() {
        let short = Message::new(Pgn::DM1, 0x28, crate::BROADCAST_ADDRESS, vec![0; 8]);
        assert!(short.is_single_frame());

        let long = Message::new(Pgn::DM1, 0x28, crate::BROADCAST_ADDRESS, vec![0; 9]);
        assert!(!long.is_single_frame());
    }

    #[test]
    fn get_u8_out_of_range_is_filler() {
        let msg = Message::new(
            Pgn::VEHICLE_SPEED,
            0x28,
            crate::BROADCAST_ADDRESS,
            vec![0x01, 0x02],
        );
        assert_eq!(msg.get_u8(0), 0x01);
        assert_eq!(msg.get_u8(7), 0xFF);
    }

    #[test]
    fn timestamp_defaults_to_zero_and_is_settable() {
        let msg = Message::new(Pgn::DM1, 0x28, crate::BROADCAST_ADDRESS, vec![0xFF; 8]);
        assert_eq!(msg.timestamp, 0);

        let msg = msg.with_timestamp(4200);
        assert_eq!(msg.timestamp, 4200);
    }
}
