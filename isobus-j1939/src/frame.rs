//! The on-wire CAN frame: a 29-bit identifier plus up to 8 data bytes.

use isobus_core::identifier::{Identifier, Priority};
use isobus_core::pgn::Pgn;
use isobus_core::Address;

/// Maximum number of data bytes a classic (non-FD) CAN frame can carry.
pub const MAX_FRAME_LEN: usize = 8;

/// A single CAN frame carrying a J1939 identifier.
///
/// Unused trailing data bytes are padded with `0xFF`, the standard J1939
/// "not available" filler, matching the padding every application protocol
/// in this stack already expects when reading past the end of a short
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub id: Identifier,
    pub length: u8,
    pub data: [u8; MAX_FRAME_LEN],
}

impl Frame {
    /// An empty, zeroed frame addressed to nobody — a starting point for
    /// [`Frame::from_message`] or manual field assignment.
    pub fn new() -> Self {
        Self {
            id: Identifier::decode(0),
            length: MAX_FRAME_LEN as u8,
            data: [0xFF; MAX_FRAME_LEN],
        }
    }

    /// Build a frame from an application payload of up to 8 bytes, padding
    /// any remainder with `0xFF`.
    pub fn from_message(
        priority: Priority,
        pgn: Pgn,
        source: Address,
        destination: Address,
        payload: &[u8],
    ) -> Self {
        assert!(payload.len() <= MAX_FRAME_LEN, "payload exceeds a single CAN frame");

        let mut data = [0xFFu8; MAX_FRAME_LEN];
        data[..payload.len()].copy_from_slice(payload);

        Self {
            id: Identifier::for_pgn(priority, pgn, source, destination),
            length: MAX_FRAME_LEN as u8,
            data,
        }
    }

    #[inline]
    pub fn pgn(&self) -> Pgn {
        self.id.pgn()
    }

    #[inline]
    pub fn source(&self) -> Address {
        self.id.source
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.id.priority
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.id.is_broadcast()
    }

    #[inline]
    pub fn destination(&self) -> Option<Address> {
        self.id.destination()
    }

    /// The populated slice of `data` (`0..length`), not including the
    /// trailing filler.
    #[inline]
    pub fn pdu(&self) -> &[u8] {
        &self.data[..self.length as usize]
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isobus_core::BROADCAST_ADDRESS;

    #[test]
    fn default_frame() {
        let f = Frame::new();
        assert_eq!(f.length, 8);
        assert_eq!(f.id.encode(), 0);
    }

    #[test]
    fn from_message_full_payload() {
        let payload = [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let f = Frame::from_message(
            Priority::default(),
            Pgn::VEHICLE_SPEED,
            0x28,
            BROADCAST_ADDRESS,
            &payload,
        );
        assert_eq!(f.pgn(), Pgn::VEHICLE_SPEED);
        assert_eq!(f.source(), 0x28);
        assert!(f.is_broadcast());
        assert_eq!(f.data[0], 0x01);
        assert_eq!(f.data[7], 0x08);
    }

    #[test]
    fn short_payload_pads_with_0xff() {
        let payload = [0xAAu8, 0xBB, 0xCC];
        let f = Frame::from_message(Priority::new(4), Pgn::REQUEST, 0x10, 0x20, &payload);
        assert_eq!(f.data[0], 0xAA);
        assert_eq!(f.data[2], 0xCC);
        assert_eq!(f.data[3], 0xFF);
        assert_eq!(f.data[7], 0xFF);
    }

    #[test]
    fn priority_accessor() {
        let mut f = Frame::new();
        f.id = Identifier::for_pgn(Priority::HIGH, Pgn::DM1, 0x00, BROADCAST_ADDRESS);
        assert_eq!(f.priority(), Priority::HIGH);
    }
}
