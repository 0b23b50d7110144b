//! TP.DT / ETP.DT data-transfer frame codecs.

use isobus_core::{Address, Priority};
use isobus_core::pgn::Pgn;
use isobus_j1939::Frame;

/// Payload bytes carried by a single TP.DT or ETP.DT frame.
pub const DATA_BYTES_PER_FRAME: usize = 7;

/// One TP.DT (PGN 0xEB00) or ETP.DT (PGN 0xC700) frame: a one-byte sequence
/// number (1..=255, wrapping is a hard error per ISO 11783-3) followed by 7
/// payload bytes, the trailing ones padded with `0xFF` for the last frame of
/// a message whose length isn't a multiple of 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTransfer {
    pub sequence_number: u8,
    pub data: [u8; DATA_BYTES_PER_FRAME],
}

impl DataTransfer {
    pub fn encode(self, is_etp: bool, source: Address, destination: Address) -> Frame {
        let mut data = [0xFFu8; 8];
        data[0] = self.sequence_number;
        data[1..8].copy_from_slice(&self.data);
        let pgn = if is_etp { Pgn::ETP_DT } else { Pgn::TP_DT };
        Frame::from_message(Priority::new(7), pgn, source, destination, &data)
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        if payload.len() < 8 {
            return None;
        }
        let mut data = [0u8; DATA_BYTES_PER_FRAME];
        data.copy_from_slice(&payload[1..8]);
        Some(Self {
            sequence_number: payload[0],
            data,
        })
    }
}

/// Split a full message payload into the data-transfer frames required to
/// carry it, in order, starting at sequence number 1.
pub fn fragment(payload: &[u8]) -> Vec<DataTransfer> {
    payload
        .chunks(DATA_BYTES_PER_FRAME)
        .enumerate()
        .map(|(i, chunk)| {
            let mut data = [0xFFu8; DATA_BYTES_PER_FRAME];
            data[..chunk.len()].copy_from_slice(chunk);
            DataTransfer {
                sequence_number: (i + 1) as u8,
                data,
            }
        })
        .collect()
}

/// Number of data-transfer frames needed to carry `payload_len` bytes.
pub fn packet_count(payload_len: usize) -> usize {
    payload_len.div_ceil(DATA_BYTES_PER_FRAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_exact_multiple() {
        let payload = vec![0u8; 14];
        let packets = fragment(&payload);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].sequence_number, 1);
        assert_eq!(packets[1].sequence_number, 2);
    }

    #[test]
    fn fragment_pads_last_frame() {
        let payload = vec![1u8, 2, 3];
        let packets = fragment(&payload);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].data, [1, 2, 3, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn packet_count_rounds_up() {
        assert_eq!(packet_count(7), 1);
        assert_eq!(packet_count(8), 2);
        assert_eq!(packet_count(1785), 255);
    }

    #[test]
    fn round_trip_through_frame() {
        let dt = DataTransfer {
            sequence_number: 5,
            data: [1, 2, 3, 4, 5, 6, 7],
        };
        let frame = dt.encode(false, 0x32, 0x02);
        assert_eq!(DataTransfer::decode(frame.pdu()).unwrap(), dt);
    }
}
