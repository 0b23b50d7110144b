//! TP.CM / ETP.CM control-frame codecs.

use isobus_core::pgn::Pgn;
use isobus_core::{Address, Priority};
use isobus_j1939::Frame;

const CTRL_RTS: u8 = 16;
const CTRL_CTS: u8 = 17;
const CTRL_END_OF_MSG_ACK: u8 = 19;
const CTRL_BAM: u8 = 32;
const CTRL_CONN_ABORT: u8 = 255;

const CTRL_ETP_RTS: u8 = 20;
const CTRL_ETP_CTS: u8 = 21;
const CTRL_ETP_DPO: u8 = 22;
const CTRL_ETP_EOM: u8 = 23;

/// Why a transport session was aborted, per ISO 11783-3 / J1939-21.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    AlreadyInSession,
    ResourcesUnavailable,
    Timeout,
    CtsWhileInDataTransfer,
    RetransmitNotSupported,
    UnexpectedData,
    BadSequence,
    DuplicateSequence,
    UnexpectedPacket,
    AnyOther,
}

impl AbortReason {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::AlreadyInSession => 1,
            Self::ResourcesUnavailable => 2,
            Self::Timeout => 3,
            Self::CtsWhileInDataTransfer => 4,
            Self::RetransmitNotSupported => 5,
            Self::UnexpectedData => 6,
            Self::BadSequence => 7,
            Self::DuplicateSequence => 8,
            Self::UnexpectedPacket => 9,
            Self::AnyOther => 250,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::AlreadyInSession,
            2 => Self::ResourcesUnavailable,
            3 => Self::Timeout,
            4 => Self::CtsWhileInDataTransfer,
            5 => Self::RetransmitNotSupported,
            6 => Self::UnexpectedData,
            7 => Self::BadSequence,
            8 => Self::DuplicateSequence,
            9 => Self::UnexpectedPacket,
            _ => Self::AnyOther,
        }
    }
}

/// A decoded TP.CM (PGN 0xEC00) control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpControl {
    Rts {
        pgn: Pgn,
        total_size: u16,
        total_packets: u8,
        max_packets_per_cts: u8,
    },
    Cts {
        pgn: Pgn,
        packets_to_send: u8,
        next_packet: u8,
    },
    EndOfMessageAck {
        pgn: Pgn,
        total_size: u16,
        total_packets: u8,
    },
    Bam {
        pgn: Pgn,
        total_size: u16,
        total_packets: u8,
    },
    Abort {
        pgn: Pgn,
        reason: AbortReason,
    },
}

impl TpControl {
    pub fn encode(self, source: Address, destination: Address) -> Frame {
        let mut data = [0xFFu8; 8];
        let pgn = self.pgn();
        match self {
            Self::Rts { total_size, total_packets, max_packets_per_cts, .. } => {
                data[0] = CTRL_RTS;
                data[1..3].copy_from_slice(&total_size.to_le_bytes());
                data[3] = total_packets;
                data[4] = max_packets_per_cts;
            }
            Self::Cts { packets_to_send, next_packet, .. } => {
                data[0] = CTRL_CTS;
                data[1] = packets_to_send;
                data[2] = next_packet;
            }
            Self::EndOfMessageAck { total_size, total_packets, .. } => {
                data[0] = CTRL_END_OF_MSG_ACK;
                data[1..3].copy_from_slice(&total_size.to_le_bytes());
                data[3] = total_packets;
            }
            Self::Bam { total_size, total_packets, .. } => {
                data[0] = CTRL_BAM;
                data[1..3].copy_from_slice(&total_size.to_le_bytes());
                data[3] = total_packets;
            }
            Self::Abort { reason, .. } => {
                data[0] = CTRL_CONN_ABORT;
                data[1] = reason.to_u8();
            }
        }
        data[5] = (pgn.value() & 0xFF) as u8;
        data[6] = ((pgn.value() >> 8) & 0xFF) as u8;
        data[7] = ((pgn.value() >> 16) & 0xFF) as u8;

        Frame::from_message(Priority::new(7), Pgn::TP_CM, source, destination, &data)
    }

    fn pgn(self) -> Pgn {
        match self {
            Self::Rts { pgn, .. }
            | Self::Cts { pgn, .. }
            | Self::EndOfMessageAck { pgn, .. }
            | Self::Bam { pgn, .. }
            | Self::Abort { pgn, .. } => pgn,
        }
    }

    /// Decode a TP.CM data payload. `is_broadcast` tells us whether to treat
    /// a BAM control byte as valid (BAM only ever travels on the broadcast
    /// address).
    pub fn decode(data: &[u8], is_broadcast: bool) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let pgn = Pgn::new(u32::from_le_bytes([data[5], data[6], data[7], 0]));
        match data[0] {
            CTRL_BAM if is_broadcast => Some(Self::Bam {
                pgn,
                total_size: u16::from_le_bytes([data[1], data[2]]),
                total_packets: data[3],
            }),
            CTRL_RTS => Some(Self::Rts {
                pgn,
                total_size: u16::from_le_bytes([data[1], data[2]]),
                total_packets: data[3],
                max_packets_per_cts: data[4],
            }),
            CTRL_CTS => Some(Self::Cts {
                pgn,
                packets_to_send: data[1],
                next_packet: data[2],
            }),
            CTRL_END_OF_MSG_ACK => Some(Self::EndOfMessageAck {
                pgn,
                total_size: u16::from_le_bytes([data[1], data[2]]),
                total_packets: data[3],
            }),
            CTRL_CONN_ABORT => Some(Self::Abort {
                pgn,
                reason: AbortReason::from_u8(data[1]),
            }),
            _ => None,
        }
    }
}

/// A decoded ETP.CM (PGN 0xC800) control message. Sizes and packet counts
/// are 32-bit, and an extra Data Packet Offset (DPO) control frame precedes
/// each window of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtpControl {
    Rts {
        pgn: Pgn,
        total_size: u32,
    },
    Cts {
        pgn: Pgn,
        packets_to_send: u8,
        next_packet: u32,
    },
    DataPacketOffset {
        pgn: Pgn,
        packets_in_window: u8,
        packet_offset: u32,
    },
    EndOfMessageAck {
        pgn: Pgn,
        total_size: u32,
    },
    Abort {
        pgn: Pgn,
        reason: AbortReason,
    },
}

impl EtpControl {
    pub fn encode(self, source: Address, destination: Address) -> Frame {
        let mut data = [0xFFu8; 8];
        let pgn = self.pgn();
        match self {
            Self::Rts { total_size, .. } => {
                data[0] = CTRL_ETP_RTS;
                data[1..5].copy_from_slice(&total_size.to_le_bytes());
            }
            Self::Cts { packets_to_send, next_packet, .. } => {
                data[0] = CTRL_ETP_CTS;
                data[1] = packets_to_send;
                let bytes = next_packet.to_le_bytes();
                data[2..5].copy_from_slice(&bytes[..3]);
            }
            Self::DataPacketOffset { packets_in_window, packet_offset, .. } => {
                data[0] = CTRL_ETP_DPO;
                data[1] = packets_in_window;
                let bytes = packet_offset.to_le_bytes();
                data[2..5].copy_from_slice(&bytes[..3]);
            }
            Self::EndOfMessageAck { total_size, .. } => {
                data[0] = CTRL_ETP_EOM;
                data[1..5].copy_from_slice(&total_size.to_le_bytes());
            }
            Self::Abort { reason, .. } => {
                data[0] = CTRL_CONN_ABORT;
                data[1] = reason.to_u8();
            }
        }
        data[5] = (pgn.value() & 0xFF) as u8;
        data[6] = ((pgn.value() >> 8) & 0xFF) as u8;
        data[7] = ((pgn.value() >> 16) & 0xFF) as u8;

        Frame::from_message(Priority::new(7), Pgn::ETP_CM, source, destination, &data)
    }

    fn pgn(self) -> Pgn {
        match self {
            Self::Rts { pgn, .. }
            | Self::Cts { pgn, .. }
            | Self::DataPacketOffset { pgn, .. }
            | Self::EndOfMessageAck { pgn, .. }
            | Self::Abort { pgn, .. } => pgn,
        }
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let pgn = Pgn::new(u32::from_le_bytes([data[5], data[6], data[7], 0]));
        match data[0] {
            CTRL_ETP_RTS => Some(Self::Rts {
                pgn,
                total_size: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
            }),
            CTRL_ETP_CTS => Some(Self::Cts {
                pgn,
                packets_to_send: data[1],
                next_packet: u32::from_le_bytes([data[2], data[3], data[4], 0]),
            }),
            CTRL_ETP_DPO => Some(Self::DataPacketOffset {
                pgn,
                packets_in_window: data[1],
                packet_offset: u32::from_le_bytes([data[2], data[3], data[4], 0]),
            }),
            CTRL_ETP_EOM => Some(Self::EndOfMessageAck {
                pgn,
                total_size: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
            }),
            CTRL_CONN_ABORT => Some(Self::Abort {
                pgn,
                reason: AbortReason::from_u8(data[1]),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tp_rts_round_trip() {
        let msg = TpControl::Rts {
            pgn: Pgn::new(0xFEB0),
            total_size: 20,
            total_packets: 3,
            max_packets_per_cts: 1,
        };
        let frame = msg.encode(0x32, 0x02);
        assert_eq!(frame.pdu()[0], CTRL_RTS);
        let decoded = TpControl::decode(frame.pdu(), false).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn tp_bam_requires_broadcast() {
        let msg = TpControl::Bam {
            pgn: Pgn::new(0xFEB0),
            total_size: 20,
            total_packets: 3,
        };
        let frame = msg.encode(0x32, isobus_core::BROADCAST_ADDRESS);
        assert!(TpControl::decode(frame.pdu(), false).is_none());
        assert_eq!(TpControl::decode(frame.pdu(), true).unwrap(), msg);
    }

    #[test]
    fn tp_abort_round_trip() {
        let msg = TpControl::Abort {
            pgn: Pgn::new(0xFEB0),
            reason: AbortReason::Timeout,
        };
        let frame = msg.encode(0x90, 0x9B);
        assert_eq!(TpControl::decode(frame.pdu(), false).unwrap(), msg);
    }

    #[test]
    fn etp_rts_round_trip() {
        let msg = EtpControl::Rts {
            pgn: Pgn::new(0xFEB0),
            total_size: 200_000,
        };
        let frame = msg.encode(0x32, 0x02);
        assert_eq!(EtpControl::decode(frame.pdu()).unwrap(), msg);
    }

    #[test]
    fn etp_dpo_round_trip() {
        let msg = EtpControl::DataPacketOffset {
            pgn: Pgn::new(0xFEB0),
            packets_in_window: 200,
            packet_offset: 512,
        };
        let frame = msg.encode(0x32, 0x02);
        assert_eq!(EtpControl::decode(frame.pdu()).unwrap(), msg);
    }
}
