//! Minimal VT-to-ECU / ECU-to-VT message type bytes used by the client and
//! server state machines in this crate.
//!
//! These are a small internal handshake, not a claim of full ISO 11783-6
//! command-byte compliance — the object pool upload mechanism and
//! client/server connection handshake are modeled to the depth the state
//! machine needs, per the VT section's scope note.

pub const VT_STATUS: u8 = 0xFE;
pub const GET_MEMORY: u8 = 0xC2;
pub const GET_MEMORY_RESPONSE: u8 = 0xC3;
pub const OBJECT_POOL_DATA: u8 = 0x11;
pub const END_OF_OBJECT_POOL: u8 = 0x12;
pub const END_OF_OBJECT_POOL_RESPONSE: u8 = 0x13;
pub const WORKING_SET_MAINTENANCE: u8 = 0xFF;

pub const HIDE_SHOW: u8 = 0xA1;
pub const CHANGE_NUMERIC_VALUE: u8 = 0xA8;
pub const CHANGE_STRING_VALUE: u8 = 0xB3;
pub const CHANGE_ACTIVE_MASK: u8 = 0xAD;
pub const BUTTON_ACTIVATION: u8 = 0xA6;
