//! Core types shared across the ISOBUS / SAE J1939 stack.
//!
//! This crate has no notion of a CAN driver, a transport session or an
//! application protocol: it only defines the vocabulary those layers share —
//! addresses, PGNs, the 29-bit identifier, the 64-bit NAME, control function
//! bookkeeping, diagnostic trouble codes and the small synchronous event
//! primitive used for fan-out notifications.

#[macro_use]
extern crate log;

pub mod control_function;
pub mod dtc;
pub mod error;
pub mod event;
pub mod identifier;
pub mod message;
pub mod name;
pub mod pgn;

pub use control_function::{CFHandle, ClaimState, ControlFunction, NameFilter};
pub use dtc::{ConversionMethod, DiagnosticLamps, Dtc, LampFlash, LampFlashState, LampStatus};
pub use error::{ConfigError, EndpointError, PrecondError};
pub use event::Event;
pub use identifier::{Identifier, Priority};
pub use message::Message;
pub use name::{Name, NameBuilder};
pub use pgn::Pgn;

/// An 8-bit J1939 source or destination address.
pub type Address = u8;

/// The null address: used by a control function that has not yet claimed one.
pub const NULL_ADDRESS: Address = 0xFE;

/// The global / broadcast address.
pub const BROADCAST_ADDRESS: Address = 0xFF;

/// Lower bound (inclusive) of the dynamic address range available to
/// arbitrary-address-capable control functions.
pub const DYNAMIC_ADDRESS_RANGE_START: Address = 128;

/// Upper bound (inclusive) of the dynamic address range.
pub const DYNAMIC_ADDRESS_RANGE_END: Address = 247;
