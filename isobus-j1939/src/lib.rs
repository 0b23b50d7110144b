//! CAN frame plumbing for the ISOBUS / SAE J1939 stack.
//!
//! This crate is deliberately small: a [`Frame`](frame::Frame) type and an
//! [`Endpoint`](endpoint::Endpoint) trait describing how frames reach and
//! leave a CAN port. Everything that interprets frame *sequences* — address
//! claim, transport sessions, application protocols — lives in the crates
//! above this one.

#[macro_use]
extern crate log;

pub mod endpoint;
pub mod frame;

#[cfg(feature = "linux-socketcan")]
pub mod socketcan;

pub use endpoint::{Endpoint, LoopbackEndpoint};
pub use frame::Frame;

#[cfg(feature = "linux-socketcan")]
pub use socketcan::SocketCanEndpoint;
