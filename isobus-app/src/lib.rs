//! Application-layer protocols riding the ISOBUS / SAE J1939 substrate:
//! diagnostics, speed/distance, heartbeat, PGN request/acknowledge and
//! guidance commands.
//!
//! Every protocol here follows the same shape: `initialize()` subscribes to
//! its PGN(s) on a shared, `Rc<RefCell<_>>`-owned [`isobus_network::NetworkManager`],
//! an inbound handler only records what it saw into the protocol's own
//! `Rc<RefCell<_>>` state (never calling back into the manager, which may
//! already be borrowed), and a separate `update(elapsed_ms)` call — driven
//! by the host, independently of the manager's own tick — sends anything
//! that's due and drains what inbound handlers recorded into public events.

#[macro_use]
extern crate log;

pub mod diagnostics;
pub mod guidance;
pub mod heartbeat;
pub mod pgn_request;
pub mod speed;

pub use diagnostics::DiagnosticProtocol;
pub use guidance::{GuidanceData, GuidanceInterface};
pub use heartbeat::{HeartbeatConfig, HeartbeatProtocol};
pub use pgn_request::PGNRequestProtocol;
pub use speed::{SpeedData, SpeedDistanceInterface};
