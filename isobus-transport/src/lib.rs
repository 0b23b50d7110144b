//! Transport Protocol (TP) and Extended Transport Protocol (ETP) session
//! engine: the layer that fragments a logical [`isobus_core::message::Message`]
//! into CAN frames and reassembles one from the frames a peer sends.

#[macro_use]
extern crate log;

pub mod config;
pub mod control;
pub mod data;
pub mod engine;
pub mod session;

pub use config::TransportConfig;
pub use control::{AbortReason, EtpControl, TpControl};
pub use engine::{TransportAbortEvent, TransportEngine, TransportError};
pub use session::{Session, SessionKey, SessionMode, SessionRole};
