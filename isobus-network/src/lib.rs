//! Network management for the ISOBUS / SAE J1939 stack: the control
//! function registry, the address claim protocol, bus-load estimation and
//! the tick-driven update loop that ties every lower layer together.
//!
//! Everything below this crate — `isobus-j1939`'s frames and endpoints,
//! `isobus-transport`'s TP/ETP sessions — is pulled rather than pushed:
//! those layers return the frames they want sent instead of holding a
//! reference to a port. [`NetworkManager`] is the only thing that owns an
//! [`isobus_j1939::Endpoint`] and actually calls `send`/`poll` on it.

#[macro_use]
extern crate log;

pub mod address_claimer;
pub mod bus_load;
pub mod config;
pub mod manager;

pub use address_claimer::AddressClaimer;
pub use bus_load::BusLoadEstimator;
pub use config::NetworkConfig;
pub use manager::NetworkManager;
