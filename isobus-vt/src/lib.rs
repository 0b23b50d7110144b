//! Virtual Terminal client and server state machines.
//!
//! Both sides exchange opaque [`object_pool::ObjectPool`] payloads and a
//! handful of control messages over the network manager's PGN dispatch;
//! neither side renders or interprets object pool contents. As with the
//! rest of this stack, `update(elapsed_ms)` is the only place state
//! transitions happen — construction and the accessor methods never touch
//! the network.

#[macro_use]
extern crate log;

pub mod client;
pub mod object_pool;
pub mod server;
pub mod wire;

pub use client::{VTClient, VTState};
pub use object_pool::{ObjectPool, ObjectType, VTObject};
pub use server::{VTServer, VTServerConfig, VTServerState};
