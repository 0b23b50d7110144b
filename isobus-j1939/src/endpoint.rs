//! The pluggable boundary between this stack and a CAN link.
//!
//! An [`Endpoint`] is the synchronous equivalent of `glonax-j1939`'s
//! `J1939Listener`: something that can send a frame and that the network
//! manager polls for inbound frames on every `update`. There is no async
//! here — per the stack's single-threaded cooperative model, all I/O is
//! either genuinely non-blocking (a loopback queue) or fed by a
//! driver-owned thread into a thread-safe inbound queue that `update`
//! drains.

use crate::frame::Frame;
use isobus_core::error::EndpointError;

/// Something that can send and receive J1939 frames on one CAN port.
pub trait Endpoint {
    /// Send a single frame. Must not block.
    fn send(&mut self, frame: &Frame) -> Result<(), EndpointError>;

    /// Drain and return every frame received since the last call. Must not
    /// block; return an empty `Vec` if nothing is pending.
    fn poll(&mut self) -> Vec<Frame>;
}

/// An in-memory endpoint useful for tests, demos and loopback wiring
/// between two network managers in the same process.
///
/// Frames sent via [`LoopbackEndpoint::send`] are queued locally and also
/// mirrored into `loopback`, if set — the same "optional loopback of sent
/// frames" knob `glonax-j1939`'s real socket wrapper exposes via
/// `set_broadcast`.
#[derive(Debug, Default)]
pub struct LoopbackEndpoint {
    inbound: Vec<Frame>,
    sent: Vec<Frame>,
    loopback: bool,
}

impl LoopbackEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// When enabled, every frame sent is also delivered back to this same
    /// endpoint's inbound queue, as if received from the bus.
    pub fn set_loopback(&mut self, enabled: bool) {
        self.loopback = enabled;
    }

    /// Inject a frame as if it had arrived from the bus. Used by tests to
    /// simulate a remote control function.
    pub fn inject(&mut self, frame: Frame) {
        self.inbound.push(frame);
    }

    /// Every frame sent through this endpoint so far, for test assertions.
    pub fn sent_frames(&self) -> &[Frame] {
        &self.sent
    }
}

impl Endpoint for LoopbackEndpoint {
    fn send(&mut self, frame: &Frame) -> Result<(), EndpointError> {
        self.sent.push(*frame);
        if self.loopback {
            self.inbound.push(*frame);
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isobus_core::pgn::Pgn;
    use isobus_core::{Priority, BROADCAST_ADDRESS};

    fn sample_frame() -> Frame {
        Frame::from_message(Priority::default(), Pgn::DM1, 0x28, BROADCAST_ADDRESS, &[0u8; 8])
    }

    #[test]
    fn sent_frames_are_recorded() {
        let mut ep = LoopbackEndpoint::new();
        ep.send(&sample_frame()).unwrap();
        assert_eq!(ep.sent_frames().len(), 1);
        assert!(ep.poll().is_empty());
    }

    #[test]
    fn loopback_mirrors_sent_frames_inbound() {
        let mut ep = LoopbackEndpoint::new();
        ep.set_loopback(true);
        ep.send(&sample_frame()).unwrap();
        assert_eq!(ep.poll().len(), 1);
    }

    #[test]
    fn inject_feeds_poll() {
        let mut ep = LoopbackEndpoint::new();
        ep.inject(sample_frame());
        let frames = ep.poll();
        assert_eq!(frames.len(), 1);
        assert!(ep.poll().is_empty());
    }
}
