//! Machine guidance (PGN 0xAC00) and guidance system command (PGN 0xAD00).

use std::cell::RefCell;
use std::rc::Rc;

use isobus_core::pgn::Pgn;
use isobus_core::{CFHandle, Message, BROADCAST_ADDRESS};
use isobus_network::NetworkManager;

const CURVATURE_RESOLUTION_PER_M: f64 = 0.25;
const CURVATURE_OFFSET: f64 = 8031.25;
const CURVATURE_NOT_AVAILABLE: u16 = 0xFFFF;

fn decode_curvature(raw: u16) -> Option<f64> {
    (raw != CURVATURE_NOT_AVAILABLE).then(|| raw as f64 * CURVATURE_RESOLUTION_PER_M - CURVATURE_OFFSET)
}

fn encode_curvature(value: Option<f64>) -> u16 {
    match value {
        Some(v) => ((v + CURVATURE_OFFSET) / CURVATURE_RESOLUTION_PER_M).round() as u16,
        None => CURVATURE_NOT_AVAILABLE,
    }
}

/// A decoded guidance command: curvature in 1/m, heading in radians and
/// cross-track error in meters, each absent when the sender has nothing to
/// report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GuidanceData {
    pub curvature: Option<f64>,
    pub heading_rad: Option<f64>,
    pub cross_track_m: Option<f64>,
}

fn encode(data: GuidanceData) -> Vec<u8> {
    let mut out = vec![0xFFu8; 8];
    out[0..2].copy_from_slice(&encode_curvature(data.curvature).to_le_bytes());
    out
}

fn decode(data: &[u8]) -> GuidanceData {
    let raw = u16::from_le_bytes([data.first().copied().unwrap_or(0xFF), data.get(1).copied().unwrap_or(0xFF)]);
    GuidanceData {
        curvature: decode_curvature(raw),
        heading_rad: None,
        cross_track_m: None,
    }
}

/// Tracks the latest machine guidance and guidance system commands observed
/// on the bus, and lets us issue our own.
pub struct GuidanceInterface {
    nm: Rc<RefCell<NetworkManager>>,
    handle: CFHandle,
    latest_machine: Rc<RefCell<Option<GuidanceData>>>,
    latest_system: Rc<RefCell<Option<GuidanceData>>>,
}

impl GuidanceInterface {
    pub fn new(nm: Rc<RefCell<NetworkManager>>, handle: CFHandle) -> Self {
        Self {
            nm,
            handle,
            latest_machine: Rc::new(RefCell::new(None)),
            latest_system: Rc::new(RefCell::new(None)),
        }
    }

    pub fn initialize(&mut self) {
        let latest = self.latest_machine.clone();
        self.nm.borrow_mut().subscribe(Pgn::GUIDANCE_MACHINE, move |msg: &Message| {
            *latest.borrow_mut() = Some(decode(&msg.data));
        });

        let latest = self.latest_system.clone();
        self.nm.borrow_mut().subscribe(Pgn::GUIDANCE_SYSTEM, move |msg: &Message| {
            *latest.borrow_mut() = Some(decode(&msg.data));
        });
    }

    pub fn latest_machine(&self) -> Option<GuidanceData> {
        *self.latest_machine.borrow()
    }

    pub fn latest_system(&self) -> Option<GuidanceData> {
        *self.latest_system.borrow()
    }

    pub fn send_machine_command(&mut self, data: GuidanceData) {
        self.nm.borrow_mut().send(self.handle, Pgn::GUIDANCE_MACHINE, BROADCAST_ADDRESS, encode(data));
    }

    pub fn send_system_command(&mut self, data: GuidanceData) {
        self.nm.borrow_mut().send(self.handle, Pgn::GUIDANCE_SYSTEM, BROADCAST_ADDRESS, encode(data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isobus_core::name::Name;
    use isobus_network::NetworkConfig;

    fn new_interface() -> GuidanceInterface {
        let mut nm = NetworkManager::new(NetworkConfig::default());
        let handle = nm.create_internal(Name::default(), 0, 0x28).unwrap();
        GuidanceInterface::new(Rc::new(RefCell::new(nm)), handle)
    }

    #[test]
    fn guidance_data_defaults_to_absent() {
        let gd = GuidanceData::default();
        assert!(gd.curvature.is_none());
        assert!(gd.heading_rad.is_none());
        assert!(gd.cross_track_m.is_none());
    }

    #[test]
    fn no_commands_observed_initially() {
        let gi = new_interface();
        assert!(gi.latest_machine().is_none());
        assert!(gi.latest_system().is_none());
    }

    #[test]
    fn curvature_round_trips_through_encode_decode() {
        let raw = encode_curvature(Some(10.0));
        assert!((decode_curvature(raw).unwrap() - 10.0).abs() < 0.25);
    }

    #[test]
    fn absent_curvature_round_trips() {
        assert_eq!(encode_curvature(None), CURVATURE_NOT_AVAILABLE);
        assert_eq!(decode_curvature(CURVATURE_NOT_AVAILABLE), None);
    }
}
