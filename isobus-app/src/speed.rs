//! Wheel-based and ground-based speed and distance (PGN 0xFE48 / 0xFE49).

use std::cell::RefCell;
use std::rc::Rc;

use isobus_core::pgn::Pgn;
use isobus_core::{CFHandle, Message};
use isobus_network::NetworkManager;

const SPEED_RESOLUTION_MPS: f64 = 0.001;
const DISTANCE_RESOLUTION_M: f64 = 0.125;
const SPEED_NOT_AVAILABLE: u16 = 0xFFFF;
const DISTANCE_NOT_AVAILABLE: u32 = 0xFFFF_FFFF;

/// The latest speed and distance reading this interface has decoded, merged
/// across whichever of wheel/ground speed last reported a value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedData {
    pub wheel_speed_mps: Option<f64>,
    pub ground_speed_mps: Option<f64>,
    pub distance_m: Option<f64>,
}

fn decode_speed(raw: u16) -> Option<f64> {
    (raw != SPEED_NOT_AVAILABLE).then(|| raw as f64 * SPEED_RESOLUTION_MPS)
}

fn encode_speed(value: Option<f64>) -> u16 {
    match value {
        Some(v) => (v / SPEED_RESOLUTION_MPS).round() as u16,
        None => SPEED_NOT_AVAILABLE,
    }
}

fn decode_distance(raw: u32) -> Option<f64> {
    (raw != DISTANCE_NOT_AVAILABLE).then(|| raw as f64 * DISTANCE_RESOLUTION_M)
}

fn encode_distance(value: Option<f64>) -> u32 {
    match value {
        Some(v) => (v / DISTANCE_RESOLUTION_M).round() as u32,
        None => DISTANCE_NOT_AVAILABLE,
    }
}

fn encode_message(speed: Option<f64>, distance: Option<f64>) -> Vec<u8> {
    let mut data = vec![0xFFu8; 8];
    data[0..2].copy_from_slice(&encode_speed(speed).to_le_bytes());
    data[2..6].copy_from_slice(&encode_distance(distance).to_le_bytes());
    data
}

/// Tracks the most recently received wheel and ground speed/distance, and
/// lets us broadcast our own readings.
pub struct SpeedDistanceInterface {
    nm: Rc<RefCell<NetworkManager>>,
    handle: CFHandle,
    latest: Rc<RefCell<SpeedData>>,
}

impl SpeedDistanceInterface {
    pub fn new(nm: Rc<RefCell<NetworkManager>>, handle: CFHandle) -> Self {
        Self {
            nm,
            handle,
            latest: Rc::new(RefCell::new(SpeedData::default())),
        }
    }

    pub fn initialize(&mut self) {
        let latest = self.latest.clone();
        self.nm.borrow_mut().subscribe(Pgn::WHEEL_SPEED, move |msg: &Message| {
            let raw_speed = u16::from_le_bytes([msg.get_u8(0), msg.get_u8(1)]);
            let raw_distance = u32::from_le_bytes([msg.get_u8(2), msg.get_u8(3), msg.get_u8(4), msg.get_u8(5)]);
            let mut latest = latest.borrow_mut();
            latest.wheel_speed_mps = decode_speed(raw_speed);
            if let Some(d) = decode_distance(raw_distance) {
                latest.distance_m = Some(d);
            }
        });

        let latest = self.latest.clone();
        self.nm.borrow_mut().subscribe(Pgn::GROUND_SPEED, move |msg: &Message| {
            let raw_speed = u16::from_le_bytes([msg.get_u8(0), msg.get_u8(1)]);
            let raw_distance = u32::from_le_bytes([msg.get_u8(2), msg.get_u8(3), msg.get_u8(4), msg.get_u8(5)]);
            let mut latest = latest.borrow_mut();
            latest.ground_speed_mps = decode_speed(raw_speed);
            if let Some(d) = decode_distance(raw_distance) {
                latest.distance_m = Some(d);
            }
        });
    }

    /// The most recently decoded reading, or `None` before any message has
    /// been received.
    pub fn latest(&self) -> Option<SpeedData> {
        let latest = *self.latest.borrow();
        (latest != SpeedData::default()).then_some(latest)
    }

    pub fn send_wheel_speed(&mut self, speed_mps: Option<f64>, distance_m: Option<f64>) {
        let payload = encode_message(speed_mps, distance_m);
        self.nm.borrow_mut().send(self.handle, Pgn::WHEEL_SPEED, isobus_core::BROADCAST_ADDRESS, payload);
    }

    pub fn send_ground_speed(&mut self, speed_mps: Option<f64>, distance_m: Option<f64>) {
        let payload = encode_message(speed_mps, distance_m);
        self.nm.borrow_mut().send(self.handle, Pgn::GROUND_SPEED, isobus_core::BROADCAST_ADDRESS, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isobus_core::name::Name;
    use isobus_network::NetworkConfig;

    fn new_interface() -> SpeedDistanceInterface {
        let mut nm = NetworkManager::new(NetworkConfig::default());
        let handle = nm.create_internal(Name::default(), 0, 0x28).unwrap();
        SpeedDistanceInterface::new(Rc::new(RefCell::new(nm)), handle)
    }

    #[test]
    fn initial_state_has_no_data() {
        let sdi = new_interface();
        assert!(sdi.latest().is_none());
    }

    #[test]
    fn wheel_speed_raw_decodes_to_5_mps() {
        assert_eq!(decode_speed(5000), Some(5.0));
    }

    #[test]
    fn sentinel_decodes_to_absent() {
        assert_eq!(decode_speed(SPEED_NOT_AVAILABLE), None);
        assert_eq!(decode_distance(DISTANCE_NOT_AVAILABLE), None);
    }

    #[test]
    fn speed_round_trips_through_encode_decode() {
        let raw = encode_speed(Some(5.0));
        assert_eq!(raw, 5000);
        assert_eq!(decode_speed(raw), Some(5.0));
    }
}
