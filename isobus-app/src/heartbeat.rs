//! Heartbeat (PGN 0xFFFE): a rolling sequence counter we broadcast at a
//! fixed interval, plus miss detection for peers we've been asked to track.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use isobus_core::pgn::Pgn;
use isobus_core::{Address, Event, Message};
use isobus_network::NetworkManager;

/// Default broadcast interval and the knob [`HeartbeatProtocol::new`] reads
/// its starting value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_ms: 100 }
    }
}

impl HeartbeatConfig {
    pub fn interval(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }
}

#[derive(Debug, Default)]
struct TrackedPeer {
    last_seq: Option<u8>,
    ms_since_seen: u64,
    miss_count: u32,
}

struct Shared {
    tracked: HashMap<Address, TrackedPeer>,
}

/// Broadcasts our own heartbeat at `interval_ms` when enabled, and raises
/// [`HeartbeatProtocol::on_heartbeat_missed`] for any tracked peer that goes
/// silent for 3x its expected interval.
pub struct HeartbeatProtocol {
    nm: Rc<RefCell<NetworkManager>>,
    handle: isobus_core::CFHandle,
    config: HeartbeatConfig,
    enabled: bool,
    seq: u8,
    elapsed_since_send_ms: u64,
    shared: Rc<RefCell<Shared>>,
    pub on_heartbeat_missed: Event<(Address, u32)>,
}

impl HeartbeatProtocol {
    pub fn new(nm: Rc<RefCell<NetworkManager>>, handle: isobus_core::CFHandle, config: HeartbeatConfig) -> Self {
        Self {
            nm,
            handle,
            config,
            enabled: false,
            seq: 0,
            elapsed_since_send_ms: 0,
            shared: Rc::new(RefCell::new(Shared { tracked: HashMap::new() })),
            on_heartbeat_missed: Event::new(),
        }
    }

    /// Subscribe to inbound heartbeats so [`HeartbeatProtocol::update`] can
    /// detect misses from tracked peers.
    pub fn initialize(&mut self) {
        let shared = self.shared.clone();
        self.nm.borrow_mut().subscribe(Pgn::HEARTBEAT, move |msg: &Message| {
            let mut shared = shared.borrow_mut();
            if let Some(peer) = shared.tracked.get_mut(&msg.source) {
                peer.last_seq = Some(msg.get_u8(0));
                peer.ms_since_seen = 0;
                peer.miss_count = 0;
            }
        });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.elapsed_since_send_ms = 0;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn interval(&self) -> u64 {
        self.config.interval_ms
    }

    pub fn set_interval(&mut self, ms: u64) {
        self.config.interval_ms = ms;
    }

    /// Start watching `addr` for missed heartbeats.
    pub fn track(&mut self, addr: Address) {
        self.shared.borrow_mut().tracked.insert(addr, TrackedPeer::default());
    }

    /// Stop watching `addr`.
    pub fn untrack(&mut self, addr: Address) {
        self.shared.borrow_mut().tracked.remove(&addr);
    }

    /// Advance virtual time: send our own heartbeat if due, and raise a miss
    /// for every tracked peer silent for 3x the configured interval.
    pub fn update(&mut self, elapsed_ms: u64) {
        if self.enabled {
            self.elapsed_since_send_ms += elapsed_ms;
            if self.elapsed_since_send_ms >= self.config.interval_ms {
                self.elapsed_since_send_ms = 0;
                let seq = self.seq;
                self.seq = self.seq.wrapping_add(1);
                self.nm.borrow_mut().send(self.handle, Pgn::HEARTBEAT, isobus_core::BROADCAST_ADDRESS, vec![seq]);
            }
        }

        // The first miss needs the full 3x interval of silence; once a peer
        // has missed at least once, every further interval of continued
        // silence counts as another miss rather than resetting back to the
        // 3x threshold.
        let miss_threshold = self.config.interval_ms.saturating_mul(3);
        let interval = self.config.interval_ms;
        let mut misses = Vec::new();
        {
            let mut shared = self.shared.borrow_mut();
            for (&addr, peer) in shared.tracked.iter_mut() {
                peer.ms_since_seen += elapsed_ms;
                let threshold = if peer.miss_count == 0 { miss_threshold } else { interval };
                if peer.ms_since_seen >= threshold {
                    peer.miss_count += 1;
                    peer.ms_since_seen = 0;
                    misses.push((addr, peer.miss_count));
                }
            }
        }
        for miss in misses {
            self.on_heartbeat_missed.emit(miss);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isobus_core::name::Name;
    use isobus_network::NetworkConfig;

    fn new_protocol() -> HeartbeatProtocol {
        let mut nm = NetworkManager::new(NetworkConfig::default());
        let handle = nm.create_internal(Name::default(), 0, 0x28).unwrap();
        HeartbeatProtocol::new(Rc::new(RefCell::new(nm)), handle, HeartbeatConfig::default().interval(100))
    }

    #[test]
    fn initially_disabled() {
        let hb = new_protocol();
        assert!(!hb.is_enabled());
    }

    #[test]
    fn enable_disable_round_trip() {
        let mut hb = new_protocol();
        hb.enable();
        assert!(hb.is_enabled());
        hb.disable();
        assert!(!hb.is_enabled());
    }

    #[test]
    fn interval_accessor() {
        let mut hb = new_protocol();
        assert_eq!(hb.interval(), 100);
        hb.set_interval(200);
        assert_eq!(hb.interval(), 200);
    }

    #[test]
    fn missed_heartbeat_detection() {
        let mut hb = new_protocol();
        hb.track(0x30);

        let missed = Rc::new(RefCell::new(None));
        let m = missed.clone();
        hb.on_heartbeat_missed.subscribe(move |&(addr, count)| *m.borrow_mut() = Some((addr, count)));

        hb.update(301);
        assert_eq!(*missed.borrow(), Some((0x30, 1)));

        hb.update(100);
        assert_eq!(*missed.borrow(), Some((0x30, 2)));
    }
}
