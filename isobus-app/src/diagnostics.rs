//! Active and previously-active diagnostic trouble codes (DM1/DM2) and their
//! clear triggers (DM3 clears previously-active, DM11 clears active), all
//! sharing DM1's four-byte DTC wire encoding.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use isobus_core::dtc::{DiagnosticLamps, Dtc, LampFlashState};
use isobus_core::pgn::Pgn;
use isobus_core::{Address, CFHandle, Event, Message, BROADCAST_ADDRESS};
use isobus_network::NetworkManager;

const BROADCAST_INTERVAL_MS: u64 = 1000;

fn decode_dm(data: &[u8]) -> (DiagnosticLamps, LampFlashState, Vec<Dtc>) {
    let lamps = DiagnosticLamps::decode([data.first().copied().unwrap_or(0xFF), data.get(1).copied().unwrap_or(0xFF)]);
    let flash = LampFlashState::decode([data.get(2).copied().unwrap_or(0xFF), data.get(3).copied().unwrap_or(0xFF)]);
    let mut dtcs = Vec::new();
    let mut i = 4;
    while i + 4 <= data.len() {
        let chunk = [data[i], data[i + 1], data[i + 2], data[i + 3]];
        if chunk != [0xFF, 0xFF, 0xFF, 0xFF] {
            dtcs.push(Dtc::decode(chunk));
        }
        i += 4;
    }
    (lamps, flash, dtcs)
}

fn encode_dm(lamps: DiagnosticLamps, flash: LampFlashState, dtcs: &[Dtc]) -> Vec<u8> {
    let lamp_bytes = lamps.encode();
    let flash_bytes = flash.encode();
    let mut out = vec![lamp_bytes[0], lamp_bytes[1], flash_bytes[0], flash_bytes[1]];
    for dtc in dtcs {
        out.extend_from_slice(&dtc.encode());
    }
    if dtcs.is_empty() {
        out.extend_from_slice(&[0xFF; 4]);
    }
    out
}

struct Shared {
    inbound: VecDeque<(Pgn, Address, DiagnosticLamps, LampFlashState, Vec<Dtc>)>,
}

/// Broadcasts our own active DTC set (DM1) and relays DM1/DM2 received from
/// other control functions.
pub struct DiagnosticProtocol {
    nm: Rc<RefCell<NetworkManager>>,
    handle: CFHandle,
    lamps: DiagnosticLamps,
    flash: LampFlashState,
    active: Vec<Dtc>,
    previously_active: Vec<Dtc>,
    elapsed_since_broadcast_ms: u64,
    shared: Rc<RefCell<Shared>>,
    pub on_dm1_received: Event<(Address, DiagnosticLamps, LampFlashState, Vec<Dtc>)>,
    pub on_dm2_received: Event<(Address, DiagnosticLamps, LampFlashState, Vec<Dtc>)>,
}

impl DiagnosticProtocol {
    pub fn new(nm: Rc<RefCell<NetworkManager>>, handle: CFHandle) -> Self {
        Self {
            nm,
            handle,
            lamps: DiagnosticLamps::default(),
            flash: LampFlashState::default(),
            active: Vec::new(),
            previously_active: Vec::new(),
            elapsed_since_broadcast_ms: 0,
            shared: Rc::new(RefCell::new(Shared { inbound: VecDeque::new() })),
            on_dm1_received: Event::new(),
            on_dm2_received: Event::new(),
        }
    }

    pub fn initialize(&mut self) {
        let shared = self.shared.clone();
        self.nm.borrow_mut().subscribe(Pgn::DM1, move |msg: &Message| {
            let (lamps, flash, dtcs) = decode_dm(&msg.data);
            shared.borrow_mut().inbound.push_back((Pgn::DM1, msg.source, lamps, flash, dtcs));
        });

        let shared = self.shared.clone();
        self.nm.borrow_mut().subscribe(Pgn::DM2, move |msg: &Message| {
            let (lamps, flash, dtcs) = decode_dm(&msg.data);
            shared.borrow_mut().inbound.push_back((Pgn::DM2, msg.source, lamps, flash, dtcs));
        });
    }

    /// Register this control function's current active DTC set, replacing
    /// any previously reported set. DTCs dropped from `dtcs` move to the
    /// previously-active (DM2) list.
    pub fn set_active_dtcs(&mut self, lamps: DiagnosticLamps, flash: LampFlashState, dtcs: Vec<Dtc>) {
        for old in &self.active {
            if !dtcs.contains(old) {
                self.previously_active.push(*old);
            }
        }
        self.lamps = lamps;
        self.flash = flash;
        self.active = dtcs;
    }

    pub fn active_dtcs(&self) -> &[Dtc] {
        &self.active
    }

    pub fn previously_active_dtcs(&self) -> &[Dtc] {
        &self.previously_active
    }

    /// Clear previously-active DTCs (DM3 semantics), normally invoked in
    /// response to a PGN request for PGN 0xFECC.
    pub fn clear_previously_active(&mut self) {
        self.previously_active.clear();
    }

    /// Clear active DTCs (DM11 semantics), normally invoked in response to a
    /// PGN request for PGN 0xFED3.
    pub fn clear_active(&mut self) {
        self.active.clear();
    }

    /// Advance virtual time: broadcast our own DM1 once per second, and
    /// drain inbound DM1/DM2 messages into their respective events.
    pub fn update(&mut self, elapsed_ms: u64) {
        self.elapsed_since_broadcast_ms += elapsed_ms;
        if self.elapsed_since_broadcast_ms >= BROADCAST_INTERVAL_MS {
            self.elapsed_since_broadcast_ms = 0;
            let payload = encode_dm(self.lamps, self.flash, &self.active);
            self.nm.borrow_mut().send(self.handle, Pgn::DM1, BROADCAST_ADDRESS, payload);
        }

        let drained: Vec<_> = self.shared.borrow_mut().inbound.drain(..).collect();
        for (pgn, source, lamps, flash, dtcs) in drained {
            if pgn == Pgn::DM1 {
                self.on_dm1_received.emit((source, lamps, flash, dtcs));
            } else {
                self.on_dm2_received.emit((source, lamps, flash, dtcs));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isobus_core::dtc::ConversionMethod;
    use isobus_core::name::Name;
    use isobus_network::NetworkConfig;

    fn new_protocol() -> DiagnosticProtocol {
        let mut nm = NetworkManager::new(NetworkConfig::default());
        let handle = nm.create_internal(Name::default(), 0, 0x28).unwrap();
        DiagnosticProtocol::new(Rc::new(RefCell::new(nm)), handle)
    }

    #[test]
    fn empty_dtc_encodes_all_ones() {
        let payload = encode_dm(DiagnosticLamps::default(), LampFlashState::default(), &[]);
        assert_eq!(&payload[4..8], &[0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn dtc_round_trips_through_encode_decode() {
        let dtc = Dtc { spn: 1234, fmi: 7, occurrence_count: 3, conversion_method: ConversionMethod::Current };
        let payload = encode_dm(DiagnosticLamps::default(), LampFlashState::default(), &[dtc]);
        let (_, _, decoded) = decode_dm(&payload);
        assert_eq!(decoded, vec![dtc]);
    }

    #[test]
    fn flash_state_round_trips_through_encode_decode() {
        use isobus_core::dtc::LampFlash;

        let flash = LampFlashState {
            malfunction_indicator: LampFlash::SlowFlash,
            red_stop: LampFlash::Solid,
            amber_warning: LampFlash::FastFlash,
            protect: LampFlash::Solid,
        };
        let payload = encode_dm(DiagnosticLamps::default(), flash, &[]);
        let (_, decoded, _) = decode_dm(&payload);
        assert_eq!(decoded, flash);
    }

    #[test]
    fn clearing_active_moves_to_previously_active() {
        let mut diag = new_protocol();
        let dtc = Dtc { spn: 42, fmi: 1, occurrence_count: 1, conversion_method: ConversionMethod::Current };
        diag.set_active_dtcs(DiagnosticLamps::default(), LampFlashState::default(), vec![dtc]);
        assert_eq!(diag.active_dtcs(), &[dtc]);

        diag.set_active_dtcs(DiagnosticLamps::default(), LampFlashState::default(), vec![]);
        assert_eq!(diag.active_dtcs(), &[] as &[Dtc]);
        assert_eq!(diag.previously_active_dtcs(), &[dtc]);

        diag.clear_previously_active();
        assert!(diag.previously_active_dtcs().is_empty());
    }
}
