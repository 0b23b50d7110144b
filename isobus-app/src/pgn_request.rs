//! PGN request/acknowledge (ISO 11783-3 / J1939-21): responders register per
//! PGN; an inbound request either gets the registered responder's payload or
//! an Acknowledge: NACK.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use isobus_core::pgn::Pgn;
use isobus_core::{Address, CFHandle, Event, Message};
use isobus_network::NetworkManager;

/// Acknowledgement control byte values (ISO 11783-3 Table), embedded as the
/// first byte of an Acknowledgement (PGN 0xE800) payload.
const ACK_NACK: u8 = 1;

struct Shared {
    pending: VecDeque<(Pgn, Address)>,
}

/// Responds to PGN requests from a table of per-PGN closures; every
/// responder call is made from [`PGNRequestProtocol::update`], never from
/// inside the network manager's own PGN dispatch, so a responder is free to
/// send through the same manager that delivered the request.
pub struct PGNRequestProtocol {
    nm: Rc<RefCell<NetworkManager>>,
    handle: CFHandle,
    responders: HashMap<Pgn, Box<dyn FnMut() -> Option<Vec<u8>>>>,
    shared: Rc<RefCell<Shared>>,
    pub on_request_received: Event<(Pgn, Address)>,
}

impl PGNRequestProtocol {
    pub fn new(nm: Rc<RefCell<NetworkManager>>, handle: CFHandle) -> Self {
        Self {
            nm,
            handle,
            responders: HashMap::new(),
            shared: Rc::new(RefCell::new(Shared { pending: VecDeque::new() })),
            on_request_received: Event::new(),
        }
    }

    pub fn initialize(&mut self) {
        let shared = self.shared.clone();
        self.nm.borrow_mut().subscribe(Pgn::REQUEST, move |msg: &Message| {
            let requested = Pgn::new(
                msg.get_u8(0) as u32 | ((msg.get_u8(1) as u32) << 8) | ((msg.get_u8(2) as u32) << 16),
            );
            shared.borrow_mut().pending.push_back((requested, msg.source));
        });
    }

    /// Register a responder for `pgn`. Called from [`PGNRequestProtocol::update`]
    /// when a matching request arrives; its return value becomes the
    /// response payload, or an Acknowledge: NACK is sent if it returns
    /// `None`.
    pub fn register_responder(&mut self, pgn: Pgn, responder: impl FnMut() -> Option<Vec<u8>> + 'static) {
        self.responders.insert(pgn, Box::new(responder));
    }

    fn nack(&mut self, pgn: Pgn, destination: Address) {
        let payload = vec![
            ACK_NACK,
            0xFF,
            0xFF,
            0xFF,
            0xFF,
            (pgn.value() & 0xFF) as u8,
            ((pgn.value() >> 8) & 0xFF) as u8,
            ((pgn.value() >> 16) & 0xFF) as u8,
        ];
        self.nm.borrow_mut().send(self.handle, Pgn::ACKNOWLEDGMENT, destination, payload);
    }

    /// Drain pending requests: call the matching responder (if any), send
    /// its payload or a NACK, and raise [`PGNRequestProtocol::on_request_received`].
    pub fn update(&mut self, _elapsed_ms: u64) {
        let drained: Vec<_> = self.shared.borrow_mut().pending.drain(..).collect();
        for (pgn, requester) in drained {
            self.on_request_received.emit((pgn, requester));

            let response = self.responders.get_mut(&pgn).and_then(|responder| responder());
            match response {
                Some(payload) => {
                    self.nm.borrow_mut().send(self.handle, pgn, requester, payload);
                }
                None => self.nack(pgn, requester),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isobus_core::name::Name;
    use isobus_network::NetworkConfig;

    fn new_protocol() -> PGNRequestProtocol {
        let mut nm = NetworkManager::new(NetworkConfig::default());
        let handle = nm.create_internal(Name::default(), 0, 0x28).unwrap();
        PGNRequestProtocol::new(Rc::new(RefCell::new(nm)), handle)
    }

    #[test]
    fn register_responder_does_not_fire_without_a_request() {
        let mut pgnr = new_protocol();
        let called = Rc::new(RefCell::new(false));
        let c = called.clone();
        pgnr.register_responder(Pgn::DM1, move || {
            *c.borrow_mut() = true;
            Some(vec![0xFF; 8])
        });
        assert!(!*called.borrow());
    }

    #[test]
    fn request_event_does_not_fire_without_a_request() {
        let mut pgnr = new_protocol();
        let received = Rc::new(RefCell::new(false));
        let r = received.clone();
        pgnr.on_request_received.subscribe(move |_: &(Pgn, Address)| *r.borrow_mut() = true);
        pgnr.update(0);
        assert!(!*received.borrow());
    }

    #[test]
    fn pending_request_invokes_responder_and_emits_event() {
        let mut pgnr = new_protocol();
        pgnr.initialize();

        let received = Rc::new(RefCell::new(false));
        let r = received.clone();
        pgnr.on_request_received.subscribe(move |_: &(Pgn, Address)| *r.borrow_mut() = true);
        pgnr.register_responder(Pgn::DM1, || Some(vec![0xFF; 8]));

        pgnr.shared.borrow_mut().pending.push_back((Pgn::DM1, 0x30));
        pgnr.update(0);

        assert!(*received.borrow());
    }
}
