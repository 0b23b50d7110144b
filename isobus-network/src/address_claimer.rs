//! The ISO 11783-5 address claim state machine, one instance per internal
//! control function.
//!
//! Mirrors the observable shape of `claimer.start()` returning the frames
//! to send rather than sending them itself: this state machine never
//! touches a port. [`crate::NetworkManager`] is the only thing that does.

use isobus_core::control_function::ClaimState;
use isobus_core::name::Name;
use isobus_core::pgn::Pgn;
use isobus_core::{Address, Event, Priority, BROADCAST_ADDRESS, DYNAMIC_ADDRESS_RANGE_END, DYNAMIC_ADDRESS_RANGE_START, NULL_ADDRESS};
use isobus_j1939::Frame;

/// Duration of the contention window after broadcasting a claim, per ISO
/// 11783-5.
pub const CONTENTION_WINDOW_MS: u64 = 250;

/// Runs the address-claim protocol for one internal control function.
pub struct AddressClaimer {
    name: Name,
    arbitrary_address_capable: bool,
    preferred_address: Address,
    candidate_address: Address,
    address: Address,
    state: ClaimState,
    contention_elapsed_ms: u64,
    pub on_address_claimed: Event<Address>,
    pub on_address_lost: Event<()>,
}

impl AddressClaimer {
    pub fn new(name: Name, preferred_address: Address) -> Self {
        Self {
            name,
            arbitrary_address_capable: name.arbitrary_address_capable(),
            preferred_address,
            candidate_address: preferred_address,
            address: NULL_ADDRESS,
            state: ClaimState::NoAddress,
            contention_elapsed_ms: 0,
            on_address_claimed: Event::new(),
            on_address_lost: Event::new(),
        }
    }

    pub fn state(&self) -> ClaimState {
        self.state
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn name(&self) -> Name {
        self.name
    }

    fn claim_frame(&self, source: Address) -> Frame {
        let data = self.name.to_bytes();
        Frame::from_message(Priority::new(6), Pgn::ADDRESS_CLAIMED, source, BROADCAST_ADDRESS, &data)
    }

    /// Broadcast a request for every control function to announce its
    /// claim, then broadcast our own claim and start the contention timer.
    pub fn start(&mut self) -> Vec<Frame> {
        self.contention_elapsed_ms = 0;
        self.candidate_address = self.preferred_address;
        self.state = ClaimState::WaitingForContention;

        let request_payload = [
            (Pgn::ADDRESS_CLAIMED.value() & 0xFF) as u8,
            ((Pgn::ADDRESS_CLAIMED.value() >> 8) & 0xFF) as u8,
            ((Pgn::ADDRESS_CLAIMED.value() >> 16) & 0xFF) as u8,
        ];
        let request = Frame::from_message(
            Priority::new(6),
            Pgn::REQUEST,
            NULL_ADDRESS,
            BROADCAST_ADDRESS,
            &request_payload,
        );
        let claim = self.claim_frame(self.candidate_address);
        vec![request, claim]
    }

    fn next_candidate_address(&self, occupied: &dyn Fn(Address) -> bool) -> Option<Address> {
        (DYNAMIC_ADDRESS_RANGE_START..=DYNAMIC_ADDRESS_RANGE_END).find(|&addr| !occupied(addr))
    }

    fn cannot_claim_frame(&self) -> Frame {
        let data = self.name.to_bytes();
        Frame::from_message(Priority::new(6), Pgn::ADDRESS_CLAIMED, NULL_ADDRESS, BROADCAST_ADDRESS, &data)
    }

    /// Process an inbound Address Claimed frame. `occupied` reports whether
    /// a given address is already known to be claimed on this port, used
    /// when picking the next dynamic candidate after losing contention.
    pub fn handle_frame(&mut self, frame: &Frame, occupied: impl Fn(Address) -> bool) -> Vec<Frame> {
        if frame.pgn() != Pgn::ADDRESS_CLAIMED {
            return Vec::new();
        }
        let their_address = frame.source();
        let their_name = Name::from_bytes(frame.pdu().try_into().unwrap_or([0xFF; 8]));

        match self.state {
            ClaimState::WaitingForContention | ClaimState::Claimed => {
                if their_address != self.candidate_address {
                    return Vec::new();
                }
                if their_name < self.name {
                    // We lose.
                    if matches!(self.state, ClaimState::Claimed) {
                        self.on_address_lost.emit(());
                    }
                    if self.arbitrary_address_capable {
                        if let Some(next) = self.next_candidate_address(&occupied) {
                            self.candidate_address = next;
                            self.contention_elapsed_ms = 0;
                            self.state = ClaimState::WaitingForContention;
                            return vec![self.claim_frame(next)];
                        }
                    }
                    self.state = ClaimState::CannotClaim;
                    self.address = NULL_ADDRESS;
                    return vec![self.cannot_claim_frame()];
                } else if their_name > self.name {
                    // We win; defend by re-asserting our claim.
                    return vec![self.claim_frame(self.candidate_address)];
                }
                Vec::new()
            }
            ClaimState::NoAddress | ClaimState::CannotClaim => Vec::new(),
        }
    }

    /// Advance virtual time. Transitions out of `WaitingForContention` once
    /// the 250 ms window passes with nobody outbidding us.
    pub fn update(&mut self, elapsed_ms: u64) -> Vec<Frame> {
        if self.state != ClaimState::WaitingForContention {
            return Vec::new();
        }
        self.contention_elapsed_ms += elapsed_ms;
        if self.contention_elapsed_ms >= CONTENTION_WINDOW_MS {
            self.state = ClaimState::Claimed;
            self.address = self.candidate_address;
            self.on_address_claimed.emit(self.address);
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim_frame_from(name: Name, address: Address) -> Frame {
        let data = name.to_bytes();
        Frame::from_message(Priority::new(6), Pgn::ADDRESS_CLAIMED, address, BROADCAST_ADDRESS, &data)
    }

    #[test]
    fn claims_after_contention_window_with_no_contenders() {
        let mut claimer = AddressClaimer::new(Name::default().set_identity_number(1), 0x28);
        assert_eq!(claimer.state(), ClaimState::NoAddress);
        claimer.start();
        assert_eq!(claimer.state(), ClaimState::WaitingForContention);
        claimer.update(249);
        assert_eq!(claimer.state(), ClaimState::WaitingForContention);
        claimer.update(1);
        assert_eq!(claimer.state(), ClaimState::Claimed);
        assert_eq!(claimer.address(), 0x28);
    }

    #[test]
    fn loses_to_lower_name_and_moves_to_dynamic_address() {
        let mut claimer =
            AddressClaimer::new(Name::default().set_identity_number(100).set_arbitrary_address_capable(true), 0x28);
        claimer.start();

        let contender_name = Name::default().set_identity_number(1);
        let frames = claimer.handle_frame(&claim_frame_from(contender_name, 0x28), |_| false);
        assert_eq!(claimer.state(), ClaimState::WaitingForContention);
        assert_eq!(frames.len(), 1);
        assert!(claimer.address() == NULL_ADDRESS || claimer.address() != 0x28);
    }

    #[test]
    fn static_address_cannot_claim_on_loss() {
        let mut claimer = AddressClaimer::new(Name::default().set_identity_number(100), 0x28);
        claimer.start();

        let contender_name = Name::default().set_identity_number(1);
        claimer.handle_frame(&claim_frame_from(contender_name, 0x28), |_| false);
        assert_eq!(claimer.state(), ClaimState::CannotClaim);
    }

    #[test]
    fn defends_against_higher_name_contender() {
        let mut claimer = AddressClaimer::new(Name::default().set_identity_number(1), 0x28);
        claimer.start();
        claimer.update(250);
        assert_eq!(claimer.state(), ClaimState::Claimed);

        let contender_name = Name::default().set_identity_number(999);
        let frames = claimer.handle_frame(&claim_frame_from(contender_name, 0x28), |_| false);
        assert_eq!(claimer.state(), ClaimState::Claimed);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn loses_claimed_address_to_lower_name() {
        let mut claimer = AddressClaimer::new(Name::default().set_identity_number(100), 0x28);
        claimer.start();
        claimer.update(250);
        assert_eq!(claimer.state(), ClaimState::Claimed);

        let lost = std::rc::Rc::new(std::cell::RefCell::new(false));
        let l = lost.clone();
        claimer.on_address_lost.subscribe(move |_: &()| *l.borrow_mut() = true);

        let contender_name = Name::default().set_identity_number(1);
        claimer.handle_frame(&claim_frame_from(contender_name, 0x28), |_| false);
        assert!(*lost.borrow());
    }
}
