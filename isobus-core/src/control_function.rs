//! Control function bookkeeping: the claim state machine's states, the
//! predicate language partners use to describe who they're looking for, and
//! the arena handle application code holds instead of a direct reference.

use crate::name::Name;
use crate::Address;

/// Stable, `Copy` index into a [`NetworkManager`](../../isobus_network/struct.NetworkManager.html)'s
/// control function table.
///
/// Application protocols hold a `CFHandle` rather than a reference to a
/// `ControlFunction`, which is how this stack avoids a reference cycle
/// between the manager that owns every control function and the control
/// functions that need to reach back into the manager to send a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CFHandle {
    index: u32,
    generation: u32,
}

impl CFHandle {
    /// Construct a handle. Only the owning arena (in `isobus-network`)
    /// should call this; application code treats `CFHandle` as opaque.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// The state of an internal control function's address claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    /// No claim attempt has been made, or a prior claim was lost and not yet
    /// retried.
    NoAddress,
    /// A claim has been broadcast and we are waiting out the 250 ms
    /// contention window.
    WaitingForContention,
    /// The address is ours; we defend it against lower-priority contenders.
    Claimed,
    /// A statically-addressed (non arbitrary-address-capable) control
    /// function lost contention and has no fallback address to try.
    CannotClaim,
}

impl Default for ClaimState {
    fn default() -> Self {
        Self::NoAddress
    }
}

/// A predicate over NAME fields, used by a partner control function
/// description to recognize a matching remote control function once it
/// claims an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFilter {
    ManufacturerCode(u16),
    FunctionCode(u8),
    DeviceClass(u8),
    IndustryGroup(u8),
    IdentityNumber(u32),
}

impl NameFilter {
    pub fn matches(self, name: Name) -> bool {
        match self {
            Self::ManufacturerCode(code) => name.manufacturer_code() == code,
            Self::FunctionCode(code) => name.function_code() == code,
            Self::DeviceClass(class) => name.device_class() == class,
            Self::IndustryGroup(group) => name.industry_group() == group,
            Self::IdentityNumber(id) => name.identity_number() == id,
        }
    }
}

/// A control function known to the network: one we own (`Internal`), one we
/// are looking for by NAME predicate (`Partner`), or one we merely observed
/// claiming an address (`External`).
#[derive(Debug, Clone)]
pub enum ControlFunction {
    Internal(InternalControlFunction),
    Partner(PartnerControlFunction),
    External(ExternalControlFunction),
}

impl ControlFunction {
    pub fn address(&self) -> Address {
        match self {
            Self::Internal(cf) => cf.address,
            Self::Partner(cf) => cf.address.unwrap_or(crate::NULL_ADDRESS),
            Self::External(cf) => cf.address,
        }
    }

    pub fn name(&self) -> Name {
        match self {
            Self::Internal(cf) => cf.name,
            Self::Partner(cf) => cf.name,
            Self::External(cf) => cf.name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InternalControlFunction {
    pub name: Name,
    pub preferred_address: Address,
    pub address: Address,
    pub port: u8,
    pub claim_state: ClaimState,
}

impl InternalControlFunction {
    pub fn new(name: Name, port: u8, preferred_address: Address) -> Self {
        Self {
            name,
            preferred_address,
            address: crate::NULL_ADDRESS,
            port,
            claim_state: ClaimState::NoAddress,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartnerControlFunction {
    pub name: Name,
    pub filters: Vec<NameFilter>,
    pub address: Option<Address>,
    pub port: u8,
}

impl PartnerControlFunction {
    pub fn new(filters: Vec<NameFilter>, port: u8) -> Self {
        Self {
            name: Name::default(),
            filters,
            address: None,
            port,
        }
    }

    pub fn matches(&self, name: Name) -> bool {
        self.filters.iter().all(|f| f.matches(name))
    }
}

#[derive(Debug, Clone)]
pub struct ExternalControlFunction {
    pub name: Name,
    pub address: Address,
    pub port: u8,
    pub last_seen_ms: u64,
}
