//! The Virtual Terminal client connection state machine.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use isobus_core::error::PrecondError;
use isobus_core::pgn::Pgn;
use isobus_core::{Address, CFHandle, Message};
use isobus_network::NetworkManager;

use crate::object_pool::ObjectPool;
use crate::wire;

/// Milliseconds of inactivity, in any non-terminal state, before the
/// connection gives up and returns to `Disconnected`.
const INACTIVITY_TIMEOUT_MS: u64 = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VTState {
    Disconnected,
    WaitForVTStatus,
    WaitForGetMemoryResponse,
    UploadingObjectPool,
    WaitForEndOfObjectPool,
    Connected,
    Failed,
}

impl VTState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::WaitForVTStatus => "WaitForVTStatus",
            Self::WaitForGetMemoryResponse => "WaitForGetMemoryResponse",
            Self::UploadingObjectPool => "UploadingObjectPool",
            Self::WaitForEndOfObjectPool => "WaitForEndOfObjectPool",
            Self::Connected => "Connected",
            Self::Failed => "Failed",
        }
    }
}

struct Shared {
    inbound: VecDeque<Message>,
}

/// Connects to a VT, uploads an object pool and issues commands once
/// connected. Commands are rejected with [`PrecondError::WrongState`]
/// outside `Connected`.
pub struct VTClient {
    nm: Rc<RefCell<NetworkManager>>,
    handle: CFHandle,
    object_pool: Option<ObjectPool>,
    state: VTState,
    vt_address: Option<Address>,
    elapsed_since_activity_ms: u64,
    shared: Rc<RefCell<Shared>>,
}

impl VTClient {
    pub fn new(nm: Rc<RefCell<NetworkManager>>, handle: CFHandle) -> Self {
        Self {
            nm,
            handle,
            object_pool: None,
            state: VTState::Disconnected,
            vt_address: None,
            elapsed_since_activity_ms: 0,
            shared: Rc::new(RefCell::new(Shared { inbound: VecDeque::new() })),
        }
    }

    pub fn initialize(&mut self) {
        let shared = self.shared.clone();
        self.nm.borrow_mut().subscribe(Pgn::ECU_TO_VT, move |msg: &Message| {
            shared.borrow_mut().inbound.push_back(msg.clone());
        });
    }

    pub fn state(&self) -> VTState {
        self.state
    }

    pub fn set_object_pool(&mut self, pool: ObjectPool) {
        self.object_pool = Some(pool);
    }

    /// Begin connecting: requires an object pool to already be set. Moves to
    /// `WaitForVTStatus`; the handshake itself advances from
    /// [`VTClient::update`] as VT-to-ECU messages arrive.
    pub fn connect(&mut self) -> Result<(), PrecondError> {
        if self.object_pool.is_none() {
            return Err(PrecondError::MissingPrerequisite("object pool"));
        }
        self.state = VTState::WaitForVTStatus;
        self.elapsed_since_activity_ms = 0;
        Ok(())
    }

    fn require_connected(&self) -> Result<(), PrecondError> {
        if self.state == VTState::Connected {
            Ok(())
        } else {
            Err(PrecondError::WrongState { expected: "Connected", actual: self.state.as_str() })
        }
    }

    fn send_command(&mut self, payload: Vec<u8>) {
        if let Some(vt) = self.vt_address {
            self.nm.borrow_mut().send(self.handle, Pgn::ECU_TO_VT, vt, payload);
        }
    }

    pub fn hide_show(&mut self, object_id: u16, show: bool) -> Result<(), PrecondError> {
        self.require_connected()?;
        let mut payload = vec![wire::HIDE_SHOW];
        payload.extend_from_slice(&object_id.to_le_bytes());
        payload.push(show as u8);
        self.send_command(payload);
        Ok(())
    }

    pub fn change_numeric_value(&mut self, object_id: u16, value: u32) -> Result<(), PrecondError> {
        self.require_connected()?;
        let mut payload = vec![wire::CHANGE_NUMERIC_VALUE];
        payload.extend_from_slice(&object_id.to_le_bytes());
        payload.extend_from_slice(&value.to_le_bytes());
        self.send_command(payload);
        Ok(())
    }

    pub fn change_string_value(&mut self, object_id: u16, value: &str) -> Result<(), PrecondError> {
        self.require_connected()?;
        let mut payload = vec![wire::CHANGE_STRING_VALUE];
        payload.extend_from_slice(&object_id.to_le_bytes());
        payload.extend_from_slice(value.as_bytes());
        self.send_command(payload);
        Ok(())
    }

    pub fn change_active_mask(&mut self, working_set_id: u16, new_active_mask_id: u16) -> Result<(), PrecondError> {
        self.require_connected()?;
        let mut payload = vec![wire::CHANGE_ACTIVE_MASK];
        payload.extend_from_slice(&working_set_id.to_le_bytes());
        payload.extend_from_slice(&new_active_mask_id.to_le_bytes());
        self.send_command(payload);
        Ok(())
    }

    /// Advance virtual time: time out a stalled handshake, then process any
    /// VT-to-ECU messages received since the last call.
    pub fn update(&mut self, elapsed_ms: u64) {
        self.elapsed_since_activity_ms += elapsed_ms;
        if !matches!(self.state, VTState::Connected | VTState::Disconnected)
            && self.elapsed_since_activity_ms >= INACTIVITY_TIMEOUT_MS
        {
            warn!("VT connection timed out in state {:?}", self.state);
            self.state = VTState::Disconnected;
            self.vt_address = None;
            return;
        }

        let drained: Vec<_> = self.shared.borrow_mut().inbound.drain(..).collect();
        for msg in drained {
            let message_type = msg.get_u8(0);
            match (self.state, message_type) {
                (VTState::WaitForVTStatus, wire::VT_STATUS) => {
                    self.vt_address = Some(msg.source);
                    self.elapsed_since_activity_ms = 0;
                    self.nm.borrow_mut().send(self.handle, Pgn::ECU_TO_VT, msg.source, vec![wire::GET_MEMORY]);
                    debug!("VT {:#04x} online, requesting memory", msg.source);
                    self.state = VTState::WaitForGetMemoryResponse;
                }
                (VTState::WaitForGetMemoryResponse, wire::GET_MEMORY_RESPONSE) => {
                    self.elapsed_since_activity_ms = 0;
                    self.state = VTState::UploadingObjectPool;
                    if let (Some(pool), Some(vt)) = (&self.object_pool, self.vt_address) {
                        debug!("uploading object pool to VT {:#04x}", vt);
                        let mut upload = vec![wire::OBJECT_POOL_DATA];
                        upload.extend_from_slice(&pool.to_bytes());
                        self.nm.borrow_mut().send(self.handle, Pgn::ECU_TO_VT, vt, upload);
                        self.nm.borrow_mut().send(self.handle, Pgn::ECU_TO_VT, vt, vec![wire::END_OF_OBJECT_POOL]);
                    }
                    self.state = VTState::WaitForEndOfObjectPool;
                }
                (VTState::WaitForEndOfObjectPool, wire::END_OF_OBJECT_POOL_RESPONSE) => {
                    self.elapsed_since_activity_ms = 0;
                    info!("VT connection established");
                    self.state = VTState::Connected;
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isobus_core::name::Name;
    use isobus_network::NetworkConfig;
    use crate::object_pool::{ObjectType, VTObject};

    fn new_client() -> VTClient {
        let mut nm = NetworkManager::new(NetworkConfig::default());
        let handle = nm.create_internal(Name::default(), 0, 0x28).unwrap();
        VTClient::new(Rc::new(RefCell::new(nm)), handle)
    }

    fn sample_pool() -> ObjectPool {
        let mut pool = ObjectPool::new();
        pool.add(VTObject { id: 1, kind: ObjectType::WorkingSet, bytes: vec![] });
        pool
    }

    #[test]
    fn initial_state_is_disconnected() {
        assert_eq!(new_client().state(), VTState::Disconnected);
    }

    #[test]
    fn connect_without_pool_fails() {
        let mut vt = new_client();
        assert!(vt.connect().is_err());
    }

    #[test]
    fn connect_with_pool_moves_to_wait_for_vt_status() {
        let mut vt = new_client();
        vt.set_object_pool(sample_pool());
        assert!(vt.connect().is_ok());
        assert_eq!(vt.state(), VTState::WaitForVTStatus);
    }

    #[test]
    fn timeout_without_vt_returns_to_disconnected() {
        let mut vt = new_client();
        vt.set_object_pool(sample_pool());
        vt.connect().unwrap();
        vt.update(6001);
        assert_eq!(vt.state(), VTState::Disconnected);
    }

    #[test]
    fn commands_fail_when_disconnected() {
        let mut vt = new_client();
        assert!(vt.hide_show(1, true).is_err());
        assert!(vt.change_numeric_value(1, 42).is_err());
        assert!(vt.change_string_value(1, "test").is_err());
        assert!(vt.change_active_mask(1, 2).is_err());
    }
}
