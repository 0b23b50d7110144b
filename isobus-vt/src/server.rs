//! The Virtual Terminal server connection state machine.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use isobus_core::pgn::Pgn;
use isobus_core::{Address, CFHandle, Event, Message};
use isobus_network::NetworkManager;

use crate::object_pool::ObjectPool;
use crate::wire;

const DEFAULT_STATUS_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct VTServerConfig {
    pub screen_width: u16,
    pub screen_height: u16,
    pub version: u8,
    pub status_interval_ms: u64,
}

impl Default for VTServerConfig {
    fn default() -> Self {
        Self {
            screen_width: 0,
            screen_height: 0,
            version: 4,
            status_interval_ms: DEFAULT_STATUS_INTERVAL_MS,
        }
    }
}

impl VTServerConfig {
    pub fn screen(mut self, width: u16, height: u16) -> Self {
        self.screen_width = width;
        self.screen_height = height;
        self
    }

    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VTServerState {
    Disconnected,
    WaitForClientStatus,
}

#[derive(Debug, Clone, Default)]
struct ClientState {
    object_pool: ObjectPool,
    uploading: Vec<u8>,
}

struct Shared {
    inbound: VecDeque<Message>,
}

/// A VT server endpoint: broadcasts its own status, accepts object pool
/// uploads from clients, and reports operator-driven changes back out.
pub struct VTServer {
    nm: Rc<RefCell<NetworkManager>>,
    handle: CFHandle,
    config: VTServerConfig,
    state: VTServerState,
    elapsed_since_status_ms: u64,
    clients: HashMap<Address, ClientState>,
    shared: Rc<RefCell<Shared>>,
    pub on_numeric_value_change: Event<(Address, u16, u32)>,
    pub on_button_activation: Event<(Address, u16)>,
}

impl VTServer {
    pub fn new(nm: Rc<RefCell<NetworkManager>>, handle: CFHandle, config: VTServerConfig) -> Self {
        Self {
            nm,
            handle,
            config,
            state: VTServerState::Disconnected,
            elapsed_since_status_ms: 0,
            clients: HashMap::new(),
            shared: Rc::new(RefCell::new(Shared { inbound: VecDeque::new() })),
            on_numeric_value_change: Event::new(),
            on_button_activation: Event::new(),
        }
    }

    pub fn initialize(&mut self) {
        let shared = self.shared.clone();
        self.nm.borrow_mut().subscribe(Pgn::VT_TO_ECU, move |msg: &Message| {
            shared.borrow_mut().inbound.push_back(msg.clone());
        });
    }

    pub fn start(&mut self) {
        self.state = VTServerState::WaitForClientStatus;
        self.elapsed_since_status_ms = 0;
    }

    pub fn stop(&mut self) {
        self.state = VTServerState::Disconnected;
        self.clients.clear();
    }

    pub fn state(&self) -> VTServerState {
        self.state
    }

    pub fn screen_width(&self) -> u16 {
        self.config.screen_width
    }

    pub fn screen_height(&self) -> u16 {
        self.config.screen_height
    }

    pub fn clients(&self) -> Vec<Address> {
        self.clients.keys().copied().collect()
    }

    fn broadcast_status(&mut self) {
        let payload = vec![wire::VT_STATUS, self.config.version, 0, 0, 0, 0, 0, 0];
        self.nm.borrow_mut().send(
            self.handle,
            Pgn::ECU_TO_VT,
            isobus_core::BROADCAST_ADDRESS,
            payload,
        );
    }

    pub fn update(&mut self, elapsed_ms: u64) {
        if self.state == VTServerState::Disconnected {
            return;
        }

        self.elapsed_since_status_ms += elapsed_ms;
        if self.elapsed_since_status_ms >= self.config.status_interval_ms {
            self.elapsed_since_status_ms = 0;
            self.broadcast_status();
        }

        let drained: Vec<_> = self.shared.borrow_mut().inbound.drain(..).collect();
        for msg in drained {
            let source = msg.source;
            let message_type = msg.get_u8(0);
            match message_type {
                wire::GET_MEMORY => {
                    self.clients.entry(source).or_default();
                    debug!("client {:#04x} requested memory", source);
                    self.nm.borrow_mut().send(
                        self.handle,
                        Pgn::ECU_TO_VT,
                        source,
                        vec![wire::GET_MEMORY_RESPONSE, 0],
                    );
                }
                wire::END_OF_OBJECT_POOL => {
                    if let Some(client) = self.clients.get_mut(&source) {
                        client.object_pool = ObjectPool::from_bytes(&client.uploading);
                        client.uploading.clear();
                        info!("client {:#04x} finished object pool upload", source);
                    }
                    self.nm.borrow_mut().send(
                        self.handle,
                        Pgn::ECU_TO_VT,
                        source,
                        vec![wire::END_OF_OBJECT_POOL_RESPONSE, 0],
                    );
                }
                wire::CHANGE_NUMERIC_VALUE => {
                    if msg.data.len() >= 7 {
                        let object_id = u16::from_le_bytes([msg.data[1], msg.data[2]]);
                        let value = u32::from_le_bytes([
                            msg.data[3], msg.data[4], msg.data[5], msg.data[6],
                        ]);
                        self.on_numeric_value_change.emit(&(source, object_id, value));
                    }
                }
                wire::BUTTON_ACTIVATION => {
                    if msg.data.len() >= 3 {
                        let object_id = u16::from_le_bytes([msg.data[1], msg.data[2]]);
                        self.on_button_activation.emit(&(source, object_id));
                    }
                }
                wire::OBJECT_POOL_DATA => {
                    if let Some(client) = self.clients.get_mut(&source) {
                        client.uploading.extend_from_slice(&msg.data[1..]);
                    }
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

    fn new_server(config: VTServerConfig) -> VTServer {
        let mut nm = NetworkManager::new(NetworkConfig::default());
        let handle = nm.create_internal(Name::default(), 0, 0x26).unwrap();
        VTServer::new(Rc::new(RefCell::new(nm)), handle, config)
    }

    #[test]
    fn initial_state_is_disconnected() {
        let server = new_server(VTServerConfig::default());
        assert_eq!(server.state(), VTServerState::Disconnected);
    }

    #[test]
    fn config_builder_sets_screen_and_version() {
        let config = VTServerConfig::default().screen(320, 240).version(4);
        let server = new_server(config);
        assert_eq!(server.screen_width(), 320);
        assert_eq!(server.screen_height(), 240);
    }

    #[test]
    fn clients_start_empty_even_after_start() {
        let mut server = new_server(VTServerConfig::default());
        server.start();
        assert!(server.clients().is_empty());
    }

    #[test]
    fn update_does_not_panic_when_running() {
        let mut server = new_server(VTServerConfig::default());
        server.initialize();
        server.start();
        for _ in 0..10 {
            server.update(100);
        }
        assert_eq!(server.state(), VTServerState::WaitForClientStatus);
    }

    #[test]
    fn object_pool_upload_round_trips_through_the_wire_framing() {
        use crate::object_pool::{ObjectType, VTObject};

        let mut server = new_server(VTServerConfig::default());
        server.start();

        let mut pool = ObjectPool::new();
        pool.add(VTObject { id: 1, kind: ObjectType::WorkingSet, bytes: vec![] });
        pool.add(VTObject { id: 2, kind: ObjectType::DataMask, bytes: vec![0xAA, 0xBB] });

        let client_addr: Address = 0x30;
        server.shared.borrow_mut().inbound.push_back(Message::new(
            Pgn::VT_TO_ECU,
            client_addr,
            0x26,
            vec![wire::GET_MEMORY],
        ));
        let mut upload = vec![wire::OBJECT_POOL_DATA];
        upload.extend_from_slice(&pool.to_bytes());
        server.shared.borrow_mut().inbound.push_back(Message::new(
            Pgn::VT_TO_ECU,
            client_addr,
            0x26,
            upload,
        ));
        server.shared.borrow_mut().inbound.push_back(Message::new(
            Pgn::VT_TO_ECU,
            client_addr,
            0x26,
            vec![wire::END_OF_OBJECT_POOL],
        ));

        server.update(0);

        assert_eq!(server.clients.get(&client_addr).unwrap().object_pool, pool);
    }
}
