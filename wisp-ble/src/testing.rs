//! Scripted in-memory radio for exercising the engine without hardware.
//!
//! # Usage
//!
//! ```rust,ignore
//! use wisp_ble::testing::{MockPeripheral, MockRadio};
//!
//! let radio = MockRadio::new();
//! radio.add_peripheral("AA:BB", MockPeripheral::provisioning());
//! radio.advertise("AA:BB", Some("WISP-1234"), -60);
//! let link = radio.link("AA:BB").unwrap();
//! link.notify(wisp_proto::ble::STATUS_UUID, b"RECEIVED");
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use uuid::Uuid;
use wisp_proto::ble::{CREDENTIALS_UUID, SERVICE_UUID, STATUS_UUID};

use crate::link::{
    CharProps, CharacteristicDescriptor, Link, Notification, PeripheralHandle, Radio, RadioEvent,
    RadioState, ServiceDescriptor, WriteMode,
};
use crate::TransportError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn broadcast_stream<T: Clone + Send + 'static>(
    rx: broadcast::Receiver<T>,
) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

pub fn characteristic(service: Uuid, uuid: Uuid, props: CharProps) -> CharacteristicDescriptor {
    CharacteristicDescriptor {
        uuid,
        service_uuid: service,
        props,
    }
}

pub fn service(uuid: Uuid, characteristics: Vec<CharacteristicDescriptor>) -> ServiceDescriptor {
    ServiceDescriptor {
        uuid,
        characteristics,
    }
}

pub const WRITE: CharProps = CharProps {
    read: false,
    write: true,
    write_without_response: false,
    notify: false,
    indicate: false,
};

pub const WRITE_NO_RSP: CharProps = CharProps {
    read: false,
    write: false,
    write_without_response: true,
    notify: false,
    indicate: false,
};

pub const NOTIFY: CharProps = CharProps {
    read: true,
    write: false,
    write_without_response: false,
    notify: true,
    indicate: false,
};

pub const READ: CharProps = CharProps {
    read: true,
    write: false,
    write_without_response: false,
    notify: false,
    indicate: false,
};

type WriteFilter = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// GATT table and behaviour of one scripted peripheral
#[derive(Clone)]
pub struct MockPeripheral {
    pub services: Vec<ServiceDescriptor>,
    accepts: WriteFilter,
    subscribe_fails: bool,
    resets_on_write: bool,
}

impl MockPeripheral {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self {
            services,
            accepts: Arc::new(|_| true),
            subscribe_fails: false,
            resets_on_write: false,
        }
    }

    /// Current firmware: primary service with credentials + status characteristics
    pub fn provisioning() -> Self {
        Self::new(vec![
            service(
                Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb),
                vec![characteristic(
                    Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb),
                    Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb),
                    READ,
                )],
            ),
            service(
                SERVICE_UUID,
                vec![
                    characteristic(SERVICE_UUID, CREDENTIALS_UUID, WRITE),
                    characteristic(SERVICE_UUID, STATUS_UUID, NOTIFY),
                ],
            ),
        ])
    }

    /// Only writes for which `accepts` returns true succeed
    pub fn accepting(mut self, accepts: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        self.accepts = Arc::new(accepts);
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.subscribe_fails = true;
        self
    }

    /// The first write is rejected and the peripheral drops the link with it
    pub fn resetting_on_write(mut self) -> Self {
        self.resets_on_write = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub uuid: Uuid,
    pub data: Vec<u8>,
    pub mode: WriteMode,
}

#[derive(Default)]
struct LinkState {
    connected: bool,
    writes: Vec<RecordedWrite>,
    rejected_writes: usize,
    subscribed: HashSet<Uuid>,
    unsubscribes: usize,
}

struct LinkShared {
    id: String,
    peripheral: MockPeripheral,
    state: Mutex<LinkState>,
    notifications: broadcast::Sender<Notification>,
    radio_events: broadcast::Sender<RadioEvent>,
}

#[derive(Clone)]
pub struct MockLink {
    shared: Arc<LinkShared>,
}

impl MockLink {
    /// Deliver a notification as if the peripheral sent it
    pub fn notify(&self, uuid: Uuid, value: &[u8]) {
        let _ = self.shared.notifications.send(Notification {
            uuid,
            value: value.to_vec(),
        });
    }

    /// Accepted writes, in order
    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock(&self.shared.state).writes.clone()
    }

    pub fn rejected_writes(&self) -> usize {
        lock(&self.shared.state).rejected_writes
    }

    pub fn is_subscribed(&self, uuid: &Uuid) -> bool {
        lock(&self.shared.state).subscribed.contains(uuid)
    }

    pub fn unsubscribe_count(&self) -> usize {
        lock(&self.shared.state).unsubscribes
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.state).connected
    }

    fn drop_connection(&self) -> bool {
        let mut state = lock(&self.shared.state);
        let was_connected = std::mem::replace(&mut state.connected, false);
        drop(state);
        if was_connected {
            let _ = self
                .shared
                .radio_events
                .send(RadioEvent::Disconnected(self.shared.id.clone()));
        }
        was_connected
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if lock(&self.shared.state).connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

impl Link for MockLink {
    fn id(&self) -> String {
        self.shared.id.clone()
    }

    async fn discover_services(&self) -> Result<Vec<ServiceDescriptor>, TransportError> {
        self.ensure_connected()?;
        Ok(self.shared.peripheral.services.clone())
    }

    async fn write(
        &self,
        characteristic: &CharacteristicDescriptor,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        if self.shared.peripheral.resets_on_write {
            lock(&self.shared.state).rejected_writes += 1;
            self.drop_connection();
            return Err(TransportError::Rejected("peripheral reset".to_string()));
        }
        let mut state = lock(&self.shared.state);
        if !(self.shared.peripheral.accepts)(data) {
            state.rejected_writes += 1;
            return Err(TransportError::Rejected("value not accepted".to_string()));
        }
        state.writes.push(RecordedWrite {
            uuid: characteristic.uuid,
            data: data.to_vec(),
            mode,
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<(), TransportError> {
        self.ensure_connected()?;
        if self.shared.peripheral.subscribe_fails {
            return Err(TransportError::Other("CCCD write failed".to_string()));
        }
        lock(&self.shared.state)
            .subscribed
            .insert(characteristic.uuid);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        characteristic: &CharacteristicDescriptor,
    ) -> Result<(), TransportError> {
        let mut state = lock(&self.shared.state);
        state.unsubscribes += 1;
        state.subscribed.remove(&characteristic.uuid);
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>, TransportError> {
        Ok(broadcast_stream(self.shared.notifications.subscribe()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.drop_connection();
        Ok(())
    }
}

struct RadioInner {
    state: RadioState,
    scan_denied: bool,
    scanning: bool,
    scan_starts: usize,
    scan_stops: usize,
    peripherals: HashMap<String, MockPeripheral>,
    unreachable: HashSet<String>,
    links: HashMap<String, MockLink>,
}

#[derive(Clone)]
pub struct MockRadio {
    inner: Arc<Mutex<RadioInner>>,
    events: broadcast::Sender<RadioEvent>,
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Mutex::new(RadioInner {
                state: RadioState::PoweredOn,
                scan_denied: false,
                scanning: false,
                scan_starts: 0,
                scan_stops: 0,
                peripherals: HashMap::new(),
                unreachable: HashSet::new(),
                links: HashMap::new(),
            })),
            events,
        }
    }

    pub fn set_state(&self, state: RadioState) {
        lock(&self.inner).state = state;
        let _ = self.events.send(RadioEvent::StateChanged(state));
    }

    pub fn deny_scan_permission(&self) {
        lock(&self.inner).scan_denied = true;
    }

    pub fn add_peripheral(&self, id: &str, peripheral: MockPeripheral) {
        lock(&self.inner)
            .peripherals
            .insert(id.to_string(), peripheral);
    }

    /// Connection attempts to `id` fail at the transport level
    pub fn make_unreachable(&self, id: &str) {
        lock(&self.inner).unreachable.insert(id.to_string());
    }

    /// Emit one advertisement sighting
    pub fn advertise(&self, id: &str, name: Option<&str>, rssi: i16) {
        let _ = self.events.send(RadioEvent::Sighted(PeripheralHandle {
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi: Some(rssi),
            connectable: true,
        }));
    }

    /// The peripheral drops the connection on its own
    pub fn drop_connection(&self, id: &str) {
        if let Some(link) = self.link(id) {
            link.drop_connection();
        }
    }

    pub fn link(&self, id: &str) -> Option<MockLink> {
        lock(&self.inner).links.get(id).cloned()
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.inner).scanning
    }

    pub fn scan_starts(&self) -> usize {
        lock(&self.inner).scan_starts
    }

    pub fn scan_stops(&self) -> usize {
        lock(&self.inner).scan_stops
    }
}

impl Radio for MockRadio {
    type Link = MockLink;

    async fn state(&self) -> Result<RadioState, TransportError> {
        Ok(lock(&self.inner).state)
    }

    async fn start_scan(&self) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);
        if inner.scan_denied {
            return Err(TransportError::PermissionDenied);
        }
        inner.scanning = true;
        inner.scan_starts += 1;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let mut inner = lock(&self.inner);
        inner.scanning = false;
        inner.scan_stops += 1;
        Ok(())
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent>, TransportError> {
        Ok(broadcast_stream(self.events.subscribe()))
    }

    async fn connect(&self, id: &str) -> Result<MockLink, TransportError> {
        let mut inner = lock(&self.inner);
        if inner.state != RadioState::PoweredOn {
            return Err(TransportError::Other("adapter is powered off".to_string()));
        }
        if inner.unreachable.contains(id) {
            return Err(TransportError::TimedOut);
        }
        let peripheral = inner
            .peripherals
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::Other(format!("unknown peripheral {id}")))?;

        let (notifications, _) = broadcast::channel(64);
        let link = MockLink {
            shared: Arc::new(LinkShared {
                id: id.to_string(),
                peripheral,
                state: Mutex::new(LinkState {
                    connected: true,
                    ..LinkState::default()
                }),
                notifications,
                radio_events: self.events.clone(),
            }),
        };
        inner.links.insert(id.to_string(), link.clone());
        Ok(link)
    }
}
