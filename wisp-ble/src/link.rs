//! Transport seam between the engine and a BLE stack
//!
//! The engine needs three primitives from the radio: scan, connect, and
//! read/write/subscribe on characteristics. `Radio` is the central side,
//! `Link` is one connected peripheral.

use std::fmt;
use std::future::Future;

use futures::stream::BoxStream;
use uuid::Uuid;

use crate::TransportError;

/// One advertisement sighting
#[derive(Debug, Clone, PartialEq)]
pub struct PeripheralHandle {
    /// Transport address (platform-specific peripheral id)
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub connectable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    Sighted(PeripheralHandle),
    Disconnected(String),
    StateChanged(RadioState),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharProps {
    pub fn writable(&self) -> bool {
        self.write || self.write_without_response
    }

    pub fn notifiable(&self) -> bool {
        self.notify || self.indicate
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub props: CharProps,
}

impl CharacteristicDescriptor {
    /// Prefer acknowledged writes when the characteristic offers both
    pub fn write_mode(&self) -> WriteMode {
        if self.props.write {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::WithResponse => f.write_str("with-response"),
            WriteMode::WithoutResponse => f.write_str("without-response"),
        }
    }
}

/// Value notified by the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

/// Central side of the radio stack
pub trait Radio: Send + Sync + 'static {
    type Link: Link;

    fn state(&self) -> impl Future<Output = Result<RadioState, TransportError>> + Send;

    fn start_scan(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn stop_scan(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// A fresh event stream; every call gets its own subscriber
    fn events(
        &self,
    ) -> impl Future<Output = Result<BoxStream<'static, RadioEvent>, TransportError>> + Send;

    fn connect(&self, id: &str) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// A connected peripheral. Clones refer to the same connection.
pub trait Link: Clone + Send + Sync + 'static {
    fn id(&self) -> String;

    fn discover_services(
        &self,
    ) -> impl Future<Output = Result<Vec<ServiceDescriptor>, TransportError>> + Send;

    fn write(
        &self,
        characteristic: &CharacteristicDescriptor,
        data: &[u8],
        mode: WriteMode,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(
        &self,
        characteristic: &CharacteristicDescriptor,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn unsubscribe(
        &self,
        characteristic: &CharacteristicDescriptor,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn notifications(
        &self,
    ) -> impl Future<Output = Result<BoxStream<'static, Notification>, TransportError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
