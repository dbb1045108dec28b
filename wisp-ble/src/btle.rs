//! `Radio` and `Link` over the host Bluetooth stack, via btleplug

use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{BoxStream, StreamExt};
use tracing::debug;

use crate::TransportError;
use crate::link::{
    CharProps, CharacteristicDescriptor, Link, Notification, PeripheralHandle, Radio, RadioEvent,
    RadioState, ServiceDescriptor, WriteMode,
};

impl From<btleplug::Error> for TransportError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::PermissionDenied => TransportError::PermissionDenied,
            btleplug::Error::NotConnected => TransportError::NotConnected,
            btleplug::Error::TimedOut(_) => TransportError::TimedOut,
            btleplug::Error::NotSupported(what) => TransportError::Rejected(what),
            other => TransportError::Other(other.to_string()),
        }
    }
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

fn char_props(flags: CharPropFlags) -> CharProps {
    CharProps {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

fn service_descriptor(service: Service) -> ServiceDescriptor {
    ServiceDescriptor {
        uuid: service.uuid,
        characteristics: service
            .characteristics
            .into_iter()
            .map(|c| CharacteristicDescriptor {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
                props: char_props(c.properties),
            })
            .collect(),
    }
}

async fn sighting(adapter: &Adapter, id: &PeripheralId) -> Option<PeripheralHandle> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let props = peripheral.properties().await.ok()??;
    Some(PeripheralHandle {
        id: id.to_string(),
        name: props.local_name,
        rssi: props.rssi,
        // not reported by every platform; connect attempts tell the truth
        connectable: true,
    })
}

/// One host Bluetooth adapter
pub struct BtleRadio {
    adapter: Adapter,
}

impl BtleRadio {
    /// Open adapter number `index` as reported by the OS
    pub async fn new(index: usize) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(index)
            .ok_or_else(|| TransportError::Other(format!("no bluetooth adapter #{index}")))?;
        Ok(Self { adapter })
    }

    async fn peripheral(&self, id: &str) -> Result<Peripheral, TransportError> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == id)
            .ok_or_else(|| TransportError::Other(format!("unknown peripheral {id}")))
    }
}

impl Radio for BtleRadio {
    type Link = BtleLink;

    async fn state(&self) -> Result<RadioState, TransportError> {
        Ok(radio_state(self.adapter.adapter_state().await?))
    }

    async fn start_scan(&self) -> Result<(), TransportError> {
        Ok(self.adapter.start_scan(ScanFilter::default()).await?)
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        Ok(self.adapter.stop_scan().await?)
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent>, TransportError> {
        let adapter = self.adapter.clone();
        let events = self.adapter.events().await?;
        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                            sighting(&adapter, &id).await.map(RadioEvent::Sighted)
                        }
                        CentralEvent::DeviceDisconnected(id) => {
                            Some(RadioEvent::Disconnected(id.to_string()))
                        }
                        CentralEvent::StateUpdate(state) => {
                            Some(RadioEvent::StateChanged(radio_state(state)))
                        }
                        _ => None,
                    }
                }
            })
            .boxed())
    }

    async fn connect(&self, id: &str) -> Result<BtleLink, TransportError> {
        let peripheral = self.peripheral(id).await?;
        peripheral.connect().await?;
        debug!(id, "link up");
        Ok(BtleLink {
            id: id.to_string(),
            peripheral,
        })
    }
}

#[derive(Clone)]
pub struct BtleLink {
    id: String,
    peripheral: Peripheral,
}

impl BtleLink {
    fn characteristic(&self, wanted: &CharacteristicDescriptor) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == wanted.uuid && c.service_uuid == wanted.service_uuid)
            .ok_or_else(|| TransportError::Other(format!("characteristic {} not discovered", wanted.uuid)))
    }
}

impl Link for BtleLink {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn discover_services(&self) -> Result<Vec<ServiceDescriptor>, TransportError> {
        self.peripheral.discover_services().await?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(service_descriptor)
            .collect())
    }

    async fn write(
        &self,
        characteristic: &CharacteristicDescriptor,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        Ok(self.peripheral.write(&target, data, write_type).await?)
    }

    async fn subscribe(&self, characteristic: &CharacteristicDescriptor) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;
        Ok(self.peripheral.subscribe(&target).await?)
    }

    async fn unsubscribe(&self, characteristic: &CharacteristicDescriptor) -> Result<(), TransportError> {
        let target = self.characteristic(characteristic)?;
        Ok(self.peripheral.unsubscribe(&target).await?)
    }

    async fn notifications(&self) -> Result<BoxStream<'static, Notification>, TransportError> {
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .map(|n| Notification {
                uuid: n.uuid,
                value: n.value,
            })
            .boxed())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(self.peripheral.disconnect().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_flags_map_to_props() {
        let props = char_props(CharPropFlags::WRITE | CharPropFlags::NOTIFY);
        assert!(props.write && props.notify);
        assert!(!props.write_without_response && !props.read);
        assert!(props.writable() && props.notifiable());
    }

    #[test]
    fn btleplug_errors_map_to_transport_errors() {
        assert_eq!(
            TransportError::from(btleplug::Error::PermissionDenied),
            TransportError::PermissionDenied
        );
        assert_eq!(
            TransportError::from(btleplug::Error::NotConnected),
            TransportError::NotConnected
        );
    }
}
