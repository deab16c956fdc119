use std::collections::BTreeSet;
use std::sync::Arc;
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::device::adapter::AdapterState;
use crate::device::connection::DiscoveredChannels;
use crate::device::constants::make_client_characteristic_config_uuid;
use crate::device::radio::{Notification, Radio, RadioEvent};
use crate::device::types::DeviceIdentity;
use crate::error::DeviceError;

/// btleplug backend, shared by all scale units.
///
/// The adapter only runs one scan at a time, so the scan filter is the union of the services
/// the units are currently looking for.
#[derive(Clone)]
pub struct BtleRadio {
    _manager: Arc<Manager>,
    adapter: Adapter,
    scan_services: Arc<Mutex<BTreeSet<Uuid>>>,
}

impl BtleRadio {
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        Ok(BtleRadio {
            _manager: Arc::new(manager),
            adapter,
            scan_services: Arc::new(Mutex::new(BTreeSet::new())),
        })
    }

    async fn apply_scan_filter(&self, services: &BTreeSet<Uuid>) -> Result<(), DeviceError> {
        // restarting is the only way to change the filter of a running scan
        if let Err(err) = self.adapter.stop_scan().await {
            debug!("Stopping previous scan failed: {:?}", err);
        }

        if services.is_empty() {
            info!("Scanning stopped");
            return Ok(());
        }

        let filter = ScanFilter {
            services: services.iter().cloned().collect(),
        };
        info!("Scanning for services {:?}...", filter.services);
        self.adapter.start_scan(filter).await?;
        Ok(())
    }
}

fn find_characteristic(peripheral: &Peripheral, service: Uuid, characteristic: Uuid) -> Result<Characteristic, DeviceError> {
    peripheral.services()
        .into_iter()
        .filter(|s| s.uuid == service)
        .flat_map(|s| s.characteristics.into_iter())
        .find(|c| c.uuid == characteristic)
        .ok_or(DeviceError::MissingCharacteristic)
}

fn adapter_state_from(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::On,
        CentralState::PoweredOff => AdapterState::Off,
        _ => AdapterState::Unknown,
    }
}

async fn discovered(adapter: &Adapter, id: &PeripheralId, mut services: Vec<Uuid>) -> Option<RadioEvent<Peripheral, PeripheralId>> {
    let device = match adapter.peripheral(id).await {
        Ok(v) => v,
        Err(err) => {
            debug!("Failed to get peripheral {:?}: {}", id, err);
            return None;
        },
    };

    if services.is_empty() {
        match device.properties().await {
            Ok(Some(properties)) => services = properties.services,
            Ok(None) => debug!("Peripheral {:?} has no properties", id),
            Err(err) => warn!("Could not query peripheral for properties: {:?}", err),
        }
    }

    Some(RadioEvent::Discovered { device, services })
}

async fn translate_event(adapter: &Adapter, event: CentralEvent) -> Option<RadioEvent<Peripheral, PeripheralId>> {
    match event {
        CentralEvent::StateUpdate(state) => Some(RadioEvent::AdapterState(adapter_state_from(state))),
        CentralEvent::ServicesAdvertisement { id, services } => discovered(adapter, &id, services).await,
        CentralEvent::ServiceDataAdvertisement { id, service_data } => {
            discovered(adapter, &id, service_data.into_keys().collect()).await
        },
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            discovered(adapter, &id, Vec::new()).await
        },
        CentralEvent::DeviceDisconnected(id) => Some(RadioEvent::Disconnected(id)),
        _ => None,
    }
}

#[async_trait]
impl Radio for BtleRadio {
    type Device = Peripheral;
    type DeviceId = PeripheralId;

    fn device_id(&self, device: &Peripheral) -> PeripheralId {
        device.id()
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent<Peripheral, PeripheralId>>, DeviceError> {
        let adapter = self.adapter.clone();
        let events = self.adapter.events().await?;

        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move { translate_event(&adapter, event).await }
            })
            .boxed())
    }

    async fn adapter_state(&self) -> Result<AdapterState, DeviceError> {
        Ok(adapter_state_from(self.adapter.adapter_state().await?))
    }

    async fn start_scan(&self, service: Uuid) -> Result<(), DeviceError> {
        let mut services = self.scan_services.lock().await;
        if services.insert(service) {
            if let Err(err) = self.apply_scan_filter(&services).await {
                services.remove(&service);
                return Err(err);
            }
        }
        Ok(())
    }

    async fn stop_scan(&self, service: Uuid) -> Result<(), DeviceError> {
        let mut services = self.scan_services.lock().await;
        if services.remove(&service) {
            self.apply_scan_filter(&services).await?;
        }
        Ok(())
    }

    async fn connect(&self, device: &Peripheral) -> Result<(), DeviceError> {
        info!("Connecting to peripheral {:?}...", device.id());
        device.connect().await?;
        Ok(())
    }

    async fn disconnect(&self, device: &Peripheral) -> Result<(), DeviceError> {
        if device.is_connected().await? {
            device.disconnect().await?;
        }
        Ok(())
    }

    async fn discover(&self, device: &Peripheral, identity: &DeviceIdentity) -> Result<Option<DiscoveredChannels>, DeviceError> {
        device.discover_services().await?;

        let service = match device.services().into_iter().find(|s| s.uuid == identity.service) {
            Some(v) => v,
            None => return Ok(None),
        };

        let notify = service.characteristics.iter().find(|c| c.uuid == identity.notify);
        if let Some(characteristic) = notify {
            let cccd = make_client_characteristic_config_uuid();
            if !characteristic.descriptors.iter().any(|d| d.uuid == cccd) {
                // not every platform reports descriptors; subscribing may still work
                debug!("Characteristic {} does not list a CCC descriptor", characteristic.uuid);
            }
        }

        Ok(Some(DiscoveredChannels {
            notify: notify.is_some(),
            write: service.characteristics.iter().any(|c| c.uuid == identity.write),
        }))
    }

    async fn notifications(&self, device: &Peripheral) -> Result<BoxStream<'static, Notification>, DeviceError> {
        let stream = device.notifications().await?;
        Ok(stream
            .map(|data| Notification { characteristic: data.uuid, value: data.value })
            .boxed())
    }

    async fn subscribe(&self, device: &Peripheral, service: Uuid, characteristic: Uuid) -> Result<(), DeviceError> {
        let characteristic = find_characteristic(device, service, characteristic)?;
        info!("Subscribing to characteristic {:?} {:?}", service, characteristic.uuid);
        device.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn write(&self, device: &Peripheral, service: Uuid, characteristic: Uuid, value: &[u8]) -> Result<(), DeviceError> {
        let characteristic = find_characteristic(device, service, characteristic)?;
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        device.write(&characteristic, value, write_type).await?;
        Ok(())
    }
}
