//! The seam between a scale unit and the bluetooth stack.
//!
//! [`Radio`] is implemented by [`BtleRadio`](crate::device::btle::BtleRadio) for real
//! hardware and by [`MockRadio`](crate::device::mock::MockRadio) for tests.

use std::fmt::Debug;
use std::hash::Hash;
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::device::adapter::AdapterState;
use crate::device::connection::DiscoveredChannels;
use crate::device::types::DeviceIdentity;
use crate::error::DeviceError;

/// Adapter-level callbacks, shared by every unit using the same adapter.
#[derive(Debug, Clone)]
pub enum RadioEvent<D, I> {
    AdapterState(AdapterState),
    /// An advertisement, with the service uuids it carried.
    Discovered { device: D, services: Vec<Uuid> },
    Disconnected(I),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait Radio: Clone + Send + Sync + 'static {
    type Device: Clone + Debug + Send + Sync + 'static;
    type DeviceId: Clone + Debug + Eq + Hash + Send + Sync + 'static;

    fn device_id(&self, device: &Self::Device) -> Self::DeviceId;

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent<Self::Device, Self::DeviceId>>, DeviceError>;

    async fn adapter_state(&self) -> Result<AdapterState, DeviceError>;

    /// Starts (or widens) discovery so that advertisements of `service` are reported.
    async fn start_scan(&self, service: Uuid) -> Result<(), DeviceError>;

    /// Stops discovery for `service`; other services keep being scanned for.
    async fn stop_scan(&self, service: Uuid) -> Result<(), DeviceError>;

    async fn connect(&self, device: &Self::Device) -> Result<(), DeviceError>;

    async fn disconnect(&self, device: &Self::Device) -> Result<(), DeviceError>;

    /// Returns `None` when the scale does not offer `identity.service`.
    async fn discover(&self, device: &Self::Device, identity: &DeviceIdentity) -> Result<Option<DiscoveredChannels>, DeviceError>;

    async fn notifications(&self, device: &Self::Device) -> Result<BoxStream<'static, Notification>, DeviceError>;

    /// Enables notifications on the characteristic by writing its CCC descriptor.
    async fn subscribe(&self, device: &Self::Device, service: Uuid, characteristic: Uuid) -> Result<(), DeviceError>;

    async fn write(&self, device: &Self::Device, service: Uuid, characteristic: Uuid, value: &[u8]) -> Result<(), DeviceError>;
}
