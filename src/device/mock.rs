//! In-memory radio for exercising scale units without bluetooth hardware.
//!
//! Tests play the part of the scale and the adapter: [`MockRadio::advertise`],
//! [`MockRadio::drop_link`], [`MockRadio::set_adapter`] and [`MockRadio::notify`] inject
//! callbacks, and [`MockRadio::calls`] shows what the unit asked the radio to do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::BoxStream;
use futures::StreamExt;
use uuid::Uuid;

use crate::device::adapter::AdapterState;
use crate::device::connection::DiscoveredChannels;
use crate::device::radio::{Notification, Radio, RadioEvent};
use crate::device::types::DeviceIdentity;
use crate::error::DeviceError;

pub type MockDevice = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    StartScan(Uuid),
    StopScan(Uuid),
    Connect(MockDevice),
    Disconnect(MockDevice),
    Discover(MockDevice),
    Subscribe(MockDevice, Uuid),
    Write(MockDevice, Uuid, Vec<u8>),
}

struct MockInner {
    calls: Vec<MockCall>,
    events: Vec<UnboundedSender<RadioEvent<MockDevice, MockDevice>>>,
    notifications: HashMap<MockDevice, Vec<UnboundedSender<Notification>>>,
    adapter_state: AdapterState,
    deny_scan: bool,
    deny_connect: bool,
    fail_connect: bool,
    fail_subscribe: bool,
    channels: Option<DiscoveredChannels>,
}

#[derive(Clone)]
pub struct MockRadio {
    inner: Arc<Mutex<MockInner>>,
}

impl std::fmt::Debug for MockRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MockRadio")
            .field("calls", &inner.calls.len())
            .field("adapter_state", &inner.adapter_state)
            .finish()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        MockRadio::new()
    }
}

impl MockRadio {
    pub fn new() -> Self {
        MockRadio {
            inner: Arc::new(Mutex::new(MockInner {
                calls: Vec::new(),
                events: Vec::new(),
                notifications: HashMap::new(),
                adapter_state: AdapterState::On,
                deny_scan: false,
                deny_connect: false,
                fail_connect: false,
                fail_subscribe: false,
                channels: Some(DiscoveredChannels { notify: true, write: true }),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().expect("Failed to lock MockRadio inner")
    }

    fn record(&self, call: MockCall) {
        self.lock().calls.push(call);
    }

    fn permission_denied() -> DeviceError {
        DeviceError::Btle { source: btleplug::Error::PermissionDenied }
    }

    /// Starting a scan fails as if the scan permission was not granted.
    pub fn deny_scan(&self, deny: bool) {
        self.lock().deny_scan = deny;
    }

    /// Connecting fails as if the connect permission was not granted.
    pub fn deny_connect(&self, deny: bool) {
        self.lock().deny_connect = deny;
    }

    pub fn fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    /// What service discovery reports; `None` means the service is missing.
    pub fn set_channels(&self, channels: Option<DiscoveredChannels>) {
        self.lock().channels = channels;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&MockCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| matches(c)).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn emit(&self, event: RadioEvent<MockDevice, MockDevice>) {
        let mut inner = self.lock();
        inner.events.retain(|sender| sender.unbounded_send(event.clone()).is_ok());
    }

    pub fn advertise(&self, device: MockDevice, services: Vec<Uuid>) {
        self.emit(RadioEvent::Discovered { device, services });
    }

    /// The scale went away: its notification streams end and a disconnect is reported.
    pub fn drop_link(&self, device: MockDevice) {
        self.lock().notifications.remove(&device);
        self.emit(RadioEvent::Disconnected(device));
    }

    pub fn set_adapter(&self, state: AdapterState) {
        self.lock().adapter_state = state;
        self.emit(RadioEvent::AdapterState(state));
    }

    /// Returns the number of notification streams the payload was delivered to.
    pub fn notify(&self, device: MockDevice, characteristic: Uuid, payload: &str) -> usize {
        let mut inner = self.lock();
        let notification = Notification { characteristic, value: payload.as_bytes().to_vec() };
        match inner.notifications.get_mut(&device) {
            Some(senders) => {
                senders.retain(|sender| sender.unbounded_send(notification.clone()).is_ok());
                senders.len()
            },
            None => 0,
        }
    }
}

#[async_trait]
impl Radio for MockRadio {
    type Device = MockDevice;
    type DeviceId = MockDevice;

    fn device_id(&self, device: &MockDevice) -> MockDevice {
        *device
    }

    async fn events(&self) -> Result<BoxStream<'static, RadioEvent<MockDevice, MockDevice>>, DeviceError> {
        let (tx, rx) = unbounded();
        self.lock().events.push(tx);
        Ok(rx.boxed())
    }

    async fn adapter_state(&self) -> Result<AdapterState, DeviceError> {
        Ok(self.lock().adapter_state)
    }

    async fn start_scan(&self, service: Uuid) -> Result<(), DeviceError> {
        if self.lock().deny_scan {
            return Err(MockRadio::permission_denied());
        }
        self.record(MockCall::StartScan(service));
        Ok(())
    }

    async fn stop_scan(&self, service: Uuid) -> Result<(), DeviceError> {
        self.record(MockCall::StopScan(service));
        Ok(())
    }

    async fn connect(&self, device: &MockDevice) -> Result<(), DeviceError> {
        self.record(MockCall::Connect(*device));
        let inner = self.lock();
        if inner.deny_connect {
            return Err(MockRadio::permission_denied());
        }
        if inner.fail_connect {
            return Err(DeviceError::Radio("connection refused".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&self, device: &MockDevice) -> Result<(), DeviceError> {
        self.record(MockCall::Disconnect(*device));
        self.lock().notifications.remove(device);
        Ok(())
    }

    async fn discover(&self, device: &MockDevice, _identity: &DeviceIdentity) -> Result<Option<DiscoveredChannels>, DeviceError> {
        self.record(MockCall::Discover(*device));
        Ok(self.lock().channels)
    }

    async fn notifications(&self, device: &MockDevice) -> Result<BoxStream<'static, Notification>, DeviceError> {
        let (tx, rx) = unbounded();
        self.lock().notifications.entry(*device).or_default().push(tx);
        Ok(rx.boxed())
    }

    async fn subscribe(&self, device: &MockDevice, _service: Uuid, characteristic: Uuid) -> Result<(), DeviceError> {
        self.record(MockCall::Subscribe(*device, characteristic));
        if self.lock().fail_subscribe {
            return Err(DeviceError::Radio("descriptor write failed".to_string()));
        }
        Ok(())
    }

    async fn write(&self, device: &MockDevice, _service: Uuid, characteristic: Uuid, value: &[u8]) -> Result<(), DeviceError> {
        self.record(MockCall::Write(*device, characteristic, value.to_vec()));
        Ok(())
    }
}
