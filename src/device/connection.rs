use std::marker::PhantomData;
use std::time::{Duration, Instant, SystemTime};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::adapter::{AdapterState, AdapterStateWatcher, AdapterTransition};
use crate::device::constants::{reconnect_delay, COMMAND_REMINDER};
use crate::device::debounce::NotificationDebouncer;
use crate::device::parser::parse_at;
use crate::device::scanner::DeviceScanner;
use crate::device::status::STATUS_BLUETOOTH_OFF;
use crate::device::types::{ConnectionState, DeviceIdentity, ParsedEvent};

/// Which of the scale's channels service discovery found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredChannels {
    pub notify: bool,
    pub write: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFlag {
    NotSubscribed,
    Pending,
    Subscribed,
    Failed,
}

/// Completion of a radio operation, or a radio callback, for one connection attempt.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Up,
    Down(String),
    /// The link cannot be used because a permission is missing; not retried.
    Unavailable(String),
    /// `Ok(None)` when the service is not present on the scale.
    ServicesDiscovered(Result<Option<DiscoveredChannels>, String>),
    Subscribed(Result<(), String>),
    Notification {
        payload: Vec<u8>,
        received: Instant,
        received_at: SystemTime,
    },
}

#[derive(Debug, Clone)]
pub enum Input<D> {
    StartDiscovery,
    StopDiscovery,
    SendReminder,
    Shutdown,
    AdapterState(AdapterState),
    /// Starting the scan failed, most likely because of a missing permission.
    ScanUnavailable(String),
    Advertisement { device: D, services: Vec<Uuid> },
    Link { attempt: u64, event: LinkEvent },
    ReconnectTimerFired { generation: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action<D> {
    StartScan,
    StopScan,
    Connect { device: D, attempt: u64 },
    DiscoverServices { attempt: u64 },
    Subscribe { attempt: u64 },
    Write { attempt: u64, value: Vec<u8> },
    /// Disconnect and drop the device handle and everything tied to it.
    Release,
    ScheduleReconnect { delay: Duration, generation: u64 },
    CancelReconnect,
    Publish(ConnectionState),
    Report { status: String, connected: bool },
    Notice(String),
    Deliver(ParsedEvent),
}

/// Connection lifecycle of one scale.
///
/// Every radio callback, timer and operator command is an [`Input`]; [`handle`] applies it to
/// the state machine and returns the [`Action`]s the caller has to carry out. The controller
/// itself never touches the radio, so the caller decides how (and on which task) that happens.
///
/// [`handle`]: ConnectionController::handle
pub struct ConnectionController<D> {
    identity: DeviceIdentity,
    state: ConnectionState,
    adapter: AdapterStateWatcher,
    scanner: DeviceScanner,
    debouncer: NotificationDebouncer,
    subscription: SubscriptionFlag,
    channels: Option<DiscoveredChannels>,
    // incremented for every connection attempt; completions of older attempts are ignored
    attempt: u64,
    // generation of the pending reconnect timer, if any
    reconnect: Option<u64>,
    generation: u64,
    reconnect_delay: Duration,
    shut_down: bool,
    _device: PhantomData<D>,
}

impl<D> ConnectionController<D> {
    pub fn new(identity: DeviceIdentity) -> Self {
        ConnectionController::with_timing(identity, reconnect_delay(), NotificationDebouncer::default())
    }

    pub fn with_timing(identity: DeviceIdentity, reconnect_delay: Duration, debouncer: NotificationDebouncer) -> Self {
        let scanner = DeviceScanner::new(identity.service);

        ConnectionController {
            identity,
            state: ConnectionState::Idle,
            adapter: AdapterStateWatcher::new(),
            scanner,
            debouncer,
            subscription: SubscriptionFlag::NotSubscribed,
            channels: None,
            attempt: 0,
            reconnect: None,
            generation: 0,
            reconnect_delay,
            shut_down: false,
            _device: PhantomData,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn subscription(&self) -> SubscriptionFlag {
        self.subscription
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription == SubscriptionFlag::Subscribed
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_active()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn handle(&mut self, input: Input<D>) -> Vec<Action<D>> {
        let mut actions = Vec::new();

        if self.shut_down {
            debug!("{}: shut down, ignoring input", self.identity.name);
            return actions;
        }

        match input {
            Input::StartDiscovery => self.start_discovery(&mut actions),
            Input::StopDiscovery => self.stop_discovery(&mut actions),
            Input::SendReminder => self.send_reminder(&mut actions),
            Input::Shutdown => self.shutdown(&mut actions),
            Input::AdapterState(state) => match self.adapter.observe(state) {
                Some(AdapterTransition::PoweredOn) => self.start_discovery(&mut actions),
                Some(AdapterTransition::PoweredOff) => self.force_close(&mut actions),
                None => {},
            },
            Input::ScanUnavailable(reason) => {
                warn!("{}: scanning is not possible: {}", self.identity.name, reason);
                self.scanner.stop();
                if !self.state.has_link() {
                    self.fall_idle(&mut actions);
                }
            },
            Input::Advertisement { device, services } => {
                if self.scanner.offer(&services) {
                    actions.push(Action::StopScan);
                    actions.push(Action::Notice(format!("Found device: {}", self.identity.name)));
                    self.begin_connect(device, &mut actions);
                }
            },
            Input::Link { attempt, event } => {
                if attempt != self.attempt || !self.state.has_link() {
                    debug!("{}: ignoring {:?} of connection attempt {} in state {}", self.identity.name, event, attempt, self.state);
                } else {
                    self.on_link_event(event, &mut actions);
                }
            },
            Input::ReconnectTimerFired { generation } => self.on_reconnect_timer(generation, &mut actions),
        }

        actions
    }

    fn start_discovery(&mut self, actions: &mut Vec<Action<D>>) {
        if self.state.has_link() {
            debug!("{}: already {}, not scanning", self.identity.name, self.state);
            return;
        }

        if !self.adapter.is_powered() {
            info!("{}: bluetooth is off, scanning when it is turned on", self.identity.name);
            return;
        }

        if self.scanner.start() {
            actions.push(Action::StartScan);
            actions.push(Action::Notice(format!("Scanning for: {}", self.identity.name)));
        }

        // a scan started while reconnecting is still part of the reconnect
        if self.state != ConnectionState::Reconnecting {
            self.state = ConnectionState::Scanning;
        }
    }

    fn stop_discovery(&mut self, actions: &mut Vec<Action<D>>) {
        if self.scanner.stop() {
            actions.push(Action::StopScan);
        }

        if self.reconnect.take().is_some() {
            actions.push(Action::CancelReconnect);
        }

        if !self.state.has_link() {
            self.fall_idle(actions);
        }
    }

    fn fall_idle(&mut self, actions: &mut Vec<Action<D>>) {
        if self.state == ConnectionState::Reconnecting {
            self.state = ConnectionState::Idle;
            actions.push(Action::Publish(ConnectionState::Disconnected));
        } else {
            self.state = ConnectionState::Idle;
        }
    }

    fn begin_connect(&mut self, device: D, actions: &mut Vec<Action<D>>) {
        if self.reconnect.take().is_some() {
            actions.push(Action::CancelReconnect);
        }

        self.attempt += 1;
        self.subscription = SubscriptionFlag::NotSubscribed;
        self.channels = None;
        self.debouncer.reset();
        self.state = ConnectionState::Connecting;

        info!("{}: connecting (attempt {})", self.identity.name, self.attempt);
        actions.push(Action::Connect { device, attempt: self.attempt });
    }

    fn on_link_event(&mut self, event: LinkEvent, actions: &mut Vec<Action<D>>) {
        match event {
            LinkEvent::Up if self.state == ConnectionState::Connecting => {
                info!("{}: connected; discovering services", self.identity.name);
                self.state = ConnectionState::DiscoveringServices;
                actions.push(Action::DiscoverServices { attempt: self.attempt });
            },
            LinkEvent::Down(reason) => self.link_lost(&reason, actions),
            LinkEvent::Unavailable(reason) => {
                warn!("{}: cannot use the connection: {}", self.identity.name, reason);
                actions.push(Action::Release);
                self.subscription = SubscriptionFlag::NotSubscribed;
                self.channels = None;
                self.state = ConnectionState::Idle;
                actions.push(Action::Publish(ConnectionState::Disconnected));
            },
            LinkEvent::ServicesDiscovered(result) => self.on_services_discovered(result, actions),
            LinkEvent::Subscribed(result) if self.state == ConnectionState::Subscribing => {
                match result {
                    Ok(()) => {
                        self.subscription = SubscriptionFlag::Subscribed;
                    },
                    Err(err) => {
                        // not retried; the next reconnect subscribes again
                        warn!("{}: enabling notifications failed: {}", self.identity.name, err);
                        self.subscription = SubscriptionFlag::Failed;
                    },
                }
                self.state = ConnectionState::Connected;
                actions.push(Action::Publish(ConnectionState::Connected));
                actions.push(Action::Notice(format!("{} Connected", self.identity.name)));
            },
            LinkEvent::Notification { payload, received, received_at }
                if matches!(self.state, ConnectionState::Subscribing | ConnectionState::Connected) => {
                self.on_notification(&payload, received, received_at, actions);
            },
            event => {
                debug!("{}: ignoring {:?} in state {}", self.identity.name, event, self.state);
            },
        }
    }

    fn on_services_discovered(&mut self, result: Result<Option<DiscoveredChannels>, String>, actions: &mut Vec<Action<D>>) {
        let channels = match result {
            Ok(Some(channels)) if channels.notify => channels,
            Ok(_) if self.state == ConnectionState::DiscoveringServices => {
                return self.link_lost("service or notify characteristic not found", actions);
            },
            Err(err) if self.state == ConnectionState::DiscoveringServices => {
                return self.link_lost(&format!("service discovery failed: {}", err), actions);
            },
            other => {
                debug!("{}: ignoring discovery result {:?} in state {}", self.identity.name, other, self.state);
                return;
            },
        };

        self.channels = Some(channels);

        if self.subscription != SubscriptionFlag::NotSubscribed {
            debug!("{}: services discovered again, already subscribed", self.identity.name);
            return;
        }

        info!("{}: subscribing to notifications", self.identity.name);
        self.subscription = SubscriptionFlag::Pending;
        self.state = ConnectionState::Subscribing;
        actions.push(Action::Subscribe { attempt: self.attempt });
    }

    fn on_notification(&mut self, payload: &[u8], received: Instant, received_at: SystemTime, actions: &mut Vec<Action<D>>) {
        let text = String::from_utf8_lossy(payload);
        debug!("{} => {}", self.identity.name, text);

        if !self.debouncer.accept(&text, received) {
            return;
        }

        match parse_at(&text, received_at) {
            Ok(event) => actions.push(Action::Deliver(event)),
            Err(err) => warn!("{}: dropping payload {:?}: {}", self.identity.name, text, err),
        }
    }

    fn link_lost(&mut self, reason: &str, actions: &mut Vec<Action<D>>) {
        warn!("{}: link lost while {}: {}", self.identity.name, self.state, reason);

        actions.push(Action::Release);
        self.subscription = SubscriptionFlag::NotSubscribed;
        self.channels = None;
        self.state = ConnectionState::Disconnected;
        actions.push(Action::Publish(ConnectionState::Disconnected));
        actions.push(Action::Notice(format!("{} Disconnected", self.identity.name)));

        self.schedule_reconnect(actions);
    }

    fn schedule_reconnect(&mut self, actions: &mut Vec<Action<D>>) {
        self.state = ConnectionState::Reconnecting;

        if self.reconnect.is_some() {
            debug!("{}: reconnect already scheduled", self.identity.name);
            return;
        }

        self.generation += 1;
        self.reconnect = Some(self.generation);
        actions.push(Action::ScheduleReconnect { delay: self.reconnect_delay, generation: self.generation });
        actions.push(Action::Publish(ConnectionState::Reconnecting));
    }

    fn on_reconnect_timer(&mut self, generation: u64, actions: &mut Vec<Action<D>>) {
        if self.reconnect != Some(generation) {
            debug!("{}: ignoring stale reconnect timer {}", self.identity.name, generation);
            return;
        }
        self.reconnect = None;

        if !self.adapter.is_powered() {
            info!("{}: bluetooth is off, not scanning", self.identity.name);
            return;
        }

        info!("{}: scanning again", self.identity.name);
        if self.scanner.start() {
            actions.push(Action::StartScan);
            actions.push(Action::Notice(format!("Scanning for: {}", self.identity.name)));
        }
    }

    fn send_reminder(&mut self, actions: &mut Vec<Action<D>>) {
        if self.state != ConnectionState::Connected {
            debug!("{}: not connected, reminder not sent", self.identity.name);
            return;
        }

        match self.channels {
            Some(DiscoveredChannels { write: true, .. }) => {
                actions.push(Action::Write { attempt: self.attempt, value: COMMAND_REMINDER.to_vec() });
            },
            _ => debug!("{}: write characteristic not resolved, reminder not sent", self.identity.name),
        }
    }

    fn release_all(&mut self, actions: &mut Vec<Action<D>>) {
        if self.scanner.stop() {
            actions.push(Action::StopScan);
        }

        if self.reconnect.take().is_some() {
            actions.push(Action::CancelReconnect);
        }

        if self.state.has_link() {
            actions.push(Action::Release);
        }

        self.subscription = SubscriptionFlag::NotSubscribed;
        self.channels = None;
        self.debouncer.reset();
        self.state = ConnectionState::Idle;
    }

    fn force_close(&mut self, actions: &mut Vec<Action<D>>) {
        info!("{}: bluetooth turned off, closing connection", self.identity.name);
        self.release_all(actions);
        actions.push(Action::Report { status: STATUS_BLUETOOTH_OFF.to_string(), connected: false });
    }

    fn shutdown(&mut self, actions: &mut Vec<Action<D>>) {
        info!("{}: shutting down", self.identity.name);
        self.release_all(actions);
        self.shut_down = true;
    }
}
