use std::sync::Arc;
use std::time::{Duration, SystemTime};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::connection::{Action, ConnectionController, Input, LinkEvent};
use crate::device::constants::{debounce_window, reconnect_delay, WRITE_DEADLINE};
use crate::device::debounce::NotificationDebouncer;
use crate::device::radio::{Radio, RadioEvent};
use crate::device::status::StatusPublisher;
use crate::device::types::{DeviceIdentity, StatusReport};
use crate::error::DeviceError;
use crate::sink::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSettings {
    pub reconnect_delay: Duration,
    pub debounce_window: Duration,
    /// Start scanning as soon as the unit runs.
    pub auto_start: bool,
}

impl Default for UnitSettings {
    fn default() -> Self {
        UnitSettings {
            reconnect_delay: reconnect_delay(),
            debounce_window: debounce_window(),
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartDiscovery,
    StopDiscovery,
    SendReminder,
    Shutdown,
}

/// Operator commands for one scale. Cheap to clone; commands are queued to the unit's task.
#[derive(Clone)]
pub struct ScaleHandle {
    index: usize,
    name: String,
    commands: UnboundedSender<Command>,
    status: StatusPublisher,
}

impl ScaleHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_discovery(&self) {
        self.send(Command::StartDiscovery);
    }

    pub fn stop_discovery(&self) {
        self.send(Command::StopDiscovery);
    }

    /// Fire-and-forget; dropped unless the scale is connected.
    pub fn send_reminder(&self) {
        self.send(Command::SendReminder);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn status(&self) -> StatusReport {
        self.status.snapshot()
    }

    pub fn status_publisher(&self) -> &StatusPublisher {
        &self.status
    }

    fn send(&self, command: Command) {
        if self.commands.unbounded_send(command).is_err() {
            debug!("{}: unit stopped, dropping {:?}", self.name, command);
        }
    }
}

/// One running scale: the task that owns its connection state machine.
pub struct ScaleUnit {
    handle: ScaleHandle,
    join: JoinHandle<()>,
}

impl ScaleUnit {
    pub fn handle(&self) -> ScaleHandle {
        self.handle.clone()
    }

    /// Shuts the unit down and waits until its connection is released.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(err) = self.join.await {
            error!("{}: unit task failed: {:?}", self.handle.name, err);
        }
    }
}

pub fn spawn_unit<R: Radio>(
    radio: R,
    identity: DeviceIdentity,
    settings: UnitSettings,
    sink: Arc<dyn EventSink>,
    status: StatusPublisher,
) -> ScaleUnit {
    let (command_tx, command_rx) = unbounded::<Command>();

    let handle = ScaleHandle {
        index: identity.index,
        name: identity.name.clone(),
        commands: command_tx,
        status: status.clone(),
    };

    let join = spawn(run_unit(radio, identity, settings, sink, status, command_rx));

    ScaleUnit { handle, join }
}

struct Link<D> {
    device: D,
    attempt: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
enum ScanOp {
    Start,
    Stop,
}

struct UnitDriver<R: Radio> {
    radio: R,
    identity: DeviceIdentity,
    controller: ConnectionController<R::Device>,
    sink: Arc<dyn EventSink>,
    status: StatusPublisher,
    feedback: UnboundedSender<Input<R::Device>>,
    scan_ops: UnboundedSender<ScanOp>,
    link: Option<Link<R::Device>>,
    reconnect_cancel: Option<CancellationToken>,
    // parent of every token handed to a spawned task
    cancel: CancellationToken,
    releases: Vec<JoinHandle<()>>,
}

async fn run_unit<R: Radio>(
    radio: R,
    identity: DeviceIdentity,
    settings: UnitSettings,
    sink: Arc<dyn EventSink>,
    status: StatusPublisher,
    mut commands: UnboundedReceiver<Command>,
) {
    let (feedback_tx, mut feedback_rx) = unbounded::<Input<R::Device>>();
    let (scan_tx, scan_rx) = unbounded::<ScanOp>();
    let scan_worker = spawn(scan_worker(radio.clone(), identity.clone(), scan_rx, feedback_tx.clone()));

    let controller = ConnectionController::with_timing(
        identity.clone(),
        settings.reconnect_delay,
        NotificationDebouncer::new(settings.debounce_window),
    );

    let mut driver = UnitDriver {
        radio: radio.clone(),
        identity,
        controller,
        sink,
        status,
        feedback: feedback_tx,
        scan_ops: scan_tx,
        link: None,
        reconnect_cancel: None,
        cancel: CancellationToken::new(),
        releases: Vec::new(),
    };

    let mut radio_events: BoxStream<'static, RadioEvent<R::Device, R::DeviceId>> = match radio.events().await {
        Ok(v) => v,
        Err(err) => {
            error!("{}: cannot receive bluetooth events, the scale will not be found: {}", driver.identity.name, err);
            stream::pending().boxed()
        },
    };

    match radio.adapter_state().await {
        Ok(state) => driver.apply(Input::AdapterState(state)),
        Err(err) => debug!("{}: adapter state unknown: {}", driver.identity.name, err),
    }

    if settings.auto_start {
        driver.apply(Input::StartDiscovery);
    }

    while !driver.controller.is_shut_down() {
        let input = tokio::select! {
            command = commands.next() => match command {
                Some(Command::StartDiscovery) => Input::StartDiscovery,
                Some(Command::StopDiscovery) => Input::StopDiscovery,
                Some(Command::SendReminder) => Input::SendReminder,
                // every handle is gone, nobody can use this scale anymore
                Some(Command::Shutdown) | None => Input::Shutdown,
            },
            Some(event) = radio_events.next() => match driver.translate(event) {
                Some(input) => input,
                None => continue,
            },
            Some(input) = feedback_rx.next() => input,
        };

        driver.apply(input);
    }

    driver.finish(scan_worker).await;
}

async fn scan_worker<R: Radio>(
    radio: R,
    identity: DeviceIdentity,
    mut ops: UnboundedReceiver<ScanOp>,
    feedback: UnboundedSender<Input<R::Device>>,
) {
    // scan requests are carried out in order, so a quick start/stop never leaves a scan running
    while let Some(op) = ops.next().await {
        match op {
            ScanOp::Start => {
                if let Err(err) = radio.start_scan(identity.service).await {
                    if err.is_permission_error() {
                        warn!("{}: no permission to scan for bluetooth devices", identity.name);
                    }
                    let _ = feedback.unbounded_send(Input::ScanUnavailable(err.to_string()));
                }
            },
            ScanOp::Stop => {
                if let Err(err) = radio.stop_scan(identity.service).await {
                    debug!("{}: stopping scan failed: {}", identity.name, err);
                }
            },
        }
    }
}

fn link_failure(err: DeviceError) -> LinkEvent {
    if err.is_permission_error() {
        LinkEvent::Unavailable(err.to_string())
    } else {
        LinkEvent::Down(err.to_string())
    }
}

impl<R: Radio> UnitDriver<R> {
    fn translate(&self, event: RadioEvent<R::Device, R::DeviceId>) -> Option<Input<R::Device>> {
        match event {
            RadioEvent::AdapterState(state) => Some(Input::AdapterState(state)),
            RadioEvent::Discovered { device, services } => {
                if !self.controller.is_scanning() {
                    return None;
                }
                Some(Input::Advertisement { device, services })
            },
            RadioEvent::Disconnected(id) => {
                let link = self.link.as_ref()?;
                if self.radio.device_id(&link.device) != id {
                    return None;
                }
                Some(Input::Link { attempt: link.attempt, event: LinkEvent::Down("disconnected".to_string()) })
            },
        }
    }

    fn apply(&mut self, input: Input<R::Device>) {
        for action in self.controller.handle(input) {
            self.execute(action);
        }
    }

    fn current_link(&self, attempt: u64) -> Option<(R::Device, CancellationToken)> {
        match &self.link {
            Some(link) if link.attempt == attempt => Some((link.device.clone(), link.cancel.clone())),
            _ => {
                debug!("{}: no link for attempt {}", self.identity.name, attempt);
                None
            },
        }
    }

    fn report(&self, attempt: u64) -> impl Fn(LinkEvent) + Send + 'static {
        let feedback = self.feedback.clone();
        move |event| {
            let _ = feedback.unbounded_send(Input::Link { attempt, event });
        }
    }

    fn execute(&mut self, action: Action<R::Device>) {
        match action {
            Action::StartScan => {
                let _ = self.scan_ops.unbounded_send(ScanOp::Start);
            },
            Action::StopScan => {
                let _ = self.scan_ops.unbounded_send(ScanOp::Stop);
            },
            Action::Connect { device, attempt } => {
                let cancel = self.cancel.child_token();
                self.link = Some(Link { device: device.clone(), attempt, cancel: cancel.clone() });

                let radio = self.radio.clone();
                let report = self.report(attempt);
                spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {},
                        result = radio.connect(&device) => match result {
                            Ok(()) => report(LinkEvent::Up),
                            Err(err) => report(link_failure(err)),
                        },
                    }
                });
            },
            Action::DiscoverServices { attempt } => {
                let Some((device, cancel)) = self.current_link(attempt) else { return };
                let radio = self.radio.clone();
                let identity = self.identity.clone();
                let report = self.report(attempt);
                spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {},
                        result = radio.discover(&device, &identity) => match result {
                            Ok(channels) => report(LinkEvent::ServicesDiscovered(Ok(channels))),
                            Err(err) if err.is_permission_error() => report(link_failure(err)),
                            Err(err) => report(LinkEvent::ServicesDiscovered(Err(err.to_string()))),
                        },
                    }
                });
            },
            Action::Subscribe { attempt } => {
                let Some((device, cancel)) = self.current_link(attempt) else { return };
                spawn(read_notifications_task(
                    self.radio.clone(),
                    self.identity.clone(),
                    device,
                    cancel,
                    self.report(attempt),
                ));
            },
            Action::Write { attempt, value } => {
                let Some((device, cancel)) = self.current_link(attempt) else { return };
                let radio = self.radio.clone();
                let identity = self.identity.clone();
                spawn(async move {
                    let fut = radio.write(&device, identity.service, identity.write, &value);
                    tokio::select! {
                        _ = cancel.cancelled() => {},
                        result = timeout(Duration::from_millis(WRITE_DEADLINE), fut) => match result {
                            Err(_) => warn!("{}: sending the reminder took too long", identity.name),
                            Ok(Err(err)) => warn!("{}: failed to send the reminder: {}", identity.name, err),
                            Ok(Ok(())) => info!("{}: reminder sent", identity.name),
                        },
                    }
                });
            },
            Action::Release => {
                let Some(link) = self.link.take() else { return };
                link.cancel.cancel();

                let radio = self.radio.clone();
                let name = self.identity.name.clone();
                self.releases.retain(|handle| !handle.is_finished());
                self.releases.push(spawn(async move {
                    if let Err(err) = radio.disconnect(&link.device).await {
                        debug!("{}: releasing the connection failed: {}", name, err);
                    }
                }));
            },
            Action::ScheduleReconnect { delay, generation } => {
                if let Some(previous) = self.reconnect_cancel.take() {
                    previous.cancel();
                }
                let cancel = self.cancel.child_token();
                self.reconnect_cancel = Some(cancel.clone());

                info!("{}: reconnecting in {}", self.identity.name, humantime::format_duration(delay));
                let feedback = self.feedback.clone();
                spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {},
                        _ = sleep(delay) => {
                            let _ = feedback.unbounded_send(Input::ReconnectTimerFired { generation });
                        },
                    }
                });
            },
            Action::CancelReconnect => {
                if let Some(cancel) = self.reconnect_cancel.take() {
                    cancel.cancel();
                }
            },
            Action::Publish(state) => self.status.update(state),
            Action::Report { status, connected } => self.status.report(&status, connected),
            Action::Notice(text) => self.status.notice(text),
            Action::Deliver(event) => self.sink.append(self.identity.index, event),
        }
    }

    async fn finish(self, scan_worker: JoinHandle<()>) {
        let UnitDriver { identity, cancel, scan_ops, releases, .. } = self;
        cancel.cancel();

        // the worker drains the queued stop before it ends
        drop(scan_ops);
        if let Err(err) = scan_worker.await {
            error!("{}: scan worker failed: {:?}", identity.name, err);
        }

        for release in releases {
            if let Err(err) = release.await {
                error!("{}: releasing the connection failed: {:?}", identity.name, err);
            }
        }

        info!("{}: stopped", identity.name);
    }
}

async fn read_notifications_task<R: Radio>(
    radio: R,
    identity: DeviceIdentity,
    device: R::Device,
    cancel: CancellationToken,
    report: impl Fn(LinkEvent) + Send + 'static,
) {
    // listen before subscribing so that the first notification is not missed
    let mut notification_stream = match radio.notifications(&device).await {
        Ok(v) => v,
        Err(err) => {
            report(LinkEvent::Subscribed(Err(err.to_string())));
            return;
        },
    };

    let result = tokio::select! {
        _ = cancel.cancelled() => return,
        result = radio.subscribe(&device, identity.service, identity.notify) => result,
    };

    let subscribed = result.is_ok();
    report(LinkEvent::Subscribed(result.map_err(|err| err.to_string())));
    if !subscribed {
        return;
    }

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            data = notification_stream.next() => match data {
                Some(data) if data.characteristic == identity.notify => {
                    report(LinkEvent::Notification {
                        payload: data.value,
                        received: Instant::now().into_std(),
                        received_at: SystemTime::now(),
                    });
                },
                Some(_) => {},
                None => {
                    debug!("{}: notification stream ended", identity.name);
                    break 'mainloop;
                },
            },
        }
    }
}
