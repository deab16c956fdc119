use std::sync::Arc;
use std::time::Duration;
use futures::channel::mpsc::UnboundedReceiver;
use tokio::time::sleep;

use scale_link::config::types::Config;
use scale_link::device::adapter::AdapterState;
use scale_link::device::mock::{MockCall, MockRadio};
use scale_link::device::status::StatusPublisher;
use scale_link::device::types::{DeviceIdentity, EventKind, ScaleUpdate};
use scale_link::device::unit::{spawn_unit, ScaleUnit, UnitSettings};
use scale_link::sink::{EventSink, MemorySink};

const DEVICE: u32 = 7;

struct Harness {
    radio: MockRadio,
    sink: Arc<MemorySink>,
    identity: DeviceIdentity,
    unit: ScaleUnit,
    updates: UnboundedReceiver<ScaleUpdate>,
}

fn identity(index: usize) -> DeviceIdentity {
    Config::default().identities().remove(index)
}

fn start(radio: &MockRadio, sink: &Arc<MemorySink>, identity: DeviceIdentity) -> (ScaleUnit, UnboundedReceiver<ScaleUpdate>) {
    let status = StatusPublisher::new(identity.index);
    let updates = status.register();
    let sink: Arc<dyn EventSink> = sink.clone();
    let unit = spawn_unit(radio.clone(), identity, UnitSettings::default(), sink, status);
    (unit, updates)
}

fn harness_with(radio: MockRadio) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let identity = identity(0);
    let (unit, updates) = start(&radio, &sink, identity.clone());
    Harness { radio, sink, identity, unit, updates }
}

fn harness() -> Harness {
    harness_with(MockRadio::new())
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(1)).await;
    }
    panic!("timed out waiting until {}", what);
}

fn drain(updates: &mut UnboundedReceiver<ScaleUpdate>) -> Vec<ScaleUpdate> {
    let mut result = Vec::new();
    while let Ok(Some(update)) = updates.try_next() {
        result.push(update);
    }
    result
}

fn statuses(updates: &[ScaleUpdate]) -> Vec<String> {
    updates.iter()
        .filter_map(|update| match update {
            ScaleUpdate::Status(report) => Some(report.status.clone()),
            ScaleUpdate::Notice { .. } => None,
        })
        .collect()
}

fn notices(updates: &[ScaleUpdate]) -> Vec<String> {
    updates.iter()
        .filter_map(|update| match update {
            ScaleUpdate::Notice { text, .. } => Some(text.clone()),
            ScaleUpdate::Status(_) => None,
        })
        .collect()
}

fn is_start_scan(call: &MockCall) -> bool {
    matches!(call, MockCall::StartScan(_))
}

fn is_connect(call: &MockCall) -> bool {
    matches!(call, MockCall::Connect(_))
}

fn is_disconnect(call: &MockCall) -> bool {
    matches!(call, MockCall::Disconnect(_))
}

fn is_write(call: &MockCall) -> bool {
    matches!(call, MockCall::Write(..))
}

impl Harness {
    async fn connect(&mut self) {
        let radio = self.radio.clone();
        wait_until("scanning", || radio.count(is_start_scan) >= 1).await;

        self.radio.advertise(DEVICE, vec![self.identity.service]);

        let handle = self.unit.handle();
        wait_until("connected", || handle.status().connected).await;
    }
}

#[tokio::test(start_paused = true)]
async fn connects_and_delivers_measurements() {
    let mut h = harness();
    h.connect().await;

    // the scan is stopped on its own task, so only the connection steps have a fixed order
    let calls = h.radio.calls();
    assert!(calls.contains(&MockCall::StopScan(h.identity.service)));
    let link_calls: Vec<MockCall> = calls.into_iter()
        .filter(|call| !matches!(call, MockCall::StopScan(_)))
        .collect();
    assert_eq!(link_calls, vec![
        MockCall::StartScan(h.identity.service),
        MockCall::Connect(DEVICE),
        MockCall::Discover(DEVICE),
        MockCall::Subscribe(DEVICE, h.identity.notify),
    ]);

    let updates = drain(&mut h.updates);
    assert_eq!(statuses(&updates), vec!["Connected"]);
    assert_eq!(notices(&updates), vec![
        "Scanning for: Scale 1",
        "Found device: Scale 1",
        "Scale 1 Connected",
    ]);

    assert_eq!(h.radio.notify(DEVICE, h.identity.notify, "I 45.23 morning"), 1);
    let sink = h.sink.clone();
    wait_until("delivered", || sink.len() == 1).await;

    let events = h.sink.events(0);
    assert_eq!(events[0].kind, EventKind::Intake);
    assert_eq!(events[0].amount, 45.23);
    assert_eq!(events[0].label, "morning");

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_notifications_are_debounced() {
    let mut h = harness();
    h.connect().await;

    h.radio.notify(DEVICE, h.identity.notify, "R 250 refill");
    h.radio.notify(DEVICE, h.identity.notify, "R 250 refill");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.sink.len(), 1);

    // a different payload is never suppressed
    h.radio.notify(DEVICE, h.identity.notify, "I 12 sip");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.sink.len(), 2);

    sleep(Duration::from_millis(500)).await;
    h.radio.notify(DEVICE, h.identity.notify, "I 12 sip");
    let sink = h.sink.clone();
    wait_until("delivered", || sink.len() == 3).await;

    let kinds: Vec<EventKind> = h.sink.events(0).into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Refill, EventKind::Intake, EventKind::Intake]);

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_and_foreign_notifications_are_dropped() {
    let mut h = harness();
    h.connect().await;

    h.radio.notify(DEVICE, h.identity.notify, "I abc x");
    h.radio.notify(DEVICE, h.identity.notify, "I 12");
    h.radio.notify(DEVICE, h.identity.write, "I 12 other-characteristic");
    sleep(Duration::from_millis(100)).await;
    assert!(h.sink.is_empty());

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnects_once_after_the_delay() {
    let mut h = harness();
    h.connect().await;
    drain(&mut h.updates);
    h.radio.clear_calls();

    h.radio.drop_link(DEVICE);
    // a second disconnect callback for the same loss must not schedule another timer
    h.radio.drop_link(DEVICE);

    let handle = h.unit.handle();
    wait_until("reconnecting", || handle.status().status == "Reconnecting").await;

    let updates = drain(&mut h.updates);
    assert_eq!(statuses(&updates), vec!["Disconnected", "Reconnecting"]);
    assert_eq!(notices(&updates), vec!["Scale 1 Disconnected"]);
    assert_eq!(h.radio.count(is_disconnect), 1);

    sleep(Duration::from_millis(4900)).await;
    assert_eq!(h.radio.count(is_start_scan), 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.radio.count(is_start_scan), 1);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(h.radio.count(is_start_scan), 1);

    h.radio.advertise(DEVICE, vec![h.identity.service]);
    wait_until("connected again", || handle.status().connected).await;
    assert_eq!(h.radio.count(is_connect), 1);

    // the new link delivers
    h.radio.notify(DEVICE, h.identity.notify, "I 1 again");
    let sink = h.sink.clone();
    wait_until("delivered", || sink.len() == 1).await;

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn early_reconnect_cancels_the_timer() {
    let mut h = harness();
    h.connect().await;
    h.radio.clear_calls();

    h.radio.drop_link(DEVICE);
    let handle = h.unit.handle();
    wait_until("reconnecting", || handle.status().status == "Reconnecting").await;

    handle.start_discovery();
    let radio = h.radio.clone();
    wait_until("scanning", || radio.count(is_start_scan) == 1).await;

    h.radio.advertise(DEVICE, vec![h.identity.service]);
    wait_until("connected again", || handle.status().connected).await;

    // the cancelled timer must not start another scan
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.radio.count(is_start_scan), 1);
    assert_eq!(h.radio.count(is_connect), 1);
    assert!(handle.status().connected);

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_connect_is_retried() {
    let radio = MockRadio::new();
    radio.fail_connect(true);
    let h = harness_with(radio);

    let radio = h.radio.clone();
    wait_until("scanning", || radio.count(is_start_scan) == 1).await;
    h.radio.advertise(DEVICE, vec![h.identity.service]);

    let handle = h.unit.handle();
    wait_until("reconnecting", || handle.status().status == "Reconnecting").await;
    assert_eq!(h.radio.count(is_connect), 1);

    h.radio.fail_connect(false);
    sleep(Duration::from_millis(5100)).await;
    assert_eq!(h.radio.count(is_start_scan), 2);

    h.radio.advertise(DEVICE, vec![h.identity.service]);
    wait_until("connected", || handle.status().connected).await;

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn subscription_failure_still_connects() {
    let radio = MockRadio::new();
    radio.fail_subscribe(true);
    let mut h = harness_with(radio);
    h.connect().await;

    h.radio.notify(DEVICE, h.identity.notify, "I 1 x");
    sleep(Duration::from_millis(100)).await;
    assert!(h.sink.is_empty());

    // writes still work without notifications
    h.unit.handle().send_reminder();
    let radio = h.radio.clone();
    wait_until("reminder written", || radio.count(is_write) == 1).await;

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reminder_is_only_sent_when_connected() {
    let mut h = harness();
    let handle = h.unit.handle();

    handle.send_reminder();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.radio.count(is_write), 0);

    h.connect().await;
    handle.send_reminder();
    let radio = h.radio.clone();
    wait_until("reminder written", || radio.count(is_write) == 1).await;
    assert!(h.radio.calls().contains(&MockCall::Write(DEVICE, h.identity.write, vec![0x01])));

    h.radio.drop_link(DEVICE);
    wait_until("reconnecting", || handle.status().status == "Reconnecting").await;
    handle.send_reminder();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.radio.count(is_write), 1);

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn adapter_off_closes_and_on_rescans() {
    let mut h = harness();
    h.connect().await;
    drain(&mut h.updates);

    h.radio.set_adapter(AdapterState::Off);
    let handle = h.unit.handle();
    wait_until("closed", || handle.status().status == "Bluetooth off").await;
    let radio = h.radio.clone();
    wait_until("released", || radio.count(is_disconnect) == 1).await;

    // no reconnect while bluetooth is off
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.radio.count(is_start_scan), 1);

    // unknown states are ignored
    h.radio.set_adapter(AdapterState::Unknown);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.radio.count(is_start_scan), 1);

    h.radio.set_adapter(AdapterState::On);
    wait_until("scanning again", || radio.count(is_start_scan) == 2).await;

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_scan_permission_is_a_no_op() {
    let radio = MockRadio::new();
    radio.deny_scan(true);
    let h = harness_with(radio);

    sleep(Duration::from_millis(100)).await;
    h.radio.advertise(DEVICE, vec![h.identity.service]);
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.radio.count(is_connect), 0);
    assert_eq!(h.unit.handle().status().status, "Disconnected");

    // once the permission is granted, scanning can be requested again
    h.radio.deny_scan(false);
    h.unit.handle().start_discovery();
    let radio = h.radio.clone();
    wait_until("scanning", || radio.count(is_start_scan) == 1).await;

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_discovery_cancels_the_pending_reconnect() {
    let mut h = harness();
    h.connect().await;
    h.radio.clear_calls();

    h.radio.drop_link(DEVICE);
    let handle = h.unit.handle();
    wait_until("reconnecting", || handle.status().status == "Reconnecting").await;

    handle.stop_discovery();
    wait_until("disconnected", || handle.status().status == "Disconnected").await;

    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.radio.count(is_start_scan), 0);

    h.unit.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_and_is_idempotent() {
    let mut h = harness();
    h.connect().await;

    let handle = h.unit.handle();
    handle.shutdown();
    handle.shutdown();
    h.unit.shutdown().await;

    assert_eq!(h.radio.count(is_disconnect), 1);

    // commands after shutdown are dropped
    handle.start_discovery();
    handle.shutdown();
    h.radio.drop_link(DEVICE);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.radio.count(is_start_scan), 1);
    assert_eq!(h.sink.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn scales_only_connect_to_their_own_service() {
    let radio = MockRadio::new();
    let sink = Arc::new(MemorySink::new());
    let (first, _first_updates) = start(&radio, &sink, identity(0));
    let (second, _second_updates) = start(&radio, &sink, identity(1));

    wait_until("both scanning", || radio.count(is_start_scan) == 2).await;

    let scale2 = identity(1);
    radio.advertise(11, vec![scale2.service]);

    let second_handle = second.handle();
    wait_until("scale 2 connected", || second_handle.status().connected).await;
    assert!(!first.handle().status().connected);
    assert_eq!(radio.count(is_connect), 1);
    assert!(radio.calls().contains(&MockCall::Connect(11)));

    radio.notify(11, scale2.notify, "I 30 lunch");
    wait_until("delivered", || sink.len() == 1).await;
    assert_eq!(sink.events(1).len(), 1);
    assert!(sink.events(0).is_empty());

    first.shutdown().await;
    second.shutdown().await;
}
