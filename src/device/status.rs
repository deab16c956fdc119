use std::sync::{Arc, Mutex};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::{debug, info};

use crate::device::types::{ConnectionState, ScaleUpdate, StatusReport};

pub const STATUS_CONNECTED: &str = "Connected";
pub const STATUS_DISCONNECTED: &str = "Disconnected";
pub const STATUS_RECONNECTING: &str = "Reconnecting";
pub const STATUS_BLUETOOTH_OFF: &str = "Bluetooth off";

struct StatusInner {
    status: String,
    connected: bool,
    observer: Option<UnboundedSender<ScaleUpdate>>,
}

/// Last known status of one scale plus the single observer slot.
///
/// Updates are made from the unit's task and delivered to the observer through a channel, so
/// the observer consumes them on whatever task or thread owns the receiver.
#[derive(Clone)]
pub struct StatusPublisher {
    index: usize,
    inner: Arc<Mutex<StatusInner>>,
}

impl StatusPublisher {
    pub fn new(index: usize) -> Self {
        StatusPublisher {
            index,
            inner: Arc::new(Mutex::new(StatusInner {
                status: STATUS_DISCONNECTED.to_string(),
                connected: false,
                observer: None,
            })),
        }
    }

    /// Registers the observer, replacing any previous one.
    pub fn register(&self) -> UnboundedReceiver<ScaleUpdate> {
        let (tx, rx) = unbounded();
        self.register_sender(tx);
        rx
    }

    /// Registers an existing channel, so that several scales can report to one observer.
    pub fn register_sender(&self, sender: UnboundedSender<ScaleUpdate>) {
        let mut inner = self.inner.lock().expect("Failed to lock StatusPublisher inner");
        inner.observer = Some(sender);
    }

    pub fn snapshot(&self) -> StatusReport {
        let inner = self.inner.lock().expect("Failed to lock StatusPublisher inner");
        StatusReport {
            index: self.index,
            status: inner.status.clone(),
            connected: inner.connected,
        }
    }

    /// Publishes the status for `state`; states that are not observable are ignored.
    pub fn update(&self, state: ConnectionState) {
        let (status, connected) = match state {
            ConnectionState::Connected => (STATUS_CONNECTED, true),
            ConnectionState::Disconnected => (STATUS_DISCONNECTED, false),
            ConnectionState::Reconnecting => (STATUS_RECONNECTING, false),
            other => {
                debug!("Scale {}: state {} is not reported", self.index + 1, other);
                return;
            },
        };
        self.publish(status.to_string(), connected);
    }

    /// Publishes a free-text status.
    pub fn report(&self, status: &str, connected: bool) {
        self.publish(status.to_string(), connected);
    }

    pub fn notice(&self, text: String) {
        info!("Scale {}: {}", self.index + 1, text);
        self.send(ScaleUpdate::Notice { index: self.index, text });
    }

    fn publish(&self, status: String, connected: bool) {
        let report = {
            let mut inner = self.inner.lock().expect("Failed to lock StatusPublisher inner");
            inner.status = status;
            inner.connected = connected;
            StatusReport {
                index: self.index,
                status: inner.status.clone(),
                connected,
            }
        };

        info!("Scale {}: {}", self.index + 1, report.status);
        self.send(ScaleUpdate::Status(report));
    }

    fn send(&self, update: ScaleUpdate) {
        let mut inner = self.inner.lock().expect("Failed to lock StatusPublisher inner");
        if let Some(observer) = &inner.observer {
            if observer.unbounded_send(update).is_err() {
                debug!("Status observer of scale {} went away", self.index + 1);
                inner.observer = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let publisher = StatusPublisher::new(1);
        assert_eq!(publisher.snapshot(), StatusReport {
            index: 1,
            status: "Disconnected".to_string(),
            connected: false,
        });
    }

    #[test]
    fn observable_states_reach_the_observer() {
        let publisher = StatusPublisher::new(2);
        let mut rx = publisher.register();

        publisher.update(ConnectionState::Connected);
        publisher.update(ConnectionState::Subscribing);
        publisher.update(ConnectionState::Reconnecting);

        assert_eq!(rx.try_next().unwrap(), Some(ScaleUpdate::Status(StatusReport {
            index: 2,
            status: "Connected".to_string(),
            connected: true,
        })));
        assert_eq!(rx.try_next().unwrap(), Some(ScaleUpdate::Status(StatusReport {
            index: 2,
            status: "Reconnecting".to_string(),
            connected: false,
        })));
        assert!(rx.try_next().is_err());
        assert_eq!(publisher.snapshot().status, "Reconnecting");
    }

    #[test]
    fn new_registration_replaces_the_old_one() {
        let publisher = StatusPublisher::new(0);
        let mut first = publisher.register();
        let mut second = publisher.register();

        publisher.report("Bluetooth off", false);

        // the first sender was dropped, so its stream has ended
        assert_eq!(first.try_next().unwrap(), None);
        assert!(matches!(second.try_next().unwrap(), Some(ScaleUpdate::Status(_))));
    }

    #[test]
    fn updates_without_observer_are_kept() {
        let publisher = StatusPublisher::new(0);
        publisher.update(ConnectionState::Connected);
        assert!(publisher.snapshot().connected);
    }
}
