use std::time::{Duration, Instant};
use log::debug;

use crate::device::constants::debounce_window;

#[derive(Debug, Clone)]
struct DebounceRecord {
    payload: String,
    accepted_at: Instant,
}

/// Drops a payload when it repeats the previously accepted one within the debounce window.
///
/// Scales sometimes deliver the same notification twice in quick succession; a repeat after
/// the window has passed is a new measurement and is accepted.
#[derive(Debug, Clone)]
pub struct NotificationDebouncer {
    window: Duration,
    last: Option<DebounceRecord>,
}

impl NotificationDebouncer {
    pub fn new(window: Duration) -> Self {
        NotificationDebouncer { window, last: None }
    }

    pub fn accept(&mut self, payload: &str, now: Instant) -> bool {
        if let Some(last) = &self.last {
            let elapsed = now.saturating_duration_since(last.accepted_at);
            if last.payload == payload && elapsed < self.window {
                debug!("Skipping duplicate payload {:?} ({:?} after the previous one)", payload, elapsed);
                return false;
            }
        }

        self.last = Some(DebounceRecord {
            payload: payload.to_string(),
            accepted_at: now,
        });
        true
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for NotificationDebouncer {
    fn default() -> Self {
        NotificationDebouncer::new(debounce_window())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_payload_within_window_is_dropped() {
        let mut debouncer = NotificationDebouncer::default();
        let start = Instant::now();

        assert!(debouncer.accept("I 45.23 x", start));
        assert!(!debouncer.accept("I 45.23 x", start + Duration::from_millis(499)));
    }

    #[test]
    fn identical_payload_after_window_is_accepted() {
        let mut debouncer = NotificationDebouncer::default();
        let start = Instant::now();

        assert!(debouncer.accept("I 45.23 x", start));
        assert!(debouncer.accept("I 45.23 x", start + Duration::from_millis(500)));
        assert!(debouncer.accept("I 45.23 x", start + Duration::from_millis(1200)));
    }

    #[test]
    fn different_payload_is_always_accepted() {
        let mut debouncer = NotificationDebouncer::default();
        let start = Instant::now();

        assert!(debouncer.accept("I 45.23 x", start));
        assert!(debouncer.accept("R 200 x", start + Duration::from_millis(10)));
        // the record follows the last accepted payload
        assert!(debouncer.accept("I 45.23 x", start + Duration::from_millis(20)));
    }

    #[test]
    fn rejected_payload_does_not_extend_the_window() {
        let mut debouncer = NotificationDebouncer::default();
        let start = Instant::now();

        assert!(debouncer.accept("I 1 x", start));
        assert!(!debouncer.accept("I 1 x", start + Duration::from_millis(400)));
        assert!(debouncer.accept("I 1 x", start + Duration::from_millis(600)));
    }

    #[test]
    fn reset_forgets_the_last_payload() {
        let mut debouncer = NotificationDebouncer::default();
        let start = Instant::now();

        assert!(debouncer.accept("I 1 x", start));
        debouncer.reset();
        assert!(debouncer.accept("I 1 x", start + Duration::from_millis(1)));
    }
}
