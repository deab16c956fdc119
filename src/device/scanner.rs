use log::debug;
use uuid::Uuid;

/// Single-shot discovery bookkeeping for one scale.
///
/// The scanner only tracks whether a scan for `service` is running and decides whether an
/// advertisement is a match; the unit driver performs the actual radio calls.
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    service: Uuid,
    active: bool,
}

impl DeviceScanner {
    pub fn new(service: Uuid) -> Self {
        DeviceScanner { service, active: false }
    }

    pub fn service(&self) -> Uuid {
        self.service
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns false if a scan was already running.
    pub fn start(&mut self) -> bool {
        if self.active {
            return false;
        }
        self.active = true;
        true
    }

    /// Idempotent; returns false if no scan was running.
    pub fn stop(&mut self) -> bool {
        let was_active = self.active;
        self.active = false;
        was_active
    }

    /// The first matching advertisement wins: a match stops the scan.
    pub fn offer(&mut self, services: &[Uuid]) -> bool {
        if !self.active {
            return false;
        }

        // Some environments ignore the scan filter, so check the service uuid again
        if !services.contains(&self.service) {
            debug!("Ignoring advertisement without service {}", self.service);
            return false;
        }

        self.active = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Uuid {
        Uuid::parse_str("6d12c00c-d907-4af8-b4d5-42680cdbbe04").unwrap()
    }

    #[test]
    fn first_match_stops_the_scan() {
        let mut scanner = DeviceScanner::new(service());
        assert!(scanner.start());

        assert!(scanner.offer(&[Uuid::nil(), service()]));
        assert!(!scanner.is_active());
        assert!(!scanner.offer(&[service()]));
    }

    #[test]
    fn other_services_do_not_match() {
        let mut scanner = DeviceScanner::new(service());
        scanner.start();

        assert!(!scanner.offer(&[]));
        assert!(!scanner.offer(&[Uuid::nil()]));
        assert!(scanner.is_active());
    }

    #[test]
    fn nothing_matches_while_stopped() {
        let mut scanner = DeviceScanner::new(service());
        assert!(!scanner.offer(&[service()]));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut scanner = DeviceScanner::new(service());
        assert!(!scanner.stop());
        assert!(scanner.start());
        assert!(!scanner.start());
        assert!(scanner.stop());
        assert!(!scanner.stop());
    }
}
