use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    On,
    Off,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterTransition {
    PoweredOn,
    PoweredOff,
}

/// Turns the radio's raw power state reports into ON/OFF transitions.
///
/// Platforms repeat state reports and sometimes report an unknown state while the adapter
/// settles; neither is a transition.
#[derive(Debug, Clone, Default)]
pub struct AdapterStateWatcher {
    last: Option<AdapterState>,
}

impl AdapterStateWatcher {
    pub fn new() -> Self {
        AdapterStateWatcher { last: None }
    }

    /// The adapter is assumed powered until it reports otherwise.
    pub fn is_powered(&self) -> bool {
        self.last != Some(AdapterState::Off)
    }

    pub fn observe(&mut self, state: AdapterState) -> Option<AdapterTransition> {
        if state == AdapterState::Unknown {
            debug!("Ignoring unknown adapter state");
            return None;
        }

        if self.last == Some(state) {
            return None;
        }

        let previous = self.last.replace(state);
        match state {
            AdapterState::On => {
                info!("Bluetooth adapter powered on");
                // the first report of a powered adapter is not a transition
                previous.map(|_| AdapterTransition::PoweredOn)
            },
            AdapterState::Off => {
                info!("Bluetooth adapter powered off");
                Some(AdapterTransition::PoweredOff)
            },
            AdapterState::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_then_on() {
        let mut watcher = AdapterStateWatcher::new();
        assert!(watcher.is_powered());

        assert_eq!(watcher.observe(AdapterState::Off), Some(AdapterTransition::PoweredOff));
        assert!(!watcher.is_powered());
        assert_eq!(watcher.observe(AdapterState::On), Some(AdapterTransition::PoweredOn));
        assert!(watcher.is_powered());
    }

    #[test]
    fn repeated_and_unknown_states_are_ignored() {
        let mut watcher = AdapterStateWatcher::new();

        assert_eq!(watcher.observe(AdapterState::Off), Some(AdapterTransition::PoweredOff));
        assert_eq!(watcher.observe(AdapterState::Off), None);
        assert_eq!(watcher.observe(AdapterState::Unknown), None);
        assert!(!watcher.is_powered());
    }

    #[test]
    fn initial_on_report_is_not_a_transition() {
        let mut watcher = AdapterStateWatcher::new();
        assert_eq!(watcher.observe(AdapterState::On), None);
        assert!(watcher.is_powered());
    }
}
