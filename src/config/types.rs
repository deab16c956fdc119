use std::collections::HashSet;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{
    make_uuid, DEBOUNCE_WINDOW, MAX_SCALES, RECONNECT_DELAY, SCALE1_NOTIFY, SCALE1_SERVICE,
    SCALE1_WRITE, SCALE2_NOTIFY, SCALE2_SERVICE, SCALE2_WRITE, SCALE3_NOTIFY, SCALE3_SERVICE,
    SCALE3_WRITE,
};
use crate::device::types::DeviceIdentity;
use crate::device::unit::UnitSettings;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleConfig {
    pub name: String,
    pub service: Uuid,
    pub notify: Uuid,
    pub write: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// The position in this list is the scale's index.
    pub scales: Vec<ScaleConfig>,
    pub reconnect_delay_ms: u64,
    pub debounce_window_ms: u64,
    pub auto_start: bool,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scales.is_empty() || self.scales.len() > MAX_SCALES {
            return Err(ConfigError::Invalid(format!(
                "expected 1 to {} scales, found {}", MAX_SCALES, self.scales.len()
            )));
        }

        let mut services = HashSet::new();
        for scale in &self.scales {
            if !services.insert(scale.service) {
                return Err(ConfigError::Invalid(format!("service {} is used by more than one scale", scale.service)));
            }
            if scale.notify == scale.write {
                return Err(ConfigError::Invalid(format!("{}: notify and write characteristic are the same", scale.name)));
            }
        }

        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnectDelayMs must be > 0".to_string()));
        }

        Ok(())
    }

    pub fn identities(&self) -> Vec<DeviceIdentity> {
        self.scales.iter()
            .enumerate()
            .map(|(index, scale)| DeviceIdentity {
                service: scale.service,
                notify: scale.notify,
                write: scale.write,
                index,
                name: scale.name.clone(),
            })
            .collect()
    }

    pub fn unit_settings(&self) -> UnitSettings {
        UnitSettings {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            debounce_window: Duration::from_millis(self.debounce_window_ms),
            auto_start: self.auto_start,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scales: vec![
                ScaleConfig {
                    name: "Scale 1".to_string(),
                    service: make_uuid(SCALE1_SERVICE),
                    notify: make_uuid(SCALE1_NOTIFY),
                    write: make_uuid(SCALE1_WRITE),
                },
                ScaleConfig {
                    name: "Scale 2".to_string(),
                    service: make_uuid(SCALE2_SERVICE),
                    notify: make_uuid(SCALE2_NOTIFY),
                    write: make_uuid(SCALE2_WRITE),
                },
                ScaleConfig {
                    name: "Scale 3".to_string(),
                    service: make_uuid(SCALE3_SERVICE),
                    notify: make_uuid(SCALE3_NOTIFY),
                    write: make_uuid(SCALE3_WRITE),
                },
            ],
            reconnect_delay_ms: RECONNECT_DELAY,
            debounce_window_ms: DEBOUNCE_WINDOW,
            auto_start: true,
        }
    }
}
