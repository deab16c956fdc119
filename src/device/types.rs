use std::fmt;
use std::time::SystemTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed description of one scale: which service it advertises and where to find its channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub service: Uuid,
    /// scale => host
    pub notify: Uuid,
    /// host => scale
    pub write: Uuid,
    /// 0-based position of the scale
    pub index: usize,
    pub name: String,
}

impl DeviceIdentity {
    /// 1-based number shown to the operator ("Scale 1").
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    Subscribing,
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionState {
    /// States that mean a link to the scale exists, or is being established.
    pub fn has_link(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::DiscoveringServices
                | ConnectionState::Subscribing
                | ConnectionState::Connected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Scanning => "Scanning",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::DiscoveringServices => "Discovering services",
            ConnectionState::Subscribing => "Subscribing",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Reconnecting => "Reconnecting",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Intake,
    Refill,
    /// A type code the scale sent that we do not know, kept as-is.
    Other(String),
}

impl EventKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "I" => EventKind::Intake,
            "R" => EventKind::Refill,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            EventKind::Intake => "I",
            EventKind::Refill => "R",
            EventKind::Other(code) => code,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Intake => write!(f, "Intake"),
            EventKind::Refill => write!(f, "Refill"),
            EventKind::Other(code) => write!(f, "{}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedEvent {
    pub kind: EventKind,
    pub amount: f64,
    pub label: String,
    #[serde(with = "humantime_serde_compat")]
    pub received_at: SystemTime,
}

impl fmt::Display for ParsedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:.2} {}",
            humantime::format_rfc3339_seconds(self.received_at),
            self.kind,
            self.amount,
            self.label,
        )
    }
}

// SystemTime as an rfc3339 string
mod humantime_serde_compat {
    use std::time::SystemTime;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde::de::Error;

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_rfc3339_millis(*time).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_rfc3339_weak(&value).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub index: usize,
    pub status: String,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleUpdate {
    Status(StatusReport),
    /// Transient acknowledgment for the operator, e.g. "Found device: Scale 1".
    Notice { index: usize, text: String },
}
