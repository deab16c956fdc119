use std::time::Duration;
use uuid::Uuid;

/**
 * How long (milliseconds) to wait after losing a scale before scanning for it again.
 */
pub const RECONNECT_DELAY: u64 = 5000;

/**
 * Identical payloads arriving within this many milliseconds of each other are treated as one.
 */
pub const DEBOUNCE_WINDOW: u64 = 500;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * The reminder command: a single byte with value 1, no framing.
 */
pub const COMMAND_REMINDER: [u8; 1] = [0x01];

/**
 * The Client Characteristic Configuration descriptor, written to enable notifications.
 */
pub const CLIENT_CHARACTERISTIC_CONFIG: &str = "00002902-0000-1000-8000-00805f9b34fb";

/**
 * At most this many scales are managed at the same time.
 */
pub const MAX_SCALES: usize = 3;

// Service / notify (scale => host) / write (host => scale) uuids of the known scales
pub const SCALE1_SERVICE: &str = "6d12c00c-d907-4af8-b4d5-42680cdbbe04";
pub const SCALE1_NOTIFY: &str = "c663891c-6163-43cc-9ad6-0771785fde9d";
pub const SCALE1_WRITE: &str = "ab36ebe1-b1a5-4c46-b4e6-d54f3fb53247";

pub const SCALE2_SERVICE: &str = "c2c6ca78-0b9a-4b20-a565-9cfdd49acf40";
pub const SCALE2_NOTIFY: &str = "12fe610e-7f1f-4113-979d-146b3a92f52b";
pub const SCALE2_WRITE: &str = "048e7728-d9fb-4879-9f18-39be069c271d";

pub const SCALE3_SERVICE: &str = "bb67e522-fd56-427c-9cb1-15c3a3d9d5dc";
pub const SCALE3_NOTIFY: &str = "e0cea94b-af76-478d-837a-ce6f8b084855";
pub const SCALE3_WRITE: &str = "26a60bc7-8356-434c-9e11-182edbb0a640";

pub fn reconnect_delay() -> Duration {
    Duration::from_millis(RECONNECT_DELAY)
}

pub fn debounce_window() -> Duration {
    Duration::from_millis(DEBOUNCE_WINDOW)
}

pub fn make_client_characteristic_config_uuid() -> Uuid {
    Uuid::parse_str(CLIENT_CHARACTERISTIC_CONFIG).unwrap()
}

pub fn make_uuid(value: &'static str) -> Uuid {
    Uuid::parse_str(value).unwrap()
}
