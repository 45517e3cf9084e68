//! Logical button events and their wire payload

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;

/// Kind of logical button event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Button was pressed
    KeyDown,
    /// Button was released
    KeyUp,
    /// Synthetic repeat while the button stays down
    KeyHold,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyDown => "key_down",
            Self::KeyUp => "key_up",
            Self::KeyHold => "key_hold",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized button event, serialized as the notification payload.
///
/// Field names follow the payload shape consumed downstream:
///
/// ```json
/// {"device_name": "...", "device_path": "...", "key_code": 103,
///  "key_name": "KEY_UP", "scan_code": "c0042", "button": "up",
///  "ts": 1700000000.25, "type": "key_down"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ButtonEvent {
    pub device_name: String,
    pub device_path: String,
    pub key_code: Option<u16>,
    pub key_name: String,
    /// Lower-case hex without prefix
    pub scan_code: Option<String>,
    /// Resolved logical name, never empty
    pub button: String,
    /// Seconds since the Unix epoch
    #[serde(rename = "ts")]
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub event_type: EventType,
}

impl ButtonEvent {
    /// Copy of this event with a different type and timestamp
    pub fn with_type(&self, event_type: EventType, timestamp: f64) -> Self {
        Self {
            event_type,
            timestamp,
            ..self.clone()
        }
    }

    /// JSON payload for the notification sink
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for ButtonEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} dev={} code={} name={} scan={} button={}",
            self.event_type.as_str().to_uppercase(),
            self.device_path,
            self.key_code.map(|c| c.to_string()).unwrap_or_default(),
            self.key_name,
            self.scan_code.as_deref().unwrap_or(""),
            self.button,
        )
    }
}

/// Wall-clock source that never goes backwards.
///
/// Shared by the read loop and the hold scheduler so every event of a
/// device session carries a non-decreasing timestamp.
#[derive(Debug, Default)]
pub struct EventClock {
    last: Mutex<f64>,
}

impl EventClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in epoch seconds, clamped to the last value handed out
    pub fn now(&self) -> f64 {
        let wall = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        self.observe(wall)
    }

    /// Forget the last timestamp (new device session)
    pub fn reset(&self) {
        *self.last.lock() = 0.0;
    }

    fn observe(&self, wall: f64) -> f64 {
        let mut last = self.last.lock();
        if wall > *last {
            *last = wall;
        }
        *last
    }
}
