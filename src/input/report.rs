//! Raw input reports as decoded from the device

use std::time::SystemTime;

/// `EV_SYN` event type
pub const EV_SYN: u16 = 0x00;
/// `EV_KEY` event type
pub const EV_KEY: u16 = 0x01;
/// `EV_MSC` event type
pub const EV_MSC: u16 = 0x04;
/// `MSC_SCAN` code within `EV_MSC`
pub const MSC_SCAN: u16 = 0x04;

/// Value of a key-family report
pub const KEY_RELEASE: i32 = 0;
pub const KEY_PRESS: i32 = 1;
pub const KEY_AUTOREPEAT: i32 = 2;

/// Which family a raw report belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    /// Key press/release/repeat (`EV_KEY`)
    Key,
    /// Auxiliary scan code (`EV_MSC` / `MSC_SCAN`)
    Scan,
    /// Synchronization marker closing a batch (`EV_SYN`)
    Sync,
    /// Anything else the device reports (LEDs, other misc codes, ...)
    Other,
}

/// One decoded hardware report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawReport {
    pub family: EventFamily,
    pub code: u16,
    pub value: i32,
    pub timestamp: SystemTime,
}

impl RawReport {
    pub fn new(family: EventFamily, code: u16, value: i32, timestamp: SystemTime) -> Self {
        Self {
            family,
            code,
            value,
            timestamp,
        }
    }

    /// Classify a kernel `(type, code, value)` triple
    pub fn from_raw(event_type: u16, code: u16, value: i32, timestamp: SystemTime) -> Self {
        let family = match (event_type, code) {
            (EV_KEY, _) => EventFamily::Key,
            (EV_MSC, MSC_SCAN) => EventFamily::Scan,
            (EV_SYN, _) => EventFamily::Sync,
            _ => EventFamily::Other,
        };
        Self::new(family, code, value, timestamp)
    }

    pub fn key(code: u16, value: i32) -> Self {
        Self::new(EventFamily::Key, code, value, SystemTime::now())
    }

    pub fn scan(value: i32) -> Self {
        Self::new(EventFamily::Scan, MSC_SCAN, value, SystemTime::now())
    }

    pub fn sync() -> Self {
        Self::new(EventFamily::Sync, 0, 0, SystemTime::now())
    }
}

#[cfg(target_os = "linux")]
impl From<evdev::InputEvent> for RawReport {
    fn from(event: evdev::InputEvent) -> Self {
        Self::from_raw(
            event.event_type().0,
            event.code(),
            event.value(),
            event.timestamp(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_families() {
        let now = SystemTime::now();
        assert_eq!(RawReport::from_raw(EV_KEY, 103, 1, now).family, EventFamily::Key);
        assert_eq!(RawReport::from_raw(EV_MSC, MSC_SCAN, 0xc0009, now).family, EventFamily::Scan);
        assert_eq!(RawReport::from_raw(EV_SYN, 0, 0, now).family, EventFamily::Sync);
        // MSC_RAW is not a scan code
        assert_eq!(RawReport::from_raw(EV_MSC, 0x03, 7, now).family, EventFamily::Other);
        // EV_LED
        assert_eq!(RawReport::from_raw(0x11, 0, 1, now).family, EventFamily::Other);
    }

    #[test]
    fn constructors_set_family() {
        assert_eq!(RawReport::key(103, KEY_PRESS).family, EventFamily::Key);
        assert_eq!(RawReport::scan(0xc0009).value, 0xc0009);
        assert_eq!(RawReport::sync().family, EventFamily::Sync);
    }
}
