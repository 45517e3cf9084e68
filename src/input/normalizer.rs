//! Raw report -> logical button event normalization
//!
//! Kernel input devices emit the `MSC_SCAN` report immediately before the
//! `EV_KEY` report it belongs to, inside one `SYN_REPORT` group:
//!
//! ```text
//! EV_MSC MSC_SCAN  c0009
//! EV_KEY KEY_UNKNOWN 1
//! EV_SYN SYN_REPORT 0
//! ```
//!
//! The normalizer remembers the last scan code of the current group, hands
//! it to the next key report exactly once and forgets it at the group
//! boundary.

use super::keymap::{format_scan, key_name, ButtonMap};
use super::report::{EventFamily, RawReport, KEY_AUTOREPEAT, KEY_PRESS, KEY_RELEASE};
use crate::event::{ButtonEvent, EventType};
use std::collections::HashSet;
use std::sync::Arc;

/// A resolved key transition, before device identity and time are attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAction {
    pub key_code: u16,
    pub key_name: String,
    pub scan_code: Option<String>,
    pub button: String,
    pub event_type: EventType,
}

impl KeyAction {
    pub fn into_event(self, device_name: &str, device_path: &str, timestamp: f64) -> ButtonEvent {
        ButtonEvent {
            device_name: device_name.to_string(),
            device_path: device_path.to_string(),
            key_code: Some(self.key_code),
            key_name: self.key_name,
            scan_code: self.scan_code,
            button: self.button,
            timestamp,
            event_type: self.event_type,
        }
    }
}

/// Normalize one report.
///
/// `pending_scan` is the scan code captured earlier in the current batch; it
/// is updated by scan reports, consumed by press/release reports and cleared
/// by sync reports.
pub fn normalize(
    report: &RawReport,
    pending_scan: &mut Option<String>,
    map: &ButtonMap,
    ignore: &HashSet<String>,
) -> Option<KeyAction> {
    match report.family {
        EventFamily::Scan => {
            *pending_scan = Some(format_scan(report.value));
            None
        }
        EventFamily::Sync => {
            *pending_scan = None;
            None
        }
        EventFamily::Other => None,
        EventFamily::Key => {
            // Repeats are synthesized by the hold engine instead
            if report.value == KEY_AUTOREPEAT {
                return None;
            }

            let scan = pending_scan.take();

            let event_type = match report.value {
                KEY_PRESS => EventType::KeyDown,
                KEY_RELEASE => EventType::KeyUp,
                _ => return None,
            };

            if let Some(scan) = scan.as_deref() {
                if ignore.contains(scan) {
                    log::debug!("Ignoring key {} with scan code {}", report.code, scan);
                    return None;
                }
            }

            let name = key_name(report.code);
            let button = map.resolve(report.code, &name, scan.as_deref());

            Some(KeyAction {
                key_code: report.code,
                key_name: name,
                scan_code: scan,
                button,
                event_type,
            })
        }
    }
}

/// Per device session normalizer state
#[derive(Debug, Clone)]
pub struct Normalizer {
    map: Arc<ButtonMap>,
    ignore: Arc<HashSet<String>>,
    pending_scan: Option<String>,
}

impl Normalizer {
    pub fn new(map: Arc<ButtonMap>, ignore: Arc<HashSet<String>>) -> Self {
        Self {
            map,
            ignore,
            pending_scan: None,
        }
    }

    /// Feed one report, returning the key transition it completes, if any
    pub fn feed(&mut self, report: &RawReport) -> Option<KeyAction> {
        normalize(report, &mut self.pending_scan, &self.map, &self.ignore)
    }

    /// Scan code waiting for its key report
    pub fn pending_scan(&self) -> Option<&str> {
        self.pending_scan.as_deref()
    }

    /// Drop batch state (device closed)
    pub fn reset(&mut self) {
        self.pending_scan = None;
    }
}
