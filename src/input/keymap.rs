//! Button name tables and the key/scan code resolution rules

use std::collections::HashMap;
use std::sync::LazyLock;

/// `KEY_UNKNOWN`, reported for keys the kernel keymap has no code for
pub const KEY_UNKNOWN: u16 = 240;

/// Built-in key code -> button names for the ATV3 remote
pub static BUILTIN_KEYS: LazyLock<HashMap<u16, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    map.insert(116, "power");
    map.insert(139, "menu");
    map.insert(217, "mic");

    // D-pad
    map.insert(103, "up");
    map.insert(108, "down");
    map.insert(105, "left");
    map.insert(106, "right");
    map.insert(353, "ok");

    map.insert(158, "back");
    map.insert(172, "home");

    // Volume / channel rocker
    map.insert(113, "mute");
    map.insert(115, "vol_up");
    map.insert(114, "vol_down");
    map.insert(104, "ch_up");
    map.insert(109, "ch_down");

    map.insert(14, "tv_or_backspace");

    map
});

/// Built-in scan code (lower-case hex) -> button names
pub static BUILTIN_SCANS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // App buttons, all report KEY_UNKNOWN
    map.insert("c000a", "gear");
    map.insert("c0009", "youtube");
    map.insert("c000e", "netflix");
    map.insert("c0005", "disney_plus");
    map.insert("c0007", "google_play");

    map.insert("c0221", "mic");
    map.insert("700aa", "mic_extra");

    // D-pad consumer usages
    map.insert("c0041", "ok");
    map.insert("c0042", "up");
    map.insert("c0043", "down");
    map.insert("c0044", "left");
    map.insert("c0045", "right");

    map
});

/// Aliases applied to names derived from the symbolic key name
const DERIVED_ALIASES: &[(&str, &str)] = &[
    ("select", "ok"),
    ("enter", "ok"),
    ("esc", "back"),
    ("search", "mic"),
];

/// Symbolic kernel name for a key code, e.g. `KEY_UP`.
///
/// Codes without a symbolic name render as `KEY_<code>`.
#[cfg(target_os = "linux")]
pub fn key_name(code: u16) -> String {
    let name = format!("{:?}", evdev::Key::new(code));
    if name.starts_with("KEY_") || name.starts_with("BTN_") {
        name
    } else {
        format!("KEY_{}", code)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn key_name(code: u16) -> String {
    format!("KEY_{}", code)
}

/// Format a raw `MSC_SCAN` value as lower-case hex
pub fn format_scan(value: i32) -> String {
    format!("{:x}", value as u32)
}

/// Normalize a user supplied scan code (`0xC0009`, ` c0009 `) to table form
pub fn normalize_scan(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    lowered
        .strip_prefix("0x")
        .map(str::to_string)
        .unwrap_or(lowered)
}

/// Derive a button name from the symbolic key name.
///
/// `KEY_UP` derives to `up`; the aliases in [`DERIVED_ALIASES`] then map
/// `select`/`enter` to `ok`, `esc` to `back` and `search` to `mic`.
pub fn derive_button(code: u16, key_name: &str, scan: Option<&str>) -> String {
    if code == KEY_UNKNOWN {
        if let Some(scan) = scan {
            return format!("unknown_scan_{}", scan);
        }
    }

    match key_name.strip_prefix("KEY_") {
        Some(stripped) if !stripped.is_empty() => {
            let derived = stripped.to_lowercase();
            DERIVED_ALIASES
                .iter()
                .find(|(from, _)| *from == derived)
                .map(|(_, to)| to.to_string())
                .unwrap_or(derived)
        }
        _ => format!("key_{}", code),
    }
}

/// Resolved lookup tables: built-in maps with user overrides merged on top
#[derive(Debug, Clone)]
pub struct ButtonMap {
    keys: HashMap<u16, String>,
    scans: HashMap<String, String>,
    key_overrides: usize,
    scan_overrides: usize,
}

impl Default for ButtonMap {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ButtonMap {
    /// Built-in tables only
    pub fn builtin() -> Self {
        Self {
            keys: BUILTIN_KEYS
                .iter()
                .map(|(code, button)| (*code, button.to_string()))
                .collect(),
            scans: BUILTIN_SCANS
                .iter()
                .map(|(scan, button)| (scan.to_string(), button.to_string()))
                .collect(),
            key_overrides: 0,
            scan_overrides: 0,
        }
    }

    /// Built-in tables with overrides applied; an override wins on conflict
    pub fn with_overrides(
        key_overrides: &HashMap<u16, String>,
        scan_overrides: &HashMap<String, String>,
    ) -> Self {
        let mut map = Self::builtin();
        for (code, button) in key_overrides {
            map.keys.insert(*code, button.clone());
        }
        for (scan, button) in scan_overrides {
            map.scans.insert(normalize_scan(scan), button.clone());
        }
        map.key_overrides = key_overrides.len();
        map.scan_overrides = scan_overrides.len();
        map
    }

    pub fn key_button(&self, code: u16) -> Option<&str> {
        self.keys.get(&code).map(String::as_str)
    }

    pub fn scan_button(&self, scan: &str) -> Option<&str> {
        self.scans.get(scan).map(String::as_str)
    }

    /// Resolve the logical button: key code map, then scan map, then the
    /// name derived from `key_name`. Never returns an empty name.
    pub fn resolve(&self, code: u16, key_name: &str, scan: Option<&str>) -> String {
        if let Some(button) = self.key_button(code).filter(|b| !b.is_empty()) {
            return button.to_string();
        }
        if let Some(button) = scan
            .and_then(|s| self.scan_button(s))
            .filter(|b| !b.is_empty())
        {
            return button.to_string();
        }
        derive_button(code, key_name, scan)
    }

    pub fn key_entries(&self) -> usize {
        self.keys.len()
    }

    pub fn scan_entries(&self) -> usize {
        self.scans.len()
    }

    pub fn key_override_count(&self) -> usize {
        self.key_overrides
    }

    pub fn scan_override_count(&self) -> usize {
        self.scan_overrides
    }
}
