//! Configuration loading and validation
//!
//! Options come from a flat key/value document. Inside a Home Assistant
//! add-on that is `/data/options.json`; elsewhere a TOML file can be passed
//! on the command line or placed in the platform config directory.
//!
//! ## Config File Locations
//!
//! | Source | Path |
//! |--------|------|
//! | Command line | first argument (`.json` or `.toml`) |
//! | Add-on | `/data/options.json` |
//! | Linux | `~/.config/evdev-bridge/config.toml` |
//!
//! Validation never fails: a malformed scalar is replaced by its default and
//! a malformed map or list entry is skipped. Each substitution is reported
//! as a [`ConfigWarning`].
//!
//! ## Example
//!
//! ```no_run
//! use evdev_bridge::Config;
//!
//! let raw = Config::load(None).unwrap_or_default();
//! let (config, warnings) = Config::from_options(&raw);
//! Config::log_warnings(&warnings);
//! println!("Hold repeat: {:?}", config.hold_repeat);
//! ```

use crate::input::keymap::{normalize_scan, ButtonMap};
use log::LevelFilter;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Options file written by the Supervisor for add-ons
pub const OPTIONS_PATH: &str = "/data/options.json";

pub const DEFAULT_TARGET_CONTAINS: &str = "Remoter ATV3";
pub const DEFAULT_EVENT_TYPE: &str = "atv3_evdev_bridge_command_received";
pub const DEFAULT_GRAB_DEVICE: bool = true;
pub const DEFAULT_IGNORE_SCANCODES: &str = "700aa";
pub const DEFAULT_HOLD_BUTTONS: &[&str] = &[
    "up", "down", "left", "right", "vol_up", "vol_down", "ch_up", "ch_down",
];
pub const DEFAULT_HOLD_DELAY: f64 = 0.25;
pub const DEFAULT_HOLD_REPEAT: f64 = 0.10;
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 256;
pub const DEFAULT_EVENT_POST_TIMEOUT: f64 = 3.0;
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Upper bound for every duration option (one day)
pub const MAX_DURATION_SECS: f64 = 86_400.0;
/// The queue allocates every slot up front
pub const MAX_EVENT_QUEUE_SIZE: usize = 65_536;

/// Raw, unvalidated options
pub type RawOptions = serde_json::Map<String, Value>;

/// Error type for loading the options document
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading the options file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Options file is not valid JSON
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    /// Options file is not valid TOML
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Options file parsed but is not a key/value table
    #[error("{0} does not contain a key/value table")]
    NotATable(PathBuf),
}

/// A value that was replaced by a default or skipped during validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub option: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Validated bridge configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Substring of the input device name to attach to
    pub target_contains: String,
    /// Name of the event fired on the notification sink
    pub event_type: String,
    /// Request exclusive access to the device
    pub grab_device: bool,
    /// Scan codes (lower-case hex) whose reports are dropped
    pub ignore_scancodes: HashSet<String>,
    /// Buttons that emit key_hold while pressed
    pub hold_buttons: HashSet<String>,
    pub key_map_overrides: HashMap<u16, String>,
    pub scan_map_overrides: HashMap<String, String>,
    /// Time from key_down to the first key_hold
    pub hold_delay: Duration,
    /// Time between key_hold repeats, always non-zero
    pub hold_repeat: Duration,
    pub event_queue_size: usize,
    pub event_post_timeout: Duration,
    pub log_level: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_contains: DEFAULT_TARGET_CONTAINS.to_string(),
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            grab_device: DEFAULT_GRAB_DEVICE,
            ignore_scancodes: [DEFAULT_IGNORE_SCANCODES.to_string()].into_iter().collect(),
            hold_buttons: DEFAULT_HOLD_BUTTONS.iter().map(|b| b.to_string()).collect(),
            key_map_overrides: HashMap::new(),
            scan_map_overrides: HashMap::new(),
            hold_delay: Duration::from_secs_f64(DEFAULT_HOLD_DELAY),
            hold_repeat: Duration::from_secs_f64(DEFAULT_HOLD_REPEAT),
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
            event_post_timeout: Duration::from_secs_f64(DEFAULT_EVENT_POST_TIMEOUT),
            log_level: DEFAULT_LOG_LEVEL,
        }
    }
}

/// Platform config file, e.g. `~/.config/evdev-bridge/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("evdev-bridge").join("config.toml"))
}

impl Config {
    /// Load the raw options document.
    ///
    /// An explicit `path` must exist. Otherwise the add-on options file and
    /// then the platform config file are tried; when neither exists the
    /// options are empty and every value takes its default.
    pub fn load(path: Option<&Path>) -> Result<RawOptions, ConfigError> {
        if let Some(path) = path {
            return Self::load_from(path);
        }

        let candidates = std::iter::once(PathBuf::from(OPTIONS_PATH)).chain(default_config_path());
        for candidate in candidates {
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        Ok(RawOptions::new())
    }

    /// Load options from a specific file; `.json` files are JSON, anything
    /// else is TOML
    pub fn load_from(path: &Path) -> Result<RawOptions, ConfigError> {
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(RawOptions::new());
        }

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let value: Value = if is_json {
            serde_json::from_str(&contents)?
        } else {
            let table: toml::Value = toml::from_str(&contents)?;
            serde_json::to_value(table)?
        };

        match value {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(RawOptions::new()),
            _ => Err(ConfigError::NotATable(path.to_path_buf())),
        }
    }

    /// Validate raw options, substituting defaults for anything malformed
    pub fn from_options(raw: &RawOptions) -> (Self, Vec<ConfigWarning>) {
        let mut v = Validator::default();

        let log_level = v.log_level(raw.get("log_level"));
        let target_contains = v.target_contains(raw.get("target_contains"));
        let event_type = v.event_type(raw.get("event_type"));
        let grab_device = v.boolean("grab_device", raw.get("grab_device"), DEFAULT_GRAB_DEVICE);
        let ignore_scancodes = v.ignore_scancodes(raw.get("ignore_scancodes"));
        let hold_buttons = v.hold_buttons(raw.get("hold_buttons"));
        let key_map_overrides = v.key_map_overrides(raw.get("key_map_overrides"));
        let scan_map_overrides = v.scan_map_overrides(raw.get("scan_map_overrides"));
        let hold_delay =
            v.non_negative_secs("hold_delay", raw.get("hold_delay"), DEFAULT_HOLD_DELAY);
        let hold_repeat =
            v.positive_secs("hold_repeat", raw.get("hold_repeat"), DEFAULT_HOLD_REPEAT);
        let event_queue_size = v.positive_int(
            "event_queue_size",
            raw.get("event_queue_size"),
            DEFAULT_EVENT_QUEUE_SIZE,
            MAX_EVENT_QUEUE_SIZE,
        );
        let event_post_timeout = v.positive_secs(
            "event_post_timeout",
            raw.get("event_post_timeout"),
            DEFAULT_EVENT_POST_TIMEOUT,
        );

        let config = Self {
            target_contains,
            event_type,
            grab_device,
            ignore_scancodes,
            hold_buttons,
            key_map_overrides,
            scan_map_overrides,
            hold_delay,
            hold_repeat,
            event_queue_size,
            event_post_timeout,
            log_level,
        };
        (config, v.warnings)
    }

    /// Log each validation warning once
    pub fn log_warnings(warnings: &[ConfigWarning]) {
        for warning in warnings {
            log::warn!("{}", warning);
        }
    }

    /// Built-in button tables with this config's overrides applied
    pub fn button_map(&self) -> ButtonMap {
        ButtonMap::with_overrides(&self.key_map_overrides, &self.scan_map_overrides)
    }

    /// Human readable startup summary
    pub fn summary_lines(&self) -> Vec<String> {
        let map = self.button_map();
        vec![
            format!("Target contains: '{}'", self.target_contains),
            format!("Output event_type: '{}'", self.event_type),
            format!("Grab device: {}", self.grab_device),
            format!("Ignore scancodes: {:?}", sorted(&self.ignore_scancodes)),
            format!("Hold buttons: {:?}", sorted(&self.hold_buttons)),
            format!(
                "Key map entries: {} (overrides={})",
                map.key_entries(),
                map.key_override_count()
            ),
            format!(
                "Scan map entries: {} (overrides={})",
                map.scan_entries(),
                map.scan_override_count()
            ),
            format!(
                "Hold: delay={}s repeat={}s",
                self.hold_delay.as_secs_f64(),
                self.hold_repeat.as_secs_f64()
            ),
            format!("Event queue size: {}", self.event_queue_size),
            format!("Event post timeout: {}s", self.event_post_timeout.as_secs_f64()),
        ]
    }
}

fn sorted(set: &HashSet<String>) -> Vec<&str> {
    let mut items: Vec<&str> = set.iter().map(String::as_str).collect();
    items.sort_unstable();
    items
}

/// Collects warnings while coercing raw values
#[derive(Default)]
struct Validator {
    warnings: Vec<ConfigWarning>,
}

impl Validator {
    fn warn(&mut self, option: &'static str, message: String) {
        self.warnings.push(ConfigWarning { option, message });
    }

    fn log_level(&mut self, raw: Option<&Value>) -> LevelFilter {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return DEFAULT_LOG_LEVEL;
        };
        let text = value_text(raw);
        match text.trim().to_uppercase().as_str() {
            "" => DEFAULT_LOG_LEVEL,
            "DEBUG" => LevelFilter::Debug,
            "INFO" => LevelFilter::Info,
            "WARN" | "WARNING" => LevelFilter::Warn,
            "ERROR" => LevelFilter::Error,
            _ => {
                self.warn("log_level", format!("Invalid log_level '{}', using INFO", text));
                DEFAULT_LOG_LEVEL
            }
        }
    }

    fn target_contains(&mut self, raw: Option<&Value>) -> String {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return DEFAULT_TARGET_CONTAINS.to_string();
        };
        let target = value_text(raw).trim().to_string();
        if target.is_empty() {
            self.warn(
                "target_contains",
                format!("target_contains is empty, using '{}'", DEFAULT_TARGET_CONTAINS),
            );
            return DEFAULT_TARGET_CONTAINS.to_string();
        }
        target
    }

    fn event_type(&mut self, raw: Option<&Value>) -> String {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return DEFAULT_EVENT_TYPE.to_string();
        };
        let event_type = value_text(raw).trim().to_string();
        if event_type.is_empty() {
            self.warn(
                "event_type",
                format!("event_type is empty, using '{}'", DEFAULT_EVENT_TYPE),
            );
            return DEFAULT_EVENT_TYPE.to_string();
        }
        if !is_valid_event_type(&event_type) {
            self.warn(
                "event_type",
                format!(
                    "event_type '{}' is invalid, using '{}'",
                    event_type, DEFAULT_EVENT_TYPE
                ),
            );
            return DEFAULT_EVENT_TYPE.to_string();
        }
        event_type
    }

    fn boolean(&mut self, name: &'static str, raw: Option<&Value>, default: bool) -> bool {
        let Some(raw) = raw.filter(|v| !v.is_null()) else {
            return default;
        };
        let parsed = match raw {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        };
        parsed.unwrap_or_else(|| {
            let message = format!("{}='{}' is invalid, using {}", name, value_text(raw), default);
            self.warn(name, message);
            default
        })
    }

    fn non_negative_secs(
        &mut self,
        name: &'static str,
        raw: Option<&Value>,
        default: f64,
    ) -> Duration {
        self.seconds(name, raw, default, false)
    }

    fn positive_secs(
        &mut self,
        name: &'static str,
        raw: Option<&Value>,
        default: f64,
    ) -> Duration {
        self.seconds(name, raw, default, true)
    }

    fn seconds(
        &mut self,
        name: &'static str,
        raw: Option<&Value>,
        default: f64,
        strictly_positive: bool,
    ) -> Duration {
        let Some(raw) = raw else {
            return Duration::from_secs_f64(default);
        };
        let Some(value) = value_f64(raw) else {
            let message = format!("{}='{}' is invalid, using {}", name, value_text(raw), default);
            self.warn(name, message);
            return Duration::from_secs_f64(default);
        };
        if strictly_positive && value <= 0.0 {
            self.warn(name, format!("{} must be > 0, using {}", name, default));
            return Duration::from_secs_f64(default);
        }
        if value < 0.0 {
            self.warn(name, format!("{} must be >= 0, using {}", name, default));
            return Duration::from_secs_f64(default);
        }
        if value > MAX_DURATION_SECS {
            self.warn(
                name,
                format!("{} must be <= {}, using {}", name, MAX_DURATION_SECS, default),
            );
            return Duration::from_secs_f64(default);
        }
        match Duration::try_from_secs_f64(value) {
            Ok(duration) => duration,
            Err(_) => {
                self.warn(name, format!("{}='{}' is out of range, using {}", name, value, default));
                Duration::from_secs_f64(default)
            }
        }
    }

    fn positive_int(
        &mut self,
        name: &'static str,
        raw: Option<&Value>,
        default: usize,
        max: usize,
    ) -> usize {
        let Some(raw) = raw else {
            return default;
        };
        let Some(value) = value_i64(raw) else {
            let message = format!("{}='{}' is invalid, using {}", name, value_text(raw), default);
            self.warn(name, message);
            return default;
        };
        if value <= 0 {
            self.warn(name, format!("{} must be > 0, using {}", name, default));
            return default;
        }
        match usize::try_from(value) {
            Ok(value) if value <= max => value,
            _ => {
                self.warn(name, format!("{} must be <= {}, using {}", name, max, default));
                default
            }
        }
    }

    fn ignore_scancodes(&mut self, raw: Option<&Value>) -> HashSet<String> {
        let candidates = match raw {
            None => vec![DEFAULT_IGNORE_SCANCODES.to_string()],
            Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(value_text).collect(),
            Some(other) => split_csv(&value_text(other)),
        };

        let mut out = HashSet::new();
        for candidate in candidates {
            let scan = normalize_scan(&candidate);
            if scan.is_empty() {
                continue;
            }
            if is_hex(&scan) {
                out.insert(scan);
            } else {
                self.warn(
                    "ignore_scancodes",
                    format!("Ignoring invalid scan code '{}' in ignore_scancodes", candidate),
                );
            }
        }
        out
    }

    fn hold_buttons(&mut self, raw: Option<&Value>) -> HashSet<String> {
        let candidates = match raw {
            Some(Value::Array(items)) => items.iter().map(value_text).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => split_csv(&value_text(other)),
        };
        if candidates.is_empty() {
            return DEFAULT_HOLD_BUTTONS.iter().map(|b| b.to_string()).collect();
        }

        let out: HashSet<String> = candidates
            .iter()
            .filter_map(|c| self.button_name(c, "hold_buttons"))
            .collect();

        if out.is_empty() {
            self.warn(
                "hold_buttons",
                format!(
                    "hold_buttons resolved to empty; using defaults ({})",
                    DEFAULT_HOLD_BUTTONS.join(",")
                ),
            );
            return DEFAULT_HOLD_BUTTONS.iter().map(|b| b.to_string()).collect();
        }
        out
    }

    fn key_map_overrides(&mut self, raw: Option<&Value>) -> HashMap<u16, String> {
        let mut out = HashMap::new();
        for (raw_key, raw_button) in self.mapping_pairs("key_map_overrides", raw) {
            let Some(code) = parse_int_auto(&raw_key).and_then(|c| u16::try_from(c).ok()) else {
                self.warn(
                    "key_map_overrides",
                    format!("Ignoring invalid keycode '{}' in key_map_overrides", raw_key),
                );
                continue;
            };
            if let Some(button) = self.button_name(&raw_button, "key_map_overrides") {
                out.insert(code, button);
            }
        }
        out
    }

    fn scan_map_overrides(&mut self, raw: Option<&Value>) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for (raw_key, raw_button) in self.mapping_pairs("scan_map_overrides", raw) {
            let scan = normalize_scan(&raw_key);
            if scan.is_empty() || !is_hex(&scan) {
                self.warn(
                    "scan_map_overrides",
                    format!("Ignoring invalid scan code '{}' in scan_map_overrides", raw_key),
                );
                continue;
            }
            if let Some(button) = self.button_name(&raw_button, "scan_map_overrides") {
                out.insert(scan, button);
            }
        }
        out
    }

    /// Accepts a JSON object, a JSON object encoded as a string, or
    /// comma-separated `key=value` / `key:value` pairs
    fn mapping_pairs(
        &mut self,
        option: &'static str,
        raw: Option<&Value>,
    ) -> Vec<(String, String)> {
        let text = match raw {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Object(map)) => return object_pairs(map),
            Some(Value::String(s)) => s.trim().to_string(),
            Some(_) => {
                self.warn(
                    option,
                    format!("{} must be an object or a string; ignoring it", option),
                );
                return Vec::new();
            }
        };
        if text.is_empty() {
            return Vec::new();
        }

        if text.starts_with('{') || text.starts_with('[') {
            match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => return object_pairs(&map),
                Ok(_) => {
                    self.warn(
                        option,
                        format!("{} JSON must be an object; ignoring parsed value", option),
                    );
                    return Vec::new();
                }
                Err(e) => self.warn(
                    option,
                    format!("{} JSON parse failed ({}); falling back to CSV parser", option, e),
                ),
            }
        }

        let mut out = Vec::new();
        for part in split_csv(&text) {
            let split = part.split_once('=').or_else(|| part.split_once(':'));
            match split {
                Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
                    out.push((k.trim().to_string(), v.trim().to_string()));
                }
                _ => self.warn(
                    option,
                    format!("Ignoring invalid mapping '{}' in {}", part, option),
                ),
            }
        }
        out
    }

    /// Normalize a button name: trimmed, lower-case, whitespace -> `_`
    fn button_name(&mut self, raw: &str, option: &'static str) -> Option<String> {
        let button = raw
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        if button.is_empty() {
            self.warn(option, format!("Ignoring empty button value in {}", option));
            return None;
        }
        if !button
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            self.warn(
                option,
                format!("Ignoring invalid button value '{}' in {}", raw, option),
            );
            return None;
        }
        Some(button)
    }
}

/// `[A-Za-z][A-Za-z0-9_]*`
pub fn is_valid_event_type(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse an integer literal with an optional `0x`/`0o`/`0b` prefix
pub fn parse_int_auto(raw: &str) -> Option<i64> {
    let s = raw.trim().replace('_', "");
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, s.strip_prefix('+').unwrap_or(s.as_str()).to_string()),
    };
    let lower = digits.to_lowercase();
    let value = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else {
        if lower.is_empty() || !lower.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        // Leading zeros are ambiguous (octal in C) and are rejected
        if lower.len() > 1 && lower.starts_with('0') && lower.chars().any(|c| c != '0') {
            return None;
        }
        lower.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

fn split_csv(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn object_pairs(map: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    map.iter().map(|(k, v)| (k.clone(), value_text(v))).collect()
}

/// String form of a scalar; strings are taken verbatim (no quotes)
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}
