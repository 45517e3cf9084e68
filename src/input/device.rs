//! Device discovery and the session lifecycle
//!
//! [`SessionManager`] finds the first input device whose name contains the
//! target substring, opens it, optionally grabs it and feeds every report
//! to a [`SessionHandler`]. Any failure ends the session and discovery
//! starts over after a fixed interval; nothing here terminates the process.
//!
//! The actual device access sits behind [`DeviceProvider`] and
//! [`InputDevice`] so the lifecycle can be driven by scripted devices.

use super::report::RawReport;
use crate::throttle::ErrorThrottle;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Wait between discovery attempts and after a session ends
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(2);

/// Sleep when a nonblocking read has nothing to return
pub const READ_IDLE: Duration = Duration::from_millis(10);

/// Granularity of interruptible waits
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// An enumerated input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub path: PathBuf,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Error type for device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to enumerate input devices: {0}")]
    Enumerate(#[source] io::Error),
    #[error("no input device name contains '{0}'")]
    NotFound(String),
    #[error("permission denied for {}: {source}", .path.display())]
    PermissionDenied { path: PathBuf, source: io::Error },
    #[error("{} is busy (grabbed by another process)", .path.display())]
    Busy { path: PathBuf },
    #[error("{} disconnected", .path.display())]
    Disconnected { path: PathBuf },
    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl DeviceError {
    /// Classify an I/O error raised while using the device at `path`
    pub fn classify(path: &Path, err: io::Error) -> Self {
        let path = path.to_path_buf();
        match err.kind() {
            io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied { path, source: err },
            io::ErrorKind::ResourceBusy => DeviceError::Busy { path },
            io::ErrorKind::NotFound => DeviceError::Disconnected { path },
            _ if is_no_device(&err) => DeviceError::Disconnected { path },
            _ => DeviceError::Io { path, source: err },
        }
    }

    /// Throttle key: error kind plus device path
    pub fn signature(&self) -> String {
        match self {
            DeviceError::Enumerate(e) => format!("enumerate|{:?}", e.kind()),
            DeviceError::NotFound(target) => format!("not_found|{}", target),
            DeviceError::PermissionDenied { path, .. } => {
                format!("permission|{}", path.display())
            }
            DeviceError::Busy { path } => format!("busy|{}", path.display()),
            DeviceError::Disconnected { path } => format!("disconnected|{}", path.display()),
            DeviceError::Io { path, source } => {
                format!("io|{:?}|{}", source.kind(), path.display())
            }
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DeviceError::PermissionDenied { .. })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, DeviceError::Busy { .. })
    }
}

#[cfg(target_os = "linux")]
fn is_no_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::libc::ENODEV)
}

#[cfg(not(target_os = "linux"))]
fn is_no_device(_err: &io::Error) -> bool {
    false
}

/// An open input device
pub trait InputDevice {
    /// Request exclusive access
    fn grab(&mut self) -> io::Result<()>;

    fn ungrab(&mut self) -> io::Result<()>;

    /// Append pending reports to `out`, in kernel order.
    ///
    /// Returns `WouldBlock` when nothing is pending.
    fn read_reports(&mut self, out: &mut Vec<RawReport>) -> io::Result<()>;
}

/// Enumerates and opens input devices
pub trait DeviceProvider {
    type Device: InputDevice;

    fn list(&mut self) -> Result<Vec<DeviceInfo>, DeviceError>;

    fn open(&mut self, info: &DeviceInfo) -> io::Result<Self::Device>;
}

/// Receives the reports of each device session
pub trait SessionHandler {
    fn session_started(&mut self, info: &DeviceInfo);

    fn handle_report(&mut self, info: &DeviceInfo, report: &RawReport);

    /// Called once per started session, whatever ended it
    fn session_ended(&mut self, info: &DeviceInfo);
}

/// First device whose name contains `target` (case-sensitive)
pub fn select_target<'a>(devices: &'a [DeviceInfo], target: &str) -> Option<&'a DeviceInfo> {
    devices.iter().find(|d| d.name.contains(target))
}

/// Parse `/proc/bus/input/devices` into (name, event node) pairs.
///
/// A device block lists its name on an `N:` line and its handlers on an
/// `H:` line; every `eventN` handler becomes one entry.
pub fn parse_proc_devices(text: &str) -> Vec<DeviceInfo> {
    let mut out: Vec<DeviceInfo> = Vec::new();
    let mut name: Option<String> = None;
    let mut handlers: Vec<String> = Vec::new();

    let mut flush = |name: &mut Option<String>, handlers: &mut Vec<String>| {
        if let Some(name) = name.take() {
            for handler in handlers.iter().filter(|h| h.starts_with("event")) {
                let path = PathBuf::from("/dev/input").join(handler);
                if !out.iter().any(|d| d.path == path) {
                    out.push(DeviceInfo::new(name.clone(), path));
                }
            }
        }
        handlers.clear();
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            flush(&mut name, &mut handlers);
        } else if let Some(rest) = line.strip_prefix("N:") {
            let value = rest.trim().strip_prefix("Name=").unwrap_or(rest.trim());
            name = Some(value.trim_matches('"').to_string());
        } else if let Some(rest) = line.strip_prefix("H:") {
            let value = rest.trim().strip_prefix("Handlers=").unwrap_or(rest.trim());
            handlers = value.split_whitespace().map(str::to_string).collect();
        }
    }
    flush(&mut name, &mut handlers);

    out
}

/// Sleep for `total`, returning early once `running` is cleared
pub fn wait_while_running(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(WAIT_SLICE.min(deadline - now));
    }
}

/// Discovery, connection and read loop for one target device
pub struct SessionManager<P: DeviceProvider> {
    provider: P,
    target: String,
    grab: bool,
    discovery_interval: Duration,
    read_idle: Duration,
    throttle: ErrorThrottle,
    sessions: u64,
}

impl<P: DeviceProvider> SessionManager<P> {
    pub fn new(provider: P, target: impl Into<String>, grab: bool) -> Self {
        Self {
            provider,
            target: target.into(),
            grab,
            discovery_interval: DISCOVERY_INTERVAL,
            read_idle: READ_IDLE,
            throttle: ErrorThrottle::default(),
            sessions: 0,
        }
    }

    /// Override the discovery and idle-read intervals
    pub fn with_intervals(mut self, discovery: Duration, read_idle: Duration) -> Self {
        self.discovery_interval = discovery;
        self.read_idle = read_idle;
        self
    }

    /// Number of sessions started so far
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Enumerate devices and pick the target
    pub fn find_target(&mut self) -> Result<DeviceInfo, DeviceError> {
        let devices = self.provider.list()?;
        select_target(&devices, &self.target)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(self.target.clone()))
    }

    /// Run sessions until `running` is cleared
    pub fn run<H: SessionHandler>(&mut self, handler: &mut H, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            let info = match self.find_target() {
                Ok(info) => info,
                Err(e) => {
                    self.report(&e);
                    wait_while_running(running, self.discovery_interval);
                    continue;
                }
            };

            let mut device = match self.connect(&info) {
                Ok(device) => device,
                Err(e) => {
                    self.report(&e);
                    wait_while_running(running, self.discovery_interval);
                    continue;
                }
            };
            let grabbed = match self.grab_device(&mut device, &info) {
                Ok(grabbed) => grabbed,
                Err(e) => {
                    self.report(&e);
                    drop(device);
                    wait_while_running(running, self.discovery_interval);
                    continue;
                }
            };

            self.sessions += 1;
            handler.session_started(&info);
            let outcome = self.read_loop(&mut device, &info, handler, running);
            handler.session_ended(&info);

            if grabbed {
                if let Err(e) = device.ungrab() {
                    log::debug!("Ungrab of {} failed: {}", info.path.display(), e);
                }
            }
            drop(device);

            match outcome {
                Ok(()) => break,
                Err(e) => {
                    self.report(&e);
                    log::warn!(
                        "Rediscovering in {}s...",
                        self.discovery_interval.as_secs_f64()
                    );
                    wait_while_running(running, self.discovery_interval);
                }
            }
        }
        log::debug!("Session manager stopped");
    }

    fn connect(&mut self, info: &DeviceInfo) -> Result<P::Device, DeviceError> {
        let device = self
            .provider
            .open(info)
            .map_err(|e| DeviceError::classify(&info.path, e))?;
        log::info!("Opened {} name='{}'", info.path.display(), info.name);
        Ok(device)
    }

    /// Ok(true) when grabbed. A busy device is an error; any other grab
    /// failure is logged and the device is read without exclusive access.
    fn grab_device(
        &mut self,
        device: &mut P::Device,
        info: &DeviceInfo,
    ) -> Result<bool, DeviceError> {
        if !self.grab {
            return Ok(false);
        }
        match device.grab() {
            Ok(()) => {
                log::info!("Grabbed {} (exclusive access)", info.path.display());
                Ok(true)
            }
            Err(e) => {
                let err = DeviceError::classify(&info.path, e);
                if err.is_busy() {
                    return Err(err);
                }
                log::warn!(
                    "Could not grab {}: {} (will still try to read)",
                    info.path.display(),
                    err
                );
                Ok(false)
            }
        }
    }

    /// Ok(()) on shutdown, Err when the device failed
    fn read_loop<H: SessionHandler>(
        &self,
        device: &mut P::Device,
        info: &DeviceInfo,
        handler: &mut H,
        running: &AtomicBool,
    ) -> Result<(), DeviceError> {
        let mut batch = Vec::with_capacity(64);

        while running.load(Ordering::SeqCst) {
            batch.clear();
            let result = device.read_reports(&mut batch);
            for report in &batch {
                handler.handle_report(info, report);
            }

            match result {
                Ok(()) if batch.is_empty() => thread::sleep(self.read_idle),
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(self.read_idle),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(DeviceError::classify(&info.path, e)),
            }
        }
        Ok(())
    }

    fn report(&mut self, err: &DeviceError) {
        let logged = self.throttle.warn(&err.signature(), err.to_string());
        if logged && err.is_permission_denied() {
            log::warn!(
                "Permission denied for input devices. The process needs read access to \
                 /dev/input/event* (check AppArmor or membership of the 'input' group)."
            );
        }
    }
}
