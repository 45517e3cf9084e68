//! Linux evdev backend for the device session manager
//!
//! Discovery reads `/proc/bus/input/devices`, which lists every device name
//! without opening anything. When that file is unavailable the devices are
//! enumerated through `evdev::enumerate()` instead, which only sees nodes
//! this process can open.

use super::device::{parse_proc_devices, DeviceError, DeviceInfo, DeviceProvider, InputDevice};
use super::report::RawReport;
use nix::libc;
use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Kernel list of input devices and their handlers
pub const PROC_INPUT_DEVICES: &str = "/proc/bus/input/devices";

/// Provider for real `/dev/input/event*` nodes
#[derive(Debug, Default)]
pub struct EvdevProvider;

impl DeviceProvider for EvdevProvider {
    type Device = EvdevDevice;

    fn list(&mut self) -> Result<Vec<DeviceInfo>, DeviceError> {
        match fs::read_to_string(PROC_INPUT_DEVICES) {
            Ok(text) => Ok(parse_proc_devices(&text)),
            Err(e) => {
                log::debug!("Cannot read {}: {}; enumerating /dev/input", PROC_INPUT_DEVICES, e);
                Ok(enumerate_devices())
            }
        }
    }

    fn open(&mut self, info: &DeviceInfo) -> io::Result<EvdevDevice> {
        EvdevDevice::open(&info.path)
    }
}

fn enumerate_devices() -> Vec<DeviceInfo> {
    let mut devices: Vec<DeviceInfo> = evdev::enumerate()
        .map(|(path, device)| DeviceInfo::new(device.name().unwrap_or_default(), path))
        .collect();
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    devices
}

/// An opened evdev node in nonblocking mode
pub struct EvdevDevice {
    device: evdev::Device,
}

impl EvdevDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let device = evdev::Device::open(path)?;
        set_nonblocking(&device)?;
        Ok(Self { device })
    }
}

impl InputDevice for EvdevDevice {
    fn grab(&mut self) -> io::Result<()> {
        self.device.grab()
    }

    fn ungrab(&mut self) -> io::Result<()> {
        self.device.ungrab()
    }

    fn read_reports(&mut self, out: &mut Vec<RawReport>) -> io::Result<()> {
        let events = self.device.fetch_events()?;
        out.extend(events.map(RawReport::from));
        Ok(())
    }
}

fn set_nonblocking(device: &evdev::Device) -> io::Result<()> {
    let fd = device.as_raw_fd();

    // Keep existing flags and add O_NONBLOCK
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
