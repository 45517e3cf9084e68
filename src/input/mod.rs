//! Input side of the bridge: device sessions, raw reports and their
//! normalization into button events

pub mod device;
#[cfg(target_os = "linux")]
pub mod evdev_device;
pub mod hold;
pub mod keymap;
pub mod normalizer;
pub mod report;

pub use device::{
    DeviceError, DeviceInfo, DeviceProvider, InputDevice, SessionHandler, SessionManager,
};
#[cfg(target_os = "linux")]
pub use evdev_device::{EvdevDevice, EvdevProvider};
pub use hold::{HoldEngine, HoldScheduler, HoldSink};
pub use keymap::ButtonMap;
pub use normalizer::{KeyAction, Normalizer};
pub use report::{EventFamily, RawReport};
