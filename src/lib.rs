//! evdev bridge - forwards remote-control button presses as events
//!
//! Reads an input device through evdev, turns its raw key and scan code
//! reports into logical button events (key_down, key_up and synthesized
//! key_hold repeats) and posts them to a notification sink through a
//! bounded, non-blocking queue.

pub mod bridge;
pub mod config;
pub mod delivery;
pub mod event;
pub mod input;
pub mod throttle;

pub use bridge::Bridge;
pub use config::Config;
pub use event::{ButtonEvent, EventType};
