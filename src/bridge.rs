//! Glue between device sessions and delivery
//!
//! [`Bridge`] is the [`SessionHandler`] the session manager drives. It runs
//! each report through the normalizer and sends the resulting key
//! transitions, together with the hold scheduler's repeats, into the
//! delivery queue.

use crate::config::Config;
use crate::delivery::EventQueue;
use crate::event::{ButtonEvent, EventClock, EventType};
use crate::input::device::{DeviceInfo, SessionHandler};
use crate::input::hold::{HoldEngine, HoldScheduler};
use crate::input::keymap::ButtonMap;
use crate::input::normalizer::{KeyAction, Normalizer};
use crate::input::report::RawReport;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;

pub struct Bridge {
    normalizer: Normalizer,
    queue: EventQueue,
    holds: HoldScheduler,
    clock: Arc<EventClock>,
}

impl Bridge {
    /// Build the pipeline for `config`, starting the hold scheduler
    pub fn new(config: &Config, queue: EventQueue) -> io::Result<Self> {
        let engine = HoldEngine::new(
            config.hold_delay,
            config.hold_repeat,
            config.hold_buttons.clone(),
        );
        Self::with_parts(
            Arc::new(config.button_map()),
            Arc::new(config.ignore_scancodes.clone()),
            engine,
            queue,
        )
    }

    pub fn with_parts(
        map: Arc<ButtonMap>,
        ignore: Arc<HashSet<String>>,
        engine: HoldEngine,
        queue: EventQueue,
    ) -> io::Result<Self> {
        let clock = Arc::new(EventClock::new());
        let holds = HoldScheduler::start(engine, Arc::clone(&clock), Arc::new(queue.clone()))?;
        Ok(Self {
            normalizer: Normalizer::new(map, ignore),
            queue,
            holds,
            clock,
        })
    }

    /// Emit a normalized key transition from `device`
    pub fn dispatch(&self, action: KeyAction, device: &DeviceInfo) {
        let path = device.path.to_string_lossy();
        let event = action.into_event(&device.name, &path, 0.0);
        self.holds.transition(event, |event| self.emit(event));
    }

    fn emit(&self, event: ButtonEvent) {
        match event.event_type {
            EventType::KeyDown => log::info!("{}", event),
            _ => log::debug!("{}", event),
        }
        self.queue.enqueue(event);
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn holds(&self) -> &HoldScheduler {
        &self.holds
    }

    /// Stop the hold scheduler and cancel every timer
    pub fn shutdown(&mut self) {
        self.holds.stop();
    }
}

impl SessionHandler for Bridge {
    fn session_started(&mut self, info: &DeviceInfo) {
        self.normalizer.reset();
        self.clock.reset();
        log::info!("Reading device: {} name='{}'", info.path.display(), info.name);
    }

    fn handle_report(&mut self, info: &DeviceInfo, report: &RawReport) {
        if let Some(action) = self.normalizer.feed(report) {
            self.dispatch(action, info);
        }
    }

    fn session_ended(&mut self, info: &DeviceInfo) {
        self.normalizer.reset();
        let cleared = self.holds.clear();
        log::info!(
            "Session on {} ended ({} hold(s) cancelled)",
            info.path.display(),
            cleared
        );
    }
}
