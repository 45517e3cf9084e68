//! Hold/repeat synthesis
//!
//! The remote's own auto-repeat is unreliable over Bluetooth, so repeats are
//! generated here instead. [`HoldEngine`] is the per-key state machine and
//! takes the current [`Instant`] from its caller; [`HoldScheduler`] drives it
//! from a background thread so the device read loop never waits on a timer.
//!
//! ```text
//! Idle --key_down (enrolled)--> Armed --fire--> Armed (key_hold emitted)
//! Armed --key_up / disconnect--> Idle
//! ```

use crate::event::{ButtonEvent, EventClock, EventType};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Per pressed key state while armed
#[derive(Debug, Clone)]
pub struct HoldState {
    /// The originating key_down; repeats copy its identity
    template: ButtonEvent,
    /// None once the deadline is past what `Instant` can represent
    next_fire: Option<Instant>,
    last_emitted: EventType,
    fired: u64,
}

impl HoldState {
    pub fn next_fire(&self) -> Option<Instant> {
        self.next_fire
    }

    pub fn last_emitted(&self) -> EventType {
        self.last_emitted
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }
}

/// Timer state machine for enrolled buttons, keyed by key code
#[derive(Debug)]
pub struct HoldEngine {
    delay: Duration,
    repeat: Duration,
    buttons: HashSet<String>,
    held: HashMap<u16, HoldState>,
}

impl HoldEngine {
    /// `repeat` must be non-zero; configuration rejects anything else
    pub fn new(delay: Duration, repeat: Duration, buttons: HashSet<String>) -> Self {
        Self {
            delay,
            repeat,
            buttons,
            held: HashMap::new(),
        }
    }

    pub fn is_enrolled(&self, button: &str) -> bool {
        self.buttons.contains(button)
    }

    /// Arm a hold for `event` (a key_down). Returns false when the button is
    /// not enrolled, has no key code, or the key is already armed.
    pub fn arm(&mut self, event: &ButtonEvent, now: Instant) -> bool {
        let Some(code) = event.key_code else {
            return false;
        };
        if !self.is_enrolled(&event.button) || self.held.contains_key(&code) {
            return false;
        }

        self.held.insert(
            code,
            HoldState {
                template: event.clone(),
                next_fire: now.checked_add(self.delay),
                last_emitted: EventType::KeyDown,
                fired: 0,
            },
        );
        true
    }

    /// Cancel the hold for a released key
    pub fn release(&mut self, key_code: u16) -> bool {
        self.held.remove(&key_code).is_some()
    }

    /// Drop every hold (device disconnected); nothing is emitted
    pub fn clear(&mut self) -> usize {
        let count = self.held.len();
        self.held.clear();
        count
    }

    /// Earliest pending fire time
    pub fn next_deadline(&self) -> Option<Instant> {
        self.held.values().filter_map(|s| s.next_fire).min()
    }

    /// Emit one key_hold per armed key whose deadline has passed and
    /// reschedule it. The caller stamps the timestamp.
    ///
    /// Deadlines advance by exactly `repeat` so repeats stay on the
    /// `delay + n * repeat` grid; a key that fell more than one period
    /// behind skips the missed ticks instead of bursting.
    pub fn fire_due(&mut self, now: Instant) -> Vec<ButtonEvent> {
        let mut due: Vec<(Instant, ButtonEvent)> = Vec::new();

        for state in self.held.values_mut() {
            let Some(scheduled) = state.next_fire.filter(|at| *at <= now) else {
                continue;
            };
            due.push((scheduled, state.template.with_type(EventType::KeyHold, 0.0)));

            state.last_emitted = EventType::KeyHold;
            state.fired += 1;
            state.next_fire = scheduled
                .checked_add(self.repeat)
                .filter(|next| *next > now)
                .or_else(|| now.checked_add(self.repeat));
        }

        due.sort_by_key(|(scheduled, _)| *scheduled);
        due.into_iter().map(|(_, event)| event).collect()
    }

    pub fn state(&self, key_code: u16) -> Option<&HoldState> {
        self.held.get(&key_code)
    }

    pub fn armed_count(&self) -> usize {
        self.held.len()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn repeat(&self) -> Duration {
        self.repeat
    }
}

/// Receives synthesized key_hold events
pub trait HoldSink: Send + Sync + 'static {
    fn emit_hold(&self, event: ButtonEvent);
}

struct SchedulerState {
    engine: HoldEngine,
    running: bool,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Condvar,
    clock: Arc<EventClock>,
}

/// Runs a [`HoldEngine`] on a background thread.
///
/// Arming, releasing and firing all happen under one lock, and the sink is
/// called while that lock is held. A caller that releases a key before
/// enqueueing its key_up therefore never sees a key_hold after the key_up.
pub struct HoldScheduler {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl HoldScheduler {
    pub fn start<S: HoldSink>(
        engine: HoldEngine,
        clock: Arc<EventClock>,
        sink: Arc<S>,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                engine,
                running: true,
            }),
            wake: Condvar::new(),
            clock,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("hold-scheduler".to_string())
            .spawn(move || run_scheduler(worker_shared, sink))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Arm a hold for a key_down; no-op for buttons outside the hold set
    pub fn key_down(&self, event: &ButtonEvent) -> bool {
        let armed = self.shared.state.lock().engine.arm(event, Instant::now());
        if armed {
            log::debug!("Hold armed for {} (code {:?})", event.button, event.key_code);
            self.shared.wake.notify_one();
        }
        armed
    }

    /// Cancel the hold of a released key
    pub fn key_up(&self, key_code: u16) -> bool {
        let released = self.shared.state.lock().engine.release(key_code);
        if released {
            self.shared.wake.notify_one();
        }
        released
    }

    /// Stamp a key transition and hand it to `emit` while no hold can fire,
    /// releasing (key_up) or arming (key_down) its hold in the same step.
    ///
    /// Everything the scheduler and the caller emit is then ordered by
    /// timestamp, and a key_up is never followed by a key_hold of its key.
    pub fn transition(&self, mut event: ButtonEvent, emit: impl FnOnce(ButtonEvent)) {
        let mut state = self.shared.state.lock();

        let released = match (event.event_type, event.key_code) {
            (EventType::KeyUp, Some(code)) => state.engine.release(code),
            _ => false,
        };
        event.timestamp = self.shared.clock.now();
        let armed =
            event.event_type == EventType::KeyDown && state.engine.arm(&event, Instant::now());
        if armed {
            log::debug!("Hold armed for {} (code {:?})", event.button, event.key_code);
        }
        emit(event);

        drop(state);
        if released || armed {
            self.shared.wake.notify_one();
        }
    }

    /// Drop all holds without emitting anything
    pub fn clear(&self) -> usize {
        let cleared = self.shared.state.lock().engine.clear();
        if cleared > 0 {
            log::debug!("Cleared {} active hold(s)", cleared);
            self.shared.wake.notify_one();
        }
        cleared
    }

    pub fn armed_count(&self) -> usize {
        self.shared.state.lock().engine.armed_count()
    }

    /// Stop the worker and cancel all timers
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
            state.engine.clear();
        }
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for HoldScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_scheduler<S: HoldSink>(shared: Arc<Shared>, sink: Arc<S>) {
    let mut state = shared.state.lock();

    while state.running {
        let now = Instant::now();
        for mut event in state.engine.fire_due(now) {
            event.timestamp = shared.clock.now();
            log::debug!("KEY_HOLD button={} code={:?}", event.button, event.key_code);
            sink.emit_hold(event);
        }

        match state.engine.next_deadline() {
            Some(deadline) => {
                shared.wake.wait_until(&mut state, deadline);
            }
            None => {
                shared.wake.wait(&mut state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn down(code: u16, button: &str) -> ButtonEvent {
        ButtonEvent {
            device_name: "Remoter ATV3 Keyboard".to_string(),
            device_path: "/dev/input/event3".to_string(),
            key_code: Some(code),
            key_name: "KEY_UP".to_string(),
            scan_code: Some("c0042".to_string()),
            button: button.to_string(),
            timestamp: 1.0,
            event_type: EventType::KeyDown,
        }
    }

    fn engine(delay: u64, repeat: u64) -> HoldEngine {
        let buttons = ["up", "down", "vol_up"].iter().map(|s| s.to_string()).collect();
        HoldEngine::new(ms(delay), ms(repeat), buttons)
    }

    #[test]
    fn fires_on_delay_then_repeat_grid() {
        let mut engine = engine(250, 100);
        let t0 = Instant::now();
        assert!(engine.arm(&down(103, "up"), t0));

        assert!(engine.fire_due(t0 + ms(249)).is_empty());
        assert_eq!(engine.fire_due(t0 + ms(250)).len(), 1);
        assert!(engine.fire_due(t0 + ms(300)).is_empty());
        assert_eq!(engine.fire_due(t0 + ms(350)).len(), 1);
        assert!(engine.fire_due(t0 + ms(449)).is_empty());
        assert_eq!(engine.fire_due(t0 + ms(450)).len(), 1);
        assert_eq!(engine.state(103).unwrap().fired(), 3);
    }

    #[test]
    fn hold_events_copy_key_down_identity() {
        let mut engine = engine(0, 100);
        let t0 = Instant::now();
        let key_down = down(103, "up");
        engine.arm(&key_down, t0);

        let fired = engine.fire_due(t0);
        assert_eq!(fired.len(), 1);
        let hold = &fired[0];
        assert_eq!(hold.event_type, EventType::KeyHold);
        assert_eq!(hold.button, key_down.button);
        assert_eq!(hold.key_code, key_down.key_code);
        assert_eq!(hold.key_name, key_down.key_name);
        assert_eq!(hold.scan_code, key_down.scan_code);
        assert_eq!(engine.state(103).unwrap().last_emitted(), EventType::KeyHold);
    }

    #[test]
    fn zero_delay_fires_immediately() {
        let mut engine = engine(0, 100);
        let t0 = Instant::now();
        engine.arm(&down(103, "up"), t0);
        assert_eq!(engine.next_deadline(), Some(t0));
        assert_eq!(engine.fire_due(t0).len(), 1);
    }

    #[test]
    fn unenrolled_button_never_arms() {
        let mut engine = engine(0, 100);
        let t0 = Instant::now();
        assert!(!engine.arm(&down(116, "power"), t0));
        assert_eq!(engine.armed_count(), 0);
        assert!(engine.fire_due(t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn release_cancels_hold() {
        let mut engine = engine(250, 100);
        let t0 = Instant::now();
        engine.arm(&down(103, "up"), t0);
        assert!(engine.release(103));
        assert!(!engine.release(103));
        assert!(engine.fire_due(t0 + Duration::from_secs(1)).is_empty());
        assert!(engine.next_deadline().is_none());
    }

    #[test]
    fn second_key_down_does_not_duplicate() {
        let mut engine = engine(250, 100);
        let t0 = Instant::now();
        assert!(engine.arm(&down(103, "up"), t0));
        assert!(!engine.arm(&down(103, "up"), t0 + ms(100)));
        assert_eq!(engine.armed_count(), 1);
        // The first deadline is kept
        assert_eq!(engine.fire_due(t0 + ms(250)).len(), 1);
    }

    #[test]
    fn clear_drops_everything_silently() {
        let mut engine = engine(0, 100);
        let t0 = Instant::now();
        engine.arm(&down(103, "up"), t0);
        engine.arm(&down(108, "down"), t0);
        assert_eq!(engine.clear(), 2);
        assert!(engine.fire_due(t0 + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn late_poll_skips_missed_ticks() {
        let mut engine = engine(0, 100);
        let t0 = Instant::now();
        engine.arm(&down(103, "up"), t0);
        assert_eq!(engine.fire_due(t0 + ms(1000)).len(), 1);
        assert_eq!(engine.next_deadline(), Some(t0 + ms(1100)));
    }

    #[test]
    fn unrepresentable_delay_never_fires() {
        let mut engine = HoldEngine::new(Duration::MAX, ms(100), ["up".to_string()].into());
        let t0 = Instant::now();
        assert!(engine.arm(&down(103, "up"), t0));
        assert_eq!(engine.state(103).unwrap().next_fire(), None);
        assert_eq!(engine.next_deadline(), None);
        assert!(engine.fire_due(t0 + Duration::from_secs(3600)).is_empty());
        assert!(engine.release(103));
    }

    #[test]
    fn unrepresentable_repeat_stops_after_first_hold() {
        let mut engine = HoldEngine::new(Duration::ZERO, Duration::MAX, ["up".to_string()].into());
        let t0 = Instant::now();
        engine.arm(&down(103, "up"), t0);
        assert_eq!(engine.fire_due(t0).len(), 1);
        assert_eq!(engine.next_deadline(), None);
        assert!(engine.fire_due(t0 + Duration::from_secs(3600)).is_empty());
        assert_eq!(engine.state(103).unwrap().fired(), 1);
    }

    #[test]
    fn independent_keys_fire_independently() {
        let mut engine = engine(100, 100);
        let t0 = Instant::now();
        engine.arm(&down(103, "up"), t0);
        engine.arm(&down(115, "vol_up"), t0 + ms(50));

        let fired = engine.fire_due(t0 + ms(100));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].button, "up");

        let fired = engine.fire_due(t0 + ms(150));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].button, "vol_up");
    }

    struct Collect(Mutex<Vec<ButtonEvent>>);

    impl HoldSink for Collect {
        fn emit_hold(&self, event: ButtonEvent) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn scheduler_emits_until_key_up() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let mut scheduler =
            HoldScheduler::start(engine(20, 20), Arc::new(EventClock::new()), Arc::clone(&sink))
                .unwrap();

        assert!(scheduler.key_down(&down(103, "up")));
        thread::sleep(ms(150));
        assert!(scheduler.key_up(103));
        let count = sink.0.lock().len();
        assert!(count >= 2, "expected repeats, got {}", count);

        thread::sleep(ms(100));
        assert_eq!(sink.0.lock().len(), count);
        assert!(sink.0.lock().iter().all(|e| e.event_type == EventType::KeyHold));

        scheduler.stop();
    }

    #[test]
    fn scheduler_holds_have_increasing_timestamps() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let mut scheduler =
            HoldScheduler::start(engine(0, 10), Arc::new(EventClock::new()), Arc::clone(&sink))
                .unwrap();

        scheduler.key_down(&down(103, "up"));
        thread::sleep(ms(80));
        scheduler.stop();

        let events = sink.0.lock();
        assert!(!events.is_empty());
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn scheduler_ignores_unenrolled() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let mut scheduler =
            HoldScheduler::start(engine(0, 10), Arc::new(EventClock::new()), Arc::clone(&sink))
                .unwrap();

        assert!(!scheduler.key_down(&down(116, "power")));
        thread::sleep(ms(50));
        assert!(sink.0.lock().is_empty());
        assert_eq!(scheduler.armed_count(), 0);
        scheduler.stop();
    }

    #[test]
    fn transition_orders_key_up_after_last_hold() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let mut scheduler =
            HoldScheduler::start(engine(0, 5), Arc::new(EventClock::new()), Arc::clone(&sink))
                .unwrap();

        let forward = |event: ButtonEvent| sink.0.lock().push(event);
        scheduler.transition(down(103, "up"), forward);
        thread::sleep(ms(40));
        let mut up = down(103, "up");
        up.event_type = EventType::KeyUp;
        scheduler.transition(up, forward);
        thread::sleep(ms(30));
        scheduler.stop();

        let events = sink.0.lock();
        assert_eq!(events.first().map(|e| e.event_type), Some(EventType::KeyDown));
        assert_eq!(events.last().map(|e| e.event_type), Some(EventType::KeyUp));
        assert!(events.len() >= 3);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[test]
    fn scheduler_clear_stops_holds() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let mut scheduler =
            HoldScheduler::start(engine(200, 10), Arc::new(EventClock::new()), Arc::clone(&sink))
                .unwrap();

        scheduler.key_down(&down(103, "up"));
        scheduler.key_down(&down(108, "down"));
        assert_eq!(scheduler.clear(), 2);
        thread::sleep(ms(300));
        assert!(sink.0.lock().is_empty());
        scheduler.stop();
    }
}
