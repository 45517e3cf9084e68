//! Per-signature log throttling
//!
//! Recoverable errors repeat for as long as their cause persists (a remote
//! that stays unplugged, a sink that stays down). Each distinct error
//! signature is logged at most once per window; repeats in between are
//! counted and reported with the next logged occurrence.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default window between two logs of the same signature
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Decides whether an error with a given signature should be logged now
#[derive(Debug)]
pub struct ErrorThrottle {
    window: Duration,
    entries: HashMap<String, Entry>,
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ErrorThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Returns `Some(suppressed)` when the signature may be logged at `now`,
    /// where `suppressed` counts the occurrences swallowed since the last log.
    pub fn check_at(&mut self, signature: &str, now: Instant) -> Option<u64> {
        match self.entries.get_mut(signature) {
            Some(entry) if now.duration_since(entry.last_logged) < self.window => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                self.entries.insert(
                    signature.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    pub fn check(&mut self, signature: &str) -> Option<u64> {
        self.check_at(signature, Instant::now())
    }

    /// Log `message` at warning level unless the signature is throttled
    pub fn warn(&mut self, signature: &str, message: impl AsRef<str>) -> bool {
        match self.check(signature) {
            Some(0) => {
                log::warn!("{}", message.as_ref());
                true
            }
            Some(suppressed) => {
                log::warn!("{} ({} similar suppressed)", message.as_ref(), suppressed);
                true
            }
            None => false,
        }
    }

    /// Forget a signature so its next occurrence logs immediately
    pub fn clear(&mut self, signature: &str) {
        self.entries.remove(signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_logs() {
        let mut throttle = ErrorThrottle::default();
        assert_eq!(throttle.check_at("open|/dev/input/event3", Instant::now()), Some(0));
    }

    #[test]
    fn repeat_within_window_is_suppressed() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(30));
        let t0 = Instant::now();
        assert!(throttle.check_at("sig", t0).is_some());
        assert!(throttle.check_at("sig", t0 + Duration::from_secs(1)).is_none());
        assert!(throttle.check_at("sig", t0 + Duration::from_secs(29)).is_none());
    }

    #[test]
    fn repeat_after_window_reports_suppressed_count() {
        let mut throttle = ErrorThrottle::new(Duration::from_secs(30));
        let t0 = Instant::now();
        throttle.check_at("sig", t0);
        throttle.check_at("sig", t0 + Duration::from_secs(5));
        throttle.check_at("sig", t0 + Duration::from_secs(10));
        assert_eq!(throttle.check_at("sig", t0 + Duration::from_secs(30)), Some(2));
        assert!(throttle.check_at("sig", t0 + Duration::from_secs(31)).is_none());
    }

    #[test]
    fn signatures_are_independent() {
        let mut throttle = ErrorThrottle::default();
        let t0 = Instant::now();
        assert!(throttle.check_at("perm|/dev/input/event3", t0).is_some());
        assert!(throttle.check_at("perm|/dev/input/event4", t0).is_some());
        assert!(throttle.check_at("perm|/dev/input/event3", t0).is_none());
    }

    #[test]
    fn clear_resets_signature() {
        let mut throttle = ErrorThrottle::default();
        let t0 = Instant::now();
        throttle.check_at("sig", t0);
        throttle.clear("sig");
        assert_eq!(throttle.check_at("sig", t0), Some(0));
    }
}
