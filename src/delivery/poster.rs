//! Queue consumer that posts each event to the notification sink

use super::queue::QueueReceiver;
use super::sink::NotificationSink;
use crate::throttle::ErrorThrottle;
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often an idle poster re-checks the running flag
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Delivery outcome counters
#[derive(Debug, Default)]
pub struct PostStats {
    posted: AtomicU64,
    failed: AtomicU64,
}

impl PostStats {
    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Background thread draining the event queue.
///
/// Each event gets one attempt bounded by the post timeout; failures are
/// logged (throttled per error signature) and the event is discarded.
pub struct Poster {
    running: Arc<AtomicBool>,
    stats: Arc<PostStats>,
    worker: Option<JoinHandle<()>>,
}

impl Poster {
    pub fn start<S: NotificationSink>(
        receiver: QueueReceiver,
        sink: S,
        event_type: impl Into<String>,
        post_timeout: Duration,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(PostStats::default());
        let event_type = event_type.into();

        let worker = {
            let running = Arc::clone(&running);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("event-poster".to_string())
                .spawn(move || {
                    run_poster(receiver, sink, &event_type, post_timeout, &running, &stats)
                })?
        };

        Ok(Self {
            running,
            stats,
            worker: Some(worker),
        })
    }

    pub fn stats(&self) -> Arc<PostStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the worker to stop without waiting for an in-flight post
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.worker.take();
    }

    /// Signal the worker to stop and wait for it to finish
    pub fn stop_and_join(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Poster {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_poster<S: NotificationSink>(
    receiver: QueueReceiver,
    sink: S,
    event_type: &str,
    post_timeout: Duration,
    running: &AtomicBool,
    stats: &PostStats,
) {
    let mut throttle = ErrorThrottle::default();

    while running.load(Ordering::SeqCst) {
        let event = match receiver.recv_timeout(IDLE_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match sink.post(event_type, &event.to_payload(), post_timeout) {
            Ok(()) => {
                stats.posted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                throttle.warn(
                    &e.signature(),
                    format!(
                        "Event post failed for {} {}: {}",
                        event.event_type, event.button, e
                    ),
                );
            }
        }
    }

    log::debug!("Event poster stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::queue::bounded;
    use crate::delivery::sink::SinkError;
    use crate::event::{ButtonEvent, EventType};
    use parking_lot::Mutex;
    use std::time::Instant;

    #[derive(Clone, Default)]
    struct Recording {
        posts: Arc<Mutex<Vec<(String, serde_json::Value, Duration)>>>,
    }

    impl NotificationSink for Recording {
        fn post(
            &self,
            event_type: &str,
            payload: &serde_json::Value,
            timeout: Duration,
        ) -> Result<(), SinkError> {
            self.posts
                .lock()
                .push((event_type.to_string(), payload.clone(), timeout));
            Ok(())
        }
    }

    /// Fails every other post
    #[derive(Clone, Default)]
    struct Flaky {
        calls: Arc<Mutex<u32>>,
        delivered: Arc<Mutex<Vec<String>>>,
    }

    impl NotificationSink for Flaky {
        fn post(
            &self,
            _event_type: &str,
            payload: &serde_json::Value,
            timeout: Duration,
        ) -> Result<(), SinkError> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls % 2 == 0 {
                return Err(SinkError::Timeout(timeout));
            }
            self.delivered
                .lock()
                .push(payload["button"].as_str().unwrap_or_default().to_string());
            Ok(())
        }
    }

    fn event(button: &str) -> ButtonEvent {
        ButtonEvent {
            device_name: "Remoter ATV3 Keyboard".to_string(),
            device_path: "/dev/input/event3".to_string(),
            key_code: Some(103),
            key_name: "KEY_UP".to_string(),
            scan_code: None,
            button: button.to_string(),
            timestamp: 1.0,
            event_type: EventType::KeyDown,
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn posts_in_fifo_order_with_timeout() {
        let (queue, rx) = bounded(8);
        let sink = Recording::default();
        let mut poster =
            Poster::start(rx, sink.clone(), "remote_event", Duration::from_secs(3)).unwrap();

        for b in ["up", "down", "ok"] {
            queue.enqueue(event(b));
        }
        assert!(wait_for(|| sink.posts.lock().len() == 3));

        let posts = sink.posts.lock();
        let buttons: Vec<&str> = posts
            .iter()
            .map(|(_, p, _)| p["button"].as_str().unwrap())
            .collect();
        assert_eq!(buttons, vec!["up", "down", "ok"]);
        assert!(posts
            .iter()
            .all(|(t, _, to)| t == "remote_event" && *to == Duration::from_secs(3)));
        drop(posts);

        assert_eq!(poster.stats().posted(), 3);
        poster.stop_and_join();
    }

    #[test]
    fn failed_posts_are_discarded_not_retried() {
        let (queue, rx) = bounded(8);
        let sink = Flaky::default();
        let mut poster =
            Poster::start(rx, sink.clone(), "remote_event", Duration::from_millis(50)).unwrap();

        for b in ["a", "b", "c", "d"] {
            queue.enqueue(event(b));
        }
        let stats = poster.stats();
        assert!(wait_for(|| stats.posted() + stats.failed() == 4));

        assert_eq!(*sink.calls.lock(), 4);
        assert_eq!(*sink.delivered.lock(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(stats.failed(), 2);
        poster.stop_and_join();
    }

    #[test]
    fn stops_when_signalled() {
        let (_queue, rx) = bounded(8);
        let mut poster = Poster::start(
            rx,
            Recording::default(),
            "remote_event",
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(poster.is_running());
        poster.stop_and_join();
        assert!(!poster.is_running());
    }

    #[test]
    fn exits_when_producers_gone() {
        let (queue, rx) = bounded(8);
        let running = AtomicBool::new(true);
        let stats = PostStats::default();
        drop(queue);
        // Returns instead of spinning on a closed queue
        run_poster(
            rx,
            Recording::default(),
            "remote_event",
            Duration::from_secs(1),
            &running,
            &stats,
        );
        assert_eq!(stats.posted(), 0);
    }
}
