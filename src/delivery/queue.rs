//! Bounded hand-off between event producers and the poster
//!
//! Enqueue never blocks: when the queue is full the new event is dropped and
//! logged. Device reads must stay responsive even when the sink is slow.

use crate::event::ButtonEvent;
use crate::input::hold::HoldSink;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters shared by every producer handle
#[derive(Debug, Default)]
pub struct QueueStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl QueueStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer side; cheap to clone, safe to use from several threads
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: Sender<ButtonEvent>,
    capacity: usize,
    stats: Arc<QueueStats>,
}

/// Consumer side, owned by the poster
#[derive(Debug)]
pub struct QueueReceiver {
    rx: Receiver<ButtonEvent>,
}

/// Create a queue holding at most `capacity` events (minimum 1)
pub fn bounded(capacity: usize) -> (EventQueue, QueueReceiver) {
    let capacity = capacity.max(1);
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        EventQueue {
            tx,
            capacity,
            stats: Arc::new(QueueStats::default()),
        },
        QueueReceiver { rx },
    )
}

impl EventQueue {
    /// Queue an event for delivery. Returns false if it was dropped.
    pub fn enqueue(&self, event: ButtonEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(event)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("{}", full_queue_message(self.capacity, &event, dropped));
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "Event poster stopped; dropped {} {} ts={:.3}",
                    event.event_type,
                    event.button,
                    event.timestamp
                );
                false
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

/// Warning logged for an event dropped by a full queue
fn full_queue_message(capacity: usize, event: &ButtonEvent, dropped: u64) -> String {
    format!(
        "Event queue full (size={}); dropped {} {} ts={:.3} (dropped={})",
        capacity, event.event_type, event.button, event.timestamp, dropped
    )
}

impl HoldSink for EventQueue {
    fn emit_hold(&self, event: ButtonEvent) {
        self.enqueue(event);
    }
}

impl QueueReceiver {
    /// Wait up to `timeout` for the next event in FIFO order
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ButtonEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<ButtonEvent, TryRecvError> {
        self.rx.try_recv()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use std::thread;

    fn event(button: &str, ts: f64) -> ButtonEvent {
        ButtonEvent {
            device_name: "Remoter ATV3 Keyboard".to_string(),
            device_path: "/dev/input/event3".to_string(),
            key_code: Some(103),
            key_name: "KEY_UP".to_string(),
            scan_code: None,
            button: button.to_string(),
            timestamp: ts,
            event_type: EventType::KeyDown,
        }
    }

    #[test]
    fn full_queue_drops_new_event() {
        let (queue, rx) = bounded(2);
        assert!(queue.enqueue(event("a", 1.0)));
        assert!(queue.enqueue(event("b", 2.0)));
        assert!(!queue.enqueue(event("c", 3.0)));

        assert_eq!(rx.try_recv().unwrap().button, "a");
        assert_eq!(rx.try_recv().unwrap().button, "b");
        assert!(rx.try_recv().is_err());

        assert_eq!(queue.stats().accepted(), 2);
        assert_eq!(queue.stats().dropped(), 1);
    }

    #[test]
    fn full_queue_message_names_the_dropped_event() {
        let mut dropped = event("vol_up", 1712345678.123456);
        dropped.event_type = EventType::KeyHold;

        let message = full_queue_message(256, &dropped, 7);
        assert_eq!(
            message,
            "Event queue full (size=256); dropped key_hold vol_up ts=1712345678.123 (dropped=7)"
        );
    }

    #[test]
    fn space_frees_after_dequeue() {
        let (queue, rx) = bounded(1);
        assert!(queue.enqueue(event("a", 1.0)));
        assert!(!queue.enqueue(event("b", 2.0)));
        rx.try_recv().unwrap();
        assert!(queue.enqueue(event("c", 3.0)));
        assert_eq!(rx.try_recv().unwrap().button, "c");
    }

    #[test]
    fn preserves_fifo_order() {
        let (queue, rx) = bounded(16);
        for i in 0..10 {
            queue.enqueue(event(&format!("b{}", i), i as f64));
        }
        for i in 0..10 {
            assert_eq!(rx.try_recv().unwrap().button, format!("b{}", i));
        }
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (queue, _rx) = bounded(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.enqueue(event("a", 1.0)));
    }

    #[test]
    fn enqueue_after_receiver_dropped_fails() {
        let (queue, rx) = bounded(4);
        drop(rx);
        assert!(!queue.enqueue(event("a", 1.0)));
        assert_eq!(queue.stats().dropped(), 1);
    }

    #[test]
    fn concurrent_producers_share_capacity() {
        let (queue, rx) = bounded(8);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = queue.clone();
                thread::spawn(move || {
                    (0..4)
                        .filter(|i| q.enqueue(event(&format!("{}-{}", t, i), 0.0)))
                        .count()
                })
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(accepted, 8);
        assert_eq!(rx.len(), 8);
        assert_eq!(queue.stats().dropped(), 8);
    }

    #[test]
    fn hold_sink_enqueues() {
        let (queue, rx) = bounded(2);
        queue.emit_hold(event("up", 1.0));
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).unwrap().button, "up");
    }
}
