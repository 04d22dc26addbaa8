//! Replay/live gate.
//!
//! While a subscribe is replaying history, live events for the session are
//! parked here instead of being written to the socket. The gate opens
//! exactly once, after replay has flushed everything parked above its final
//! offset; from then on live events bypass the buffer entirely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Event;

#[derive(Default)]
pub struct PendingQueue {
    open: AtomicBool,
    events: Mutex<Vec<Arc<Event>>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Park `event` unless the gate is open. Returns false when the gate is
    /// open and the caller should deliver the event directly. The gate check
    /// and the push happen under one lock so an event can never slip past a
    /// concurrent flush unbuffered.
    pub fn enqueue(&self, event: Arc<Event>) -> bool {
        if self.is_open() {
            return false;
        }
        let mut events = self.events.lock();
        if self.is_open() {
            return false;
        }
        events.push(event);
        true
    }

    /// Drain everything currently parked.
    pub fn take(&self) -> Vec<Arc<Event>> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Latch the gate open if nothing is parked. Returns false when new
    /// events arrived since the last drain; the caller must flush again.
    pub fn open_if_empty(&self) -> bool {
        let events = self.events.lock();
        if events.is_empty() {
            self.open.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(offset: u64) -> Arc<Event> {
        Arc::new(Event {
            offset,
            sender: String::new(),
            casino_id: 0,
            game_id: 0,
            req_id: 0,
            event_type: 0,
            data: serde_json::Value::Null,
        })
    }

    #[test]
    fn gate_starts_closed_and_buffers() {
        let queue = PendingQueue::new();
        assert!(!queue.is_open());
        assert!(queue.enqueue(event(1)));
        assert!(queue.enqueue(event(2)));
        assert_eq!(queue.take().len(), 2);
    }

    #[test]
    fn open_fails_while_events_remain() {
        let queue = PendingQueue::new();
        queue.enqueue(event(1));
        assert!(!queue.open_if_empty());
        assert!(!queue.is_open());

        queue.take();
        assert!(queue.open_if_empty());
        assert!(queue.is_open());
    }

    #[test]
    fn open_gate_rejects_enqueue() {
        let queue = PendingQueue::new();
        assert!(queue.open_if_empty());
        assert!(!queue.enqueue(event(1)));
        assert!(queue.take().is_empty());
    }
}
