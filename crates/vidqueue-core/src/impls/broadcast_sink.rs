//! BroadcastEventSink - fan queue events out to any number of subscribers.
//!
//! Built on `tokio::sync::broadcast`. Slow subscribers lag and lose old
//! events; the manager is never blocked by them.

use tokio::sync::broadcast;

use crate::domain::QueueEvent;
use crate::ports::EventSink;

pub struct BroadcastEventSink {
    tx: broadcast::Sender<QueueEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: QueueEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
