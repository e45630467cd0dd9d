//! EventSink port - where queue events go.
//!
//! `emit` is synchronous: it is called from inside the scheduling loop and
//! must not block it.

use crate::domain::QueueEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: QueueEvent);
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: QueueEvent) {}
}
