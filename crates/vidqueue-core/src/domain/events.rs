//! Events emitted by the upload manager for observers.
//!
//! Purely observational: nothing in the core reacts to them.

use serde::Serialize;

use super::ids::ItemId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued { id: ItemId, name: String },
    Rejected { name: String, reason: String },
    Started { id: ItemId, attempt: u32 },
    Progress { id: ItemId, percent: u8 },
    Processing { id: ItemId },
    Completed { id: ItemId },
    Failed { id: ItemId, detail: String },
    Retried { id: ItemId },
    Removed { id: ItemId },
    /// No pending or busy items left.
    Idle,
}
