//! Work item state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a work item.
///
/// State transitions:
/// - Pending -> Uploading -> Completed
/// - Pending -> Uploading -> Error -> Pending (user retry, unbounded)
/// - Pending -> Uploading -> Processing -> Completed | Error
///   (only when the server signals post-transfer work)
/// - Pending | Error | Completed -> [deleted] (user removal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for its turn.
    Pending,

    /// Payload is being transferred.
    Uploading,

    /// Transfer finished, server-side work still running.
    Processing,

    /// Successfully done.
    Completed,

    /// Last attempt failed; retry is possible.
    Error,
}

impl ItemStatus {
    /// Does this item occupy the single transfer slot?
    pub fn is_busy(self) -> bool {
        matches!(self, ItemStatus::Uploading | ItemStatus::Processing)
    }

    /// Is this item eligible for the scheduler?
    pub fn is_runnable(self) -> bool {
        matches!(self, ItemStatus::Pending)
    }

    /// Busy items cannot be removed without orphaning the in-flight call.
    pub fn is_removable(self) -> bool {
        !self.is_busy()
    }

    /// Is `self -> next` an edge of the state machine?
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Uploading, Completed)
                | (Uploading, Error)
                | (Uploading, Processing)
                | (Processing, Completed)
                | (Processing, Error)
                | (Error, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Error => "error",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
