//! Commands consumed by the manager loop.
//!
//! User intents carry a oneshot reply; the internal ones come from transfer
//! tasks and timers and carry the attempt number so late reports for an old
//! attempt can be recognised and dropped.

use tokio::sync::oneshot;

use crate::domain::{ItemId, MediaFile, Rejection, TransferOutcome, UploadError, WorkItem};
use crate::observability::QueueCounts;

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Result of one `enqueue` call.
#[derive(Debug, Clone, Default)]
pub struct EnqueueReport {
    /// Newly queued items, in the order they were given.
    pub accepted: Vec<WorkItem>,

    /// Files refused by the validator. None of these entered the queue.
    pub rejected: Vec<Rejection>,
}

impl EnqueueReport {
    pub fn accepted_ids(&self) -> Vec<ItemId> {
        self.accepted.iter().map(WorkItem::id).collect()
    }
}

pub(crate) enum Command {
    Enqueue {
        files: Vec<MediaFile>,
        reply: Reply<Result<EnqueueReport, UploadError>>,
    },
    Retry {
        id: ItemId,
        reply: Reply<Result<WorkItem, UploadError>>,
    },
    Remove {
        id: ItemId,
        reply: Reply<Result<WorkItem, UploadError>>,
    },
    List {
        reply: Reply<Vec<WorkItem>>,
    },
    Get {
        id: ItemId,
        reply: Reply<Option<WorkItem>>,
    },
    Counts {
        reply: Reply<QueueCounts>,
    },
    /// Server-side processing reported back (external pipeline).
    FinishProcessing {
        id: ItemId,
        outcome: TransferOutcome,
        reply: Reply<Result<WorkItem, UploadError>>,
    },

    TransferFinished {
        id: ItemId,
        attempt: u32,
        outcome: TransferOutcome,
    },
    Progress {
        id: ItemId,
        attempt: u32,
        percent: u8,
    },
    ProcessingDeadline {
        id: ItemId,
        attempt: u32,
    },
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::Enqueue { .. } => "enqueue",
            Command::Retry { .. } => "retry",
            Command::Remove { .. } => "remove",
            Command::List { .. } => "list",
            Command::Get { .. } => "get",
            Command::Counts { .. } => "counts",
            Command::FinishProcessing { .. } => "finish_processing",
            Command::TransferFinished { .. } => "transfer_finished",
            Command::Progress { .. } => "progress",
            Command::ProcessingDeadline { .. } => "processing_deadline",
        }
    }
}
