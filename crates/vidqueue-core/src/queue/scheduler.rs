//! Scheduler: greedy FIFO with a single transfer slot.
//!
//! `advance` is the whole policy. It is a plain synchronous function so the
//! busy check and the `pending -> uploading` transition cannot be split by
//! another mutation.

use tracing::{trace, warn};

use super::QueueStore;
use crate::domain::{ItemId, ItemPatch, ItemStatus, MediaFile};
use crate::ports::TransferRequest;

/// An item that was just moved to `uploading` and must be transferred.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub item_id: ItemId,
    pub attempt: u32,
    pub file: MediaFile,
}

impl From<Dispatch> for TransferRequest {
    fn from(dispatch: Dispatch) -> Self {
        TransferRequest {
            item_id: dispatch.item_id,
            attempt: dispatch.attempt,
            file: dispatch.file,
        }
    }
}

/// Pick the next item to transfer, if the slot is free.
///
/// 1. Something uploading/processing: do nothing.
/// 2. Otherwise take the first pending item in insertion order.
/// 3. Mark it uploading and return it.
///
/// Idempotent: calling it again before the transfer reports back returns
/// `None`.
pub fn advance(store: &mut QueueStore) -> Option<Dispatch> {
    if let Some(busy) = store.busy() {
        trace!(item_id = %busy.id(), status = %busy.status(), "transfer slot taken");
        return None;
    }

    let id = store.first_pending()?;
    match store.update(id, ItemPatch::status(ItemStatus::Uploading)) {
        Ok(item) => Some(Dispatch {
            item_id: id,
            attempt: item.attempts(),
            file: item.payload().clone(),
        }),
        Err(err) => {
            warn!(item_id = %id, error = %err, "could not start transfer");
            None
        }
    }
}
