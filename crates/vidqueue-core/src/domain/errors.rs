//! Error taxonomy.
//!
//! - `Validation`: rejected before entering the queue, never touches state.
//! - `Transfer` / `RemoteRejection`: one attempt failed; the item moves to
//!   `error` and the scheduler carries on.
//! - `Integrity`: a caller broke the contract (busy removal, unknown id,
//!   illegal transition). Fatal to that call only.

use thiserror::Error;

use super::ids::ItemId;
use super::state::ItemStatus;
use super::validation::Rejection;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("validation failed: {0}")]
    Validation(#[from] Rejection),

    #[error("{0}")]
    Transfer(String),

    /// Message from the remote endpoint, kept verbatim.
    #[error("{0}")]
    RemoteRejection(String),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("upload manager has shut down")]
    Closed,
}

impl UploadError {
    /// Text stored as the work item's `error_detail`.
    pub fn detail(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("unknown work item {0}")]
    UnknownItem(ItemId),

    #[error("work item {0} is busy and cannot be removed")]
    ItemBusy(ItemId),

    #[error("work item {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },
}
