//! Domain model (ids, work items, state machine, validation, outcomes, errors, events).

pub mod errors;
pub mod events;
pub mod ids;
pub mod item;
pub mod outcome;
pub mod state;
pub mod validation;

pub use self::errors::{IntegrityError, UploadError};
pub use self::events::QueueEvent;
pub use self::ids::{ItemId, ParseIdError};
pub use self::item::{BlobSource, ItemPatch, MediaFile, WorkItem, guess_media_type};
pub use self::outcome::{OutcomeKind, TransferOutcome};
pub use self::state::ItemStatus;
pub use self::validation::{Rejection, Validator};
