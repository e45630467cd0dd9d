//! App - the running uploader.
//!
//! - **UploaderBuilder**: wiring and start-up validation
//! - **UploadManager / ManagerHandle**: the actor owning the queue and its client

pub mod builder;
mod command;
pub mod manager;

pub use self::builder::{BuildError, UploaderBuilder};
pub use self::command::EnqueueReport;
pub use self::manager::{ManagerHandle, UploadManager};
