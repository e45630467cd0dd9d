//! vidqueue-core
//!
//! Sequential upload queue: files are validated, queued, and transferred one
//! at a time in the order they were added.
//!
//! # Modules
//! - **domain**: work items, state machine, validation, outcomes, errors, events
//! - **ports**: seams (TransferExecutor, EventSink, Clock, IdGenerator)
//! - **queue**: QueueStore and the single-flight scheduler
//! - **app**: UploaderBuilder and the UploadManager actor
//! - **impls**: HTTP multipart executor, broadcast event sink
//! - **config**: TOML configuration
//! - **observability**: queue counts

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;

pub use app::{BuildError, EnqueueReport, ManagerHandle, UploadManager, UploaderBuilder};
pub use config::{ConfigError, UploaderConfig};
pub use domain::{
    ItemId, ItemStatus, MediaFile, QueueEvent, Rejection, TransferOutcome, UploadError, WorkItem,
};
pub use observability::QueueCounts;
