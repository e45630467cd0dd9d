//! Queue module: the store of work items and the scheduling policy over it.

pub mod scheduler;
mod store;

pub use scheduler::{Dispatch, advance};
pub use store::QueueStore;
