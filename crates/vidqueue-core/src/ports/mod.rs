//! Ports - the seams of the queue manager.
//!
//! Each trait hides something the core does not own: time, id allocation,
//! the network transfer, and whoever watches the queue.

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod transfer;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::transfer::{ProgressReporter, TransferExecutor, TransferRequest};
