//! IdGenerator port - id allocation.
//!
//! Abstracted as a trait so tests can drive time through a `FixedClock`.

use crate::domain::ids::ItemId;
use crate::ports::Clock;
use ulid::Ulid;

/// Allocates work item ids.
pub trait IdGenerator: Send + Sync {
    fn generate_item_id(&self) -> ItemId;
}

/// ULID-based generator.
///
/// The timestamp part comes from the clock, the random part from `rand`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_item_id(&self) -> ItemId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        ItemId::from(ulid)
    }
}
