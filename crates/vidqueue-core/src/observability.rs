use serde::{Deserialize, Serialize};

use crate::domain::ItemStatus;

/// Work items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub uploading: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

impl QueueCounts {
    pub fn record(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Pending => self.pending += 1,
            ItemStatus::Uploading => self.uploading += 1,
            ItemStatus::Processing => self.processing += 1,
            ItemStatus::Completed => self.completed += 1,
            ItemStatus::Error => self.error += 1,
        }
    }

    pub fn busy(&self) -> usize {
        self.uploading + self.processing
    }

    /// Nothing waiting and nothing in flight.
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.busy() == 0
    }

    pub fn total(&self) -> usize {
        self.pending + self.busy() + self.completed + self.error
    }
}

impl FromIterator<ItemStatus> for QueueCounts {
    fn from_iter<I: IntoIterator<Item = ItemStatus>>(iter: I) -> Self {
        let mut counts = QueueCounts::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}
