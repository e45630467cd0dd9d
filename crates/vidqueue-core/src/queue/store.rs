//! Queue store: the ordered collection of work items.
//!
//! Design:
//! - Single source of truth for what is pending/active/done.
//! - `order` holds ids in insertion order, which is also FIFO priority.
//! - Every status change goes through the state machine check here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::domain::item::GENERIC_FAILURE;
use crate::domain::{IntegrityError, ItemId, ItemPatch, ItemStatus, MediaFile, WorkItem};
use crate::observability::QueueCounts;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

pub struct QueueStore {
    records: HashMap<ItemId, WorkItem>,

    /// Ids in insertion order.
    order: Vec<ItemId>,

    /// Every id ever handed out, removed ones included.
    issued: HashSet<ItemId>,

    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl QueueStore {
    pub fn new(ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            issued: HashSet::new(),
            ids,
            clock,
        }
    }

    /// Append files after everything already queued. Returns the new items
    /// in the same order as `files`.
    pub fn enqueue(&mut self, files: Vec<MediaFile>) -> Vec<WorkItem> {
        let now = self.clock.now();
        let mut created = Vec::with_capacity(files.len());
        for file in files {
            let id = self.allocate_id();
            let item = WorkItem::new(id, file, now);
            debug!(item_id = %id, name = item.payload().name(), "enqueued");
            self.records.insert(id, item.clone());
            self.order.push(id);
            created.push(item);
        }
        created
    }

    /// Point update, checked against the state machine.
    ///
    /// `error_detail` is only used when moving to `Error`; progress is only
    /// kept while uploading.
    pub fn update(&mut self, id: ItemId, patch: ItemPatch) -> Result<WorkItem, IntegrityError> {
        let now = self.clock.now();
        let record = self
            .records
            .get_mut(&id)
            .ok_or(IntegrityError::UnknownItem(id))?;

        if let Some(next) = patch.status
            && next != record.status()
        {
            let from = record.status();
            if !from.can_transition_to(next) {
                return Err(IntegrityError::IllegalTransition { id, from, to: next });
            }
            let detail = match next {
                ItemStatus::Error => Some(
                    patch
                        .error_detail
                        .clone()
                        .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
                ),
                _ => None,
            };
            record.transition(next, detail, now);
            debug!(item_id = %id, %from, to = %next, "status changed");
        }

        if let Some(progress) = patch.progress {
            record.set_progress(progress, now);
        }
        if let Some(label) = patch.stage_label {
            record.set_stage_label(label, now);
        }

        Ok(record.clone())
    }

    /// Delete an item. Refused while the item holds the transfer slot.
    pub fn remove(&mut self, id: ItemId) -> Result<WorkItem, IntegrityError> {
        let record = self.records.get(&id).ok_or(IntegrityError::UnknownItem(id))?;
        if !record.status().is_removable() {
            return Err(IntegrityError::ItemBusy(id));
        }
        self.order.retain(|x| *x != id);
        let removed = self
            .records
            .remove(&id)
            .ok_or(IntegrityError::UnknownItem(id))?;
        debug!(item_id = %id, status = %removed.status(), "removed");
        Ok(removed)
    }

    /// `error -> pending`. The item keeps its position in the queue.
    pub fn retry(&mut self, id: ItemId) -> Result<WorkItem, IntegrityError> {
        let current = self.get(id).ok_or(IntegrityError::UnknownItem(id))?.status();
        if current != ItemStatus::Error {
            return Err(IntegrityError::IllegalTransition {
                id,
                from: current,
                to: ItemStatus::Pending,
            });
        }
        self.update(id, ItemPatch::status(ItemStatus::Pending))
    }

    pub fn get(&self, id: ItemId) -> Option<&WorkItem> {
        self.records.get(&id)
    }

    /// Ordered, read-only view.
    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Ordered snapshot.
    pub fn list(&self) -> Vec<WorkItem> {
        self.iter().cloned().collect()
    }

    /// The item holding the transfer slot, if any.
    pub fn busy(&self) -> Option<&WorkItem> {
        self.iter().find(|item| item.status().is_busy())
    }

    /// First pending item in FIFO order.
    pub fn first_pending(&self) -> Option<ItemId> {
        self.iter()
            .find(|item| item.status().is_runnable())
            .map(WorkItem::id)
    }

    pub fn counts(&self) -> QueueCounts {
        self.records.values().map(WorkItem::status).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.counts().is_idle()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn allocate_id(&mut self) -> ItemId {
        loop {
            let id = self.ids.generate_item_id();
            if self.issued.insert(id) {
                return id;
            }
        }
    }
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new(
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }
}
