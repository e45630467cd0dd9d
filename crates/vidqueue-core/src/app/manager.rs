//! UploadManager - the single owner of the queue.
//!
//! Design:
//! - one task owns the `QueueStore` and consumes a command channel, so every
//!   mutation is serialised without a lock
//! - after each command the loop calls `scheduler::advance`; at most one
//!   transfer is ever in flight
//! - transfers run in their own task and report back through the same channel,
//!   tagged with `(id, attempt)`; reports that no longer match the item are
//!   dropped
//! - a `watch` channel carries a full snapshot after every change
//! - dropping the `UploadManager` (or calling `shutdown`) stops dispatching;
//!   the loop exits once nothing is in flight

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::command::{Command, EnqueueReport, Reply};
use crate::domain::{
    IntegrityError, ItemId, ItemPatch, ItemStatus, MediaFile, QueueEvent, TransferOutcome,
    UploadError, Validator, WorkItem,
};
use crate::observability::QueueCounts;
use crate::ports::{EventSink, ProgressReporter, TransferExecutor};
use crate::queue::{Dispatch, QueueStore, scheduler};

pub(crate) const PROCESSING_TIMED_OUT: &str = "server-side processing timed out";

/// Running manager. Owns the loop task; hand out `ManagerHandle`s to talk to it.
pub struct UploadManager {
    handle: ManagerHandle,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Everything the loop needs, assembled by `UploaderBuilder`.
pub(crate) struct ManagerParts {
    pub store: QueueStore,
    pub validator: Validator,
    pub executor: Arc<dyn TransferExecutor>,
    pub events: Arc<dyn EventSink>,
    pub transfer_timeout: Duration,
    pub await_processing: bool,
    pub processing_timeout: Duration,
    pub command_buffer: usize,
}

impl UploadManager {
    /// Must be called inside a tokio runtime.
    pub(crate) fn spawn(parts: ManagerParts) -> Self {
        let (tx, rx) = mpsc::channel(parts.command_buffer);
        let (snapshot_tx, snapshot_rx) = watch::channel(parts.store.list());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager_loop = ManagerLoop {
            was_idle: parts.store.is_idle(),
            store: parts.store,
            validator: parts.validator,
            executor: parts.executor,
            events: parts.events,
            transfer_timeout: parts.transfer_timeout,
            await_processing: parts.await_processing,
            processing_timeout: parts.processing_timeout,
            commands: rx,
            loopback: tx.downgrade(),
            snapshots: snapshot_tx,
            shutting_down: false,
        };
        let join = tokio::spawn(manager_loop.run(shutdown_rx));

        Self {
            handle: ManagerHandle {
                tx,
                snapshots: snapshot_rx,
            },
            shutdown_tx,
            join,
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        self.handle.clone()
    }

    /// Stop dispatching, wait for the in-flight item to settle, then stop.
    ///
    /// Handles used afterwards get `UploadError::Closed`.
    pub async fn shutdown(self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.join.await {
            warn!(error = %err, "manager task ended abnormally");
        }
    }
}

/// Cheap, cloneable client of the manager loop.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Vec<WorkItem>>,
}

impl ManagerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, UploadError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| UploadError::Closed)?;
        rx.await.map_err(|_| UploadError::Closed)
    }

    /// Validate and queue files. Rejected files are reported, not queued.
    pub async fn enqueue(&self, files: Vec<MediaFile>) -> Result<EnqueueReport, UploadError> {
        self.request(|reply| Command::Enqueue { files, reply })
            .await?
    }

    /// Queue a single file. A validator refusal comes back as
    /// `UploadError::Validation`.
    pub async fn enqueue_one(&self, file: MediaFile) -> Result<WorkItem, UploadError> {
        let mut report = self.enqueue(vec![file]).await?;
        match (report.accepted.pop(), report.rejected.pop()) {
            (_, Some(rejection)) => Err(UploadError::Validation(rejection)),
            (Some(item), None) => Ok(item),
            // one file in always yields one accepted or one rejected
            (None, None) => Err(UploadError::Closed),
        }
    }

    /// `error -> pending`, keeping the item's position.
    pub async fn retry(&self, id: ItemId) -> Result<WorkItem, UploadError> {
        self.request(|reply| Command::Retry { id, reply }).await?
    }

    /// Refused while the item is uploading or processing.
    pub async fn remove(&self, id: ItemId) -> Result<WorkItem, UploadError> {
        self.request(|reply| Command::Remove { id, reply }).await?
    }

    pub async fn list(&self) -> Result<Vec<WorkItem>, UploadError> {
        self.request(|reply| Command::List { reply }).await
    }

    pub async fn get(&self, id: ItemId) -> Result<Option<WorkItem>, UploadError> {
        self.request(|reply| Command::Get { id, reply }).await
    }

    pub async fn counts(&self) -> Result<QueueCounts, UploadError> {
        self.request(|reply| Command::Counts { reply }).await
    }

    /// Report the server-side processing result for an item in `processing`.
    pub async fn finish_processing(
        &self,
        id: ItemId,
        outcome: TransferOutcome,
    ) -> Result<WorkItem, UploadError> {
        self.request(|reply| Command::FinishProcessing { id, outcome, reply })
            .await?
    }

    /// Snapshot stream; the current value is available immediately.
    pub fn subscribe(&self) -> watch::Receiver<Vec<WorkItem>> {
        self.snapshots.clone()
    }

    /// Wait until nothing is pending, uploading or processing.
    ///
    /// Returns the snapshot that satisfied the condition.
    pub async fn wait_until_idle(&self) -> Result<Vec<WorkItem>, UploadError> {
        let mut rx = self.snapshots.clone();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if is_idle(&snapshot) {
                    return Ok(snapshot.clone());
                }
            }
            rx.changed().await.map_err(|_| UploadError::Closed)?;
        }
    }
}

fn is_idle(items: &[WorkItem]) -> bool {
    items
        .iter()
        .all(|item| !item.status().is_runnable() && !item.status().is_busy())
}

struct ManagerLoop {
    store: QueueStore,
    validator: Validator,
    executor: Arc<dyn TransferExecutor>,
    events: Arc<dyn EventSink>,
    transfer_timeout: Duration,
    await_processing: bool,
    processing_timeout: Duration,
    commands: mpsc::Receiver<Command>,
    // weak, so the loop ends once every handle is gone
    loopback: mpsc::WeakSender<Command>,
    snapshots: watch::Sender<Vec<WorkItem>>,
    shutting_down: bool,
    was_idle: bool,
}

impl ManagerLoop {
    async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("upload manager started");
        loop {
            tokio::select! {
                changed = shutdown_rx.changed(), if !self.shutting_down => {
                    // Err: the UploadManager was dropped, which also means stop
                    if changed.is_err() || *shutdown_rx.borrow() {
                        self.shutting_down = true;
                        info!(in_flight = self.store.busy().is_some(), "shutdown requested");
                    }
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!("all handles dropped");
                        break;
                    }
                },
            }

            if self.shutting_down && self.store.busy().is_none() {
                break;
            }
        }
        info!(counts = ?self.store.counts(), "upload manager stopped");
    }

    fn handle(&mut self, command: Command) {
        debug!(command = command.name(), "handling command");
        match command {
            Command::Enqueue { files, reply } => {
                let result = if self.shutting_down {
                    Err(UploadError::Closed)
                } else {
                    Ok(self.enqueue(files))
                };
                self.settle();
                let _ = reply.send(result);
            }
            Command::Retry { id, reply } => {
                let result = if self.shutting_down {
                    Err(UploadError::Closed)
                } else {
                    self.retry(id)
                };
                self.settle();
                let _ = reply.send(result);
            }
            Command::Remove { id, reply } => {
                let result = self.remove(id);
                self.settle();
                let _ = reply.send(result);
            }
            Command::List { reply } => {
                let _ = reply.send(self.store.list());
            }
            Command::Get { id, reply } => {
                let _ = reply.send(self.store.get(id).cloned());
            }
            Command::Counts { reply } => {
                let _ = reply.send(self.store.counts());
            }
            Command::FinishProcessing { id, outcome, reply } => {
                let result = self.finish_processing(id, outcome);
                self.settle();
                let _ = reply.send(result);
            }
            Command::TransferFinished {
                id,
                attempt,
                outcome,
            } => {
                self.transfer_finished(id, attempt, outcome);
                self.settle();
            }
            Command::Progress {
                id,
                attempt,
                percent,
            } => {
                if self.progress(id, attempt, percent) {
                    self.publish();
                }
            }
            Command::ProcessingDeadline { id, attempt } => {
                self.processing_deadline(id, attempt);
                self.settle();
            }
        }
    }

    fn enqueue(&mut self, files: Vec<MediaFile>) -> EnqueueReport {
        let mut report = EnqueueReport::default();
        let mut accepted = Vec::with_capacity(files.len());

        for file in files {
            match self.validator.validate(&file) {
                Ok(()) => accepted.push(file),
                Err(rejection) => {
                    warn!(name = file.name(), reason = %rejection, "file rejected");
                    self.events.emit(QueueEvent::Rejected {
                        name: file.name().to_string(),
                        reason: rejection.to_string(),
                    });
                    report.rejected.push(rejection);
                }
            }
        }

        report.accepted = self.store.enqueue(accepted);
        for item in &report.accepted {
            info!(item_id = %item.id(), name = item.payload().name(), size = item.payload().size(), "queued");
            self.events.emit(QueueEvent::Enqueued {
                id: item.id(),
                name: item.payload().name().to_string(),
            });
        }
        report
    }

    fn retry(&mut self, id: ItemId) -> Result<WorkItem, UploadError> {
        let item = self.store.retry(id)?;
        info!(item_id = %id, "retry requested");
        self.events.emit(QueueEvent::Retried { id });
        Ok(item)
    }

    fn remove(&mut self, id: ItemId) -> Result<WorkItem, UploadError> {
        let item = self.store.remove(id)?;
        info!(item_id = %id, "removed");
        self.events.emit(QueueEvent::Removed { id });
        Ok(item)
    }

    fn finish_processing(
        &mut self,
        id: ItemId,
        outcome: TransferOutcome,
    ) -> Result<WorkItem, UploadError> {
        let current = self
            .store
            .get(id)
            .ok_or(IntegrityError::UnknownItem(id))?
            .status();
        if current != ItemStatus::Processing {
            let to = if outcome.is_success() {
                ItemStatus::Completed
            } else {
                ItemStatus::Error
            };
            return Err(IntegrityError::IllegalTransition {
                id,
                from: current,
                to,
            }
            .into());
        }
        Ok(self.apply_outcome(id, outcome)?)
    }

    fn transfer_finished(&mut self, id: ItemId, attempt: u32, outcome: TransferOutcome) {
        if !self.is_current(id, attempt, ItemStatus::Uploading) {
            warn!(item_id = %id, attempt, outcome = ?outcome.kind(), "stale transfer report ignored");
            return;
        }

        let result = match outcome {
            TransferOutcome::Success if self.await_processing => self
                .store
                .update(id, ItemPatch::status(ItemStatus::Processing))
                .map(|item| {
                    info!(item_id = %id, attempt, "transferred, waiting for server-side processing");
                    self.events.emit(QueueEvent::Processing { id });
                    self.arm_processing_deadline(id, attempt);
                    item
                }),
            outcome => self.apply_outcome(id, outcome),
        };
        if let Err(err) = result {
            warn!(item_id = %id, error = %err, "could not record transfer outcome");
        }
    }

    /// `uploading`/`processing` to `completed` or `error`.
    fn apply_outcome(
        &mut self,
        id: ItemId,
        outcome: TransferOutcome,
    ) -> Result<WorkItem, IntegrityError> {
        match outcome {
            TransferOutcome::Success => {
                let item = self.store.update(id, ItemPatch::status(ItemStatus::Completed))?;
                info!(item_id = %id, attempt = item.attempts(), "upload completed");
                self.events.emit(QueueEvent::Completed { id });
                Ok(item)
            }
            TransferOutcome::Failure(err) => {
                let item = self.store.update(id, ItemPatch::failed(err.detail()))?;
                let detail = item.error_detail().unwrap_or_default().to_string();
                warn!(item_id = %id, attempt = item.attempts(), detail = %detail, "upload failed");
                self.events.emit(QueueEvent::Failed { id, detail });
                Ok(item)
            }
        }
    }

    fn progress(&mut self, id: ItemId, attempt: u32, percent: u8) -> bool {
        if !self.is_current(id, attempt, ItemStatus::Uploading) {
            debug!(item_id = %id, attempt, percent, "stale progress ignored");
            return false;
        }
        match self.store.update(id, ItemPatch::progress(percent)) {
            Ok(item) => {
                self.events.emit(QueueEvent::Progress {
                    id,
                    percent: item.progress(),
                });
                true
            }
            Err(err) => {
                warn!(item_id = %id, error = %err, "could not record progress");
                false
            }
        }
    }

    fn processing_deadline(&mut self, id: ItemId, attempt: u32) {
        if !self.is_current(id, attempt, ItemStatus::Processing) {
            return;
        }
        warn!(item_id = %id, timeout = ?self.processing_timeout, "processing deadline passed");
        if let Err(err) = self.apply_outcome(id, TransferOutcome::transport(PROCESSING_TIMED_OUT)) {
            warn!(item_id = %id, error = %err, "could not record processing timeout");
        }
    }

    fn is_current(&self, id: ItemId, attempt: u32, status: ItemStatus) -> bool {
        self.store
            .get(id)
            .is_some_and(|item| item.status() == status && item.attempts() == attempt)
    }

    /// Advance the scheduler (unless stopping) and publish the new snapshot.
    fn settle(&mut self) {
        if !self.shutting_down
            && let Some(loopback) = self.loopback.upgrade()
            && let Some(dispatch) = scheduler::advance(&mut self.store)
        {
            self.start_transfer(dispatch, loopback);
        }
        self.publish();
    }

    fn start_transfer(&self, dispatch: Dispatch, loopback: mpsc::Sender<Command>) {
        let (id, attempt) = (dispatch.item_id, dispatch.attempt);
        info!(item_id = %id, attempt, name = dispatch.file.name(), "transfer started");
        self.events.emit(QueueEvent::Started { id, attempt });

        let progress_tx = loopback.clone();
        let progress = ProgressReporter::new(move |percent| {
            // dropped when the loop is backed up; the next report catches up
            let _ = progress_tx.try_send(Command::Progress {
                id,
                attempt,
                percent,
            });
        });

        let executor = Arc::clone(&self.executor);
        let limit = self.transfer_timeout;
        tokio::spawn(async move {
            let mut transfer =
                tokio::spawn(async move { executor.transfer(dispatch.into(), progress).await });
            // applies to every executor, not only those with their own timeout
            let outcome = match tokio::time::timeout(limit, &mut transfer).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => TransferOutcome::transport(format!("transfer task failed: {err}")),
                Err(_) => {
                    transfer.abort();
                    warn!(item_id = %id, attempt, timeout = ?limit, "transfer timed out");
                    TransferOutcome::transport(format!(
                        "transfer timed out after {}s",
                        limit.as_secs_f64()
                    ))
                }
            };
            if loopback
                .send(Command::TransferFinished {
                    id,
                    attempt,
                    outcome,
                })
                .await
                .is_err()
            {
                warn!(item_id = %id, attempt, "manager gone before transfer finished");
            }
        });
    }

    fn arm_processing_deadline(&self, id: ItemId, attempt: u32) {
        let loopback = self.loopback.clone();
        let timeout = self.processing_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(Command::ProcessingDeadline { id, attempt }).await;
            }
        });
    }

    fn publish(&mut self) {
        self.snapshots.send_replace(self.store.list());

        let idle = self.store.is_idle();
        if idle && !self.was_idle {
            info!(counts = ?self.store.counts(), "queue idle");
            self.events.emit(QueueEvent::Idle);
        }
        self.was_idle = idle;
    }
}
