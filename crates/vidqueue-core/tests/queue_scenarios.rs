//! End-to-end behaviour of the upload manager with a scripted transfer executor.
//!
//! Each transfer blocks until the test decides its outcome, so the tests can
//! observe the queue while an item is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;

use vidqueue_core::domain::{BlobSource, IntegrityError};
use vidqueue_core::impls::BroadcastEventSink;
use vidqueue_core::ports::{ProgressReporter, TransferExecutor, TransferRequest};
use vidqueue_core::{
    ItemId, ItemStatus, ManagerHandle, MediaFile, QueueEvent, Rejection, TransferOutcome,
    UploadError, UploadManager, UploaderBuilder, UploaderConfig, WorkItem,
};

const MB: u64 = 1024 * 1024;
const WAIT: Duration = Duration::from_secs(5);

struct Started {
    name: String,
    attempt: u32,
    progress: ProgressReporter,
    finish: oneshot::Sender<TransferOutcome>,
}

impl Started {
    fn succeed(self) {
        let _ = self.finish.send(TransferOutcome::success());
    }

    fn fail(self, message: &str) {
        let _ = self.finish.send(TransferOutcome::rejected(message));
    }
}

struct Gated {
    started: mpsc::UnboundedSender<Started>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait]
impl TransferExecutor for Gated {
    async fn transfer(&self, request: TransferRequest, progress: ProgressReporter) -> TransferOutcome {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let (finish, outcome) = oneshot::channel();
        let _ = self.started.send(Started {
            name: request.file.name().to_string(),
            attempt: request.attempt,
            progress,
            finish,
        });
        let outcome = outcome
            .await
            .unwrap_or_else(|_| TransferOutcome::transport("test dropped the transfer"));

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Succeeds immediately.
struct Instant;

#[async_trait]
impl TransferExecutor for Instant {
    async fn transfer(&self, _: TransferRequest, _: ProgressReporter) -> TransferOutcome {
        TransferOutcome::success()
    }
}

/// Never returns for `stuck.mp4`; succeeds for anything else.
struct Hang;

#[async_trait]
impl TransferExecutor for Hang {
    async fn transfer(&self, request: TransferRequest, _: ProgressReporter) -> TransferOutcome {
        if request.file.name() == "stuck.mp4" {
            std::future::pending::<()>().await;
        }
        TransferOutcome::success()
    }
}

struct Harness {
    manager: UploadManager,
    handle: ManagerHandle,
    executor: Arc<Gated>,
    started: mpsc::UnboundedReceiver<Started>,
    events: broadcast::Receiver<QueueEvent>,
}

impl Harness {
    fn new(config: UploaderConfig) -> Self {
        let (tx, started) = mpsc::unbounded_channel();
        let executor = Arc::new(Gated {
            started: tx,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let sink = Arc::new(BroadcastEventSink::new(1024));
        let events = sink.subscribe();

        let manager = UploaderBuilder::new(config)
            .executor(executor.clone())
            .event_sink(sink)
            .build()
            .unwrap();
        let handle = manager.handle();
        Self {
            manager,
            handle,
            executor,
            started,
            events,
        }
    }

    fn start() -> Self {
        Self::new(config())
    }

    async fn next_started(&mut self) -> Started {
        timeout(WAIT, self.started.recv())
            .await
            .expect("no transfer started")
            .expect("executor gone")
    }

    async fn enqueue(&self, files: Vec<MediaFile>) -> Vec<ItemId> {
        self.handle.enqueue(files).await.unwrap().accepted_ids()
    }

    async fn status(&self, id: ItemId) -> ItemStatus {
        self.handle.get(id).await.unwrap().unwrap().status()
    }

    fn events(&mut self) -> Vec<QueueEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn max_active(&self) -> usize {
        self.executor.max_active.load(Ordering::SeqCst)
    }
}

fn config() -> UploaderConfig {
    UploaderConfig::new("http://127.0.0.1:9/upload", "UC1")
}

fn video(name: &str, size: u64) -> MediaFile {
    MediaFile::new(
        name,
        size,
        Some("video/mp4".to_string()),
        BlobSource::Memory(Bytes::from_static(b"frames")),
    )
}

async fn wait_for(
    rx: &mut watch::Receiver<Vec<WorkItem>>,
    pred: impl FnMut(&Vec<WorkItem>) -> bool,
) -> Vec<WorkItem> {
    timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("condition not reached")
        .expect("manager gone")
        .clone()
}

fn status_of(items: &[WorkItem], id: ItemId) -> Option<ItemStatus> {
    items.iter().find(|i| i.id() == id).map(WorkItem::status)
}

#[tokio::test]
async fn valid_video_goes_pending_uploading_completed() {
    let mut h = Harness::start();

    let ids = h.enqueue(vec![video("holiday.mp4", 50 * MB)]).await;
    let id = ids[0];

    let started = h.next_started().await;
    assert_eq!(started.name, "holiday.mp4");
    assert_eq!(h.status(id).await, ItemStatus::Uploading);
    started.succeed();

    let items = h.handle.wait_until_idle().await.unwrap();
    assert_eq!(items[0].status(), ItemStatus::Completed);
    assert_eq!(items[0].progress(), 100);
    assert_eq!(items[0].stage_label(), "Upload complete");

    assert_eq!(
        h.events(),
        vec![
            QueueEvent::Enqueued {
                id,
                name: "holiday.mp4".into()
            },
            QueueEvent::Started { id, attempt: 1 },
            QueueEvent::Completed { id },
            QueueEvent::Idle,
        ]
    );
    h.manager.shutdown().await;
}

#[tokio::test]
async fn oversized_video_never_enters_the_queue() {
    let mut h = Harness::start();

    let report = h
        .handle
        .enqueue(vec![video("long-take.mp4", 150 * MB)])
        .await
        .unwrap();

    assert!(report.accepted.is_empty());
    assert!(matches!(
        report.rejected.as_slice(),
        [Rejection::TooLarge { size, max, .. }] if *size == 150 * MB && *max == 100 * MB
    ));
    assert!(h.handle.list().await.unwrap().is_empty());
    assert_eq!(h.handle.counts().await.unwrap().total(), 0);
    assert!(matches!(h.events().as_slice(), [QueueEvent::Rejected { .. }]));
    h.manager.shutdown().await;
}

#[tokio::test]
async fn mixed_batch_keeps_only_valid_files() {
    let mut h = Harness::start();

    let report = h
        .handle
        .enqueue(vec![
            video("a.mp4", MB),
            MediaFile::from_bytes("notes.pdf", "application/pdf", b"%PDF".to_vec()),
            MediaFile::new("mystery", 10, None, BlobSource::Memory(Bytes::new())),
            video("b.mp4", MB),
        ])
        .await
        .unwrap();

    let names: Vec<_> = report.accepted.iter().map(|i| i.payload().name().to_string()).collect();
    assert_eq!(names, ["a.mp4", "b.mp4"]);
    assert_eq!(report.rejected.len(), 2);
    assert_eq!(
        report.rejected[0].to_string(),
        "notes.pdf has unsupported media type application/pdf"
    );

    h.next_started().await.succeed();
    h.next_started().await.succeed();
    h.handle.wait_until_idle().await.unwrap();
    h.manager.shutdown().await;
}

#[tokio::test]
async fn failure_frees_the_slot_and_retry_completes() {
    let mut h = Harness::start();
    let ids = h
        .enqueue(vec![video("first.mp4", 10 * MB), video("second.mp4", 10 * MB)])
        .await;
    let (first, second) = (ids[0], ids[1]);

    h.next_started().await.fail("Transcoder unavailable");

    // the second starts while the first sits in error
    let started = h.next_started().await;
    assert_eq!(started.name, "second.mp4");
    let failed = h.handle.get(first).await.unwrap().unwrap();
    assert_eq!(failed.status(), ItemStatus::Error);
    assert_eq!(failed.error_detail(), Some("Transcoder unavailable"));
    assert_eq!(failed.stage_label(), "Upload failed");
    assert_eq!(h.status(second).await, ItemStatus::Uploading);

    started.succeed();
    h.handle.wait_until_idle().await.unwrap();
    h.events();

    let retried = h.handle.retry(first).await.unwrap();
    assert_eq!(retried.error_detail(), None);

    let again = h.next_started().await;
    assert_eq!(again.name, "first.mp4");
    assert_eq!(again.attempt, 2);
    again.succeed();

    let items = h.handle.wait_until_idle().await.unwrap();
    assert!(items.iter().all(|i| i.status() == ItemStatus::Completed));
    assert_eq!(
        h.events(),
        vec![
            QueueEvent::Retried { id: first },
            QueueEvent::Started {
                id: first,
                attempt: 2
            },
            QueueEvent::Completed { id: first },
            QueueEvent::Idle,
        ]
    );
    assert_eq!(h.max_active(), 1);
    h.manager.shutdown().await;
}

#[tokio::test]
async fn transfers_run_one_at_a_time_in_fifo_order() {
    let mut h = Harness::start();
    let mut expected: Vec<String> = (0..4).map(|i| format!("clip{i}.mp4")).collect();
    h.enqueue(expected.iter().map(|n| video(n, MB)).collect()).await;

    let mut order = Vec::new();
    let first = h.next_started().await;
    order.push(first.name.clone());

    // late insertion while the first is in flight
    h.enqueue(vec![video("late.mp4", MB)]).await;
    expected.push("late.mp4".to_string());
    first.succeed();

    for i in 1..expected.len() {
        let started = h.next_started().await;
        order.push(started.name.clone());
        if i % 2 == 0 {
            started.fail("flaky");
        } else {
            started.succeed();
        }
    }

    let counts = {
        h.handle.wait_until_idle().await.unwrap();
        h.handle.counts().await.unwrap()
    };
    assert_eq!(order, expected);
    assert_eq!(h.max_active(), 1);
    assert_eq!(counts.completed + counts.error, 5);
    h.manager.shutdown().await;
}

#[tokio::test]
async fn busy_items_cannot_be_removed() {
    let mut h = Harness::start();
    let ids = h.enqueue(vec![video("a.mp4", MB), video("b.mp4", MB)]).await;

    let started = h.next_started().await;
    let err = h.handle.remove(ids[0]).await.unwrap_err();
    assert_eq!(err, UploadError::Integrity(IntegrityError::ItemBusy(ids[0])));

    // a pending item can go, and is never started
    let removed = h.handle.remove(ids[1]).await.unwrap();
    assert_eq!(removed.status(), ItemStatus::Pending);
    started.succeed();

    let items = h.handle.wait_until_idle().await.unwrap();
    assert_eq!(items.len(), 1);
    assert!(h.started.try_recv().is_err());

    // completed items can be cleared
    h.handle.remove(ids[0]).await.unwrap();
    assert!(h.handle.list().await.unwrap().is_empty());
    h.manager.shutdown().await;
}

#[tokio::test]
async fn unknown_ids_and_illegal_retries_are_errors() {
    let mut h = Harness::start();
    let ids = h.enqueue(vec![video("a.mp4", MB)]).await;
    let ghost: ItemId = "01ARZ3NDEKTSV4RRFFQ69G5FAV".parse().unwrap();

    assert_eq!(
        h.handle.remove(ghost).await.unwrap_err(),
        UploadError::Integrity(IntegrityError::UnknownItem(ghost))
    );
    assert!(h.handle.get(ghost).await.unwrap().is_none());

    let err = h.handle.retry(ids[0]).await.unwrap_err();
    assert!(matches!(
        err,
        UploadError::Integrity(IntegrityError::IllegalTransition {
            from: ItemStatus::Uploading,
            to: ItemStatus::Pending,
            ..
        })
    ));

    h.next_started().await.succeed();
    h.manager.shutdown().await;
}

#[tokio::test]
async fn progress_shows_up_in_snapshots() {
    let mut h = Harness::start();
    let ids = h.enqueue(vec![video("a.mp4", MB)]).await;
    let mut rx = h.handle.subscribe();

    let started = h.next_started().await;
    started.progress.report_bytes(40, 100);
    let items = wait_for(&mut rx, |items| items[0].progress() == 40).await;
    assert_eq!(items[0].stage_label(), "Uploading (40%)");

    // going backwards is not reported
    started.progress.report_percent(10);
    started.progress.report_percent(70);
    wait_for(&mut rx, |items| items[0].progress() == 70).await;

    started.succeed();
    let items = wait_for(&mut rx, |items| status_of(items, ids[0]) == Some(ItemStatus::Completed)).await;
    assert_eq!(items[0].progress(), 100);

    let percents: Vec<u8> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            QueueEvent::Progress { percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, [40, 70]);
    h.manager.shutdown().await;
}

#[tokio::test]
async fn processing_holds_the_slot_until_reported() {
    let mut cfg = config();
    cfg.await_processing = true;
    let mut h = Harness::new(cfg);
    let ids = h.enqueue(vec![video("a.mp4", MB), video("b.mp4", MB)]).await;
    let mut rx = h.handle.subscribe();

    h.next_started().await.succeed();
    let items = wait_for(&mut rx, |items| status_of(items, ids[0]) == Some(ItemStatus::Processing)).await;
    assert_eq!(items[0].stage_label(), "Processing on server");
    assert_eq!(status_of(&items, ids[1]), Some(ItemStatus::Pending));
    assert!(h.started.try_recv().is_err());

    // processing items are busy
    assert!(h.handle.remove(ids[0]).await.is_err());

    let done = h
        .handle
        .finish_processing(ids[0], TransferOutcome::success())
        .await
        .unwrap();
    assert_eq!(done.status(), ItemStatus::Completed);

    let started = h.next_started().await;
    assert_eq!(started.name, "b.mp4");
    started.succeed();
    wait_for(&mut rx, |items| status_of(items, ids[1]) == Some(ItemStatus::Processing)).await;
    h.handle
        .finish_processing(ids[1], TransferOutcome::rejected("unsupported codec"))
        .await
        .unwrap();

    let items = h.handle.wait_until_idle().await.unwrap();
    assert_eq!(items[1].status(), ItemStatus::Error);
    assert_eq!(items[1].error_detail(), Some("unsupported codec"));
    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn processing_times_out() {
    let mut cfg = config();
    cfg.await_processing = true;
    cfg.processing_timeout_secs = 30;
    let manager = UploaderBuilder::new(cfg)
        .executor(Arc::new(Instant))
        .build()
        .unwrap();
    let handle = manager.handle();

    let id = handle
        .enqueue(vec![video("a.mp4", MB)])
        .await
        .unwrap()
        .accepted_ids()[0];

    let items = handle.wait_until_idle().await.unwrap();
    assert_eq!(items[0].id(), id);
    assert_eq!(items[0].status(), ItemStatus::Error);
    assert_eq!(
        items[0].error_detail(),
        Some("server-side processing timed out")
    );

    // a late report for the timed-out item is refused
    assert!(
        handle
            .finish_processing(id, TransferOutcome::success())
            .await
            .is_err()
    );
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn hung_transfer_times_out_and_frees_the_slot() {
    let mut cfg = config();
    cfg.transfer_timeout_secs = 1;
    let manager = UploaderBuilder::new(cfg)
        .executor(Arc::new(Hang))
        .build()
        .unwrap();
    let handle = manager.handle();

    let ids = handle
        .enqueue(vec![video("stuck.mp4", MB), video("next.mp4", MB)])
        .await
        .unwrap()
        .accepted_ids();

    let items = handle.wait_until_idle().await.unwrap();
    assert_eq!(status_of(&items, ids[0]), Some(ItemStatus::Error));
    let detail = items[0].error_detail().unwrap();
    assert!(detail.contains("timed out"), "{detail}");
    assert_eq!(status_of(&items, ids[1]), Some(ItemStatus::Completed));
    manager.shutdown().await;
}

#[tokio::test]
async fn enqueue_one_returns_the_item_or_the_refusal() {
    let mut h = Harness::start();

    let item = h.handle.enqueue_one(video("short.mp4", MB)).await.unwrap();
    assert_eq!(item.payload().name(), "short.mp4");
    h.next_started().await.succeed();

    let err = h
        .handle
        .enqueue_one(video("long-take.mp4", 150 * MB))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Validation(Rejection::TooLarge { .. })));
    assert!(err.to_string().starts_with("validation failed"), "{err}");

    let items = h.handle.wait_until_idle().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status(), ItemStatus::Completed);
    h.manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_waits_for_the_in_flight_transfer() {
    let mut h = Harness::start();
    let ids = h.enqueue(vec![video("a.mp4", MB), video("b.mp4", MB)]).await;
    let mut rx = h.handle.subscribe();

    let started = h.next_started().await;
    let handle = h.handle.clone();
    let stopping = tokio::spawn(h.manager.shutdown());

    // new work is refused once draining has begun
    timeout(WAIT, async {
        while handle.enqueue(Vec::new()).await.is_ok() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(!stopping.is_finished());

    started.succeed();
    timeout(WAIT, stopping).await.unwrap().unwrap();

    let items = rx.borrow_and_update().clone();
    assert_eq!(status_of(&items, ids[0]), Some(ItemStatus::Completed));
    assert_eq!(status_of(&items, ids[1]), Some(ItemStatus::Pending));
    assert!(h.started.try_recv().is_err());
    assert_eq!(handle.list().await.unwrap_err(), UploadError::Closed);
}
