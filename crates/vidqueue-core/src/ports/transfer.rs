//! TransferExecutor port - one network transfer for one work item.
//!
//! Contract:
//! - exactly one attempt, no internal retry
//! - returns an outcome, never mutates the queue
//! - must end in bounded time (a timeout is reported as a failure)

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

use crate::domain::{ItemId, MediaFile, TransferOutcome};

/// Everything an executor gets to see of a work item.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub item_id: ItemId,
    pub attempt: u32,
    pub file: MediaFile,
}

#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn transfer(&self, request: TransferRequest, progress: ProgressReporter) -> TransferOutcome;
}

/// Progress callback handed to an executor.
///
/// Only forwards a percentage when it goes up, and never reports 100: that
/// belongs to the terminal outcome.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<ProgressInner>,
}

struct ProgressInner {
    last: AtomicU8,
    callback: Box<dyn Fn(u8) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ProgressInner {
                last: AtomicU8::new(0),
                callback: Box::new(callback),
            }),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Report `sent` of `total` bytes.
    pub fn report_bytes(&self, sent: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = (sent.saturating_mul(100) / total).min(99) as u8;
        self.report_percent(percent);
    }

    pub fn report_percent(&self, percent: u8) {
        let percent = percent.min(99);
        let previous = self.inner.last.fetch_max(percent, Ordering::AcqRel);
        if percent > previous {
            (self.inner.callback)(percent);
        }
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("last", &self.inner.last.load(Ordering::Relaxed))
            .finish()
    }
}
