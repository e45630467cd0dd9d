//! UploaderBuilder - wiring and start-up checks.
//!
//! Fail-fast: the configuration is validated and the HTTP client is built in
//! `build()`, so a bad endpoint or an empty channel never reaches the loop.
//! Every port can be swapped out; unset ports get the production default.

use std::sync::Arc;

use super::manager::{ManagerParts, UploadManager};
use crate::config::{ConfigError, UploaderConfig};
use crate::domain::UploadError;
use crate::impls::HttpTransferExecutor;
use crate::ports::{
    Clock, EventSink, IdGenerator, NoopEventSink, SystemClock, TransferExecutor, UlidGenerator,
};
use crate::queue::QueueStore;

/// # Example
/// ```ignore
/// let manager = UploaderBuilder::new(UploaderConfig::load("vidqueue.toml")?)
///     .event_sink(sink)
///     .build()?;
/// let handle = manager.handle();
/// ```
pub struct UploaderBuilder {
    config: UploaderConfig,
    executor: Option<Arc<dyn TransferExecutor>>,
    events: Option<Arc<dyn EventSink>>,
    ids: Option<Arc<dyn IdGenerator>>,
    clock: Option<Arc<dyn Clock>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create transfer executor: {0}")]
    Executor(UploadError),
}

impl UploaderBuilder {
    pub fn new(config: UploaderConfig) -> Self {
        Self {
            config,
            executor: None,
            events: None,
            ids: None,
            clock: None,
        }
    }

    /// Replace the HTTP executor (tests, other transports).
    pub fn executor(mut self, executor: Arc<dyn TransferExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Validate, wire the ports, and spawn the manager loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<UploadManager, BuildError> {
        self.config.validate()?;

        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(
                HttpTransferExecutor::from_config(&self.config).map_err(BuildError::Executor)?,
            ),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        // ULID time prefixes follow the same clock as the item timestamps
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        Ok(UploadManager::spawn(ManagerParts {
            store: QueueStore::new(ids, clock),
            validator: self.config.validator(),
            executor,
            events: self.events.unwrap_or_else(|| Arc::new(NoopEventSink)),
            transfer_timeout: self.config.transfer_timeout(),
            await_processing: self.config.await_processing,
            processing_timeout: self.config.processing_timeout(),
            command_buffer: self.config.command_buffer,
        }))
    }
}
