//! HttpTransferExecutor - multipart upload over reqwest.
//!
//! One request per attempt:
//! - `POST {endpoint}` with form fields `channel_id` (text) and `file`
//!   (streamed payload with file name and media type)
//! - 2xx is success; the body is not inspected
//! - anything else is a failure, with the remote message kept verbatim when
//!   the body carries one

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::config::UploaderConfig;
use crate::domain::{BlobSource, MediaFile, TransferOutcome, UploadError};
use crate::ports::{ProgressReporter, TransferExecutor, TransferRequest};

const CHUNK_SIZE: usize = 64 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransferExecutor {
    client: Client,
    endpoint: String,
    channel_id: String,
    timeout: Duration,
}

impl HttpTransferExecutor {
    pub fn new(
        endpoint: impl Into<String>,
        channel_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| UploadError::Transfer(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            channel_id: channel_id.into(),
            timeout,
        })
    }

    pub fn from_config(config: &UploaderConfig) -> Result<Self, UploadError> {
        Self::new(
            config.endpoint.trim(),
            config.channel_id.trim(),
            config.transfer_timeout(),
        )
    }

    async fn send(&self, file: &MediaFile, progress: ProgressReporter) -> Result<(), UploadError> {
        let (stream, total) = open_payload(file).await?;

        let mut sent = 0u64;
        let counted = stream.map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                progress.report_bytes(sent, total);
            }
            chunk
        });

        let mut part =
            Part::stream_with_length(Body::wrap_stream(counted), total).file_name(file.name().to_string());
        if let Some(media_type) = file.media_type() {
            part = part
                .mime_str(media_type)
                .map_err(|e| UploadError::Transfer(format!("invalid media type {media_type}: {e}")))?;
        }
        let form = Form::new()
            .text("channel_id", self.channel_id.clone())
            .part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transfer(format!("network error: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(%status, "upload accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(failure_from_response(status, &body))
    }
}

#[async_trait]
impl TransferExecutor for HttpTransferExecutor {
    async fn transfer(&self, request: TransferRequest, progress: ProgressReporter) -> TransferOutcome {
        debug!(
            item_id = %request.item_id,
            attempt = request.attempt,
            name = request.file.name(),
            "starting HTTP upload"
        );
        match tokio::time::timeout(self.timeout, self.send(&request.file, progress)).await {
            Ok(result) => result.into(),
            Err(_) => {
                warn!(item_id = %request.item_id, "upload timed out");
                TransferOutcome::transport(format!(
                    "transfer timed out after {}s",
                    self.timeout.as_secs_f64()
                ))
            }
        }
    }
}

/// Payload as a byte stream plus its real length.
///
/// The validator only saw `file.size()`; a payload that has grown past it
/// since then is refused rather than sent.
async fn open_payload(
    file: &MediaFile,
) -> Result<(BoxStream<'static, io::Result<Bytes>>, u64), UploadError> {
    let (stream, total) = match file.source() {
        BlobSource::Memory(bytes) => {
            let total = bytes.len() as u64;
            let chunks: Vec<io::Result<Bytes>> = (0..bytes.len())
                .step_by(CHUNK_SIZE)
                .map(|start| Ok(bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len()))))
                .collect();
            (stream::iter(chunks).boxed(), total)
        }
        BlobSource::Path(path) => {
            let unreadable =
                |e: io::Error| UploadError::Transfer(format!("cannot read {}: {e}", path.display()));
            let handle = tokio::fs::File::open(path).await.map_err(unreadable)?;
            let total = handle.metadata().await.map_err(unreadable)?.len();
            // later appends are not sent either
            let reader = handle.take(total);
            (ReaderStream::with_capacity(reader, CHUNK_SIZE).boxed(), total)
        }
    };
    if total > file.size() {
        return Err(UploadError::Transfer(format!(
            "payload size changed: {} is {total} bytes, {} were validated",
            file.name(),
            file.size()
        )));
    }
    Ok((stream, total))
}

fn failure_from_response(status: StatusCode, body: &str) -> UploadError {
    match remote_message(body) {
        Some(message) => UploadError::RemoteRejection(message),
        None => UploadError::Transfer(format!("upload failed with HTTP status {status}")),
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"error": "..."}`, `{"error": {"message": "..."}}`,
/// `{"message": "..."}` and `{"detail": "..."}`.
fn remote_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let candidates = [
        value.get("error").and_then(|e| e.as_str()),
        value.pointer("/error/message").and_then(|e| e.as_str()),
        value.get("message").and_then(|e| e.as_str()),
        value.get("detail").and_then(|e| e.as_str()),
    ];
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(str::to_string)
}
