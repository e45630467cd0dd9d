//! Work item: one file's end-to-end transfer record.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::ItemId;
use super::state::ItemStatus;

/// Where the payload bytes live.
#[derive(Debug, Clone)]
pub enum BlobSource {
    /// Already in memory (drag-and-drop, tests).
    Memory(Bytes),

    /// On local disk; opened only when the transfer starts.
    Path(PathBuf),
}

/// A locally selected file, as handed to the queue.
///
/// `size` and `media_type` are what the selection declared; the validator
/// judges these, not the bytes.
#[derive(Debug, Clone, Serialize)]
pub struct MediaFile {
    name: String,
    size: u64,
    media_type: Option<String>,
    #[serde(skip)]
    source: BlobSource,
}

impl MediaFile {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        media_type: Option<String>,
        source: BlobSource,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            media_type,
            source,
        }
    }

    /// In-memory file; size is the byte length.
    pub fn from_bytes(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        let bytes = bytes.into();
        Self::new(
            name,
            bytes.len() as u64,
            Some(media_type.into()),
            BlobSource::Memory(bytes),
        )
    }

    /// File on disk. Size comes from metadata, media type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(
            name,
            metadata.len(),
            Some(guess_media_type(path).to_string()),
            BlobSource::Path(path.to_path_buf()),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn source(&self) -> &BlobSource {
        &self.source
    }
}

/// Media type from a file extension. Unknown extensions map to
/// `application/octet-stream`.
pub fn guess_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("mp4") => "video/mp4",
        Some("m4v") => "video/x-m4v",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mpeg") | Some("mpg") => "video/mpeg",
        Some("ogv") => "video/ogg",
        Some("3gp") => "video/3gpp",
        Some("wmv") => "video/x-ms-wmv",
        Some("flv") => "video/x-flv",
        _ => "application/octet-stream",
    }
}

/// Partial update applied through `QueueStore::update`.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub status: Option<ItemStatus>,
    pub progress: Option<u8>,
    pub stage_label: Option<String>,
    pub error_detail: Option<String>,
}

impl ItemPatch {
    pub fn status(status: ItemStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: Some(ItemStatus::Error),
            error_detail: Some(detail.into()),
            ..Self::default()
        }
    }
}

pub(crate) const GENERIC_FAILURE: &str = "upload failed";

/// One queued file and its lifecycle.
///
/// Owned by the queue store; everything outside the store sees clones.
/// `error_detail` is `Some` exactly when `status == Error`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItem {
    id: ItemId,
    payload: MediaFile,
    status: ItemStatus,
    progress: u8,
    stage_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_detail: Option<String>,

    /// Transfers started for this item (current one included).
    attempts: u32,

    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub(crate) fn new(id: ItemId, payload: MediaFile, now: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            status: ItemStatus::Pending,
            progress: 0,
            stage_label: stage_label_for(ItemStatus::Pending, 0),
            error_detail: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn payload(&self) -> &MediaFile {
        &self.payload
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn stage_label(&self) -> &str {
        &self.stage_label
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move to `next`, keeping the derived fields consistent.
    ///
    /// The caller has already checked `can_transition_to`.
    pub(crate) fn transition(&mut self, next: ItemStatus, detail: Option<String>, now: DateTime<Utc>) {
        if next == ItemStatus::Uploading {
            self.attempts += 1;
        }
        self.progress = match next {
            ItemStatus::Completed | ItemStatus::Processing => 100,
            _ => 0,
        };
        self.error_detail = match next {
            ItemStatus::Error => Some(
                detail
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            ),
            _ => None,
        };
        self.status = next;
        self.stage_label = stage_label_for(next, self.progress);
        self.updated_at = now;
    }

    /// Progress only means something while the transfer slot is held.
    pub(crate) fn set_progress(&mut self, progress: u8, now: DateTime<Utc>) {
        if self.status != ItemStatus::Uploading {
            return;
        }
        self.progress = progress.min(100);
        self.stage_label = stage_label_for(self.status, self.progress);
        self.updated_at = now;
    }

    pub(crate) fn set_stage_label(&mut self, label: String, now: DateTime<Utc>) {
        self.stage_label = label;
        self.updated_at = now;
    }
}

fn stage_label_for(status: ItemStatus, progress: u8) -> String {
    match status {
        ItemStatus::Pending => "Waiting to upload".to_string(),
        ItemStatus::Uploading => format!("Uploading ({progress}%)"),
        ItemStatus::Processing => "Processing on server".to_string(),
        ItemStatus::Completed => "Upload complete".to_string(),
        ItemStatus::Error => "Upload failed".to_string(),
    }
}
