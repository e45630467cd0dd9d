//! Validator: accepts or rejects a candidate file before it is queued.
//!
//! Pure and deterministic; the thresholds are configuration.

use bytesize::ByteSize;
use thiserror::Error;

use super::item::MediaFile;

/// 100 MiB.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 100 * 1024 * 1024;

pub const DEFAULT_ACCEPTED_MEDIA_PREFIX: &str = "video/";

/// Why a file was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("{name} is too large ({}, limit is {})", ByteSize(*.size), ByteSize(*.max))]
    TooLarge { name: String, size: u64, max: u64 },

    #[error(
        "{name} has unsupported media type {}",
        .media_type.as_deref().unwrap_or("(none)")
    )]
    UnsupportedType {
        name: String,
        media_type: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    max_bytes: u64,
    accepted_prefix: String,
}

impl Validator {
    pub fn new(max_bytes: u64, accepted_prefix: impl Into<String>) -> Self {
        Self {
            max_bytes,
            accepted_prefix: accepted_prefix.into().to_ascii_lowercase(),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn accepted_prefix(&self) -> &str {
        &self.accepted_prefix
    }

    /// Size is checked first, so an oversized non-video reports the size.
    pub fn validate(&self, file: &MediaFile) -> Result<(), Rejection> {
        if file.size() > self.max_bytes {
            return Err(Rejection::TooLarge {
                name: file.name().to_string(),
                size: file.size(),
                max: self.max_bytes,
            });
        }

        let accepted = file
            .media_type()
            .map(|t| t.trim().to_ascii_lowercase().starts_with(&self.accepted_prefix))
            .unwrap_or(false);
        if !accepted {
            return Err(Rejection::UnsupportedType {
                name: file.name().to_string(),
                media_type: file.media_type().map(str::to_string),
            });
        }

        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_BYTES, DEFAULT_ACCEPTED_MEDIA_PREFIX)
    }
}
