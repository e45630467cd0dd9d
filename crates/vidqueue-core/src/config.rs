//! Uploader configuration (TOML).
//!
//! ```toml
//! endpoint = "https://api.example.com/v1/videos/upload"
//! channel_id = "UC123"
//! max_file_bytes = 104857600
//! accepted_media_prefix = "video/"
//! transfer_timeout_secs = 300
//! await_processing = false
//! processing_timeout_secs = 600
//! command_buffer = 64
//! ```
//!
//! Only `endpoint` and `channel_id` are required.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Validator;
use crate::domain::validation::{DEFAULT_ACCEPTED_MEDIA_PREFIX, DEFAULT_MAX_FILE_BYTES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploaderConfig {
    /// Ingestion endpoint receiving the multipart upload.
    pub endpoint: String,

    /// Destination token sent with every upload.
    pub channel_id: String,

    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    #[serde(default = "default_accepted_media_prefix")]
    pub accepted_media_prefix: String,

    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,

    /// Hold each item in `processing` after a successful transfer until the
    /// server-side pipeline reports back.
    #[serde(default)]
    pub await_processing: bool,

    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,

    /// Capacity of the manager's command channel.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

fn default_accepted_media_prefix() -> String {
    DEFAULT_ACCEPTED_MEDIA_PREFIX.to_string()
}

fn default_transfer_timeout_secs() -> u64 {
    300
}

fn default_processing_timeout_secs() -> u64 {
    600
}

fn default_command_buffer() -> usize {
    64
}

impl UploaderConfig {
    /// Defaults for everything but the destination.
    pub fn new(endpoint: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            channel_id: channel_id.into(),
            max_file_bytes: default_max_file_bytes(),
            accepted_media_prefix: default_accepted_media_prefix(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            await_processing: false,
            processing_timeout_secs: default_processing_timeout_secs(),
            command_buffer: default_command_buffer(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::Invalid("endpoint must not be empty".into()));
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "endpoint must be an http(s) URL, got '{endpoint}'"
            )));
        }
        if self.channel_id.trim().is_empty() {
            return Err(ConfigError::Invalid("channel_id must not be empty".into()));
        }
        if self.max_file_bytes == 0 {
            return Err(ConfigError::Invalid("max_file_bytes must be > 0".into()));
        }
        if self.accepted_media_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "accepted_media_prefix must not be empty".into(),
            ));
        }
        if self.transfer_timeout_secs == 0 {
            return Err(ConfigError::Invalid("transfer_timeout_secs must be > 0".into()));
        }
        if self.processing_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "processing_timeout_secs must be > 0".into(),
            ));
        }
        if self.command_buffer == 0 {
            return Err(ConfigError::Invalid("command_buffer must be > 0".into()));
        }
        Ok(())
    }

    pub fn validator(&self) -> Validator {
        Validator::new(self.max_file_bytes, self.accepted_media_prefix.trim())
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = UploaderConfig::from_toml_str(
            r#"
            endpoint = "https://api.example.com/upload"
            channel_id = "UC42"
            "#,
        )
        .unwrap();

        assert_eq!(cfg, UploaderConfig::new("https://api.example.com/upload", "UC42"));
        assert_eq!(cfg.max_file_bytes, 100 * 1024 * 1024);
        assert_eq!(cfg.transfer_timeout(), Duration::from_secs(300));
        assert!(!cfg.await_processing);
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = UploaderConfig::from_toml_str(
            r#"
            endpoint = "https://x"
            channel_id = "c"
            max_retries = 3
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_channel_is_a_parse_error() {
        let err = UploaderConfig::from_toml_str(r#"endpoint = "https://x""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[rstest]
    #[case("", "UC1")]
    #[case("ftp://example.com", "UC1")]
    #[case("https://example.com", " ")]
    fn bad_destination_is_invalid(#[case] endpoint: &str, #[case] channel: &str) {
        let cfg = UploaderConfig::new(endpoint, channel);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_limits_are_invalid() {
        let mut cfg = UploaderConfig::new("https://example.com", "UC1");
        cfg.transfer_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = UploaderConfig::new("https://example.com", "UC1");
        cfg.max_file_bytes = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = UploaderConfig::new("https://example.com", "UC1");
        cfg.command_buffer = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "endpoint = \"http://localhost:8080/upload\"\nchannel_id = \"local\"\nawait_processing = true"
        )
        .unwrap();

        let cfg = UploaderConfig::load(file.path()).unwrap();
        assert!(cfg.await_processing);
        assert_eq!(cfg.channel_id, "local");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = UploaderConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn validator_follows_config() {
        let mut cfg = UploaderConfig::new("https://example.com", "UC1");
        cfg.max_file_bytes = 10;
        let validator = cfg.validator();
        assert_eq!(validator.max_bytes(), 10);
        assert_eq!(validator.accepted_prefix(), "video/");
    }
}
