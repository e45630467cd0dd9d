//! Outcome of one transfer attempt (or of server-side processing).
//!
//! Produced by the transfer executor, applied to the store by the manager.
//! The executor never touches the store itself.

use serde::Serialize;

use super::errors::UploadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    Failure(UploadError),
}

impl TransferOutcome {
    pub fn success() -> Self {
        Self::Success
    }

    pub fn failure(error: UploadError) -> Self {
        Self::Failure(error)
    }

    /// Endpoint answered with a structured error message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Failure(UploadError::RemoteRejection(message.into()))
    }

    /// Network or transport problem.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Failure(UploadError::Transfer(message.into()))
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success => OutcomeKind::Success,
            Self::Failure(_) => OutcomeKind::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// What ends up in `error_detail`.
    pub fn error_detail(&self) -> Option<String> {
        match self {
            Self::Success => None,
            Self::Failure(err) => Some(err.detail()),
        }
    }
}

impl From<Result<(), UploadError>> for TransferOutcome {
    fn from(result: Result<(), UploadError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(err) => Self::failure(err),
        }
    }
}
