//! Error types for the transport and transfer seams.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure while sending or editing a message through the messaging transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    /// The transport asked us to back off before talking to it again.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("message delivery failed: {0}")]
    Delivery(String),
}

impl NotifyError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            NotifyError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            NotifyError::Delivery(_) => None,
        }
    }
}

/// Failure of a single transfer attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Recoverable: the task is left as-is after the backoff.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("download failed, file not found: {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("{0}")]
    Failed(String),
}

impl TransferError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransferError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}
