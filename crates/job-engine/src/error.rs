//! Error taxonomy for job processing
//!
//! `ErrorKind` is what callers branch on and what users see (through
//! `user_message`); the free-form detail is for logs.

use std::fmt;

/// Failure categories reported through `DeliverySink::on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Credential refresh failed
    CredentialUnavailable,
    /// Remote API rejected the token again after one refresh-and-retry
    AuthExpired,
    /// Transport failure outside the polling loop
    TransientNetworkError,
    /// Remote API refused the request or reported the job as failed
    RemoteRejected,
    /// Artifact could not be downloaded or stored
    DownloadFailed,
    /// Job exceeded the wall-clock ceiling
    TimedOut,
    /// Daily quota exhausted at admission
    RateLimitExceeded,
    /// Input media could not be read
    InputUnavailable,
}

impl ErrorKind {
    /// Stable label for metrics and JSON.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::CredentialUnavailable => "credential_unavailable",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::TransientNetworkError => "transient_network_error",
            ErrorKind::RemoteRejected => "remote_rejected",
            ErrorKind::DownloadFailed => "download_failed",
            ErrorKind::TimedOut => "timed_out",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::InputUnavailable => "input_unavailable",
        }
    }

    /// Human-readable message for the requester.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::CredentialUnavailable | ErrorKind::AuthExpired => {
                "The processing service is unavailable right now. Please try again later."
            }
            ErrorKind::TransientNetworkError => {
                "A network problem interrupted processing. Please try again."
            }
            ErrorKind::RemoteRejected => "Processing failed. Please try a different video.",
            ErrorKind::DownloadFailed => {
                "Processing finished but the result could not be retrieved. Please try again."
            }
            ErrorKind::TimedOut => "Still processing after the time limit. Please try again later.",
            ErrorKind::RateLimitExceeded => "Daily limit reached. Please come back tomorrow.",
            ErrorKind::InputUnavailable => "Your video could not be read. Please send it again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Terminal error of one job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Outcome of one job's processing.
pub type Result<T> = std::result::Result<T, JobError>;

impl JobError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Errors from a `RemoteJobApi` implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("remote rejected: {0}")]
    Rejected(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::CredentialUnavailable(_) => ErrorKind::CredentialUnavailable,
            RemoteError::AuthExpired(_) => ErrorKind::AuthExpired,
            RemoteError::Transient(_) => ErrorKind::TransientNetworkError,
            RemoteError::Rejected(_) => ErrorKind::RemoteRejected,
            RemoteError::DownloadFailed(_) => ErrorKind::DownloadFailed,
        }
    }

    pub fn into_job_error(self) -> JobError {
        JobError::new(self.kind(), self.to_string())
    }
}

/// Errors from a `ResultStore` while persisting an artifact.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact stream failed: {0}")]
    Stream(#[from] RemoteError),
}
