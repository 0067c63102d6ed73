//! Error types for remote API calls

/// Errors from Astra API calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential unavailable: {0}")]
    Credential(String),

    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("network error: {0}")]
    Transient(String),

    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl Error {
    /// Whether the failure came from the transport or a retryable status.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
