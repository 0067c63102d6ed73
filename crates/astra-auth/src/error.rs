//! Error types for credential operations

/// Errors from credential sources and the credential manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("session exchange failed: {0}")]
    SessionExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("response missing field `{0}`")]
    MissingField(String),

    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
