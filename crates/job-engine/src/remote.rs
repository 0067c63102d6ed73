//! Remote processing API seam
//!
//! The engine drives jobs through this trait so the lifecycle can be tested
//! against scripted fakes. The production implementation wraps the Astra
//! HTTP client.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::RemoteError;
use crate::job::Quality;

/// Streamed artifact body.
pub type ByteStream = BoxStream<'static, Result<Bytes, RemoteError>>;

/// Input media handed to `RemoteJobApi::submit`.
#[derive(Debug, Clone)]
pub struct MediaInput {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Remote job phase reported by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Processing,
    Completed,
    Failed,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Processing => "processing",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobStatus {
    pub phase: Phase,
    /// File id or URL of the processed artifact, once completed
    pub result_locator: Option<String>,
    pub message: Option<String>,
}

impl RemoteJobStatus {
    pub fn processing() -> Self {
        Self {
            phase: Phase::Processing,
            result_locator: None,
            message: None,
        }
    }

    pub fn completed(locator: impl Into<String>) -> Self {
        Self {
            phase: Phase::Completed,
            result_locator: Some(locator.into()),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            phase: Phase::Failed,
            result_locator: None,
            message: Some(message.into()),
        }
    }
}

/// Remote processing service.
///
/// Methods return boxed futures so the trait is dyn-compatible and the
/// dispatcher can hold an `Arc<dyn RemoteJobApi>`. Auth failures surface as
/// `RemoteError::AuthExpired` after the implementation has invalidated the
/// rejected credential; the lifecycle retries the call once.
pub trait RemoteJobApi: Send + Sync {
    /// Upload media and create a remote job rendering `quality`. Returns the
    /// remote job id.
    fn submit(
        &self,
        media: MediaInput,
        quality: Quality,
    ) -> Pin<Box<dyn Future<Output = Result<String, RemoteError>> + Send + '_>>;

    /// Query the current status of a remote job.
    fn poll<'a>(
        &'a self,
        remote_job_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteJobStatus, RemoteError>> + Send + 'a>>;

    /// Open the processed artifact as a byte stream.
    fn fetch<'a>(
        &'a self,
        result_locator: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, RemoteError>> + Send + 'a>>;
}
