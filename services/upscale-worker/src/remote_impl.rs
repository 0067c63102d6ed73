//! Astra-backed remote job API
//!
//! Adapts `AstraClient` to the engine's `RemoteJobApi` seam, translating
//! client errors into the engine's remote error taxonomy.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use astra_client::{AstraClient, Filter, RemotePhase};
use futures_util::StreamExt;
use job_engine::{
    ByteStream, MediaInput, Phase, Quality, RemoteError, RemoteJobApi, RemoteJobStatus,
};

pub struct AstraRemote {
    client: Arc<AstraClient>,
}

impl AstraRemote {
    pub fn new(client: Arc<AstraClient>) -> Self {
        Self { client }
    }

    /// Filter list the create request carries for a quality preset.
    fn filters_for(&self, quality: Quality) -> Vec<Filter> {
        let config = self.client.config();
        match quality {
            Quality::Standard30 => config.standard_filters(),
            Quality::SlowMotion60 => config.slow_motion_filters(),
        }
    }
}

/// Malformed responses count as rejections; the remote side will not fix
/// itself on a retry.
fn map_error(error: astra_client::Error) -> RemoteError {
    use astra_client::Error;
    match error {
        Error::Credential(msg) => RemoteError::CredentialUnavailable(msg),
        Error::AuthExpired(msg) => RemoteError::AuthExpired(msg),
        Error::Transient(msg) => RemoteError::Transient(msg),
        Error::Rejected { status, message } => {
            RemoteError::Rejected(format!("status {status}: {message}"))
        }
        Error::InvalidResponse(msg) => RemoteError::Rejected(msg),
        Error::DownloadFailed(msg) => RemoteError::DownloadFailed(msg),
    }
}

fn map_phase(phase: RemotePhase) -> Phase {
    match phase {
        RemotePhase::Processing => Phase::Processing,
        RemotePhase::Completed => Phase::Completed,
        RemotePhase::Failed => Phase::Failed,
    }
}

impl RemoteJobApi for AstraRemote {
    fn submit(
        &self,
        media: MediaInput,
        quality: Quality,
    ) -> Pin<Box<dyn Future<Output = Result<String, RemoteError>> + Send + '_>> {
        Box::pin(async move {
            let filters = self.filters_for(quality);
            self.client
                .submit(&media.file_name, media.bytes, &filters)
                .await
                .map_err(map_error)
        })
    }

    fn poll<'a>(
        &'a self,
        remote_job_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteJobStatus, RemoteError>> + Send + 'a>> {
        Box::pin(async move {
            let status = self.client.status(remote_job_id).await.map_err(map_error)?;
            Ok(RemoteJobStatus {
                phase: map_phase(status.phase),
                result_locator: status.result,
                message: status.message,
            })
        })
    }

    fn fetch<'a>(
        &'a self,
        result_locator: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, RemoteError>> + Send + 'a>> {
        Box::pin(async move {
            let stream = self
                .client
                .download(result_locator)
                .await
                .map_err(map_error)?;
            Ok(stream.map(|chunk| chunk.map_err(map_error)).boxed())
        })
    }
}
