//! Requester-facing seams and the delivery task
//!
//! Workers never call a `DeliverySink` directly. They enqueue a
//! `DeliveryEvent` on an unbounded channel drained by one delivery task, so a
//! slow sink cannot stall a lifecycle and sink calls are never concurrent.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ErrorKind, StoreError};
use crate::job::JobId;
use crate::remote::{ByteStream, MediaInput, Phase};

/// Periodic progress of a polling job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Time since the remote job was created
    pub elapsed: Duration,
    pub phase: Phase,
}

/// Receives progress, results, and errors for a job.
pub trait DeliverySink: Send + Sync {
    fn on_progress(&self, job_id: JobId, progress: Progress)
    -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    fn on_result(&self, job_id: JobId, output_ref: String)
    -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    fn on_error(
        &self,
        job_id: JobId,
        kind: ErrorKind,
        detail: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Turns a job's opaque input reference into media bytes.
pub trait InputResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        input_ref: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<MediaInput>> + Send + 'a>>;
}

/// Persists a fetched artifact and returns an output reference for the sink.
pub trait ResultStore: Send + Sync {
    fn store(
        &self,
        job_id: JobId,
        artifact: ByteStream,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>>;
}

/// What a sink should be told.
#[derive(Debug, Clone)]
pub(crate) enum Update {
    Progress(Progress),
    Result(String),
    Error { kind: ErrorKind, detail: String },
}

pub(crate) struct DeliveryEvent {
    pub job_id: JobId,
    pub sink: Arc<dyn DeliverySink>,
    pub update: Update,
}

pub(crate) type EventSender = mpsc::UnboundedSender<DeliveryEvent>;

/// Drain events in order until every sender is dropped.
pub(crate) fn spawn_delivery_task(mut rx: mpsc::UnboundedReceiver<DeliveryEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let DeliveryEvent {
                job_id,
                sink,
                update,
            } = event;
            match update {
                Update::Progress(progress) => sink.on_progress(job_id, progress).await,
                Update::Result(output_ref) => sink.on_result(job_id, output_ref).await,
                Update::Error { kind, detail } => sink.on_error(job_id, kind, detail).await,
            }
        }
        debug!("delivery task finished");
    })
}
