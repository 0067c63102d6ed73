//! In-memory job board
//!
//! The HTTP surface's delivery sink: keeps the latest delivery for each job so
//! requesters can poll `GET /jobs/{id}`. Bounded; the oldest records are
//! dropped first. Records do not survive a restart.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use job_engine::{DeliverySink, ErrorKind, JobId, Progress, Quality, UserId};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Queued,
    Processing,
    Done,
    Error,
}

/// Latest known state of one job, as returned by the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<&'static str>,
    pub state: RecordState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at_unix: u64,
}

impl JobRecord {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id: job_id.to_string(),
            user_id: None,
            quality: None,
            state: RecordState::Queued,
            phase: None,
            elapsed_secs: None,
            output: None,
            error_kind: None,
            message: None,
            updated_at_unix: unix_now(),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, RecordState::Done | RecordState::Error)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Default)]
struct Records {
    by_id: HashMap<JobId, JobRecord>,
    order: VecDeque<JobId>,
}

pub struct JobBoard {
    capacity: usize,
    records: Mutex<Records>,
}

impl JobBoard {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(Records::default()),
        }
    }

    /// Register an accepted job. A delivery that raced ahead of this call is kept.
    pub async fn queued(&self, job_id: JobId, user_id: UserId, quality: Quality) {
        self.update(job_id, |record| {
            record.user_id = Some(user_id);
            record.quality = Some(quality.label());
        })
        .await;
    }

    pub async fn get(&self, job_id: JobId) -> Option<JobRecord> {
        self.records.lock().await.by_id.get(&job_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.by_id.len()
    }

    async fn update(&self, job_id: JobId, apply: impl FnOnce(&mut JobRecord)) {
        let mut records = self.records.lock().await;
        if !records.by_id.contains_key(&job_id) {
            records.order.push_back(job_id);
            while records.order.len() > self.capacity {
                if let Some(evicted) = records.order.pop_front() {
                    records.by_id.remove(&evicted);
                    debug!(job_id = %evicted, "job record evicted");
                }
            }
        }
        let record = records
            .by_id
            .entry(job_id)
            .or_insert_with(|| JobRecord::new(job_id));
        apply(record);
        record.updated_at_unix = unix_now();
    }
}

impl DeliverySink for JobBoard {
    fn on_progress(
        &self,
        job_id: JobId,
        progress: Progress,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            debug!(job_id = %job_id, elapsed_secs = progress.elapsed.as_secs(), phase = %progress.phase, "job progress");
            self.update(job_id, |record| {
                if record.is_terminal() {
                    return;
                }
                record.state = RecordState::Processing;
                record.phase = Some(progress.phase.label());
                record.elapsed_secs = Some(progress.elapsed.as_secs());
            })
            .await;
        })
    }

    fn on_result(
        &self,
        job_id: JobId,
        output_ref: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            info!(job_id = %job_id, output = %output_ref, "job result delivered");
            self.update(job_id, |record| {
                record.state = RecordState::Done;
                record.output = Some(output_ref);
            })
            .await;
        })
    }

    fn on_error(
        &self,
        job_id: JobId,
        kind: ErrorKind,
        detail: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            warn!(job_id = %job_id, kind = %kind, detail = %detail, "job error delivered");
            self.update(job_id, |record| {
                record.state = RecordState::Error;
                record.error_kind = Some(kind.label());
                record.message = Some(kind.user_message().to_string());
            })
            .await;
        })
    }
}
