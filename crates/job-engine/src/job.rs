//! Job record and status
//!
//! A `Job` is created at admission and mutated only by the worker that owns
//! it. Status only moves forward: `Queued` → `Submitting` → `Polling` → one
//! terminal status.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::warn;

use crate::delivery::DeliverySink;

/// Requester identity used for quota accounting.
pub type UserId = i64;

/// Local job identifier assigned at admission.
pub type JobId = uuid::Uuid;

/// Externally visible job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Submitting,
    Polling,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn label(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Submitting => "submitting",
            JobStatus::Polling => "polling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Submitting => 1,
            JobStatus::Polling => 2,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut => 3,
        }
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        next.rank() >= self.rank()
    }
}

/// Output preset chosen by the requester.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Quality {
    /// 1080p at 30 FPS
    #[default]
    Standard30,
    /// 1080p at 60 FPS with frame interpolation (slow motion)
    SlowMotion60,
}

impl Quality {
    pub fn label(&self) -> &'static str {
        match self {
            Quality::Standard30 => "q30",
            Quality::SlowMotion60 => "q60",
        }
    }

    /// Output frame rate of the preset.
    pub fn fps(&self) -> u32 {
        match self {
            Quality::Standard30 => 30,
            Quality::SlowMotion60 => 60,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    /// Accepts the preset label (`q30`, `q60`) or the bare frame rate.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "q30" | "30" => Ok(Quality::Standard30),
            "q60" | "60" => Ok(Quality::SlowMotion60),
            other => Err(format!("unknown quality preset: {other}")),
        }
    }
}

/// One unit of work: a user's input media plus the sink that hears about it.
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    /// Opaque reference resolved to media by the `InputResolver`
    pub input_ref: String,
    pub quality: Quality,
    pub sink: Arc<dyn DeliverySink>,
    pub status: JobStatus,
    pub remote_job_id: Option<String>,
    pub created_at: SystemTime,
}

impl Job {
    pub fn new(
        user_id: UserId,
        input_ref: String,
        quality: Quality,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user_id,
            input_ref,
            quality,
            sink,
            status: JobStatus::Queued,
            remote_job_id: None,
            created_at: SystemTime::now(),
        }
    }

    /// Move to `next`. Backward transitions are ignored and logged.
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_advance_to(next) {
            warn!(
                job_id = %self.id,
                from = self.status.label(),
                to = next.label(),
                "ignoring backward status transition"
            );
            return false;
        }
        self.status = next;
        true
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("input_ref", &self.input_ref)
            .field("quality", &self.quality)
            .field("status", &self.status)
            .field("remote_job_id", &self.remote_job_id)
            .finish_non_exhaustive()
    }
}
