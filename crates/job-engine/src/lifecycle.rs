//! Job lifecycle state machine
//!
//! `handle_event` is pure: it receives an event and returns the next state and
//! the action to perform. `run_lifecycle` executes the actions (remote calls,
//! waits) and feeds their outcomes back as events.
//!
//! ```text
//! Queued ──start──▶ Submitting ──submitted──▶ Polling ──completed──▶ Fetching ──fetched──▶ Completed
//!                        │                     │  ▲                    │
//!                        │                     └──┘ processing         │
//!                        │                     │ failed / error        │ error
//!                        └──── error ──────────┴──────▶ Failed ◀───────┘
//!                                              │ deadline
//!                                              └──────▶ TimedOut
//! ```
//!
//! `Fetching` is reported externally as `Polling`: the remote job is done but
//! the artifact is not in hand yet, and a failed download must not move a
//! `Completed` job backwards.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::delivery::Progress;
use crate::error::{ErrorKind, JobError, RemoteError, Result};
use crate::job::{Job, JobId, JobStatus};
use crate::remote::{ByteStream, MediaInput, Phase, RemoteJobApi, RemoteJobStatus};

/// Timing of one lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Wait between status polls
    pub poll_interval: Duration,
    /// Wall-clock ceiling measured from remote job creation
    pub max_wait: Duration,
    /// Interval between progress reports; zero disables reporting
    pub progress_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(8),
            max_wait: Duration::from_secs(1200),
            progress_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Submitting,
    Polling {
        remote_job_id: String,
        started: Instant,
        last: Option<RemoteJobStatus>,
    },
    Fetching {
        remote_job_id: String,
        result_locator: String,
    },
    Completed {
        remote_job_id: String,
        result_locator: String,
    },
    Failed(JobError),
    TimedOut {
        remote_job_id: String,
        elapsed: Duration,
    },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::Submitting => JobStatus::Submitting,
            JobState::Polling { .. } | JobState::Fetching { .. } => JobStatus::Polling,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed(_) => JobStatus::Failed,
            JobState::TimedOut { .. } => JobStatus::TimedOut,
        }
    }

    pub fn remote_job_id(&self) -> Option<&str> {
        match self {
            JobState::Polling { remote_job_id, .. }
            | JobState::Fetching { remote_job_id, .. }
            | JobState::Completed { remote_job_id, .. }
            | JobState::TimedOut { remote_job_id, .. } => Some(remote_job_id),
            JobState::Queued | JobState::Submitting | JobState::Failed(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum LifecycleEvent {
    /// Worker picked the job up
    Start,
    /// Remote job created
    Submitted { remote_job_id: String, at: Instant },
    /// Poll returned a status
    StatusReceived { status: RemoteJobStatus, at: Instant },
    /// Poll hit a transient failure; the loop continues
    PollFailed { at: Instant },
    /// Wall-clock ceiling reached while waiting or polling
    DeadlineReached { at: Instant },
    /// Artifact stream opened
    Fetched,
    /// Unrecoverable failure of the current action
    Errored(JobError),
}

#[derive(Debug, PartialEq, Eq)]
pub enum LifecycleAction {
    Submit,
    /// Wait for the next poll slot, then poll
    Poll { remote_job_id: String },
    Fetch { result_locator: String },
    /// Terminal state reached
    Finish,
    /// Event not valid in the current state
    None,
}

fn timed_out(remote_job_id: String, started: Instant, at: Instant) -> (JobState, LifecycleAction) {
    (
        JobState::TimedOut {
            remote_job_id,
            elapsed: at.saturating_duration_since(started),
        },
        LifecycleAction::Finish,
    )
}

fn poll_again(
    remote_job_id: String,
    started: Instant,
    last: Option<RemoteJobStatus>,
) -> (JobState, LifecycleAction) {
    let action = LifecycleAction::Poll {
        remote_job_id: remote_job_id.clone(),
    };
    (
        JobState::Polling {
            remote_job_id,
            started,
            last,
        },
        action,
    )
}

/// Pure transition function.
pub fn handle_event(
    state: JobState,
    event: LifecycleEvent,
    max_wait: Duration,
) -> (JobState, LifecycleAction) {
    let past_deadline = |started: Instant, at: Instant| at.saturating_duration_since(started) >= max_wait;

    match (state, event) {
        (JobState::Queued, LifecycleEvent::Start) => (JobState::Submitting, LifecycleAction::Submit),

        (JobState::Submitting, LifecycleEvent::Submitted { remote_job_id, at }) => {
            poll_again(remote_job_id, at, None)
        }

        (
            JobState::Polling {
                remote_job_id,
                started,
                ..
            },
            LifecycleEvent::StatusReceived { status, at },
        ) => match status.phase {
            Phase::Completed => match status.result_locator.clone() {
                Some(result_locator) => (
                    JobState::Fetching {
                        remote_job_id,
                        result_locator: result_locator.clone(),
                    },
                    LifecycleAction::Fetch { result_locator },
                ),
                None => (
                    JobState::Failed(JobError::new(
                        ErrorKind::RemoteRejected,
                        format!("remote job {remote_job_id} completed without a result locator"),
                    )),
                    LifecycleAction::Finish,
                ),
            },
            Phase::Failed => {
                let detail = status
                    .message
                    .unwrap_or_else(|| format!("remote job {remote_job_id} failed"));
                (
                    JobState::Failed(JobError::new(ErrorKind::RemoteRejected, detail)),
                    LifecycleAction::Finish,
                )
            }
            Phase::Processing if past_deadline(started, at) => timed_out(remote_job_id, started, at),
            Phase::Processing => poll_again(remote_job_id, started, Some(status)),
        },

        (
            JobState::Polling {
                remote_job_id,
                started,
                last,
            },
            LifecycleEvent::PollFailed { at },
        ) => {
            if past_deadline(started, at) {
                timed_out(remote_job_id, started, at)
            } else {
                poll_again(remote_job_id, started, last)
            }
        }

        (
            JobState::Polling {
                remote_job_id,
                started,
                ..
            },
            LifecycleEvent::DeadlineReached { at },
        ) => timed_out(remote_job_id, started, at),

        (
            JobState::Fetching {
                remote_job_id,
                result_locator,
            },
            LifecycleEvent::Fetched,
        ) => (
            JobState::Completed {
                remote_job_id,
                result_locator,
            },
            LifecycleAction::Finish,
        ),

        (state, _) if state.status().is_terminal() => (state, LifecycleAction::Finish),

        (_, LifecycleEvent::Errored(error)) => (JobState::Failed(error), LifecycleAction::Finish),

        (state, _) => (state, LifecycleAction::None),
    }
}

/// Run `call`, and once more if it fails with `AuthExpired`.
///
/// The remote implementation has already invalidated the rejected token, so
/// the second attempt draws a fresh one. A second `AuthExpired` is returned.
async fn with_auth_retry<T, F, Fut>(job_id: JobId, op: &'static str, mut call: F) -> std::result::Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RemoteError>>,
{
    match call().await {
        Err(RemoteError::AuthExpired(detail)) => {
            warn!(job_id = %job_id, op, detail, "credential rejected, retrying once");
            call().await
        }
        other => other,
    }
}

enum Wake {
    Poll,
    Deadline,
}

/// Timers of the polling phase: next poll, next progress report, deadline.
struct PollClock {
    started: Instant,
    deadline: Instant,
    next_poll: Instant,
    next_report: Option<Instant>,
    poll_interval: Duration,
    progress_interval: Duration,
    phase: Phase,
}

impl PollClock {
    fn new(started: Instant, config: &LifecycleConfig) -> Self {
        let next_report =
            (!config.progress_interval.is_zero()).then(|| started + config.progress_interval);
        Self {
            started,
            deadline: started + config.max_wait,
            next_poll: started + config.poll_interval,
            next_report,
            poll_interval: config.poll_interval,
            progress_interval: config.progress_interval,
            phase: Phase::Processing,
        }
    }

    /// Sleep until the next poll slot or the deadline, reporting progress on the way.
    async fn wait<P: FnMut(Progress)>(&mut self, on_progress: &mut P) -> Wake {
        loop {
            let mut wake = self.next_poll.min(self.deadline);
            if let Some(report) = self.next_report {
                wake = wake.min(report);
            }
            tokio::time::sleep_until(wake).await;

            let now = Instant::now();
            if let Some(report) = self.next_report.filter(|report| now >= *report) {
                on_progress(Progress {
                    elapsed: now.saturating_duration_since(self.started),
                    phase: self.phase,
                });
                let mut next = report + self.progress_interval;
                while next <= now {
                    next += self.progress_interval;
                }
                self.next_report = Some(next);
            }
            if now >= self.deadline {
                return Wake::Deadline;
            }
            if now >= self.next_poll {
                return Wake::Poll;
            }
        }
    }
}

/// Wait for the poll slot, poll once within the remaining budget, and turn the
/// outcome into an event.
async fn poll_step<P: FnMut(Progress)>(
    job_id: JobId,
    api: &dyn RemoteJobApi,
    remote_job_id: &str,
    clock: &mut PollClock,
    on_progress: &mut P,
) -> LifecycleEvent {
    if let Wake::Deadline = clock.wait(on_progress).await {
        return LifecycleEvent::DeadlineReached { at: Instant::now() };
    }

    let remaining = clock.deadline.saturating_duration_since(Instant::now());
    let outcome = tokio::time::timeout(
        remaining,
        with_auth_retry(job_id, "poll", || api.poll(remote_job_id)),
    )
    .await;
    let at = Instant::now();
    clock.next_poll = at + clock.poll_interval;
    let elapsed_secs = at.saturating_duration_since(clock.started).as_secs();

    match outcome {
        Err(_) => {
            warn!(job_id = %job_id, remote_job_id, elapsed_secs, "poll outlived the wait budget");
            LifecycleEvent::DeadlineReached { at }
        }
        Ok(Ok(status)) => {
            debug!(
                job_id = %job_id,
                remote_job_id,
                elapsed_secs,
                phase = status.phase.label(),
                "polled remote job"
            );
            clock.phase = status.phase;
            LifecycleEvent::StatusReceived { status, at }
        }
        Ok(Err(RemoteError::Transient(detail))) => {
            warn!(job_id = %job_id, remote_job_id, elapsed_secs, detail, "transient poll failure, continuing");
            LifecycleEvent::PollFailed { at }
        }
        Ok(Err(e)) => LifecycleEvent::Errored(e.into_job_error()),
    }
}

/// Mirror the machine state onto the job record.
fn sync_job(job: &mut Job, state: &JobState) {
    let status = state.status();
    if job.status != status && job.advance(status) {
        info!(job_id = %job.id, user_id = job.user_id, status = status.label(), "job status changed");
    }
    if job.remote_job_id.is_none() {
        job.remote_job_id = state.remote_job_id().map(str::to_string);
    }
}

/// Drive `job` from `Queued` to a terminal state.
///
/// Returns the artifact stream of a completed job; persisting it is up to the
/// caller. `on_progress` is called every `progress_interval` while polling.
pub async fn run_lifecycle<P>(
    job: &mut Job,
    media: MediaInput,
    api: &dyn RemoteJobApi,
    config: &LifecycleConfig,
    mut on_progress: P,
) -> Result<ByteStream>
where
    P: FnMut(Progress) + Send,
{
    let job_id = job.id;
    let quality = job.quality;
    let mut state = JobState::Queued;
    let mut event = LifecycleEvent::Start;
    let mut clock: Option<PollClock> = None;
    let mut artifact: Option<ByteStream> = None;

    loop {
        let (next, action) = handle_event(state, event, config.max_wait);
        state = next;
        sync_job(job, &state);

        event = match action {
            LifecycleAction::Submit => {
                match with_auth_retry(job_id, "submit", || {
                    api.submit(media.clone(), quality)
                }).await {
                    Ok(remote_job_id) => {
                        let at = Instant::now();
                        clock = Some(PollClock::new(at, config));
                        info!(job_id = %job_id, remote_job_id, "remote job created");
                        LifecycleEvent::Submitted { remote_job_id, at }
                    }
                    Err(e) => LifecycleEvent::Errored(e.into_job_error()),
                }
            }
            LifecycleAction::Poll { remote_job_id } => match clock.as_mut() {
                Some(clock) => {
                    poll_step(job_id, api, &remote_job_id, clock, &mut on_progress).await
                }
                None => LifecycleEvent::Errored(JobError::new(
                    ErrorKind::RemoteRejected,
                    "polling started before submission",
                )),
            },
            LifecycleAction::Fetch { result_locator } => {
                match with_auth_retry(job_id, "fetch", || api.fetch(&result_locator)).await {
                    Ok(stream) => {
                        artifact = Some(stream);
                        LifecycleEvent::Fetched
                    }
                    Err(RemoteError::Transient(detail)) => LifecycleEvent::Errored(JobError::new(
                        ErrorKind::DownloadFailed,
                        format!("download interrupted: {detail}"),
                    )),
                    Err(e) => LifecycleEvent::Errored(e.into_job_error()),
                }
            }
            LifecycleAction::Finish => break,
            LifecycleAction::None => {
                warn!(job_id = %job_id, state = ?state.status(), "invalid lifecycle transition");
                LifecycleEvent::Errored(JobError::new(
                    ErrorKind::RemoteRejected,
                    format!("invalid transition from {}", state.status().label()),
                ))
            }
        };
    }

    match state {
        JobState::Completed { remote_job_id, .. } => {
            info!(job_id = %job_id, remote_job_id, "remote job completed");
            artifact.ok_or_else(|| {
                JobError::new(ErrorKind::DownloadFailed, "artifact missing after fetch")
            })
        }
        JobState::Failed(error) => {
            warn!(job_id = %job_id, error = %error, "job failed");
            Err(error)
        }
        JobState::TimedOut {
            remote_job_id,
            elapsed,
        } => {
            warn!(job_id = %job_id, remote_job_id, elapsed_secs = elapsed.as_secs(), "job timed out");
            Err(JobError::new(
                ErrorKind::TimedOut,
                format!(
                    "remote job {remote_job_id} still processing after {}s",
                    elapsed.as_secs()
                ),
            ))
        }
        other => Err(JobError::new(
            ErrorKind::RemoteRejected,
            format!("lifecycle stopped in {} state", other.status().label()),
        )),
    }
}
