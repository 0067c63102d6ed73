//! Admission, FIFO queue, and worker pool
//!
//! `submit_request` decides admission synchronously: closed intake, capacity
//! (when `admission_before_queue` is set), then the daily quota. Capacity
//! counts queued and active jobs together and is reserved atomically, so a
//! burst of submissions cannot overshoot it. Admitted jobs go on a FIFO queue
//! consumed by `max_concurrent` workers. Each
//! worker runs one lifecycle to completion, hands the outcome to the delivery
//! task, and idles for `idle_gap` before taking the next job.
//!
//! Capacity is checked before the quota so a busy rejection does not consume
//! one of the user's daily attempts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::delivery::{
    DeliveryEvent, DeliverySink, EventSender, InputResolver, ResultStore, Update,
    spawn_delivery_task,
};
use crate::error::{ErrorKind, JobError, Result};
use crate::job::{Job, JobId, JobStatus, Quality, UserId};
use crate::lifecycle::{LifecycleConfig, run_lifecycle};
use crate::limiter::RateLimiter;
use crate::metrics;
use crate::remote::RemoteJobApi;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of workers, and the capacity ceiling for admission
    pub max_concurrent: usize,
    /// Reject at submission when `max_concurrent` jobs are queued or active
    pub admission_before_queue: bool,
    /// Pause after each job before the worker takes the next one
    pub idle_gap: Duration,
    pub lifecycle: LifecycleConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            admission_before_queue: true,
            idle_gap: Duration::from_secs(1),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

/// External collaborators used by workers.
#[derive(Clone)]
pub struct Backends {
    pub api: Arc<dyn RemoteJobApi>,
    pub resolver: Arc<dyn InputResolver>,
    pub store: Arc<dyn ResultStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    RateLimitExceeded,
    AtCapacity,
    ShuttingDown,
}

impl RejectReason {
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::RateLimitExceeded => "rate_limited",
            RejectReason::AtCapacity => "at_capacity",
            RejectReason::ShuttingDown => "shutting_down",
        }
    }

    /// Human-readable reason for the requester.
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::RateLimitExceeded => ErrorKind::RateLimitExceeded.user_message(),
            RejectReason::AtCapacity => "Busy processing other videos. Please try again in a few minutes.",
            RejectReason::ShuttingDown => "The service is restarting. Please try again shortly.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted { job_id: JobId },
    Rejected(RejectReason),
}

/// Counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    pub max_concurrent: usize,
    pub active: usize,
    pub queued: usize,
    pub accepted_total: u64,
    pub rejected_total: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub accepting: bool,
}

struct Shared {
    config: DispatcherConfig,
    limiter: Arc<RateLimiter>,
    backends: Backends,
    accepting: AtomicBool,
    /// Jobs admitted and not yet finished (queued + active)
    slots: AtomicUsize,
    active: AtomicUsize,
    queued: AtomicUsize,
    accepted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    intake: RwLock<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn the workers and the delivery task. Must be called inside a Tokio runtime.
    ///
    /// `max_concurrent` below 1 is treated as 1.
    pub fn start(mut config: DispatcherConfig, limiter: Arc<RateLimiter>, backends: Backends) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let delivery = spawn_delivery_task(events_rx);

        let shared = Arc::new(Shared {
            config,
            limiter,
            backends,
            accepting: AtomicBool::new(true),
            slots: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let workers = (0..shared.config.max_concurrent)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    shared.clone(),
                    queue_rx.clone(),
                    events_tx.clone(),
                ))
            })
            .collect();

        info!(
            max_concurrent = shared.config.max_concurrent,
            admission_before_queue = shared.config.admission_before_queue,
            daily_limit = shared.limiter.daily_limit(),
            "dispatcher started"
        );

        Self {
            shared,
            intake: RwLock::new(Some(queue_tx)),
            workers: Mutex::new(workers),
            delivery: Mutex::new(Some(delivery)),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.shared.limiter
    }

    /// Admit or reject a job. Accepted jobs are queued and reported to `sink`.
    pub async fn submit_request(
        &self,
        user_id: UserId,
        input_ref: String,
        quality: Quality,
        sink: Arc<dyn DeliverySink>,
    ) -> Admission {
        let intake = self.intake.read().await;
        let Some(queue) = intake.as_ref() else {
            return self.reject(user_id, RejectReason::ShuttingDown);
        };

        let shared = &self.shared;
        if !shared.reserve_slot() {
            return self.reject(user_id, RejectReason::AtCapacity);
        }
        if !shared.limiter.admit(user_id).await {
            shared.release_slot();
            return self.reject(user_id, RejectReason::RateLimitExceeded);
        }

        let job = Job::new(user_id, input_ref, quality, sink);
        let job_id = job.id;
        let queued = shared.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if queue.send(job).is_err() {
            shared.queued.fetch_sub(1, Ordering::SeqCst);
            shared.release_slot();
            return self.reject(user_id, RejectReason::ShuttingDown);
        }

        shared.accepted.fetch_add(1, Ordering::Relaxed);
        metrics::record_admission("accepted");
        info!(job_id = %job_id, user_id, quality = %quality, queued, "job accepted");
        Admission::Accepted { job_id }
    }

    fn reject(&self, user_id: UserId, reason: RejectReason) -> Admission {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::record_admission(reason.label());
        warn!(user_id, reason = reason.label(), "job rejected");
        Admission::Rejected(reason)
    }

    pub fn stats(&self) -> DispatcherStats {
        let shared = &self.shared;
        DispatcherStats {
            max_concurrent: shared.config.max_concurrent,
            active: shared.active.load(Ordering::SeqCst),
            queued: shared.queued.load(Ordering::SeqCst),
            accepted_total: shared.accepted.load(Ordering::Relaxed),
            rejected_total: shared.rejected.load(Ordering::Relaxed),
            completed_total: shared.completed.load(Ordering::Relaxed),
            failed_total: shared.failed.load(Ordering::Relaxed),
            accepting: shared.accepting.load(Ordering::SeqCst),
        }
    }

    /// Close intake, let workers drain the queue, and wait for the last delivery.
    ///
    /// Requests arriving after this call are rejected with `ShuttingDown`.
    pub async fn shutdown(&self) {
        let closed = self.intake.write().await.take();
        self.shared.accepting.store(false, Ordering::SeqCst);
        if closed.is_none() {
            debug!("dispatcher already shut down");
        }
        drop(closed);

        let stats = self.stats();
        info!(active = stats.active, queued = stats.queued, "dispatcher draining");

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        let delivery = self.delivery.lock().await.take();
        if let Some(delivery) = delivery {
            if let Err(e) = delivery.await {
                warn!(error = %e, "delivery task ended abnormally");
            }
        }
        info!("dispatcher stopped");
    }
}

async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    events: EventSender,
) {
    debug!(worker, "worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(job) = next else { break };

        shared.queued.fetch_sub(1, Ordering::SeqCst);
        metrics::set_active(shared.active.fetch_add(1, Ordering::SeqCst) + 1);
        shared.process(worker, job, &events).await;
        metrics::set_active(shared.active.fetch_sub(1, Ordering::SeqCst) - 1);
        shared.release_slot();

        if !shared.config.idle_gap.is_zero() {
            tokio::time::sleep(shared.config.idle_gap).await;
        }
    }
    debug!(worker, "worker stopped");
}

impl Shared {
    /// Claim a capacity slot. Without `admission_before_queue` the count is
    /// kept but never refused.
    fn reserve_slot(&self) -> bool {
        if !self.config.admission_before_queue {
            self.slots.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        let max = self.config.max_concurrent;
        self.slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| {
                (held < max).then_some(held + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.slots.fetch_sub(1, Ordering::SeqCst);
    }

    async fn process(&self, worker: usize, mut job: Job, events: &EventSender) {
        let started = Instant::now();
        let job_id = job.id;
        let user_id = job.user_id;
        let sink = job.sink.clone();
        info!(job_id = %job_id, user_id, worker, input = %job.input_ref, "job started");

        let outcome = self.execute(&mut job, events).await;
        let duration_secs = started.elapsed().as_secs_f64();

        let update = match outcome {
            Ok(output_ref) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                metrics::record_finished("completed", duration_secs);
                info!(job_id = %job_id, user_id, duration_secs, output_ref, "job finished");
                Update::Result(output_ref)
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_finished(error.kind.label(), duration_secs);
                warn!(
                    job_id = %job_id,
                    user_id,
                    duration_secs,
                    kind = error.kind.label(),
                    detail = %error.detail,
                    "job did not complete"
                );
                Update::Error {
                    kind: error.kind,
                    detail: error.detail,
                }
            }
        };

        if events
            .send(DeliveryEvent {
                job_id,
                sink,
                update,
            })
            .is_err()
        {
            warn!(job_id = %job_id, "delivery task gone, outcome dropped");
        }
    }

    async fn execute(&self, job: &mut Job, events: &EventSender) -> Result<String> {
        let resolved = self.backends.resolver.resolve(&job.input_ref).await;
        let media = match resolved {
            Ok(media) => media,
            Err(e) => {
                job.advance(JobStatus::Failed);
                return Err(JobError::new(
                    ErrorKind::InputUnavailable,
                    format!("{}: {e}", job.input_ref),
                ));
            }
        };

        let job_id = job.id;
        let sink = job.sink.clone();
        let artifact = run_lifecycle(
            job,
            media,
            self.backends.api.as_ref(),
            &self.config.lifecycle,
            move |progress| {
                let _ = events.send(DeliveryEvent {
                    job_id,
                    sink: sink.clone(),
                    update: Update::Progress(progress),
                });
            },
        )
        .await?;

        self.backends
            .store
            .store(job_id, artifact)
            .await
            .map_err(|e| JobError::new(ErrorKind::DownloadFailed, format!("storing artifact: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::RemoteJobStatus;
    use crate::testing::{MemoryResolver, MemoryStore, RecordingSink, ScriptedApi};

    struct Harness {
        dispatcher: Dispatcher,
        api: Arc<ScriptedApi>,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
    }

    fn harness(config: DispatcherConfig, daily_limit: u32) -> Harness {
        let api = Arc::new(ScriptedApi::new());
        let store = Arc::new(MemoryStore::default());
        let backends = Backends {
            api: api.clone(),
            resolver: Arc::new(MemoryResolver),
            store: store.clone(),
        };
        let dispatcher = Dispatcher::start(config, Arc::new(RateLimiter::new(daily_limit)), backends);
        Harness {
            dispatcher,
            api,
            store,
            sink: Arc::new(RecordingSink::default()),
        }
    }

    fn queued_config() -> DispatcherConfig {
        DispatcherConfig {
            max_concurrent: 1,
            admission_before_queue: false,
            idle_gap: Duration::from_secs(1),
            lifecycle: LifecycleConfig {
                poll_interval: Duration::from_secs(8),
                max_wait: Duration::from_secs(60),
                progress_interval: Duration::from_secs(30),
            },
        }
    }

    async fn accept(h: &Harness, user_id: UserId, input: &str) -> JobId {
        match h
            .dispatcher
            .submit_request(user_id, input.into(), Quality::default(), h.sink.clone())
            .await
        {
            Admission::Accepted { job_id } => job_id,
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_worker_delivers_outcomes_in_submission_order() {
        let h = harness(queued_config(), 10);
        h.api.script(
            "a.mp4",
            vec![
                Ok(RemoteJobStatus::processing()),
                Ok(RemoteJobStatus::processing()),
                Ok(RemoteJobStatus::completed("out-a")),
            ],
        );
        h.api.script("b.mp4", vec![Ok(RemoteJobStatus::completed("out-b"))]);
        h.api.script("c.mp4", vec![Ok(RemoteJobStatus::failed("bad input"))]);

        let a = accept(&h, 1, "a.mp4").await;
        let b = accept(&h, 2, "b.mp4").await;
        let c = accept(&h, 3, "c.mp4").await;
        h.dispatcher.shutdown().await;

        assert_eq!(
            h.sink.terminal_lines(),
            vec![
                (a, format!("result:mem://{a}")),
                (b, format!("result:mem://{b}")),
                (c, "error:remote_rejected".to_string()),
            ]
        );
        // Each job was polled to completion before the next one started
        assert_eq!(
            *h.api.poll_log.lock().unwrap(),
            vec!["a.mp4", "a.mp4", "a.mp4", "b.mp4", "c.mp4"]
        );
        assert_eq!(h.store.stored.lock().unwrap()[&a], b"upscaled:out-a");
    }

    #[tokio::test(start_paused = true)]
    async fn daily_limit_two_rejects_third_request() {
        let h = harness(queued_config(), 2);

        let mut admissions = Vec::new();
        for _ in 0..3 {
            admissions.push(
                h.dispatcher
                    .submit_request(9, "clip.mp4".into(), Quality::default(), h.sink.clone())
                    .await,
            );
        }

        assert!(matches!(admissions[0], Admission::Accepted { .. }));
        assert!(matches!(admissions[1], Admission::Accepted { .. }));
        assert_eq!(
            admissions[2],
            Admission::Rejected(RejectReason::RateLimitExceeded)
        );
        let stats = h.dispatcher.stats();
        assert_eq!(stats.accepted_total, 2);
        assert_eq!(stats.rejected_total, 1);
        h.dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_poll_reports_error_without_fetch() {
        let h = harness(queued_config(), 10);
        h.api.script("bad.mp4", vec![Ok(RemoteJobStatus::failed("unsupported"))]);

        let job_id = accept(&h, 1, "bad.mp4").await;
        h.dispatcher.shutdown().await;

        assert_eq!(
            h.sink.terminal_lines(),
            vec![(job_id, "error:remote_rejected".to_string())]
        );
        assert_eq!(h.api.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_survives_failures_and_takes_next_job() {
        let h = harness(queued_config(), 10);
        h.api.fail_submit(RemoteError::Rejected("413 too large".into()));
        h.api.script("ok.mp4", vec![Ok(RemoteJobStatus::completed("out-ok"))]);

        let missing = accept(&h, 1, "missing.mp4").await;
        let rejected = accept(&h, 1, "huge.mp4").await;
        let ok = accept(&h, 1, "ok.mp4").await;
        h.dispatcher.shutdown().await;

        assert_eq!(
            h.sink.terminal_lines(),
            vec![
                (missing, "error:input_unavailable".to_string()),
                (rejected, "error:remote_rejected".to_string()),
                (ok, format!("result:mem://{ok}")),
            ]
        );
        let stats = h.dispatcher.stats();
        assert_eq!(stats.completed_total, 1);
        assert_eq!(stats.failed_total, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn at_capacity_rejection_does_not_charge_quota() {
        let config = DispatcherConfig {
            admission_before_queue: true,
            ..queued_config()
        };
        let h = harness(config, 5);

        let slow = accept(&h, 1, "slow.mp4").await;
        while h.dispatcher.stats().active == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let busy = h
            .dispatcher
            .submit_request(1, "second.mp4".into(), Quality::default(), h.sink.clone())
            .await;
        assert_eq!(busy, Admission::Rejected(RejectReason::AtCapacity));
        assert_eq!(h.dispatcher.limiter().usage(1).await.used, 1);

        h.dispatcher.shutdown().await;
        assert_eq!(
            h.sink.terminal_lines(),
            vec![(slow, "error:timed_out".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_beyond_capacity_is_rejected_without_waiting() {
        let config = DispatcherConfig {
            admission_before_queue: true,
            ..queued_config()
        };
        let h = harness(config, 10);
        h.api.script("first.mp4", vec![Ok(RemoteJobStatus::completed("out-1"))]);

        let mut admissions = Vec::new();
        for input in ["first.mp4", "second.mp4", "third.mp4", "fourth.mp4"] {
            admissions.push(
                h.dispatcher
                    .submit_request(1, input.into(), Quality::default(), h.sink.clone())
                    .await,
            );
        }

        assert!(matches!(admissions[0], Admission::Accepted { .. }));
        for admission in &admissions[1..] {
            assert_eq!(*admission, Admission::Rejected(RejectReason::AtCapacity));
        }
        assert_eq!(h.dispatcher.limiter().usage(1).await.used, 1);

        // The slot frees up once the first job is finished
        while h.sink.terminal_lines().is_empty() || h.dispatcher.stats().active > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let again = h
            .dispatcher
            .submit_request(1, "fifth.mp4".into(), Quality::default(), h.sink.clone())
            .await;
        assert!(matches!(again, Admission::Accepted { .. }), "got {again:?}");
        h.dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submissions_never_exceed_capacity() {
        let config = DispatcherConfig {
            max_concurrent: 2,
            admission_before_queue: true,
            ..queued_config()
        };
        let h = harness(config, 100);

        let submissions = (0..6).map(|n| {
            h.dispatcher.submit_request(
                n,
                format!("clip-{n}.mp4"),
                Quality::default(),
                h.sink.clone(),
            )
        });
        let admissions = futures_util::future::join_all(submissions).await;

        let accepted = admissions
            .iter()
            .filter(|a| matches!(a, Admission::Accepted { .. }))
            .count();
        assert_eq!(accepted, 2);
        assert_eq!(
            admissions
                .iter()
                .filter(|a| **a == Admission::Rejected(RejectReason::AtCapacity))
                .count(),
            4
        );
        h.dispatcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn two_workers_overlap_in_fifo_order_and_deliver_each_job_once() {
        let config = DispatcherConfig {
            max_concurrent: 2,
            idle_gap: Duration::ZERO,
            ..queued_config()
        };
        let h = harness(config, 100);
        h.api.set_poll_delay(Duration::from_secs(5));
        let inputs = ["a.mp4", "b.mp4", "c.mp4", "d.mp4"];
        for input in inputs {
            h.api.script(input, vec![Ok(RemoteJobStatus::completed(input))]);
        }

        let mut job_ids = Vec::new();
        for (user, input) in inputs.iter().enumerate() {
            job_ids.push(accept(&h, user as UserId, input).await);
        }

        while h.sink.terminal_lines().len() < inputs.len() {
            assert!(h.dispatcher.stats().active <= 2);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        h.dispatcher.shutdown().await;

        assert_eq!(h.api.max_concurrent_polls(), 2);

        // The first two jobs start before the last two
        let started: Vec<String> = h.api.submit_log().into_iter().map(|(name, _)| name).collect();
        let mut first_pair = started[..2].to_vec();
        first_pair.sort();
        let mut second_pair = started[2..].to_vec();
        second_pair.sort();
        assert_eq!(first_pair, vec!["a.mp4", "b.mp4"]);
        assert_eq!(second_pair, vec!["c.mp4", "d.mp4"]);

        let terminal = h.sink.terminal_lines();
        assert_eq!(terminal.len(), inputs.len());
        for job_id in &job_ids {
            let deliveries: Vec<_> = terminal.iter().filter(|(id, _)| id == job_id).collect();
            assert_eq!(deliveries.len(), 1, "job {job_id} delivered {deliveries:?}");
            assert_eq!(deliveries[0].1, format!("result:mem://{job_id}"));
        }
        let stats = h.dispatcher.stats();
        assert_eq!(stats.completed_total, 4);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_precedes_result() {
        let h = harness(queued_config(), 10);
        let mut polls = vec![Ok(RemoteJobStatus::processing()); 5];
        polls.push(Ok(RemoteJobStatus::completed("out-1")));
        h.api.script("long.mp4", polls);

        let job_id = accept(&h, 1, "long.mp4").await;
        h.dispatcher.shutdown().await;

        let lines: Vec<String> = h.sink.lines().into_iter().map(|(_, line)| line).collect();
        assert_eq!(
            lines,
            vec![
                "progress:30".to_string(),
                format!("result:mem://{job_id}")
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_new_requests() {
        let h = harness(queued_config(), 10);
        h.dispatcher.shutdown().await;

        let admission = h
            .dispatcher
            .submit_request(1, "late.mp4".into(), Quality::default(), h.sink.clone())
            .await;

        assert_eq!(admission, Admission::Rejected(RejectReason::ShuttingDown));
        assert!(!h.dispatcher.stats().accepting);
        // Rejected before the limiter, so no quota was charged
        assert_eq!(h.dispatcher.limiter().usage(1).await.used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_workers_is_clamped_to_one() {
        let config = DispatcherConfig {
            max_concurrent: 0,
            ..queued_config()
        };
        let h = harness(config, 10);
        h.api.script("x.mp4", vec![Ok(RemoteJobStatus::completed("out"))]);

        let job_id = accept(&h, 1, "x.mp4").await;
        h.dispatcher.shutdown().await;

        assert_eq!(h.dispatcher.stats().max_concurrent, 1);
        assert_eq!(
            h.sink.terminal_lines(),
            vec![(job_id, format!("result:mem://{job_id}"))]
        );
    }
}
