//! Scripted fakes shared by the engine's unit tests

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;

use crate::delivery::{DeliverySink, InputResolver, Progress, ResultStore};
use crate::error::{ErrorKind, RemoteError, StoreError};
use crate::job::{JobId, Quality};
use crate::remote::{ByteStream, MediaInput, RemoteJobApi, RemoteJobStatus};

/// Remote API whose responses are scripted per input file name.
///
/// `submit` returns the file name as the remote job id, so poll scripts are
/// keyed by input. An exhausted poll script reports `processing`.
#[derive(Default)]
pub struct ScriptedApi {
    submit_errors: Mutex<VecDeque<RemoteError>>,
    polls: Mutex<HashMap<String, VecDeque<Result<RemoteJobStatus, RemoteError>>>>,
    fetch_errors: Mutex<VecDeque<RemoteError>>,
    poll_delay: Mutex<Duration>,
    pub submit_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub poll_log: Mutex<Vec<String>>,
    pub submits_seen: Mutex<Vec<(String, Quality)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submit(&self, error: RemoteError) {
        self.submit_errors.lock().unwrap().push_back(error);
    }

    pub fn script(&self, remote_job_id: &str, polls: Vec<Result<RemoteJobStatus, RemoteError>>) {
        self.polls
            .lock()
            .unwrap()
            .insert(remote_job_id.to_string(), polls.into());
    }

    pub fn fail_fetch(&self, error: RemoteError) {
        self.fetch_errors.lock().unwrap().push_back(error);
    }

    pub fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock().unwrap() = delay;
    }

    pub fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Input names and presets in the order `submit` was called.
    pub fn submit_log(&self) -> Vec<(String, Quality)> {
        self.submits_seen.lock().unwrap().clone()
    }

    /// Highest number of polls observed in flight at once.
    pub fn max_concurrent_polls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl RemoteJobApi for ScriptedApi {
    fn submit(
        &self,
        media: MediaInput,
        quality: Quality,
    ) -> Pin<Box<dyn Future<Output = Result<String, RemoteError>> + Send + '_>> {
        Box::pin(async move {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            self.submits_seen
                .lock()
                .unwrap()
                .push((media.file_name.clone(), quality));
            match self.submit_errors.lock().unwrap().pop_front() {
                Some(error) => Err(error),
                None => Ok(media.file_name),
            }
        })
    }

    fn poll<'a>(
        &'a self,
        remote_job_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteJobStatus, RemoteError>> + Send + 'a>> {
        Box::pin(async move {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            self.poll_log.lock().unwrap().push(remote_job_id.to_string());
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            let delay = *self.poll_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.polls
                .lock()
                .unwrap()
                .get_mut(remote_job_id)
                .and_then(|script| script.pop_front())
                .unwrap_or_else(|| Ok(RemoteJobStatus::processing()))
        })
    }

    fn fetch<'a>(
        &'a self,
        result_locator: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ByteStream, RemoteError>> + Send + 'a>> {
        Box::pin(async move {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.fetch_errors.lock().unwrap().pop_front() {
                return Err(error);
            }
            let body = format!("upscaled:{result_locator}");
            let chunks = vec![Ok(Bytes::from(body))];
            Ok(futures_util::stream::iter(chunks).boxed())
        })
    }
}

/// Sink recording every callback as a line: `progress:<id>:<secs>`,
/// `result:<id>:<ref>`, `error:<id>:<kind>`.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(JobId, String)>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<(JobId, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn terminal_lines(&self) -> Vec<(JobId, String)> {
        self.lines()
            .into_iter()
            .filter(|(_, line)| !line.starts_with("progress"))
            .collect()
    }
}

impl DeliverySink for RecordingSink {
    fn on_progress(
        &self,
        job_id: JobId,
        progress: Progress,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.events
                .lock()
                .unwrap()
                .push((job_id, format!("progress:{}", progress.elapsed.as_secs())));
        })
    }

    fn on_result(
        &self,
        job_id: JobId,
        output_ref: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.events
                .lock()
                .unwrap()
                .push((job_id, format!("result:{output_ref}")));
        })
    }

    fn on_error(
        &self,
        job_id: JobId,
        kind: ErrorKind,
        _detail: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.events
                .lock()
                .unwrap()
                .push((job_id, format!("error:{kind}")));
        })
    }
}

/// Resolves any reference not starting with `missing` to a small payload.
pub struct MemoryResolver;

impl InputResolver for MemoryResolver {
    fn resolve<'a>(
        &'a self,
        input_ref: &'a str,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<MediaInput>> + Send + 'a>> {
        Box::pin(async move {
            if input_ref.starts_with("missing") {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{input_ref} not found"),
                ));
            }
            Ok(MediaInput {
                file_name: input_ref.to_string(),
                bytes: Bytes::from_static(b"video"),
            })
        })
    }
}

/// Collects artifacts in memory and returns `mem://<job id>` references.
#[derive(Default)]
pub struct MemoryStore {
    pub stored: Mutex<HashMap<JobId, Vec<u8>>>,
}

impl ResultStore for MemoryStore {
    fn store(
        &self,
        job_id: JobId,
        mut artifact: ByteStream,
    ) -> Pin<Box<dyn Future<Output = Result<String, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut body = Vec::new();
            while let Some(chunk) = artifact.next().await {
                body.extend_from_slice(&chunk?);
            }
            self.stored.lock().unwrap().insert(job_id, body);
            Ok(format!("mem://{job_id}"))
        })
    }
}
