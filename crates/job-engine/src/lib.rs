//! Job orchestration engine for remote upscale jobs
//!
//! Accepts job requests, charges per-user daily quotas, queues admitted jobs
//! FIFO, and runs each through the remote lifecycle on a fixed pool of
//! workers. Results and errors reach the requester through its
//! `DeliverySink`, invoked from a single delivery task.
//!
//! Job lifecycle:
//! 1. `Dispatcher::submit_request()` checks capacity and `RateLimiter::admit()`
//! 2. Accepted jobs wait in the FIFO queue as `Queued`
//! 3. A worker resolves the input and drives `lifecycle::run_lifecycle()`:
//!    `Submitting` → `Polling` → `Completed` | `Failed` | `TimedOut`
//! 4. The fetched artifact goes to the `ResultStore`; the output reference or
//!    the error is delivered to the sink
//! 5. The worker idles for the configured gap, then takes the next job

pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod limiter;
pub mod metrics;
pub mod remote;

#[cfg(test)]
mod testing;

pub use delivery::{DeliverySink, InputResolver, Progress, ResultStore};
pub use dispatcher::{Admission, Backends, Dispatcher, DispatcherConfig, DispatcherStats, RejectReason};
pub use error::{ErrorKind, JobError, RemoteError, StoreError};
pub use job::{Job, JobId, JobStatus, Quality, UserId};
pub use lifecycle::{LifecycleConfig, run_lifecycle};
pub use limiter::{RateLimiter, UsageSnapshot, day_bucket};
pub use remote::{ByteStream, MediaInput, Phase, RemoteJobApi, RemoteJobStatus};
