//! Job metrics
//!
//! Recorded through the `metrics` facade; the binary installs the Prometheus
//! recorder.
//!
//! - `jobs_admitted_total` (counter): label `outcome` (`accepted`,
//!   `rate_limited`, `at_capacity`, `shutting_down`)
//! - `jobs_finished_total` (counter): label `outcome` (`completed` or an
//!   error kind label)
//! - `job_duration_seconds` (histogram): label `outcome`
//! - `jobs_active` (gauge)

/// Histogram name, exported so the binary can configure its buckets.
pub const JOB_DURATION_SECONDS: &str = "job_duration_seconds";

pub fn record_admission(outcome: &'static str) {
    metrics::counter!("jobs_admitted_total", "outcome" => outcome).increment(1);
}

pub fn record_finished(outcome: &'static str, duration_secs: f64) {
    metrics::counter!("jobs_finished_total", "outcome" => outcome).increment(1);
    metrics::histogram!(JOB_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

pub fn set_active(active: usize) {
    metrics::gauge!("jobs_active").set(active as f64);
}
