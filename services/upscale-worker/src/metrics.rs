//! Prometheus metrics exposition
//!
//! Installs the global recorder for the metrics emitted by the engine and the
//! credential manager, plus the intake counter recorded here:
//!
//! - `http_intake_total` (counter): label `status` (HTTP status of `POST /jobs`)

use job_engine::metrics::JOB_DURATION_SECONDS;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries from one second to the default 20 minute deadline.
const JOB_DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(JOB_DURATION_SECONDS.to_string()),
            JOB_DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `job_duration_seconds` is given explicit buckets so it renders as a
/// histogram rather than the default summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record the outcome of a job intake request.
pub fn record_intake(status: u16) {
    metrics::counter!("http_intake_total", "status" => status.to_string()).increment(1);
}
