//! Status parsing and HTTP status classification
//!
//! The remote status vocabulary is `processing`, `completed`, `failed`.
//! Anything the API reports outside that vocabulary (queued, running, ...)
//! counts as still processing.

use crate::config::ResponseFields;

/// Phase of a remote job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePhase {
    Processing,
    Completed,
    Failed,
}

impl RemotePhase {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => RemotePhase::Completed,
            "failed" => RemotePhase::Failed,
            _ => RemotePhase::Processing,
        }
    }
}

/// One poll result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub phase: RemotePhase,
    pub result: Option<String>,
    pub message: Option<String>,
}

impl JobStatus {
    /// Build a status from a response body using the configured field names.
    pub fn from_json(body: &serde_json::Value, fields: &ResponseFields) -> Self {
        let phase = extract_id(body, &fields.status)
            .map(|raw| RemotePhase::parse(&raw))
            .unwrap_or(RemotePhase::Processing);
        Self {
            phase,
            result: extract_id(body, &fields.result),
            message: extract_id(body, &fields.message),
        }
    }
}

/// How an unsuccessful HTTP status should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Token rejected (401/403): invalidate and retry once
    Auth,
    /// Timeouts, throttling, and server errors: retry on the next poll
    Transient,
    /// Everything else: the request itself is refused
    Rejected,
}

/// Classify an unsuccessful HTTP status code.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        401 | 403 => StatusClass::Auth,
        408 | 429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Rejected,
    }
}

/// Read a dotted-path field as a string. Numeric ids are rendered as strings.
pub(crate) fn extract_id(body: &serde_json::Value, path: &str) -> Option<String> {
    let mut current = body;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    match current {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_phase_vocabulary() {
        assert_eq!(RemotePhase::parse("completed"), RemotePhase::Completed);
        assert_eq!(RemotePhase::parse("FAILED"), RemotePhase::Failed);
        assert_eq!(RemotePhase::parse("processing"), RemotePhase::Processing);
    }

    #[test]
    fn unknown_phase_is_processing() {
        assert_eq!(RemotePhase::parse("queued"), RemotePhase::Processing);
        assert_eq!(RemotePhase::parse(""), RemotePhase::Processing);
    }

    #[test]
    fn status_from_json_reads_configured_fields() {
        let body = serde_json::json!({
            "status": "completed",
            "resultFileId": "out-1",
            "message": "done"
        });
        let status = JobStatus::from_json(&body, &ResponseFields::default());
        assert_eq!(status.phase, RemotePhase::Completed);
        assert_eq!(status.result.as_deref(), Some("out-1"));
        assert_eq!(status.message.as_deref(), Some("done"));
    }

    #[test]
    fn status_from_json_without_status_field_is_processing() {
        let status = JobStatus::from_json(&serde_json::json!({}), &ResponseFields::default());
        assert_eq!(status.phase, RemotePhase::Processing);
        assert!(status.result.is_none());
    }

    #[test]
    fn status_from_json_nested_fields() {
        let fields = ResponseFields {
            status: "job.state".into(),
            result: "job.output.url".into(),
            ..ResponseFields::default()
        };
        let body = serde_json::json!({
            "job": {"state": "failed", "output": {"url": "https://cdn/x.mp4"}}
        });
        let status = JobStatus::from_json(&body, &fields);
        assert_eq!(status.phase, RemotePhase::Failed);
        assert_eq!(status.result.as_deref(), Some("https://cdn/x.mp4"));
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let body = serde_json::json!({"jobId": 9001});
        assert_eq!(extract_id(&body, "jobId").as_deref(), Some("9001"));
    }

    #[test]
    fn classify_auth_statuses() {
        assert_eq!(classify_status(401), StatusClass::Auth);
        assert_eq!(classify_status(403), StatusClass::Auth);
    }

    #[test]
    fn classify_retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert_eq!(classify_status(status), StatusClass::Transient, "{status}");
        }
    }

    #[test]
    fn classify_other_client_errors_rejected() {
        assert_eq!(classify_status(400), StatusClass::Rejected);
        assert_eq!(classify_status(404), StatusClass::Rejected);
        assert_eq!(classify_status(422), StatusClass::Rejected);
    }
}
