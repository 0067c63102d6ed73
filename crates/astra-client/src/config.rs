//! Endpoint and response-shape configuration
//!
//! The Astra payload schema differs between deployments, so endpoint URLs and
//! the JSON field names read from responses are configuration, not code.

use std::time::Duration;

use serde::Serialize;

/// Placeholder in `status_url` replaced by the remote job id.
pub const JOB_ID_PLACEHOLDER: &str = "{job_id}";

/// Placeholder in `download_url` replaced by the result locator.
pub const RESULT_PLACEHOLDER: &str = "{result}";

/// Default User-Agent for outbound requests.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// JSON field names read from API responses. Dotted paths address nested objects.
#[derive(Debug, Clone)]
pub struct ResponseFields {
    /// Upload response: id of the uploaded media
    pub upload_id: String,
    /// Create response: remote job id
    pub job_id: String,
    /// Status response: job phase
    pub status: String,
    /// Status response: result locator (file id or URL)
    pub result: String,
    /// Status response: diagnostic message
    pub message: String,
}

impl Default for ResponseFields {
    fn default() -> Self {
        Self {
            upload_id: "fileId".into(),
            job_id: "jobId".into(),
            status: "status".into(),
            result: "resultFileId".into(),
            message: "message".into(),
        }
    }
}

/// One processing step in a create request's `filters` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slowmo: Option<u32>,
}

impl Filter {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fps: None,
            slowmo: None,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub upload_url: String,
    pub create_url: String,
    /// Template containing `{job_id}`
    pub status_url: String,
    /// Template containing `{result}`; ignored when the locator is already a URL
    pub download_url: String,
    /// Upscaling model, first in every filter list
    pub model: String,
    /// Frame interpolation model appended for 60 fps slow motion
    pub slowmo_model: String,
    /// Timeout for upload, create, and status requests
    pub timeout: Duration,
    /// Timeout for a whole download, body included
    pub download_timeout: Duration,
    pub user_agent: String,
    pub fields: ResponseFields,
}

impl ClientConfig {
    /// Filters for a plain 30 fps upscale.
    pub fn standard_filters(&self) -> Vec<Filter> {
        vec![Filter::model(&self.model)]
    }

    /// Filters for an upscale interpolated to 60 fps slow motion.
    pub fn slow_motion_filters(&self) -> Vec<Filter> {
        vec![
            Filter::model(&self.model),
            Filter {
                model: self.slowmo_model.clone(),
                fps: Some(60),
                slowmo: Some(1),
            },
        ]
    }

    pub fn status_url_for(&self, job_id: &str) -> String {
        self.status_url.replace(JOB_ID_PLACEHOLDER, job_id)
    }

    pub fn download_url_for(&self, locator: &str) -> String {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            return locator.to_string();
        }
        self.download_url.replace(RESULT_PLACEHOLDER, locator)
    }
}
