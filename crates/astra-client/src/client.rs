//! Astra API client
//!
//! Stateless apart from the shared credential manager: every call takes a
//! token, sends one request, and maps the response into `Result`.

use std::sync::Arc;
use std::time::Duration;

use astra_auth::CredentialManager;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::multipart::{Form, Part};
use tracing::{debug, instrument, warn};

use crate::config::{ClientConfig, Filter};
use crate::error::{Error, Result};
use crate::status::{JobStatus, StatusClass, classify_status, extract_id};

/// Lazily consumed body of a downloaded artifact.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Client for the Astra processing API.
pub struct AstraClient {
    http: reqwest::Client,
    credentials: Arc<CredentialManager>,
    config: ClientConfig,
}

impl AstraClient {
    pub fn new(
        http: reqwest::Client,
        credentials: Arc<CredentialManager>,
        config: ClientConfig,
    ) -> Self {
        Self {
            http,
            credentials,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Upload the media and create a processing job running `filters` on it.
    /// Returns the remote job id.
    #[instrument(skip(self, media, filters), fields(bytes = media.len(), filters = filters.len()))]
    pub async fn submit(&self, file_name: &str, media: Bytes, filters: &[Filter]) -> Result<String> {
        let upload_id = self.upload(file_name, media).await?;
        debug!(upload_id, "media uploaded");
        let job_id = self.create_job(&upload_id, filters).await?;
        debug!(job_id, "remote job created");
        Ok(job_id)
    }

    /// Poll the status of a remote job.
    #[instrument(skip(self))]
    pub async fn status(&self, job_id: &str) -> Result<JobStatus> {
        let request = self.http.get(self.config.status_url_for(job_id));
        let response = self.send(request, "status", self.config.timeout).await?;
        let response = ensure_success(response, "status").await?;
        let body = read_json(response, "status").await?;
        Ok(JobStatus::from_json(&body, &self.config.fields))
    }

    /// Start downloading a result. The body is streamed, not buffered, and
    /// must arrive within `download_timeout`.
    #[instrument(skip(self))]
    pub async fn download(&self, locator: &str) -> Result<ByteStream> {
        let request = self.http.get(self.config.download_url_for(locator));
        let response = self
            .send(request, "download", self.config.download_timeout)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::DownloadFailed(format!(
                "download returned {status}: {body}"
            )));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::DownloadFailed(format!("stream interrupted: {e}"))))
            .boxed())
    }

    async fn upload(&self, file_name: &str, media: Bytes) -> Result<String> {
        let length = media.len() as u64;
        let part = Part::stream_with_length(media, length).file_name(file_name.to_string());
        let request = self
            .http
            .post(&self.config.upload_url)
            .multipart(Form::new().part("file", part));
        let response = self.send(request, "upload", self.config.timeout).await?;
        let response = ensure_success(response, "upload").await?;
        let body = read_json(response, "upload").await?;
        extract_id(&body, &self.config.fields.upload_id).ok_or_else(|| {
            Error::InvalidResponse(format!(
                "upload response missing `{}`",
                self.config.fields.upload_id
            ))
        })
    }

    async fn create_job(&self, upload_id: &str, filters: &[Filter]) -> Result<String> {
        let mut payload = serde_json::Map::new();
        payload.insert(
            self.config.fields.upload_id.clone(),
            serde_json::Value::String(upload_id.to_string()),
        );
        let filters = serde_json::to_value(filters)
            .map_err(|e| Error::InvalidResponse(format!("encoding filters: {e}")))?;
        payload.insert("filters".into(), filters);

        let request = self.http.post(&self.config.create_url).json(&payload);
        let response = self.send(request, "create", self.config.timeout).await?;
        let response = ensure_success(response, "create").await?;
        let body = read_json(response, "create").await?;
        extract_id(&body, &self.config.fields.job_id).ok_or_else(|| {
            Error::InvalidResponse(format!(
                "create response missing `{}`",
                self.config.fields.job_id
            ))
        })
    }

    /// Attach a token, common headers, and `timeout`, then send.
    ///
    /// On 401/403 the token that was used is invalidated so the next call
    /// obtains a fresh one.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        step: &'static str,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        let token = self
            .credentials
            .get()
            .await
            .map_err(|e| Error::Credential(e.to_string()))?;

        let response = request
            .bearer_auth(token.expose())
            .header(ACCEPT, "*/*")
            .header(USER_AGENT, &self.config.user_agent)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Transient(format!("{step} timed out: {e}"))
                } else {
                    Error::Transient(format!("{step} request failed: {e}"))
                }
            })?;

        let status = response.status();
        if classify_status(status.as_u16()) == StatusClass::Auth {
            warn!(step, %status, "token rejected by remote API");
            self.credentials.invalidate(&token).await;
            return Err(Error::AuthExpired(format!("{step} rejected ({status})")));
        }

        Ok(response)
    }
}

/// Map a non-success status to `Transient` or `Rejected`.
async fn ensure_success(response: reqwest::Response, step: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));

    match classify_status(status.as_u16()) {
        StatusClass::Transient => Err(Error::Transient(format!(
            "{step} returned {status}: {body}"
        ))),
        _ => Err(Error::Rejected {
            status: status.as_u16(),
            message: format!("{step}: {body}"),
        }),
    }
}

async fn read_json(response: reqwest::Response, step: &str) -> Result<serde_json::Value> {
    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| Error::InvalidResponse(format!("{step} body is not JSON: {e}")))
}
