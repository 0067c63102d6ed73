//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Credentials never live in the TOML itself: the static token comes from
//! ASTRA_ACCESS_TOKEN, the session password from ASTRA_PASSWORD or
//! `password_file`.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use astra_client::config::{DEFAULT_USER_AGENT, JOB_ID_PLACEHOLDER, RESULT_PLACEHOLDER};
use astra_client::{ClientConfig, ResponseFields};
use common::Secret;
use job_engine::{DispatcherConfig, LifecycleConfig};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP intake settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub max_connections: usize,
    /// Upper bound on draining queued jobs at shutdown
    pub drain_timeout_secs: u64,
    /// Finished job records kept for `GET /jobs/{id}`
    pub max_tracked_jobs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 256,
            drain_timeout_secs: 30,
            max_tracked_jobs: 1024,
        }
    }
}

/// Queueing, quota, and polling settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_concurrent_jobs: usize,
    pub user_daily_limit: u32,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    pub progress_interval_secs: u64,
    pub idle_gap_ms: u64,
    pub admission_before_queue: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            user_daily_limit: 2,
            poll_interval_secs: 8,
            max_wait_secs: 1200,
            progress_interval_secs: 30,
            idle_gap_ms: 1000,
            admission_before_queue: true,
        }
    }
}

/// Remote processing API endpoints
#[derive(Debug, Deserialize)]
pub struct RemoteConfig {
    pub upload_url: String,
    pub create_url: String,
    pub status_url: String,
    pub download_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Interpolation model used by the q60 preset
    #[serde(default = "default_slowmo_model")]
    pub slowmo_model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Whole-download limit, body included
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub fields: FieldsConfig,
}

/// Response field names; dotted paths address nested objects.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FieldsConfig {
    pub upload_id: String,
    pub job_id: String,
    pub status: String,
    pub result: String,
    pub message: String,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        let defaults = ResponseFields::default();
        Self {
            upload_id: defaults.upload_id,
            job_id: defaults.job_id,
            status: defaults.status,
            result: defaults.result,
            message: defaults.message,
        }
    }
}

/// Credential source settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub max_uses: u32,
    pub login_url: Option<String>,
    pub session_url: Option<String>,
    pub username: Option<String>,
    /// Path to a file containing the session password (alternative to ASTRA_PASSWORD)
    pub password_file: Option<PathBuf>,
    pub session_field: String,
    pub token_field: String,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            max_uses: 10,
            login_url: None,
            session_url: None,
            username: None,
            password_file: None,
            session_field: "session".into(),
            token_field: "accessToken".into(),
            password: None,
            access_token: None,
        }
    }
}

/// Local input and output directories
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("inputs"),
            output_dir: PathBuf::from("outputs"),
        }
    }
}

fn default_model() -> String {
    "slf-2".into()
}

fn default_slowmo_model() -> String {
    "apo-8".into()
}

fn default_timeout() -> u64 {
    120
}

fn default_download_timeout() -> u64 {
    300
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

/// Where the bearer token comes from.
#[derive(Debug)]
pub enum CredentialSource<'a> {
    Static(&'a Secret<String>),
    Session {
        login_url: &'a str,
        session_url: &'a str,
        username: &'a str,
        password: &'a Secret<String>,
    },
}

/// Overwrite `target` with the parsed value of env var `key`, if set.
fn env_override<T>(key: &str, target: &mut T) -> common::Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = std::env::var(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| common::Error::InvalidEnv {
                key: key.into(),
                value: raw.clone(),
                reason: e.to_string(),
            })?;
    }
    Ok(())
}

fn require_http(name: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {url}"
        )))
    }
}

fn require_positive(name: &str, value: u64) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Config(format!("{name} must be greater than 0")));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Credential resolution order:
    /// 1. ASTRA_ACCESS_TOKEN env var (static token)
    /// 2. Session login block, password from ASTRA_PASSWORD or `password_file`
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env()?;
        config.resolve_secrets()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> common::Result<()> {
        env_override("MAX_CONCURRENT_JOBS", &mut self.queue.max_concurrent_jobs)?;
        env_override("USER_DAILY_LIMIT", &mut self.queue.user_daily_limit)?;
        env_override("POLL_INTERVAL_SEC", &mut self.queue.poll_interval_secs)?;
        env_override("MAX_WAIT_SEC", &mut self.queue.max_wait_secs)?;
        env_override("PROGRESS_INTERVAL_SEC", &mut self.queue.progress_interval_secs)?;
        env_override("IDLE_GAP_MS", &mut self.queue.idle_gap_ms)?;
        env_override("TOKEN_MAX_USES", &mut self.credentials.max_uses)?;
        env_override("REQUEST_TIMEOUT_SEC", &mut self.remote.timeout_secs)?;
        env_override("DOWNLOAD_TIMEOUT_SEC", &mut self.remote.download_timeout_secs)?;
        Ok(())
    }

    fn resolve_secrets(&mut self) -> common::Result<()> {
        let creds = &mut self.credentials;
        if let Ok(token) = std::env::var("ASTRA_ACCESS_TOKEN") {
            let token = token.trim().to_owned();
            if !token.is_empty() {
                creds.access_token = Some(Secret::new(token));
            }
        }

        if let Ok(password) = std::env::var("ASTRA_PASSWORD") {
            creds.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = creds.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim_end_matches(['\r', '\n']).to_owned();
            if !password.is_empty() {
                creds.password = Some(Secret::new(password));
            }
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        let queue = &self.queue;
        require_positive("max_concurrent_jobs", queue.max_concurrent_jobs as u64)?;
        require_positive("user_daily_limit", queue.user_daily_limit.into())?;
        require_positive("poll_interval_secs", queue.poll_interval_secs)?;
        require_positive("max_wait_secs", queue.max_wait_secs)?;
        require_positive("progress_interval_secs", queue.progress_interval_secs)?;
        require_positive("max_uses", self.credentials.max_uses.into())?;
        require_positive("timeout_secs", self.remote.timeout_secs)?;
        require_positive("download_timeout_secs", self.remote.download_timeout_secs)?;
        require_positive("max_connections", self.server.max_connections as u64)?;

        let remote = &self.remote;
        require_http("upload_url", &remote.upload_url)?;
        require_http("create_url", &remote.create_url)?;
        require_http("status_url", &remote.status_url)?;
        require_http("download_url", &remote.download_url)?;
        if !remote.status_url.contains(JOB_ID_PLACEHOLDER) {
            return Err(common::Error::Config(format!(
                "status_url must contain {JOB_ID_PLACEHOLDER}"
            )));
        }
        if !remote.download_url.contains(RESULT_PLACEHOLDER) {
            return Err(common::Error::Config(format!(
                "download_url must contain {RESULT_PLACEHOLDER}"
            )));
        }

        if let Some(url) = &self.credentials.login_url {
            require_http("login_url", url)?;
        }
        if let Some(url) = &self.credentials.session_url {
            require_http("session_url", url)?;
        }

        self.credential_source().map(|_| ())
    }

    /// The configured credential source. Fails when none is usable.
    pub fn credential_source(&self) -> common::Result<CredentialSource<'_>> {
        let creds = &self.credentials;
        if let Some(token) = &creds.access_token {
            return Ok(CredentialSource::Static(token));
        }
        match (&creds.login_url, &creds.session_url) {
            (Some(login_url), Some(session_url)) => {
                let username = creds.username.as_deref().ok_or_else(|| {
                    common::Error::Config("session login requires username".into())
                })?;
                let password = creds.password.as_ref().ok_or_else(|| {
                    common::Error::Config(
                        "session login requires ASTRA_PASSWORD or password_file".into(),
                    )
                })?;
                Ok(CredentialSource::Session {
                    login_url,
                    session_url,
                    username,
                    password,
                })
            }
            (None, None) => Err(common::Error::Config(
                "no credential source: set ASTRA_ACCESS_TOKEN or configure login_url and session_url"
                    .into(),
            )),
            _ => Err(common::Error::Config(
                "session login requires both login_url and session_url".into(),
            )),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.server.drain_timeout_secs)
    }

    pub fn client_config(&self) -> ClientConfig {
        let remote = &self.remote;
        ClientConfig {
            upload_url: remote.upload_url.clone(),
            create_url: remote.create_url.clone(),
            status_url: remote.status_url.clone(),
            download_url: remote.download_url.clone(),
            model: remote.model.clone(),
            slowmo_model: remote.slowmo_model.clone(),
            timeout: self.request_timeout(),
            download_timeout: Duration::from_secs(remote.download_timeout_secs),
            user_agent: remote.user_agent.clone(),
            fields: ResponseFields {
                upload_id: remote.fields.upload_id.clone(),
                job_id: remote.fields.job_id.clone(),
                status: remote.fields.status.clone(),
                result: remote.fields.result.clone(),
                message: remote.fields.message.clone(),
            },
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        let queue = &self.queue;
        DispatcherConfig {
            max_concurrent: queue.max_concurrent_jobs,
            admission_before_queue: queue.admission_before_queue,
            idle_gap: Duration::from_millis(queue.idle_gap_ms),
            lifecycle: LifecycleConfig {
                poll_interval: Duration::from_secs(queue.poll_interval_secs),
                max_wait: Duration::from_secs(queue.max_wait_secs),
                progress_interval: Duration::from_secs(queue.progress_interval_secs),
            },
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("upscale-worker.toml")
    }
}
