//! Credential sources
//!
//! A `TokenSource` produces a fresh bearer token on demand. Two sources exist:
//! 1. `StaticToken` re-issues a token provided through configuration
//! 2. `SessionLogin` logs in with username/password, then reads the token
//!    field from the session endpoint using the session returned by login
//!
//! Both session steps must succeed before a token is returned.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Abstraction over where bearer tokens come from.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn TokenSource>`).
pub trait TokenSource: Send + Sync {
    /// Identifier for logging (e.g. "static", "session")
    fn id(&self) -> &str;

    /// Obtain a new token. May perform network round trips.
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>>;
}

/// Token supplied directly by configuration (`ASTRA_ACCESS_TOKEN`).
pub struct StaticToken {
    token: Secret<String>,
}

impl StaticToken {
    pub fn new(token: Secret<String>) -> Self {
        Self { token }
    }
}

impl TokenSource for StaticToken {
    fn id(&self) -> &str {
        "static"
    }

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            if self.token.expose().trim().is_empty() {
                return Err(Error::InvalidCredentials("static token is empty".into()));
            }
            Ok(self.token.clone())
        })
    }
}

/// Endpoints, account, and response field names for the session login flow.
///
/// Field names accept dotted paths (`data.accessToken`) for nested JSON.
#[derive(Debug, Clone)]
pub struct SessionLoginConfig {
    pub login_url: String,
    pub session_url: String,
    pub username: String,
    pub password: Secret<String>,
    pub session_field: String,
    pub token_field: String,
    pub timeout: Duration,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Two-step login: authenticate, then extract the token from the session.
pub struct SessionLogin {
    client: reqwest::Client,
    config: SessionLoginConfig,
}

impl SessionLogin {
    pub fn new(client: reqwest::Client, config: SessionLoginConfig) -> Self {
        Self { client, config }
    }

    /// Step 1: POST the account to the login endpoint and return the session value.
    async fn login(&self) -> Result<Secret<String>> {
        let response = self
            .client
            .post(&self.config.login_url)
            .timeout(self.config.timeout)
            .json(&LoginRequest {
                username: &self.config.username,
                password: self.config.password.expose(),
            })
            .send()
            .await
            .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

        let body = read_json(response, "login").await?;
        let session = extract_field(&body, &self.config.session_field)
            .ok_or_else(|| Error::MissingField(self.config.session_field.clone()))?;
        debug!("login succeeded, fetching session");
        Ok(Secret::new(session))
    }

    /// Step 2: read the session with the session value as bearer and pull the token field.
    async fn exchange_session(&self, session: &Secret<String>) -> Result<Secret<String>> {
        let response = self
            .client
            .get(&self.config.session_url)
            .timeout(self.config.timeout)
            .bearer_auth(session.expose())
            .send()
            .await
            .map_err(|e| Error::Http(format!("session request failed: {e}")))?;

        let body = read_json(response, "session").await?;
        let token = extract_field(&body, &self.config.token_field)
            .ok_or_else(|| Error::MissingField(self.config.token_field.clone()))?;
        Ok(Secret::new(token))
    }
}

impl TokenSource for SessionLogin {
    fn id(&self) -> &str {
        "session"
    }

    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<Secret<String>>> + Send + '_>> {
        Box::pin(async move {
            let session = self.login().await?;
            self.exchange_session(&session).await
        })
    }
}

/// Check the status of a credential endpoint response and parse its JSON body.
async fn read_json(response: reqwest::Response, step: &str) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::InvalidCredentials(format!(
                "{step} rejected ({status}): {body}"
            )));
        }

        return Err(Error::SessionExchange(format!(
            "{step} returned {status}: {body}"
        )));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| Error::SessionExchange(format!("invalid {step} response: {e}")))
}

/// Look up a dotted path in a JSON value. Only non-empty strings count as present.
pub(crate) fn extract_field(value: &serde_json::Value, path: &str) -> Option<String> {
    let mut current = value;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    current
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}
