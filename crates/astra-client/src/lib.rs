//! HTTP client for the Astra video processing API
//!
//! Three operations drive a remote job:
//! 1. `AstraClient::submit()` uploads the media, then creates a processing job
//! 2. `AstraClient::status()` polls the job's phase and result locator
//! 3. `AstraClient::download()` streams the processed artifact
//!
//! Every request carries a bearer token from `astra_auth::CredentialManager`
//! and the configured outbound timeout. A 401/403 invalidates the token that
//! was used and surfaces as `Error::AuthExpired`; callers may retry once.

pub mod client;
pub mod config;
pub mod error;
pub mod status;

pub use client::{AstraClient, ByteStream};
pub use config::{ClientConfig, Filter, ResponseFields};
pub use error::{Error, Result};
pub use status::{JobStatus, RemotePhase, StatusClass, classify_status};
