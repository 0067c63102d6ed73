//! Credential management for the Astra processing API
//!
//! One shared bearer token is reused across every outbound call until it has
//! been handed out `max_uses` times, then refreshed from the configured
//! credential source before the next caller receives it.
//!
//! Credential flow:
//! 1. Startup builds a `TokenSource` (static token or two-step session login)
//! 2. `CredentialManager::force_refresh()` warms and validates the credential
//! 3. Each outbound call takes a token via `CredentialManager::get()`
//! 4. A 401/403 from the API calls `CredentialManager::invalidate()` with the
//!    token that was rejected, so the next `get()` refreshes

pub mod error;
pub mod manager;
pub mod source;

pub use error::{Error, Result};
pub use manager::{CredentialManager, CredentialSnapshot};
pub use source::{SessionLogin, SessionLoginConfig, StaticToken, TokenSource};
