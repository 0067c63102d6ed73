//! Common types shared by the upscale orchestrator crates

mod secret;
mod error;

pub use secret::Secret;
pub use error::{Error, Result};
