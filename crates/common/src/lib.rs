//! Common types for the GitHub API proxy

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
