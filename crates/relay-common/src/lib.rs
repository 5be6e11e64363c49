//! Relay Common Library
//!
//! Shared foundation for both relay networks: error taxonomy, SHA-256
//! checksum utilities, and structured-logging setup. Everything the
//! batch pipeline and its stores agree on lives here so the two network
//! deployments cannot drift apart on integrity or failure semantics.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{RelayError, Result};
