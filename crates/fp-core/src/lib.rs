//! fp-core: shared error type and configuration.
//!
//! This crate is the foundational dependency for the other fp-* crates. It
//! provides the unified [`Error`] every process, compile and decode failure
//! funnels into, and the TOML-backed [`config::Config`].

pub mod config;
pub mod error;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
