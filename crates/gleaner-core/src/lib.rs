//! `gleaner-core` — configuration and shared error types for the Gleaner
//! scheduled content pipeline.

pub mod config;
pub mod error;

pub use config::GleanerConfig;
pub use error::{GleanerError, Result};
