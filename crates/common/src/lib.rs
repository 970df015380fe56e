//! Gluewave Common Utilities
//!
//! Shared infrastructure for all Gluewave crates:
//! - Error types and result aliases
//! - Recording clock, timestamp and unique-id sources
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
