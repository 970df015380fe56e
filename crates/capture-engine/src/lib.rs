//! Gluewave Capture Engine
//!
//! Turns the live studio into bounded, provenance-stamped takes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  StudioContext                    │
//! │  ┌──────────┐ ┌──────────┐ ┌──────┐ ┌──────────┐  │
//! │  │ BIG slot │ │SMALL slot│ │ Glue │ │AudioGraph│  │
//! │  └─────┬────┘ └─────┬────┘ └──────┘ └─────┬────┘  │
//! │        └─────┬──────┘                     │       │
//! │              ▼                            │ tap   │
//! │      ┌───────────────┐                    │       │
//! │      │LiveCompositor │                    │       │
//! │      └───────┬───────┘                    │       │
//! └──────────────┼────────────────────────────┼───────┘
//!                ▼ frames                     ▼ audio
//!        ┌─────────────────────────────────────────┐
//!        │ RecordingSession ──▶ Encoder ──▶ chunks │
//!        └─────────────────────────────────────────┘
//! ```

pub mod context;
pub mod encoder;
pub mod session;

pub use context::StudioContext;
pub use session::*;
