//! Gluewave Render Engine
//!
//! Composites every recorded frame from the live tracks and the take's
//! provenance QR code onto one reusable surface.
//!
//! # Frame Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ watermark                                    │
//! │ ┌───────┐                                    │
//! │ │  QR   │        BIG (fills the surface)     │
//! │ └───────┘                                    │
//! │                                              │
//! │                            ┌───────────────┐ │
//! │                            │ SMALL (PiP)   │ │
//! │                            └───────────────┘▒│
//! └──────────────────────────────────────────────┘
//! ```

pub mod compositor;
pub mod live;

pub use compositor::*;
pub use live::*;
