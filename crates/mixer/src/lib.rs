//! Gluewave Mixer
//!
//! Everything that happens between loading two sources and pressing record:
//!
//! - [`track`]: the playable-source wrapper for the BIG and SMALL slots
//! - [`clip`]: video clips decoded through `ffmpeg` into looping tracks
//! - [`glue`]: keeps SMALL locked to BIG at a captured offset across loop wraps
//! - [`audio_graph`]: three cascaded gain stages (big, small, master) with a
//!   direct-volume fallback until the graph exists
//!
//! ```text
//!   BIG ──► [big gain] ──┐
//!                        ├──► [master gain] ──► output + recording taps
//!   SMALL ► [small gain] ┘
//! ```

pub mod audio_graph;
pub mod clip;
pub mod glue;
pub mod track;

pub use audio_graph::*;
pub use clip::*;
pub use glue::*;
pub use track::*;
