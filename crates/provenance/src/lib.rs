//! Gluewave Provenance
//!
//! Data contracts and codecs that tie a recorded take back to the session
//! that produced it:
//! - **Payload:** the JSON document burned into every recorded frame as a QR code
//! - **Scan:** best-effort recovery of that payload from an arbitrary video
//! - **Mint:** the metadata record binding a payload to a content hash
//! - **Pack:** the archive that carries the metadata and the source video
//!
//! ```text
//!  record start ──► QrPayload ──► qr::rasterize ──► burned into frames
//!                                                        │
//!  imported video ──► scan (crop → full, ±polarity) ◄────┘
//!                        │
//!                        ▼
//!                  mint_record (sha256) ──► MintPack { mint.json, video.webm }
//! ```

pub mod error;
pub mod mint;
pub mod pack;
pub mod payload;
pub mod qr;
pub mod scan;

pub use error::*;
pub use mint::*;
pub use pack::*;
pub use payload::*;
pub use scan::*;
