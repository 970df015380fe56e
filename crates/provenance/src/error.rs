//! Errors raised while encoding, scanning, minting, or opening packs.

/// Errors that can occur in the provenance codecs.
///
/// Every variant carries a reason that is fit to show the user as-is.
#[derive(Debug, thiserror::Error)]
pub enum ProvenanceError {
    #[error("Not a mint pack: {reason}")]
    NotAPack { reason: String },

    #[error("Not a provenance-bearing file: no Gluewave QR found in {sampled} sampled frames")]
    NotProvenanceBearing { sampled: usize },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("QR encoding failed: {message}")]
    QrEncode { message: String },

    #[error("Frame source error: {message}")]
    FrameSource { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProvenanceError {
    pub fn not_a_pack(reason: impl Into<String>) -> Self {
        Self::NotAPack {
            reason: reason.into(),
        }
    }

    pub fn frame_source(msg: impl Into<String>) -> Self {
        Self::FrameSource {
            message: msg.into(),
        }
    }
}
