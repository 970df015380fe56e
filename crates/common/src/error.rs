//! Error types shared across Gluewave crates.

use std::path::PathBuf;

/// Top-level error type for Gluewave operations.
#[derive(Debug, thiserror::Error)]
pub enum GluewaveError {
    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Recording error: {message}")]
    Recording { message: String },

    #[error("Provenance error: {message}")]
    Provenance { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using GluewaveError.
pub type GluewaveResult<T> = Result<T, GluewaveError>;

impl GluewaveError {
    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn recording(msg: impl Into<String>) -> Self {
        Self::Recording {
            message: msg.into(),
        }
    }

    pub fn provenance(msg: impl Into<String>) -> Self {
        Self::Provenance {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
