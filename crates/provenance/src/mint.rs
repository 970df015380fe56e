//! Mint metadata: binds a scanned payload to the exact bytes of its video.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::payload::Volumes;
use crate::scan::ScannedPayload;

/// Signature marker every mint document carries.
pub const MINT_SIGNATURE: &str = "gluewave-mint";

/// Schema version of [`MintJson`].
pub const MINT_VERSION: u32 = 1;

/// Moods longer than this are truncated.
pub const MOOD_MAX_CHARS: usize = 48;

/// The metadata document stored in a mint pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintJson {
    pub signature: String,
    pub version: u32,
    pub id: String,
    pub created_at: String,
    pub mood: String,
    pub intention: Option<String>,

    /// Whole seconds.
    pub duration: u64,

    pub volumes: Option<Volumes>,

    /// QR text exactly as scanned.
    pub embedded_qr_text: Option<String>,

    pub source: SourceDescriptor,
}

/// Describes the video a mint record was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub file_name: String,
    pub byte_size: u64,
    pub duration: f64,

    /// SHA-256 of the video bytes; empty when it could not be computed.
    #[serde(default)]
    pub content_hash_hex: String,
}

/// User input and source facts for a mint.
#[derive(Debug, Clone)]
pub struct MintRequest<'a> {
    pub video: &'a [u8],
    pub file_name: String,

    /// Source duration in seconds; non-finite or negative values record 0.
    pub duration_secs: f64,

    pub mood: String,
    pub intention: Option<String>,
}

/// Lowercase hex SHA-256 digest of `bytes`.
pub fn content_hash_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Build the mint record for a scanned video.
pub fn mint_record(request: &MintRequest<'_>, scanned: &ScannedPayload) -> MintJson {
    let duration_secs = if request.duration_secs.is_finite() && request.duration_secs > 0.0 {
        request.duration_secs
    } else {
        0.0
    };

    let intention = request
        .intention
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    let record = MintJson {
        signature: MINT_SIGNATURE.to_string(),
        version: MINT_VERSION,
        id: scanned.payload.id.clone(),
        created_at: scanned.payload.created_at.clone(),
        mood: request.mood.trim().chars().take(MOOD_MAX_CHARS).collect(),
        intention,
        duration: duration_secs.round() as u64,
        volumes: Some(scanned.payload.volumes),
        embedded_qr_text: Some(scanned.raw_text.clone()).filter(|text| !text.is_empty()),
        source: SourceDescriptor {
            file_name: request.file_name.clone(),
            byte_size: request.video.len() as u64,
            duration: duration_secs,
            content_hash_hex: content_hash_hex(request.video),
        },
    };

    tracing::info!(
        id = %record.id,
        bytes = record.source.byte_size,
        hash = %record.source.content_hash_hex,
        "Minted record"
    );
    record
}
