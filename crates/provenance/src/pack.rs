//! Mint pack archives.
//!
//! A pack is a zip archive with two well-known entries: the metadata
//! document ([`META_ENTRY`], required) and the source video
//! ([`VIDEO_ENTRY`], optional).

use std::io::{Cursor, Read, Write};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ProvenanceError;
use crate::mint::{MintJson, MINT_SIGNATURE};

/// Archive entry holding the [`MintJson`] document.
pub const META_ENTRY: &str = "mint.json";

/// Archive entry holding the source video.
pub const VIDEO_ENTRY: &str = "video.webm";

/// File extension of exported packs.
pub const PACK_EXTENSION: &str = "gwpack";

/// What a UI can show for a pack's video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preview {
    Available,
    Unavailable,
}

/// A mint document and its optional video.
#[derive(Debug, Clone, PartialEq)]
pub struct MintPack {
    pub meta: MintJson,
    pub video: Option<Vec<u8>>,
}

impl MintPack {
    pub fn new(meta: MintJson, video: Option<Vec<u8>>) -> Self {
        Self { meta, video }
    }

    /// Canonical archive name, derived from the take id.
    pub fn file_name(&self) -> String {
        pack_file_name(&self.meta.id)
    }

    pub fn preview(&self) -> Preview {
        match &self.video {
            Some(bytes) if !bytes.is_empty() => Preview::Available,
            _ => Preview::Unavailable,
        }
    }

    /// Serialize into zip bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProvenanceError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        let meta_options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(META_ENTRY, meta_options)?;
        writer.write_all(serde_json::to_string_pretty(&self.meta)?.as_bytes())?;

        if let Some(video) = &self.video {
            // Encoded video does not compress; store it as-is.
            let video_options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            writer.start_file(VIDEO_ENTRY, video_options)?;
            writer.write_all(video)?;
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Parse zip bytes.
    ///
    /// A missing or foreign metadata entry rejects the archive; a missing
    /// video entry does not.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProvenanceError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| match e {
            ZipError::InvalidArchive(_) | ZipError::UnsupportedArchive(_) => {
                ProvenanceError::not_a_pack(format!("not a zip archive ({e})"))
            }
            other => ProvenanceError::Archive(other),
        })?;

        let meta_text = match archive.by_name(META_ENTRY) {
            Ok(mut entry) => {
                let mut text = String::new();
                entry.read_to_string(&mut text)?;
                text
            }
            Err(ZipError::FileNotFound) => {
                return Err(ProvenanceError::not_a_pack(format!(
                    "missing {META_ENTRY} entry"
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let meta: MintJson = serde_json::from_str(&meta_text)?;
        if meta.signature != MINT_SIGNATURE {
            return Err(ProvenanceError::not_a_pack(format!(
                "unexpected signature {:?}",
                meta.signature
            )));
        }

        let video = match archive.by_name(VIDEO_ENTRY) {
            Ok(mut entry) => {
                // The declared size is untrusted; let the buffer grow.
                let mut bytes = Vec::new();
                match entry.read_to_end(&mut bytes) {
                    Ok(_) => Some(bytes),
                    Err(e) => {
                        tracing::warn!(id = %meta.id, error = %e, "Unreadable video entry, opening without preview");
                        None
                    }
                }
            }
            Err(ZipError::FileNotFound) => None,
            Err(e) => {
                tracing::warn!(id = %meta.id, error = %e, "Unreadable video entry, opening without preview");
                None
            }
        };

        Ok(Self { meta, video })
    }
}

/// Archive file name for a take id.
pub fn pack_file_name(id: &str) -> String {
    format!("{id}.{PACK_EXTENSION}")
}

/// A pack opened from a user-supplied file.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedPack {
    /// Name of the archive as supplied; display only.
    pub file_name: String,
    pub pack: MintPack,
}

impl OpenedPack {
    pub fn summary(&self) -> PackSummary {
        let meta = &self.pack.meta;
        PackSummary {
            file_name: self.file_name.clone(),
            id: meta.id.clone(),
            created_at: meta.created_at.clone(),
            mood: meta.mood.clone(),
            intention: meta.intention.clone(),
            duration_secs: meta.duration,
            preview: self.pack.preview(),
        }
    }
}

/// Display-oriented view of an opened pack.
#[derive(Debug, Clone, PartialEq)]
pub struct PackSummary {
    pub file_name: String,
    pub id: String,
    pub created_at: String,
    pub mood: String,
    pub intention: Option<String>,
    pub duration_secs: u64,
    pub preview: Preview,
}

/// Open a single archive.
pub fn open_pack(file_name: impl Into<String>, bytes: &[u8]) -> Result<OpenedPack, ProvenanceError> {
    let file_name = file_name.into();
    let pack = MintPack::from_bytes(bytes)?;
    if pack.preview() == Preview::Unavailable {
        tracing::info!(file = %file_name, id = %pack.meta.id, "Pack has no video, no preview available");
    }
    Ok(OpenedPack { file_name, pack })
}

/// Open a batch of archives, newest first.
///
/// Archives that fail to open are logged and skipped; the rest of the batch
/// still opens.
pub fn open_packs<I>(items: I) -> Vec<OpenedPack>
where
    I: IntoIterator<Item = (String, Vec<u8>)>,
{
    let mut opened: Vec<OpenedPack> = items
        .into_iter()
        .filter_map(|(file_name, bytes)| match open_pack(file_name.clone(), &bytes) {
            Ok(pack) => Some(pack),
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "Skipping pack");
                None
            }
        })
        .collect();

    // ISO 8601 timestamps order lexicographically.
    opened.sort_by(|a, b| b.pack.meta.created_at.cmp(&a.pack.meta.created_at));
    opened
}
