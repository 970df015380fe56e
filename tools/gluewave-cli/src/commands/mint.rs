//! Mint a pack from a provenance-bearing video.

use std::path::PathBuf;

use gluewave_provenance::mint::{mint_record, MintRequest};
use gluewave_provenance::pack::MintPack;
use gluewave_provenance::scan::{
    probe_duration_secs, ProvenanceScanner, VideoScanner, SAMPLE_TIMESTAMPS,
};
use gluewave_provenance::ProvenanceError;

pub async fn run(
    video: PathBuf,
    mood: String,
    intention: Option<String>,
    output: PathBuf,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(&video)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", video.display()))?;

    let Some(scanned) = VideoScanner.scan(&bytes).await? else {
        return Err(ProvenanceError::NotProvenanceBearing {
            sampled: SAMPLE_TIMESTAMPS.len(),
        }
        .into());
    };
    println!("Payload {} ({})", scanned.payload.id, scanned.payload.created_at);

    let file_name = video
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let request = MintRequest {
        video: &bytes,
        file_name,
        duration_secs: probe_duration_secs(&video).unwrap_or(0.0),
        mood,
        intention,
    };
    let meta = mint_record(&request, &scanned);
    let hash = meta.source.content_hash_hex.clone();

    let pack = MintPack::new(meta, Some(bytes));
    let archive = pack.to_bytes()?;

    std::fs::create_dir_all(&output)?;
    let path = output.join(pack.file_name());
    std::fs::write(&path, &archive)?;

    println!("  sha256: {hash}");
    println!("Pack written: {} ({} bytes)", path.display(), archive.len());
    Ok(())
}
