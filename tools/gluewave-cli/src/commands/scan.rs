//! Scan a video for its provenance payload.

use std::path::PathBuf;

use gluewave_provenance::scan::{ProvenanceScanner, VideoScanner, SAMPLE_TIMESTAMPS};

pub async fn run(video: PathBuf) -> anyhow::Result<()> {
    let bytes = std::fs::read(&video)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", video.display()))?;
    println!("Scanning {} ({} bytes)", video.display(), bytes.len());

    match VideoScanner.scan(&bytes).await? {
        Some(scanned) => {
            println!("Found at {:.2}s:", scanned.found_at_secs);
            println!("{}", serde_json::to_string_pretty(&scanned.payload)?);
        }
        None => {
            println!(
                "Not a provenance-bearing file (no Gluewave QR in up to {} sampled frames)",
                SAMPLE_TIMESTAMPS.len()
            );
        }
    }

    Ok(())
}
