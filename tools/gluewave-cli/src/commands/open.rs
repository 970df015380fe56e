//! Open mint packs and list them newest first.

use std::path::PathBuf;

use gluewave_provenance::pack::{open_packs, Preview};

pub fn run(packs: Vec<PathBuf>, extract: Option<PathBuf>) -> anyhow::Result<()> {
    let mut items = Vec::with_capacity(packs.len());
    for path in &packs {
        let name = path.display().to_string();
        match std::fs::read(path) {
            Ok(bytes) => items.push((name, bytes)),
            Err(e) => tracing::warn!(file = %name, error = %e, "Skipping unreadable pack"),
        }
    }

    let opened = open_packs(items);
    println!("Opened {} of {} pack(s)", opened.len(), packs.len());

    if let Some(ref dir) = extract {
        std::fs::create_dir_all(dir)?;
    }

    for pack in &opened {
        let summary = pack.summary();
        println!();
        println!("{}", summary.id);
        println!("  File: {}", summary.file_name);
        println!("  Created: {}", summary.created_at);
        println!("  Mood: {}", summary.mood);
        if let Some(ref intention) = summary.intention {
            println!("  Intention: {intention}");
        }
        println!("  Duration: {}s", summary.duration_secs);
        if let Some(volumes) = pack.pack.meta.volumes {
            println!(
                "  Volumes: big {:.2}, small {:.2}, master {:.2}",
                volumes.big, volumes.small, volumes.master
            );
        }
        println!("  sha256: {}", pack.pack.meta.source.content_hash_hex);

        match (summary.preview, &pack.pack.video, &extract) {
            (Preview::Unavailable, _, _) => println!("  No preview available"),
            (Preview::Available, Some(video), Some(dir)) => {
                let path = dir.join(&pack.pack.meta.source.file_name);
                std::fs::write(&path, video)?;
                println!("  Video: {}", path.display());
            }
            (Preview::Available, _, _) => println!("  Preview available"),
        }
    }

    Ok(())
}
