//! Check encoder capabilities.

use gluewave_capture_engine::encoder::{command_exists, select_profile, FfmpegEncoder};

pub fn run() -> anyhow::Result<()> {
    println!("Gluewave System Check");
    println!("{}", "=".repeat(50));

    for tool in ["ffmpeg", "ffprobe"] {
        if command_exists(tool) {
            println!("[OK] {tool}");
        } else {
            println!("[MISSING] {tool}");
        }
    }

    let mut encoder = FfmpegEncoder::new();
    println!();
    println!("Encoding profiles (in preference order):");
    for (profile, supported) in encoder.probe() {
        let mark = if supported { "OK" } else { "--" };
        println!("  [{mark}] {:<16} {}", profile.name, profile.mime);
    }

    println!();
    match select_profile(&mut encoder) {
        Ok(profile) => println!("Recording will use: {} (.{})", profile.name, profile.extension),
        Err(e) => println!("Recording unavailable: {e}"),
    }

    if !command_exists("ffprobe") {
        println!("Without ffprobe, scans sample every timestamp and mints record a 0s duration.");
    }

    Ok(())
}
