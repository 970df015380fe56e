//! Record a bounded take.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gluewave_capture_engine::encoder::FfmpegEncoder;
use gluewave_capture_engine::{PendingRecording, RecordingSession, SaveTarget, StudioContext};
use gluewave_common::clock::SystemTimeSource;
use gluewave_common::config::AppConfig;
use gluewave_mixer::audio_graph::{GainStage, SoftwareMixer};
use gluewave_mixer::clip::{is_still_image, ClipOptions, ClipTrack};
use gluewave_mixer::track::{MediaTrack, StillTrack};

const BIG_TONE_HZ: f64 = 220.0;
const SMALL_TONE_HZ: f64 = 330.0;

pub struct RecordArgs {
    pub big: PathBuf,
    pub small: Option<PathBuf>,
    pub big_loop: f64,
    pub small_loop: f64,
    pub seconds: Option<u64>,
    pub glue: bool,
    pub big_gain: f64,
    pub small_gain: f64,
    pub master_gain: f64,
    pub output: Option<PathBuf>,
    pub discard: bool,
}

pub async fn run(config: AppConfig, args: RecordArgs) -> anyhow::Result<()> {
    let mut ctx = StudioContext::new(&config, Box::new(SoftwareMixer::default()));

    // Gains set before the graph exists go straight into track volume.
    ctx.set_gain(GainStage::Big, args.big_gain);
    ctx.set_gain(GainStage::Small, args.small_gain);
    ctx.set_gain(GainStage::Master, args.master_gain);

    ctx.load_big(open_source(&args.big, args.big_loop, BIG_TONE_HZ)?);
    if let Some(ref small) = args.small {
        ctx.load_small(open_source(small, args.small_loop, SMALL_TONE_HZ)?);
    }
    ctx.play();

    if args.glue {
        if ctx.toggle_glue() {
            println!("Glue on (offset {:+.2}s)", ctx.glue().offset_secs());
        } else {
            println!("Glue needs a SMALL source; recording unglued");
        }
    }

    let mut defaults = config.recording.clone();
    if let Some(seconds) = args.seconds {
        defaults.max_duration_secs = seconds.clamp(1, defaults.max_duration_secs);
    }
    let output_dir = args.output.unwrap_or_else(|| defaults.output_dir.clone());

    let mut session = RecordingSession::new(
        defaults,
        Box::new(FfmpegEncoder::new()),
        Arc::new(SystemTimeSource),
    );

    if !session.start(&mut ctx).await? {
        anyhow::bail!("Studio not ready: BIG or the audio graph is missing");
    }
    if let Some(payload) = session.payload() {
        println!("Recording {} ({})", payload.id, payload.created_at);
    }
    println!("Press Ctrl+C to stop early...");

    let stop = session.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let mut countdown = session.countdown();
    let ticker = tokio::spawn(async move {
        while countdown.changed().await.is_ok() {
            let remaining = *countdown.borrow_and_update();
            print!("\r  {remaining:>3}s left  ");
            if remaining == 0 {
                break;
            }
        }
    });

    let result = session.run(&mut ctx).await;
    ctrl_c.abort();
    ticker.abort();
    ctx.teardown();
    let result = result?;

    println!();
    println!(
        "Take {}: {:.1}s, {} frames, {} bytes ({:?})",
        result.payload.id,
        result.duration_secs,
        result.frames,
        result.deliverable.len(),
        result.stop_reason
    );

    let pending = PendingRecording::new(result);
    if args.discard {
        pending.discard();
        println!("Discarded");
        return Ok(());
    }

    let qr_png = pending.result().qr_png.clone();
    let id = pending.result().payload.id.clone();
    let path = pending.save(&SaveTarget::new(&output_dir))?;
    println!("Saved to: {}", path.display());

    if let Some(png) = qr_png {
        let qr_path = output_dir.join(format!("{id}.qr.png"));
        std::fs::write(&qr_path, png)?;
        println!("QR: {}", qr_path.display());
    }

    Ok(())
}

/// Stills loop for `loop_secs` over a tone; anything else is decoded as a
/// clip and loops at its own length.
fn open_source(path: &Path, loop_secs: f64, tone_hz: f64) -> anyhow::Result<Box<dyn MediaTrack>> {
    if is_still_image(path) {
        return Ok(Box::new(StillTrack::open(path, loop_secs)?.with_tone(tone_hz)));
    }
    let clip = ClipTrack::open(path, &ClipOptions::default())?;
    println!(
        "Decoded {} ({} frames, {:.1}s loop)",
        path.display(),
        clip.frame_count(),
        clip.duration()
    );
    Ok(Box::new(clip))
}
