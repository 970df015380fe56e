use std::sync::Arc;

use gluewave_capture_engine::encoder::MemoryEncoder;
use gluewave_capture_engine::{
    PendingRecording, RecordingSession, SaveTarget, StopReason, StudioContext,
};
use gluewave_common::clock::FixedTimeSource;
use gluewave_common::config::{AppConfig, RecordingDefaults};
use gluewave_mixer::audio_graph::{GainStage, SoftwareMixer};
use gluewave_mixer::track::{StillTrack, TrackRole};
use image::{Rgba, RgbaImage};

fn studio() -> StudioContext {
    let mut ctx = StudioContext::new(&AppConfig::default(), Box::new(SoftwareMixer::default()));
    ctx.load_big(Box::new(
        StillTrack::new("big", RgbaImage::from_pixel(160, 90, Rgba([20, 40, 80, 255])), 7.0)
            .with_tone(220.0),
    ));
    ctx.load_small(Box::new(
        StillTrack::new("small", RgbaImage::from_pixel(64, 36, Rgba([200, 80, 40, 255])), 3.0)
            .with_tone(330.0),
    ));
    ctx.set_gain(GainStage::Master, 0.4);
    ctx.play();
    ctx
}

fn session(defaults: RecordingDefaults) -> RecordingSession {
    RecordingSession::new(
        defaults,
        Box::new(MemoryEncoder::new()),
        Arc::new(FixedTimeSource::new("2024-01-01T00:00:00.000Z", "123")),
    )
}

#[tokio::test(start_paused = true)]
async fn unattended_take_ends_at_ceiling() {
    let defaults = RecordingDefaults {
        fps: 10,
        ..RecordingDefaults::default()
    };
    assert_eq!(defaults.max_duration_secs, 100);

    let mut ctx = studio();
    let mut session = session(defaults);
    assert!(session.start(&mut ctx).await.unwrap());
    assert!(ctx.is_recording());

    let result = session.run(&mut ctx).await.unwrap();

    assert_ne!(result.stop_reason, StopReason::Stopped);
    assert!(result.duration_secs <= 100.0);
    assert!(result.frames > 0 && result.frames <= 1001);
    // One 8-byte chunk per encoded frame, in order.
    assert_eq!(result.deliverable.len() as u64, result.frames * 8);
    assert_eq!(&result.deliverable[8..16], &1u64.to_le_bytes());

    assert_eq!(result.payload.id, "gw-123");
    assert!((result.payload.volumes.master - 0.4).abs() < 1e-9);
    assert!(!ctx.is_recording());
    assert!(!ctx.track(TrackRole::Big).unwrap().is_playing());
    assert!(!ctx.track(TrackRole::Small).unwrap().is_playing());
}

#[tokio::test(start_paused = true)]
async fn external_stop_wins_before_ceiling() {
    let mut ctx = studio();
    let mut session = session(RecordingDefaults {
        fps: 10,
        ..RecordingDefaults::default()
    });
    assert!(session.start(&mut ctx).await.unwrap());

    let handle = session.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        handle.stop();
    });

    let result = session.run(&mut ctx).await.unwrap();
    assert_eq!(result.stop_reason, StopReason::Stopped);
    assert!(result.duration_secs >= 5.0 && result.duration_secs < 6.0);

    // A later stop is a no-op.
    assert!(session.stop(&mut ctx).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn missing_dimensions_fall_back_after_wait() {
    let mut ctx = StudioContext::new(&AppConfig::default(), Box::new(SoftwareMixer::default()));
    ctx.load_big(Box::new(StillTrack::new("blank", RgbaImage::new(0, 0), 2.0)));
    ctx.play();

    let mut session = session(RecordingDefaults {
        max_duration_secs: 1,
        fps: 2,
        ..RecordingDefaults::default()
    });
    let before = tokio::time::Instant::now();
    assert!(session.start(&mut ctx).await.unwrap());
    assert!(before.elapsed() >= std::time::Duration::from_millis(2500));
    assert_eq!(ctx.compositor().surface().unwrap().dimensions(), (1280, 720));

    let result = session.run(&mut ctx).await.unwrap();
    assert!(result.duration_secs <= 1.0);
}

#[tokio::test(start_paused = true)]
async fn saved_take_is_named_after_payload() {
    let mut ctx = studio();
    let mut session = session(RecordingDefaults {
        max_duration_secs: 2,
        fps: 5,
        ..RecordingDefaults::default()
    });
    assert!(session.start(&mut ctx).await.unwrap());
    let result = session.run(&mut ctx).await.unwrap();
    let bytes = result.deliverable.clone();

    let dir = tempfile::tempdir().unwrap();
    let path = PendingRecording::new(result)
        .save(&SaveTarget::new(dir.path()))
        .unwrap();
    assert_eq!(path.file_name().unwrap(), "gw-123.webm");
    assert_eq!(std::fs::read(&path).unwrap(), bytes);

    // A second take on the same session can be discarded.
    ctx.play();
    assert!(session.start(&mut ctx).await.unwrap());
    let second = session.run(&mut ctx).await.unwrap();
    PendingRecording::new(second).discard();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
