//! Media track wrapper.
//!
//! A [`MediaTrack`] is the thin state kept around one playable source. The
//! studio owns two of them, one per [`TrackRole`], each behind a
//! [`TrackSlot`] that holds at most one live source at a time.

use std::f64::consts::TAU;
use std::path::Path;

use gluewave_common::error::{GluewaveError, GluewaveResult};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::glue::wrap_position;

/// Which slot a track plays in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackRole {
    /// Background track; its video fills the recorded frame.
    Big,
    /// Secondary track; drawn picture-in-picture.
    Small,
}

impl std::fmt::Display for TrackRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Big => write!(f, "BIG"),
            Self::Small => write!(f, "SMALL"),
        }
    }
}

/// A playable, looping media source.
pub trait MediaTrack: Send {
    /// Where the source came from; display only.
    fn source(&self) -> &str;

    /// Playback position in seconds.
    fn current_time(&self) -> f64;

    /// Source duration in seconds. May be zero or non-finite while unknown.
    fn duration(&self) -> f64;

    fn is_playing(&self) -> bool;

    fn play(&mut self);

    fn pause(&mut self);

    /// Jump to `secs`. Implementations clamp into the playable range.
    fn seek(&mut self, secs: f64);

    /// Native output volume in `[0.0, 1.0]`.
    fn volume(&self) -> f64;

    fn set_volume(&mut self, volume: f64);

    /// Native frame size, once known.
    fn video_dimensions(&self) -> Option<(u32, u32)>;

    /// The frame at the current position.
    fn current_frame(&self) -> Option<&RgbaImage>;

    /// Fill `out` with interleaved samples at native volume. Returns the
    /// number of samples written; the rest of `out` is left untouched.
    fn read_audio(&mut self, _sample_rate: u32, _channels: u16, _out: &mut [f32]) -> usize {
        0
    }

    /// Advance the host clock by `dt_secs`. Sources that run on their own
    /// clock ignore it.
    fn advance(&mut self, _dt_secs: f64) {}

    /// Release the underlying source handle. Called exactly once, when the
    /// track leaves its slot.
    fn release(&mut self);
}

/// Holds at most one live track for a role.
pub struct TrackSlot {
    role: TrackRole,
    track: Option<Box<dyn MediaTrack>>,
}

impl TrackSlot {
    pub fn new(role: TrackRole) -> Self {
        Self { role, track: None }
    }

    pub fn role(&self) -> TrackRole {
        self.role
    }

    pub fn is_loaded(&self) -> bool {
        self.track.is_some()
    }

    pub fn get(&self) -> Option<&dyn MediaTrack> {
        self.track.as_deref()
    }

    pub fn get_mut(&mut self) -> Option<&mut (dyn MediaTrack + 'static)> {
        self.track.as_deref_mut()
    }

    /// Load a new source, releasing the previous one first.
    pub fn replace(&mut self, track: Box<dyn MediaTrack>) {
        self.clear();
        tracing::info!(role = %self.role, source = %track.source(), "Track loaded");
        self.track = Some(track);
    }

    /// Release and drop the current source, if any.
    pub fn clear(&mut self) {
        if let Some(mut old) = self.track.take() {
            tracing::debug!(role = %self.role, source = %old.source(), "Releasing track");
            old.pause();
            old.release();
        }
    }
}

impl Drop for TrackSlot {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for TrackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackSlot")
            .field("role", &self.role)
            .field("source", &self.track.as_ref().map(|t| t.source().to_string()))
            .finish()
    }
}

/// A looping track backed by a still image and a virtual duration.
///
/// Position advances only through [`MediaTrack::advance`] and loops at the
/// end, which makes it a deterministic stand-in for a looping video.
#[derive(Debug, Clone)]
pub struct StillTrack {
    source: String,
    frame: RgbaImage,
    duration: f64,
    position: f64,
    playing: bool,
    volume: f64,
    tone_hz: Option<f64>,
    phase: f64,
    released: bool,
}

impl StillTrack {
    pub fn new(source: impl Into<String>, frame: RgbaImage, duration_secs: f64) -> Self {
        Self {
            source: source.into(),
            frame,
            duration: duration_secs,
            position: 0.0,
            playing: false,
            volume: 1.0,
            tone_hz: None,
            phase: 0.0,
            released: false,
        }
    }

    /// Load the still frame from an image file.
    pub fn open(path: impl AsRef<Path>, duration_secs: f64) -> GluewaveResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GluewaveError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let frame = image::open(path)
            .map_err(|e| GluewaveError::render(format!("Cannot decode {}: {e}", path.display())))?
            .to_rgba8();
        Ok(Self::new(path.display().to_string(), frame, duration_secs))
    }

    /// Emit a sine tone at `hz` as this track's audio.
    pub fn with_tone(mut self, hz: f64) -> Self {
        self.tone_hz = Some(hz);
        self
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl MediaTrack for StillTrack {
    fn source(&self) -> &str {
        &self.source
    }

    fn current_time(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn is_playing(&self) -> bool {
        self.playing && !self.released
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek(&mut self, secs: f64) {
        self.position = if self.duration.is_finite() && self.duration > 0.0 {
            secs.clamp(0.0, self.duration)
        } else {
            0.0
        };
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn video_dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.frame.dimensions();
        (w > 0 && h > 0).then_some((w, h))
    }

    fn current_frame(&self) -> Option<&RgbaImage> {
        (!self.released).then_some(&self.frame)
    }

    fn read_audio(&mut self, sample_rate: u32, channels: u16, out: &mut [f32]) -> usize {
        let Some(hz) = self.tone_hz else {
            return 0;
        };
        if !self.is_playing() || sample_rate == 0 || channels == 0 {
            return 0;
        }

        let step = TAU * hz / sample_rate as f64;
        let amplitude = 0.25 * self.volume;
        for frame in out.chunks_mut(channels as usize) {
            let sample = (self.phase.sin() * amplitude) as f32;
            frame.fill(sample);
            self.phase = (self.phase + step) % TAU;
        }
        out.len()
    }

    fn advance(&mut self, dt_secs: f64) {
        if self.is_playing() && dt_secs.is_finite() && dt_secs > 0.0 {
            self.position = wrap_position(self.position + dt_secs, self.duration);
        }
    }

    fn release(&mut self) {
        self.released = true;
        self.playing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn still(duration: f64) -> StillTrack {
        StillTrack::new("test", RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 255])), duration)
    }

    #[test]
    fn advance_loops_at_duration() {
        let mut track = still(2.0);
        track.play();
        track.advance(1.5);
        track.advance(1.0);
        assert!((track.current_time() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn paused_track_does_not_advance() {
        let mut track = still(2.0);
        track.advance(1.0);
        assert_eq!(track.current_time(), 0.0);
    }

    #[test]
    fn seek_clamps_and_handles_unknown_duration() {
        let mut track = still(3.0);
        track.seek(10.0);
        assert_eq!(track.current_time(), 3.0);

        let mut unknown = still(f64::NAN);
        unknown.seek(1.0);
        assert_eq!(unknown.current_time(), 0.0);
    }

    #[test]
    fn tone_scales_with_native_volume() {
        let mut track = still(1.0).with_tone(440.0);
        track.play();
        let mut loud = vec![0.0f32; 256];
        track.read_audio(48_000, 2, &mut loud);

        let mut quiet_track = still(1.0).with_tone(440.0);
        quiet_track.play();
        quiet_track.set_volume(0.5);
        let mut quiet = vec![0.0f32; 256];
        quiet_track.read_audio(48_000, 2, &mut quiet);

        let peak = |buf: &[f32]| buf.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak(&loud) > 0.0);
        assert!((peak(&quiet) - peak(&loud) * 0.5).abs() < 1e-3);
        // Interleaved channels carry the same sample.
        assert_eq!(loud[2], loud[3]);
    }

    #[test]
    fn replacing_a_slot_releases_the_old_track() {
        struct Probe(std::sync::Arc<std::sync::atomic::AtomicUsize>, StillTrack);
        impl MediaTrack for Probe {
            fn source(&self) -> &str {
                self.1.source()
            }
            fn current_time(&self) -> f64 {
                self.1.current_time()
            }
            fn duration(&self) -> f64 {
                self.1.duration()
            }
            fn is_playing(&self) -> bool {
                self.1.is_playing()
            }
            fn play(&mut self) {
                self.1.play()
            }
            fn pause(&mut self) {
                self.1.pause()
            }
            fn seek(&mut self, secs: f64) {
                self.1.seek(secs)
            }
            fn volume(&self) -> f64 {
                self.1.volume()
            }
            fn set_volume(&mut self, volume: f64) {
                self.1.set_volume(volume)
            }
            fn video_dimensions(&self) -> Option<(u32, u32)> {
                self.1.video_dimensions()
            }
            fn current_frame(&self) -> Option<&RgbaImage> {
                self.1.current_frame()
            }
            fn release(&mut self) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let released = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut slot = TrackSlot::new(TrackRole::Small);
        slot.replace(Box::new(Probe(released.clone(), still(1.0))));
        slot.replace(Box::new(Probe(released.clone(), still(2.0))));
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(slot.get().map(|t| t.duration()), Some(2.0));

        drop(slot);
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
