//! Studio context: the singleton resources of one studio session.
//!
//! Owns the BIG and SMALL slots, the glue synchronizer, the audio graph and
//! the compositor surface. Everything that needs two of them at once goes
//! through here so borrows stay in one place.

use gluewave_common::config::AppConfig;
use gluewave_mixer::audio_graph::{AudioBackend, AudioGraph, GainStage, Gains};
use gluewave_mixer::glue::{GlueCorrection, GlueSynchronizer};
use gluewave_mixer::track::{MediaTrack, TrackRole, TrackSlot};
use gluewave_render_engine::live::LiveCompositor;
use image::RgbaImage;

pub struct StudioContext {
    big: TrackSlot,
    small: TrackSlot,
    glue: GlueSynchronizer,
    audio: AudioGraph,
    compositor: LiveCompositor,
    recording: bool,
}

impl StudioContext {
    pub fn new(config: &AppConfig, backend: Box<dyn AudioBackend>) -> Self {
        Self {
            big: TrackSlot::new(TrackRole::Big),
            small: TrackSlot::new(TrackRole::Small),
            glue: GlueSynchronizer::new(config.glue),
            audio: AudioGraph::new(backend),
            compositor: LiveCompositor::new(config.overlay.clone()),
            recording: false,
        }
    }

    /// Load BIG, releasing the previous source.
    pub fn load_big(&mut self, track: Box<dyn MediaTrack>) {
        self.big.replace(track);
        self.glue.reset_reports();
        if let Some(big) = self.big.get_mut() {
            if self.audio.is_ready() {
                big.set_volume(1.0);
            }
        }
        self.audio
            .apply_direct(self.big.get_mut().map(|t| t as _), None);
    }

    /// Load SMALL, releasing the previous source.
    pub fn load_small(&mut self, track: Box<dyn MediaTrack>) {
        self.small.replace(track);
        self.glue.reset_reports();
        if self.audio.is_ready() {
            self.audio
                .ensure_secondary_connected(self.small.get_mut().map(|t| t as _));
            // A fresh source behind an existing SMALL node still plays at full volume.
            if let Some(small) = self.small.get_mut() {
                small.set_volume(1.0);
            }
        } else {
            self.audio
                .apply_direct(None, self.small.get_mut().map(|t| t as _));
        }
    }

    pub fn track(&self, role: TrackRole) -> Option<&dyn MediaTrack> {
        match role {
            TrackRole::Big => self.big.get(),
            TrackRole::Small => self.small.get(),
        }
    }

    pub fn track_mut(&mut self, role: TrackRole) -> Option<&mut (dyn MediaTrack + 'static)> {
        match role {
            TrackRole::Big => self.big.get_mut(),
            TrackRole::Small => self.small.get_mut(),
        }
    }

    /// Build the audio graph and route whatever is loaded through it.
    pub fn ensure_audio(&mut self) -> bool {
        if !self.audio.ensure_graph(self.big.get_mut().map(|t| t as _)) {
            return false;
        }
        self.audio
            .ensure_secondary_connected(self.small.get_mut().map(|t| t as _));
        true
    }

    pub fn audio_ready(&self) -> bool {
        self.audio.is_ready()
    }

    /// Start both tracks. The first play is the moment the graph is built.
    pub fn play(&mut self) {
        self.ensure_audio();
        for slot in [&mut self.big, &mut self.small] {
            if let Some(track) = slot.get_mut() {
                track.play();
            }
        }
    }

    pub fn pause(&mut self) {
        for slot in [&mut self.big, &mut self.small] {
            if let Some(track) = slot.get_mut() {
                track.pause();
            }
        }
    }

    pub fn set_gain(&mut self, stage: GainStage, value: f64) {
        self.audio.set_gain(
            stage,
            value,
            self.big.get_mut().map(|t| t as _),
            self.small.get_mut().map(|t| t as _),
        );
    }

    pub fn gains(&self) -> Gains {
        self.audio.gains()
    }

    pub fn toggle_glue(&mut self) -> bool {
        let Some(big) = self.big.get() else {
            return self.glue.is_enabled();
        };
        self.glue.toggle(big, self.small.get())
    }

    pub fn glue(&self) -> &GlueSynchronizer {
        &self.glue
    }

    /// Scrub BIG to `fraction` of its duration.
    pub fn seek_big(&mut self, fraction: f64) -> Option<GlueCorrection> {
        let big = self.big.get_mut()?;
        self.glue
            .on_big_seek(fraction, big, self.small.get_mut().map(|t| t as _))
    }

    /// Scrub SMALL to `fraction` of its duration.
    pub fn seek_small(&mut self, fraction: f64) -> Option<GlueCorrection> {
        let small = self.small.get_mut()?;
        let big = self.big.get_mut()?;
        self.glue.on_small_seek(fraction, small, big)
    }

    /// Advance the host clock and deliver the resulting position reports.
    pub fn advance(&mut self, dt_secs: f64) -> Vec<GlueCorrection> {
        let mut corrections = Vec::new();
        for slot in [&mut self.big, &mut self.small] {
            if let Some(track) = slot.get_mut() {
                track.advance(dt_secs);
            }
        }

        let Some(big) = self.big.get_mut() else {
            return corrections;
        };
        corrections.extend(self.glue.on_big_time_update(
            &mut *big,
            self.small.get_mut().map(|t| t as _),
            self.recording,
        ));
        if let Some(small) = self.small.get_mut() {
            corrections.extend(self.glue.on_small_time_update(small, big, self.recording));
        }
        corrections
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn audio_mut(&mut self) -> &mut AudioGraph {
        &mut self.audio
    }

    /// Run `frames` sample frames from both tracks through the graph.
    pub fn pump_audio(&mut self, frames: usize) -> Vec<f32> {
        self.audio.pump(
            frames,
            self.big.get_mut().map(|t| t as _),
            self.small.get_mut().map(|t| t as _),
        )
    }

    pub fn compositor(&self) -> &LiveCompositor {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut LiveCompositor {
        &mut self.compositor
    }

    pub fn render_frame(&mut self) -> Option<&RgbaImage> {
        self.compositor.render_frame(self.big.get(), self.small.get())
    }

    /// Release both sources.
    pub fn teardown(&mut self) {
        self.big.clear();
        self.small.clear();
        self.glue.reset_reports();
        self.recording = false;
    }
}

impl std::fmt::Debug for StudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudioContext")
            .field("big", &self.big)
            .field("small", &self.small)
            .field("glue", &self.glue)
            .field("audio", &self.audio)
            .field("recording", &self.recording)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gluewave_mixer::audio_graph::{SoftwareMixer, VolumeRouting};
    use gluewave_mixer::track::StillTrack;

    fn still(duration: f64) -> Box<dyn MediaTrack> {
        Box::new(StillTrack::new(
            "still",
            RgbaImage::from_pixel(64, 36, image::Rgba([9, 9, 9, 255])),
            duration,
        ))
    }

    fn context() -> StudioContext {
        StudioContext::new(&AppConfig::default(), Box::new(SoftwareMixer::default()))
    }

    #[test]
    fn pre_graph_gains_reach_late_loaded_tracks() {
        let mut ctx = context();
        ctx.set_gain(GainStage::Small, 0.5);
        ctx.set_gain(GainStage::Master, 0.5);
        ctx.load_big(still(4.0));
        ctx.load_small(still(2.0));

        assert!((ctx.track(TrackRole::Big).unwrap().volume() - 0.5).abs() < 1e-9);
        assert!((ctx.track(TrackRole::Small).unwrap().volume() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn play_builds_graph_and_pins_volumes() {
        let mut ctx = context();
        ctx.set_gain(GainStage::Master, 0.5);
        ctx.load_big(still(4.0));
        ctx.load_small(still(2.0));
        ctx.play();

        assert!(ctx.audio_ready());
        assert_eq!(
            ctx.audio_mut().routing(),
            VolumeRouting::Routed {
                secondary_connected: true
            }
        );
        assert_eq!(ctx.track(TrackRole::Big).unwrap().volume(), 1.0);
        assert_eq!(ctx.track(TrackRole::Small).unwrap().volume(), 1.0);

        // Replacing SMALL after routing keeps it at full volume.
        ctx.load_small(still(3.0));
        assert_eq!(ctx.track(TrackRole::Small).unwrap().volume(), 1.0);
    }

    #[test]
    fn glue_needs_small() {
        let mut ctx = context();
        ctx.load_big(still(4.0));
        assert!(!ctx.toggle_glue());
        ctx.load_small(still(2.0));
        assert!(ctx.toggle_glue());
    }

    #[test]
    fn advance_resyncs_on_big_wrap() {
        let mut ctx = context();
        ctx.load_big(still(4.0));
        ctx.load_small(still(3.0));
        ctx.play();
        ctx.seek_small(0.5);
        assert!(ctx.toggle_glue());

        let mut corrected = false;
        for _ in 0..200 {
            corrected |= !ctx.advance(0.05).is_empty();
        }
        assert!(corrected);
    }

    #[test]
    fn recording_suppresses_glue() {
        let mut ctx = context();
        ctx.load_big(still(1.0));
        ctx.load_small(still(3.0));
        ctx.play();
        ctx.toggle_glue();
        ctx.set_recording(true);
        for _ in 0..100 {
            assert!(ctx.advance(0.05).is_empty());
        }
    }

    #[test]
    fn teardown_releases_both_slots() {
        let mut ctx = context();
        ctx.load_big(still(1.0));
        ctx.load_small(still(1.0));
        ctx.teardown();
        assert!(ctx.track(TrackRole::Big).is_none());
        assert!(ctx.track(TrackRole::Small).is_none());
    }
}
