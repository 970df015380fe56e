//! Loop-aware glue between the BIG and SMALL tracks.
//!
//! When glue is enabled the synchronizer captures
//! `offset = SMALL.time - BIG.time` and keeps
//! `wrap(BIG.time + offset, SMALL.duration) ≈ SMALL.time` while both tracks
//! loop independently. A loop wrap is detected as a backward jump larger
//! than a threshold between two consecutive position reports of one track.

use gluewave_common::config::GlueConfig;

use crate::track::{MediaTrack, TrackRole};

/// Map `secs` into `[0, duration)`.
///
/// Zero or non-finite durations (and non-finite positions) map to 0.
pub fn wrap_position(secs: f64, duration: f64) -> f64 {
    if !duration.is_finite() || duration <= 0.0 || !secs.is_finite() {
        return 0.0;
    }
    let wrapped = secs.rem_euclid(duration);
    // rem_euclid can round up to `duration` for tiny negative inputs.
    if wrapped >= duration {
        0.0
    } else {
        wrapped
    }
}

/// Time played across a loop wrap, or `None` when `prev -> curr` is not a
/// wrap.
///
/// A wrap is a backward jump of more than `threshold` seconds on a track
/// with a usable duration. The returned delta is
/// `(duration - prev) + curr`.
pub fn detect_wrap(prev: f64, curr: f64, duration: f64, threshold: f64) -> Option<f64> {
    if !duration.is_finite() || duration <= 0.0 || !prev.is_finite() || !curr.is_finite() {
        return None;
    }
    (prev - curr > threshold).then(|| (duration - prev) + curr)
}

/// A position written to one track by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlueCorrection {
    pub target: TrackRole,
    pub position: f64,
}

/// Keeps SMALL locked to BIG at a captured offset.
#[derive(Debug, Clone)]
pub struct GlueSynchronizer {
    config: GlueConfig,
    enabled: bool,
    offset_secs: f64,
    prev_big: Option<f64>,
    prev_small: Option<f64>,
    /// BIG's position at SMALL's previous report.
    big_at_small_report: Option<f64>,
}

impl GlueSynchronizer {
    pub fn new(config: GlueConfig) -> Self {
        Self {
            config,
            enabled: false,
            offset_secs: 0.0,
            prev_big: None,
            prev_small: None,
            big_at_small_report: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `SMALL.time - BIG.time` at the moment glue was last enabled.
    pub fn offset_secs(&self) -> f64 {
        self.offset_secs
    }

    /// Flip glue on or off. Turning it on recaptures the offset from the
    /// current positions. No-op while SMALL has no source.
    pub fn toggle(&mut self, big: &dyn MediaTrack, small: Option<&dyn MediaTrack>) -> bool {
        let Some(small) = small else {
            tracing::debug!("Glue toggle ignored: SMALL not loaded");
            return self.enabled;
        };

        self.enabled = !self.enabled;
        if self.enabled {
            self.offset_secs = small.current_time() - big.current_time();
            tracing::info!(offset_secs = self.offset_secs, "Glue enabled");
        } else {
            tracing::info!("Glue disabled");
        }
        self.enabled
    }

    /// Forget previous position reports, e.g. after a source is replaced.
    pub fn reset_reports(&mut self) {
        self.prev_big = None;
        self.prev_small = None;
        self.big_at_small_report = None;
    }

    fn should_sync(&self, big: &dyn MediaTrack, small: &dyn MediaTrack, recording: bool) -> bool {
        self.enabled && !recording && big.is_playing() && small.is_playing()
    }

    /// Handle a native position report from BIG.
    ///
    /// On a BIG loop wrap, SMALL is re-derived from BIG and the captured
    /// offset rather than advanced by the wrap delta, so drift accumulated
    /// over the loop is dropped too. The delta is only logged.
    pub fn on_big_time_update(
        &mut self,
        big: &mut dyn MediaTrack,
        small: Option<&mut dyn MediaTrack>,
        recording: bool,
    ) -> Option<GlueCorrection> {
        let curr = big.current_time();
        let prev = self.prev_big.replace(curr);

        let small = small?;
        if !self.should_sync(big, small, recording) {
            return None;
        }
        let delta = detect_wrap(prev?, curr, big.duration(), self.config.wrap_threshold_secs)?;

        let position = wrap_position(curr + self.offset_secs, small.duration());
        small.seek(position);
        // Recording the written position keeps SMALL's next report from
        // reading our own seek as a wrap.
        self.prev_small = Some(position);
        self.big_at_small_report = Some(curr);

        tracing::debug!(delta, position, "BIG wrapped, re-syncing SMALL");
        Some(GlueCorrection {
            target: TrackRole::Small,
            position,
        })
    }

    /// Handle a native position report from SMALL.
    ///
    /// On a SMALL loop wrap, BIG is advanced by the time SMALL played across
    /// the wrap, measured from where BIG stood at SMALL's previous report.
    pub fn on_small_time_update(
        &mut self,
        small: &mut dyn MediaTrack,
        big: &mut dyn MediaTrack,
        recording: bool,
    ) -> Option<GlueCorrection> {
        let curr = small.current_time();
        let prev = self.prev_small.replace(curr);
        let anchor = self.big_at_small_report.replace(big.current_time());

        if !self.should_sync(big, small, recording) {
            return None;
        }
        let delta = detect_wrap(prev?, curr, small.duration(), self.config.wrap_threshold_secs)?;
        let anchor = anchor?;

        let position = wrap_position(anchor + delta, big.duration());
        big.seek(position);
        self.prev_big = Some(position);
        self.big_at_small_report = Some(position);

        tracing::debug!(delta, position, "SMALL wrapped, re-syncing BIG");
        Some(GlueCorrection {
            target: TrackRole::Big,
            position,
        })
    }

    /// Manual scrub of BIG to `fraction` of its duration. While glued, SMALL
    /// follows at `+offset`. The offset itself is never recomputed here.
    pub fn on_big_seek(
        &mut self,
        fraction: f64,
        big: &mut dyn MediaTrack,
        small: Option<&mut dyn MediaTrack>,
    ) -> Option<GlueCorrection> {
        let scrubbed = scrub(big, fraction);
        self.prev_big = Some(scrubbed);

        let small = small.filter(|_| self.enabled)?;
        let position = wrap_position(scrubbed + self.offset_secs, small.duration());
        small.seek(position);
        self.prev_small = Some(position);
        self.big_at_small_report = Some(scrubbed);
        Some(GlueCorrection {
            target: TrackRole::Small,
            position,
        })
    }

    /// Manual scrub of SMALL to `fraction` of its duration. While glued, BIG
    /// follows at `-offset`.
    pub fn on_small_seek(
        &mut self,
        fraction: f64,
        small: &mut dyn MediaTrack,
        big: &mut dyn MediaTrack,
    ) -> Option<GlueCorrection> {
        let scrubbed = scrub(small, fraction);
        self.prev_small = Some(scrubbed);
        self.big_at_small_report = Some(big.current_time());

        if !self.enabled {
            return None;
        }
        let position = wrap_position(scrubbed - self.offset_secs, big.duration());
        big.seek(position);
        self.prev_big = Some(position);
        self.big_at_small_report = Some(position);
        Some(GlueCorrection {
            target: TrackRole::Big,
            position,
        })
    }
}

fn scrub(track: &mut dyn MediaTrack, fraction: f64) -> f64 {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let duration = track.duration();
    let target = if duration.is_finite() && duration > 0.0 {
        fraction * duration
    } else {
        0.0
    };
    track.seek(target);
    track.current_time()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::StillTrack;
    use image::RgbaImage;
    use proptest::prelude::*;

    const EPS: f64 = 1e-6;

    fn track(duration: f64, at: f64) -> StillTrack {
        let mut t = StillTrack::new("t", RgbaImage::new(2, 2), duration);
        t.seek(at);
        t.play();
        t
    }

    fn glue() -> GlueSynchronizer {
        GlueSynchronizer::new(GlueConfig::default())
    }

    /// Distance on a circle of circumference `duration`.
    fn circular_gap(a: f64, b: f64, duration: f64) -> f64 {
        let d = (a - b).rem_euclid(duration);
        d.min(duration - d)
    }

    #[test]
    fn wrap_position_handles_degenerate_durations() {
        assert_eq!(wrap_position(5.0, 0.0), 0.0);
        assert_eq!(wrap_position(5.0, f64::NAN), 0.0);
        assert_eq!(wrap_position(5.0, f64::INFINITY), 0.0);
        assert_eq!(wrap_position(f64::NAN, 3.0), 0.0);
        assert!((wrap_position(-0.5, 3.0) - 2.5).abs() < EPS);
        assert!((wrap_position(7.0, 3.0) - 1.0).abs() < EPS);
    }

    #[test]
    fn wrap_detection_needs_a_large_backward_jump() {
        assert_eq!(detect_wrap(9.8, 0.2, 10.0, 0.5), Some(0.4));
        assert_eq!(detect_wrap(5.0, 4.7, 10.0, 0.5), None);
        assert_eq!(detect_wrap(1.0, 2.0, 10.0, 0.5), None);
        assert_eq!(detect_wrap(9.8, 0.2, 0.0, 0.5), None);
    }

    #[test]
    fn toggle_without_small_is_a_no_op() {
        let big = track(10.0, 1.0);
        let mut sync = glue();
        assert!(!sync.toggle(&big, None));
        assert!(!sync.is_enabled());
    }

    #[test]
    fn toggle_off_then_on_recaptures_offset() {
        let mut big = track(10.0, 1.0);
        let mut small = track(4.0, 3.0);
        let mut sync = glue();

        assert!(sync.toggle(&big, Some(&small)));
        assert!((sync.offset_secs() - 2.0).abs() < EPS);

        assert!(!sync.toggle(&big, Some(&small)));
        big.seek(5.0);
        small.seek(0.5);
        assert!(sync.toggle(&big, Some(&small)));
        assert!((sync.offset_secs() - (-4.5)).abs() < EPS);
    }

    #[test]
    fn big_wrap_rederives_small() {
        let mut big = track(10.0, 9.9);
        let mut small = track(4.0, 1.0);
        let mut sync = glue();
        sync.toggle(&big, Some(&small));
        sync.on_big_time_update(&mut big, Some(&mut small), false);
        sync.on_small_time_update(&mut small, &mut big, false);

        big.advance(0.2);
        small.advance(0.2);
        // Drift SMALL so the correction is observable.
        small.seek(3.0);
        sync.on_small_time_update(&mut small, &mut big, false);

        let fix = sync
            .on_big_time_update(&mut big, Some(&mut small), false)
            .unwrap();
        assert_eq!(fix.target, TrackRole::Small);
        let expected = wrap_position(big.current_time() + sync.offset_secs(), 4.0);
        assert!((small.current_time() - expected).abs() < EPS);
    }

    #[test]
    fn small_wrap_advances_big_by_played_delta() {
        let mut big = track(30.0, 10.0);
        let mut small = track(5.0, 4.8);
        let mut sync = glue();
        sync.toggle(&big, Some(&small));
        sync.on_small_time_update(&mut small, &mut big, false);

        small.advance(0.4);
        let fix = sync
            .on_small_time_update(&mut small, &mut big, false)
            .unwrap();
        assert_eq!(fix.target, TrackRole::Big);
        assert!((big.current_time() - 10.4).abs() < EPS);
    }

    #[test]
    fn write_back_does_not_retrigger_detection() {
        let mut big = track(10.0, 9.9);
        let mut small = track(4.0, 3.0);
        let mut sync = glue();
        sync.toggle(&big, Some(&small));
        sync.on_big_time_update(&mut big, Some(&mut small), false);
        sync.on_small_time_update(&mut small, &mut big, false);

        big.advance(0.2);
        assert!(sync
            .on_big_time_update(&mut big, Some(&mut small), false)
            .is_some());
        // SMALL jumped backwards because of our own seek; not a wrap.
        assert!(sync
            .on_small_time_update(&mut small, &mut big, false)
            .is_none());
    }

    #[test]
    fn sync_is_suppressed_while_recording_or_paused() {
        let mut big = track(10.0, 9.9);
        let mut small = track(4.0, 1.0);
        let mut sync = glue();
        sync.toggle(&big, Some(&small));
        sync.on_big_time_update(&mut big, Some(&mut small), true);
        big.advance(0.2);
        assert!(sync
            .on_big_time_update(&mut big, Some(&mut small), true)
            .is_none());

        small.pause();
        big.seek(9.9);
        sync.on_big_time_update(&mut big, Some(&mut small), false);
        big.advance(0.2);
        assert!(sync
            .on_big_time_update(&mut big, Some(&mut small), false)
            .is_none());
    }

    #[test]
    fn scrub_repositions_partner_without_touching_offset() {
        let mut big = track(20.0, 2.0);
        let mut small = track(6.0, 5.0);
        let mut sync = glue();
        sync.toggle(&big, Some(&small));
        let offset = sync.offset_secs();

        sync.on_big_seek(0.5, &mut big, Some(&mut small));
        assert!((big.current_time() - 10.0).abs() < EPS);
        assert!((small.current_time() - wrap_position(10.0 + offset, 6.0)).abs() < EPS);

        sync.on_small_seek(0.25, &mut small, &mut big);
        assert!((small.current_time() - 1.5).abs() < EPS);
        assert!((big.current_time() - wrap_position(1.5 - offset, 20.0)).abs() < EPS);
        assert_eq!(sync.offset_secs(), offset);
    }

    #[test]
    fn scrub_while_unglued_moves_only_one_track() {
        let mut big = track(20.0, 2.0);
        let mut small = track(6.0, 5.0);
        let mut sync = glue();
        assert!(sync.on_big_seek(0.5, &mut big, Some(&mut small)).is_none());
        assert!((small.current_time() - 5.0).abs() < EPS);
    }

    proptest! {
        #[test]
        fn big_wraps_restore_the_invariant(
            big_dur in 1.0f64..60.0,
            small_dur in 1.0f64..60.0,
            big_start_frac in 0.0f64..1.0,
            small_start_frac in 0.0f64..1.0,
            drift in -0.3f64..0.3,
            wraps in 1usize..6,
        ) {
            let mut big = track(big_dur, big_start_frac * big_dur);
            let mut small = track(small_dur, small_start_frac * small_dur);
            let mut sync = glue();
            sync.toggle(&big, Some(&small));
            let offset = sync.offset_secs();

            for _ in 0..wraps {
                sync.on_big_time_update(&mut big, Some(&mut small), false);
                // Jump BIG to just before its end, then across the loop point.
                big.seek(big_dur - 0.05);
                sync.on_big_time_update(&mut big, Some(&mut small), false);
                small.seek(wrap_position(small.current_time() + drift, small_dur));
                big.advance(0.1);
                prop_assert!(sync.on_big_time_update(&mut big, Some(&mut small), false).is_some());

                let expected = wrap_position(big.current_time() + offset, small_dur);
                prop_assert!(circular_gap(expected, small.current_time(), small_dur) < EPS);
            }
        }

        #[test]
        fn small_wraps_carry_big_forward(
            big_dur in 20.0f64..60.0,
            small_dur in 1.0f64..10.0,
            step in 0.05f64..0.45,
            wraps in 1usize..4,
        ) {
            // BIG starts early enough that it never crosses its own loop point.
            let mut big = track(big_dur, 0.0);
            let mut small = track(small_dur, 0.0);
            let mut sync = glue();
            sync.toggle(&big, Some(&small));
            let offset = sync.offset_secs();
            sync.on_big_time_update(&mut big, Some(&mut small), false);
            sync.on_small_time_update(&mut small, &mut big, false);

            let mut seen = 0;
            let mut guard = 0;
            while seen < wraps && guard < 10_000 {
                guard += 1;
                big.advance(step);
                small.advance(step);
                sync.on_big_time_update(&mut big, Some(&mut small), false);
                if sync.on_small_time_update(&mut small, &mut big, false).is_some() {
                    seen += 1;
                }
                if big.current_time() + step >= big_dur {
                    break;
                }
                let expected = wrap_position(big.current_time() + offset, small_dur);
                prop_assert!(circular_gap(expected, small.current_time(), small_dur) < 1e-6);
            }
        }
    }
}
