//! Recording session management.
//!
//! A session walks `Idle → Armed → Recording → Finalizing → Idle`. While
//! recording, [`RecordingSession::run`] renders one composited frame per
//! frame tick, moves audio from the master tap into the encoder, and stops
//! on whichever comes first: an explicit stop, the countdown reaching zero,
//! or the one-shot deadline. Both failsafes are armed at the same ceiling.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gluewave_common::clock::{RecordingClock, TimeSource};
use gluewave_common::config::RecordingDefaults;
use gluewave_common::error::{GluewaveError, GluewaveResult};
use gluewave_mixer::audio_graph::AudioTap;
use gluewave_mixer::track::TrackRole;
use gluewave_provenance::payload::{QrPayload, Volumes};
use gluewave_provenance::qr;
use image::RgbaImage;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};

use crate::context::StudioContext;
use crate::encoder::{select_profile, Encoder, EncodingProfile, StreamSpec};

/// How often BIG is polled for its frame size while arming.
const DIMENSION_POLL: Duration = Duration::from_millis(50);

/// Module size of the displayable QR copy handed back with a take.
const QR_PREVIEW_MODULE_PX: u32 = 6;

/// State of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// No take in progress.
    Idle,
    /// Payload, QR and surface being prepared.
    Armed,
    /// Frames and audio flowing into the encoder.
    Recording,
    /// Encoder flushing, resources being released.
    Finalizing,
}

/// Why a take ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// `stop()` or a [`StopHandle`].
    Stopped,
    /// The one-shot deadline fired.
    Deadline,
    /// The countdown reached zero.
    Ceiling,
}

/// Cloneable trigger that ends a running take from elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// A finished take, published for a save-or-discard decision.
#[derive(Debug, Clone)]
pub struct RecordingResult {
    /// The payload burned into every frame.
    pub payload: QrPayload,

    /// All encoded chunks concatenated in order.
    pub deliverable: Vec<u8>,

    pub profile: EncodingProfile,

    /// Displayable PNG of the burned QR. Absent if PNG encoding failed.
    pub qr_png: Option<Vec<u8>>,

    /// Recorded length, never above the configured ceiling.
    pub duration_secs: f64,

    /// Frames rendered during the take.
    pub frames: u64,

    pub stop_reason: StopReason,
}

impl RecordingResult {
    /// File name the take is saved under.
    pub fn file_name(&self) -> String {
        self.payload.download_name(self.profile.extension)
    }
}

/// Directory confirmed recordings are written into.
#[derive(Debug, Clone)]
pub struct SaveTarget {
    pub dir: PathBuf,
}

impl SaveTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// The single pending take. Consumed by either [`save`](Self::save) or
/// [`discard`](Self::discard).
#[derive(Debug)]
pub struct PendingRecording {
    result: RecordingResult,
}

impl PendingRecording {
    pub fn new(result: RecordingResult) -> Self {
        Self { result }
    }

    pub fn result(&self) -> &RecordingResult {
        &self.result
    }

    /// Write the deliverable as `<id>.<ext>` under `target`.
    pub fn save(self, target: &SaveTarget) -> GluewaveResult<PathBuf> {
        std::fs::create_dir_all(&target.dir)?;
        let path = target.dir.join(self.result.file_name());
        std::fs::write(&path, &self.result.deliverable)?;
        tracing::info!(
            path = %path.display(),
            bytes = self.result.deliverable.len(),
            "Recording saved"
        );
        Ok(path)
    }

    pub fn discard(self) {
        tracing::info!(id = %self.result.payload.id, "Recording discarded");
    }
}

struct ActiveTake {
    payload: QrPayload,
    qr_raster: RgbaImage,
    profile: EncodingProfile,
    spec: StreamSpec,
    tap: AudioTap,
    tap_open: bool,
    clock: RecordingClock,
    started: Instant,
    chunks: Vec<Vec<u8>>,
    frames: u64,
}

/// A recording session that turns the live composition into one take.
pub struct RecordingSession {
    defaults: RecordingDefaults,
    encoder: Box<dyn Encoder>,
    time: Arc<dyn TimeSource>,
    state: SessionState,
    active: Option<ActiveTake>,
    stop: StopHandle,
    remaining: watch::Sender<u64>,
}

impl RecordingSession {
    pub fn new(
        defaults: RecordingDefaults,
        encoder: Box<dyn Encoder>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let (remaining, _) = watch::channel(defaults.max_duration_secs);
        Self {
            defaults,
            encoder,
            time,
            state: SessionState::Idle,
            active: None,
            stop: StopHandle::default(),
            remaining,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Seconds left before the ceiling, updated on every countdown tick.
    pub fn countdown(&self) -> watch::Receiver<u64> {
        self.remaining.subscribe()
    }

    pub fn remaining_secs(&self) -> u64 {
        *self.remaining.borrow()
    }

    /// The payload of the take in progress.
    pub fn payload(&self) -> Option<&QrPayload> {
        self.active.as_ref().map(|take| &take.payload)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.active
            .as_ref()
            .map(|take| take.clock.elapsed_at(Instant::now().into_std()).as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Start a take.
    ///
    /// Returns `Ok(false)` without side effects when the audio graph or BIG
    /// is not ready yet. Callers must not start a second take while one is
    /// active; doing so is an error.
    pub async fn start(&mut self, ctx: &mut StudioContext) -> GluewaveResult<bool> {
        if self.state != SessionState::Idle {
            return Err(GluewaveError::recording("Session already active"));
        }
        if !ctx.audio_ready() || ctx.track(TrackRole::Big).is_none() {
            tracing::debug!("Recording start ignored: audio graph or BIG not ready");
            return Ok(false);
        }

        self.state = SessionState::Armed;
        let (width, height) = self.wait_for_dimensions(ctx).await;

        let gains = ctx.gains();
        let payload = QrPayload::generate(
            self.defaults.title.clone(),
            Volumes {
                big: gains.big,
                small: gains.small,
                master: gains.master,
            },
            self.time.as_ref(),
        );

        match self.arm(ctx, payload, width, height) {
            Ok(take) => {
                tracing::info!(
                    id = %take.payload.id,
                    profile = take.profile.name,
                    width,
                    height,
                    max_secs = self.defaults.max_duration_secs,
                    "Recording started"
                );
                self.stop.reset();
                self.remaining.send_replace(self.defaults.max_duration_secs);
                self.active = Some(take);
                self.state = SessionState::Recording;
                Ok(true)
            }
            Err(e) => {
                tracing::error!(error = %e, "Recording could not start");
                ctx.compositor_mut().clear_qr();
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Drive the take until it stops, then finalize it.
    pub async fn run(&mut self, ctx: &mut StudioContext) -> GluewaveResult<RecordingResult> {
        let max = Duration::from_secs(self.defaults.max_duration_secs);
        let tick_period = Duration::from_millis(self.defaults.countdown_tick_ms.max(1));
        let frame_period = Duration::from_secs_f64(1.0 / f64::from(self.defaults.fps.max(1)));

        let Some(take) = self.active.as_mut() else {
            return Err(GluewaveError::recording("No take in progress"));
        };
        let start = take.started;
        let sample_rate = f64::from(take.spec.sample_rate);

        let deadline = tokio::time::sleep_until(start + max);
        tokio::pin!(deadline);
        let mut countdown = tokio::time::interval_at(start + tick_period, tick_period);
        let mut frames = tokio::time::interval_at(start, frame_period);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = start;

        let reason = loop {
            if self.stop.is_requested() {
                break StopReason::Stopped;
            }

            tokio::select! {
                biased;

                _ = self.stop.notify.notified() => break StopReason::Stopped,

                _ = &mut deadline => break StopReason::Deadline,

                now = countdown.tick() => {
                    let elapsed = now.saturating_duration_since(start);
                    let remaining = max.saturating_sub(elapsed).as_secs();
                    self.remaining.send_replace(remaining);
                    if elapsed >= max {
                        break StopReason::Ceiling;
                    }
                }

                block = take.tap.blocks.recv(), if take.tap_open => match block {
                    Some(block) => {
                        if let Err(e) = self.encoder.push_audio(&block) {
                            tracing::warn!(error = %e, "Dropped audio block");
                        }
                    }
                    None => {
                        tracing::warn!(tap = take.tap.id, "Audio tap closed early");
                        take.tap_open = false;
                    }
                },

                now = frames.tick() => {
                    let dt = now.saturating_duration_since(last_frame).as_secs_f64();
                    last_frame = now;

                    ctx.advance(dt);
                    let audio_frames = (dt * sample_rate).round() as usize;
                    if audio_frames > 0 {
                        ctx.pump_audio(audio_frames);
                    }
                    if let Some(frame) = ctx.render_frame() {
                        if let Err(e) = self.encoder.push_frame(frame) {
                            tracing::warn!(error = %e, frame = take.frames, "Frame not encoded");
                        }
                    }
                    take.frames += 1;
                    take.chunks.extend(self.encoder.take_chunks());
                }
            }
        };

        self.finalize(ctx, reason)
    }

    /// Stop the take. Safe to call at any time and any number of times.
    ///
    /// With no take in progress only the recording UI state is cleared and
    /// `None` is returned.
    pub fn stop(&mut self, ctx: &mut StudioContext) -> GluewaveResult<Option<RecordingResult>> {
        if self.state != SessionState::Recording || self.active.is_none() {
            ctx.compositor_mut().clear_qr();
            ctx.set_recording(false);
            return Ok(None);
        }
        self.finalize(ctx, StopReason::Stopped).map(Some)
    }

    async fn wait_for_dimensions(&self, ctx: &StudioContext) -> (u32, u32) {
        let deadline = Instant::now() + Duration::from_millis(self.defaults.dimension_wait_ms);
        loop {
            let dims = ctx
                .track(TrackRole::Big)
                .and_then(|big| big.video_dimensions());
            if let Some(dims) = dims {
                return dims;
            }
            if Instant::now() >= deadline {
                let fallback = (self.defaults.fallback_width, self.defaults.fallback_height);
                tracing::warn!(
                    width = fallback.0,
                    height = fallback.1,
                    "BIG reported no frame size, using fallback"
                );
                return fallback;
            }
            tokio::time::sleep(DIMENSION_POLL).await;
        }
    }

    fn arm(
        &mut self,
        ctx: &mut StudioContext,
        payload: QrPayload,
        width: u32,
        height: u32,
    ) -> GluewaveResult<ActiveTake> {
        let qr_raster = payload
            .to_qr_text()
            .and_then(|text| qr::rasterize(&text))
            .map_err(|e| GluewaveError::provenance(e.to_string()))?;

        let profile = select_profile(self.encoder.as_mut())?;

        let tap = ctx.audio_mut().open_tap()?;
        let spec = StreamSpec {
            width,
            height,
            fps: self.defaults.fps.max(1),
            sample_rate: tap.sample_rate,
            channels: tap.channels,
            profile: profile.clone(),
        };
        if let Err(e) = self.encoder.start(&spec) {
            ctx.audio_mut().close_tap(tap.id);
            return Err(e);
        }

        let compositor = ctx.compositor_mut();
        compositor.prepare_surface(width, height);
        compositor.set_qr(qr_raster.clone());
        ctx.set_recording(true);

        let started = Instant::now();
        let clock = RecordingClock::start_at(started.into_std(), payload.created_at.clone());

        Ok(ActiveTake {
            payload,
            qr_raster,
            profile,
            spec,
            tap,
            tap_open: true,
            clock,
            started,
            chunks: Vec::new(),
            frames: 0,
        })
    }

    fn finalize(
        &mut self,
        ctx: &mut StudioContext,
        reason: StopReason,
    ) -> GluewaveResult<RecordingResult> {
        let Some(mut take) = self.active.take() else {
            return Err(GluewaveError::recording("No take in progress"));
        };
        self.state = SessionState::Finalizing;

        while let Ok(block) = take.tap.blocks.try_recv() {
            if let Err(e) = self.encoder.push_audio(&block) {
                tracing::warn!(error = %e, "Dropped audio block");
            }
        }
        ctx.audio_mut().close_tap(take.tap.id);
        let finished = self.encoder.finish();

        ctx.compositor_mut().clear_qr();
        ctx.pause();
        ctx.set_recording(false);
        self.remaining.send_replace(0);
        self.stop.reset();
        self.state = SessionState::Idle;

        take.chunks.extend(finished?);
        let max = Duration::from_secs(self.defaults.max_duration_secs);
        let duration = take.clock.elapsed_at(Instant::now().into_std()).min(max);

        let qr_png = match qr::to_png(&take.qr_raster, QR_PREVIEW_MODULE_PX) {
            Ok(png) => Some(png),
            Err(e) => {
                tracing::warn!(error = %e, "QR preview unavailable");
                None
            }
        };

        let stats = self.encoder.stats();
        let started_at = take.clock.epoch_wall().to_string();
        let result = RecordingResult {
            deliverable: take.chunks.concat(),
            payload: take.payload,
            profile: take.profile,
            qr_png,
            duration_secs: duration.as_secs_f64(),
            frames: take.frames,
            stop_reason: reason,
        };

        tracing::info!(
            id = %result.payload.id,
            %started_at,
            ?reason,
            duration_secs = result.duration_secs,
            frames = result.frames,
            dropped = stats.frames_dropped,
            bytes = result.deliverable.len(),
            "Recording finalized"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingSession")
            .field("state", &self.state)
            .field("encoder", &self.encoder.name())
            .field("payload", &self.payload().map(|p| &p.id))
            .finish()
    }
}
