//! Encoder backends for recorded takes.
//!
//! The session feeds composited RGBA frames and interleaved `f32` audio into
//! an [`Encoder`] and collects encoded chunks from it. Profiles are tried in
//! preference order; when none is supported the generic default is used, and
//! when no encoder exists at all recording cannot start.

use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::JoinHandle;

use gluewave_common::error::{GluewaveError, GluewaveResult};
use image::RgbaImage;
use serde::Serialize;

/// A container and codec combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingProfile {
    pub name: &'static str,
    pub mime: &'static str,
    /// File extension of the deliverable.
    pub extension: &'static str,
    /// ffmpeg muxer name.
    pub muxer: &'static str,
    pub video_codec: Option<&'static str>,
    pub audio_codec: Option<&'static str>,
}

/// Profiles in order of preference.
pub const PROFILE_PREFERENCE: [EncodingProfile; 3] = [
    EncodingProfile {
        name: "webm-vp9-opus",
        mime: "video/webm;codecs=vp9,opus",
        extension: "webm",
        muxer: "webm",
        video_codec: Some("libvpx-vp9"),
        audio_codec: Some("libopus"),
    },
    EncodingProfile {
        name: "webm-vp8-opus",
        mime: "video/webm;codecs=vp8,opus",
        extension: "webm",
        muxer: "webm",
        video_codec: Some("libvpx"),
        audio_codec: Some("libopus"),
    },
    EncodingProfile {
        name: "mp4-h264-aac",
        mime: "video/mp4;codecs=avc1,mp4a",
        extension: "mp4",
        muxer: "mp4",
        video_codec: Some("libx264"),
        audio_codec: Some("aac"),
    },
];

/// Frames buffered between the render loop and ffmpeg's stdin.
const FRAME_QUEUE: usize = 8;

/// Used when no preferred profile is supported; codecs are left to the
/// encoder's own defaults.
pub const DEFAULT_PROFILE: EncodingProfile = EncodingProfile {
    name: "default",
    mime: "video/webm",
    extension: "webm",
    muxer: "webm",
    video_codec: None,
    audio_codec: None,
};

/// Stream parameters fixed for the duration of one take.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub profile: EncodingProfile,
}

/// Runtime statistics from an encoder.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncoderStats {
    pub frames_encoded: u64,

    /// Frames rejected by the encoder.
    pub frames_dropped: u64,

    /// Interleaved audio samples accepted.
    pub audio_samples: u64,

    /// Encoded bytes handed out so far.
    pub bytes_out: u64,
}

impl EncoderStats {
    /// Drop rate as a percentage.
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_encoded + self.frames_dropped;
        if total == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / total as f64 * 100.0
    }
}

/// Turns composited frames and mixed audio into an encoded deliverable.
pub trait Encoder: Send {
    fn name(&self) -> &str;

    /// Whether this encoder can run at all on this host.
    fn is_available(&self) -> bool;

    fn supports(&mut self, profile: &EncodingProfile) -> bool;

    fn start(&mut self, spec: &StreamSpec) -> GluewaveResult<()>;

    fn push_frame(&mut self, frame: &RgbaImage) -> GluewaveResult<()>;

    fn push_audio(&mut self, samples: &[f32]) -> GluewaveResult<()>;

    /// Encoded chunks produced since the last call.
    fn take_chunks(&mut self) -> Vec<Vec<u8>>;

    /// Flush and return the remaining chunks.
    fn finish(&mut self) -> GluewaveResult<Vec<Vec<u8>>>;

    /// Tear down without producing output.
    fn abort(&mut self);

    fn stats(&self) -> EncoderStats;
}

/// Pick the first supported profile, falling back to [`DEFAULT_PROFILE`].
pub fn select_profile(encoder: &mut dyn Encoder) -> GluewaveResult<EncodingProfile> {
    if !encoder.is_available() {
        return Err(GluewaveError::unsupported(format!(
            "No video encoder available ({} not found)",
            encoder.name()
        )));
    }

    for profile in &PROFILE_PREFERENCE {
        if encoder.supports(profile) {
            tracing::info!(profile = profile.name, "Selected encoding profile");
            return Ok(profile.clone());
        }
        tracing::debug!(profile = profile.name, "Encoding profile not supported");
    }

    tracing::warn!("No preferred profile supported, using encoder defaults");
    Ok(DEFAULT_PROFILE)
}

/// [`Encoder`] that pipes raw RGBA frames into an `ffmpeg` child process.
///
/// Audio is spooled to a scratch file and muxed with the video at
/// [`Encoder::finish`], so the deliverable is produced as a single chunk.
#[derive(Debug)]
pub struct FfmpegEncoder {
    binary: String,
    encoders: Option<String>,
    active: Option<FfmpegRun>,
    stats: EncoderStats,
}

#[derive(Debug)]
struct FfmpegRun {
    spec: StreamSpec,
    scratch: tempfile::TempDir,
    child: Child,
    writer: FrameWriter,
    stderr_task: Option<std::thread::JoinHandle<String>>,
    audio: std::fs::File,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            encoders: None,
            active: None,
            stats: EncoderStats::default(),
        }
    }

    /// Support for every preferred profile, for diagnostics.
    pub fn probe(&mut self) -> Vec<(EncodingProfile, bool)> {
        PROFILE_PREFERENCE
            .iter()
            .map(|profile| (profile.clone(), self.supports(profile)))
            .collect()
    }

    fn encoder_list(&mut self) -> &str {
        if self.encoders.is_none() {
            let listing = Command::new(&self.binary)
                .args(["-hide_banner", "-encoders"])
                .output()
                .ok()
                .filter(|output| output.status.success())
                .map(|output| String::from_utf8_lossy(&output.stdout).into_owned())
                .unwrap_or_default();
            self.encoders = Some(listing);
        }
        self.encoders.as_deref().unwrap_or_default()
    }

    fn video_args(&self, spec: &StreamSpec, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "-s".into(),
            format!("{}x{}", spec.width, spec.height),
            "-r".into(),
            spec.fps.to_string(),
            "-i".into(),
            "-".into(),
        ];
        if let Some(codec) = spec.profile.video_codec {
            args.extend(["-c:v".into(), codec.into()]);
        }
        match spec.profile.video_codec {
            Some("libvpx-vp9") => args.extend([
                "-b:v".into(),
                "0".into(),
                "-crf".into(),
                "32".into(),
                "-row-mt".into(),
                "1".into(),
                "-deadline".into(),
                "realtime".into(),
            ]),
            Some("libvpx") => args.extend([
                "-b:v".into(),
                "2500k".into(),
                "-deadline".into(),
                "realtime".into(),
            ]),
            Some("libx264") => args.extend([
                "-preset".into(),
                "veryfast".into(),
                "-pix_fmt".into(),
                "yuv420p".into(),
            ]),
            _ => {}
        }
        args.extend([
            "-an".into(),
            "-f".into(),
            spec.profile.muxer.into(),
            output.display().to_string(),
        ]);
        args
    }

    fn mux(&self, run: &FfmpegRun, video: &Path, audio: &Path, output: &Path) -> GluewaveResult<()> {
        let sample_rate = run.spec.sample_rate.to_string();
        let channels = run.spec.channels.to_string();
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(video)
            .args([
                "-f",
                "f32le",
                "-ar",
                sample_rate.as_str(),
                "-ac",
                channels.as_str(),
                "-i",
            ])
            .arg(audio)
            .args(["-c:v", "copy"]);
        if let Some(codec) = run.spec.profile.audio_codec {
            cmd.args(["-c:a", codec]);
        }
        cmd.args(["-shortest", "-f", run.spec.profile.muxer]).arg(output);

        let output_status = cmd
            .output()
            .map_err(|e| GluewaveError::recording(format!("Failed to start ffmpeg mux: {e}")))?;
        if !output_status.status.success() {
            return Err(GluewaveError::recording(format!(
                "ffmpeg mux failed (status {}): {}",
                output_status.status,
                String::from_utf8_lossy(&output_status.stderr).trim()
            )));
        }
        Ok(())
    }

    fn scratch_path(run: &FfmpegRun, stem: &str) -> PathBuf {
        run.scratch
            .path()
            .join(format!("{stem}.{}", run.spec.profile.extension))
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for FfmpegEncoder {
    fn name(&self) -> &str {
        &self.binary
    }

    fn is_available(&self) -> bool {
        command_exists(&self.binary)
    }

    fn supports(&mut self, profile: &EncodingProfile) -> bool {
        let listing = self.encoder_list();
        let has = |codec: Option<&str>| {
            codec.map_or(true, |codec| {
                listing
                    .lines()
                    .any(|line| line.split_whitespace().nth(1) == Some(codec))
            })
        };
        has(profile.video_codec) && has(profile.audio_codec)
    }

    fn start(&mut self, spec: &StreamSpec) -> GluewaveResult<()> {
        if self.active.is_some() {
            return Err(GluewaveError::recording("Encoder already started"));
        }

        let scratch = tempfile::Builder::new().prefix("gluewave-take-").tempdir()?;
        let video_path = scratch
            .path()
            .join(format!("video.{}", spec.profile.extension));
        let audio = std::fs::File::create(scratch.path().join("audio.f32"))?;

        let args = self.video_args(spec, &video_path);
        tracing::debug!(?args, "Starting ffmpeg encoder");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GluewaveError::recording(format!("Failed to start ffmpeg: {e}")))?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(GluewaveError::recording("ffmpeg stdin unavailable"));
        };
        let writer = FrameWriter::spawn(stdin, FRAME_QUEUE);
        let stderr_task = child.stderr.take().map(|stderr| {
            // Drained on a thread so ffmpeg never blocks on a full pipe.
            std::thread::spawn(move || -> String {
                let mut reader = BufReader::new(stderr);
                let mut output = String::new();
                match reader.read_to_string(&mut output) {
                    Ok(_) => output,
                    Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
                }
            })
        });

        tracing::info!(
            pid = child.id(),
            profile = spec.profile.name,
            width = spec.width,
            height = spec.height,
            "ffmpeg encoder started"
        );

        self.stats = EncoderStats::default();
        self.active = Some(FfmpegRun {
            spec: spec.clone(),
            scratch,
            child,
            writer,
            stderr_task,
            audio,
        });
        Ok(())
    }

    fn push_frame(&mut self, frame: &RgbaImage) -> GluewaveResult<()> {
        let run = self
            .active
            .as_mut()
            .ok_or_else(|| GluewaveError::recording("Encoder not started"))?;

        if frame.dimensions() != (run.spec.width, run.spec.height) {
            self.stats.frames_dropped += 1;
            return Err(GluewaveError::recording(format!(
                "Frame is {}x{}, stream is {}x{}",
                frame.width(),
                frame.height(),
                run.spec.width,
                run.spec.height
            )));
        }

        if let Err(e) = run.writer.push(frame.as_raw().clone()) {
            self.stats.frames_dropped += 1;
            return Err(e);
        }
        self.stats.frames_encoded += 1;
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32]) -> GluewaveResult<()> {
        let run = self
            .active
            .as_mut()
            .ok_or_else(|| GluewaveError::recording("Encoder not started"))?;
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        run.audio.write_all(&bytes)?;
        self.stats.audio_samples += samples.len() as u64;
        Ok(())
    }

    fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        Vec::new()
    }

    fn finish(&mut self) -> GluewaveResult<Vec<Vec<u8>>> {
        let mut run = self
            .active
            .take()
            .ok_or_else(|| GluewaveError::recording("Encoder not started"))?;

        // Closing stdin is ffmpeg's end-of-stream.
        if let Err(e) = run.writer.close() {
            tracing::warn!(error = %e, "ffmpeg stdin closed early");
        }
        let status = run
            .child
            .wait()
            .map_err(|e| GluewaveError::recording(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = run
            .stderr_task
            .take()
            .and_then(|task| task.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(GluewaveError::recording(format!(
                "ffmpeg encode failed (status {status}): {}",
                stderr_output.trim()
            )));
        }
        run.audio.flush()?;

        let video_path = Self::scratch_path(&run, "video");
        let deliverable_path = if self.stats.audio_samples > 0 {
            let muxed = Self::scratch_path(&run, "take");
            self.mux(&run, &video_path, &run.scratch.path().join("audio.f32"), &muxed)?;
            muxed
        } else {
            video_path
        };

        let bytes = std::fs::read(&deliverable_path)?;
        self.stats.bytes_out += bytes.len() as u64;
        tracing::info!(
            bytes = bytes.len(),
            frames = self.stats.frames_encoded,
            "ffmpeg encoder finished"
        );
        Ok(vec![bytes])
    }

    fn abort(&mut self) {
        if let Some(mut run) = self.active.take() {
            // Killing first unblocks a writer stuck on a full pipe.
            if let Err(e) = run.child.kill() {
                tracing::debug!(error = %e, "ffmpeg already exited");
            }
            let _ = run.writer.close();
            let _ = run.child.wait();
            tracing::info!("ffmpeg encoder aborted");
        }
    }

    fn stats(&self) -> EncoderStats {
        self.stats
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Moves raw frames to a blocking sink on its own thread.
///
/// [`push`](Self::push) never blocks: when the queue is full the frame is
/// refused, so a slow sink costs frames instead of stalling the render loop
/// and its timers.
#[derive(Debug)]
struct FrameWriter {
    frames: Option<SyncSender<Vec<u8>>>,
    thread: Option<JoinHandle<std::io::Result<()>>>,
}

impl FrameWriter {
    fn spawn<W: Write + Send + 'static>(mut sink: W, capacity: usize) -> Self {
        let (frames, queue) = mpsc::sync_channel::<Vec<u8>>(capacity);
        let thread = std::thread::spawn(move || -> std::io::Result<()> {
            for frame in queue {
                sink.write_all(&frame)?;
            }
            sink.flush()
        });
        Self {
            frames: Some(frames),
            thread: Some(thread),
        }
    }

    fn push(&self, frame: Vec<u8>) -> GluewaveResult<()> {
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| GluewaveError::recording("Frame writer closed"))?;
        frames.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => GluewaveError::recording("ffmpeg is behind, frame dropped"),
            TrySendError::Disconnected(_) => GluewaveError::recording("ffmpeg stopped reading frames"),
        })
    }

    /// Drain queued frames, then drop the sink.
    fn close(&mut self) -> GluewaveResult<()> {
        drop(self.frames.take());
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(result)) => result.map_err(GluewaveError::from),
            Some(Err(_)) => Err(GluewaveError::recording("Frame writer panicked")),
            None => Ok(()),
        }
    }
}

/// Whether `binary` resolves on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// In-memory [`Encoder`] that emits one small chunk per frame.
///
/// Each chunk is the frame's index as little-endian `u64`, which lets tests
/// check that the deliverable is the ordered concatenation of all chunks.
#[derive(Debug, Clone)]
pub struct MemoryEncoder {
    available: bool,
    supported: Vec<&'static str>,
    spec: Option<StreamSpec>,
    pending: Vec<Vec<u8>>,
    stats: EncoderStats,
    started: bool,
    finished: bool,
}

impl MemoryEncoder {
    /// An encoder that supports every profile.
    pub fn new() -> Self {
        Self {
            available: true,
            supported: PROFILE_PREFERENCE.iter().map(|p| p.name).collect(),
            spec: None,
            pending: Vec::new(),
            stats: EncoderStats::default(),
            started: false,
            finished: false,
        }
    }

    /// An encoder that supports only the named profiles.
    pub fn supporting(names: &[&'static str]) -> Self {
        Self {
            supported: names.to_vec(),
            ..Self::new()
        }
    }

    /// An encoder that reports itself as unavailable.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub fn spec(&self) -> Option<&StreamSpec> {
        self.spec.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Default for MemoryEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for MemoryEncoder {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn supports(&mut self, profile: &EncodingProfile) -> bool {
        self.supported.contains(&profile.name)
    }

    fn start(&mut self, spec: &StreamSpec) -> GluewaveResult<()> {
        if self.started && !self.finished {
            return Err(GluewaveError::recording("Encoder already started"));
        }
        self.spec = Some(spec.clone());
        self.pending.clear();
        self.stats = EncoderStats::default();
        self.started = true;
        self.finished = false;
        Ok(())
    }

    fn push_frame(&mut self, frame: &RgbaImage) -> GluewaveResult<()> {
        let spec = self
            .spec
            .as_ref()
            .ok_or_else(|| GluewaveError::recording("Encoder not started"))?;
        if frame.dimensions() != (spec.width, spec.height) {
            self.stats.frames_dropped += 1;
            return Err(GluewaveError::recording("Frame size mismatch"));
        }
        self.pending
            .push(self.stats.frames_encoded.to_le_bytes().to_vec());
        self.stats.frames_encoded += 1;
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32]) -> GluewaveResult<()> {
        if !self.started {
            return Err(GluewaveError::recording("Encoder not started"));
        }
        self.stats.audio_samples += samples.len() as u64;
        Ok(())
    }

    fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        let chunks = std::mem::take(&mut self.pending);
        self.stats.bytes_out += chunks.iter().map(|c| c.len() as u64).sum::<u64>();
        chunks
    }

    fn finish(&mut self) -> GluewaveResult<Vec<Vec<u8>>> {
        if !self.started || self.finished {
            return Err(GluewaveError::recording("Encoder not running"));
        }
        self.finished = true;
        Ok(self.take_chunks())
    }

    fn abort(&mut self) {
        self.pending.clear();
        self.finished = true;
    }

    fn stats(&self) -> EncoderStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> StreamSpec {
        StreamSpec {
            width: 4,
            height: 2,
            fps: 30,
            sample_rate: 48_000,
            channels: 2,
            profile: PROFILE_PREFERENCE[0].clone(),
        }
    }

    #[test]
    fn first_supported_profile_wins() {
        let mut encoder = MemoryEncoder::supporting(&["mp4-h264-aac", "webm-vp8-opus"]);
        let profile = select_profile(&mut encoder).unwrap();
        assert_eq!(profile.name, "webm-vp8-opus");
    }

    #[test]
    fn unsupported_profiles_fall_back_to_default() {
        let mut encoder = MemoryEncoder::supporting(&[]);
        assert_eq!(select_profile(&mut encoder).unwrap(), DEFAULT_PROFILE);
    }

    #[test]
    fn missing_encoder_is_fatal() {
        let mut encoder = MemoryEncoder::unavailable();
        assert!(matches!(
            select_profile(&mut encoder),
            Err(GluewaveError::Unsupported { .. })
        ));
    }

    #[test]
    fn memory_encoder_chunks_are_ordered() {
        let mut encoder = MemoryEncoder::new();
        encoder.start(&spec()).unwrap();
        let frame = RgbaImage::new(4, 2);
        encoder.push_frame(&frame).unwrap();
        encoder.push_frame(&frame).unwrap();
        let mut chunks = encoder.take_chunks();
        encoder.push_frame(&frame).unwrap();
        chunks.extend(encoder.finish().unwrap());

        let concatenated = chunks.concat();
        assert_eq!(concatenated.len(), 24);
        assert_eq!(&concatenated[16..24], &2u64.to_le_bytes());
        assert!(encoder.finish().is_err());
    }

    #[test]
    fn mismatched_frames_are_dropped() {
        let mut encoder = MemoryEncoder::new();
        encoder.start(&spec()).unwrap();
        assert!(encoder.push_frame(&RgbaImage::new(8, 8)).is_err());
        assert_eq!(encoder.stats().frames_dropped, 1);
        assert_eq!(encoder.stats().drop_rate(), 100.0);
    }

    #[test]
    fn ffmpeg_args_carry_profile_codecs() {
        let encoder = FfmpegEncoder::new();
        let args = encoder.video_args(&spec(), Path::new("/tmp/out.webm"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s 4x2 -r 30 -i -"));
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.ends_with("-an -f webm /tmp/out.webm"));
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let mut encoder = FfmpegEncoder::with_binary("gluewave-no-such-ffmpeg");
        assert!(!encoder.is_available());
        assert!(select_profile(&mut encoder).is_err());
    }

    /// Sink that holds every write until its gate is dropped.
    struct GatedSink {
        gate: mpsc::Receiver<()>,
        written: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
    }

    impl Write for GatedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let _ = self.gate.recv();
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stalled_sink_refuses_frames_instead_of_blocking() {
        let (release, gate) = mpsc::channel();
        let written = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut writer = FrameWriter::spawn(
            GatedSink {
                gate,
                written: written.clone(),
            },
            2,
        );

        let accepted: Vec<u8> = (0..6u8).filter(|&i| writer.push(vec![i]).is_ok()).collect();
        assert!(accepted.len() < 6);

        drop(release);
        writer.close().unwrap();
        assert_eq!(*written.lock().unwrap(), accepted);
        assert!(writer.push(vec![9]).is_err());
    }
}
