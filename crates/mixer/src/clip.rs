//! Video clips decoded through `ffmpeg`.
//!
//! A [`ClipTrack`] decodes a bounded stretch of a clip into memory once, at
//! a reduced frame rate and width, then loops it on the host clock like
//! [`StillTrack`](crate::track::StillTrack) does.

use std::path::Path;
use std::process::Command;

use gluewave_common::error::{GluewaveError, GluewaveResult};
use image::RgbaImage;

use crate::glue::wrap_position;
use crate::track::MediaTrack;

/// How much of a clip to decode, and in what format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipOptions {
    /// Decoded frames per second.
    pub fps: u32,
    /// Decoded frame width; height follows the source aspect ratio.
    pub width: u32,
    /// Only the first `max_secs` of the clip are kept.
    pub max_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self {
            fps: 12,
            width: 480,
            max_secs: 12.0,
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Interleaved `f32` audio decoded alongside the frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

/// A looping track backed by decoded video frames and audio.
#[derive(Debug, Clone)]
pub struct ClipTrack {
    source: String,
    frames: Vec<RgbaImage>,
    fps: u32,
    audio: ClipAudio,
    audio_cursor: usize,
    position: f64,
    playing: bool,
    volume: f64,
    released: bool,
}

impl ClipTrack {
    pub fn new(
        source: impl Into<String>,
        frames: Vec<RgbaImage>,
        fps: u32,
        audio: ClipAudio,
    ) -> Self {
        Self {
            source: source.into(),
            frames,
            fps: fps.max(1),
            audio,
            audio_cursor: 0,
            position: 0.0,
            playing: false,
            volume: 1.0,
            released: false,
        }
    }

    /// Decode the start of a clip on disk.
    ///
    /// A clip without a decodable audio stream plays silent.
    pub fn open(path: impl AsRef<Path>, options: &ClipOptions) -> GluewaveResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GluewaveError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let (src_w, src_h) = probe_dimensions(path)?;
        let width = options.width.max(2) & !1;
        let height = (((src_h as f64 * width as f64 / src_w as f64).round() as u32).max(2)) & !1;
        let frames = decode_frames(path, options, width, height)?;
        if frames.is_empty() {
            return Err(GluewaveError::render(format!(
                "No frames decoded from {}",
                path.display()
            )));
        }

        let audio = match decode_audio(path, options) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Clip audio unavailable, playing silent"
                );
                ClipAudio::default()
            }
        };

        tracing::info!(
            path = %path.display(),
            frames = frames.len(),
            width,
            height,
            audio_samples = audio.samples.len(),
            "Clip decoded"
        );
        Ok(Self::new(path.display().to_string(), frames, options.fps, audio))
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn frame_index(&self) -> usize {
        let index = (self.position * self.fps as f64).floor() as usize;
        index.min(self.frames.len().saturating_sub(1))
    }

    fn sync_audio_cursor(&mut self) {
        let per_sec = self.audio.sample_rate as f64 * self.audio.channels as f64;
        let cursor = (self.position * per_sec).floor() as usize;
        let channels = self.audio.channels.max(1) as usize;
        self.audio_cursor = (cursor - cursor % channels).min(self.audio.samples.len());
    }
}

impl MediaTrack for ClipTrack {
    fn source(&self) -> &str {
        &self.source
    }

    fn current_time(&self) -> f64 {
        self.position
    }

    fn duration(&self) -> f64 {
        self.frames.len() as f64 / self.fps as f64
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
        let duration = self.duration();
        self.position = if secs.is_finite() && duration > 0.0 {
            secs.clamp(0.0, duration)
        } else {
            0.0
        };
        self.sync_audio_cursor();
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn video_dimensions(&self) -> Option<(u32, u32)> {
        self.frames.first().map(|f| f.dimensions())
    }

    fn current_frame(&self) -> Option<&RgbaImage> {
        if self.released {
            return None;
        }
        self.frames.get(self.frame_index())
    }

    fn read_audio(&mut self, sample_rate: u32, channels: u16, out: &mut [f32]) -> usize {
        if !self.is_playing()
            || self.audio.samples.is_empty()
            || sample_rate != self.audio.sample_rate
            || channels != self.audio.channels
        {
            return 0;
        }

        let volume = self.volume as f32;
        for sample in out.iter_mut() {
            if self.audio_cursor >= self.audio.samples.len() {
                self.audio_cursor = 0;
            }
            *sample = self.audio.samples[self.audio_cursor] * volume;
            self.audio_cursor += 1;
        }
        out.len()
    }

    fn advance(&mut self, dt_secs: f64) {
        if self.is_playing() && dt_secs.is_finite() && dt_secs > 0.0 {
            let wrapped = wrap_position(self.position + dt_secs, self.duration());
            let looped = wrapped < self.position;
            self.position = wrapped;
            if looped {
                self.sync_audio_cursor();
            }
        }
    }

    fn release(&mut self) {
        self.released = true;
        self.playing = false;
        self.frames.clear();
        self.audio.samples.clear();
    }
}

/// Whether `path` names a still image rather than a clip.
pub fn is_still_image(path: &Path) -> bool {
    image::ImageFormat::from_path(path).is_ok()
}

fn probe_dimensions(path: &Path) -> GluewaveResult<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0:s=x",
        ])
        .arg(path)
        .output()
        .map_err(|e| GluewaveError::unsupported(format!("Failed to start ffprobe: {e}")))?;

    let raw = String::from_utf8_lossy(&output.stdout);
    parse_dimensions(&raw).ok_or_else(|| {
        GluewaveError::render(format!(
            "No video stream in {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    })
}

fn parse_dimensions(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.lines().next()?.trim().split_once('x')?;
    let (w, h) = (w.parse::<u32>().ok()?, h.parse::<u32>().ok()?);
    (w > 0 && h > 0).then_some((w, h))
}

fn decode_frames(
    path: &Path,
    options: &ClipOptions,
    width: u32,
    height: u32,
) -> GluewaveResult<Vec<RgbaImage>> {
    let filter = format!("fps={},scale={width}:{height}", options.fps.max(1));
    let output = Command::new("ffmpeg")
        .args(["-v", "error", "-t", &format!("{:.3}", options.max_secs), "-i"])
        .arg(path)
        .args(["-an", "-vf", &filter, "-f", "rawvideo", "-pix_fmt", "rgba", "-"])
        .output()
        .map_err(|e| GluewaveError::unsupported(format!("Failed to start ffmpeg: {e}")))?;

    if !output.status.success() {
        return Err(GluewaveError::render(format!(
            "ffmpeg could not decode {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(split_frames(output.stdout, width, height))
}

/// Cut a raw RGBA stream into frames, dropping a trailing partial frame.
fn split_frames(raw: Vec<u8>, width: u32, height: u32) -> Vec<RgbaImage> {
    let frame_len = width as usize * height as usize * 4;
    if frame_len == 0 {
        return Vec::new();
    }
    raw.chunks_exact(frame_len)
        .filter_map(|chunk| RgbaImage::from_raw(width, height, chunk.to_vec()))
        .collect()
}

fn decode_audio(path: &Path, options: &ClipOptions) -> GluewaveResult<ClipAudio> {
    let sample_rate = options.sample_rate.to_string();
    let channels = options.channels.to_string();
    let output = Command::new("ffmpeg")
        .args(["-v", "error", "-t", &format!("{:.3}", options.max_secs), "-i"])
        .arg(path)
        .args([
            "-vn",
            "-f",
            "f32le",
            "-ar",
            sample_rate.as_str(),
            "-ac",
            channels.as_str(),
            "-",
        ])
        .output()
        .map_err(|e| GluewaveError::unsupported(format!("Failed to start ffmpeg: {e}")))?;

    if !output.status.success() {
        return Err(GluewaveError::audio(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let samples = output
        .stdout
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(ClipAudio {
        sample_rate: options.sample_rate,
        channels: options.channels,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn clip() -> ClipTrack {
        let frames = (0..4u8)
            .map(|i| RgbaImage::from_pixel(4, 2, Rgba([i, 0, 0, 255])))
            .collect();
        let audio = ClipAudio {
            sample_rate: 4,
            channels: 1,
            samples: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8],
        };
        ClipTrack::new("clip", frames, 2, audio)
    }

    #[test]
    fn frames_follow_the_loop_position() {
        let mut track = clip();
        assert_eq!(track.duration(), 2.0);
        track.play();
        track.advance(1.2);
        assert_eq!(track.current_frame().unwrap().get_pixel(0, 0)[0], 2);
        track.advance(1.0);
        assert!((track.current_time() - 0.2).abs() < 1e-9);
        assert_eq!(track.current_frame().unwrap().get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn seek_moves_the_audio_cursor() {
        let mut track = clip();
        track.play();
        track.seek(1.0);
        let mut out = [0.0f32; 3];
        assert_eq!(track.read_audio(4, 1, &mut out), 3);
        assert_eq!(out, [0.5, 0.6, 0.7]);

        track.set_volume(0.5);
        let mut wrapped = [0.0f32; 2];
        track.read_audio(4, 1, &mut wrapped);
        assert_eq!(wrapped, [0.4, 0.05]);
    }

    #[test]
    fn mismatched_format_reads_silence() {
        let mut track = clip();
        track.play();
        let mut out = [0.0f32; 4];
        assert_eq!(track.read_audio(48_000, 2, &mut out), 0);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn released_clip_has_no_frame() {
        let mut track = clip();
        track.release();
        assert!(track.current_frame().is_none());
        assert!(!track.is_playing());
    }

    #[test]
    fn raw_stream_is_cut_into_whole_frames() {
        let raw = vec![7u8; 4 * 2 * 4 * 2 + 5];
        let frames = split_frames(raw, 4, 2);
        assert_eq!(frames.len(), 2);
        assert_eq!(parse_dimensions("1920x1080\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("N/A"), None);
    }

    #[test]
    fn image_paths_are_stills() {
        assert!(is_still_image(Path::new("cover.png")));
        assert!(!is_still_image(Path::new("loop.webm")));
    }
}
