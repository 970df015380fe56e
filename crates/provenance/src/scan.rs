//! Recover the provenance payload from an arbitrary video.
//!
//! Scanning is best-effort image recognition: a handful of early frames are
//! sampled and each one is searched for a QR code, first in the top-left
//! corner where Gluewave draws it, then across the whole frame. Both
//! polarities are tried so light-on-dark re-encodes still decode.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;
use image::{GrayImage, RgbaImage};

use crate::error::ProvenanceError;
use crate::payload::QrPayload;

/// Timestamps (seconds) sampled from the start of a clip.
pub const SAMPLE_TIMESTAMPS: [f64; 8] = [0.15, 0.3, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0];

/// Fraction of frame width and height covered by the corner crop.
pub const CORNER_CROP_RATIO: f64 = 0.32;

/// A payload recovered from a video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedPayload {
    /// The structurally validated payload.
    pub payload: QrPayload,

    /// The QR text exactly as decoded.
    pub raw_text: String,

    /// Timestamp of the frame it was found in.
    pub found_at_secs: f64,
}

/// Source of decoded frames for the scanner.
pub trait FrameSampler {
    /// Clip duration in seconds, when known.
    fn duration_secs(&mut self) -> Result<Option<f64>, ProvenanceError>;

    /// The frame shown at `secs`, or `None` if none could be decoded there.
    fn frame_at(&mut self, secs: f64) -> Result<Option<RgbaImage>, ProvenanceError>;
}

/// QR detector over a greyscale image.
pub trait QrDecoder: Send + Sync {
    /// Every QR text found in `image`.
    fn decode(&self, image: &GrayImage) -> Vec<String>;
}

/// [`QrDecoder`] backed by `rqrr`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RqrrDecoder;

impl QrDecoder for RqrrDecoder {
    fn decode(&self, image: &GrayImage) -> Vec<String> {
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            image.width() as usize,
            image.height() as usize,
            |x, y| image.get_pixel(x as u32, y as u32)[0],
        );

        prepared
            .detect_grids()
            .into_iter()
            .filter_map(|grid| match grid.decode() {
                Ok((_, content)) => Some(content),
                Err(e) => {
                    tracing::trace!(error = ?e, "QR grid detected but not decodable");
                    None
                }
            })
            .collect()
    }
}

/// Timestamps worth sampling for a clip of the given duration.
///
/// Unknown or non-finite durations keep the full list.
pub fn sample_timestamps(duration_secs: Option<f64>) -> Vec<f64> {
    match duration_secs {
        Some(duration) if duration.is_finite() && duration > 0.0 => SAMPLE_TIMESTAMPS
            .iter()
            .copied()
            .filter(|t| *t < duration)
            .collect(),
        _ => SAMPLE_TIMESTAMPS.to_vec(),
    }
}

/// Search one frame: corner crop then full frame, each in both polarities.
pub fn scan_frame(frame: &RgbaImage, decoder: &dyn QrDecoder) -> Option<(QrPayload, String)> {
    let gray = image::imageops::grayscale(frame);
    let crop_w = ((gray.width() as f64 * CORNER_CROP_RATIO).round() as u32).max(1);
    let crop_h = ((gray.height() as f64 * CORNER_CROP_RATIO).round() as u32).max(1);
    let corner = image::imageops::crop_imm(&gray, 0, 0, crop_w, crop_h).to_image();

    for region in [corner, gray] {
        let mut inverted = region.clone();
        image::imageops::invert(&mut inverted);

        for candidate in [&region, &inverted] {
            for text in decoder.decode(candidate) {
                if let Some(payload) = QrPayload::parse(&text) {
                    return Some((payload, text));
                }
                tracing::debug!(len = text.len(), "Ignoring QR without provenance shape");
            }
        }
    }

    None
}

/// Sample early frames until one carries a provenance payload.
///
/// `Ok(None)` means the clip is readable but carries no Gluewave QR.
pub fn scan_frames<S: FrameSampler + ?Sized>(
    sampler: &mut S,
    decoder: &dyn QrDecoder,
) -> Result<Option<ScannedPayload>, ProvenanceError> {
    let timestamps = sample_timestamps(sampler.duration_secs()?);

    for secs in &timestamps {
        let frame = match sampler.frame_at(*secs) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(secs, error = %e, "Skipping unreadable sample frame");
                continue;
            }
        };

        if let Some((payload, raw_text)) = scan_frame(&frame, decoder) {
            tracing::info!(id = %payload.id, secs, "Provenance QR found");
            return Ok(Some(ScannedPayload {
                payload,
                raw_text,
                found_at_secs: *secs,
            }));
        }
    }

    tracing::info!(samples = timestamps.len(), "No provenance QR in sampled frames");
    Ok(None)
}

/// Narrow seam for scanning: video bytes in, optional payload out.
#[async_trait]
pub trait ProvenanceScanner: Send + Sync {
    async fn scan(&self, video: &[u8]) -> Result<Option<ScannedPayload>, ProvenanceError>;
}

/// Scanner that decodes real frames with `ffmpeg` and `rqrr`.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoScanner;

#[async_trait]
impl ProvenanceScanner for VideoScanner {
    async fn scan(&self, video: &[u8]) -> Result<Option<ScannedPayload>, ProvenanceError> {
        let bytes = video.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut sampler = FfmpegFrameSampler::from_bytes(&bytes)?;
            scan_frames(&mut sampler, &RqrrDecoder)
        })
        .await
        .map_err(|e| ProvenanceError::frame_source(format!("Scan task failed: {e}")))?
    }
}

/// Scanner that returns a fixed outcome, for tests and offline tooling.
#[derive(Debug, Clone, Default)]
pub struct CannedScanner {
    pub outcome: Option<ScannedPayload>,
}

#[async_trait]
impl ProvenanceScanner for CannedScanner {
    async fn scan(&self, _video: &[u8]) -> Result<Option<ScannedPayload>, ProvenanceError> {
        Ok(self.outcome.clone())
    }
}

/// Frames held in memory, keyed by timestamp.
#[derive(Debug, Clone, Default)]
pub struct MemoryFrameSampler {
    pub duration_secs: Option<f64>,
    frames: Vec<(f64, RgbaImage)>,
}

impl MemoryFrameSampler {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs,
            frames: Vec::new(),
        }
    }

    /// Add a frame shown from `secs` until the next frame.
    pub fn push(&mut self, secs: f64, frame: RgbaImage) {
        self.frames.push((secs, frame));
        self.frames.sort_by(|a, b| a.0.total_cmp(&b.0));
    }
}

impl FrameSampler for MemoryFrameSampler {
    fn duration_secs(&mut self) -> Result<Option<f64>, ProvenanceError> {
        Ok(self.duration_secs)
    }

    fn frame_at(&mut self, secs: f64) -> Result<Option<RgbaImage>, ProvenanceError> {
        Ok(self
            .frames
            .iter()
            .rev()
            .find(|(start, _)| *start <= secs)
            .map(|(_, frame)| frame.clone()))
    }
}

/// Frame sampler that shells out to `ffprobe`/`ffmpeg`.
pub struct FfmpegFrameSampler {
    path: PathBuf,
    _temp: Option<tempfile::NamedTempFile>,
}

impl FfmpegFrameSampler {
    /// Sample frames from a file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _temp: None,
        }
    }

    /// Spill `bytes` to a temporary file and sample from it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProvenanceError> {
        let mut temp = tempfile::NamedTempFile::new()?;
        temp.write_all(bytes)?;
        temp.flush()?;
        Ok(Self {
            path: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }
}

impl FrameSampler for FfmpegFrameSampler {
    fn duration_secs(&mut self) -> Result<Option<f64>, ProvenanceError> {
        Ok(probe_duration_secs(&self.path))
    }

    fn frame_at(&mut self, secs: f64) -> Result<Option<RgbaImage>, ProvenanceError> {
        let output = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &format!("{secs:.3}"), "-i"])
            .arg(&self.path)
            .args([
                "-frames:v",
                "1",
                "-f",
                "image2pipe",
                "-vcodec",
                "png",
                "-",
            ])
            .output()
            .map_err(|e| ProvenanceError::frame_source(format!("Failed to start ffmpeg: {e}")))?;

        if !output.status.success() || output.stdout.is_empty() {
            tracing::debug!(
                secs,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "ffmpeg produced no frame"
            );
            return Ok(None);
        }

        let frame = image::load_from_memory_with_format(&output.stdout, image::ImageFormat::Png)
            .map_err(|e| ProvenanceError::frame_source(format!("Undecodable frame: {e}")))?;
        Ok(Some(frame.to_rgba8()))
    }
}

/// Container duration as reported by `ffprobe`.
pub fn probe_duration_secs(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    let duration = raw.lines().next()?.trim().parse::<f64>().ok()?;
    (duration.is_finite() && duration > 0.0).then_some(duration)
}
