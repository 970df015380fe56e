//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Recording session defaults.
    pub recording: RecordingDefaults,

    /// Burned-in overlay layout.
    pub overlay: OverlayConfig,

    /// Glue synchronizer tuning.
    pub glue: GlueConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Hard ceiling on a single take, enforced by both stop triggers.
    pub max_duration_secs: u64,

    /// How long `start` waits for BIG to report frame dimensions.
    pub dimension_wait_ms: u64,

    /// Surface size used when BIG never reports its dimensions.
    pub fallback_width: u32,
    pub fallback_height: u32,

    /// Compositor frame rate.
    pub fps: u32,

    /// Countdown tick period.
    pub countdown_tick_ms: u64,

    /// Title embedded in the provenance payload.
    pub title: String,

    /// Where confirmed recordings are saved.
    pub output_dir: PathBuf,
}

/// Overlay layout burned into every recorded frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Watermark string drawn top-left.
    pub watermark_text: String,

    /// Watermark opacity in `[0.0, 1.0]`.
    pub watermark_opacity: f32,

    /// Watermark font size as a fraction of surface width.
    pub font_scale: f32,

    /// Target QR side length as a fraction of surface width.
    pub qr_size_ratio: f32,

    /// Picture-in-picture width as a fraction of surface width.
    pub pip_width_ratio: f32,

    /// TrueType font for the watermark. Unset uses the bundled font.
    pub font_path: Option<PathBuf>,
}

/// Glue synchronizer tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GlueConfig {
    /// Backward jump (seconds) that is read as a loop wrap.
    pub wrap_threshold_secs: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "gluewave=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            max_duration_secs: 100,
            dimension_wait_ms: 2500,
            fallback_width: 1280,
            fallback_height: 720,
            fps: 30,
            countdown_tick_ms: 1000,
            title: "Gluewave Session".to_string(),
            output_dir: PathBuf::from("."),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            watermark_text: "gluewave".to_string(),
            watermark_opacity: 0.55,
            font_scale: 0.018,
            qr_size_ratio: 0.14,
            pip_width_ratio: 0.32,
            font_path: None,
        }
    }
}

impl Default for GlueConfig {
    fn default() -> Self {
        Self {
            wrap_threshold_secs: 0.5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("gluewave").join("config.json")
}
