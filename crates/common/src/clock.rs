//! Clock, timestamp and unique-id utilities.
//!
//! A take is anchored to a monotonic epoch recorded at recording start.
//! Wall-clock timestamps and unique tokens come from a [`TimeSource`] so
//! tests can pin them.

use std::time::{Duration, Instant};

use chrono::SecondsFormat;

/// A recording clock that measures elapsed time relative to a fixed epoch
/// (the moment recording started).
#[derive(Debug, Clone)]
pub struct RecordingClock {
    /// The instant recording started.
    epoch: Instant,

    /// Wall-clock time at epoch (ISO 8601 string).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a clock from a known epoch.
    ///
    /// Async drivers pass their runtime's notion of "now" so that paused or
    /// virtual time is honoured.
    pub fn start_at(epoch: Instant, wall: String) -> Self {
        Self {
            epoch,
            epoch_wall: wall,
        }
    }

    /// Time elapsed between the epoch and `now`.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.epoch)
    }

    /// Wall-clock time at recording start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Source of wall-clock timestamps and unique tokens.
pub trait TimeSource: Send + Sync {
    /// Current time as ISO 8601 with millisecond precision and a `Z` suffix.
    fn now_iso8601(&self) -> String;

    /// A fresh token that is unique per call.
    fn unique_token(&self) -> String;
}

/// Production time source backed by the system clock and UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_iso8601(&self) -> String {
        now_iso8601()
    }

    fn unique_token(&self) -> String {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        simple[..12].to_string()
    }
}

/// Deterministic time source for tests and replays.
#[derive(Debug, Clone)]
pub struct FixedTimeSource {
    pub timestamp: String,
    pub token: String,
}

impl FixedTimeSource {
    pub fn new(timestamp: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            token: token.into(),
        }
    }
}

impl TimeSource for FixedTimeSource {
    fn now_iso8601(&self) -> String {
        self.timestamp.clone()
    }

    fn unique_token(&self) -> String {
        self.token.clone()
    }
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
