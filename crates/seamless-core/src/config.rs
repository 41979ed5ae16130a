//! Engine and client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Playback engine options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Seconds between two prefetch monitor ticks.
    pub monitor_interval: f64,
    /// Seconds of look-ahead the prefetch monitor keeps decoded.
    pub required_advance_threshold: f64,
    /// Initial playback rate of new sessions.
    pub playback_rate: f64,
    /// Fade-in applied when playback resumes in the middle of a chunk.
    pub resume_fade: f64,
    /// Number of leading chunks decoded per stream before any session starts.
    pub preload_chunks: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monitor_interval: 1.0,
            required_advance_threshold: 10.0,
            playback_rate: 1.0,
            resume_fade: 0.005,
            preload_chunks: 2,
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.monitor_interval.is_finite() && self.monitor_interval > 0.0) {
            return Err(Error::Config(format!(
                "monitorInterval must be positive, got {}",
                self.monitor_interval
            )));
        }
        if !(self.required_advance_threshold.is_finite() && self.required_advance_threshold >= 0.0)
        {
            return Err(Error::Config(format!(
                "requiredAdvanceThreshold must not be negative, got {}",
                self.required_advance_threshold
            )));
        }
        if !(self.playback_rate.is_finite() && self.playback_rate > 0.0) {
            return Err(Error::Config(format!(
                "playbackRate must be positive, got {}",
                self.playback_rate
            )));
        }
        if !(self.resume_fade.is_finite() && self.resume_fade > 0.0) {
            return Err(Error::Config(format!(
                "resumeFade must be positive, got {}",
                self.resume_fade
            )));
        }
        Ok(())
    }

    /// Monitor period as a `Duration`.
    pub fn monitor_period(&self) -> Duration {
        Duration::from_secs_f64(self.monitor_interval)
    }
}

/// Chunk server connection options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Base URL chunk locations are resolved against.
    pub server_url: String,
    /// Path of the stream details document, relative to `server_url`.
    pub details_path: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for transient request failures.
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            details_path: "streams/details".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl ClientConfig {
    /// Parsed server base URL.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("invalid serverUrl {}: {e}", self.server_url)))
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
