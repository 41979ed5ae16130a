//! Chunk descriptor type.

use serde::{Deserialize, Serialize};

/// One pre-encoded slice of a stream.
///
/// `duration` is the nominal content length. The encoded payload additionally
/// carries `overlap_end` seconds of audio past it, which the next chunk fades in
/// over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDescriptor {
    /// Position of the chunk's first nominal sample, in seconds from stream origin.
    pub start: f64,
    /// Nominal content length in seconds, excluding the trailing overlap.
    pub duration: f64,
    /// Fade-in length shared with the previous chunk.
    #[serde(default)]
    pub overlap_start: f64,
    /// Fade-out length shared with the next chunk.
    #[serde(default)]
    pub overlap_end: f64,
    /// Fetchable reference to the encoded payload.
    #[serde(alias = "url")]
    pub location: String,
}

impl ChunkDescriptor {
    pub fn new(start: f64, duration: f64, location: impl Into<String>) -> Self {
        Self {
            start,
            duration,
            overlap_start: 0.0,
            overlap_end: 0.0,
            location: location.into(),
        }
    }

    /// Set both overlap lengths.
    #[must_use]
    pub const fn with_overlaps(mut self, overlap_start: f64, overlap_end: f64) -> Self {
        self.overlap_start = overlap_start;
        self.overlap_end = overlap_end;
        self
    }

    /// Nominal end of the chunk (start of the following one).
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Whether `position` falls within `[start, start + duration)`.
    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end()
    }

    /// Length of the encoded payload, including the trailing overlap.
    pub fn payload_duration(&self) -> f64 {
        self.duration + self.overlap_end
    }
}
