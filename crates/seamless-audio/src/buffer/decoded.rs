//! Decoded sample data for one chunk.

use std::fmt;
use std::sync::Arc;

/// Interleaved f32 samples for exactly one chunk.
///
/// Cloning is cheap: the sample storage is shared. The preload cache and a
/// session's [`BufferCache`](super::BufferCache) may both hold the same data.
#[derive(Clone)]
pub struct DecodedBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl DecodedBuffer {
    /// Wrap interleaved samples.
    ///
    /// A zero channel count is treated as mono.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
        }
    }

    /// A buffer of silence lasting `seconds`.
    pub fn silence(seconds: f64, sample_rate: u32, channels: u16) -> Self {
        let frames = (seconds.max(0.0) * f64::from(sample_rate)).round() as usize;
        Self::new(vec![0.0; frames * channels.max(1) as usize], sample_rate, channels)
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample at `frame` for `channel`, or silence past the end.
    pub fn sample(&self, frame: usize, channel: u16) -> f32 {
        let channel = (channel % self.channels) as usize;
        self.samples
            .get(frame * self.channels as usize + channel)
            .copied()
            .unwrap_or(0.0)
    }
}

impl fmt::Debug for DecodedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedBuffer")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let buffer = DecodedBuffer::silence(4.1, 48000, 2);
        assert_eq!(buffer.frames(), 196_800);
        assert!((buffer.duration() - 4.1).abs() < 1e-9);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_sample_lookup() {
        let buffer = DecodedBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 8000, 2);
        assert_eq!(buffer.sample(1, 0), 0.3);
        assert_eq!(buffer.sample(1, 1), 0.4);
        // Extra channels fold onto the available ones
        assert_eq!(buffer.sample(0, 2), 0.1);
        assert_eq!(buffer.sample(5, 0), 0.0);
    }
}
