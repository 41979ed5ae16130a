//! Cross-fade envelopes for overlapping chunks.
//!
//! Adjacent chunks carry identical audio in their overlap regions, so the seam
//! uses linear ramps: the outgoing and incoming gains always sum to one and the
//! correlated signal keeps a constant amplitude.

use seamless_core::ChunkDescriptor;

/// Fade placement for one emitted chunk, in seconds of chunk content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// Content position the emission starts at.
    pub fade_in_start: f64,
    /// Zero means the chunk starts at full gain.
    pub fade_in_length: f64,
    /// Content position the fade-out begins at.
    pub fade_out_start: f64,
    /// Zero or negative means the chunk never fades out.
    pub fade_out_length: f64,
}

impl Envelope {
    /// Compute the envelope for playing `chunk` from `chunk_offset`.
    ///
    /// Starting past the first sample replaces the configured fade-in with a
    /// short `resume_fade` ramp to suppress the click.
    pub fn compute(chunk: &ChunkDescriptor, chunk_offset: f64, resume_fade: f64) -> Self {
        let fade_in_start = chunk_offset;
        let fade_in_length = if chunk_offset > 0.0 {
            resume_fade
        } else {
            chunk.overlap_start
        };

        // Can land past `duration` when resuming deep inside the chunk.
        let fade_out_start = chunk.duration.max(fade_in_start + fade_in_length);
        let fade_out_length = chunk
            .overlap_end
            .min(chunk.duration + chunk.overlap_end - fade_out_start);

        Self {
            fade_in_start,
            fade_in_length,
            fade_out_start,
            fade_out_length,
        }
    }

    pub fn has_fade_out(&self) -> bool {
        self.fade_out_length > 0.0
    }

    /// Place the envelope on the audio clock, with the emission at `audio_time`.
    pub fn gain_curve(&self, audio_time: f64) -> GainEnvelope {
        let fade_in_start_time = audio_time;
        let fade_in_end_time = fade_in_start_time + self.fade_in_length;
        let fade_out_start_time =
            (audio_time + self.fade_out_start - self.fade_in_start).max(fade_in_end_time);

        let mut events = Vec::with_capacity(4);

        if self.fade_in_length > 0.0 {
            events.push(GainEvent::Set {
                time: fade_in_start_time,
                value: 0.0,
            });
            events.push(GainEvent::LinearRamp {
                end_time: fade_in_end_time,
                value: 1.0,
            });
        } else {
            events.push(GainEvent::Set {
                time: audio_time,
                value: 1.0,
            });
        }

        if self.has_fade_out() {
            events.push(GainEvent::Set {
                time: fade_out_start_time,
                value: 1.0,
            });
            events.push(GainEvent::LinearRamp {
                end_time: fade_out_start_time + self.fade_out_length,
                value: 0.0,
            });
        }

        GainEnvelope { events }
    }
}

/// One gain automation point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainEvent {
    /// Jump to `value` at `time`.
    Set { time: f64, value: f64 },
    /// Ramp linearly from the previous point to `value`, reached at `end_time`.
    LinearRamp { end_time: f64, value: f64 },
}

/// Gain automation on the audio clock. Gain is zero before the first event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GainEnvelope {
    events: Vec<GainEvent>,
}

impl GainEnvelope {
    /// Constant full gain from `time` on.
    pub fn unity(time: f64) -> Self {
        Self {
            events: vec![GainEvent::Set { time, value: 1.0 }],
        }
    }

    pub fn events(&self) -> &[GainEvent] {
        &self.events
    }

    /// Evaluate the gain at `time`.
    pub fn gain_at(&self, time: f64) -> f64 {
        let mut value = 0.0;
        let mut last_time = f64::NEG_INFINITY;

        for event in &self.events {
            match *event {
                GainEvent::Set {
                    time: at,
                    value: target,
                } => {
                    if time < at {
                        return value;
                    }
                    value = target;
                    last_time = at;
                }
                GainEvent::LinearRamp { end_time, value: target } => {
                    if time < end_time && end_time > last_time {
                        if time < last_time {
                            return value;
                        }
                        let progress = (time - last_time) / (end_time - last_time);
                        return (target - value).mul_add(progress, value);
                    }
                    value = target;
                    last_time = end_time;
                }
            }
        }

        value
    }

    /// Time after which the gain never changes again.
    pub fn settle_time(&self) -> f64 {
        self.events
            .last()
            .map_or(f64::NEG_INFINITY, |event| match *event {
                GainEvent::Set { time, .. } => time,
                GainEvent::LinearRamp { end_time, .. } => end_time,
            })
    }
}
