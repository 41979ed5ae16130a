//! Software mixer rendering timed emissions into an output stream.
//!
//! The mixer is both the [`PlaybackSink`] engines emit into and the
//! [`AudioClock`] they read: its clock is the number of frames rendered so
//! far, so emission times and rendered audio can never drift apart.

use parking_lot::Mutex;
use tracing::trace;

use crate::buffer::DecodedBuffer;
use crate::envelope::GainEnvelope;
use crate::traits::{AudioClock, Emission, PlaybackSink, VoiceId};

struct Voice {
    id: VoiceId,
    buffer: DecodedBuffer,
    start_offset: f64,
    audio_time: f64,
    playback_rate: f64,
    gain: GainEnvelope,
    stop_at: f64,
}

impl Voice {
    /// Seconds into the buffer that sound at `time`.
    fn source_position(&self, time: f64) -> f64 {
        (time - self.audio_time).mul_add(self.playback_rate, self.start_offset)
    }

    fn finished_by(&self, time: f64) -> bool {
        time >= self.stop_at || self.source_position(time) >= self.buffer.duration()
    }

    /// Linearly interpolated sample at `position` seconds.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn sample_at(&self, position: f64, channel: u16) -> f32 {
        let exact = position * f64::from(self.buffer.sample_rate());
        let frame = exact.floor();
        let frac = (exact - frame) as f32;
        let frame = frame as usize;

        let a = self.buffer.sample(frame, channel);
        let b = self.buffer.sample(frame + 1, channel);
        (b - a).mul_add(frac, a)
    }
}

struct MixerState {
    voices: Vec<Voice>,
    frames_rendered: u64,
    next_voice: VoiceId,
}

/// Mixes every active voice into interleaved f32 output.
pub struct Mixer {
    sample_rate: u32,
    channels: u16,
    state: Mutex<MixerState>,
}

impl Mixer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            state: Mutex::new(MixerState {
                voices: Vec::new(),
                frames_rendered: 0,
                next_voice: 0,
            }),
        }
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of voices still queued or sounding.
    pub fn active_voices(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Overwrite `out` with the next block of mixed audio and advance the
    /// clock by the frames written.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);

        let channels = usize::from(self.channels);
        let frames = out.len() / channels;
        let rate = f64::from(self.sample_rate);

        let mut state = self.state.lock();
        let first_frame = state.frames_rendered;

        for voice in &state.voices {
            for (frame, block) in out.chunks_exact_mut(channels).enumerate() {
                let time = (first_frame + frame as u64) as f64 / rate;
                if time < voice.audio_time || time >= voice.stop_at {
                    continue;
                }

                let position = voice.source_position(time);
                if position >= voice.buffer.duration() {
                    break;
                }

                let gain = voice.gain.gain_at(time) as f32;
                if gain <= 0.0 {
                    continue;
                }

                for (channel, sample) in (0..self.channels).zip(block.iter_mut()) {
                    *sample += voice.sample_at(position, channel) * gain;
                }
            }
        }

        state.frames_rendered += frames as u64;
        let block_end = state.frames_rendered as f64 / rate;
        state.voices.retain(|voice| {
            let done = voice.finished_by(block_end);
            if done {
                trace!("Voice {} finished", voice.id);
            }
            !done
        });
    }
}

impl AudioClock for Mixer {
    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.state.lock().frames_rendered as f64 / f64::from(self.sample_rate)
    }
}

impl PlaybackSink for Mixer {
    fn play(&self, emission: Emission) -> VoiceId {
        let mut state = self.state.lock();
        let id = state.next_voice;
        state.next_voice += 1;

        trace!(
            "Voice {id}: {:.3}s from {:.3}s at {:.3}s, rate {}",
            emission.buffer.duration(),
            emission.start_offset,
            emission.audio_time,
            emission.playback_rate
        );

        state.voices.push(Voice {
            id,
            buffer: emission.buffer,
            start_offset: emission.start_offset,
            audio_time: emission.audio_time,
            playback_rate: emission.playback_rate,
            gain: emission.gain,
            stop_at: f64::INFINITY,
        });
        id
    }

    fn stop(&self, voice: VoiceId, audio_time: f64) {
        if let Some(voice) = self
            .state
            .lock()
            .voices
            .iter_mut()
            .find(|v| v.id == voice)
        {
            voice.stop_at = voice.stop_at.min(audio_time);
        }
    }
}
