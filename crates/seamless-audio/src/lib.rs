//! # seamless-audio
//!
//! Chunked stream playback engine for seamless.
//!
//! Features:
//! - Cross-faded playback of overlapping chunks, scheduled on the audio clock
//! - Look-ahead prefetching of decoded chunk buffers
//! - Symphonia decoding and a cpal-driven software mixer

pub mod buffer;
pub mod decode;
pub mod engine;
pub mod envelope;
pub mod mixer;
pub mod output;
pub mod prefetch;
pub mod registry;
pub mod scheduler;
pub mod traits;

#[cfg(test)]
mod testing;

pub use buffer::{BufferCache, DecodedBuffer};
pub use engine::{ListenerId, PlaybackSession, SessionState, StreamPlaybackEngine};
pub use envelope::{Envelope, GainEnvelope, GainEvent};
pub use mixer::Mixer;
pub use output::AudioOutput;
pub use registry::StreamRegistry;
pub use scheduler::{ClockScheduler, SchedulerTask};
pub use traits::{
    AudioClock, CatalogSource, ChunkDecoder, Collaborators, Emission, PlaybackSink, Scheduled,
    Scheduler, VoiceId,
};
