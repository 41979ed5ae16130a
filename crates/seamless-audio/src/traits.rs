//! Collaborator interfaces the playback engine is built against.
//!
//! The engine never talks to a concrete host: clocks, scheduling, decoding,
//! catalog lookup and audio output are all injected through these traits.

use std::future::Future;
use std::sync::Arc;

use seamless_core::{ChunkCatalog, Result};

use crate::buffer::DecodedBuffer;
use crate::envelope::GainEnvelope;

/// Reads the real-time audio clock, in seconds.
pub trait AudioClock: Send + Sync {
    fn current_time(&self) -> f64;
}

/// Something a [`Scheduler`] invokes at self-reported times.
pub trait Scheduled: Send + Sync {
    /// Advance to `current_time`.
    ///
    /// `audio_time` is the audio clock time corresponding to `current_time`,
    /// `dt` how far ahead of the clock the call is made. Returns the next time
    /// to be invoked at, or `None` to be removed from the scheduler.
    fn advance_time(&self, current_time: f64, audio_time: f64, dt: f64) -> Option<f64>;
}

/// Drives [`Scheduled`] engines forward in time.
pub trait Scheduler: Send + Sync {
    /// Current scheduler time, aligned with the audio clock.
    fn now(&self) -> f64;

    /// Register `engine` for one invocation at `time`.
    fn schedule(&self, engine: Arc<dyn Scheduled>, time: f64);

    /// Move the pending invocation of `engine` to `time`.
    fn reschedule(&self, engine: &Arc<dyn Scheduled>, time: f64);
}

/// Whether two scheduled handles point at the same engine.
///
/// Compares data addresses only, vtable pointers are not stable across
/// codegen units.
pub fn same_engine(a: &Arc<dyn Scheduled>, b: &Arc<dyn Scheduled>) -> bool {
    engine_addr(a) == engine_addr(b)
}

pub(crate) fn engine_addr(engine: &Arc<dyn Scheduled>) -> usize {
    Arc::as_ptr(engine).cast::<()>() as usize
}

/// Fetches and decodes one chunk payload.
pub trait ChunkDecoder: Send + Sync + 'static {
    fn decode(&self, location: &str) -> impl Future<Output = Result<DecodedBuffer>> + Send;
}

/// Resolves stream ids to catalogs and already preloaded buffers.
pub trait CatalogSource: Send + Sync {
    fn catalog(&self, stream_id: &str) -> Option<Arc<ChunkCatalog>>;

    /// Buffers decoded ahead of time for the stream, indexed by chunk.
    fn preloaded(&self, stream_id: &str) -> Vec<Option<DecodedBuffer>>;
}

/// Identifies one emitted buffer inside a [`PlaybackSink`].
pub type VoiceId = u64;

/// A request to play one decoded chunk.
#[derive(Debug, Clone)]
pub struct Emission {
    pub buffer: DecodedBuffer,
    /// Seconds into the buffer playback starts at.
    pub start_offset: f64,
    /// Audio clock time the first sample sounds at.
    pub audio_time: f64,
    pub playback_rate: f64,
    pub gain: GainEnvelope,
}

/// Accepts timed emissions. Playing is fire-and-forget.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, emission: Emission) -> VoiceId;

    /// Silence `voice` from `audio_time` on.
    fn stop(&self, voice: VoiceId, audio_time: f64);
}

/// Everything a playback engine needs from its host.
pub struct Collaborators<D> {
    pub scheduler: Arc<dyn Scheduler>,
    pub clock: Arc<dyn AudioClock>,
    pub sink: Arc<dyn PlaybackSink>,
    pub source: Arc<dyn CatalogSource>,
    pub decoder: Arc<D>,
}

impl<D> Clone for Collaborators<D> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            clock: Arc::clone(&self.clock),
            sink: Arc::clone(&self.sink),
            source: Arc::clone(&self.source),
            decoder: Arc::clone(&self.decoder),
        }
    }
}
