//! Chunk playback engine.
//!
//! A [`StreamPlaybackEngine`] plays one attached stream once. The scheduler
//! calls its step function at every chunk boundary: each call consumes the
//! decoded buffer of the current chunk, emits it with a cross-fade envelope on
//! the audio clock and reports when the following chunk is due. A periodic
//! prefetch monitor keeps the buffers ahead of the play position decoded.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use seamless_core::{ChunkCatalog, EngineConfig, Error, Result};
use tracing::{debug, info, trace, warn};

use crate::buffer::{BufferCache, DecodedBuffer};
use crate::envelope::Envelope;
use crate::prefetch::{plan_prefetch, PrefetchMonitor};
use crate::traits::{
    AudioClock, CatalogSource, ChunkDecoder, Collaborators, Emission, PlaybackSink, Scheduled,
    Scheduler, VoiceId,
};

/// Emitted voices kept per session so termination can silence any that may
/// still be sounding (the current chunk and the tail of the previous one).
const TRACKED_VOICES: usize = 2;

/// Play offsets below this are treated as the chunk's nominal start.
const CONTIGUITY_EPSILON: f64 = 1e-9;

/// Lifecycle of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not started yet.
    #[default]
    Idle,
    /// Started and not yet ended.
    Active,
    /// Ended; the engine cannot be restarted.
    Terminated,
}

/// Mutable state of one playback run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSession {
    /// Scheduler time playback began at.
    pub start_at: f64,
    /// Scheduler time playback ends at.
    pub stop_at: f64,
    /// Stream position at `start_at`, normalized into the stream duration.
    pub offset: f64,
    /// Chunk the next step plays. Never decreases.
    pub chunk_index: usize,
    /// Time the scheduler was last asked to call back at.
    pub next_required_time: Option<f64>,
    voices: Vec<VoiceId>,
}

impl PlaybackSession {
    /// Stream position at scheduler time `time`.
    pub fn position_at(&self, time: f64) -> f64 {
        time - self.start_at + self.offset
    }

    /// Scheduler time at which stream position `position` plays.
    pub fn time_of(&self, position: f64) -> f64 {
        self.start_at - self.offset + position
    }
}

enum Phase {
    Idle,
    Active(PlaybackSession),
    Terminated,
}

struct AttachedStream {
    id: String,
    catalog: Arc<ChunkCatalog>,
    cache: BufferCache,
}

struct EngineState {
    stream: Option<AttachedStream>,
    phase: Phase,
    playback_rate: f64,
    monitor: Option<PrefetchMonitor>,
}

/// Identifies a registered ended listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type EndedCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct EndedListeners {
    next_id: u64,
    entries: Vec<(ListenerId, EndedCallback)>,
    fired: bool,
}

impl EndedListeners {
    fn add(&mut self, callback: EndedCallback) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        if self.fired {
            debug!("Session already ended, ended listener will never fire");
        } else {
            self.entries.push((id, callback));
        }
        id
    }

    fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    fn take_for_firing(&mut self) -> Vec<EndedCallback> {
        self.fired = true;
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(_, callback)| callback)
            .collect()
    }
}

/// Rolls an unfinished start back to `Idle` if its future is dropped while
/// the initial chunk is still decoding.
struct PendingStart<'a, D> {
    inner: &'a EngineInner<D>,
    loading: Option<usize>,
    armed: bool,
}

impl<D> PendingStart<'_, D> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<D> Drop for PendingStart<'_, D> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = self.inner.state.lock();
        if matches!(state.phase, Phase::Active(_)) {
            state.phase = Phase::Idle;
        }
        if let (Some(index), Some(stream)) = (self.loading, state.stream.as_mut()) {
            stream.cache.complete_load(index, None);
        }
        debug!("Start cancelled before the first step was scheduled");
    }
}

struct EngineInner<D> {
    config: EngineConfig,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn AudioClock>,
    sink: Arc<dyn PlaybackSink>,
    source: Arc<dyn CatalogSource>,
    decoder: Arc<D>,
    state: Mutex<EngineState>,
    ended: Mutex<EndedListeners>,
}

/// Plays one chunked stream with cross-faded chunk seams.
pub struct StreamPlaybackEngine<D: ChunkDecoder> {
    inner: Arc<EngineInner<D>>,
}

impl<D: ChunkDecoder> Clone for StreamPlaybackEngine<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: ChunkDecoder> StreamPlaybackEngine<D> {
    /// Create an idle engine with no stream attached.
    pub fn new(config: EngineConfig, collaborators: Collaborators<D>) -> Result<Self> {
        config.validate()?;

        let Collaborators {
            scheduler,
            clock,
            sink,
            source,
            decoder,
        } = collaborators;

        let playback_rate = config.playback_rate;

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                scheduler,
                clock,
                sink,
                source,
                decoder,
                state: Mutex::new(EngineState {
                    stream: None,
                    phase: Phase::Idle,
                    playback_rate,
                    monitor: None,
                }),
                ended: Mutex::new(EndedListeners::default()),
            }),
        })
    }

    /// Bind the engine to a stream, seeding its buffer cache from the preload
    /// cache.
    pub fn attach(&self, stream_id: &str) -> Result<()> {
        let catalog = self
            .inner
            .source
            .catalog(stream_id)
            .ok_or_else(|| Error::InvalidStream(stream_id.to_string()))?;
        catalog.validate()?;

        let preloaded = self.inner.source.preloaded(stream_id);
        let cache = BufferCache::seeded(catalog.len(), &preloaded);

        let mut state = self.inner.state.lock();
        if !matches!(state.phase, Phase::Idle) {
            return Err(Error::AttachAfterStart);
        }

        debug!(
            "Attached stream {stream_id}: {} chunks, {} preloaded",
            catalog.len(),
            cache.present_count()
        );

        state.stream = Some(AttachedStream {
            id: stream_id.to_string(),
            catalog,
            cache,
        });

        Ok(())
    }

    /// Start playback.
    ///
    /// `when == 0` starts at the scheduler's current time. `offset` wraps
    /// around the stream duration. A positive `duration` bounds the session,
    /// otherwise it runs to the end of the stream. Returns once the first chunk
    /// is decoded.
    pub async fn start(&self, when: f64, offset: f64, duration: Option<f64>) -> Result<()> {
        let (start_at, initial_load) = {
            let mut state = self.inner.state.lock();
            if !matches!(state.phase, Phase::Idle) {
                return Err(Error::DoubleStart);
            }

            let stream = state.stream.as_mut().ok_or(Error::NotAttached)?;
            let catalog = Arc::clone(&stream.catalog);

            let start_at = if when == 0.0 {
                self.inner.scheduler.now()
            } else {
                when
            };
            let offset = catalog.normalize_offset(offset);
            let stop_at = match duration {
                Some(duration) if duration > 0.0 => start_at + duration,
                _ => start_at + (catalog.total_duration() - offset),
            };
            let chunk_index = catalog.index_at(offset).unwrap_or(0);

            let initial_load = if stream.cache.begin_load(chunk_index) {
                catalog
                    .get(chunk_index)
                    .map(|chunk| (chunk_index, chunk.location.clone()))
            } else {
                None
            };

            info!(
                "Starting stream {} at {start_at:.3}s from offset {offset:.3}s (chunk {chunk_index}), stops at {stop_at:.3}s",
                stream.id
            );

            state.phase = Phase::Active(PlaybackSession {
                start_at,
                stop_at,
                offset,
                chunk_index,
                next_required_time: None,
                voices: Vec::with_capacity(TRACKED_VOICES),
            });

            (start_at, initial_load)
        };

        let pending = PendingStart {
            inner: &self.inner,
            loading: initial_load.as_ref().map(|(index, _)| *index),
            armed: true,
        };

        if let Some((index, location)) = initial_load {
            debug!("Waiting for initial chunk {index}");
            let result = self.inner.decoder.decode(&location).await;
            self.inner.finish_load(index, &location, result);
        }

        let weak = Arc::downgrade(&self.inner);
        let monitor = PrefetchMonitor::spawn(self.inner.config.monitor_period(), move || {
            Weak::upgrade(&weak).is_some_and(|inner| inner.prefetch_tick())
        });

        let first_step = {
            let mut state = self.inner.state.lock();
            let EngineState {
                phase,
                monitor: running,
                ..
            } = &mut *state;

            match phase {
                Phase::Active(session) => {
                    // A stop issued while decoding may already precede start_at
                    let first_step = start_at.min(session.stop_at);
                    session.next_required_time = Some(first_step);
                    *running = Some(monitor);
                    Some(first_step)
                }
                Phase::Idle | Phase::Terminated => None,
            }
        };
        pending.disarm();

        if let Some(first_step) = first_step {
            self.inner.scheduler.schedule(self.handle(), first_step);
        }
        Ok(())
    }

    /// Request playback to end at `when` (`0` meaning now).
    ///
    /// Stop only ever shortens a session. Calls after the session ended are
    /// ignored.
    pub fn stop(&self, when: f64) -> Result<()> {
        let when = if when == 0.0 {
            self.inner.scheduler.now()
        } else {
            when
        };

        let reschedule = {
            let mut state = self.inner.state.lock();
            match &mut state.phase {
                Phase::Idle => return Err(Error::StopBeforeStart),
                Phase::Terminated => {
                    debug!("Stop ignored, session already ended");
                    return Ok(());
                }
                Phase::Active(session) => {
                    if when >= session.stop_at {
                        debug!(
                            "Stop at {when:.3}s ignored, session already ends at {:.3}s",
                            session.stop_at
                        );
                        return Ok(());
                    }

                    session.stop_at = when;
                    let earlier = session
                        .next_required_time
                        .is_some_and(|next| when < next);
                    if earlier {
                        session.next_required_time = Some(when);
                    }
                    earlier
                }
            }
        };

        if reschedule {
            debug!("Bringing next step forward to {when:.3}s");
            self.inner.scheduler.reschedule(&self.handle(), when);
        }

        Ok(())
    }

    /// Register a callback run once when the session ends.
    pub fn add_ended_listener<F>(&self, callback: F) -> ListenerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.ended.lock().add(Box::new(callback))
    }

    /// Unregister an ended listener. Returns false if it was not registered.
    pub fn remove_ended_listener(&self, id: ListenerId) -> bool {
        self.inner.ended.lock().remove(id)
    }

    /// Replace every ended listener with `callback`.
    pub fn set_on_ended<F>(&self, callback: F) -> ListenerId
    where
        F: FnOnce() + Send + 'static,
    {
        let mut listeners = self.inner.ended.lock();
        listeners.entries.clear();
        listeners.add(Box::new(callback))
    }

    /// Change the rate applied to chunks emitted from now on.
    pub fn set_playback_rate(&self, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::Config(format!(
                "playback rate must be positive, got {rate}"
            )));
        }
        self.inner.state.lock().playback_rate = rate;
        Ok(())
    }

    pub fn playback_rate(&self) -> f64 {
        self.inner.state.lock().playback_rate
    }

    /// Run one prefetch monitor tick immediately.
    ///
    /// Returns false once the session is no longer active.
    pub fn prefetch_tick(&self) -> bool {
        self.inner.prefetch_tick()
    }

    /// Handle the scheduler invokes the step function through.
    pub fn handle(&self) -> Arc<dyn Scheduled> {
        let inner: Arc<dyn Scheduled> = self.inner.clone();
        inner
    }

    pub fn state(&self) -> SessionState {
        match self.inner.state.lock().phase {
            Phase::Idle => SessionState::Idle,
            Phase::Active(_) => SessionState::Active,
            Phase::Terminated => SessionState::Terminated,
        }
    }

    /// Snapshot of the active session.
    pub fn session(&self) -> Option<PlaybackSession> {
        match &self.inner.state.lock().phase {
            Phase::Active(session) => Some(session.clone()),
            Phase::Idle | Phase::Terminated => None,
        }
    }

    pub fn stream_id(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .stream
            .as_ref()
            .map(|stream| stream.id.clone())
    }

    /// Duration of the attached stream in seconds.
    pub fn duration(&self) -> Option<f64> {
        self.inner
            .state
            .lock()
            .stream
            .as_ref()
            .map(|stream| stream.catalog.total_duration())
    }

    /// Whether chunk `index` is decoded and waiting to be played.
    pub fn is_buffered(&self, index: usize) -> bool {
        self.with_cache(|cache| cache.is_present(index))
    }

    /// Whether a decode for chunk `index` is in flight.
    pub fn is_loading(&self, index: usize) -> bool {
        self.with_cache(|cache| cache.is_loading(index))
    }

    /// Number of decoded chunks currently held.
    pub fn buffered_chunks(&self) -> usize {
        self.with_cache(BufferCache::present_count)
    }

    /// Whether the prefetch monitor is still running.
    pub fn is_monitoring(&self) -> bool {
        self.inner
            .state
            .lock()
            .monitor
            .as_ref()
            .is_some_and(|monitor| !monitor.is_finished())
    }

    fn with_cache<T: Default>(&self, f: impl FnOnce(&BufferCache) -> T) -> T {
        self.inner
            .state
            .lock()
            .stream
            .as_ref()
            .map(|stream| f(&stream.cache))
            .unwrap_or_default()
    }
}

impl<D: ChunkDecoder> EngineInner<D> {
    fn prefetch_tick(self: &Arc<Self>) -> bool {
        let now = self.scheduler.now();

        let requests = {
            let mut state = self.state.lock();
            let EngineState { stream, phase, .. } = &mut *state;

            let (Phase::Active(session), Some(stream)) = (phase, stream.as_mut()) else {
                return false;
            };

            let advance_threshold =
                session.position_at(now) + self.config.required_advance_threshold;
            let planned = plan_prefetch(
                &stream.catalog,
                &stream.cache,
                session.chunk_index,
                advance_threshold,
            );

            trace!(
                "Prefetch tick: threshold {advance_threshold:.3}s, requesting {planned:?}"
            );

            planned
                .into_iter()
                .filter(|&index| stream.cache.begin_load(index))
                .filter_map(|index| {
                    stream
                        .catalog
                        .get(index)
                        .map(|chunk| (index, chunk.location.clone()))
                })
                .collect::<Vec<_>>()
        };

        for (index, location) in requests {
            self.spawn_load(index, location);
        }

        true
    }

    fn spawn_load(self: &Arc<Self>, index: usize, location: String) {
        let weak = Arc::downgrade(self);
        let decoder = Arc::clone(&self.decoder);

        tokio::spawn(async move {
            let result = decoder.decode(&location).await;
            if let Some(inner) = weak.upgrade() {
                inner.finish_load(index, &location, result);
            }
        });
    }

    fn finish_load(&self, index: usize, location: &str, result: Result<DecodedBuffer>) {
        let mut state = self.state.lock();
        let Some(stream) = state.stream.as_mut() else {
            return;
        };

        match result {
            Ok(buffer) => {
                if stream.cache.complete_load(index, Some(buffer)) {
                    trace!("Chunk {index} decoded");
                }
            }
            Err(e) => {
                warn!("Failed to load chunk {index} ({location}): {e}");
                stream.cache.complete_load(index, None);
            }
        }
    }

    /// Tear the session down and notify listeners.
    fn terminate(&self, mut state: parking_lot::MutexGuard<'_, EngineState>, audio_time: f64) {
        let voices = match std::mem::replace(&mut state.phase, Phase::Terminated) {
            Phase::Active(session) => session.voices,
            Phase::Idle | Phase::Terminated => Vec::new(),
        };

        if let Some(monitor) = state.monitor.take() {
            monitor.stop();
        }
        if let Some(stream) = state.stream.as_mut() {
            stream.cache.release();
            info!("Stream {} ended", stream.id);
        }
        drop(state);

        for voice in voices {
            self.sink.stop(voice, audio_time);
        }

        let listeners = self.ended.lock().take_for_firing();
        for listener in listeners {
            listener();
        }
    }
}

impl<D: ChunkDecoder> Scheduled for EngineInner<D> {
    fn advance_time(&self, current_time: f64, audio_time: f64, _dt: f64) -> Option<f64> {
        let mut state = self.state.lock();

        let stop_at = match &state.phase {
            Phase::Active(session) => session.stop_at,
            Phase::Idle | Phase::Terminated => {
                debug!("Step called on an inactive session");
                return None;
            }
        };

        if current_time >= stop_at {
            self.terminate(state, audio_time);
            return None;
        }

        let EngineState {
            stream,
            phase,
            playback_rate,
            ..
        } = &mut *state;
        let playback_rate = *playback_rate;

        let (Phase::Active(session), Some(stream)) = (phase, stream.as_mut()) else {
            return None;
        };

        let catalog = Arc::clone(&stream.catalog);
        let index = session.chunk_index;
        let chunk = catalog.get(index)?;

        let position = session.position_at(current_time);
        let buffer = stream.cache.take(index);
        // Drift from recomputing chunk start times lands on either side of zero
        let mut chunk_offset = position - chunk.start;
        if chunk_offset < CONTIGUITY_EPSILON {
            chunk_offset = 0.0;
        }
        let mut audio_time = audio_time;

        let now = self.scheduler.now();
        if now > current_time {
            let lateness = now - current_time;
            chunk_offset += lateness;
            audio_time = self.clock.current_time();
            debug!("Step for chunk {index} is {lateness:.4}s late");
        }

        match buffer {
            Some(buffer) => {
                let envelope = Envelope::compute(chunk, chunk_offset, self.config.resume_fade);
                let voice = self.sink.play(Emission {
                    buffer,
                    start_offset: chunk_offset,
                    audio_time,
                    playback_rate,
                    gain: envelope.gain_curve(audio_time),
                });

                if session.voices.len() == TRACKED_VOICES {
                    session.voices.remove(0);
                }
                session.voices.push(voice);
            }
            None => {
                warn!("Chunk {index} not buffered, skipping");
            }
        }

        let next = match catalog.get(index + 1) {
            Some(next_chunk) => {
                session.chunk_index = index + 1;
                session.time_of(next_chunk.start)
            }
            None => session.stop_at,
        };
        let next = next.min(session.stop_at);
        session.next_required_time = Some(next);

        Some(next)
    }
}
