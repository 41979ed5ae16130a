//! In-memory collaborators for driving engines in tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use seamless_core::{ChunkCatalog, ChunkDescriptor, EngineConfig, Error, Result, StreamDetails};

use crate::buffer::DecodedBuffer;
use crate::engine::StreamPlaybackEngine;
use crate::registry::StreamRegistry;
use crate::traits::{
    same_engine, AudioClock, ChunkDecoder, Collaborators, Emission, PlaybackSink, Scheduled,
    Scheduler, VoiceId,
};

pub const STREAM_ID: &str = "stream.wav";
const TEST_RATE: u32 = 100;

/// `count` contiguous four second chunks located at `chunk-{i}`.
pub fn test_catalog(count: usize) -> ChunkCatalog {
    let chunks = (0..count)
        .map(|i| {
            ChunkDescriptor::new(i as f64 * 4.0, 4.0, format!("chunk-{i}"))
                .with_overlaps(if i == 0 { 0.0 } else { 0.1 }, 0.1)
        })
        .collect();
    ChunkCatalog::new(chunks).unwrap()
}

/// Audio clock moved by hand.
#[derive(Default)]
pub struct ManualClock {
    time: Mutex<f64>,
}

impl ManualClock {
    pub fn set(&self, time: f64) {
        *self.time.lock() = time;
    }
}

impl AudioClock for ManualClock {
    fn current_time(&self) -> f64 {
        *self.time.lock()
    }
}

/// Scheduler that only records requests; tests pump it explicitly.
pub struct RecordingScheduler {
    clock: Arc<ManualClock>,
    entries: Mutex<Vec<(Arc<dyn Scheduled>, f64)>>,
    schedules: AtomicUsize,
    reschedules: AtomicUsize,
}

impl RecordingScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(Vec::new()),
            schedules: AtomicUsize::new(0),
            reschedules: AtomicUsize::new(0),
        }
    }

    pub fn schedule_calls(&self) -> usize {
        self.schedules.load(Ordering::SeqCst)
    }

    pub fn reschedule_calls(&self) -> usize {
        self.reschedules.load(Ordering::SeqCst)
    }

    /// Earliest pending invocation time.
    pub fn pending_time(&self) -> Option<f64> {
        self.entries
            .lock()
            .iter()
            .map(|(_, time)| *time)
            .min_by(f64::total_cmp)
    }

    fn pop_next(&self) -> Option<(Arc<dyn Scheduled>, f64)> {
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .enumerate()
            .min_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            .map(|(index, _)| index)?;
        Some(entries.remove(index))
    }

    fn requeue(&self, engine: Arc<dyn Scheduled>, time: f64) {
        self.entries.lock().push((engine, time));
    }
}

impl Scheduler for RecordingScheduler {
    fn now(&self) -> f64 {
        self.clock.current_time()
    }

    fn schedule(&self, engine: Arc<dyn Scheduled>, time: f64) {
        self.schedules.fetch_add(1, Ordering::SeqCst);
        self.requeue(engine, time);
    }

    fn reschedule(&self, engine: &Arc<dyn Scheduled>, time: f64) {
        self.reschedules.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|(entry, _)| same_engine(entry, engine)) {
            Some(entry) => entry.1 = time,
            None => entries.push((Arc::clone(engine), time)),
        }
    }
}

/// Sink that remembers every emission and stop.
#[derive(Default)]
pub struct RecordingSink {
    emissions: Mutex<Vec<Emission>>,
    stops: Mutex<Vec<(VoiceId, f64)>>,
    next_voice: AtomicU64,
}

impl RecordingSink {
    pub fn emissions(&self) -> Vec<Emission> {
        self.emissions.lock().clone()
    }

    pub fn stops(&self) -> Vec<(VoiceId, f64)> {
        self.stops.lock().clone()
    }
}

impl PlaybackSink for RecordingSink {
    fn play(&self, emission: Emission) -> VoiceId {
        self.emissions.lock().push(emission);
        self.next_voice.fetch_add(1, Ordering::SeqCst)
    }

    fn stop(&self, voice: VoiceId, audio_time: f64) {
        self.stops.lock().push((voice, audio_time));
    }
}

/// Decoder producing a constant buffer per `chunk-{i}` location whose samples
/// all equal `i`.
#[derive(Default)]
pub struct ScriptedDecoder {
    requested: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
}

impl ScriptedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer the decoder returns for chunk `index`.
    pub fn buffer_for(index: usize) -> DecodedBuffer {
        let frames = (4.1 * f64::from(TEST_RATE)) as usize;
        DecodedBuffer::new(vec![index as f32; frames], TEST_RATE, 1)
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }

    pub fn clear_requested(&self) {
        self.requested.lock().clear();
    }

    pub fn fail(&self, location: &str) {
        self.failing.lock().insert(location.to_string());
    }

    pub fn recover(&self, location: &str) {
        self.failing.lock().remove(location);
    }

    /// Make decodes of `location` never complete.
    pub fn stall(&self, location: &str) {
        self.stalled.lock().insert(location.to_string());
    }

    pub fn unstall(&self, location: &str) {
        self.stalled.lock().remove(location);
    }

    fn resolve(&self, location: &str) -> Result<DecodedBuffer> {
        if self.failing.lock().contains(location) {
            return Err(Error::DecodeFailure(format!("scripted failure for {location}")));
        }

        location
            .rsplit_once('-')
            .and_then(|(_, index)| index.parse::<usize>().ok())
            .map(Self::buffer_for)
            .ok_or_else(|| Error::DecodeFailure(format!("unknown location {location}")))
    }
}

impl ChunkDecoder for ScriptedDecoder {
    fn decode(&self, location: &str) -> impl Future<Output = Result<DecodedBuffer>> + Send {
        self.requested.lock().push(location.to_string());
        let result = self.resolve(location);
        let stalled = self.stalled.lock().contains(location);
        async move {
            if stalled {
                std::future::pending::<()>().await;
            }
            result
        }
    }
}

/// One engine's worth of recording collaborators around a single stream.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub scheduler: Arc<RecordingScheduler>,
    pub sink: Arc<RecordingSink>,
    pub decoder: Arc<ScriptedDecoder>,
    pub registry: Arc<StreamRegistry>,
    config: EngineConfig,
}

impl Harness {
    pub fn new(catalog: ChunkCatalog) -> Self {
        Self::with_config(catalog, EngineConfig::default())
    }

    pub fn with_config(catalog: ChunkCatalog, config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let registry = StreamRegistry::from_details(StreamDetails {
            list: vec![STREAM_ID.to_string()],
            details: HashMap::from([(STREAM_ID.to_string(), catalog)]),
        });

        Self {
            scheduler: Arc::new(RecordingScheduler::new(Arc::clone(&clock))),
            clock,
            sink: Arc::new(RecordingSink::default()),
            decoder: Arc::new(ScriptedDecoder::new()),
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn engine(&self) -> StreamPlaybackEngine<ScriptedDecoder> {
        StreamPlaybackEngine::new(
            self.config.clone(),
            Collaborators {
                scheduler: self.scheduler.clone(),
                clock: self.clock.clone(),
                sink: self.sink.clone(),
                source: self.registry.clone(),
                decoder: Arc::clone(&self.decoder),
            },
        )
        .unwrap()
    }

    /// An engine already attached to the harness stream.
    pub fn attached(&self) -> StreamPlaybackEngine<ScriptedDecoder> {
        let engine = self.engine();
        engine.attach(STREAM_ID).unwrap();
        engine
    }

    /// Mark chunks as preloaded before attaching.
    pub fn preload(&self, indices: &[usize]) {
        for &index in indices {
            self.registry
                .insert_preloaded(STREAM_ID, index, ScriptedDecoder::buffer_for(index));
        }
    }

    /// Run the earliest pending step, re-queuing the engine if it asks to be
    /// called again.
    pub fn step(&self, engine: &StreamPlaybackEngine<ScriptedDecoder>) -> Option<f64> {
        let (handle, time) = self.scheduler.pop_next()?;
        assert!(same_engine(&handle, &engine.handle()));

        let next = handle.advance_time(time, time, 0.0);
        if let Some(next) = next {
            self.scheduler.requeue(handle, next);
        }
        next
    }

    /// Pump the scheduler until the engine removes itself.
    pub fn run_to_end(
        &self,
        engine: &StreamPlaybackEngine<ScriptedDecoder>,
    ) -> Vec<(f64, Option<f64>)> {
        let mut steps = Vec::new();
        while let Some(time) = self.scheduler.pending_time() {
            let next = self.step(engine);
            steps.push((time, next));
            assert!(steps.len() < 10_000, "engine never terminated");
            if next.is_none() {
                break;
            }
        }
        steps
    }

    /// Chunk index a scripted buffer was decoded for.
    pub fn chunk_of(&self, buffer: &DecodedBuffer) -> usize {
        buffer.sample(0, 0) as usize
    }

    /// Let spawned decode tasks run to completion.
    pub async fn settle_decodes(&self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }
}
