//! Look-ahead scheduler driven by the audio clock.
//!
//! Every tick invokes each registered engine whose requested time falls within
//! `lookahead` of the clock, so emissions are queued on the audio clock slightly
//! before they are due.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::traits::{engine_addr, AudioClock, Scheduled, Scheduler};

/// Default tick period.
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(25);

/// Default look-ahead window in seconds.
pub const DEFAULT_LOOKAHEAD: f64 = 0.1;

struct Entry {
    engine: Arc<dyn Scheduled>,
    time: f64,
}

/// Engine currently inside `advance_time`, and any reschedule that arrived
/// while it was running.
struct InFlight {
    addr: usize,
    rescheduled: Option<f64>,
}

pub struct ClockScheduler {
    clock: Arc<dyn AudioClock>,
    lookahead: f64,
    queue: Mutex<Vec<Entry>>,
    in_flight: Mutex<Option<InFlight>>,
}

impl ClockScheduler {
    pub fn new(clock: Arc<dyn AudioClock>) -> Self {
        Self::with_lookahead(clock, DEFAULT_LOOKAHEAD)
    }

    pub fn with_lookahead(clock: Arc<dyn AudioClock>, lookahead: f64) -> Self {
        Self {
            clock,
            lookahead: lookahead.max(0.0),
            queue: Mutex::new(Vec::new()),
            in_flight: Mutex::new(None),
        }
    }

    /// Number of engines waiting to be invoked.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Invoke every engine due within the look-ahead window.
    ///
    /// An engine asking to be called again inside the window runs again in the
    /// same tick. Returns the number of invocations made.
    pub fn tick(&self) -> usize {
        let now = self.clock.current_time();
        let horizon = now + self.lookahead;
        let mut invoked = 0;

        while let Some(Entry { engine, time }) = self.pop_due(horizon) {
            let next = engine.advance_time(time, time, time - now);
            invoked += 1;

            let mut queue = self.queue.lock();
            let rescheduled = self
                .in_flight
                .lock()
                .take()
                .and_then(|in_flight| in_flight.rescheduled);

            match (next, rescheduled) {
                (Some(_), Some(time)) | (Some(time), None) => {
                    queue.push(Entry { engine, time });
                }
                (None, _) => trace!("Engine finished at {time:.3}s"),
            }
        }

        invoked
    }

    /// Remove the earliest entry due by `horizon` and mark it in flight.
    fn pop_due(&self, horizon: f64) -> Option<Entry> {
        let mut queue = self.queue.lock();
        let index = queue
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.time <= horizon)
            .min_by(|a, b| a.1.time.total_cmp(&b.1.time))
            .map(|(index, _)| index)?;

        let entry = queue.swap_remove(index);
        *self.in_flight.lock() = Some(InFlight {
            addr: engine_addr(&entry.engine),
            rescheduled: None,
        });
        Some(entry)
    }

    /// Tick on the current tokio runtime every `period` until the returned
    /// handle is dropped.
    pub fn run(self: &Arc<Self>, period: Duration) -> SchedulerTask {
        let scheduler = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                scheduler.tick();
            }
        });

        debug!("Scheduler running every {period:?}");
        SchedulerTask { task }
    }
}

impl Scheduler for ClockScheduler {
    fn now(&self) -> f64 {
        self.clock.current_time()
    }

    fn schedule(&self, engine: Arc<dyn Scheduled>, time: f64) {
        self.queue.lock().push(Entry { engine, time });
    }

    fn reschedule(&self, engine: &Arc<dyn Scheduled>, time: f64) {
        let addr = engine_addr(engine);

        let mut queue = self.queue.lock();
        if let Some(entry) = queue.iter_mut().find(|entry| engine_addr(&entry.engine) == addr) {
            entry.time = time;
            return;
        }

        match self.in_flight.lock().as_mut() {
            Some(in_flight) if in_flight.addr == addr => in_flight.rescheduled = Some(time),
            _ => debug!("Reschedule for an engine that is not pending"),
        }
    }
}

/// Background ticking task; stops when dropped.
pub struct SchedulerTask {
    task: JoinHandle<()>,
}

impl Drop for SchedulerTask {
    fn drop(&mut self) {
        self.task.abort();
    }
}
