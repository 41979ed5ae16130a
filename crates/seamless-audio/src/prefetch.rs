//! Look-ahead prefetching of chunk buffers.

use std::time::Duration;

use seamless_core::ChunkCatalog;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::buffer::BufferCache;

/// Chunk indices that must be requested to cover `advance_threshold`.
///
/// Walks forward from `from_index` while chunks start at or before the
/// threshold, skipping indices that are already decoded or in flight.
pub fn plan_prefetch(
    catalog: &ChunkCatalog,
    cache: &BufferCache,
    from_index: usize,
    advance_threshold: f64,
) -> Vec<usize> {
    catalog
        .chunks()
        .iter()
        .enumerate()
        .skip(from_index)
        .take_while(|(_, chunk)| chunk.start <= advance_threshold)
        .filter(|(index, _)| cache.needs_load(*index))
        .map(|(index, _)| index)
        .collect()
}

/// Handle to a periodic prefetch task.
///
/// The task stops when its tick callback returns false, when
/// [`stop`](Self::stop) is called, or when the handle is dropped.
pub struct PrefetchMonitor {
    task: JoinHandle<()>,
}

impl PrefetchMonitor {
    /// Spawn the monitor on the current tokio runtime.
    ///
    /// The first tick runs immediately.
    pub fn spawn<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if !tick() {
                    trace!("Prefetch monitor finished");
                    break;
                }
            }
        });

        Self { task }
    }

    /// Cancel the monitor.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PrefetchMonitor {
    fn drop(&mut self) {
        // Never leave a timer running past its session
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::buffer::DecodedBuffer;
    use seamless_core::ChunkDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn catalog(count: usize) -> ChunkCatalog {
        let chunks = (0..count)
            .map(|i| {
                ChunkDescriptor::new(i as f64 * 4.0, 4.0, format!("chunk-{i}")).with_overlaps(
                    if i == 0 { 0.0 } else { 0.1 },
                    0.1,
                )
            })
            .collect();
        ChunkCatalog::new(chunks).unwrap()
    }

    #[test]
    fn test_plan_covers_horizon_only() {
        let catalog = catalog(10);
        let cache = BufferCache::new(catalog.len());

        // Position 5 with 10 seconds of look-ahead: starts 4, 8, 12 qualify
        let planned = plan_prefetch(&catalog, &cache, 1, 5.0 + 10.0);
        assert_eq!(planned, vec![1, 2, 3]);
    }

    #[test]
    fn test_plan_skips_cached_and_in_flight() {
        let catalog = catalog(10);
        let mut cache = BufferCache::new(catalog.len());
        cache.begin_load(2);
        cache.begin_load(3);
        cache.complete_load(3, Some(DecodedBuffer::silence(0.01, 8000, 1)));

        let planned = plan_prefetch(&catalog, &cache, 1, 15.0);
        assert_eq!(planned, vec![1]);
    }

    #[test]
    fn test_plan_includes_chunk_starting_on_threshold() {
        let catalog = catalog(10);
        let cache = BufferCache::new(catalog.len());
        assert_eq!(plan_prefetch(&catalog, &cache, 0, 8.0), vec![0, 1, 2]);
    }

    #[test]
    fn test_plan_past_end_is_empty() {
        let catalog = catalog(3);
        let cache = BufferCache::new(catalog.len());
        assert!(plan_prefetch(&catalog, &cache, 3, 100.0).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_ticks_until_callback_declines() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let monitor = PrefetchMonitor::spawn(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst) < 2
        });

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(monitor.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_monitor_cancels_timer() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();

        let monitor = PrefetchMonitor::spawn(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let seen = ticks.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        drop(monitor);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
