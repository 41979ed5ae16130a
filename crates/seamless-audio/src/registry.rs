//! Known streams and their preloaded leading buffers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use seamless_core::{ChunkCatalog, StreamDetails};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::buffer::DecodedBuffer;
use crate::traits::{CatalogSource, ChunkDecoder};

/// Catalogs for every published stream plus a cache of decoded buffers for
/// the first chunks of each, so new sessions can start without waiting.
#[derive(Default)]
pub struct StreamRegistry {
    ids: RwLock<Vec<String>>,
    catalogs: RwLock<HashMap<String, Arc<ChunkCatalog>>>,
    preload: RwLock<HashMap<String, Vec<Option<DecodedBuffer>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a details document.
    pub fn from_details(details: StreamDetails) -> Self {
        let registry = Self::new();
        registry.update(details);
        registry
    }

    /// Replace the known streams.
    ///
    /// Catalogs that break the contiguity invariant are skipped. Preloaded
    /// buffers of streams that disappeared, or whose catalog changed, are
    /// dropped.
    pub fn update(&self, details: StreamDetails) {
        let mut ids = Vec::new();
        let mut catalogs = HashMap::new();

        for id in details.ids() {
            let Some(catalog) = details.details.get(&id) else {
                continue;
            };

            if let Err(e) = catalog.validate() {
                warn!("Skipping stream {id}: {e}");
                continue;
            }

            ids.push(id.clone());
            catalogs.insert(id, Arc::new(catalog.clone()));
        }

        {
            let previous = self.catalogs.read();
            let mut preload = self.preload.write();
            preload.retain(|id, _| {
                let unchanged = previous.get(id).zip(catalogs.get(id)).is_some_and(|(a, b)| a == b);
                if !unchanged {
                    debug!("Dropping preloaded buffers for {id}");
                }
                unchanged
            });
        }

        info!("Registered {} streams", ids.len());
        *self.catalogs.write() = catalogs;
        *self.ids.write() = ids;
    }

    /// Stream ids in published order.
    pub fn ids(&self) -> Vec<String> {
        self.ids.read().clone()
    }

    /// Total duration of a stream in seconds.
    pub fn duration(&self, stream_id: &str) -> Option<f64> {
        self.catalogs
            .read()
            .get(stream_id)
            .map(|catalog| catalog.total_duration())
    }

    /// Store a decoded buffer for chunk `index` of a stream.
    pub fn insert_preloaded(&self, stream_id: &str, index: usize, buffer: DecodedBuffer) {
        let mut preload = self.preload.write();
        let slots = preload.entry(stream_id.to_string()).or_default();
        if slots.len() <= index {
            slots.resize(index + 1, None);
        }
        slots[index] = Some(buffer);
    }

    /// Number of preloaded buffers held for a stream.
    pub fn preloaded_count(&self, stream_id: &str) -> usize {
        self.preload
            .read()
            .get(stream_id)
            .map_or(0, |slots| slots.iter().flatten().count())
    }

    /// Decode the first `count` chunks of every stream into the preload cache.
    ///
    /// Failures are logged and skipped. Returns the number of buffers stored.
    pub async fn preload_start_buffers<D: ChunkDecoder>(&self, decoder: Arc<D>, count: usize) -> usize {
        let mut tasks = JoinSet::new();

        let requests: Vec<(String, usize, String)> = self
            .catalogs
            .read()
            .iter()
            .flat_map(|(id, catalog)| {
                catalog
                    .chunks()
                    .iter()
                    .take(count)
                    .enumerate()
                    .map(|(index, chunk)| (id.clone(), index, chunk.location.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (id, index, location) in requests {
            let decoder = Arc::clone(&decoder);
            tasks.spawn(async move {
                let result = decoder.decode(&location).await;
                (id, index, location, result)
            });
        }

        let mut stored = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, index, _, Ok(buffer))) => {
                    self.insert_preloaded(&id, index, buffer);
                    stored += 1;
                }
                Ok((id, index, location, Err(e))) => {
                    warn!("Failed to preload chunk {index} of {id} ({location}): {e}");
                }
                Err(e) => {
                    warn!("Preload task failed: {e}");
                }
            }
        }

        debug!("Preloaded {stored} buffers");
        stored
    }
}

impl CatalogSource for StreamRegistry {
    fn catalog(&self, stream_id: &str) -> Option<Arc<ChunkCatalog>> {
        self.catalogs.read().get(stream_id).cloned()
    }

    fn preloaded(&self, stream_id: &str) -> Vec<Option<DecodedBuffer>> {
        self.preload
            .read()
            .get(stream_id)
            .cloned()
            .unwrap_or_default()
    }
}
