//! Chunk catalogs and the stream details document.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ChunkDescriptor;
use crate::{Error, Result};

/// Tolerance used when checking that consecutive chunks are contiguous.
const CONTIGUITY_EPSILON: f64 = 1e-6;

/// Ordered, contiguous list of chunks making up one stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ChunkCatalog {
    chunks: Vec<ChunkDescriptor>,
}

impl ChunkCatalog {
    /// Build a catalog, checking the contiguity invariant.
    pub fn new(chunks: Vec<ChunkDescriptor>) -> Result<Self> {
        let catalog = Self { chunks };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Check that chunks are non-empty, ordered and contiguous.
    pub fn validate(&self) -> Result<()> {
        if self.chunks.is_empty() {
            return Err(Error::InvalidCatalog("catalog has no chunks".into()));
        }

        for (index, chunk) in self.chunks.iter().enumerate() {
            let finite = chunk.start.is_finite()
                && chunk.duration.is_finite()
                && chunk.overlap_start.is_finite()
                && chunk.overlap_end.is_finite();

            if !finite || chunk.duration <= 0.0 || chunk.overlap_start < 0.0 || chunk.overlap_end < 0.0
            {
                return Err(Error::InvalidCatalog(format!(
                    "chunk {index} has invalid timing: {chunk:?}"
                )));
            }
        }

        for (index, pair) in self.chunks.windows(2).enumerate() {
            let gap = (pair[1].start - pair[0].end()).abs();
            if gap > CONTIGUITY_EPSILON {
                return Err(Error::InvalidCatalog(format!(
                    "chunk {} starts at {} but chunk {index} ends at {}",
                    index + 1,
                    pair[1].start,
                    pair[0].end()
                )));
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChunkDescriptor> {
        self.chunks.get(index)
    }

    pub fn chunks(&self) -> &[ChunkDescriptor] {
        &self.chunks
    }

    /// Total stream duration: end of the last chunk.
    pub fn total_duration(&self) -> f64 {
        self.chunks.last().map_or(0.0, ChunkDescriptor::end)
    }

    /// Wrap an offset into `[0, total_duration)`.
    ///
    /// Negative offsets wrap from the end of the stream.
    pub fn normalize_offset(&self, offset: f64) -> f64 {
        let total = self.total_duration();
        if total <= 0.0 || !offset.is_finite() {
            return 0.0;
        }

        let normalized = offset.rem_euclid(total);
        // rem_euclid can round up to `total` for tiny negative inputs
        if normalized >= total {
            0.0
        } else {
            normalized
        }
    }

    /// Index of the first chunk whose nominal range contains `position`.
    pub fn index_at(&self, position: f64) -> Option<usize> {
        self.chunks.iter().position(|chunk| chunk.contains(position))
    }
}

/// Stream metadata as published by the chunk server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDetails {
    /// Known stream ids.
    #[serde(default)]
    pub list: Vec<String>,
    /// Chunk catalog per stream id.
    #[serde(default)]
    pub details: HashMap<String, ChunkCatalog>,
}

impl StreamDetails {
    /// Stream ids, in published order when a list is present, otherwise sorted.
    pub fn ids(&self) -> Vec<String> {
        if self.list.is_empty() {
            let mut ids: Vec<_> = self.details.keys().cloned().collect();
            ids.sort();
            ids
        } else {
            self.list
                .iter()
                .filter(|id| self.details.contains_key(*id))
                .cloned()
                .collect()
        }
    }

    pub fn get(&self, stream_id: &str) -> Option<&ChunkCatalog> {
        self.details.get(stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn catalog(count: usize, duration: f64, overlap: f64) -> ChunkCatalog {
        let chunks = (0..count)
            .map(|i| {
                let overlap_start = if i == 0 { 0.0 } else { overlap };
                ChunkDescriptor::new(i as f64 * duration, duration, format!("chunk-{i}"))
                    .with_overlaps(overlap_start, overlap)
            })
            .collect();
        ChunkCatalog::new(chunks).unwrap()
    }

    #[test]
    fn test_total_duration() {
        let catalog = catalog(5, 4.0, 0.1);
        assert!((catalog.total_duration() - 20.0).abs() < 1e-12);
        assert_eq!(ChunkCatalog::default().total_duration(), 0.0);
    }

    #[test]
    fn test_rejects_gap() {
        let chunks = vec![
            ChunkDescriptor::new(0.0, 4.0, "a"),
            ChunkDescriptor::new(4.5, 4.0, "b"),
        ];
        assert!(matches!(
            ChunkCatalog::new(chunks),
            Err(Error::InvalidCatalog(_))
        ));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(ChunkCatalog::new(Vec::new()).is_err());
    }

    #[test]
    fn test_index_at_boundaries() {
        let catalog = catalog(3, 4.0, 0.1);
        assert_eq!(catalog.index_at(0.0), Some(0));
        assert_eq!(catalog.index_at(4.0), Some(1));
        assert_eq!(catalog.index_at(11.99), Some(2));
        assert_eq!(catalog.index_at(12.0), None);
    }

    #[test]
    fn test_normalize_offset_wraps() {
        let catalog = catalog(5, 4.0, 0.1);
        assert!((catalog.normalize_offset(25.0) - 5.0).abs() < 1e-9);
        assert!((catalog.normalize_offset(-2.0) - 18.0).abs() < 1e-9);
        assert_eq!(catalog.normalize_offset(f64::NAN), 0.0);
    }

    #[test]
    fn test_details_document() {
        let json = r#"{
            "list": ["b.wav", "a.wav"],
            "details": {
                "a.wav": [{ "start": 0, "duration": 4, "overlapStart": 0, "overlapEnd": 0.1, "url": "/s/a-0.mp3" }],
                "b.wav": [{ "start": 0, "duration": 2, "overlapStart": 0, "overlapEnd": 0, "url": "/s/b-0.mp3" }]
            }
        }"#;

        let details: StreamDetails = serde_json::from_str(json).unwrap();
        assert_eq!(details.ids(), vec!["b.wav".to_string(), "a.wav".to_string()]);
        assert_eq!(details.get("a.wav").unwrap().len(), 1);
        assert!(details.get("c.wav").is_none());
    }

    proptest! {
        #[test]
        fn prop_normalized_offset_in_range(count in 1usize..40, duration in 0.5f64..10.0, offset in -1000.0f64..1000.0) {
            let catalog = catalog(count, duration, 0.05);
            let normalized = catalog.normalize_offset(offset);
            prop_assert!(normalized >= 0.0);
            prop_assert!(normalized < catalog.total_duration());
        }

        #[test]
        fn prop_offset_shift_by_total_is_identity(count in 1usize..40, offset in 0.0f64..100.0) {
            let catalog = catalog(count, 4.0, 0.1);
            let total = catalog.total_duration();
            let a = catalog.normalize_offset(offset);
            let b = catalog.normalize_offset(offset + total);
            // Compare on the circle so values straddling the wrap point agree.
            let diff = (a - b).abs();
            prop_assert!(diff.min(total - diff) < 1e-9);
        }

        #[test]
        fn prop_normalized_offset_has_chunk(count in 1usize..40, offset in 0.0f64..500.0) {
            let catalog = catalog(count, 4.0, 0.1);
            let normalized = catalog.normalize_offset(offset);
            let index = catalog.index_at(normalized);
            prop_assert!(index.is_some());
            prop_assert!(catalog.get(index.unwrap()).unwrap().contains(normalized));
        }
    }
}
