//! Per-stream slot cache of decoded chunk buffers.
//!
//! Each chunk index owns one slot that moves through
//! `Absent -> Loading -> Present -> Absent`. A buffer is handed out at most
//! once: [`BufferCache::take`] empties the slot it reads.

use tracing::trace;

use super::DecodedBuffer;

/// State of one chunk slot.
#[derive(Debug, Clone, Default)]
pub enum Slot {
    /// Nothing cached and nothing in flight.
    #[default]
    Absent,
    /// A decode request is in flight.
    Loading,
    /// Decoded and waiting to be played.
    Present(DecodedBuffer),
}

/// Bounded slot map keyed by chunk index.
#[derive(Debug, Default)]
pub struct BufferCache {
    slots: Vec<Slot>,
    released: bool,
}

impl BufferCache {
    /// Create an empty cache for a catalog of `len` chunks.
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![Slot::Absent; len],
            released: false,
        }
    }

    /// Create a cache seeded with already decoded buffers.
    ///
    /// Entries past `len` are ignored.
    pub fn seeded(len: usize, preloaded: &[Option<DecodedBuffer>]) -> Self {
        let mut cache = Self::new(len);
        for (slot, buffer) in cache.slots.iter_mut().zip(preloaded) {
            if let Some(buffer) = buffer {
                *slot = Slot::Present(buffer.clone());
            }
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn is_present(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Slot::Present(_)))
    }

    pub fn is_loading(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Slot::Loading))
    }

    /// Whether a decode request should be issued for `index`.
    pub fn needs_load(&self, index: usize) -> bool {
        !self.released && matches!(self.slots.get(index), Some(Slot::Absent))
    }

    /// Mark `index` as in flight. Returns false if the slot is not absent.
    pub fn begin_load(&mut self, index: usize) -> bool {
        if !self.needs_load(index) {
            return false;
        }
        self.slots[index] = Slot::Loading;
        true
    }

    /// Resolve an in-flight load.
    ///
    /// `None` reports a failed decode and returns the slot to `Absent` so a
    /// later request may retry. Returns true if a buffer was stored; results
    /// arriving after [`release`](Self::release) are dropped.
    pub fn complete_load(&mut self, index: usize, buffer: Option<DecodedBuffer>) -> bool {
        if self.released {
            trace!(index, "dropping decode result for released cache");
            return false;
        }

        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };

        if !matches!(slot, Slot::Loading) {
            trace!(index, "ignoring decode result for slot that is not loading");
            return false;
        }

        match buffer {
            Some(buffer) => {
                *slot = Slot::Present(buffer);
                true
            }
            None => {
                *slot = Slot::Absent;
                false
            }
        }
    }

    /// Consume the buffer at `index`, leaving the slot absent.
    ///
    /// An in-flight load is left untouched.
    pub fn take(&mut self, index: usize) -> Option<DecodedBuffer> {
        let slot = self.slots.get_mut(index)?;
        match std::mem::take(slot) {
            Slot::Present(buffer) => Some(buffer),
            Slot::Loading => {
                *slot = Slot::Loading;
                None
            }
            Slot::Absent => None,
        }
    }

    /// Drop every buffer and refuse further loads.
    pub fn release(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::Absent;
        }
        self.released = true;
    }

    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// Number of slots currently holding a buffer.
    pub fn present_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Present(_)))
            .count()
    }

    /// Number of slots with a decode in flight.
    pub fn loading_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Loading))
            .count()
    }
}
