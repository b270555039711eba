// This file is part of Nitrogen.
//
// Nitrogen is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Nitrogen is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Nitrogen.  If not, see <http://www.gnu.org/licenses/>.
use crate::{config::StreamConfig, tile::{Tile, TileState}};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;
use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};
use tile_address::{DatasetSlot, TileKey};

#[derive(Copy, Clone, Debug)]
pub struct QueueLimits {
    pub max_in_flight: usize,
    pub max_in_flight_per_dataset: usize,
    pub max_queued_per_dataset: usize,
    /// Requests for tiles not visited in this many frames are dropped.
    pub stale_request_generations: u64,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            max_in_flight_per_dataset: 4,
            max_queued_per_dataset: 256,
            stale_request_generations: 30,
        }
    }
}

impl QueueLimits {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight(),
            max_in_flight_per_dataset: config.max_in_flight_per_dataset(),
            max_queued_per_dataset: config.max_queued_per_dataset(),
            stale_request_generations: config.stale_request_generations(),
        }
    }
}

#[derive(Debug)]
pub struct LoadRequest {
    pub tile: Arc<Tile>,
    pub high_priority: bool,
    pub generation: u64,
    /// Delete cached files before loading.
    pub purge: bool,
    seq: u64,
}

impl LoadRequest {
    pub fn new(tile: Arc<Tile>, high_priority: bool, generation: u64, purge: bool) -> Self {
        Self {
            tile,
            high_priority,
            generation,
            purge,
            seq: 0,
        }
    }
}

// Max-heap order: high priority first, then the most recent frame, then
// coarser tiles, then first come first served.
impl Ord for LoadRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.high_priority
            .cmp(&other.high_priority)
            .then(self.generation.cmp(&other.generation))
            .then(other.tile.level().cmp(&self.tile.level()))
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for LoadRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LoadRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LoadRequest {}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Admission {
    Queued,
    /// Already queued or in flight.
    Duplicate,
    /// The dataset's queue is full.
    Rejected,
    /// The tile is ready or errored and needs no load.
    Unneeded,
}

#[derive(Debug, Default)]
pub struct Popped {
    pub request: Option<LoadRequest>,
    /// Requests dropped because nobody looked at their tile recently.
    pub stale: Vec<Arc<Tile>>,
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<LoadRequest>,
    queued: FxHashSet<TileKey>,
    in_flight: FxHashMap<TileKey, DatasetSlot>,
    queued_per_dataset: FxHashMap<DatasetSlot, usize>,
    in_flight_per_dataset: FxHashMap<DatasetSlot, usize>,
    next_seq: u64,
}

/// The shared priority queue between the render thread, which pushes, and
/// the workers, which pop. A key is never queued or in flight twice.
#[derive(Debug)]
pub struct LoadQueue {
    inner: Mutex<QueueInner>,
    limits: QueueLimits,
}

impl LoadQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            limits,
        }
    }

    pub fn push(&self, tile: Arc<Tile>, high_priority: bool, generation: u64, purge: bool) -> Admission {
        let key = tile.key();
        let slot = key.slot();
        let mut inner = self.inner.lock();
        if inner.queued.contains(&key) || inner.in_flight.contains_key(&key) {
            return Admission::Duplicate;
        }
        let queued = inner.queued_per_dataset.entry(slot).or_insert(0);
        if *queued >= self.limits.max_queued_per_dataset {
            return Admission::Rejected;
        }
        *queued += 1;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.queued.insert(key);
        inner.heap.push(LoadRequest {
            tile,
            high_priority,
            generation,
            purge,
            seq,
        });
        Admission::Queued
    }

    /// Claim the best request that may run now. Requests whose tile has
    /// gone stale or no longer waits for a load are dropped on the way.
    pub fn pop(&self, current_generation: u64) -> Popped {
        let mut popped = Popped::default();
        let mut inner = self.inner.lock();
        if inner.in_flight.len() >= self.limits.max_in_flight {
            return popped;
        }
        let mut deferred = Vec::new();
        while let Some(request) = inner.heap.pop() {
            let key = request.tile.key();
            let slot = key.slot();
            inner.queued.remove(&key);
            if let Some(count) = inner.queued_per_dataset.get_mut(&slot) {
                *count = count.saturating_sub(1);
            }

            if request.tile.state() != TileState::Pending {
                continue;
            }
            let last_seen = request.tile.visited_generation().max(request.generation);
            if current_generation.saturating_sub(last_seen) > self.limits.stale_request_generations {
                popped.stale.push(request.tile);
                continue;
            }
            let running = inner.in_flight_per_dataset.get(&slot).copied().unwrap_or(0);
            if running >= self.limits.max_in_flight_per_dataset {
                deferred.push(request);
                continue;
            }

            *inner.in_flight_per_dataset.entry(slot).or_insert(0) += 1;
            inner.in_flight.insert(key, slot);
            popped.request = Some(request);
            break;
        }
        for request in deferred {
            let key = request.tile.key();
            inner.queued.insert(key);
            *inner.queued_per_dataset.entry(key.slot()).or_insert(0) += 1;
            inner.heap.push(request);
        }
        popped
    }

    /// Release the in-flight claim on a key.
    pub fn finish(&self, key: TileKey) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.in_flight.remove(&key) {
            if let Some(count) = inner.in_flight_per_dataset.get_mut(&slot) {
                *count = count.saturating_sub(1);
            }
        }
    }

    pub fn queued_len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    #[cfg(test)]
    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    #[cfg(test)]
    pub fn is_queued_or_in_flight(&self, key: &TileKey) -> bool {
        let inner = self.inner.lock();
        inner.queued.contains(key) || inner.in_flight.contains_key(key)
    }

    pub fn is_idle(&self) -> bool {
        let inner = self.inner.lock();
        inner.heap.is_empty() && inner.in_flight.is_empty()
    }
}
