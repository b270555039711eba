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
use crate::{
    config::StreamConfig,
    dataset::Dataset,
    decode::TextureDecoder,
    fetch::TileFetcher,
    gpu::TileGpu,
    loader::{Completion, LoadOutcome, Loader},
    pool::ResourcePool,
    queue::{Admission, LoadQueue, QueueLimits},
    tile::{Tile, TileState},
};
use anyhow::Result;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use fxhash::FxHashMap;
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tile_address::TileKey;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TileStats {
    pub requested: u64,
    pub deduplicated: u64,
    pub rejected: u64,
    pub dropped_stale: u64,
    pub completed: u64,
    pub network_failures: u64,
    pub errored: u64,
    pub discarded: u64,
    pub evicted: u64,
}

/// Every live tile, keyed by `TileKey`, plus the machinery that loads them.
///
/// Lookups may come from any thread. Loads run on a dedicated worker pool
/// and report back over a channel that the owner drains once per frame.
pub struct TileCache {
    registry: RwLock<FxHashMap<TileKey, Arc<Tile>>>,
    loader: Arc<Loader>,
    workers: rayon::ThreadPool,
    completions: Receiver<Completion>,
    jobs_in_flight: AtomicUsize,
    access_counter: AtomicU64,
    stats: Mutex<TileStats>,
    config: StreamConfig,
}

impl TileCache {
    pub fn new(
        config: StreamConfig,
        fetcher: Arc<dyn TileFetcher>,
        decoder: Arc<dyn TextureDecoder>,
    ) -> Result<Self> {
        let (sender, completions) = channel::unbounded();
        let loader = Loader::new(
            LoadQueue::new(QueueLimits::from_config(&config)),
            fetcher,
            decoder,
            config.cache_root(),
            config.host_rewrites().to_vec(),
            sender,
        );
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads())
            .thread_name(|i| format!("tile-loader-{}", i))
            .build()?;
        debug!(
            "tile cache at {} with {} workers",
            config.cache_root().display(),
            config.worker_threads()
        );
        Ok(Self {
            registry: RwLock::new(FxHashMap::default()),
            loader: Arc::new(loader),
            workers,
            completions,
            jobs_in_flight: AtomicUsize::new(0),
            access_counter: AtomicU64::new(0),
            stats: Mutex::new(TileStats::default()),
            config,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Get or create the tile. Creation is atomic with respect to the
    /// registry: concurrent callers for one key get the same instance.
    pub fn get_tile(&self, dataset: &Arc<Dataset>, level: u32, x: u32, y: u32) -> Result<Arc<Tile>> {
        let key = dataset.key(level, x, y)?;
        if let Some(tile) = self.registry.read().get(&key) {
            return Ok(tile.clone());
        }
        let mut registry = self.registry.write();
        if let Some(tile) = registry.get(&key) {
            return Ok(tile.clone());
        }
        let tile = Arc::new(Tile::new(dataset.clone(), level, x, y)?);
        registry.insert(key, tile.clone());
        Ok(tile)
    }

    pub fn get_cached_tile(&self, key: &TileKey) -> Option<Arc<Tile>> {
        self.registry.read().get(key).cloned()
    }

    pub fn get_cached(&self, dataset: &Dataset, level: u32, x: u32, y: u32) -> Option<Arc<Tile>> {
        dataset
            .key(level, x, y)
            .ok()
            .and_then(|key| self.get_cached_tile(&key))
    }

    /// Ask for a tile to be loaded. Only absent tiles are queued; anything
    /// already on its way reports `Duplicate`.
    pub fn add_tile_to_queue(&self, tile: &Arc<Tile>, high_priority: bool, purge: bool) -> Admission {
        if !tile.transition(TileState::Absent, TileState::Pending) {
            if tile.state().is_loading() {
                self.stats.lock().deduplicated += 1;
                return Admission::Duplicate;
            }
            return Admission::Unneeded;
        }
        let admission =
            self.loader
                .queue
                .push(tile.clone(), high_priority, self.generation(), purge);
        let mut stats = self.stats.lock();
        match admission {
            Admission::Queued => stats.requested += 1,
            Admission::Duplicate => {
                // An evicted instance of this key is still queued or in flight.
                tile.transition(TileState::Pending, TileState::Absent);
                stats.deduplicated += 1;
            }
            Admission::Rejected => {
                tile.transition(TileState::Pending, TileState::Absent);
                stats.rejected += 1;
            }
            Admission::Unneeded => {}
        }
        admission
    }

    /// Start worker jobs for queued requests, up to the in-flight limit.
    pub fn dispatch(&self) -> usize {
        let limit = self.config.max_in_flight();
        let running = self.jobs_in_flight.load(Ordering::Acquire);
        let wanted = self.loader.queue.queued_len().min(limit.saturating_sub(running));
        for _ in 0..wanted {
            self.jobs_in_flight.fetch_add(1, Ordering::AcqRel);
            let loader = self.loader.clone();
            self.workers.spawn(move || loader.run_one());
        }
        wanted
    }

    /// Drain finished jobs without blocking.
    pub fn collect_completions(&self) -> usize {
        let mut count = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.record(completion);
            count += 1;
        }
        count
    }

    fn record(&self, completion: Completion) {
        self.jobs_in_flight.fetch_sub(1, Ordering::AcqRel);
        let mut stats = self.stats.lock();
        stats.dropped_stale += completion.dropped_stale as u64;
        match completion.outcome {
            LoadOutcome::Ready => stats.completed += 1,
            LoadOutcome::Retry => stats.network_failures += 1,
            LoadOutcome::Errored => stats.errored += 1,
            LoadOutcome::Discarded => stats.discarded += 1,
            LoadOutcome::Idle => {}
        }
    }

    /// Advance the frame epoch, returning the new generation.
    pub fn begin_frame(&self) -> u64 {
        self.loader.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn generation(&self) -> u64 {
        self.loader.generation.load(Ordering::Acquire)
    }

    pub fn next_access(&self) -> u64 {
        self.access_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn access_count(&self) -> u64 {
        self.access_counter.load(Ordering::Relaxed)
    }

    /// Per frame housekeeping: drain completions and start new loads.
    pub fn update(&self) {
        let ended = self.collect_completions();
        let started = self.dispatch();
        trace!(
            "tiles:{} q:{} out:{} st:{} ed:{} {:?}",
            self.len(),
            self.loader.queue.queued_len(),
            self.jobs_in_flight.load(Ordering::Acquire),
            started,
            ended,
            self.stats()
        );
    }

    fn is_stale(&self, tile: &Tile, access: u64, generation: u64) -> bool {
        let last_seen = tile.visited_generation().max(tile.rendered_at_or_below());
        access.saturating_sub(tile.last_access()) > self.config.retention_ticks()
            && generation.saturating_sub(last_seen) > self.config.stale_generations()
            && !tile.state().is_loading()
    }

    /// Evict stale tiles, then the least recently used ones beyond the tile
    /// budget. Evicted tiles return their GPU resources to `pool`.
    pub fn reclaim(&self, pool: &mut ResourcePool, gpu: &mut dyn TileGpu) -> usize {
        let access = self.access_count();
        let generation = self.generation();
        let mut victims = Vec::new();
        {
            let mut registry = self.registry.write();
            registry.retain(|_, tile| {
                if self.is_stale(tile, access, generation) {
                    victims.push(tile.clone());
                    false
                } else {
                    true
                }
            });

            let excess = registry.len().saturating_sub(self.config.max_tiles());
            if excess > 0 {
                let mut candidates: Vec<(u64, TileKey)> = registry
                    .values()
                    .filter(|tile| {
                        tile.visited_generation() < generation && !tile.state().is_loading()
                    })
                    .map(|tile| (tile.last_access(), tile.key()))
                    .collect();
                candidates.sort_unstable();
                for (_, key) in candidates.into_iter().take(excess) {
                    if let Some(tile) = registry.remove(&key) {
                        victims.push(tile);
                    }
                }
            }
        }
        for tile in &victims {
            tile.clean_up(pool, gpu);
        }
        if !victims.is_empty() {
            debug!("evicted {} tiles", victims.len());
            self.stats.lock().evicted += victims.len() as u64;
        }
        victims.len()
    }

    pub fn stats(&self) -> TileStats {
        *self.stats.lock()
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn jobs_in_flight(&self) -> usize {
        self.jobs_in_flight.load(Ordering::Acquire)
    }

    pub fn queued_len(&self) -> usize {
        self.loader.queue.queued_len()
    }

    /// Block until every started job has reported back. Nothing new is
    /// started.
    pub fn shutdown_safely(&self) {
        while self.jobs_in_flight() > 0 {
            match self.completions.recv() {
                Ok(completion) => self.record(completion),
                Err(_) => break,
            }
        }
    }

    /// Keep dispatching until the queue drains, or give up after `timeout`.
    /// Returns true if the cache went idle.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.collect_completions();
            self.dispatch();
            if self.jobs_in_flight() == 0 && self.loader.queue.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.completions.recv_timeout(deadline - now) {
                Ok(completion) => self.record(completion),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    /// Drop every tile, returning its resources to `pool`.
    pub fn clear(&self, pool: &mut ResourcePool, gpu: &mut dyn TileGpu) {
        self.shutdown_safely();
        let tiles: Vec<Arc<Tile>> = self.registry.write().drain().map(|(_, t)| t).collect();
        for tile in &tiles {
            tile.clean_up(pool, gpu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::DetailLevel, dataset::DatasetRegistry, decode::ImageDecoder,
        gpu::RecordingGpu, loader::LoadError, tile::TilePayload,
    };
    use std::path::Path;
    use tile_address::{ImageSet, Projection};

    #[derive(Debug)]
    struct Offline;

    impl TileFetcher for Offline {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
            Err(LoadError::Network {
                url: url.to_owned(),
                reason: "offline".to_owned(),
            })
        }
    }

    fn cache(name: &str) -> Result<TileCache> {
        let root = std::env::temp_dir().join(format!("cache-{}-{}", name, std::process::id()));
        let config = StreamConfig::for_level(DetailLevel::Low, Path::new(&root))
            .with_worker_threads(1)
            .with_retention(0, 2)
            .with_max_tiles(1000);
        TileCache::new(config, Arc::new(Offline), Arc::new(ImageDecoder))
    }

    fn dataset() -> Result<Arc<Dataset>> {
        DatasetRegistry::default().register(ImageSet::new(
            "m",
            "http://m/{L}/{X}/{Y}.png",
            Projection::Mercator,
        ))
    }

    #[test]
    fn test_get_or_create_is_stable() -> Result<()> {
        let cache = cache("stable")?;
        let dataset = dataset()?;
        let a = cache.get_tile(&dataset, 2, 1, 3)?;
        let b = cache.get_tile(&dataset, 2, 1, 3)?;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.get_cached(&dataset, 2, 1, 2).is_none());
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn test_concurrent_get_or_create() -> Result<()> {
        let cache = Arc::new(cache("concurrent")?);
        let dataset = dataset()?;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let dataset = dataset.clone();
                std::thread::spawn(move || cache.get_tile(&dataset, 5, 7, 9).map(|t| t.key()))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().map(|r| r.is_ok()).unwrap_or(false));
        }
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn test_queue_admission() -> Result<()> {
        let cache = cache("admission")?;
        let dataset = dataset()?;
        let tile = cache.get_tile(&dataset, 1, 0, 0)?;
        assert_eq!(cache.add_tile_to_queue(&tile, true, false), Admission::Queued);
        assert_eq!(cache.add_tile_to_queue(&tile, true, false), Admission::Duplicate);
        assert_eq!(cache.stats().requested, 1);
        assert_eq!(cache.stats().deduplicated, 1);
        assert!(cache.wait_for_idle(Duration::from_secs(10)));
        assert_eq!(cache.stats().network_failures, 1);
        assert_eq!(tile.state(), TileState::Absent);
        Ok(())
    }

    #[test]
    fn test_reclaim_returns_pool_to_baseline() -> Result<()> {
        let cache = cache("reclaim")?;
        let dataset = dataset()?;
        let mut gpu = RecordingGpu::new();
        let mut pool = ResourcePool::new(8);

        cache.begin_frame();
        let tile = cache.get_tile(&dataset, 1, 1, 1)?;
        tile.set_state(TileState::Pending);
        assert!(tile.publish(TilePayload::default()));
        tile.visit(cache.generation());
        tile.touch(cache.next_access());
        assert!(tile.create_geometry(&mut pool, &mut gpu, true, || None)?);
        assert_eq!(pool.vertex_buffers_on_loan(), 1);

        // Fresh tiles survive.
        assert_eq!(cache.reclaim(&mut pool, &mut gpu), 0);
        for _ in 0..3 {
            cache.begin_frame();
            cache.next_access();
        }
        assert_eq!(cache.reclaim(&mut pool, &mut gpu), 1);
        assert_eq!(pool.vertex_buffers_on_loan(), 0);
        assert!(cache.get_cached_tile(&tile.key()).is_none());
        assert_eq!(cache.get_tile(&dataset, 1, 1, 1)?.state(), TileState::Absent);
        assert_eq!(cache.stats().evicted, 1);
        Ok(())
    }

    #[test]
    fn test_tile_budget() -> Result<()> {
        let cache = cache("budget")?;
        let dataset = dataset()?;
        let small = TileCache::new(
            cache.config().clone().with_max_tiles(2).with_retention(1_000_000, 1_000_000),
            Arc::new(Offline),
            Arc::new(ImageDecoder),
        )?;
        let mut gpu = RecordingGpu::new();
        let mut pool = ResourcePool::new(8);
        small.begin_frame();
        for x in 0..4 {
            small.get_tile(&dataset, 2, x, 0)?.touch(small.next_access());
        }
        small.begin_frame();
        assert_eq!(small.reclaim(&mut pool, &mut gpu), 2);
        assert!(small.get_cached(&dataset, 2, 0, 0).is_none());
        assert!(small.get_cached(&dataset, 2, 3, 0).is_some());
        Ok(())
    }
}
