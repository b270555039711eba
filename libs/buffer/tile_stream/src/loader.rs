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
    decode::TextureDecoder,
    elevation::ElevationGrid,
    fetch::TileFetcher,
    queue::{LoadQueue, LoadRequest},
    table::Table,
    tile::{Tile, TilePayload, TileState},
};
use crossbeam::channel::Sender;
use log::{debug, warn};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tile_address::{dem_path, dem_url, imagery_path, tile_url, HostRewrite, Projection, TileKey};

#[derive(Debug, Error)]
pub enum LoadError {
    /// Not fatal: the tile goes back to absent and is asked for again on
    /// its next visit.
    #[error("fetch of {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("corrupt payload: {0}")]
    Corrupt(String),

    #[error("unsupported payload: {0}")]
    Unsupported(String),
}

/// How one load job ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadOutcome {
    Ready,
    /// Network failure; the tile is absent again.
    Retry,
    Errored,
    /// The tile was evicted or changed hands while the job ran.
    Discarded,
    /// The job found nothing to do.
    Idle,
}

#[derive(Copy, Clone, Debug)]
pub struct Completion {
    pub key: Option<TileKey>,
    pub outcome: LoadOutcome,
    pub dropped_stale: usize,
}

/// The state shared by every worker job.
#[derive(Debug)]
pub(crate) struct Loader {
    pub(crate) queue: LoadQueue,
    pub(crate) generation: AtomicU64,
    fetcher: Arc<dyn TileFetcher>,
    decoder: Arc<dyn TextureDecoder>,
    cache_root: PathBuf,
    host_rewrites: Vec<HostRewrite>,
    completions: Sender<Completion>,
}

impl Loader {
    pub(crate) fn new(
        queue: LoadQueue,
        fetcher: Arc<dyn TileFetcher>,
        decoder: Arc<dyn TextureDecoder>,
        cache_root: &Path,
        host_rewrites: Vec<HostRewrite>,
        completions: Sender<Completion>,
    ) -> Self {
        Self {
            queue,
            generation: AtomicU64::new(0),
            fetcher,
            decoder,
            cache_root: cache_root.to_owned(),
            host_rewrites,
            completions,
        }
    }

    /// Body of one worker job: claim the best request and load it. Exactly
    /// one completion is sent per call.
    pub(crate) fn run_one(&self) {
        let popped = self.queue.pop(self.generation.load(Ordering::Relaxed));
        for tile in &popped.stale {
            tile.transition(TileState::Pending, TileState::Absent);
        }
        let completion = match popped.request {
            Some(request) => {
                let key = request.tile.key();
                let outcome = self.load(&request);
                self.queue.finish(key);
                Completion {
                    key: Some(key),
                    outcome,
                    dropped_stale: popped.stale.len(),
                }
            }
            None => Completion {
                key: None,
                outcome: LoadOutcome::Idle,
                dropped_stale: popped.stale.len(),
            },
        };
        // The receiver only goes away when the cache is dropped.
        self.completions.send(completion).ok();
    }

    pub(crate) fn load(&self, request: &LoadRequest) -> LoadOutcome {
        let tile = &request.tile;
        if !tile.transition(TileState::Pending, TileState::Fetching) {
            return LoadOutcome::Discarded;
        }
        if request.purge {
            self.purge(tile);
        }
        match self.load_payload(tile) {
            Ok(payload) => {
                if tile.publish(payload) {
                    debug!("{:?} ready", tile);
                    LoadOutcome::Ready
                } else {
                    LoadOutcome::Discarded
                }
            }
            Err(LoadError::Network { url, reason }) => {
                debug!("{:?} not ready, fetch of {} failed: {}", tile, url, reason);
                if tile.transition(TileState::Fetching, TileState::Absent)
                    || tile.transition(TileState::Decoding, TileState::Absent)
                {
                    LoadOutcome::Retry
                } else {
                    LoadOutcome::Discarded
                }
            }
            Err(e) => {
                warn!("{:?} errored: {}", tile, e);
                if tile.transition(TileState::Fetching, TileState::Errored)
                    || tile.transition(TileState::Decoding, TileState::Errored)
                {
                    LoadOutcome::Errored
                } else {
                    LoadOutcome::Discarded
                }
            }
        }
    }

    fn load_payload(&self, tile: &Tile) -> Result<TilePayload, LoadError> {
        let dataset = tile.dataset();
        let image_set = dataset.image_set();
        let (level, x, y) = (tile.level(), tile.x(), tile.y());
        let mut payload = TilePayload::default();

        let wants_imagery = !image_set.catalog() || dataset.is_catalog_level(level);
        if wants_imagery {
            let path = imagery_path(&self.cache_root, image_set, level, x, y);
            let url = tile_url(image_set, level, x, y, &self.host_rewrites);
            let bytes = self.cached_or_fetched(&path, &url)?;
            tile.transition(TileState::Fetching, TileState::Decoding);
            let decoded = if dataset.is_catalog_level(level) {
                Table::load(&bytes, '\t')
                    .map(|table| payload.catalog = Some(table))
                    .map_err(|e| LoadError::Corrupt(e.to_string()))
            } else {
                self.decoder
                    .decode(&bytes, image_set.extension(), image_set.srgb())
                    .map(|texture| payload.texture = Some(texture))
            };
            if let Err(e) = decoded {
                remove_quietly(&path);
                return Err(e);
            }
        } else {
            tile.transition(TileState::Fetching, TileState::Decoding);
        }

        if dataset.wants_elevation() {
            match self.load_elevation(tile) {
                Ok(Some(grid)) => payload.elevation = Some(grid),
                Ok(None) => payload.elevation_unavailable = true,
                Err(LoadError::Network { url, reason }) => {
                    debug!("{:?} elevation unavailable from {}: {}", tile, url, reason);
                    payload.elevation_unavailable = true;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(payload)
    }

    /// Own elevation samples, or None when the layout calls for a parent
    /// derived fallback.
    fn load_elevation(&self, tile: &Tile) -> Result<Option<ElevationGrid>, LoadError> {
        let dataset = tile.dataset();
        let image_set = dataset.image_set();
        let (level, x, y) = (tile.level(), tile.x(), tile.y());
        let path = dem_path(&self.cache_root, image_set, level, x, y);
        let url = dem_url(image_set, level, x, y);
        let bytes = self.cached_or_fetched(&path, &url)?;

        if image_set.projection() == Projection::Mercator {
            if let Some(codec) = dataset.dem_codec() {
                if let Some(hd) = codec.decompress(&bytes) {
                    return Ok(ElevationGrid::from_hd(hd.as_ref()));
                }
            }
        }
        let grid = ElevationGrid::decode_raw(&bytes, dataset.projection().dem_sample_count());
        if grid.is_none() {
            debug!(
                "{:?} elevation of {} bytes falls back to parent",
                tile,
                bytes.len()
            );
        }
        Ok(grid)
    }

    /// Read from the disk cache, or fetch and persist. Zero length files
    /// are corrupt and get deleted.
    fn cached_or_fetched(&self, path: &Path, url: &str) -> Result<Vec<u8>, LoadError> {
        match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => {
                warn!("deleting empty cache file {}", path.display());
                remove_quietly(path);
                return Err(LoadError::Corrupt(format!("{} is empty", path.display())));
            }
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LoadError::Network {
                    url: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
        if url.is_empty() {
            return Err(LoadError::Unsupported(format!(
                "no url for {}",
                path.display()
            )));
        }
        let bytes = self.fetcher.fetch(url)?;
        if bytes.is_empty() {
            return Err(LoadError::Corrupt(format!("{} returned no data", url)));
        }
        if let Err(e) = persist(path, &bytes) {
            warn!("could not cache {}: {}", path.display(), e);
        }
        Ok(bytes)
    }

    fn purge(&self, tile: &Tile) {
        let dataset = tile.dataset();
        let image_set = dataset.image_set();
        let (level, x, y) = (tile.level(), tile.x(), tile.y());
        remove_quietly(&imagery_path(&self.cache_root, image_set, level, x, y));
        if dataset.wants_elevation() {
            remove_quietly(&dem_path(&self.cache_root, image_set, level, x, y));
        }
    }
}

fn persist(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("could not delete {}: {}", path.display(), e);
        }
    }
}
