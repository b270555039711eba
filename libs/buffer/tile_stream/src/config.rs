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
use anyhow::{anyhow, bail, Error, Result};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};
use structopt::StructOpt;
use tile_address::HostRewrite;

fn parse_level_str(s: &str) -> Result<DetailLevel> {
    Ok(match s {
        "low" | "lo" | "0" => DetailLevel::Low,
        "medium" | "med" | "1" => DetailLevel::Medium,
        "high" | "hi" | "2" => DetailLevel::High,
        "ultra" | "max" | "3" => DetailLevel::Ultra,
        _ => bail!("unrecognized detail level; expected low, medium, high, or ultra"),
    })
}

/// Baseline cost of the streaming machinery. Individual knobs can still be
/// adjusted after picking a level.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DetailLevel {
    Low,
    Medium,
    High,
    Ultra,
}

impl DetailLevel {
    pub fn detect() -> Self {
        if cfg!(debug_assertions) {
            Self::Low
        } else {
            Self::High
        }
    }
}

impl FromStr for DetailLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_level_str(s)
    }
}

#[derive(Clone, Debug, StructOpt)]
pub struct StreamOpts {
    /// Set the tile streaming detail level (low, medium, high, or ultra)
    #[structopt(long)]
    tile_detail: Option<DetailLevel>,

    /// Directory holding downloaded tiles
    #[structopt(long, parse(from_os_str))]
    cache_root: Option<PathBuf>,

    /// Number of background tile loaders
    #[structopt(long)]
    workers: Option<usize>,
}

impl StreamOpts {
    pub fn detail(&self) -> DetailLevel {
        self.tile_detail.unwrap_or_else(DetailLevel::detect)
    }

    pub fn stream_config(&self) -> StreamConfig {
        let cache_root = self
            .cache_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tile_stream"));
        let mut config = StreamConfig::for_level(self.detail(), &cache_root);
        if let Some(workers) = self.workers {
            config = config.with_worker_threads(workers);
        }
        config
    }
}

/// Tunables for the cache, the load queue and the reclamation pass.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    cache_root: PathBuf,

    // Background loader threads.
    worker_threads: usize,

    // Loads allowed to run at once, overall and for any one image set.
    max_in_flight: usize,
    max_in_flight_per_dataset: usize,

    // Waiting requests kept for any one image set before new ones are refused.
    max_queued_per_dataset: usize,

    // A queued request whose tile has not been visited for this many frames
    // is dropped instead of serviced.
    stale_request_generations: u64,

    // A tile is reclaimable once both this many access ticks and this many
    // frames have passed without it being touched or rendered.
    retention_ticks: u64,
    stale_generations: u64,

    // Above this many resident tiles, the oldest non-visible tiles are
    // reclaimed regardless of age.
    max_tiles: usize,

    // Free buffers kept per shape before extras are destroyed.
    max_pooled_per_shape: usize,

    host_rewrites: Vec<HostRewrite>,
}

impl StreamConfig {
    #[allow(clippy::too_many_arguments)]
    fn new(
        cache_root: &Path,
        worker_threads: usize,
        max_in_flight: usize,
        max_queued_per_dataset: usize,
        retention_ticks: u64,
        stale_generations: u64,
        max_tiles: usize,
        max_pooled_per_shape: usize,
    ) -> Self {
        Self {
            cache_root: cache_root.to_owned(),
            worker_threads,
            max_in_flight,
            max_in_flight_per_dataset: max_in_flight,
            max_queued_per_dataset,
            stale_request_generations: 30,
            retention_ticks,
            stale_generations,
            max_tiles,
            max_pooled_per_shape,
            host_rewrites: HostRewrite::legacy_defaults(),
        }
    }

    pub fn for_level(level: DetailLevel, cache_root: &Path) -> Self {
        match level {
            DetailLevel::Low => Self::new(cache_root, 2, 4, 128, 10_000, 60, 1_000, 16),
            DetailLevel::Medium => Self::new(cache_root, 4, 8, 256, 20_000, 60, 2_000, 32),
            DetailLevel::High => Self::new(cache_root, 6, 12, 512, 40_000, 120, 4_000, 64),
            DetailLevel::Ultra => Self::new(cache_root, 8, 16, 1024, 80_000, 120, 8_000, 128),
        }
    }

    /// Overlay settings from a json document onto these. Unknown keys are
    /// rejected so typos do not silently fall back to defaults.
    pub fn overlay_json(mut self, data: &str) -> Result<Self> {
        let json = json::parse(data)?;
        for (key, value) in json.entries() {
            let as_count = || {
                value
                    .as_u64()
                    .ok_or_else(|| anyhow!("stream config {} must be a non-negative integer", key))
            };
            match key {
                "cache_root" => {
                    self.cache_root = PathBuf::from(
                        value
                            .as_str()
                            .ok_or_else(|| anyhow!("stream config cache_root must be a string"))?,
                    )
                }
                "worker_threads" => self.worker_threads = as_count()? as usize,
                "max_in_flight" => self.max_in_flight = as_count()? as usize,
                "max_in_flight_per_dataset" => {
                    self.max_in_flight_per_dataset = as_count()? as usize
                }
                "max_queued_per_dataset" => self.max_queued_per_dataset = as_count()? as usize,
                "stale_request_generations" => self.stale_request_generations = as_count()?,
                "retention_ticks" => self.retention_ticks = as_count()?,
                "stale_generations" => self.stale_generations = as_count()?,
                "max_tiles" => self.max_tiles = as_count()? as usize,
                "max_pooled_per_shape" => self.max_pooled_per_shape = as_count()? as usize,
                "host_rewrites" => {
                    let mut rewrites = Vec::new();
                    for entry in value.members() {
                        let from = entry["from"]
                            .as_str()
                            .ok_or_else(|| anyhow!("host rewrite must have a from"))?;
                        let to = entry["to"]
                            .as_str()
                            .ok_or_else(|| anyhow!("host rewrite must have a to"))?;
                        rewrites.push(HostRewrite::new(from, to));
                    }
                    self.host_rewrites = rewrites;
                }
                _ => bail!("unknown stream config key: {}", key),
            }
        }
        Ok(self)
    }

    pub fn with_cache_root(mut self, cache_root: &Path) -> Self {
        self.cache_root = cache_root.to_owned();
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize, per_dataset: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self.max_in_flight_per_dataset = per_dataset;
        self
    }

    pub fn with_max_queued_per_dataset(mut self, max_queued: usize) -> Self {
        self.max_queued_per_dataset = max_queued;
        self
    }

    pub fn with_stale_request_generations(mut self, generations: u64) -> Self {
        self.stale_request_generations = generations;
        self
    }

    pub fn with_retention(mut self, ticks: u64, generations: u64) -> Self {
        self.retention_ticks = ticks;
        self.stale_generations = generations;
        self
    }

    pub fn with_max_tiles(mut self, max_tiles: usize) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn with_host_rewrites(mut self, rewrites: Vec<HostRewrite>) -> Self {
        self.host_rewrites = rewrites;
        self
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads.max(1)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.max(1)
    }

    pub fn max_in_flight_per_dataset(&self) -> usize {
        self.max_in_flight_per_dataset.max(1)
    }

    pub fn max_queued_per_dataset(&self) -> usize {
        self.max_queued_per_dataset
    }

    pub fn stale_request_generations(&self) -> u64 {
        self.stale_request_generations
    }

    pub fn retention_ticks(&self) -> u64 {
        self.retention_ticks
    }

    pub fn stale_generations(&self) -> u64 {
        self.stale_generations
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles
    }

    pub fn max_pooled_per_shape(&self) -> usize {
        self.max_pooled_per_shape
    }

    pub fn host_rewrites(&self) -> &[HostRewrite] {
        &self.host_rewrites
    }
}

/// Per-frame traversal tunables. Passed into every render call so that
/// callers can vary them independently.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    /// Larger values subdivide sooner. The screen-space edge threshold is
    /// `400 - image_quality` pixels.
    pub image_quality: f64,

    /// Stereo rendering keeps the first two levels unconditionally.
    pub stereo: bool,

    /// Dome projection disables crossfading.
    pub dome: bool,

    /// Frame dumping for domes wants much finer tiles.
    pub dome_frame_dump: bool,

    pub oversample_terrain: bool,

    /// Crossfade quadrants over `blend_duration_ms` for sky and panorama sets.
    pub blend_enabled: bool,
    pub blend_duration_ms: u64,

    /// Pick crack-filling index variants against coarser neighbours.
    pub use_accommodation: bool,

    /// Requests for tiles that block an otherwise complete frame jump the queue.
    pub make_high_priority: bool,

    pub show_elevation: bool,

    /// Delete cached files for visited tiles and fetch them again.
    pub purge_refresh: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            image_quality: 50f64,
            stereo: false,
            dome: false,
            dome_frame_dump: false,
            oversample_terrain: false,
            blend_enabled: true,
            blend_duration_ms: 500,
            use_accommodation: true,
            make_high_priority: true,
            show_elevation: true,
            purge_refresh: false,
        }
    }
}

impl RenderConfig {
    pub fn for_level(level: DetailLevel) -> Self {
        let image_quality = match level {
            DetailLevel::Low => -50f64,
            DetailLevel::Medium => 0f64,
            DetailLevel::High => 50f64,
            DetailLevel::Ultra => 150f64,
        };
        Self {
            image_quality,
            ..Default::default()
        }
    }

    /// Screen-space length, in pixels, that a tile edge must reach before the
    /// tile is subdivided.
    pub fn edge_threshold(&self) -> f64 {
        if self.oversample_terrain {
            return 150f64;
        }
        // Dome frame dumps always run at quality -200.
        let quality = if self.dome_frame_dump {
            -200f64
        } else {
            self.image_quality
        };
        400f64 - quality
    }

    /// Levels at or below this one are subdivided without a size test.
    pub fn min_tested_level(&self) -> u32 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}
