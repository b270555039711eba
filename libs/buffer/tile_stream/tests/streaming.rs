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
use anyhow::Result;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use nalgebra::{Matrix4, Perspective3, Point3, Vector3};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tile_address::{dem_path, imagery_path, tile_bounds, DataSetType};
use tile_stream::{
    elevation::{DemCodec, DemFormat, HdElevation, DEM_SCALE_FACTOR},
    Admission, DatasetRegistry, DetailLevel, DrawCall, FrameContext, ImageDecoder, ImageSet,
    LoadError, Projection, RecordingGpu, RenderConfig, ResourcePool, StreamConfig, TileCache,
    TileFetcher, TileRenderer, TileState, Viewport,
};

const IDLE: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct CountingFetcher {
    // Served for urls containing the key; everything else gets the png.
    overrides: Vec<(String, Vec<u8>)>,
    // Urls containing any of these fail as if the host were down.
    failures: Vec<String>,
    png: Vec<u8>,
    offline: AtomicBool,
    fetches: Mutex<HashMap<String, usize>>,
}

impl CountingFetcher {
    fn new() -> Result<Self> {
        let img = RgbaImage::from_pixel(4, 4, Rgba([0, 128, 255, 255]));
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)?;
        Ok(Self {
            png,
            ..Default::default()
        })
    }

    fn with_override(mut self, fragment: &str, bytes: &[u8]) -> Self {
        self.overrides.push((fragment.to_owned(), bytes.to_vec()));
        self
    }

    fn with_failure(mut self, fragment: &str) -> Self {
        self.failures.push(fragment.to_owned());
        self
    }

    fn total(&self) -> usize {
        self.fetches.lock().values().sum()
    }

    fn count_matching(&self, fragment: &str) -> usize {
        self.fetches
            .lock()
            .iter()
            .filter(|(url, _)| url.contains(fragment))
            .map(|(_, n)| *n)
            .sum()
    }
}

impl TileFetcher for CountingFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        *self.fetches.lock().entry(url.to_owned()).or_insert(0) += 1;
        let failing = self.failures.iter().any(|f| url.contains(f.as_str()));
        if failing || self.offline.load(Ordering::SeqCst) {
            return Err(LoadError::Network {
                url: url.to_owned(),
                reason: "offline".to_owned(),
            });
        }
        for (fragment, bytes) in &self.overrides {
            if url.contains(fragment.as_str()) {
                return Ok(bytes.clone());
            }
        }
        Ok(self.png.clone())
    }
}

struct Harness {
    root: PathBuf,
    fetcher: Arc<CountingFetcher>,
    cache: TileCache,
    renderer: TileRenderer,
    pool: ResourcePool,
    gpu: RecordingGpu,
    eye: Point3<f64>,
    target: Point3<f64>,
    config: RenderConfig,
}

impl Harness {
    fn new(name: &str, fetcher: CountingFetcher) -> Result<Self> {
        Self::with_config(name, fetcher, |config| config)
    }

    fn with_config<F>(name: &str, fetcher: CountingFetcher, adjust: F) -> Result<Self>
    where
        F: FnOnce(StreamConfig) -> StreamConfig,
    {
        let _ = env_logger::builder().is_test(true).try_init();
        let root = std::env::temp_dir().join(format!("tile-stream-{}-{}", name, std::process::id()));
        if root.exists() {
            std::fs::remove_dir_all(&root)?;
        }
        let fetcher = Arc::new(fetcher);
        let config = adjust(StreamConfig::for_level(DetailLevel::Low, &root).with_worker_threads(2));
        let cache = TileCache::new(config, fetcher.clone(), Arc::new(ImageDecoder))?;
        Ok(Self {
            root,
            fetcher,
            cache,
            renderer: TileRenderer::new(),
            pool: ResourcePool::new(16),
            gpu: RecordingGpu::new(),
            eye: Point3::new(0f64, 0f64, 3f64),
            target: Point3::origin(),
            config: RenderConfig::default(),
        })
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn frame_context(&self, now: Duration) -> Result<FrameContext> {
        let view = Matrix4::look_at_rh(&self.eye, &self.target, &Vector3::y());
        let proj = Perspective3::new(1f64, std::f64::consts::FRAC_PI_4, 0.01f64, 100f64);
        FrameContext::new(
            proj.as_matrix() * view,
            Viewport::new(1024f64, 1024f64),
            now,
            &self.config,
        )
    }

    /// Render one frame of `dataset`, returning its draw calls.
    fn frame(&mut self, dataset: &Arc<tile_stream::Dataset>, now: Duration) -> Result<Vec<DrawCall>> {
        let frame = self.frame_context(now)?;
        self.renderer.begin_frame(&self.cache);
        self.renderer.render_dataset(
            &self.cache,
            &mut self.pool,
            &mut self.gpu,
            dataset,
            &frame,
            1f32,
        )?;
        Ok(self.gpu.take_draws())
    }

    /// Render and let the loaders catch up, until a frame requests nothing.
    fn converge(&mut self, dataset: &Arc<tile_stream::Dataset>) -> Result<Vec<DrawCall>> {
        for i in 0..10 {
            let before = self.cache.stats().requested;
            let draws = self.frame(dataset, Duration::from_secs(i * 10))?;
            if self.cache.stats().requested == before {
                return Ok(draws);
            }
            assert!(self.cache.wait_for_idle(IDLE));
        }
        anyhow::bail!("traversal did not converge")
    }
}

fn mercator(levels: u8) -> ImageSet {
    ImageSet::new("earth", "http://tiles.test/{L}/{X}/{Y}.png", Projection::Mercator)
        .with_levels(levels)
}

/// Full resolution elevation at a constant altitude: `HD` followed by one
/// byte holding the altitude in hundreds of meters.
#[derive(Debug)]
struct FlatCodec;

struct FlatTile(f64);

impl HdElevation for FlatTile {
    fn size(&self) -> usize {
        257
    }

    fn altitude_in_meters(&self, _row: usize, _col: usize) -> f64 {
        self.0
    }
}

impl DemCodec for FlatCodec {
    fn decompress(&self, bytes: &[u8]) -> Option<Box<dyn HdElevation>> {
        match bytes {
            [b'H', b'D', hundreds] => Some(Box::new(FlatTile(*hundreds as f64 * 100f64))),
            _ => None,
        }
    }
}

fn int16_dem() -> Vec<u8> {
    (0..1089i16).flat_map(|v| v.to_le_bytes()).collect()
}

/// A mercator set with elevation: the root and 1/0/0 carry codec tiles,
/// 1/1/1 a raw grid, 1/1/0 an unknown layout and 1/0/1 cannot be reached.
fn terrain() -> Result<(CountingFetcher, ImageSet)> {
    let fetcher = CountingFetcher::new()?
        .with_override("dem.test/0/0/0", b"HD\x0a")
        .with_override("dem.test/1/0/0", b"HD\x14")
        .with_override("dem.test/1/1/1", &int16_dem())
        .with_override("dem.test/1/1/0", b"short")
        .with_failure("dem.test/1/0/1");
    let image_set = mercator(1)
        .with_elevation_model(true)
        .with_dem_url(Some("http://dem.test/{L}/{X}/{Y}"));
    Ok((fetcher, image_set))
}

#[test]
fn test_concurrent_requests_fetch_once() -> Result<()> {
    let harness = Arc::new(Harness::new("dedup", CountingFetcher::new()?)?);
    let dataset = DatasetRegistry::default().register(mercator(4))?;
    let threads: Vec<_> = (0..8)
        .map(|_| {
            let harness = harness.clone();
            let dataset = dataset.clone();
            std::thread::spawn(move || -> Result<Admission> {
                let tile = harness.cache.get_tile(&dataset, 3, 5, 2)?;
                Ok(harness.cache.add_tile_to_queue(&tile, false, false))
            })
        })
        .collect();
    let mut queued = 0;
    for thread in threads {
        let admission = thread.join().map_err(|_| anyhow::anyhow!("thread panicked"))??;
        if admission == Admission::Queued {
            queued += 1;
        }
    }
    assert_eq!(queued, 1);
    assert!(harness.cache.wait_for_idle(IDLE));
    assert_eq!(harness.fetcher.total(), 1);
    let tile = harness.cache.get_tile(&dataset, 3, 5, 2)?;
    assert_eq!(tile.state(), TileState::ReadyToRender);
    assert_eq!(harness.cache.add_tile_to_queue(&tile, false, false), Admission::Unneeded);
    assert_eq!(harness.cache.stats().deduplicated, 7);
    assert!(harness.root().join("Imagery/earth/3/2/2_5.png").exists());
    Ok(())
}

#[test]
fn test_children_replace_parent() -> Result<()> {
    let mut harness = Harness::new("replace", CountingFetcher::new()?)?;
    let dataset = DatasetRegistry::default().register(mercator(1))?;

    assert!(harness.frame(&dataset, Duration::ZERO)?.is_empty());
    assert!(harness.cache.wait_for_idle(IDLE));

    // Root is ready, children are not: the root covers every quadrant.
    let draws = harness.frame(&dataset, Duration::from_secs(1))?;
    assert_eq!(draws.len(), 4);
    assert!(draws.iter().all(|d| d.tile.level() == 0));
    assert!(harness.cache.wait_for_idle(IDLE));

    let draws = harness.frame(&dataset, Duration::from_secs(2))?;
    assert_eq!(draws.len(), 16);
    assert!(draws.iter().all(|d| d.tile.level() == 1 && d.texture.is_some()));
    assert_eq!(harness.fetcher.total(), 5);
    assert_eq!(harness.cache.stats().completed, 5);
    Ok(())
}

#[test]
fn test_eviction_returns_pool_to_baseline() -> Result<()> {
    let mut harness = Harness::with_config("evict", CountingFetcher::new()?, |c| {
        c.with_retention(0, 2)
    })?;
    let dataset = DatasetRegistry::default().register(mercator(1))?;
    assert_eq!(harness.converge(&dataset)?.len(), 16);
    assert_eq!(harness.pool.vertex_buffers_on_loan(), 5);
    assert_eq!(harness.pool.textures_on_loan(), 5);

    // Stop drawing the dataset and let time pass.
    for _ in 0..4 {
        harness.renderer.begin_frame(&harness.cache);
        harness.cache.next_access();
    }
    let evicted = harness
        .renderer
        .end_frame(&harness.cache, &mut harness.pool, &mut harness.gpu);
    assert_eq!(evicted, 5);
    assert!(harness.cache.is_empty());
    assert_eq!(harness.pool.vertex_buffers_on_loan(), 0);
    assert_eq!(harness.pool.textures_on_loan(), 0);
    assert!(harness.cache.get_cached(&dataset, 1, 0, 0).is_none());

    harness.pool.clear(&mut harness.gpu);
    assert_eq!(harness.gpu.live_vertex_buffers(), 0);
    assert_eq!(harness.gpu.live_textures(), 0);
    assert_eq!(harness.gpu.live_index_buffers(), 0);

    // Coming back finds the tiles on disk.
    harness.converge(&dataset)?;
    assert_eq!(harness.fetcher.total(), 5);
    Ok(())
}

#[test]
fn test_elevation_decodes_and_falls_back_to_parent() -> Result<()> {
    let (fetcher, image_set) = terrain()?;
    let mut harness = Harness::new("terrain", fetcher)?;
    let dataset = DatasetRegistry::default()
        .register_with_codec(image_set.clone(), Some(Arc::new(FlatCodec)))?;
    assert!(dataset.wants_elevation());

    // Imagery is ready everywhere, whatever happened to the elevation.
    let draws = harness.converge(&dataset)?;
    assert_eq!(draws.len(), 16);
    assert!(draws.iter().all(|d| d.tile.level() == 1 && d.texture.is_some()));
    assert_eq!(harness.fetcher.count_matching("tiles.test"), 5);
    assert_eq!(harness.fetcher.count_matching("dem.test"), 5);
    // One more frame so the renderer knows how deep the last one went.
    assert_eq!(harness.frame(&dataset, Duration::from_secs(100))?.len(), 16);

    let tile = |level, x, y| {
        harness
            .cache
            .get_cached(&dataset, level, x, y)
            .ok_or_else(|| anyhow::anyhow!("{}/{}/{} is not resident", level, x, y))
    };
    for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        assert_eq!(tile(1, x, y)?.state(), TileState::ReadyToRender);
    }

    let root = tile(0, 0, 0)?;
    let grid = root.elevation().ok_or_else(|| anyhow::anyhow!("root has no elevation"))?;
    assert_eq!(grid.format(), DemFormat::Codec);
    assert_eq!(grid.samples().len(), 1089);
    approx::assert_relative_eq!(grid.average(), 1000f64);

    let own = tile(1, 0, 0)?;
    assert!(!own.elevation_unavailable());
    approx::assert_relative_eq!(own.elevation_average().unwrap_or(0f64), 2000f64);

    let raw = tile(1, 1, 1)?;
    assert_eq!(raw.elevation().map(|g| g.format()), Some(DemFormat::Int16Grid));
    approx::assert_relative_eq!(raw.elevation_average().unwrap_or(0f64), 544f64);

    // An unknown layout and an unreachable host both borrow from the root.
    for (x, y) in [(1, 0), (0, 1)] {
        let child = tile(1, x, y)?;
        assert!(child.elevation_unavailable());
        let grid = child
            .elevation()
            .ok_or_else(|| anyhow::anyhow!("1/{}/{} has no geometry elevation", x, y))?;
        assert_eq!(grid.format(), DemFormat::FromParent);
        approx::assert_relative_eq!(grid.average(), 1000f64);
    }
    assert!(dem_path(harness.root(), &image_set, 1, 1, 0).exists());
    assert!(!dem_path(harness.root(), &image_set, 1, 0, 1).exists());

    // Altitude queries descend to the tile with its own samples.
    let (lat, lng) = tile_bounds(&image_set, 1, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("1/0/0 has no bounds"))?
        .center();
    let altitude = harness
        .renderer
        .surface_altitude(&harness.cache, &dataset, lat, lng);
    approx::assert_relative_eq!(altitude, 2000f64 / DEM_SCALE_FACTOR);
    Ok(())
}

#[test]
fn test_eviction_releases_elevation_geometry() -> Result<()> {
    let (fetcher, image_set) = terrain()?;
    let mut harness = Harness::with_config("terrain-evict", fetcher, |c| c.with_retention(0, 2))?;
    let dataset =
        DatasetRegistry::default().register_with_codec(image_set, Some(Arc::new(FlatCodec)))?;
    assert_eq!(harness.converge(&dataset)?.len(), 16);
    assert_eq!(harness.pool.vertex_buffers_on_loan(), 5);
    assert_eq!(harness.pool.textures_on_loan(), 5);
    let held: Vec<_> = [(0, 0, 0), (1, 0, 0), (1, 1, 0), (1, 0, 1), (1, 1, 1)]
        .iter()
        .filter_map(|&(level, x, y)| harness.cache.get_cached(&dataset, level, x, y))
        .collect();
    assert_eq!(held.len(), 5);
    assert!(held.iter().all(|t| t.elevation().is_some()));

    for _ in 0..4 {
        harness.renderer.begin_frame(&harness.cache);
        harness.cache.next_access();
    }
    let evicted = harness
        .renderer
        .end_frame(&harness.cache, &mut harness.pool, &mut harness.gpu);
    assert_eq!(evicted, 5);
    assert!(harness.cache.is_empty());
    assert_eq!(harness.pool.vertex_buffers_on_loan(), 0);
    assert_eq!(harness.pool.textures_on_loan(), 0);
    for tile in &held {
        assert_eq!(tile.state(), TileState::Evicted);
        assert!(tile.elevation().is_none());
    }

    harness.pool.clear(&mut harness.gpu);
    assert_eq!(harness.gpu.live_vertex_buffers(), 0);
    assert_eq!(harness.gpu.live_textures(), 0);
    assert_eq!(harness.gpu.live_index_buffers(), 0);

    // Only the elevation that never arrived is fetched again.
    assert_eq!(harness.converge(&dataset)?.len(), 16);
    assert_eq!(harness.fetcher.count_matching("tiles.test"), 5);
    assert_eq!(harness.fetcher.count_matching("dem.test/1/0/1"), 2);
    assert_eq!(harness.fetcher.count_matching("dem.test/0/0/0"), 1);
    let root = harness
        .cache
        .get_cached(&dataset, 0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("root is not resident"))?;
    approx::assert_relative_eq!(root.elevation_average().unwrap_or(0f64), 1000f64);
    Ok(())
}

#[test]
fn test_frustum_culls_deep_tiles() -> Result<()> {
    let mut harness = Harness::new("cull", CountingFetcher::new()?)?;
    harness.target = Point3::new(0f64, 0f64, 10f64);
    let dataset = DatasetRegistry::default().register(mercator(3))?;
    harness.converge(&dataset)?;
    // The two seamless levels always load; nothing below them is in view.
    assert_eq!(harness.fetcher.total(), 5);
    assert_eq!(harness.fetcher.count_matching("/2/"), 0);
    assert!(harness.renderer.counters().culled > 0);
    Ok(())
}

#[test]
fn test_catalog_rows_from_visible_tiles() -> Result<()> {
    let table = b"# comment\r\nra\tdec\r\n10.5\t-3.25\r\n";
    let fetcher = CountingFetcher::new()?.with_override(".tsv", table);
    let mut harness = Harness::new("catalog", fetcher)?;
    let dataset = DatasetRegistry::default().register(
        ImageSet::new("stars", "http://cat.test/{L}/{X}/{Y}.tsv", Projection::Mercator)
            .with_extension(".tsv")
            .with_catalog(true)
            .with_levels(1)
            .with_property("hips_order_min", "1"),
    )?;
    let draws = harness.converge(&dataset)?;
    assert!(draws.is_empty());
    // Only the catalog level is fetched.
    assert_eq!(harness.fetcher.total(), 4);
    let rows = harness.renderer.visible_catalog_rows(&harness.cache, &dataset);
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|row| row == &["10.5", "-3.25"]));
    Ok(())
}

#[test]
fn test_corrupt_tile_is_deleted_and_not_retried() -> Result<()> {
    let fetcher = CountingFetcher::new()?.with_override("/0/", b"definitely not a png");
    let mut harness = Harness::new("corrupt", fetcher)?;
    let image_set = mercator(0);
    let dataset = DatasetRegistry::default().register(image_set.clone())?;
    harness.frame(&dataset, Duration::ZERO)?;
    assert!(harness.cache.wait_for_idle(IDLE));
    let root = harness.cache.get_tile(&dataset, 0, 0, 0)?;
    assert_eq!(root.state(), TileState::Errored);
    assert!(!imagery_path(harness.root(), &image_set, 0, 0, 0).exists());

    for i in 1..4 {
        assert!(harness.frame(&dataset, Duration::from_secs(i))?.is_empty());
        assert!(harness.cache.wait_for_idle(IDLE));
    }
    assert_eq!(harness.fetcher.total(), 1);
    assert_eq!(harness.cache.stats().errored, 1);
    assert_eq!(harness.cache.stats().requested, 1);
    Ok(())
}

#[test]
fn test_network_failure_retries_on_revisit() -> Result<()> {
    let fetcher = CountingFetcher::new()?;
    fetcher.offline.store(true, Ordering::SeqCst);
    let mut harness = Harness::new("retry", fetcher)?;
    let dataset = DatasetRegistry::default().register(mercator(0))?;

    harness.frame(&dataset, Duration::ZERO)?;
    assert!(harness.cache.wait_for_idle(IDLE));
    let root = harness.cache.get_tile(&dataset, 0, 0, 0)?;
    assert_eq!(root.state(), TileState::Absent);
    assert_eq!(harness.cache.stats().network_failures, 1);

    harness.fetcher.offline.store(false, Ordering::SeqCst);
    harness.frame(&dataset, Duration::from_secs(1))?;
    assert!(harness.cache.wait_for_idle(IDLE));
    assert!(root.is_ready());
    assert_eq!(harness.frame(&dataset, Duration::from_secs(2))?.len(), 4);
    assert_eq!(harness.fetcher.total(), 2);
    Ok(())
}

#[test]
fn test_purge_refresh_refetches() -> Result<()> {
    let mut harness = Harness::new("purge", CountingFetcher::new()?)?;
    let dataset = DatasetRegistry::default().register(mercator(0))?;
    harness.converge(&dataset)?;
    assert_eq!(harness.fetcher.total(), 1);

    harness.cache.clear(&mut harness.pool, &mut harness.gpu);
    harness.converge(&dataset)?;
    assert_eq!(harness.fetcher.total(), 1);

    harness.cache.clear(&mut harness.pool, &mut harness.gpu);
    harness.config.purge_refresh = true;
    harness.converge(&dataset)?;
    assert_eq!(harness.fetcher.total(), 2);
    Ok(())
}

#[test]
fn test_sky_parent_fades_out() -> Result<()> {
    let mut harness = Harness::new("blend", CountingFetcher::new()?)?;
    let dataset = DatasetRegistry::default().register(
        ImageSet::new("sky", "http://sky.test/{L}/{X}/{Y}.png", Projection::Equirectangular)
            .with_data_set_type(DataSetType::Sky)
            .with_levels(1),
    )?;
    let parent_draws = |draws: &[DrawCall]| -> Vec<f32> {
        draws
            .iter()
            .filter(|d| d.tile.level() == 0)
            .map(|d| d.opacity)
            .collect()
    };

    harness.frame(&dataset, Duration::ZERO)?;
    assert!(harness.cache.wait_for_idle(IDLE));
    let draws = harness.frame(&dataset, Duration::from_secs(1))?;
    assert_eq!(parent_draws(&draws), vec![1f32; 8]);
    assert!(harness.cache.wait_for_idle(IDLE));

    // Children arrive; the parents start fading.
    let start = Duration::from_secs(2);
    let draws = harness.frame(&dataset, start)?;
    assert_eq!(draws.iter().filter(|d| d.tile.level() == 1).count(), 32);
    assert_eq!(parent_draws(&draws).len(), 8);

    let draws = harness.frame(&dataset, start + Duration::from_millis(250))?;
    let halfway = parent_draws(&draws);
    assert_eq!(halfway.len(), 8);
    for opacity in halfway {
        approx::assert_relative_eq!(opacity, 0.5f32);
    }

    let draws = harness.frame(&dataset, start + Duration::from_secs(1))?;
    assert!(parent_draws(&draws).is_empty());
    assert_eq!(draws.len(), 32);
    Ok(())
}
