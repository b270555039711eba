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
use anyhow::{bail, Result};
use log::{info, warn};
use nalgebra::{Matrix4, Perspective3, Point3, Vector3};
use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};
use structopt::StructOpt;
use tile_stream::{
    Dataset, DatasetRegistry, DirectoryFetcher, FrameContext, HttpFetcher, ImageDecoder, ImageSet,
    RecordingGpu, RenderConfig, ResourcePool, StreamOpts, TileCache, TileFetcher, TileRenderer,
    Viewport,
};
use tracelog::{TraceLog, TraceLogOpts};

/// Stream tiles for one or more image sets along an orbit around the body
/// and report what the cache did.
#[derive(Debug, StructOpt)]
struct Opt {
    /// Image set descriptions, as json
    #[structopt(parse(from_os_str))]
    image_sets: Vec<PathBuf>,

    /// Stream settings to lay over the detail level preset, as json
    #[structopt(long, parse(from_os_str))]
    stream_config: Option<PathBuf>,

    /// Serve urls under --tile-prefix from this directory instead of the network
    #[structopt(long, parse(from_os_str))]
    tile_dir: Option<PathBuf>,

    #[structopt(long, default_value = "http://")]
    tile_prefix: String,

    /// Frames to render
    #[structopt(short, long, default_value = "240")]
    frames: u64,

    /// Eye distance from the body center, in body radii
    #[structopt(short, long, default_value = "3")]
    distance: f64,

    /// Larger values subdivide sooner; defaults to the detail level's preset
    #[structopt(long)]
    image_quality: Option<f64>,

    #[structopt(long, default_value = "1280")]
    width: f64,

    #[structopt(long, default_value = "720")]
    height: f64,

    #[structopt(flatten)]
    stream_opts: StreamOpts,

    #[structopt(flatten)]
    tracelog_opts: TraceLogOpts,
}

fn load_datasets(opt: &Opt, registry: &DatasetRegistry) -> Result<Vec<Arc<Dataset>>> {
    if opt.image_sets.is_empty() {
        bail!("no image sets given");
    }
    let mut datasets = Vec::new();
    for path in &opt.image_sets {
        let image_set = ImageSet::from_json(&fs::read_to_string(path)?)?;
        info!("loaded image set {} from {}", image_set.id(), path.display());
        datasets.push(registry.register(image_set)?);
    }
    Ok(datasets)
}

fn view_projection(opt: &Opt, frame: u64) -> Matrix4<f64> {
    // One full turn over the run, tilted a little toward the north.
    let angle = frame as f64 / opt.frames.max(1) as f64 * std::f64::consts::TAU;
    let eye = Point3::new(
        angle.cos() * opt.distance,
        opt.distance * 0.25,
        angle.sin() * opt.distance,
    );
    let view = Matrix4::look_at_rh(&eye, &Point3::origin(), &Vector3::y());
    let proj = Perspective3::new(
        opt.width / opt.height,
        std::f64::consts::FRAC_PI_4,
        0.001f64,
        opt.distance * 4f64,
    );
    proj.as_matrix() * view
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    let _tracelog = TraceLog::init(&opt.tracelog_opts)?;

    let mut stream_config = opt.stream_opts.stream_config();
    if let Some(path) = &opt.stream_config {
        stream_config = stream_config.overlay_json(&fs::read_to_string(path)?)?;
    }
    let fetcher: Arc<dyn TileFetcher> = match &opt.tile_dir {
        Some(dir) => Arc::new(DirectoryFetcher::new(&opt.tile_prefix, dir)),
        None => Arc::new(HttpFetcher::default()),
    };
    let mut pool = ResourcePool::new(stream_config.max_pooled_per_shape());
    let cache = TileCache::new(stream_config, fetcher, Arc::new(ImageDecoder))?;

    let registry = DatasetRegistry::default();
    let datasets = load_datasets(&opt, &registry)?;

    let mut render_config = RenderConfig::for_level(opt.stream_opts.detail());
    if let Some(image_quality) = opt.image_quality {
        render_config.image_quality = image_quality;
    }
    let viewport = Viewport::new(opt.width, opt.height);
    let mut gpu = RecordingGpu::new();
    let mut renderer = TileRenderer::new();
    let start = Instant::now();
    let mut draw_calls = 0;
    for frame in 0..opt.frames {
        let context = FrameContext::new(
            view_projection(&opt, frame),
            viewport,
            start.elapsed(),
            &render_config,
        )?;
        renderer.begin_frame(&cache);
        for dataset in &datasets {
            renderer.render_dataset(&cache, &mut pool, &mut gpu, dataset, &context, 1f32)?;
        }
        draw_calls += gpu.take_draws().len();
        renderer.end_frame(&cache, &mut pool, &mut gpu);
        std::thread::sleep(Duration::from_millis(16));
    }
    if !cache.wait_for_idle(Duration::from_secs(30)) {
        warn!("loads still outstanding at exit");
    }
    cache.shutdown_safely();

    println!("frames:         {}", opt.frames);
    println!("draw calls:     {}", draw_calls);
    println!("resident tiles: {}", cache.len());
    println!("deepest level:  {}", renderer.last_deepest_level());
    for dataset in &datasets {
        let image_set = dataset.image_set();
        if image_set.catalog() {
            let rows = renderer.visible_catalog_rows(&cache, dataset);
            println!("{} catalog rows: {}", image_set.id(), rows.len());
        } else if image_set.has_dem() {
            let altitude = renderer.surface_altitude(&cache, dataset, 0f64, 0f64);
            println!("{} altitude at 0,0: {:.6} radii", image_set.id(), altitude);
        }
    }
    println!("{:#?}", cache.stats());
    cache.clear(&mut pool, &mut gpu);
    pool.clear(&mut gpu);
    Ok(())
}
