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
    cache::TileCache,
    config::RenderConfig,
    dataset::Dataset,
    elevation::{ElevationGrid, DEM_SCALE_FACTOR},
    gpu::{DrawCall, TileGpu},
    pool::ResourcePool,
    projection::Edge,
    tile::{
        geometry::{EDGE_BOTTOM, EDGE_LEFT, EDGE_RIGHT, EDGE_TOP, PARTS},
        Tile, TileState,
    },
};
use ::geometry::Frustum;
use anyhow::{anyhow, ensure, Result};
use log::{debug, trace};
use nalgebra::{Matrix4, Point2, Point3};
use std::{sync::Arc, time::Duration};

// Levels below this are never culled for projections that wrap the whole body.
const SEAMLESS_LEVELS: u32 = 2;

// A neighbour that has not drawn for more frames than this counts as coarser.
const NEIGHBOR_GENERATION_SLACK: u64 = 2;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            x: 0f64,
            y: 0f64,
            width,
            height,
        }
    }
}

/// Everything about the current frame that the traversal reads.
#[derive(Clone, Debug)]
pub struct FrameContext {
    view_projection: Matrix4<f64>,
    frustum: Frustum,
    viewport: Viewport,
    now: Duration,
    fade: Duration,
    config: RenderConfig,
}

impl FrameContext {
    /// `now` is the frame clock that crossfades run against.
    pub fn new(
        view_projection: Matrix4<f64>,
        viewport: Viewport,
        now: Duration,
        config: &RenderConfig,
    ) -> Result<Self> {
        ensure!(
            viewport.width > 0f64 && viewport.height > 0f64,
            "viewport must have an area"
        );
        let frustum = Frustum::from_view_projection(&view_projection)
            .ok_or_else(|| anyhow!("degenerate view projection"))?;
        Ok(Self {
            view_projection,
            frustum,
            viewport,
            now,
            fade: Duration::from_millis(config.blend_duration_ms),
            config: config.to_owned(),
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    // None if the point is behind the eye.
    fn to_screen(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        let clip = self.view_projection * p.to_homogeneous();
        if clip.w <= f64::EPSILON {
            return None;
        }
        let ndc_x = clip.x / clip.w;
        let ndc_y = clip.y / clip.w;
        Some(Point2::new(
            self.viewport.x + (ndc_x + 1f64) / 2f64 * self.viewport.width,
            self.viewport.y + (1f64 - ndc_y) / 2f64 * self.viewport.height,
        ))
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FrameCounters {
    pub visited: usize,
    pub culled: usize,
    pub tiles_drawn: usize,
    pub draw_calls: usize,
}

/// Walks each dataset's quadtree once per frame, asking the cache for what
/// it needs and drawing what is ready.
///
/// Lives on the render thread.
#[derive(Debug, Default)]
pub struct TileRenderer {
    generation: u64,
    deepest_level: u32,
    last_deepest_level: u32,
    counters: FrameCounters,
}

impl TileRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a frame: advance the cache's epoch and reset the counters.
    pub fn begin_frame(&mut self, cache: &TileCache) -> u64 {
        self.generation = cache.begin_frame();
        self.last_deepest_level = self.deepest_level;
        self.deepest_level = 0;
        self.counters = FrameCounters::default();
        self.generation
    }

    /// Finish a frame: collect finished loads, start new ones and reclaim
    /// tiles that have dropped out of view.
    pub fn end_frame(
        &mut self,
        cache: &TileCache,
        pool: &mut ResourcePool,
        gpu: &mut dyn TileGpu,
    ) -> usize {
        cache.update();
        let evicted = cache.reclaim(pool, gpu);
        trace!("frame {}: {:?}", self.generation, self.counters);
        evicted
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The deepest level subdivided to in the previous frame.
    pub fn last_deepest_level(&self) -> u32 {
        self.last_deepest_level
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    /// Draw one dataset. Returns true if every visible root rendered fully.
    pub fn render_dataset(
        &mut self,
        cache: &TileCache,
        pool: &mut ResourcePool,
        gpu: &mut dyn TileGpu,
        dataset: &Arc<Dataset>,
        frame: &FrameContext,
        opacity: f32,
    ) -> Result<bool> {
        let blend = dataset.blends(frame.config.blend_enabled, frame.config.dome);
        let mut rendered = true;
        for (x, y) in dataset.projection().roots(dataset.image_set()) {
            let root = cache.get_tile(dataset, 0, x, y)?;
            if !self.in_frustum(&root, frame) {
                continue;
            }
            rendered &= self.draw3d(cache, pool, gpu, &root, frame, opacity, blend)?;
        }
        Ok(rendered)
    }

    #[allow(clippy::too_many_arguments)]
    fn draw3d(
        &mut self,
        cache: &TileCache,
        pool: &mut ResourcePool,
        gpu: &mut dyn TileGpu,
        tile: &Arc<Tile>,
        frame: &FrameContext,
        opacity: f32,
        blend: bool,
    ) -> Result<bool> {
        let generation = self.generation;
        let (now, fade) = (frame.now, frame.fade);
        tile.visit(generation);
        tile.touch(cache.next_access());
        self.counters.visited += 1;

        match tile.state() {
            TileState::ReadyToRender => {}
            TileState::Errored | TileState::Evicted => return Ok(false),
            _ => {
                cache.add_tile_to_queue(
                    tile,
                    frame.config.make_high_priority,
                    frame.config.purge_refresh,
                );
                return Ok(false);
            }
        }

        let dataset = tile.dataset();
        let mut child_rendered = false;
        match tile.children() {
            Some(children) => {
                for child in children.iter() {
                    let child_tile = cache.get_tile(dataset, tile.level() + 1, child.x, child.y)?;
                    let target = if self.in_frustum(&child_tile, frame) {
                        if self.is_big_enough(&child_tile, frame) {
                            let drew = self.draw3d(
                                cache,
                                pool,
                                gpu,
                                &child_tile,
                                frame,
                                opacity,
                                blend,
                            )?;
                            child_rendered |= drew;
                            !drew
                        } else {
                            true
                        }
                    } else {
                        self.counters.culled += 1;
                        let mut render = tile.render_state();
                        render.blend(child.part).set_state(false);
                        false
                    };
                    let mut render = tile.render_state();
                    let part = render.blend(child.part);
                    part.set_target(target, now);
                    if target || !blend {
                        part.set_state(target);
                    }
                }
            }
            None => {
                let mut render = tile.render_state();
                for part in 0..PARTS {
                    let state = render.blend(part);
                    state.set_target(true, now);
                    state.set_state(true);
                }
            }
        }

        let anything_to_render = {
            let mut render = tile.render_state();
            (0..PARTS).any(|part| render.blend(part).state(now, fade))
        };
        if child_rendered || anything_to_render {
            tile.stamp_rendered(generation);
            if let Some(parent) = tile.parent_key().and_then(|key| cache.get_cached_tile(&key)) {
                parent.stamp_rendered(generation);
            }
        }
        if !anything_to_render || tile.is_catalog() {
            return Ok(true);
        }

        let show_elevation = frame.config.show_elevation;
        match tile.create_geometry(pool, gpu, show_elevation, || {
            Self::fallback_elevation(cache, tile)
        }) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) => {
                debug!("{:?} geometry not created: {}", tile, e);
                return Ok(false);
            }
        }

        let mask = if frame.config.use_accommodation {
            self.accommodation(cache, tile)
        } else {
            0
        };
        let parts = match pool.index_parts(gpu, mask) {
            Ok(parts) => parts,
            Err(e) => {
                debug!("index variant {:04b} not created: {}", mask, e);
                return Ok(false);
            }
        };

        let mut render = tile.render_state();
        let vertex_buffer = match render.vertex_buffer() {
            Some(buffer) => buffer.id(),
            None => return Ok(false),
        };
        let texture = render.texture().map(|t| t.id());
        let center = render.local_center();
        let mut drew_any = false;
        for (part, index) in parts.iter().enumerate() {
            let state = render.blend(part);
            let target = state.target();
            let part_opacity = if blend {
                if (state.state(now, fade) && opacity >= 1f32) || target {
                    Some(state.opacity(now, fade) * opacity)
                } else {
                    None
                }
            } else if target {
                Some(opacity)
            } else {
                None
            };
            if let Some(part_opacity) = part_opacity {
                gpu.draw_indexed(&DrawCall {
                    tile: tile.key(),
                    part,
                    vertex_buffer,
                    index_buffer: index.buffer,
                    index_count: index.count,
                    texture,
                    opacity: part_opacity,
                    local_center: [center.x, center.y, center.z],
                });
                self.counters.draw_calls += 1;
                drew_any = true;
            }
        }
        if drew_any {
            self.counters.tiles_drawn += 1;
        }
        Ok(true)
    }

    fn in_frustum(&self, tile: &Tile, frame: &FrameContext) -> bool {
        if tile.level() < SEAMLESS_LEVELS && tile.dataset().is_globally_seamless() {
            return true;
        }
        frame.frustum.intersects_sphere(&tile.bounding_sphere())
    }

    fn is_big_enough(&mut self, tile: &Tile, frame: &FrameContext) -> bool {
        if tile.level() > frame.config.min_tested_level() {
            let mut screen = [Point2::origin(); 4];
            for (i, corner) in tile.corners().iter().enumerate() {
                match frame.to_screen(corner) {
                    Some(p) => screen[i] = p,
                    // Straddles the eye; always worth splitting.
                    None => return true,
                }
            }
            let longest = (0..4)
                .map(|i| (screen[(i + 1) % 4] - screen[i]).norm())
                .fold(0f64, f64::max);
            if longest < frame.config.edge_threshold() {
                return false;
            }
            self.deepest_level = self.deepest_level.max(tile.level());
        }
        true
    }

    /// Which edges must drop odd vertices to meet a coarser neighbour. An
    /// edge with no resident, recently rendered neighbour counts as coarser,
    /// including one at the edge of the tiling.
    fn accommodation(&self, cache: &TileCache, tile: &Tile) -> u8 {
        let dataset = tile.dataset();
        let edges = [
            (Edge::Bottom, EDGE_BOTTOM),
            (Edge::Right, EDGE_RIGHT),
            (Edge::Top, EDGE_TOP),
            (Edge::Left, EDGE_LEFT),
        ];
        let mut mask = 0;
        for (edge, bit) in edges {
            let neighbor = dataset.projection().neighbor(
                dataset.image_set(),
                tile.level(),
                tile.x(),
                tile.y(),
                edge,
            );
            let resident = neighbor.and_then(|(x, y)| cache.get_cached(dataset, tile.level(), x, y));
            let coarser = match resident {
                Some(n) => n.rendered_at_or_below() + NEIGHBOR_GENERATION_SLACK < self.generation,
                None => true,
            };
            if coarser {
                mask |= bit;
            }
        }
        mask
    }

    // Derive elevation from the nearest resident ancestor that has some.
    fn fallback_elevation(cache: &TileCache, tile: &Tile) -> Option<ElevationGrid> {
        let dataset = tile.dataset();
        let mut part = tile.part_in_parent();
        let mut key = tile.parent_key();
        let mut direct = true;
        while let Some(parent) = key.and_then(|k| cache.get_cached_tile(&k)) {
            if let Some(grid) = parent.elevation() {
                if direct {
                    if let Some(derived) = dataset.projection().dem_from_parent(&grid, part) {
                        return Some(derived);
                    }
                }
                return Some(ElevationGrid::flat(grid.average()));
            }
            direct = false;
            part = parent.part_in_parent();
            key = parent.parent_key();
        }
        None
    }

    /// Altitude of the surface at a point, in body radii, from the deepest
    /// resident tile that contains it.
    pub fn surface_altitude(&self, cache: &TileCache, dataset: &Dataset, lat: f64, lng: f64) -> f64 {
        let image_set = dataset.image_set();
        let projection = dataset.projection();
        let root = projection
            .roots(image_set)
            .into_iter()
            .find(|(x, y)| projection.contains(image_set, 0, *x, *y, lat, lng))
            .and_then(|(x, y)| cache.get_cached(dataset, 0, x, y));
        let mut current = match root {
            Some(root) => root,
            None => return 0f64,
        };
        while current.level() < self.last_deepest_level {
            let deeper = current.children().and_then(|children| {
                children
                    .iter()
                    .filter(|c| projection.contains(image_set, current.level() + 1, c.x, c.y, lat, lng))
                    .find_map(|c| cache.get_cached_tile(&c.key).filter(|t| t.is_ready()))
            });
            match deeper {
                Some(child) => current = child,
                None => break,
            }
        }
        current
            .elevation_average()
            .map(|meters| meters / DEM_SCALE_FACTOR)
            .unwrap_or(0f64)
    }

    /// Rows of every catalog tile in the subtree drawn this frame.
    pub fn visible_catalog_rows(&self, cache: &TileCache, dataset: &Dataset) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        let mut stack: Vec<Arc<Tile>> = dataset
            .projection()
            .roots(dataset.image_set())
            .into_iter()
            .filter_map(|(x, y)| cache.get_cached(dataset, 0, x, y))
            .collect();
        while let Some(tile) = stack.pop() {
            if tile.rendered_at_or_below() != self.generation {
                continue;
            }
            if let Some(table) = tile.catalog() {
                rows.extend(table.rows().iter().cloned());
            }
            if let Some(children) = tile.children() {
                stack.extend(children.iter().filter_map(|c| cache.get_cached_tile(&c.key)));
            }
        }
        rows
    }
}
