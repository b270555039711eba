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
pub mod blend;
pub mod geometry;

use crate::{
    dataset::Dataset,
    elevation::ElevationGrid,
    gpu::{TextureData, TileGpu},
    pool::{PooledTexture, PooledVertexBuffer, ResourcePool},
    table::Table,
};
use ::geometry::Sphere;
use anyhow::Result;
use blend::BlendState;
use geometry::{GridPoints, GRID_SUBDIVISIONS, PARTS};
use nalgebra::Point3;
use parking_lot::{Mutex, MutexGuard};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tile_address::TileKey;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TileState {
    /// Known to the cache but not requested, or returned here after a
    /// network failure so the next visit asks again.
    Absent,
    Pending,
    Fetching,
    Decoding,
    ReadyToRender,
    /// Payload was corrupt. Not retried this session.
    Errored,
    /// Reclaimed by the cache; any late worker result is discarded.
    Evicted,
}

impl TileState {
    /// A worker owns the tile between claiming it and publishing.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Pending | Self::Fetching | Self::Decoding)
    }
}

/// What a worker produced for a tile.
#[derive(Debug, Default)]
pub struct TilePayload {
    pub texture: Option<TextureData>,
    pub catalog: Option<Table>,
    pub elevation: Option<ElevationGrid>,
    /// Elevation was wanted but could not be loaded; geometry falls back to
    /// the parent.
    pub elevation_unavailable: bool,
}

/// A child's key and the grid part of its parent that it covers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChildRef {
    pub key: TileKey,
    pub x: u32,
    pub y: u32,
    pub part: usize,
}

#[derive(Debug)]
struct TileContent {
    state: TileState,
    texture: Option<TextureData>,
    catalog: Option<Arc<Table>>,
    elevation: Option<ElevationGrid>,
    elevation_unavailable: bool,
}

#[derive(Debug)]
struct TileRender {
    vertex_buffer: Option<PooledVertexBuffer>,
    texture: Option<PooledTexture>,
    sphere: Sphere,
    corners: [Point3<f64>; 4],
    local_center: Point3<f64>,
    blend: [BlendState; PARTS],
    // The samples the current geometry was built from, own or derived.
    elevation: Option<ElevationGrid>,
}

/// One quadtree node. Children and parent are referenced by key and looked
/// up through the cache on demand.
///
/// Workers only touch `content`; everything in `render` belongs to the
/// render thread.
pub struct Tile {
    key: TileKey,
    level: u32,
    x: u32,
    y: u32,
    dataset: Arc<Dataset>,
    children: Option<[ChildRef; 4]>,
    part_in_parent: usize,

    last_access: AtomicU64,
    visited_generation: AtomicU64,
    rendered_at_or_below: AtomicU64,

    content: Mutex<TileContent>,
    render: Mutex<TileRender>,
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tile({}:{:?})", self.dataset.image_set().id(), self.key)
    }
}

impl Tile {
    pub fn new(dataset: Arc<Dataset>, level: u32, x: u32, y: u32) -> Result<Self> {
        let key = dataset.key(level, x, y)?;
        let image_set = dataset.image_set();
        let projection = dataset.projection();

        let children = if level < image_set.levels() as u32 {
            let mut refs = Vec::with_capacity(4);
            for (cx, cy, part) in projection.children(image_set, x, y).iter().copied() {
                refs.push(ChildRef {
                    key: dataset.key(level + 1, cx, cy)?,
                    x: cx,
                    y: cy,
                    part,
                });
            }
            Some([refs[0], refs[1], refs[2], refs[3]])
        } else {
            None
        };

        let part_in_parent = if level > 0 {
            projection
                .children(image_set, x / 2, y / 2)
                .iter()
                .find(|(cx, cy, _)| *cx == x && *cy == y)
                .map(|(_, _, part)| *part)
                .unwrap_or(0)
        } else {
            0
        };

        let (samples, corners) = Self::outline(&dataset, level, x, y, None);
        let sphere = Sphere::enclosing(&samples);
        let local_center = samples[4];

        Ok(Self {
            key,
            level,
            x,
            y,
            dataset,
            children,
            part_in_parent,
            last_access: AtomicU64::new(0),
            visited_generation: AtomicU64::new(0),
            rendered_at_or_below: AtomicU64::new(0),
            content: Mutex::new(TileContent {
                state: TileState::Absent,
                texture: None,
                catalog: None,
                elevation: None,
                elevation_unavailable: false,
            }),
            render: Mutex::new(TileRender {
                vertex_buffer: None,
                texture: None,
                sphere,
                corners,
                local_center,
                blend: [BlendState::new(true); PARTS],
                elevation: None,
            }),
        })
    }

    // A 3x3 sampling of the tile surface, row major, plus its corners.
    fn outline(
        dataset: &Dataset,
        level: u32,
        x: u32,
        y: u32,
        elevation: Option<&ElevationGrid>,
    ) -> ([Point3<f64>; 9], [Point3<f64>; 4]) {
        let image_set = dataset.image_set();
        let projection = dataset.projection();
        let mut samples = [Point3::origin(); 9];
        for row in 0..3 {
            for col in 0..3 {
                let u = col as f64 / 2f64;
                let v = row as f64 / 2f64;
                let (lat, lng) = projection.grid_point(image_set, level, x, y, u, v);
                let altitude = elevation.map(|e| e.altitude_at(u, v)).unwrap_or(0f64);
                samples[row * 3 + col] = projection.point_to_3d(lat, lng, altitude);
            }
        }
        let corners = [samples[0], samples[2], samples[8], samples[6]];
        (samples, corners)
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    /// None at the dataset's deepest level.
    pub fn children(&self) -> Option<&[ChildRef; 4]> {
        self.children.as_ref()
    }

    pub fn parent_key(&self) -> Option<TileKey> {
        self.key.parent()
    }

    /// The grid part of the parent that this tile covers.
    pub fn part_in_parent(&self) -> usize {
        self.part_in_parent
    }

    pub fn state(&self) -> TileState {
        self.content.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == TileState::ReadyToRender
    }

    #[cfg(test)]
    pub(crate) fn set_state(&self, state: TileState) {
        self.content.lock().state = state;
    }

    /// Move from `from` to `to` atomically, returning false if the tile was
    /// in some other state.
    pub(crate) fn transition(&self, from: TileState, to: TileState) -> bool {
        let mut content = self.content.lock();
        if content.state == from {
            content.state = to;
            true
        } else {
            false
        }
    }

    /// Store a worker's result and mark the tile ready, unless it was
    /// evicted while the worker ran.
    pub(crate) fn publish(&self, payload: TilePayload) -> bool {
        let mut content = self.content.lock();
        if content.state == TileState::Evicted {
            return false;
        }
        content.texture = payload.texture;
        content.catalog = payload.catalog.map(Arc::new);
        content.elevation = payload.elevation;
        content.elevation_unavailable = payload.elevation_unavailable;
        content.state = TileState::ReadyToRender;
        true
    }

    pub fn catalog(&self) -> Option<Arc<Table>> {
        self.content.lock().catalog.clone()
    }

    pub fn is_catalog(&self) -> bool {
        self.dataset.is_catalog_level(self.level)
    }

    pub fn elevation_unavailable(&self) -> bool {
        self.content.lock().elevation_unavailable
    }

    /// The samples geometry was built from, or the tile's own samples if
    /// geometry has not been built yet.
    pub fn elevation(&self) -> Option<ElevationGrid> {
        if let Some(grid) = self.render.lock().elevation.clone() {
            return Some(grid);
        }
        self.content.lock().elevation.clone()
    }

    /// Average altitude in meters, if this tile knows its elevation.
    pub fn elevation_average(&self) -> Option<f64> {
        self.elevation().map(|grid| grid.average())
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn touch(&self, access: u64) {
        self.last_access.store(access, Ordering::Relaxed);
    }

    /// The last frame in which the traversal visited this tile.
    pub fn visited_generation(&self) -> u64 {
        self.visited_generation.load(Ordering::Relaxed)
    }

    pub fn visit(&self, generation: u64) {
        self.visited_generation.fetch_max(generation, Ordering::Relaxed);
    }

    /// The last frame in which this tile or a descendant was drawn.
    pub fn rendered_at_or_below(&self) -> u64 {
        self.rendered_at_or_below.load(Ordering::Relaxed)
    }

    pub fn stamp_rendered(&self, generation: u64) {
        self.rendered_at_or_below
            .fetch_max(generation, Ordering::Relaxed);
    }

    pub fn bounding_sphere(&self) -> Sphere {
        self.render.lock().sphere
    }

    /// Top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Point3<f64>; 4] {
        self.render.lock().corners
    }

    pub fn local_center(&self) -> Point3<f64> {
        self.render.lock().local_center
    }

    pub fn has_geometry(&self) -> bool {
        self.render.lock().vertex_buffer.is_some()
    }

    pub(crate) fn render_state(&self) -> TileRenderGuard<'_> {
        TileRenderGuard {
            inner: self.render.lock(),
        }
    }

    /// Build the vertex buffer and upload the texture if that has not been
    /// done yet. Returns false while the tile is not ready. `fallback` is
    /// asked for elevation only when this tile wants it and has none of its
    /// own.
    pub fn create_geometry<F>(
        &self,
        pool: &mut ResourcePool,
        gpu: &mut dyn TileGpu,
        show_elevation: bool,
        fallback: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Option<ElevationGrid>,
    {
        let mut content = self.content.lock();
        if content.state != TileState::ReadyToRender {
            return Ok(false);
        }
        let mut render = self.render.lock();
        if render.vertex_buffer.is_some() {
            return Ok(true);
        }

        let elevation = if show_elevation && self.dataset.wants_elevation() {
            content.elevation.clone().or_else(fallback)
        } else {
            None
        };

        let image_set = self.dataset.image_set();
        let projection = self.dataset.projection();
        let grid = GridPoints::build(|_, _, u, v| {
            let (lat, lng) = projection.grid_point(image_set, self.level, self.x, self.y, u, v);
            let altitude = elevation
                .as_ref()
                .map(|e| e.altitude_at(u, v))
                .unwrap_or(0f64);
            projection.point_to_3d(lat, lng, altitude)
        });
        let half = GRID_SUBDIVISIONS / 2;
        let center = *grid.at(half, half);
        let vertices = grid.to_vertices(&center, projection.is_inside_out());

        let vertex_buffer = pool.acquire_vertex_buffer(gpu, &vertices)?;
        let texture = match content.texture.as_ref() {
            Some(data) => match pool.acquire_texture(gpu, data) {
                Ok(texture) => Some(texture),
                Err(e) => {
                    pool.release_vertex_buffer(gpu, vertex_buffer);
                    return Err(e);
                }
            },
            None => None,
        };
        // Pixels live on the GPU from here on.
        content.texture = None;

        let (samples, corners) =
            Self::outline(&self.dataset, self.level, self.x, self.y, elevation.as_ref());
        render.sphere = Sphere::enclosing(&samples);
        render.corners = corners;
        render.local_center = center;
        render.vertex_buffer = Some(vertex_buffer);
        render.texture = texture;
        render.elevation = elevation;
        Ok(true)
    }

    /// Return GPU resources to the pool and drop decoded data. The tile is
    /// left `Evicted` so that late worker results are discarded.
    pub fn clean_up(&self, pool: &mut ResourcePool, gpu: &mut dyn TileGpu) {
        {
            let mut content = self.content.lock();
            content.state = TileState::Evicted;
            content.texture = None;
            content.catalog = None;
            content.elevation = None;
        }
        let mut render = self.render.lock();
        if let Some(buffer) = render.vertex_buffer.take() {
            pool.release_vertex_buffer(gpu, buffer);
        }
        if let Some(texture) = render.texture.take() {
            pool.release_texture(gpu, texture);
        }
        render.elevation = None;
    }
}

/// Render-thread access to a tile's drawing state.
pub(crate) struct TileRenderGuard<'a> {
    inner: MutexGuard<'a, TileRender>,
}

impl<'a> TileRenderGuard<'a> {
    pub fn blend(&mut self, part: usize) -> &mut BlendState {
        &mut self.inner.blend[part]
    }

    pub fn vertex_buffer(&self) -> Option<PooledVertexBuffer> {
        self.inner.vertex_buffer
    }

    pub fn texture(&self) -> Option<PooledTexture> {
        self.inner.texture
    }

    pub fn local_center(&self) -> Point3<f64> {
        self.inner.local_center
    }

}
