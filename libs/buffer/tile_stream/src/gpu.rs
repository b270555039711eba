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
use fxhash::FxHashMap;
use static_assertions::const_assert_eq;
use std::mem;
use tile_address::TileKey;
use zerocopy::{AsBytes, FromBytes};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct VertexBufferId(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct IndexBufferId(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TextureId(pub u64);

#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug, Default, PartialEq)]
pub struct TileVertex {
    pub position: [f32; 3], // relative to the tile's local center
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
}
const_assert_eq!(mem::size_of::<TileVertex>(), 32);

/// Decoded RGBA8 pixels ready for upload.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub srgb: bool,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn shape(&self) -> TextureShape {
        TextureShape {
            width: self.width,
            height: self.height,
            srgb: self.srgb,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TextureShape {
    pub width: u32,
    pub height: u32,
    pub srgb: bool,
}

/// One indexed draw of one quadrant of one tile.
#[derive(Clone, Debug)]
pub struct DrawCall {
    pub tile: TileKey,
    pub part: usize,
    pub vertex_buffer: VertexBufferId,
    pub index_buffer: IndexBufferId,
    pub index_count: u32,
    pub texture: Option<TextureId>,
    pub opacity: f32,
    pub local_center: [f64; 3],
}

/// The device capability the tile engine needs. Everything here is called
/// from the render thread only.
pub trait TileGpu {
    fn create_vertex_buffer(&mut self, vertices: &[TileVertex]) -> Result<VertexBufferId>;
    fn write_vertex_buffer(&mut self, id: VertexBufferId, vertices: &[TileVertex]) -> Result<()>;
    fn destroy_vertex_buffer(&mut self, id: VertexBufferId);

    fn create_index_buffer(&mut self, indices: &[u16]) -> Result<IndexBufferId>;
    fn destroy_index_buffer(&mut self, id: IndexBufferId);

    fn create_texture(&mut self, texture: &TextureData) -> Result<TextureId>;
    fn write_texture(&mut self, id: TextureId, texture: &TextureData) -> Result<()>;
    fn destroy_texture(&mut self, id: TextureId);

    fn draw_indexed(&mut self, draw: &DrawCall);
}

/// A device that keeps resources in host memory and records draws. Used by
/// the headless driver and by tests.
#[derive(Debug, Default)]
pub struct RecordingGpu {
    next_id: u64,
    vertex_buffers: FxHashMap<VertexBufferId, usize>,
    index_buffers: FxHashMap<IndexBufferId, usize>,
    textures: FxHashMap<TextureId, (u32, u32)>,
    draws: Vec<DrawCall>,
    vertex_buffers_created: usize,
    textures_created: usize,
    fail_allocations: bool,
}

impl RecordingGpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent create call fail, as if device memory ran out.
    pub fn set_fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    pub fn take_draws(&mut self) -> Vec<DrawCall> {
        mem::take(&mut self.draws)
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn live_vertex_buffers(&self) -> usize {
        self.vertex_buffers.len()
    }

    pub fn live_index_buffers(&self) -> usize {
        self.index_buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn vertex_buffers_created(&self) -> usize {
        self.vertex_buffers_created
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    fn allocate(&mut self) -> Result<u64> {
        if self.fail_allocations {
            bail!("out of device memory");
        }
        self.next_id += 1;
        Ok(self.next_id)
    }
}

impl TileGpu for RecordingGpu {
    fn create_vertex_buffer(&mut self, vertices: &[TileVertex]) -> Result<VertexBufferId> {
        let id = VertexBufferId(self.allocate()?);
        self.vertex_buffers.insert(id, vertices.len());
        self.vertex_buffers_created += 1;
        Ok(id)
    }

    fn write_vertex_buffer(&mut self, id: VertexBufferId, vertices: &[TileVertex]) -> Result<()> {
        match self.vertex_buffers.get(&id) {
            Some(&len) if len == vertices.len() => Ok(()),
            Some(&len) => bail!("vertex buffer holds {} vertices, not {}", len, vertices.len()),
            None => bail!("no such vertex buffer: {:?}", id),
        }
    }

    fn destroy_vertex_buffer(&mut self, id: VertexBufferId) {
        self.vertex_buffers.remove(&id);
    }

    fn create_index_buffer(&mut self, indices: &[u16]) -> Result<IndexBufferId> {
        let id = IndexBufferId(self.allocate()?);
        self.index_buffers.insert(id, indices.len());
        Ok(id)
    }

    fn destroy_index_buffer(&mut self, id: IndexBufferId) {
        self.index_buffers.remove(&id);
    }

    fn create_texture(&mut self, texture: &TextureData) -> Result<TextureId> {
        let id = TextureId(self.allocate()?);
        self.textures.insert(id, (texture.width, texture.height));
        self.textures_created += 1;
        Ok(id)
    }

    fn write_texture(&mut self, id: TextureId, texture: &TextureData) -> Result<()> {
        match self.textures.get(&id) {
            Some(&(w, h)) if w == texture.width && h == texture.height => Ok(()),
            Some(_) => bail!("texture {:?} has a different shape", id),
            None => bail!("no such texture: {:?}", id),
        }
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn draw_indexed(&mut self, draw: &DrawCall) {
        self.draws.push(draw.clone());
    }
}
