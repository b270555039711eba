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
    gpu::{IndexBufferId, TextureData, TextureId, TextureShape, TileGpu, TileVertex, VertexBufferId},
    tile::geometry::{partition_indices, ALL_EDGES, PARTS},
};
use anyhow::Result;
use fxhash::FxHashMap;
use log::trace;

/// A vertex buffer on loan from the pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PooledVertexBuffer {
    id: VertexBufferId,
    vertex_count: usize,
}

impl PooledVertexBuffer {
    pub fn id(&self) -> VertexBufferId {
        self.id
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }
}

/// A texture on loan from the pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PooledTexture {
    id: TextureId,
    shape: TextureShape,
}

impl PooledTexture {
    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn shape(&self) -> TextureShape {
        self.shape
    }
}

/// One shared partition index buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IndexPart {
    pub buffer: IndexBufferId,
    pub count: u32,
}

/// Reusable GPU resources, keyed by shape so that tiles cycling through
/// eviction recycle memory instead of churning the allocator.
///
/// The pool lives on the render thread and is never shared.
#[derive(Debug)]
pub struct ResourcePool {
    free_vertex_buffers: FxHashMap<usize, Vec<VertexBufferId>>,
    free_textures: FxHashMap<TextureShape, Vec<TextureId>>,

    // Every tile uses the same grid, so the crack-filling variants are
    // built once per mask and shared by all tiles.
    index_variants: FxHashMap<u8, [IndexPart; PARTS]>,

    vertex_buffers_on_loan: usize,
    textures_on_loan: usize,
    max_free_per_shape: usize,
}

impl ResourcePool {
    pub fn new(max_free_per_shape: usize) -> Self {
        Self {
            free_vertex_buffers: FxHashMap::default(),
            free_textures: FxHashMap::default(),
            index_variants: FxHashMap::default(),
            vertex_buffers_on_loan: 0,
            textures_on_loan: 0,
            max_free_per_shape,
        }
    }

    /// Borrow a vertex buffer holding `vertices`, reusing a free one of the
    /// same length if available.
    pub fn acquire_vertex_buffer(
        &mut self,
        gpu: &mut dyn TileGpu,
        vertices: &[TileVertex],
    ) -> Result<PooledVertexBuffer> {
        let vertex_count = vertices.len();
        let reused = self
            .free_vertex_buffers
            .get_mut(&vertex_count)
            .and_then(|free| free.pop());
        let id = match reused {
            Some(id) => {
                if let Err(e) = gpu.write_vertex_buffer(id, vertices) {
                    gpu.destroy_vertex_buffer(id);
                    return Err(e);
                }
                id
            }
            None => gpu.create_vertex_buffer(vertices)?,
        };
        self.vertex_buffers_on_loan += 1;
        Ok(PooledVertexBuffer { id, vertex_count })
    }

    pub fn release_vertex_buffer(&mut self, gpu: &mut dyn TileGpu, buffer: PooledVertexBuffer) {
        self.vertex_buffers_on_loan = self.vertex_buffers_on_loan.saturating_sub(1);
        let free = self
            .free_vertex_buffers
            .entry(buffer.vertex_count)
            .or_insert_with(Vec::new);
        if free.len() < self.max_free_per_shape {
            free.push(buffer.id);
        } else {
            gpu.destroy_vertex_buffer(buffer.id);
        }
    }

    pub fn acquire_texture(
        &mut self,
        gpu: &mut dyn TileGpu,
        texture: &TextureData,
    ) -> Result<PooledTexture> {
        let shape = texture.shape();
        let reused = self.free_textures.get_mut(&shape).and_then(|free| free.pop());
        let id = match reused {
            Some(id) => {
                if let Err(e) = gpu.write_texture(id, texture) {
                    gpu.destroy_texture(id);
                    return Err(e);
                }
                id
            }
            None => gpu.create_texture(texture)?,
        };
        self.textures_on_loan += 1;
        Ok(PooledTexture { id, shape })
    }

    pub fn release_texture(&mut self, gpu: &mut dyn TileGpu, texture: PooledTexture) {
        self.textures_on_loan = self.textures_on_loan.saturating_sub(1);
        let free = self
            .free_textures
            .entry(texture.shape)
            .or_insert_with(Vec::new);
        if free.len() < self.max_free_per_shape {
            free.push(texture.id);
        } else {
            gpu.destroy_texture(texture.id);
        }
    }

    /// The four partition index buffers for an accommodation mask, created
    /// on first use.
    pub fn index_parts(&mut self, gpu: &mut dyn TileGpu, mask: u8) -> Result<[IndexPart; PARTS]> {
        let mask = mask & ALL_EDGES;
        if let Some(parts) = self.index_variants.get(&mask) {
            return Ok(*parts);
        }
        let lists = partition_indices(mask);
        let mut created: Vec<IndexPart> = Vec::with_capacity(PARTS);
        for indices in &lists {
            match gpu.create_index_buffer(indices) {
                Ok(buffer) => created.push(IndexPart {
                    buffer,
                    count: indices.len() as u32,
                }),
                Err(e) => {
                    for part in created {
                        gpu.destroy_index_buffer(part.buffer);
                    }
                    return Err(e);
                }
            }
        }
        let parts = [created[0], created[1], created[2], created[3]];
        trace!("built index variant for accommodation mask {:04b}", mask);
        self.index_variants.insert(mask, parts);
        Ok(parts)
    }

    pub fn vertex_buffers_on_loan(&self) -> usize {
        self.vertex_buffers_on_loan
    }

    pub fn textures_on_loan(&self) -> usize {
        self.textures_on_loan
    }

    pub fn free_vertex_buffers(&self) -> usize {
        self.free_vertex_buffers.values().map(|v| v.len()).sum()
    }

    pub fn free_textures(&self) -> usize {
        self.free_textures.values().map(|v| v.len()).sum()
    }

    pub fn index_variant_count(&self) -> usize {
        self.index_variants.len()
    }

    /// Destroy everything the pool holds. Loaned resources are the caller's
    /// to return first.
    pub fn clear(&mut self, gpu: &mut dyn TileGpu) {
        for (_, free) in self.free_vertex_buffers.drain() {
            for id in free {
                gpu.destroy_vertex_buffer(id);
            }
        }
        for (_, free) in self.free_textures.drain() {
            for id in free {
                gpu.destroy_texture(id);
            }
        }
        for (_, parts) in self.index_variants.drain() {
            for part in parts {
                gpu.destroy_index_buffer(part.buffer);
            }
        }
    }
}
