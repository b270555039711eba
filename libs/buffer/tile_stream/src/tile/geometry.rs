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
//! The fixed tile grid: vertex placement and the crack-filling index variants.

use crate::gpu::TileVertex;
use geometry::Sphere;
use nalgebra::{Point3, Vector3};

/// Cells along each edge of a tile.
pub const GRID_SUBDIVISIONS: usize = 32;

/// Vertices along each edge of a tile.
pub const GRID_VERTICES: usize = GRID_SUBDIVISIONS + 1;

pub const GRID_VERTEX_COUNT: usize = GRID_VERTICES * GRID_VERTICES;

/// Each partition covers one quarter of the tile, in grid order: top-left,
/// top-right, bottom-left, bottom-right.
pub const PARTS: usize = 4;

// Accommodation bits, one per grid edge. A set bit means the neighbour across
// that edge is coarser (or missing), so the edge must skip its odd vertices.
pub const EDGE_BOTTOM: u8 = 1;
pub const EDGE_RIGHT: u8 = 2;
pub const EDGE_TOP: u8 = 4;
pub const EDGE_LEFT: u8 = 8;
pub const ALL_EDGES: u8 = EDGE_BOTTOM | EDGE_RIGHT | EDGE_TOP | EDGE_LEFT;

pub fn grid_index(row: usize, col: usize) -> u16 {
    (row * GRID_VERTICES + col) as u16
}

/// Fractional tile position of a grid vertex: u runs along x, v along rows.
pub fn grid_uv(row: usize, col: usize) -> (f64, f64) {
    (
        col as f64 / GRID_SUBDIVISIONS as f64,
        row as f64 / GRID_SUBDIVISIONS as f64,
    )
}

/// The grid part that a grid cell falls into.
pub fn part_of_cell(row: usize, col: usize) -> usize {
    let half = GRID_SUBDIVISIONS / 2;
    (row / half) * 2 + col / half
}

/// Build the four partition index lists for an accommodation mask.
///
/// The grid is triangulated in 2x2 cell blocks, each as an eight triangle fan
/// around the block center. A block side on an accommodated tile edge drops
/// its midpoint from the fan so that the edge only uses even vertices, which
/// are exactly the vertices of the coarser neighbour.
pub fn partition_indices(mask: u8) -> [Vec<u16>; PARTS] {
    let mut parts: [Vec<u16>; PARTS] = Default::default();
    let last = GRID_SUBDIVISIONS;
    for block_row in 0..GRID_SUBDIVISIONS / 2 {
        for block_col in 0..GRID_SUBDIVISIONS / 2 {
            let r = block_row * 2;
            let c = block_col * 2;
            let center = grid_index(r + 1, c + 1);

            let skip_top = r == 0 && mask & EDGE_TOP != 0;
            let skip_right = c + 2 == last && mask & EDGE_RIGHT != 0;
            let skip_bottom = r + 2 == last && mask & EDGE_BOTTOM != 0;
            let skip_left = c == 0 && mask & EDGE_LEFT != 0;

            // Clockwise ring in grid space, starting at the top-left corner.
            let mut ring = Vec::with_capacity(8);
            ring.push(grid_index(r, c));
            if !skip_top {
                ring.push(grid_index(r, c + 1));
            }
            ring.push(grid_index(r, c + 2));
            if !skip_right {
                ring.push(grid_index(r + 1, c + 2));
            }
            ring.push(grid_index(r + 2, c + 2));
            if !skip_bottom {
                ring.push(grid_index(r + 2, c + 1));
            }
            ring.push(grid_index(r + 2, c));
            if !skip_left {
                ring.push(grid_index(r + 1, c));
            }

            let part = &mut parts[part_of_cell(r, c)];
            for i in 0..ring.len() {
                part.push(center);
                part.push(ring[i]);
                part.push(ring[(i + 1) % ring.len()]);
            }
        }
    }
    parts
}

/// Positions for every grid vertex, not yet made relative to a local center.
pub struct GridPoints {
    pub points: Vec<Point3<f64>>,
}

impl GridPoints {
    pub fn build<F>(mut place: F) -> Self
    where
        F: FnMut(usize, usize, f64, f64) -> Point3<f64>,
    {
        let mut points = Vec::with_capacity(GRID_VERTEX_COUNT);
        for row in 0..GRID_VERTICES {
            for col in 0..GRID_VERTICES {
                let (u, v) = grid_uv(row, col);
                points.push(place(row, col, u, v));
            }
        }
        Self { points }
    }

    pub fn at(&self, row: usize, col: usize) -> &Point3<f64> {
        &self.points[row * GRID_VERTICES + col]
    }

    /// Top-left, top-right, bottom-right, bottom-left.
    pub fn corners(&self) -> [Point3<f64>; 4] {
        let last = GRID_SUBDIVISIONS;
        [
            *self.at(0, 0),
            *self.at(0, last),
            *self.at(last, last),
            *self.at(last, 0),
        ]
    }

    pub fn bounding_sphere(&self) -> Sphere {
        Sphere::enclosing(&self.corners())
    }

    /// Vertices relative to `center`, with normals pointing away from the
    /// body's origin (or toward it for inside-out panoramas).
    pub fn to_vertices(&self, center: &Point3<f64>, inside_out: bool) -> Vec<TileVertex> {
        let mut vertices = Vec::with_capacity(self.points.len());
        for row in 0..GRID_VERTICES {
            for col in 0..GRID_VERTICES {
                let p = self.at(row, col);
                let rel = p - center;
                let mut n = p
                    .coords
                    .try_normalize(f64::EPSILON)
                    .unwrap_or_else(Vector3::zeros);
                if inside_out {
                    n = -n;
                }
                let (u, v) = grid_uv(row, col);
                vertices.push(TileVertex {
                    position: [rel.x as f32, rel.y as f32, rel.z as f32],
                    normal: [n.x as f32, n.y as f32, n.z as f32],
                    tex_coord: [u as f32, v as f32],
                });
            }
        }
        vertices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn triangle_count(parts: &[Vec<u16>; PARTS]) -> usize {
        parts.iter().map(|p| p.len() / 3).sum()
    }

    fn used_vertices(parts: &[Vec<u16>; PARTS]) -> HashSet<u16> {
        parts.iter().flatten().copied().collect()
    }

    #[test]
    fn test_full_grid_triangle_count() {
        let parts = partition_indices(0);
        assert_eq!(triangle_count(&parts), GRID_SUBDIVISIONS * GRID_SUBDIVISIONS * 2);
        for part in &parts {
            assert_eq!(part.len() / 3, GRID_SUBDIVISIONS * GRID_SUBDIVISIONS / 2);
        }
        assert_eq!(used_vertices(&parts).len(), GRID_VERTEX_COUNT);
    }

    #[test]
    fn test_accommodated_edges_skip_odd_vertices() {
        let parts = partition_indices(EDGE_BOTTOM | EDGE_LEFT);
        let used = used_vertices(&parts);
        let last = GRID_SUBDIVISIONS;
        for i in 0..GRID_VERTICES {
            let bottom = grid_index(last, i);
            let left = grid_index(i, 0);
            let top = grid_index(0, i);
            assert_eq!(used.contains(&bottom), i % 2 == 0);
            assert_eq!(used.contains(&left), i % 2 == 0);
            assert!(used.contains(&top));
        }
        // One fewer triangle per block along each accommodated edge.
        assert_eq!(
            triangle_count(&parts),
            GRID_SUBDIVISIONS * GRID_SUBDIVISIONS * 2 - 2 * (GRID_SUBDIVISIONS / 2)
        );
    }

    #[test]
    fn test_all_variants_are_in_range() {
        for mask in 0..=ALL_EDGES {
            for part in partition_indices(mask).iter() {
                assert_eq!(part.len() % 3, 0);
                assert!(part.iter().all(|&i| (i as usize) < GRID_VERTEX_COUNT));
            }
        }
    }

    #[test]
    fn test_part_of_cell() {
        assert_eq!(part_of_cell(0, 0), 0);
        assert_eq!(part_of_cell(0, 31), 1);
        assert_eq!(part_of_cell(16, 0), 2);
        assert_eq!(part_of_cell(31, 16), 3);
    }

    #[test]
    fn test_grid_points_corners() {
        let grid = GridPoints::build(|_, _, u, v| Point3::new(u, v, 0f64));
        let corners = grid.corners();
        assert_eq!(corners[0], Point3::new(0f64, 0f64, 0f64));
        assert_eq!(corners[1], Point3::new(1f64, 0f64, 0f64));
        assert_eq!(corners[2], Point3::new(1f64, 1f64, 0f64));
        assert_eq!(corners[3], Point3::new(0f64, 1f64, 0f64));
        let vertices = grid.to_vertices(&Point3::new(0.5f64, 0.5f64, 0f64), false);
        assert_eq!(vertices.len(), GRID_VERTEX_COUNT);
        assert_eq!(vertices[0].position, [-0.5f32, -0.5f32, 0f32]);
        assert_eq!(vertices[GRID_VERTEX_COUNT - 1].tex_coord, [1f32, 1f32]);
    }
}
