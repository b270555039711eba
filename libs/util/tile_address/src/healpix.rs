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
//! Nested HEALPix pixels laid out as twelve side-by-side face quadtrees.
//!
//! A tile at order `L` is addressed as `(L, face * 2^L + ix, iy)`, so that
//! children are `(L + 1, 2x + dx, 2y + dy)` exactly like any other quadtree.

/// Number of base faces at order 0.
pub const FACES: u32 = 12;

pub fn nside(level: u32) -> u64 {
    1 << level
}

/// Split a tile x into (face, ix).
pub fn face_and_ix(level: u32, x: u32) -> (u32, u32) {
    let nside = nside(level) as u32;
    (x / nside, x % nside)
}

/// Nested pixel number of the tile.
pub fn pixel_index(level: u32, x: u32, y: u32) -> u64 {
    let (face, ix) = face_and_ix(level, x);
    (face as u64) * nside(level) * nside(level) + interleave(ix, y)
}

/// Inverse of `pixel_index`.
pub fn tile_from_pixel(level: u32, pixel: u64) -> (u32, u32) {
    let per_face = nside(level) * nside(level);
    let face = (pixel / per_face) as u32;
    let (ix, iy) = deinterleave(pixel % per_face);
    (face * nside(level) as u32 + ix, iy)
}

/// HiPS directories hold ten thousand pixels each.
pub fn directory_index(pixel: u64) -> u64 {
    (pixel / 10_000) * 10_000
}

/// Relative path in the HiPS layout, without extension.
pub fn hips_path(level: u32, x: u32, y: u32) -> String {
    let pixel = pixel_index(level, x, y);
    format!(
        "Norder{}/Dir{}/Npix{}",
        level,
        directory_index(pixel),
        pixel
    )
}

/// Even bits from ix, odd bits from iy.
pub fn interleave(ix: u32, iy: u32) -> u64 {
    let mut out = 0u64;
    for bit in 0..32 {
        out |= (((ix >> bit) & 1) as u64) << (2 * bit);
        out |= (((iy >> bit) & 1) as u64) << (2 * bit + 1);
    }
    out
}

pub fn deinterleave(value: u64) -> (u32, u32) {
    let mut ix = 0u32;
    let mut iy = 0u32;
    for bit in 0..32 {
        ix |= (((value >> (2 * bit)) & 1) as u32) << bit;
        iy |= (((value >> (2 * bit + 1)) & 1) as u32) << bit;
    }
    (ix, iy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_faces() {
        for face in 0..FACES {
            assert_eq!(pixel_index(0, face, 0), face as u64);
            assert_eq!(tile_from_pixel(0, face as u64), (face, 0));
        }
    }

    #[test]
    fn test_children_are_nested_pixels() {
        // Nested numbering puts the four children of p at 4p..4p+3.
        let parent = pixel_index(3, 5 * 8 + 2, 6);
        let mut children = Vec::new();
        for dy in 0..2 {
            for dx in 0..2 {
                children.push(pixel_index(4, (5 * 8 + 2) * 2 + dx, 6 * 2 + dy));
            }
        }
        children.sort_unstable();
        assert_eq!(children, vec![parent * 4, parent * 4 + 1, parent * 4 + 2, parent * 4 + 3]);
    }

    #[test]
    fn test_pixel_round_trip() {
        for &(level, x, y) in &[(0, 11, 0), (3, 8 * 7 + 3, 5), (10, 1024 * 11 + 1023, 1023)] {
            let pixel = pixel_index(level, x, y);
            assert_eq!(tile_from_pixel(level, pixel), (x, y));
        }
    }

    #[test]
    fn test_hips_path() {
        assert_eq!(hips_path(0, 3, 0), "Norder0/Dir0/Npix3");
        // At order 5 each face holds 1024 pixels.
        assert_eq!(hips_path(5, 11 * 32, 0), "Norder5/Dir10000/Npix11264");
        assert_eq!(directory_index(29_999), 20_000);
    }
}
