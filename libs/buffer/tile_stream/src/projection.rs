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
//! Per-projection behavior for tiles: where grid points land on the body,
//! which tiles are roots and neighbours, and whether a point lies in a tile.

use crate::elevation::{ElevationGrid, DEM_SAMPLES, DEM_SCALE_FACTOR};
use nalgebra::Point3;
use std::{f64::consts::FRAC_PI_4, fmt::Debug, ops::Range};
use tile_address::{
    bounds::{mercator_row_latitude, tile_bounds},
    healpix, DataSetType, ImageSet, Projection,
};

/// Map geographic degrees plus altitude in meters onto the unit body.
pub fn geo_to_3d(lat: f64, lng: f64, altitude: f64) -> Point3<f64> {
    let lat = lat.clamp(-90f64, 90f64).to_radians();
    let lng = lng.clamp(-180f64, 180f64).to_radians();
    let radius = 1f64 + altitude / DEM_SCALE_FACTOR;
    Point3::new(
        lng.cos() * lat.cos() * radius,
        lat.sin() * radius,
        lng.sin() * lat.cos() * radius,
    )
}

/// Which grid edge a neighbour lies across.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    Bottom,
    Right,
    Top,
    Left,
}

pub trait TileProjection: Debug + Send + Sync {
    fn kind(&self) -> Projection;

    /// Level 0 tiles, as (x, y).
    fn roots(&self, image_set: &ImageSet) -> Vec<(u32, u32)>;

    /// Geographic (lat, lng) in degrees of fractional tile position (u, v);
    /// u runs along x and v down the texture rows.
    fn grid_point(&self, image_set: &ImageSet, level: u32, x: u32, y: u32, u: f64, v: f64)
        -> (f64, f64);

    fn contains(&self, image_set: &ImageSet, level: u32, x: u32, y: u32, lat: f64, lng: f64)
        -> bool;

    /// Inside-out projections flip the handedness of the sphere.
    fn point_to_3d(&self, lat: f64, lng: f64, altitude: f64) -> Point3<f64> {
        geo_to_3d(lat, lng, altitude)
    }

    fn is_inside_out(&self) -> bool {
        false
    }

    /// Children in traversal order, each with the grid part of this tile it
    /// covers. Mercator and bottoms-up sets visit the odd row first.
    fn children(&self, image_set: &ImageSet, x: u32, y: u32) -> [(u32, u32, usize); 4] {
        let y_offset = image_set.child_row_offset();
        let mut out = [(0, 0, 0); 4];
        for y1 in 0..2u32 {
            for x1 in 0..2u32 {
                let dx = x1 % 2;
                let dy = (y1 + y_offset) % 2;
                let row_half = if image_set.bottoms_up() { 1 - dy } else { dy };
                out[(y1 * 2 + x1) as usize] =
                    (x * 2 + dx, y * 2 + dy, (row_half * 2 + dx) as usize);
            }
        }
        out
    }

    /// The same-level tile across a grid edge, if the tiling has one.
    fn neighbor(&self, image_set: &ImageSet, level: u32, x: u32, y: u32, edge: Edge)
        -> Option<(u32, u32)> {
        let (columns, rows) = self.level_extent(image_set, level);
        let down = |y: u32| if y + 1 < rows.end { Some(y + 1) } else { None };
        let up = |y: u32| y.checked_sub(1);
        let (south, north) = if image_set.bottoms_up() {
            (up(y), down(y))
        } else {
            (down(y), up(y))
        };
        match edge {
            Edge::Bottom => south.map(|y| (x, y)),
            Edge::Top => north.map(|y| (x, y)),
            Edge::Right if x + 1 < columns.end => Some((x + 1, y)),
            Edge::Left => x.checked_sub(1).map(|x| (x, y)),
            _ => None,
        }
    }

    /// Valid x and y ranges at a level.
    fn level_extent(&self, image_set: &ImageSet, level: u32) -> (Range<u32>, Range<u32>);

    /// Synthesize elevation for a child from its parent's samples.
    fn dem_from_parent(&self, parent: &ElevationGrid, part: usize) -> Option<ElevationGrid> {
        ElevationGrid::from_parent_part(parent, part)
    }

    /// Samples expected in an elevation tile for this projection.
    fn dem_sample_count(&self) -> usize {
        DEM_SAMPLES
    }
}

/// Pick the strategy for an image set.
pub fn projection_for(image_set: &ImageSet) -> Box<dyn TileProjection> {
    match (image_set.projection(), image_set.data_set_type()) {
        (Projection::Equirectangular, DataSetType::Panorama) => Box::new(PanoramaProjection),
        (Projection::Equirectangular, _) => Box::new(EquirectangularProjection),
        (Projection::Mercator, _) => Box::new(MercatorProjection),
        (Projection::Healpix, _) => Box::new(HealpixProjection),
    }
}

fn rect_grid_point(image_set: &ImageSet, level: u32, x: u32, y: u32, u: f64, v: f64) -> (f64, f64) {
    match tile_bounds(image_set, level, x, y) {
        Some(b) => (
            b.lat_max - v * (b.lat_max - b.lat_min),
            b.lng_min + u * (b.lng_max - b.lng_min),
        ),
        None => (0f64, 0f64),
    }
}

fn rect_contains(image_set: &ImageSet, level: u32, x: u32, y: u32, lat: f64, lng: f64) -> bool {
    tile_bounds(image_set, level, x, y)
        .map(|b| b.contains(lat, lng))
        .unwrap_or(false)
}

fn equirect_extent(image_set: &ImageSet, level: u32) -> (Range<u32>, Range<u32>) {
    let deg = image_set.base_tile_degrees() / 2f64.powi(level as i32);
    let columns = (360f64 / deg).ceil() as u32;
    let rows = (180f64 / deg).ceil() as u32;
    (0..columns.max(1), 0..rows.max(1))
}

#[derive(Debug)]
pub struct EquirectangularProjection;

impl TileProjection for EquirectangularProjection {
    fn kind(&self) -> Projection {
        Projection::Equirectangular
    }

    fn roots(&self, image_set: &ImageSet) -> Vec<(u32, u32)> {
        let (columns, rows) = equirect_extent(image_set, 0);
        rows.flat_map(|y| columns.clone().map(move |x| (x, y)))
            .collect()
    }

    fn grid_point(&self, image_set: &ImageSet, level: u32, x: u32, y: u32, u: f64, v: f64)
        -> (f64, f64) {
        rect_grid_point(image_set, level, x, y, u, v)
    }

    fn contains(&self, image_set: &ImageSet, level: u32, x: u32, y: u32, lat: f64, lng: f64)
        -> bool {
        rect_contains(image_set, level, x, y, lat, lng)
    }

    fn level_extent(&self, image_set: &ImageSet, level: u32) -> (Range<u32>, Range<u32>) {
        equirect_extent(image_set, level)
    }
}

/// Equirectangular imagery seen from inside the sphere.
#[derive(Debug)]
pub struct PanoramaProjection;

impl TileProjection for PanoramaProjection {
    fn kind(&self) -> Projection {
        Projection::Equirectangular
    }

    fn roots(&self, image_set: &ImageSet) -> Vec<(u32, u32)> {
        EquirectangularProjection.roots(image_set)
    }

    fn grid_point(&self, image_set: &ImageSet, level: u32, x: u32, y: u32, u: f64, v: f64)
        -> (f64, f64) {
        rect_grid_point(image_set, level, x, y, u, v)
    }

    fn contains(&self, image_set: &ImageSet, level: u32, x: u32, y: u32, lat: f64, lng: f64)
        -> bool {
        rect_contains(image_set, level, x, y, lat, lng)
    }

    fn point_to_3d(&self, lat: f64, lng: f64, altitude: f64) -> Point3<f64> {
        let p = geo_to_3d(lat, lng, altitude);
        Point3::new(-p.x, p.y, p.z)
    }

    fn is_inside_out(&self) -> bool {
        true
    }

    fn level_extent(&self, image_set: &ImageSet, level: u32) -> (Range<u32>, Range<u32>) {
        equirect_extent(image_set, level)
    }

    fn dem_from_parent(&self, _parent: &ElevationGrid, _part: usize) -> Option<ElevationGrid> {
        None
    }
}

#[derive(Debug)]
pub struct MercatorProjection;

impl TileProjection for MercatorProjection {
    fn kind(&self) -> Projection {
        Projection::Mercator
    }

    fn roots(&self, _image_set: &ImageSet) -> Vec<(u32, u32)> {
        vec![(0, 0)]
    }

    fn grid_point(&self, _image_set: &ImageSet, level: u32, x: u32, y: u32, u: f64, v: f64)
        -> (f64, f64) {
        let n = 2f64.powi(level as i32);
        (
            mercator_row_latitude(level, y as f64 + v),
            (x as f64 + u) / n * 360f64 - 180f64,
        )
    }

    fn contains(&self, image_set: &ImageSet, level: u32, x: u32, y: u32, lat: f64, lng: f64)
        -> bool {
        rect_contains(image_set, level, x, y, lat, lng)
    }

    fn level_extent(&self, _image_set: &ImageSet, level: u32) -> (Range<u32>, Range<u32>) {
        let n = 1u32 << level;
        (0..n, 0..n)
    }
}

const HEALPIX_FACE_ROW: [i32; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
const HEALPIX_FACE_PHI: [i32; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

/// Nested HEALPix, with tiles laid out per `tile_address::healpix`.
#[derive(Debug)]
pub struct HealpixProjection;

impl HealpixProjection {
    /// Position within a face, in units of `nside` pixels, to (lat, lng).
    fn face_to_geo(face: u32, nside: f64, fx: f64, fy: f64) -> (f64, f64) {
        let face = face as usize % 12;
        let jr = HEALPIX_FACE_ROW[face] as f64 * nside - fx - fy;
        let (z, nr) = if jr < nside {
            let nr = jr;
            (1f64 - nr * nr / (3f64 * nside * nside), nr)
        } else if jr > 3f64 * nside {
            let nr = 4f64 * nside - jr;
            (nr * nr / (3f64 * nside * nside) - 1f64, nr)
        } else {
            (2f64 * (2f64 * nside - jr) / (3f64 * nside), nside)
        };
        let phi = if nr <= f64::EPSILON {
            0f64
        } else {
            FRAC_PI_4 * (HEALPIX_FACE_PHI[face] as f64 * nr + fx - fy) / nr
        };
        let lat = z.clamp(-1f64, 1f64).asin().to_degrees();
        let mut lng = phi.to_degrees();
        if lng > 180f64 {
            lng -= 360f64;
        }
        (lat, lng)
    }

    /// (lat, lng) to (face, ix, iy) at `nside`.
    fn geo_to_face(nside: u64, lat: f64, lng: f64) -> (u32, u32, u32) {
        let z = lat.to_radians().sin();
        let za = z.abs();
        let mut tt = (lng.to_radians() / std::f64::consts::FRAC_PI_2).rem_euclid(4f64);
        if tt >= 4f64 {
            tt = 0f64;
        }
        let ns = nside as f64;
        let last = nside.saturating_sub(1);
        if za <= 2f64 / 3f64 {
            let temp1 = ns * (0.5f64 + tt);
            let temp2 = ns * z * 0.75f64;
            let jp = (temp1 - temp2).max(0f64) as u64;
            let jm = (temp1 + temp2).max(0f64) as u64;
            let ifp = jp / nside;
            let ifm = jm / nside;
            let face = if ifp == ifm {
                (ifp % 4) + 4
            } else if ifp < ifm {
                ifp % 4
            } else {
                (ifm % 4) + 8
            };
            let ix = jm & last;
            let iy = last - (jp & last);
            (face as u32, ix as u32, iy as u32)
        } else {
            let ntt = (tt as u64).min(3);
            let tp = tt - ntt as f64;
            let tmp = ns * (3f64 * (1f64 - za)).sqrt();
            let jp = ((tp * tmp) as u64).min(last);
            let jm = (((1f64 - tp) * tmp) as u64).min(last);
            if z >= 0f64 {
                (ntt as u32, (last - jm) as u32, (last - jp) as u32)
            } else {
                ((ntt + 8) as u32, jp as u32, jm as u32)
            }
        }
    }
}

impl TileProjection for HealpixProjection {
    fn kind(&self) -> Projection {
        Projection::Healpix
    }

    fn roots(&self, _image_set: &ImageSet) -> Vec<(u32, u32)> {
        (0..healpix::FACES).map(|face| (face, 0)).collect()
    }

    fn grid_point(&self, _image_set: &ImageSet, level: u32, x: u32, y: u32, u: f64, v: f64)
        -> (f64, f64) {
        let (face, ix) = healpix::face_and_ix(level, x);
        let nside = healpix::nside(level) as f64;
        Self::face_to_geo(face, nside, ix as f64 + u, y as f64 + v)
    }

    fn contains(&self, _image_set: &ImageSet, level: u32, x: u32, y: u32, lat: f64, lng: f64)
        -> bool {
        let (face, ix, iy) = Self::geo_to_face(healpix::nside(level), lat, lng);
        let (tile_face, tile_ix) = healpix::face_and_ix(level, x);
        face == tile_face && ix == tile_ix && iy == y
    }

    fn neighbor(&self, _image_set: &ImageSet, level: u32, x: u32, y: u32, edge: Edge)
        -> Option<(u32, u32)> {
        // Only neighbours within the same base face are resolved.
        let nside = healpix::nside(level) as u32;
        let (face, ix) = healpix::face_and_ix(level, x);
        let (nix, niy) = match edge {
            Edge::Bottom => (Some(ix), y.checked_add(1).filter(|&y| y < nside)),
            Edge::Top => (Some(ix), y.checked_sub(1)),
            Edge::Right => (ix.checked_add(1).filter(|&x| x < nside), Some(y)),
            Edge::Left => (ix.checked_sub(1), Some(y)),
        };
        Some((face * nside + nix?, niy?))
    }

    fn level_extent(&self, _image_set: &ImageSet, level: u32) -> (Range<u32>, Range<u32>) {
        let nside = healpix::nside(level) as u32;
        (0..healpix::FACES * nside, 0..nside)
    }

    fn dem_from_parent(&self, _parent: &ElevationGrid, _part: usize) -> Option<ElevationGrid> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_geo_to_3d_axes() {
        assert_relative_eq!(geo_to_3d(0f64, 0f64, 0f64), Point3::new(1f64, 0f64, 0f64), epsilon = 1e-12);
        assert_relative_eq!(geo_to_3d(90f64, 0f64, 0f64), Point3::new(0f64, 1f64, 0f64), epsilon = 1e-12);
        assert_relative_eq!(geo_to_3d(0f64, 90f64, 0f64), Point3::new(0f64, 0f64, 1f64), epsilon = 1e-12);
        let raised = geo_to_3d(0f64, 0f64, DEM_SCALE_FACTOR);
        assert_relative_eq!(raised.x, 2f64, epsilon = 1e-12);
        // Out of range inputs are clamped.
        assert_relative_eq!(geo_to_3d(120f64, 0f64, 0f64), geo_to_3d(90f64, 0f64, 0f64));
    }

    #[test]
    fn test_panorama_mirrors_x() {
        let p = PanoramaProjection.point_to_3d(0f64, 0f64, 0f64);
        assert_relative_eq!(p.x, -1f64, epsilon = 1e-12);
        assert!(PanoramaProjection.is_inside_out());
    }

    #[test]
    fn test_strategy_selection() {
        let pano = ImageSet::new("p", "x", Projection::Equirectangular)
            .with_data_set_type(DataSetType::Panorama);
        assert!(projection_for(&pano).is_inside_out());
        let hpx = ImageSet::new("h", "x", Projection::Healpix);
        assert_eq!(projection_for(&hpx).kind(), Projection::Healpix);
    }

    #[test]
    fn test_roots() {
        let equirect = ImageSet::new("e", "x", Projection::Equirectangular);
        assert_eq!(EquirectangularProjection.roots(&equirect), vec![(0, 0), (1, 0)]);
        let mercator = ImageSet::new("m", "x", Projection::Mercator);
        assert_eq!(MercatorProjection.roots(&mercator), vec![(0, 0)]);
        let healpix = ImageSet::new("h", "x", Projection::Healpix);
        assert_eq!(HealpixProjection.roots(&healpix).len(), 12);
    }

    #[test]
    fn test_children_order_and_parts() {
        let equirect = ImageSet::new("e", "x", Projection::Equirectangular);
        assert_eq!(
            EquirectangularProjection.children(&equirect, 1, 0),
            [(2, 0, 0), (3, 0, 1), (2, 1, 2), (3, 1, 3)]
        );
        // Mercator visits the odd row first; rows still run north to south.
        let mercator = ImageSet::new("m", "x", Projection::Mercator);
        assert_eq!(
            MercatorProjection.children(&mercator, 0, 0),
            [(0, 1, 2), (1, 1, 3), (0, 0, 0), (1, 0, 1)]
        );
        // Bottoms-up rows run south to north, so the odd row is the top half.
        let bottoms_up = equirect.with_bottoms_up(true);
        assert_eq!(
            EquirectangularProjection.children(&bottoms_up, 0, 0),
            [(0, 1, 0), (1, 1, 1), (0, 0, 2), (1, 0, 3)]
        );
    }

    #[test]
    fn test_children_cover_their_part() {
        let mercator = ImageSet::new("m", "x", Projection::Mercator);
        for (cx, cy, part) in MercatorProjection.children(&mercator, 1, 1).iter().copied() {
            let (lat, lng) = MercatorProjection.grid_point(&mercator, 2, cx, cy, 0.5, 0.5);
            let u = if part % 2 == 0 { 0.25 } else { 0.75 };
            let v = if part / 2 == 0 { 0.25 } else { 0.75 };
            let (plat, plng) = MercatorProjection.grid_point(&mercator, 1, 1, 1, u, v);
            assert_relative_eq!(lng, plng, epsilon = 1e-9);
            assert!((lat - plat).abs() < 5f64);
            assert!(MercatorProjection.contains(&mercator, 2, cx, cy, lat, lng));
        }
    }

    #[test]
    fn test_neighbors() {
        let mercator = ImageSet::new("m", "x", Projection::Mercator);
        assert_eq!(MercatorProjection.neighbor(&mercator, 1, 0, 0, Edge::Bottom), Some((0, 1)));
        assert_eq!(MercatorProjection.neighbor(&mercator, 1, 0, 0, Edge::Top), None);
        assert_eq!(MercatorProjection.neighbor(&mercator, 1, 1, 0, Edge::Right), None);
        assert_eq!(MercatorProjection.neighbor(&mercator, 1, 1, 0, Edge::Left), Some((0, 0)));
        let bottoms_up =
            ImageSet::new("e", "x", Projection::Equirectangular).with_bottoms_up(true);
        assert_eq!(
            EquirectangularProjection.neighbor(&bottoms_up, 1, 0, 0, Edge::Top),
            Some((0, 1))
        );
        let healpix = ImageSet::new("h", "x", Projection::Healpix);
        assert_eq!(HealpixProjection.neighbor(&healpix, 1, 3, 0, Edge::Right), None);
        assert_eq!(HealpixProjection.neighbor(&healpix, 1, 2, 0, Edge::Right), Some((3, 0)));
    }

    #[test]
    fn test_equirect_grid_point() {
        let equirect = ImageSet::new("e", "x", Projection::Equirectangular);
        let (lat, lng) = EquirectangularProjection.grid_point(&equirect, 0, 1, 0, 0.5, 0.25);
        assert_relative_eq!(lat, 45f64);
        assert_relative_eq!(lng, 90f64);
        assert!(EquirectangularProjection.contains(&equirect, 0, 1, 0, lat, lng));
        assert!(!EquirectangularProjection.contains(&equirect, 0, 0, 0, lat, lng));
    }

    #[test]
    fn test_healpix_round_trip() {
        let healpix = ImageSet::new("h", "x", Projection::Healpix);
        for level in 0..4u32 {
            let nside = 1u32 << level;
            for x in 0..healpix::FACES * nside {
                for y in 0..nside {
                    let (lat, lng) = HealpixProjection.grid_point(&healpix, level, x, y, 0.5, 0.5);
                    assert!(
                        HealpixProjection.contains(&healpix, level, x, y, lat, lng),
                        "center of {}/{}/{} at {},{}",
                        level,
                        x,
                        y,
                        lat,
                        lng
                    );
                }
            }
        }
    }
}
