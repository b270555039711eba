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
use crate::{ImageSet, Projection};
use std::f64::consts::PI;

/// Geographic extent of a rectangular tile, in degrees.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeoBounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl GeoBounds {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lng >= self.lng_min && lng <= self.lng_max
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.lat_min + self.lat_max) / 2f64,
            (self.lng_min + self.lng_max) / 2f64,
        )
    }
}

pub fn tile_degrees(image_set: &ImageSet, level: u32) -> f64 {
    image_set.base_tile_degrees() / 2f64.powi(level as i32)
}

/// Latitude of the northern edge of mercator row `y` of `2^level` rows.
pub fn mercator_row_latitude(level: u32, y: f64) -> f64 {
    let n = 2f64.powi(level as i32);
    (PI * (1f64 - 2f64 * y / n)).sinh().atan().to_degrees()
}

/// Rectangular bounds for the projections that have them. Healpix tiles are
/// curvilinear and return None.
pub fn tile_bounds(image_set: &ImageSet, level: u32, x: u32, y: u32) -> Option<GeoBounds> {
    match image_set.projection() {
        Projection::Equirectangular => {
            let deg = tile_degrees(image_set, level);
            let lng_min = x as f64 * deg - 180f64;
            let (lat_min, lat_max) = if image_set.bottoms_up() {
                let lat_min = y as f64 * deg - 90f64;
                (lat_min, lat_min + deg)
            } else {
                let lat_max = 90f64 - y as f64 * deg;
                (lat_max - deg, lat_max)
            };
            Some(GeoBounds {
                lat_min,
                lat_max,
                lng_min,
                lng_max: lng_min + deg,
            })
        }
        Projection::Mercator => {
            let deg = 360f64 / 2f64.powi(level as i32);
            let lng_min = x as f64 * deg - 180f64;
            Some(GeoBounds {
                lat_min: mercator_row_latitude(level, y as f64 + 1f64),
                lat_max: mercator_row_latitude(level, y as f64),
                lng_min,
                lng_max: lng_min + deg,
            })
        }
        Projection::Healpix => None,
    }
}

/// The box used by WMS style `{latMin}` templates: rows count up from the
/// south pole regardless of storage order.
pub fn wms_bounds(image_set: &ImageSet, level: u32, x: u32, y: u32) -> GeoBounds {
    let deg = tile_degrees(image_set, level);
    GeoBounds {
        lat_min: y as f64 * deg - 90f64,
        lat_max: (y + 1) as f64 * deg - 90f64,
        lng_min: x as f64 * deg - 180f64,
        lng_max: (x + 1) as f64 * deg - 180f64,
    }
}
