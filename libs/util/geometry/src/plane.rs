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
use nalgebra::{Point3, Vector3, Vector4};

/// An oriented plane: points with `normal . p >= distance` are in front.
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    normal: Vector3<f64>,
    distance: f64,
}

impl Plane {
    pub fn from_point_and_normal(p: &Point3<f64>, n: &Vector3<f64>) -> Self {
        let normal = n.normalize();
        Self {
            normal,
            distance: p.coords.dot(&normal),
        }
    }

    /// Build from the general form `ax + by + cz + d = 0`, normalized so that
    /// `distance_to_point` reports true euclidean distance. Returns None for a
    /// degenerate row with no direction.
    pub fn from_coefficients(row: &Vector4<f64>) -> Option<Self> {
        let normal = Vector3::new(row.x, row.y, row.z);
        let length = normal.magnitude();
        if length <= f64::EPSILON {
            return None;
        }
        Some(Self {
            normal: normal / length,
            distance: -row.w / length,
        })
    }

    /// Signed; negative behind the plane.
    pub fn distance_to_point(&self, p: &Point3<f64>) -> f64 {
        self.normal.dot(&p.coords) - self.distance
    }

    pub fn point_is_in_front(&self, p: &Point3<f64>) -> bool {
        self.distance_to_point(p) >= 0_f64
    }

    pub fn normal(&self) -> &Vector3<f64> {
        &self.normal
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }
}
