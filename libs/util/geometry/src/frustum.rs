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
use crate::{Plane, Sphere};
use nalgebra::{Matrix4, Point3, Vector4};

/// The six clip planes of a view volume, facing inward.
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Extract the planes from a combined view-projection matrix, as in
    /// "Fast Extraction of Viewing Frustum Planes from the World-View-Projection Matrix".
    /// Assumes GL-style clip depth in [-1, 1].
    pub fn from_view_projection(m: &Matrix4<f64>) -> Option<Self> {
        let row = |i: usize| -> Vector4<f64> { m.row(i).transpose() };
        Some(Self {
            planes: [
                Plane::from_coefficients(&(row(3) + row(0)))?, // left
                Plane::from_coefficients(&(row(3) - row(0)))?, // right
                Plane::from_coefficients(&(row(3) + row(1)))?, // bottom
                Plane::from_coefficients(&(row(3) - row(1)))?, // top
                Plane::from_coefficients(&(row(3) + row(2)))?, // near
                Plane::from_coefficients(&(row(3) - row(2)))?, // far
            ],
        })
    }

    /// True unless the sphere lies entirely behind at least one plane.
    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.planes.iter().all(|plane| sphere.intersects_front_of(plane))
    }

    pub fn contains_point(&self, p: &Point3<f64>) -> bool {
        self.planes.iter().all(|plane| plane.point_is_in_front(p))
    }
}
