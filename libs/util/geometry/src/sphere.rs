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
use crate::Plane;
use nalgebra::Point3;
use std::fmt::Debug;

#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    center: Point3<f64>,
    radius: f64,
}

impl Default for Sphere {
    fn default() -> Self {
        Self {
            center: Point3::origin(),
            radius: 1_f64,
        }
    }
}

impl Sphere {
    pub fn from_center_and_radius(center: &Point3<f64>, radius: f64) -> Self {
        Self {
            center: *center,
            radius,
        }
    }

    /// Approximate minimal sphere around the given points (Ritter's method).
    /// Every input point is guaranteed to lie inside or on the result.
    pub fn enclosing(points: &[Point3<f64>]) -> Self {
        let first = match points.first() {
            Some(p) => *p,
            None => return Self::from_center_and_radius(&Point3::origin(), 0f64),
        };

        // Find the point farthest from an arbitrary start, then the point
        // farthest from that; their span seeds the sphere.
        let farthest_from = |from: &Point3<f64>| {
            points
                .iter()
                .copied()
                .fold((first, 0f64), |(best, best_d), p| {
                    let d = (p - from).magnitude_squared();
                    if d > best_d {
                        (p, d)
                    } else {
                        (best, best_d)
                    }
                })
                .0
        };
        let a = farthest_from(&first);
        let b = farthest_from(&a);
        let mut center = nalgebra::center(&a, &b);
        let mut radius = (b - a).magnitude() / 2f64;

        for p in points {
            let d = (p - center).magnitude();
            if d > radius {
                let grown = (radius + d) / 2f64;
                center += (p - center) * ((grown - radius) / d);
                radius = grown;
            }
        }

        Self { center, radius }
    }

    pub fn center(&self) -> &Point3<f64> {
        &self.center
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (p - self.center).magnitude() <= self.radius * (1f64 + 1e-9)
    }

    /// True if any part of the sphere is on the front side of the plane.
    pub fn intersects_front_of(&self, plane: &Plane) -> bool {
        plane.distance_to_point(&self.center) >= -self.radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_enclosing_contains_all_points() {
        let points = [
            Point3::new(1f64, 0f64, 0f64),
            Point3::new(0f64, 1f64, 0f64),
            Point3::new(-1f64, 0f64, 0f64),
            Point3::new(0f64, -1f64, 0.5f64),
        ];
        let sphere = Sphere::enclosing(&points);
        for p in &points {
            assert!(sphere.contains(p));
        }
        assert!(sphere.radius() < 1.5f64);
    }

    #[test]
    fn test_enclosing_pair_is_tight() {
        let sphere = Sphere::enclosing(&[
            Point3::new(-2f64, 0f64, 0f64),
            Point3::new(2f64, 0f64, 0f64),
        ]);
        assert_relative_eq!(sphere.radius(), 2f64);
        assert_relative_eq!(*sphere.center(), Point3::origin());
    }

    #[test]
    fn test_empty_is_degenerate() {
        let sphere = Sphere::enclosing(&[]);
        assert_relative_eq!(sphere.radius(), 0f64);
    }

    #[test]
    fn test_front_of_plane() {
        let plane = Plane::from_point_and_normal(&Point3::origin(), &Vector3::new(0f64, 0f64, 1f64));
        let behind = Sphere::from_center_and_radius(&Point3::new(0f64, 0f64, -2f64), 1f64);
        let straddle = Sphere::from_center_and_radius(&Point3::new(0f64, 0f64, -0.5f64), 1f64);
        assert!(!behind.intersects_front_of(&plane));
        assert!(straddle.intersects_front_of(&plane));
    }
}
