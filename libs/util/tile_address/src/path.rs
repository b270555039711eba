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
use crate::{healpix, ImageSet, Projection};
use std::path::{Path, PathBuf};

/// Stable, non-negative identity for an elevation source, used in place of
/// the dataset id so image sets sharing a DEM share its cache.
pub fn dem_hash(dem_url: &str) -> u32 {
    fxhash::hash32(dem_url)
}

/// `<root>/Imagery/<id>/<level>/<y>/<y>_<x><ext>`, or the HiPS layout
/// under the same `<root>/Imagery/<id>` for healpix sets.
pub fn imagery_path(root: &Path, image_set: &ImageSet, level: u32, x: u32, y: u32) -> PathBuf {
    let base = root.join("Imagery").join(image_set.id());
    if image_set.projection() == Projection::Healpix {
        return base.join(format!(
            "{}{}",
            healpix::hips_path(level, x, y),
            image_set.extension()
        ));
    }
    base.join(level.to_string())
        .join(y.to_string())
        .join(format!("{}_{}{}", y, x, image_set.extension()))
}

pub fn imagery_directory(root: &Path, image_set: &ImageSet, level: u32, x: u32, y: u32) -> PathBuf {
    let path = imagery_path(root, image_set, level, x, y);
    path.parent().map(|p| p.to_owned()).unwrap_or(path)
}

/// `<root>/dem/<hash(DemUrl)>/<level>/<y>/<y>_<x>.dem`
pub fn dem_path(root: &Path, image_set: &ImageSet, level: u32, x: u32, y: u32) -> PathBuf {
    root.join("dem")
        .join(dem_hash(image_set.dem_url()).to_string())
        .join(level.to_string())
        .join(y.to_string())
        .join(format!("{}_{}.dem", y, x))
}
