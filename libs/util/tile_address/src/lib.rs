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
//! Pure addressing for tiled imagery: keys, quad ids, cache paths and
//! server urls. Nothing in here holds state.

pub mod bounds;
pub mod healpix;
mod image_set;
mod key;
mod path;
mod quad;
mod url;

pub use bounds::{tile_bounds, GeoBounds};
pub use image_set::{DataSetType, ImageSet, Projection};
pub use key::{DatasetSlot, TileKey, MAX_LEVEL};
pub use path::{dem_hash, dem_path, imagery_directory, imagery_path};
pub use quad::{decode_quad_id, google_quad_id, quad_digit_count, quad_id, server_id};
pub use url::{dem_url, tile_url, HostRewrite};
