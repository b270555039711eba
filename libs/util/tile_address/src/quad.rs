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
//! Quad-digit tile ids, as used by Virtual Earth style tile servers for
//! both the tile path and the choice of server shard.

use crate::{ImageSet, Projection};

/// Symbols of the old Google satellite naming: top-left, top-right,
/// bottom-left, bottom-right, prefixed with `t`.
const GOOGLE_QUAD_MAP: [char; 4] = ['q', 'r', 't', 's'];

/// Equirectangular sets have two root tiles side by side, so they spend one
/// extra digit on the root column.
pub fn quad_digit_count(projection: Projection, level: u32) -> u32 {
    if projection == Projection::Equirectangular {
        level + 1
    } else {
        level
    }
}

/// Walk the bits of x and y from the most significant level down, mapping
/// `x_bit + 2 * y_bit` through the alphabet.
pub fn quad_id_with_map(map: &[char; 4], digits: u32, x: u32, y: u32) -> String {
    let mut id = String::with_capacity(digits as usize);
    for i in (1..=digits).rev() {
        let mask = 1u32 << (i - 1);
        let mut value = 0;
        if x & mask != 0 {
            value += 1;
        }
        if y & mask != 0 {
            value += 2;
        }
        id.push(map[value]);
    }
    id
}

/// The `{Q}` value for a tile. Image sets without an alphabet get "0".
pub fn quad_id(image_set: &ImageSet, level: u32, x: u32, y: u32) -> String {
    match alphabet(image_set.quad_tree_map()) {
        Some(map) => quad_id_with_map(
            &map,
            quad_digit_count(image_set.projection(), level),
            x,
            y,
        ),
        None => "0".to_owned(),
    }
}

/// Reverse of `quad_id`: recover (level, x, y), or None if a symbol is not
/// part of the alphabet.
pub fn decode_quad_id(image_set: &ImageSet, id: &str) -> Option<(u32, u32, u32)> {
    let map = alphabet(image_set.quad_tree_map())?;
    let (x, y) = decode_with_map(&map, id)?;
    let digits = id.chars().count() as u32;
    let level = if image_set.projection() == Projection::Equirectangular {
        digits.checked_sub(1)?
    } else {
        digits
    };
    Some((level, x, y))
}

fn decode_with_map(map: &[char; 4], id: &str) -> Option<(u32, u32)> {
    let mut x = 0u32;
    let mut y = 0u32;
    for c in id.chars() {
        let value = map.iter().position(|&m| m == c)? as u32;
        x = (x << 1) | (value & 1);
        y = (y << 1) | (value >> 1);
    }
    Some((x, y))
}

pub fn google_quad_id(level: u32, x: u32, y: u32) -> String {
    format!("t{}", quad_id_with_map(&GOOGLE_QUAD_MAP, level, x, y))
}

/// Rotating shard for tiles without a usable quad id.
pub fn server_id(x: u32, y: u32) -> u32 {
    (x & 1) + ((y & 1) << 1)
}

fn alphabet(map: &str) -> Option<[char; 4]> {
    let mut chars = map.chars();
    let out = [chars.next()?, chars.next()?, chars.next()?, chars.next()?];
    if chars.next().is_some() {
        return None;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mercator() -> ImageSet {
        ImageSet::new("ve", "http://example.com/{Q}", Projection::Mercator)
    }

    #[test]
    fn test_known_virtual_earth_ids() {
        let image_set = mercator();
        assert_eq!(quad_id(&image_set, 1, 0, 0), "0");
        assert_eq!(quad_id(&image_set, 1, 1, 1), "3");
        assert_eq!(quad_id(&image_set, 3, 3, 5), "213");
        assert_eq!(quad_id(&image_set, 0, 0, 0), "");
    }

    #[test]
    fn test_length_and_alphabet() {
        let mercator = mercator().with_quad_tree_map("abcd");
        let equirect =
            ImageSet::new("eq", "http://example.com/{Q}", Projection::Equirectangular)
                .with_quad_tree_map("abcd");
        for level in 0..12u32 {
            let x = (level * 7919) % (1 << level).max(1);
            let y = (level * 104729) % (1 << level).max(1);
            let id = quad_id(&mercator, level, x, y);
            assert_eq!(id.len() as u32, level);
            assert!(id.chars().all(|c| "abcd".contains(c)));
            let id = quad_id(&equirect, level, x, y);
            assert_eq!(id.len() as u32, level + 1);
        }
    }

    #[test]
    fn test_round_trip() {
        let mercator = mercator().with_quad_tree_map("wxyz");
        let equirect =
            ImageSet::new("eq", "http://example.com/{Q}", Projection::Equirectangular);
        for &(level, x, y) in &[(1, 1, 0), (5, 17, 30), (12, 4000, 123), (20, 1048575, 77)] {
            let id = quad_id(&mercator, level, x, y);
            assert_eq!(decode_quad_id(&mercator, &id), Some((level, x, y)));
        }
        for &(level, x, y) in &[(0, 1, 0), (6, 100, 63), (19, 1048575, 524287)] {
            let id = quad_id(&equirect, level, x, y);
            assert_eq!(decode_quad_id(&equirect, &id), Some((level, x, y)));
        }
    }

    #[test]
    fn test_decode_rejects_foreign_symbols() {
        assert_eq!(decode_quad_id(&mercator(), "0129"), None);
        let equirect =
            ImageSet::new("eq", "http://example.com/{Q}", Projection::Equirectangular);
        assert_eq!(decode_quad_id(&equirect, ""), None);
    }

    #[test]
    fn test_missing_alphabet() {
        let image_set = mercator().with_quad_tree_map("");
        assert_eq!(quad_id(&image_set, 4, 3, 2), "0");
        assert_eq!(decode_quad_id(&image_set, "0"), None);
    }

    #[test]
    fn test_google_and_server_ids() {
        assert_eq!(google_quad_id(2, 1, 2), "ttr");
        assert_eq!(server_id(0, 0), 0);
        assert_eq!(server_id(1, 0), 1);
        assert_eq!(server_id(0, 1), 2);
        assert_eq!(server_id(3, 5), 3);
    }
}
