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
use crate::{
    bounds::{tile_bounds, wms_bounds},
    healpix,
    quad::{google_quad_id, quad_id, server_id},
    ImageSet, Projection,
};

/// A literal substitution applied to url templates after shard placeholders
/// are normalized. Used to retarget retired tile-server host schemes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostRewrite {
    pub from: String,
    pub to: String,
}

impl HostRewrite {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_owned(),
            to: to.to_owned(),
        }
    }

    /// The retired Virtual Earth aerial and hybrid hosts, mapped to their
    /// current equivalents.
    pub fn legacy_defaults() -> Vec<Self> {
        vec![
            Self::new("a{S}", "r{S}"),
            Self::new("h{S}", "r{S}"),
            Self::new(
                "http://r{S}.ortho.tiles.virtualearth.net",
                "http://ecn.t{S}.tiles.virtualearth.net",
            ),
        ]
    }
}

/// Expand the image set's url template for one tile.
pub fn tile_url(image_set: &ImageSet, level: u32, x: u32, y: u32, rewrites: &[HostRewrite]) -> String {
    let template = image_set.url();
    if template.contains("{latMin}") {
        let b = wms_bounds(image_set, level, x, y);
        return template
            .replace("{latMin}", &b.lat_min.to_string())
            .replace("{latMax}", &b.lat_max.to_string())
            .replace("{lngMin}", &b.lng_min.to_string())
            .replace("{lngMax}", &b.lng_max.to_string());
    }
    if template.contains("{1}") {
        return format_positional(template, &positional_args(image_set, level, x, y));
    }
    expand_template(template, image_set, level, x, y, rewrites)
}

/// Expand the elevation template for one tile; empty when there is none.
pub fn dem_url(image_set: &ImageSet, level: u32, x: u32, y: u32) -> String {
    let template = image_set.dem_url();
    if template.is_empty() {
        return String::new();
    }
    if template.contains("{1}") {
        return format_positional(
            &format!("{}&new", template),
            &[level.to_string(), x.to_string(), y.to_string()],
        );
    }
    expand_template(template, image_set, level, x, y, &[])
}

fn expand_template(
    template: &str,
    image_set: &ImageSet,
    level: u32,
    x: u32,
    y: u32,
    rewrites: &[HostRewrite],
) -> String {
    let mut url = template.to_owned();
    let mut shard = None;
    for n in 0..4u32 {
        let tag = format!("{{S:{}}}", n);
        if url.contains(&tag) {
            url = url.replace(&tag, "{S}");
            shard = Some(n);
        }
    }

    for rewrite in rewrites {
        url = url.replace(&rewrite.from, &rewrite.to);
    }

    if image_set.projection() == Projection::Healpix {
        if !url.contains('{') {
            return format!(
                "{}/{}{}",
                url.trim_end_matches('/'),
                healpix::hips_path(level, x, y),
                image_set.extension()
            );
        }
        let pixel = healpix::pixel_index(level, x, y);
        return url
            .replace("{L}", &level.to_string())
            .replace("{D}", &healpix::directory_index(pixel).to_string())
            .replace("{N}", &pixel.to_string());
    }

    let url = url
        .replace("{X}", &x.to_string())
        .replace("{Y}", &y.to_string())
        .replace("{L}", &level.to_string());
    let id = quad_id(image_set, level, x, y);
    let server = match id.chars().last() {
        Some(c) => c.to_string(),
        None => shard.unwrap_or_else(|| server_id(x, y)).to_string(),
    };
    url.replace("{Q}", &id).replace("{S}", &server)
}

/// Arguments for `{0}..{13}` templates.
fn positional_args(image_set: &ImageSet, level: u32, x: u32, y: u32) -> Vec<String> {
    if image_set.projection() == Projection::Mercator && !image_set.quad_tree_map().is_empty() {
        return vec![
            server_id(x, y).to_string(),
            quad_id(image_set, level, x, y),
        ];
    }
    let mut args = vec![
        image_set.id().to_owned(),
        level.to_string(),
        x.to_string(),
        y.to_string(),
        quad_id(image_set, level, x, y),
        google_quad_id(level, x, y),
    ];
    // Corner pairs (lng, lat): top-left, top-right, bottom-right, bottom-left.
    match tile_bounds(image_set, level, x, y) {
        Some(b) => {
            for (lng, lat) in [
                (b.lng_min, b.lat_max),
                (b.lng_max, b.lat_max),
                (b.lng_max, b.lat_min),
                (b.lng_min, b.lat_min),
            ] {
                args.push(lng.to_string());
                args.push(lat.to_string());
            }
        }
        None => args.resize(14, String::new()),
    }
    args
}

fn format_positional(template: &str, args: &[String]) -> String {
    let mut url = template.to_owned();
    // Highest index first so `{1}` does not eat the front of `{13}`.
    for (i, arg) in args.iter().enumerate().rev() {
        url = url.replace(&format!("{{{}}}", i), arg);
    }
    url
}
