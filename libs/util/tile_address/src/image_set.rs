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
use anyhow::{anyhow, bail, ensure, Result};
use std::collections::BTreeMap;

use crate::MAX_LEVEL;

/// The tiling scheme used by an image set.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Projection {
    Equirectangular,
    Mercator,
    Healpix,
}

impl Projection {
    pub fn name(&self) -> String {
        match self {
            Self::Equirectangular => "equirectangular",
            Self::Mercator => "mercator",
            Self::Healpix => "healpix",
        }
        .to_owned()
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name.to_ascii_lowercase().as_str() {
            "equirectangular" | "tangent" => Self::Equirectangular,
            "mercator" => Self::Mercator,
            "healpix" => Self::Healpix,
            _ => bail!("not a valid projection: {}", name),
        })
    }

    /// Projections whose low levels wrap the whole sphere in a handful of tiles.
    /// Culling those coarse tiles by bounding sphere tears holes at the seams.
    pub fn is_globally_seamless(&self) -> bool {
        matches!(self, Self::Mercator | Self::Healpix)
    }
}

/// What the imagery is of.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DataSetType {
    Earth,
    Planet,
    Sky,
    Panorama,
    SolarSystem,
}

impl DataSetType {
    pub fn name(&self) -> String {
        match self {
            Self::Earth => "earth",
            Self::Planet => "planet",
            Self::Sky => "sky",
            Self::Panorama => "panorama",
            Self::SolarSystem => "solar_system",
        }
        .to_owned()
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name.to_ascii_lowercase().as_str() {
            "earth" => Self::Earth,
            "planet" => Self::Planet,
            "sky" => Self::Sky,
            "panorama" => Self::Panorama,
            "solar_system" | "solarsystem" => Self::SolarSystem,
            _ => bail!("not a valid data set type: {}", name),
        })
    }

    /// Sky and panorama imagery is viewed from inside, where level swaps are
    /// most visible, so those get crossfaded.
    pub fn wants_blending(&self) -> bool {
        matches!(self, Self::Sky | Self::Panorama)
    }
}

/// Static description of one tiled image set, as published by a tile server.
#[derive(Clone, Debug)]
pub struct ImageSet {
    id: String,
    name: String,
    url: String,
    dem_url: String,
    extension: String,
    projection: Projection,
    data_set_type: DataSetType,
    base_level: u8,
    levels: u8,
    base_tile_degrees: f64,
    bottoms_up: bool,
    quad_tree_map: String,
    elevation_model: bool,
    catalog: bool,
    srgb: bool,
    properties: BTreeMap<String, String>,
}

impl ImageSet {
    pub fn new(id: &str, url: &str, projection: Projection) -> Self {
        Self {
            id: id.to_owned(),
            name: id.to_owned(),
            url: url.to_owned(),
            dem_url: String::new(),
            extension: ".png".to_owned(),
            projection,
            data_set_type: DataSetType::Earth,
            base_level: 0,
            levels: 10,
            base_tile_degrees: 180f64,
            bottoms_up: false,
            quad_tree_map: "0123".to_owned(),
            elevation_model: false,
            catalog: false,
            srgb: false,
            properties: BTreeMap::new(),
        }
    }

    /// Parse a description of the form:
    ///
    /// ```text
    /// { "id": "bmng", "url": "http://t{S}.example.com/{L}/{Y}/{X}.png",
    ///   "projection": "equirectangular", "levels": 8 }
    /// ```
    ///
    /// Only `id`, `url` and `projection` are required.
    pub fn from_json(data: &str) -> Result<Self> {
        let json = json::parse(data)?;
        Self::from_json_value(&json)
    }

    pub fn from_json_value(json: &json::JsonValue) -> Result<Self> {
        let id = json["id"]
            .as_str()
            .ok_or_else(|| anyhow!("image set must have an id"))?;
        let url = json["url"]
            .as_str()
            .ok_or_else(|| anyhow!("image set {} must have a url", id))?;
        let projection = Projection::from_name(
            json["projection"]
                .as_str()
                .ok_or_else(|| anyhow!("image set {} must have a projection", id))?,
        )?;
        let mut image_set = Self::new(id, url, projection);
        if let Some(name) = json["name"].as_str() {
            image_set.name = name.to_owned();
        }
        if let Some(dem_url) = json["dem_url"].as_str() {
            image_set.dem_url = dem_url.to_owned();
        }
        if let Some(extension) = json["extension"].as_str() {
            image_set = image_set.with_extension(extension);
        }
        if let Some(kind) = json["data_set_type"].as_str() {
            image_set.data_set_type = DataSetType::from_name(kind)?;
        }
        if let Some(base_level) = json["base_level"].as_u8() {
            image_set.base_level = base_level;
        }
        if let Some(levels) = json["levels"].as_u8() {
            image_set.levels = levels;
        }
        if let Some(degrees) = json["base_tile_degrees"].as_f64() {
            image_set.base_tile_degrees = degrees;
        }
        if let Some(bottoms_up) = json["bottoms_up"].as_bool() {
            image_set.bottoms_up = bottoms_up;
        }
        if let Some(map) = json["quad_tree_map"].as_str() {
            image_set.quad_tree_map = map.to_owned();
        }
        // A dem url alone is enough to turn elevation on.
        image_set.elevation_model = json["elevation_model"]
            .as_bool()
            .unwrap_or(!image_set.dem_url.is_empty());
        if let Some(catalog) = json["catalog"].as_bool() {
            image_set.catalog = catalog;
        }
        if let Some(srgb) = json["srgb"].as_bool() {
            image_set.srgb = srgb;
        }
        for (key, value) in json["properties"].entries() {
            let value = value
                .as_str()
                .map(|s| s.to_owned())
                .unwrap_or_else(|| value.dump());
            image_set.properties.insert(key.to_owned(), value);
        }
        image_set.validate()?;
        Ok(image_set)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.id.is_empty(), "image set id must not be empty");
        ensure!(
            self.levels as u32 <= MAX_LEVEL,
            "image set {} has {} levels; at most {} are addressable",
            self.id,
            self.levels,
            MAX_LEVEL
        );
        ensure!(
            self.base_tile_degrees > 0f64 && self.base_tile_degrees <= 360f64,
            "image set {} has invalid base tile degrees {}",
            self.id,
            self.base_tile_degrees
        );
        ensure!(
            self.quad_tree_map.is_empty() || self.quad_tree_map.chars().count() == 4,
            "image set {} quad tree map must have exactly 4 symbols",
            self.id
        );
        Ok(())
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    pub fn with_dem_url(mut self, dem_url: Option<&str>) -> Self {
        self.dem_url = dem_url.unwrap_or_default().to_owned();
        self
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = if extension.is_empty() || extension.starts_with('.') {
            extension.to_owned()
        } else {
            format!(".{}", extension)
        };
        self
    }

    pub fn with_data_set_type(mut self, data_set_type: DataSetType) -> Self {
        self.data_set_type = data_set_type;
        self
    }

    pub fn with_levels(mut self, levels: u8) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_base_level(mut self, base_level: u8) -> Self {
        self.base_level = base_level;
        self
    }

    pub fn with_base_tile_degrees(mut self, degrees: f64) -> Self {
        self.base_tile_degrees = degrees;
        self
    }

    pub fn with_bottoms_up(mut self, bottoms_up: bool) -> Self {
        self.bottoms_up = bottoms_up;
        self
    }

    pub fn with_quad_tree_map(mut self, map: &str) -> Self {
        self.quad_tree_map = map.to_owned();
        self
    }

    pub fn with_elevation_model(mut self, elevation_model: bool) -> Self {
        self.elevation_model = elevation_model;
        self
    }

    pub fn with_catalog(mut self, catalog: bool) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_srgb(mut self, srgb: bool) -> Self {
        self.srgb = srgb;
        self
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The elevation source template; empty when the image set has none.
    pub fn dem_url(&self) -> &str {
        &self.dem_url
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn data_set_type(&self) -> DataSetType {
        self.data_set_type
    }

    pub fn base_level(&self) -> u8 {
        self.base_level
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    pub fn base_tile_degrees(&self) -> f64 {
        self.base_tile_degrees
    }

    pub fn bottoms_up(&self) -> bool {
        self.bottoms_up
    }

    pub fn quad_tree_map(&self) -> &str {
        &self.quad_tree_map
    }

    pub fn elevation_model(&self) -> bool {
        self.elevation_model
    }

    pub fn has_dem(&self) -> bool {
        self.elevation_model && !self.dem_url.is_empty()
    }

    pub fn catalog(&self) -> bool {
        self.catalog
    }

    pub fn srgb(&self) -> bool {
        self.srgb
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|s| s.as_str())
    }

    /// The first level at which catalog tiles carry rows.
    pub fn hips_order_min(&self) -> u8 {
        self.property("hips_order_min")
            .and_then(|v| v.trim().parse::<u8>().ok())
            .unwrap_or(0)
    }

    /// Mercator and bottoms-up sets store their rows south to north, which
    /// flips the parity of child rows.
    pub fn child_row_offset(&self) -> u32 {
        if self.projection == Projection::Mercator || self.bottoms_up {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_minimal() -> Result<()> {
        let image_set = ImageSet::from_json(
            r#"{"id": "bmng", "url": "http://example.com/{L}/{X}/{Y}", "projection": "mercator"}"#,
        )?;
        assert_eq!(image_set.id(), "bmng");
        assert_eq!(image_set.projection(), Projection::Mercator);
        assert_eq!(image_set.extension(), ".png");
        assert_eq!(image_set.dem_url(), "");
        assert_eq!(image_set.quad_tree_map(), "0123");
        Ok(())
    }

    #[test]
    fn test_json_full() -> Result<()> {
        let image_set = ImageSet::from_json(
            r#"{
                "id": "dss", "name": "Digitized Sky", "url": "http://example.com/{Q}",
                "projection": "healpix", "data_set_type": "sky", "levels": 12,
                "extension": "jpg", "quad_tree_map": "abcd", "srgb": true,
                "elevation_model": true, "dem_url": "http://dem.example.com/{L}",
                "properties": {"hips_order_min": "3", "frame": "equatorial"}
            }"#,
        )?;
        assert_eq!(image_set.name(), "Digitized Sky");
        assert_eq!(image_set.data_set_type(), DataSetType::Sky);
        assert_eq!(image_set.levels(), 12);
        assert_eq!(image_set.extension(), ".jpg");
        assert!(image_set.srgb());
        assert!(image_set.has_dem());
        assert_eq!(image_set.hips_order_min(), 3);
        assert_eq!(image_set.property("frame"), Some("equatorial"));
        Ok(())
    }

    #[test]
    fn test_json_dem_url_implies_elevation() -> Result<()> {
        let implied = ImageSet::from_json(
            r#"{"id": "e", "url": "http://e/{Q}", "projection": "mercator",
                "dem_url": "http://dem.example.com/{Q}"}"#,
        )?;
        assert!(implied.elevation_model());
        assert!(implied.has_dem());

        let disabled = ImageSet::from_json(
            r#"{"id": "e", "url": "http://e/{Q}", "projection": "mercator",
                "dem_url": "http://dem.example.com/{Q}", "elevation_model": false}"#,
        )?;
        assert!(!disabled.has_dem());
        Ok(())
    }

    #[test]
    fn test_json_rejects_bad_input() {
        assert!(ImageSet::from_json(r#"{"url": "x", "projection": "mercator"}"#).is_err());
        assert!(ImageSet::from_json(r#"{"id": "a", "url": "x", "projection": "sinusoidal"}"#).is_err());
        assert!(ImageSet::from_json(
            r#"{"id": "a", "url": "x", "projection": "mercator", "quad_tree_map": "01"}"#
        )
        .is_err());
        assert!(ImageSet::from_json(
            r#"{"id": "a", "url": "x", "projection": "mercator", "levels": 40}"#
        )
        .is_err());
    }

    #[test]
    fn test_missing_dem_url_is_empty() {
        let image_set = ImageSet::new("a", "x", Projection::Equirectangular)
            .with_elevation_model(true)
            .with_dem_url(None);
        assert_eq!(image_set.dem_url(), "");
        assert!(!image_set.has_dem());
    }

    #[test]
    fn test_child_row_offset() {
        assert_eq!(
            ImageSet::new("a", "x", Projection::Mercator).child_row_offset(),
            1
        );
        assert_eq!(
            ImageSet::new("a", "x", Projection::Equirectangular).child_row_offset(),
            0
        );
        assert_eq!(
            ImageSet::new("a", "x", Projection::Equirectangular)
                .with_bottoms_up(true)
                .child_row_offset(),
            1
        );
    }
}
