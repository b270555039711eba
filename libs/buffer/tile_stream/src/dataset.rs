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
    elevation::DemCodec,
    projection::{projection_for, TileProjection},
};
use anyhow::{bail, Result};
use fxhash::FxHashMap;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tile_address::{DatasetSlot, ImageSet, Projection, TileKey};

/// An image set bound to its key slot and projection strategy.
#[derive(Debug)]
pub struct Dataset {
    slot: DatasetSlot,
    image_set: ImageSet,
    projection: Box<dyn TileProjection>,
    dem_codec: Option<Arc<dyn DemCodec>>,
}

impl Dataset {
    pub fn slot(&self) -> DatasetSlot {
        self.slot
    }

    pub fn image_set(&self) -> &ImageSet {
        &self.image_set
    }

    pub fn projection(&self) -> &dyn TileProjection {
        self.projection.as_ref()
    }

    pub fn dem_codec(&self) -> Option<&dyn DemCodec> {
        self.dem_codec.as_deref()
    }

    pub fn key(&self, level: u32, x: u32, y: u32) -> Result<TileKey> {
        TileKey::new(self.slot, level, x, y)
    }

    /// Rows of catalog data replace imagery from this level down.
    pub fn is_catalog_level(&self, level: u32) -> bool {
        self.image_set.catalog() && level >= self.image_set.hips_order_min() as u32
    }

    pub fn wants_elevation(&self) -> bool {
        self.image_set.has_dem()
    }

    /// Crossfading applies to sky and panorama imagery outside of domes.
    pub fn blends(&self, blend_enabled: bool, dome: bool) -> bool {
        blend_enabled && !dome && self.image_set.data_set_type().wants_blending()
    }

    pub fn is_globally_seamless(&self) -> bool {
        self.image_set.projection().is_globally_seamless()
    }
}

/// Hands out one slot per image set id so that keys never collide across
/// datasets. Registration of an id that is already known returns the
/// existing dataset.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_id: FxHashMap<String, Arc<Dataset>>,
    by_slot: Vec<Arc<Dataset>>,
}

impl DatasetRegistry {
    pub fn register(&self, image_set: ImageSet) -> Result<Arc<Dataset>> {
        self.register_with_codec(image_set, None)
    }

    pub fn register_with_codec(
        &self,
        image_set: ImageSet,
        dem_codec: Option<Arc<dyn DemCodec>>,
    ) -> Result<Arc<Dataset>> {
        image_set.validate()?;
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.by_id.get(image_set.id()) {
            return Ok(existing.clone());
        }
        let index = inner.by_slot.len();
        if index > DatasetSlot::MAX as usize {
            bail!("too many datasets registered");
        }
        let slot = DatasetSlot::new(index as u16)?;
        if !image_set.dem_url().is_empty() && !image_set.elevation_model() {
            warn!(
                "{} has a dem url but no elevation model; elevation is off",
                image_set.id()
            );
        }
        if dem_codec.is_some() && image_set.projection() != Projection::Mercator {
            debug!(
                "dem codec on {} is unused outside of mercator sets",
                image_set.id()
            );
        }
        let dataset = Arc::new(Dataset {
            slot,
            projection: projection_for(&image_set),
            image_set,
            dem_codec,
        });
        debug!(
            "registered dataset {} in slot {}",
            dataset.image_set.id(),
            slot.index()
        );
        inner
            .by_id
            .insert(dataset.image_set.id().to_owned(), dataset.clone());
        inner.by_slot.push(dataset.clone());
        Ok(dataset)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Dataset>> {
        self.inner.lock().by_id.get(id).cloned()
    }

    pub fn by_slot(&self, slot: DatasetSlot) -> Option<Arc<Dataset>> {
        self.inner.lock().by_slot.get(slot.index() as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
