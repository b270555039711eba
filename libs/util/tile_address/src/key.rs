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
use anyhow::{ensure, Result};
use std::fmt;

/// Deepest level that keys and quad ids are guaranteed to address uniquely.
pub const MAX_LEVEL: u32 = 20;

const Y_BITS: u32 = 20;
const X_BITS: u32 = 24;
const LEVEL_BITS: u32 = 5;
const SLOT_BITS: u32 = 64 - Y_BITS - X_BITS - LEVEL_BITS;

const X_SHIFT: u32 = Y_BITS;
const LEVEL_SHIFT: u32 = X_SHIFT + X_BITS;
const SLOT_SHIFT: u32 = LEVEL_SHIFT + LEVEL_BITS;

/// A process-unique number standing in for an image set inside tile keys.
/// Slots are handed out by whoever registers image sets and never reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DatasetSlot(u16);

impl DatasetSlot {
    pub const MAX: u16 = (1 << SLOT_BITS) - 1;

    pub fn new(slot: u16) -> Result<Self> {
        ensure!(slot <= Self::MAX, "dataset slot {} out of range", slot);
        Ok(Self(slot))
    }

    pub fn index(&self) -> u16 {
        self.0
    }
}

/// Canonical 64-bit identity of one quadtree node in one image set.
///
/// Layout, high to low: 15 bits slot, 5 bits level, 24 bits x, 20 bits y.
/// Healpix tiles store `face * 2^level + ix` in x, which is why x is wider.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TileKey(u64);

impl TileKey {
    pub fn new(slot: DatasetSlot, level: u32, x: u32, y: u32) -> Result<Self> {
        ensure!(level < (1 << LEVEL_BITS), "tile level {} out of range", level);
        ensure!(x < (1 << X_BITS), "tile x {} out of range at level {}", x, level);
        ensure!(y < (1 << Y_BITS), "tile y {} out of range at level {}", y, level);
        Ok(Self(
            (slot.0 as u64) << SLOT_SHIFT
                | (level as u64) << LEVEL_SHIFT
                | (x as u64) << X_SHIFT
                | y as u64,
        ))
    }

    pub fn slot(&self) -> DatasetSlot {
        DatasetSlot((self.0 >> SLOT_SHIFT) as u16)
    }

    pub fn level(&self) -> u32 {
        ((self.0 >> LEVEL_SHIFT) & ((1 << LEVEL_BITS) - 1)) as u32
    }

    pub fn x(&self) -> u32 {
        ((self.0 >> X_SHIFT) & ((1 << X_BITS) - 1)) as u32
    }

    pub fn y(&self) -> u32 {
        (self.0 & ((1 << Y_BITS) - 1)) as u32
    }

    /// The key of the enclosing tile one level up, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.level() == 0 {
            return None;
        }
        Some(Self(
            (self.slot().0 as u64) << SLOT_SHIFT
                | ((self.level() - 1) as u64) << LEVEL_SHIFT
                | ((self.x() >> 1) as u64) << X_SHIFT
                | (self.y() >> 1) as u64,
        ))
    }
}

impl fmt::Debug for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TileKey({}:{}/{}/{})",
            self.slot().0,
            self.level(),
            self.x(),
            self.y()
        )
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level(), self.x(), self.y())
    }
}
