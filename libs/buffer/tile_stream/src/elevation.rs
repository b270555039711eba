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
//! Per-tile elevation samples and their on-disk layouts.

use crate::tile::geometry::{GRID_SUBDIVISIONS, GRID_VERTICES};
use std::fmt::Debug;

/// Samples along each edge of a standard elevation grid.
pub const DEM_GRID: usize = GRID_VERTICES;

pub const DEM_SAMPLES: usize = DEM_GRID * DEM_GRID;

/// Samples in the compact layouts used by triangular tilings.
pub const COMPACT_DEM_SAMPLES: usize = 513;

/// Meters per unit of body radius.
pub const DEM_SCALE_FACTOR: f64 = 6_371_000f64;

// Spacing of the full resolution codec grid relative to ours.
const CODEC_STRIDE: usize = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DemFormat {
    /// 33x33 little endian i16, 2178 bytes.
    Int16Grid,
    /// 513 little endian i16, 1026 bytes.
    CompactInt16,
    /// 33x33 little endian f32, 4356 bytes.
    Float32Grid,
    /// 513 little endian f32, 2052 bytes.
    CompactFloat32,
    /// Decoded by an external codec.
    Codec,
    /// Synthesized from the parent tile.
    FromParent,
    /// No data: a constant altitude.
    Flat,
}

impl DemFormat {
    /// Identify a raw layout by its exact length.
    pub fn sniff(len: usize) -> Option<Self> {
        Some(match len {
            2178 => Self::Int16Grid,
            1026 => Self::CompactInt16,
            4356 => Self::Float32Grid,
            2052 => Self::CompactFloat32,
            _ => return None,
        })
    }

    pub fn sample_count(&self) -> usize {
        match self {
            Self::CompactInt16 | Self::CompactFloat32 => COMPACT_DEM_SAMPLES,
            _ => DEM_SAMPLES,
        }
    }
}

/// A full resolution elevation tile produced by an external codec.
pub trait HdElevation {
    /// Rows and columns in the tile; at least `8 * 32 + 1`.
    fn size(&self) -> usize;
    fn altitude_in_meters(&self, row: usize, col: usize) -> f64;
}

/// A pluggable decoder for compressed elevation payloads (used for mercator
/// image sets). Returns None when the bytes are not in its format.
pub trait DemCodec: Debug + Send + Sync {
    fn decompress(&self, bytes: &[u8]) -> Option<Box<dyn HdElevation>>;
}

/// Elevation samples for one tile, in grid order: row 0 is the top (v = 0)
/// edge of the tile.
#[derive(Clone, Debug)]
pub struct ElevationGrid {
    samples: Vec<f64>,
    average: f64,
    format: DemFormat,
}

impl ElevationGrid {
    /// Decode a raw payload. Returns None for lengths that are not a known
    /// layout, or for layouts that do not carry `expected_samples`; both cases
    /// fall back to parent-derived elevation.
    pub fn decode_raw(bytes: &[u8], expected_samples: usize) -> Option<Self> {
        let format = DemFormat::sniff(bytes.len())?;
        if format.sample_count() != expected_samples {
            return None;
        }
        let mut samples = Vec::with_capacity(format.sample_count());
        let mut sum = 0f64;
        match format {
            DemFormat::Int16Grid | DemFormat::CompactInt16 => {
                for chunk in bytes.chunks_exact(2) {
                    let value = i16::from_le_bytes([chunk[0], chunk[1]]) as f64;
                    sum += value;
                    samples.push(value);
                }
            }
            _ => {
                for chunk in bytes.chunks_exact(4) {
                    let mut value =
                        f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64;
                    if value.is_nan() {
                        value = if samples.is_empty() {
                            0f64
                        } else {
                            sum / samples.len() as f64
                        };
                    }
                    sum += value;
                    samples.push(value);
                }
            }
        }
        let average = sum / samples.len() as f64;
        Some(Self {
            samples,
            average,
            format,
        })
    }

    /// Take every eighth sample from a full resolution codec tile. Codec
    /// rows run south to north, so they are flipped into grid order.
    pub fn from_hd(tile: &dyn HdElevation) -> Option<Self> {
        if tile.size() < GRID_SUBDIVISIONS * CODEC_STRIDE + 1 {
            return None;
        }
        let mut samples = vec![0f64; DEM_SAMPLES];
        let mut sum = 0f64;
        for yl in 0..DEM_GRID {
            for xl in 0..DEM_GRID {
                let value = tile.altitude_in_meters(yl * CODEC_STRIDE, xl * CODEC_STRIDE);
                samples[xl + (GRID_SUBDIVISIONS - yl) * DEM_GRID] = value;
                sum += value;
            }
        }
        Some(Self {
            samples,
            average: sum / DEM_SAMPLES as f64,
            format: DemFormat::Codec,
        })
    }

    /// Upsample the quarter of `parent` covered by grid part `part`.
    pub fn from_parent_part(parent: &ElevationGrid, part: usize) -> Option<Self> {
        if parent.samples.len() != DEM_SAMPLES {
            return None;
        }
        let half = GRID_SUBDIVISIONS / 2;
        let row0 = (part / 2) * half;
        let col0 = (part % 2) * half;
        let mut samples = Vec::with_capacity(DEM_SAMPLES);
        let mut sum = 0f64;
        for row in 0..DEM_GRID {
            for col in 0..DEM_GRID {
                let pr = row0 as f64 + row as f64 / 2f64;
                let pc = col0 as f64 + col as f64 / 2f64;
                let value = parent.bilinear(pr, pc);
                sum += value;
                samples.push(value);
            }
        }
        Some(Self {
            samples,
            average: sum / DEM_SAMPLES as f64,
            format: DemFormat::FromParent,
        })
    }

    pub fn flat(altitude: f64) -> Self {
        Self {
            samples: vec![altitude; DEM_SAMPLES],
            average: altitude,
            format: DemFormat::Flat,
        }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn format(&self) -> DemFormat {
        self.format
    }

    pub fn is_grid(&self) -> bool {
        self.samples.len() == DEM_SAMPLES
    }

    pub fn sample(&self, row: usize, col: usize) -> f64 {
        self.samples[row * DEM_GRID + col]
    }

    /// Altitude at a fractional tile position.
    pub fn altitude_at(&self, u: f64, v: f64) -> f64 {
        if !self.is_grid() {
            return self.average;
        }
        let last = GRID_SUBDIVISIONS as f64;
        self.bilinear(v.clamp(0f64, 1f64) * last, u.clamp(0f64, 1f64) * last)
    }

    fn bilinear(&self, row: f64, col: f64) -> f64 {
        let last = GRID_SUBDIVISIONS;
        let r0 = (row.floor() as usize).min(last);
        let c0 = (col.floor() as usize).min(last);
        let r1 = (r0 + 1).min(last);
        let c1 = (c0 + 1).min(last);
        let fr = row - r0 as f64;
        let fc = col - c0 as f64;
        let top = self.sample(r0, c0) * (1f64 - fc) + self.sample(r0, c1) * fc;
        let bottom = self.sample(r1, c0) * (1f64 - fc) + self.sample(r1, c1) * fc;
        top * (1f64 - fr) + bottom * fr
    }
}
