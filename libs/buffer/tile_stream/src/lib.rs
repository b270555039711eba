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
mod cache;
mod dataset;
mod decode;
mod fetch;
mod loader;
mod queue;

pub mod config;
pub mod elevation;
pub mod gpu;
pub mod lod;
pub mod pool;
pub mod projection;
pub mod table;
pub mod tile;

pub use crate::{
    cache::{TileCache, TileStats},
    config::{DetailLevel, RenderConfig, StreamConfig, StreamOpts},
    dataset::{Dataset, DatasetRegistry},
    decode::{ImageDecoder, TextureDecoder},
    fetch::{DirectoryFetcher, HttpFetcher, TileFetcher},
    gpu::{DrawCall, RecordingGpu, TileGpu},
    loader::{Completion, LoadError, LoadOutcome},
    lod::{FrameContext, FrameCounters, TileRenderer, Viewport},
    pool::ResourcePool,
    queue::{Admission, LoadRequest, QueueLimits},
    tile::{Tile, TilePayload, TileState},
};
pub use tile_address::{ImageSet, Projection, TileKey};
