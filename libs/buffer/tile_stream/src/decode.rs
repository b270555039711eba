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
use crate::{gpu::TextureData, loader::LoadError};
use image::ImageFormat;
use std::fmt::Debug;

/// Turns fetched image bytes into pixels. Called from worker threads.
pub trait TextureDecoder: Debug + Send + Sync {
    /// `format_hint` is the dataset's declared extension, with or without the
    /// leading dot. `srgb` tags the result for sRGB sampling.
    fn decode(&self, bytes: &[u8], format_hint: &str, srgb: bool) -> Result<TextureData, LoadError>;
}

/// Decodes anything the `image` crate understands into RGBA8.
#[derive(Debug, Default)]
pub struct ImageDecoder;

impl TextureDecoder for ImageDecoder {
    fn decode(&self, bytes: &[u8], format_hint: &str, srgb: bool) -> Result<TextureData, LoadError> {
        if bytes.is_empty() {
            return Err(LoadError::Corrupt("empty image".to_owned()));
        }
        // Sniffed magic wins over the hint.
        let format = image::guess_format(bytes)
            .ok()
            .or_else(|| ImageFormat::from_extension(format_hint.trim_start_matches('.')));
        let decoded = match format {
            Some(format) => image::load_from_memory_with_format(bytes, format),
            None => image::load_from_memory(bytes),
        }
        .map_err(|e| LoadError::Corrupt(e.to_string()))?;
        let rgba = decoded.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(TextureData {
            width,
            height,
            srgb,
            pixels: rgba.into_raw(),
        })
    }
}
