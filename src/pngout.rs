// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! PNG asset emission for the BDN XML path.
//!
//! Every event graphic is written as `{frame_number:08}_{graphic}.png` in
//! the XML file's directory, cropped out of the full-frame buffer. With
//! palettization enabled the file is an 8-bit indexed PNG carrying the
//! event palette as PLTE plus a tRNS alpha chunk; otherwise plain RGBA8.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use crate::palette::Palette;
use crate::Rect;

fn encode_err(path: &Path, e: png::EncodingError) -> io::Error {
    match e {
        png::EncodingError::IoError(e) => e,
        other => io::Error::other(format!("cannot encode {}: {other}", path.display())),
    }
}

/// Asset filename for one graphic of one event.
#[must_use]
pub fn graphic_file_name(frame_number: u64, graphic: usize) -> String {
    format!("{frame_number:08}_{graphic}.png")
}

/// Writes one cropped graphic as a PNG next to the XML file.
///
/// `rgba` is the full normalized frame; when `palette`/`indexed` are given
/// the file is written as 8-bit indexed with transparency, otherwise as
/// RGBA taken straight from the frame. Returns the path written.
pub fn write_png(
    dir: &Path,
    frame_number: u64,
    graphic: usize,
    rgba: &[u8],
    indexed: Option<(&Palette, &[u8])>,
    width: usize,
    crop: Rect,
) -> io::Result<PathBuf> {
    let path = dir.join(graphic_file_name(frame_number, graphic));
    let file = File::create(&path).map_err(|e| {
        io::Error::new(e.kind(), format!("cannot open PNG file {} for writing: {e}", path.display()))
    })?;

    #[allow(clippy::cast_possible_truncation)] // crop dims fit PGS 16-bit fields
    let mut encoder = png::Encoder::new(BufWriter::new(file), crop.w as u32, crop.h as u32);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_filter(png::FilterType::Sub);

    let mut data = Vec::new();
    match indexed {
        Some((palette, index_buf)) => {
            encoder.set_color(png::ColorType::Indexed);
            let entries = palette.rgba_entries();
            let mut plte = Vec::with_capacity(entries.len() * 3);
            let mut trns = Vec::with_capacity(entries.len());
            for e in entries {
                plte.extend_from_slice(&e[0..3]);
                trns.push(e[3]);
            }
            encoder.set_palette(plte);
            encoder.set_trns(trns);

            data.reserve(crop.area());
            for y in crop.y..crop.y + crop.h {
                data.extend_from_slice(&index_buf[y * width + crop.x..y * width + crop.x + crop.w]);
            }
        }
        None => {
            encoder.set_color(png::ColorType::Rgba);
            data.reserve(crop.area() * 4);
            for y in crop.y..crop.y + crop.h {
                let row = (y * width + crop.x) * 4;
                data.extend_from_slice(&rgba[row..row + crop.w * 4]);
            }
        }
    }

    let mut writer = encoder.write_header().map_err(|e| encode_err(&path, e))?;
    writer.write_image_data(&data).map_err(|e| encode_err(&path, e))?;
    writer.finish().map_err(|e| encode_err(&path, e))?;
    Ok(path)
}
