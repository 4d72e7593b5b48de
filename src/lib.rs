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

//! BluRay subtitle encoding from RGBA frame streams.
//!
//! This crate turns a sequence of per-frame RGBA rasters into BluRay
//! subtitle deliverables: a Presentation Graphic Stream (PGS/SUP) binary
//! file, a BDN XML descriptor with one PNG per subtitle graphic, or both.
//!
//! # Pipeline
//!
//! 1. **Segmentation** ([`segment`]): frames are scanned in order; a run of
//!    identical non-empty frames forms one subtitle event.
//! 2. **Cropping** ([`crop`]): each event is reduced to one or two tight
//!    rectangles around its visible pixels, which lowers decode-buffer
//!    pressure on players.
//! 3. **Palettization** ([`palette`]): RGBA is reduced to at most 255
//!    colors plus a reserved transparent index 0, in BT.601 YCrCb.
//! 4. **Run-length encoding** ([`rle`]): each rectangle becomes a PGS RLE
//!    byte stream.
//! 5. **Muxing** ([`sup`]): for every event a complete epoch is written as
//!    PCS/WDS/PDS/ODS/END segments on the 90 kHz clock, followed by a
//!    clearing composition at the event's out-time.
//!
//! The XML path ([`xml`], [`pngout`]) shares steps 1-3 and emits the
//! palettized graphics as PNG files referenced from the BDN document.
//!
//! # Wire format
//!
//! Every PGS segment on disk is framed as:
//!
//! ```text
//! [0x50 0x47] [PTS u32] [DTS u32] [type u8] [length u16] [payload]
//! ```
//!
//! All multibyte integers are big-endian. Segment types:
//!
//! | Type | Segment |
//! |------|---------|
//! | 0x14 | PDS (palette definition) |
//! | 0x15 | ODS (object definition, RLE bitmap) |
//! | 0x16 | PCS (presentation composition) |
//! | 0x17 | WDS (window definition) |
//! | 0x80 | END (composition terminator) |

pub mod crop;
pub mod event;
pub mod palette;
pub mod pixelops;
pub mod pngout;
pub mod rle;
pub mod segment;
pub mod sup;
pub mod supread;
pub mod xml;

pub use crop::{auto_crop, auto_split, enforce_even_y, SplitHeuristic};
pub use event::{Event, EventList};
pub use palette::{palettize, Palette, YcbcrA};
pub use pixelops::PixelOps;
pub use segment::{ChannelOrder, FrameSource, RawRgbaReader, SegmentConfig, Segmenter};
pub use sup::SupWriter;

/// Composition objects may not be smaller than this in either dimension.
/// Hardware decoders reject tinier objects, so crops are padded up to it.
pub const MIN_OBJECT_DIM: usize = 8;

/// An axis-aligned rectangle in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

impl Rect {
    /// Rectangle covering a full `w` x `h` frame.
    #[must_use]
    pub fn full(w: usize, h: usize) -> Self {
        Rect { x: 0, y: 0, w, h }
    }

    #[must_use]
    pub fn area(&self) -> usize {
        self.w * self.h
    }

    /// True for the degenerate 0x0 rectangle produced by cropping an
    /// all-transparent image.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// One entry of the supported framerate table.
///
/// BluRay PGS only permits these six rates; everything else is a
/// configuration error. `tc_rate` is the integer rate used for non-drop
/// SMPTE timecodes (24 for 23.976, 30 for 29.97, 60 for 59.94).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub name: &'static str,
    pub fps_id: u8,
    pub num: u32,
    pub den: u32,
    pub tc_rate: u32,
}

/// Framerates accepted by the PCS header, with their PGS rate identifiers.
pub static FRAME_RATES: [FrameRate; 6] = [
    FrameRate { name: "23.976", fps_id: 0x10, num: 24000, den: 1001, tc_rate: 24 },
    FrameRate { name: "24", fps_id: 0x20, num: 24, den: 1, tc_rate: 24 },
    FrameRate { name: "25", fps_id: 0x30, num: 25, den: 1, tc_rate: 25 },
    FrameRate { name: "29.97", fps_id: 0x40, num: 30000, den: 1001, tc_rate: 30 },
    FrameRate { name: "50", fps_id: 0x60, num: 50, den: 1, tc_rate: 50 },
    FrameRate { name: "59.94", fps_id: 0x70, num: 60000, den: 1001, tc_rate: 60 },
];

impl FrameRate {
    /// Looks up a framerate by its CLI/XML name, like `"23.976"`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static FrameRate> {
        FRAME_RATES.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Looks up a framerate by its PGS rate identifier.
    #[must_use]
    pub fn from_fps_id(fps_id: u8) -> Option<&'static FrameRate> {
        FRAME_RATES.iter().find(|f| f.fps_id == fps_id)
    }
}

/// BDN `VideoFormat` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    I480,
    P480,
    I576,
    P720,
    I1080,
    P1080,
}

impl VideoFormat {
    #[must_use]
    pub fn from_name(name: &str) -> Option<VideoFormat> {
        match name {
            "480i" => Some(VideoFormat::I480),
            "480p" => Some(VideoFormat::P480),
            "576i" => Some(VideoFormat::I576),
            "720p" => Some(VideoFormat::P720),
            "1080i" => Some(VideoFormat::I1080),
            "1080p" => Some(VideoFormat::P1080),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoFormat::I480 => "480i",
            VideoFormat::P480 => "480p",
            VideoFormat::I576 => "576i",
            VideoFormat::P720 => "720p",
            VideoFormat::I1080 => "1080i",
            VideoFormat::P1080 => "1080p",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framerate_lookup_by_name() {
        let fr = FrameRate::from_name("23.976").unwrap();
        assert_eq!(fr.fps_id, 0x10);
        assert_eq!((fr.num, fr.den), (24000, 1001));
        assert!(FrameRate::from_name("30").is_none());
    }

    #[test]
    fn framerate_ids_round_trip() {
        for fr in &FRAME_RATES {
            assert_eq!(FrameRate::from_fps_id(fr.fps_id), Some(fr));
        }
    }

    #[test]
    fn video_format_names() {
        for name in ["480i", "480p", "576i", "720p", "1080i", "1080p"] {
            assert_eq!(VideoFormat::from_name(name).unwrap().as_str(), name);
        }
        assert!(VideoFormat::from_name("2160p").is_none());
    }
}
