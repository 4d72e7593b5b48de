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

//! PGS/SUP stream writer.
//!
//! Every subtitle event becomes one epoch: an opening display set that
//! defines and shows the composition, and a closing set at the event's
//! out-time that clears the screen.
//!
//! ```text
//! opening, PTS = pts(start_frame):
//!     PCS  composition state 0x80 (epoch start) or 0x40 (acquisition
//!          point, when the previous event ended at most one frame ago)
//!     WDS  one or two windows
//!     PDS  palette 0, version incremented
//!     ODS  one or two objects, fragmented when the RLE exceeds one segment
//!     END
//! closing, PTS = pts(end_frame):
//!     PCS  composition state 0x00, zero objects
//!     WDS  same windows
//!     END
//! ```
//!
//! Timestamps run on the 90 kHz clock, computed with 64-bit integer
//! arithmetic only; an earlier float-based variant drifted by one tick on
//! long streams. Player decode-buffer budgets are enforced before anything
//! is written: a decoded-object buffer of 4 MiB (one byte per palettized
//! pixel) and a coded-data buffer of 1 MiB per event. At most 64
//! composition objects may accumulate within one epoch; an event that would
//! cross the cap opens a fresh epoch instead of failing.

use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::palette::Palette;
use crate::rle::encode_rle;
use crate::{FrameRate, Rect};

/// PGS segment types.
pub const SEG_PDS: u8 = 0x14;
pub const SEG_ODS: u8 = 0x15;
pub const SEG_PCS: u8 = 0x16;
pub const SEG_WDS: u8 = 0x17;
pub const SEG_END: u8 = 0x80;

/// PCS composition states.
pub const STATE_EPOCH_START: u8 = 0x80;
pub const STATE_ACQUISITION: u8 = 0x40;
pub const STATE_NORMAL: u8 = 0x00;

/// ODS sequence flags.
pub const SEQ_FIRST: u8 = 0x80;
pub const SEQ_LAST: u8 = 0x40;
pub const SEQ_SINGLE: u8 = 0xC0;
pub const SEQ_MIDDLE: u8 = 0x00;

/// The presentation clock, ticks per second.
pub const PGS_CLOCK: u64 = 90_000;

/// Decoded-object buffer on the player, one byte per palettized pixel.
pub const DECODED_BUFFER_LIMIT: usize = 4 * 1024 * 1024;
/// Coded-data (transport) buffer on the player.
pub const CODED_BUFFER_LIMIT: usize = 1024 * 1024;
/// Composition objects allowed within one epoch.
pub const MAX_EPOCH_OBJECTS: u32 = 64;

/// Most RLE bytes carried by a single ODS segment; larger objects are
/// fragmented into first/middle/last sequences.
const MAX_ODS_DATA: usize = 65_515;

/// Presentation timestamp of a frame index on the 90 kHz clock,
/// round-to-nearest. 64-bit widening: `frame * 90000 * fps_den` overflows
/// u32 within half an hour of 23.976 material.
#[must_use]
pub fn frame_pts(frame: u64, fps: &FrameRate) -> u64 {
    let num = u64::from(fps.num);
    (frame * PGS_CLOCK * u64::from(fps.den) + num / 2) / num
}

/// Conservative decode-time estimate for `decoded_bytes` of object data:
/// the 256 Mbit/s transfer bound expressed in 90 kHz ticks, never zero.
fn decode_delay(decoded_bytes: usize) -> u64 {
    // ticks = bytes * 8 / 256e6 * 90000 = bytes * 9 / 3200, rounded up.
    ((decoded_bytes as u64 * 9).div_ceil(3200)).max(1)
}

fn constraint(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Writes PGS epochs to an underlying byte sink.
pub struct SupWriter<W: Write> {
    sink: W,
    width: u16,
    height: u16,
    fps: &'static FrameRate,
    composition_number: u16,
    palette_version: u8,
    /// Composition objects accumulated in the current epoch.
    epoch_objects: u32,
    /// Decoded-buffer bytes accumulated in the current epoch.
    epoch_decoded: usize,
    /// End frame of the previous event, for acquisition-point chaining.
    prev_end_frame: Option<u64>,
}

impl SupWriter<BufWriter<File>> {
    /// Creates `path` and a writer for the given video geometry.
    pub fn create<P: AsRef<Path>>(
        path: P,
        width: usize,
        height: usize,
        fps: &'static FrameRate,
    ) -> io::Result<Self> {
        let file = File::create(&path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("cannot create SUP file {}: {e}", path.as_ref().display()),
            )
        })?;
        SupWriter::new(BufWriter::new(file), width, height, fps)
    }
}

impl<W: Write> SupWriter<W> {
    /// Wraps a sink. Dimensions must fit the PCS header's 16-bit fields.
    pub fn new(sink: W, width: usize, height: usize, fps: &'static FrameRate) -> io::Result<Self> {
        let (Ok(width), Ok(height)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(constraint(format!(
                "video dimensions {width}x{height} exceed the PGS 16-bit limit"
            )));
        };
        Ok(SupWriter {
            sink,
            width,
            height,
            fps,
            composition_number: 0,
            palette_version: 0,
            epoch_objects: 0,
            epoch_decoded: 0,
            prev_end_frame: None,
        })
    }

    /// Emits one complete epoch for an event visible from `start_frame`
    /// until just before `end_frame`.
    ///
    /// `indexed` is the full-frame palette-index buffer (stride = video
    /// width); `crops` selects one or two objects out of it. With `strict`
    /// set, decode-buffer accounting also covers acquisition-chained
    /// epochs, forcing an epoch start rather than packing close to the
    /// player's limits.
    #[allow(clippy::too_many_arguments)] // mirrors the epoch's wire content
    pub fn write_event(
        &mut self,
        indexed: &[u8],
        crops: &[Rect],
        palette: &Palette,
        start_frame: u64,
        end_frame: u64,
        strict: bool,
        forced: bool,
    ) -> io::Result<()> {
        if crops.is_empty() || crops.len() > 2 {
            return Err(constraint(format!(
                "an epoch carries 1 or 2 composition objects, got {}",
                crops.len()
            )));
        }
        if start_frame >= end_frame {
            return Err(constraint(format!(
                "event must end after it starts ({start_frame}..{end_frame})"
            )));
        }
        let stride = usize::from(self.width);
        for c in crops {
            if c.w < 8 || c.h < 8 || c.x + c.w > stride || c.y + c.h > usize::from(self.height) {
                return Err(constraint(format!(
                    "composition object {}x{}+{}+{} outside {}x{} frame or below 8x8",
                    c.w, c.h, c.x, c.y, self.width, self.height
                )));
            }
        }

        // Encode first: both buffer checks need the real sizes.
        let rle: Vec<BytesMut> = crops.iter().map(|&c| encode_rle(indexed, stride, c)).collect();
        let decoded: usize = crops.iter().map(Rect::area).sum();
        let coded: usize = rle.iter().map(BytesMut::len).sum();
        if decoded > DECODED_BUFFER_LIMIT {
            return Err(constraint(format!(
                "object data of {decoded} B exceeds the {DECODED_BUFFER_LIMIT} B decoded-object buffer"
            )));
        }
        if coded > CODED_BUFFER_LIMIT {
            return Err(constraint(format!(
                "coded object data of {coded} B exceeds the {CODED_BUFFER_LIMIT} B coded-data buffer"
            )));
        }

        // An epoch may chain as an acquisition point while events stay
        // adjacent (gap of at most one frame), the object cap holds, and,
        // under strict accounting, the running decoded total fits too.
        let adjacent = self
            .prev_end_frame
            .is_some_and(|prev| start_frame <= prev + 1);
        let objects = crops.len() as u32;
        let chain = adjacent
            && self.epoch_objects + objects <= MAX_EPOCH_OBJECTS
            && (!strict || self.epoch_decoded + decoded <= DECODED_BUFFER_LIMIT);
        let state = if chain { STATE_ACQUISITION } else { STATE_EPOCH_START };
        if !chain {
            self.epoch_objects = 0;
            self.epoch_decoded = 0;
        }
        self.epoch_objects += objects;
        self.epoch_decoded += decoded;
        self.prev_end_frame = Some(end_frame);

        let pts = frame_pts(start_frame, self.fps);
        let dts = pts.saturating_sub(decode_delay(decoded));

        #[cfg(feature = "debug-logging")]
        log::info!(
            "epoch: frames {start_frame}..{end_frame}, {} object(s), {decoded} B decoded, {coded} B coded, state 0x{state:02X}",
            crops.len()
        );

        // Opening display set.
        self.write_pcs_start(pts, dts, state, crops, forced)?;
        self.write_wds(pts, dts, crops)?;
        self.write_pds(pts, dts, palette)?;
        for (i, (crop, data)) in crops.iter().zip(&rle).enumerate() {
            self.write_ods(pts, dts, i as u16, crop, data)?;
        }
        self.segment(SEG_END, pts, dts, &[])?;

        // Closing display set at the out-time.
        let end_pts = frame_pts(end_frame, self.fps);
        let end_dts = end_pts.saturating_sub(1);
        self.write_pcs_end(end_pts, end_dts)?;
        self.write_wds(end_pts, end_dts, crops)?;
        self.segment(SEG_END, end_pts, end_dts, &[])
    }

    /// Flushes and returns the sink.
    pub fn close(mut self) -> io::Result<W> {
        self.sink.flush()?;
        Ok(self.sink)
    }

    fn write_pcs_start(
        &mut self,
        pts: u64,
        dts: u64,
        state: u8,
        crops: &[Rect],
        forced: bool,
    ) -> io::Result<()> {
        let mut body = BytesMut::with_capacity(11 + 8 * crops.len());
        body.put_u16(self.width);
        body.put_u16(self.height);
        body.put_u8(self.fps.fps_id);
        body.put_u16(self.composition_number);
        body.put_u8(state);
        body.put_u8(0); // palette update flag
        body.put_u8(0); // palette id
        body.put_u8(crops.len() as u8);
        for (i, c) in crops.iter().enumerate() {
            body.put_u16(i as u16); // object id
            body.put_u8(i as u8); // window id
            body.put_u8(if forced { 0x40 } else { 0x00 });
            body.put_u16(c.x as u16);
            body.put_u16(c.y as u16);
        }
        self.composition_number = self.composition_number.wrapping_add(1);
        self.segment(SEG_PCS, pts, dts, &body)
    }

    fn write_pcs_end(&mut self, pts: u64, dts: u64) -> io::Result<()> {
        let mut body = BytesMut::with_capacity(11);
        body.put_u16(self.width);
        body.put_u16(self.height);
        body.put_u8(self.fps.fps_id);
        body.put_u16(self.composition_number);
        body.put_u8(STATE_NORMAL);
        body.put_u8(0); // palette update flag
        body.put_u8(0); // palette id
        body.put_u8(0); // no composition objects
        self.composition_number = self.composition_number.wrapping_add(1);
        self.segment(SEG_PCS, pts, dts, &body)
    }

    fn write_wds(&mut self, pts: u64, dts: u64, crops: &[Rect]) -> io::Result<()> {
        let mut body = BytesMut::with_capacity(1 + 9 * crops.len());
        body.put_u8(crops.len() as u8);
        for (i, c) in crops.iter().enumerate() {
            body.put_u8(i as u8); // window id
            body.put_u16(c.x as u16);
            body.put_u16(c.y as u16);
            body.put_u16(c.w as u16);
            body.put_u16(c.h as u16);
        }
        self.segment(SEG_WDS, pts, dts, &body)
    }

    fn write_pds(&mut self, pts: u64, dts: u64, palette: &Palette) -> io::Result<()> {
        let mut body = BytesMut::with_capacity(2 + 5 * palette.len());
        body.put_u8(0); // palette id
        body.put_u8(self.palette_version);
        for index in 0..palette.len() as u16 {
            let e = palette.ycbcr(index as u8);
            body.put_u8(index as u8);
            body.put_u8(e.y);
            body.put_u8(e.cr);
            body.put_u8(e.cb);
            body.put_u8(e.a);
        }
        self.palette_version = self.palette_version.wrapping_add(1);
        self.segment(SEG_PDS, pts, dts, &body)
    }

    /// One object, fragmented when its RLE payload exceeds a segment.
    fn write_ods(
        &mut self,
        pts: u64,
        dts: u64,
        object_id: u16,
        crop: &Rect,
        rle: &[u8],
    ) -> io::Result<()> {
        let single = rle.len() <= MAX_ODS_DATA;
        let first_len = rle.len().min(MAX_ODS_DATA);

        let mut body = BytesMut::with_capacity(11 + first_len);
        body.put_u16(object_id);
        body.put_u8(0); // object version
        body.put_u8(if single { SEQ_SINGLE } else { SEQ_FIRST });
        // 24-bit length of width/height plus all RLE bytes.
        let data_len = rle.len() + 4;
        body.put_u8((data_len >> 16) as u8);
        body.put_u16(data_len as u16);
        body.put_u16(crop.w as u16);
        body.put_u16(crop.h as u16);
        body.put_slice(&rle[..first_len]);
        self.segment(SEG_ODS, pts, dts, &body)?;

        let mut rest = &rle[first_len..];
        while !rest.is_empty() {
            let take = rest.len().min(MAX_ODS_DATA);
            let last = take == rest.len();
            let mut body = BytesMut::with_capacity(4 + take);
            body.put_u16(object_id);
            body.put_u8(0); // object version
            body.put_u8(if last { SEQ_LAST } else { SEQ_MIDDLE });
            body.put_slice(&rest[..take]);
            self.segment(SEG_ODS, pts, dts, &body)?;
            rest = &rest[take..];
        }
        Ok(())
    }

    /// Frames one segment: `PG`, PTS, DTS, type, length, payload.
    fn segment(&mut self, seg_type: u8, pts: u64, dts: u64, payload: &[u8]) -> io::Result<()> {
        debug_assert!(payload.len() <= usize::from(u16::MAX));
        let mut head = [0u8; 13];
        head[0] = b'P';
        head[1] = b'G';
        head[2..6].copy_from_slice(&(pts as u32).to_be_bytes());
        head[6..10].copy_from_slice(&(dts as u32).to_be_bytes());
        head[10] = seg_type;
        head[11..13].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        self.sink.write_all(&head)?;
        self.sink.write_all(payload)
    }
}
