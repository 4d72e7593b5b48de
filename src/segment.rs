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

//! Frame-stream segmentation.
//!
//! The segmenter walks frames in order and maintains at most one open
//! event:
//!
//! 1. no event open, frame empty: skip
//! 2. no event open, frame visible: open an event — normalize transparent
//!    pixels, crop or split, palettize, keep the frame as the comparison
//!    reference
//! 3. event open, frame identical to the reference: extend
//! 4. event open, frame differs: close the event at this frame (exclusive)
//!    and rerun step 2 on the same frame
//!
//! On end of input a still-open event is closed at the final frame index;
//! the XML document later extends that event's out-time by one frame
//! (`auto_cut`), the SUP stream does not.
//!
//! The whole pipeline is single-threaded: one current and one reference
//! frame buffer are reused for the entire run and swapped when an event
//! opens.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::crop::{auto_crop, auto_split, enforce_even_y, SplitHeuristic};
use crate::event::{split_spans, EventList};
use crate::palette::{palettize, Palette};
use crate::pixelops::{self, PixelOps};
use crate::pngout::write_png;
use crate::sup::SupWriter;
use crate::{Rect, MIN_OBJECT_DIM};

/// Channel order delivered by a frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgba,
    Bgra,
}

/// A sequential supplier of RGBA frames with fixed geometry.
pub trait FrameSource {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn frame_count(&self) -> u64;
    fn channel_order(&self) -> ChannelOrder;

    /// Fills `buf` (4 * width * height bytes) with frame `frame`.
    /// Short reads are protocol violations and must fail.
    fn read_frame(&mut self, frame: u64, buf: &mut [u8]) -> io::Result<()>;
}

/// Reads headerless packed 32-bit frames from a file, geometry supplied by
/// the caller. The frame count is derived from the file size.
pub struct RawRgbaReader {
    file: BufReader<File>,
    path: PathBuf,
    width: usize,
    height: usize,
    frames: u64,
    order: ChannelOrder,
    next_frame: u64,
}

impl RawRgbaReader {
    pub fn open<P: AsRef<Path>>(
        path: P,
        width: usize,
        height: usize,
        order: ChannelOrder,
    ) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            io::Error::new(e.kind(), format!("cannot open frame source {}: {e}", path.display()))
        })?;
        let frame_size = (width * height * 4) as u64;
        if frame_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame geometry must be non-zero",
            ));
        }
        let len = file.metadata()?.len();
        if len % frame_size != 0 {
            eprintln!(
                "Warning: {} is not a whole number of {}x{} frames; trailing bytes ignored.",
                path.display(),
                width,
                height
            );
        }
        Ok(RawRgbaReader {
            file: BufReader::new(file),
            path,
            width,
            height,
            frames: len / frame_size,
            order,
            next_frame: 0,
        })
    }
}

impl FrameSource for RawRgbaReader {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn frame_count(&self) -> u64 {
        self.frames
    }

    fn channel_order(&self) -> ChannelOrder {
        self.order
    }

    fn read_frame(&mut self, frame: u64, buf: &mut [u8]) -> io::Result<()> {
        let frame_size = (self.width * self.height * 4) as u64;
        if frame != self.next_frame {
            self.file.seek(SeekFrom::Start(frame * frame_size))?;
        }
        self.next_frame = frame + 1;
        self.file.read_exact(buf).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("short read of frame {frame} from {}: {e}", self.path.display()),
            )
        })
    }
}

/// Segmentation options; see the converter's usage text for semantics.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// First frame index to read.
    pub seek: u64,
    /// Maximum number of frames to process.
    pub count: u64,
    /// Added to every emitted timestamp, in frames.
    pub t_offset: u64,
    /// Chop events longer than this many frames; 0 disables.
    pub split_at: u64,
    /// Minimum residue after a split; shorter tails merge backwards.
    pub min_split: u64,
    /// Crop each event to its visible pixels.
    pub autocrop: bool,
    /// Split events into up to two objects to cut buffer use.
    pub buffer_opt: bool,
    /// Force even Y coordinates and heights.
    pub even_y: bool,
    /// Emit palettized PNGs (PGS output palettizes regardless).
    pub palette: bool,
    /// Split-decision tunables, including the ugly override.
    pub heuristic: SplitHeuristic,
    /// Stricter buffer accounting in the SUP writer.
    pub strict: bool,
    /// Mark every event forced.
    pub mark_forced: bool,
    /// Graphic placement shift in the XML document.
    pub x_offset: usize,
    pub y_offset: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            seek: 0,
            count: u64::MAX,
            t_offset: 0,
            split_at: 0,
            min_split: 3,
            autocrop: true,
            buffer_opt: false,
            even_y: false,
            palette: true,
            heuristic: SplitHeuristic::default(),
            strict: false,
            mark_forced: false,
            x_offset: 0,
            y_offset: 0,
        }
    }
}

/// What a segmentation run produced, for the XML writer and diagnostics.
pub struct SegmentOutcome {
    pub events: EventList,
    /// Detected source events, before long-event splitting.
    pub detected: usize,
    /// First frame with visible content, offset not applied.
    pub first_frame: Option<u64>,
    /// Exclusive end of the last event as stored, offset applied.
    pub last_out: u64,
    /// The final event was cut by end of input.
    pub auto_cut_end: Option<u64>,
    /// Exclusive end of the processed range, offset applied.
    pub content_out: u64,
}

/// Drives the pipeline over one frame source.
pub struct Segmenter<'a> {
    source: &'a mut dyn FrameSource,
    config: SegmentConfig,
    ops: &'static dyn PixelOps,
}

impl<'a> Segmenter<'a> {
    pub fn new(source: &'a mut dyn FrameSource, config: SegmentConfig) -> io::Result<Self> {
        if source.width() < MIN_OBJECT_DIM || source.height() < MIN_OBJECT_DIM {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "video dimensions below {MIN_OBJECT_DIM}x{MIN_OBJECT_DIM} ({}x{})",
                    source.width(),
                    source.height()
                ),
            ));
        }
        Ok(Segmenter {
            source,
            config,
            ops: pixelops::detect(),
        })
    }

    /// Runs the main loop, writing epochs to `sup` and PNG assets into
    /// `png_dir` as events are found.
    pub fn run<W: Write>(
        &mut self,
        mut sup: Option<&mut SupWriter<W>>,
        png_dir: Option<&Path>,
    ) -> io::Result<SegmentOutcome> {
        let cfg = &self.config;
        let (width, height) = (self.source.width(), self.source.height());
        let order = self.source.channel_order();
        let to = cfg.t_offset;
        let min_split = cfg.min_split.max(1);

        let total = self.source.frame_count();
        let first = cfg.seek.min(total);
        let last = first + cfg.count.min(total - first);
        let count = last - first;

        let mut outcome = SegmentOutcome {
            events: EventList::new(),
            detected: 0,
            first_frame: None,
            last_out: 0,
            auto_cut_end: None,
            content_out: total + to,
        };
        if count == 0 {
            eprintln!("No frames found.");
            return Ok(outcome);
        }

        let progress_step = match count {
            0..=50 => 1,
            51..=200 => 10,
            201..=999 => 50,
            _ => 1000,
        };
        let progress_every = (count / progress_step).max(1);

        let mut cur = vec![0u8; width * height * 4];
        let mut reference = vec![0u8; width * height * 4];
        let mut out_buf = vec![0u8; width * height * 4];

        let mut have_line = false;
        let mut start_frame = 0u64;
        let mut n_crop = 1usize;
        let mut crops = [Rect::full(width, height); 2];
        let mut pal: Option<Palette> = None;
        let mut indexed: Option<Vec<u8>> = None;
        let need_palette = cfg.palette || sup.is_some();

        let mut close_event = |sup: &mut Option<&mut SupWriter<W>>,
                               outcome: &mut SegmentOutcome,
                               pal: &Option<Palette>,
                               indexed: &Option<Vec<u8>>,
                               crops: &[Rect; 2],
                               n_crop: usize,
                               start: u64,
                               end: u64|
         -> io::Result<()> {
            if let Some(writer) = sup.as_mut() {
                let palette = pal.as_ref().expect("palettized for SUP output");
                let index_buf = indexed.as_ref().expect("palettized for SUP output");
                for (s, e) in split_spans(start + to, end + to, cfg.split_at, min_split) {
                    // End-of-stream cutting can leave a zero-length span;
                    // the XML path restores its display frame, the SUP
                    // stream has nothing to show for it.
                    if e > s {
                        writer.write_event(
                            index_buf,
                            &crops[..n_crop],
                            palette,
                            s,
                            e,
                            cfg.strict,
                            cfg.mark_forced,
                        )?;
                    }
                }
            }
            outcome.events.push_split(
                start + to,
                end + to,
                cfg.split_at,
                min_split,
                n_crop,
                *crops,
                cfg.mark_forced,
            );
            outcome.last_out = end + to;
            Ok(())
        };

        for i in first..last {
            self.source.read_frame(i, &mut cur)?;
            let mut checked_empty = false;

            if (i - first) % progress_every == 0 {
                eprint!("\rProgress: {}/{} - Lines: {}", i - first, count, outcome.detected);
            }

            // Outside any line, empty frames are the common case.
            if !have_line {
                if self.ops.is_empty(&cur) {
                    continue;
                }
                checked_empty = true;
            }

            if have_line && self.ops.is_identical(&mut cur, &reference) {
                continue;
            }

            // Not a duplicate: close the open line before anything else.
            if have_line {
                close_event(
                    &mut sup,
                    &mut outcome,
                    &pal,
                    &indexed,
                    &crops,
                    n_crop,
                    start_frame,
                    i,
                )?;
                have_line = false;
            }

            if !checked_empty && self.ops.is_empty(&cur) {
                continue;
            }

            // A new line starts on this frame. Normalize it before it
            // becomes the comparison reference or reaches the palettizer.
            self.ops.zero_transparent(&mut cur);
            have_line = true;
            start_frame = i;

            match order {
                ChannelOrder::Rgba => out_buf.copy_from_slice(&cur),
                ChannelOrder::Bgra => self.ops.swap_rb(&cur, &mut out_buf),
            }

            if cfg.buffer_opt {
                n_crop = auto_split(&out_buf, width, height, &cfg.heuristic, &mut crops);
            } else if cfg.autocrop {
                n_crop = 1;
                crops[0] = auto_crop(&out_buf, width, height);
            } else {
                n_crop = 1;
                crops[0] = Rect::full(width, height);
            }
            if (cfg.buffer_opt || cfg.autocrop) && cfg.even_y {
                enforce_even_y(&mut crops[..n_crop], height);
            }

            if need_palette {
                let (p, idx) = palettize(&out_buf, width, height);
                pal = Some(p);
                indexed = Some(idx);
            }

            if let Some(dir) = png_dir {
                for j in 0..n_crop {
                    let pal_ref = if cfg.palette {
                        Some((
                            pal.as_ref().expect("palettized for PNG output"),
                            indexed.as_deref().expect("palettized for PNG output"),
                        ))
                    } else {
                        None
                    };
                    write_png(dir, start_frame, j, &out_buf, pal_ref, width, crops[j])?;
                }
            }

            outcome.detected += 1;
            outcome.first_frame.get_or_insert(i);

            // Keep this frame for the next comparison.
            std::mem::swap(&mut cur, &mut reference);
        }

        eprintln!("\rProgress: {count}/{count} - Lines: {} - Done", outcome.detected);

        // Close an event cut off by the end of the stream. Its stored span
        // ends at the final frame index; the XML writer adds the missing
        // frame back, the SUP stream keeps the shorter span.
        if have_line {
            let end = last - 1;
            close_event(
                &mut sup,
                &mut outcome,
                &pal,
                &indexed,
                &crops,
                n_crop,
                start_frame,
                end,
            )?;
            outcome.auto_cut_end = Some(end + to);
        }

        Ok(outcome)
    }
}
