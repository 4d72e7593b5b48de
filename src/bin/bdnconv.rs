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

//! BluRay subtitle converter.
//!
//! Reads a headerless packed RGBA (or BGRA) frame stream and writes BDN
//! XML with PNG assets, a PGS/SUP stream, or both, chosen by the output
//! file extension:
//!
//! ```bash
//! bdnconv --width 1920 --height 1080 -v 1080p -f 23.976 \
//!     -o subtitles.xml -o subtitles.sup render.rgba
//! ```
//!
//! Up to two `-o` targets are allowed, one per output format. On/off
//! options take `0` or `1`. Exit status is zero on success, including the
//! "no events detected" case, and non-zero on any configuration, input, or
//! format-constraint error.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use pgs_encodings::segment::{ChannelOrder, RawRgbaReader, SegmentConfig, Segmenter};
use pgs_encodings::xml::BdnDocument;
use pgs_encodings::{FrameRate, SplitHeuristic, SupWriter, VideoFormat};

#[derive(Parser)]
#[command(name = "bdnconv")]
#[command(about = "Generates BluRay subtitle streams from RGBA frame sequences")]
struct Args {
    /// Output file; .xml for BDN XML, .sup/.pgs for PGS. May be given
    /// twice with different formats.
    #[arg(short, long, required = true)]
    output: Vec<PathBuf>,

    /// Start processing at this frame, first is 0
    #[arg(short = 'j', long, default_value_t = 0)]
    seek: u64,

    /// Number of input frames to process
    #[arg(short, long, default_value_t = u64::MAX)]
    count: u64,

    /// Name of track, like: Undefined
    #[arg(short, long, default_value = "Undefined")]
    trackname: String,

    /// Language code, like: und
    #[arg(short, long, default_value = "und")]
    language: String,

    /// Either of: 480i, 480p, 576i, 720p, 1080i, 1080p
    #[arg(short, long, default_value = "1080p")]
    video_format: String,

    /// Either of: 23.976, 24, 25, 29.97, 50, 59.94
    #[arg(short, long, default_value = "23.976")]
    fps: String,

    /// X offset, for use with partial frames
    #[arg(short, long, default_value_t = 0)]
    x_offset: usize,

    /// Y offset, for use with partial frames
    #[arg(short, long, default_value_t = 0)]
    y_offset: usize,

    /// Offset timecodes by this many frames or a non-drop timecode
    /// (HH:MM:SS:FF)
    #[arg(short = 'd', long, default_value = "0")]
    t_offset: String,

    /// Split events longer than this many frames; disabled when 0
    #[arg(short, long, default_value_t = 0)]
    split_at: u64,

    /// Minimum length of an event segment after a split
    #[arg(short, long, default_value_t = 3)]
    min_split: u64,

    /// Enforce even Y coordinates [on=1, off=0]
    #[arg(short, long, default_value_t = 0)]
    even_y: u8,

    /// Automatically crop output [on=1, off=0]
    #[arg(short, long, default_value_t = 1)]
    autocrop: u8,

    /// Output 8bit palette PNG [on=1, off=0]
    #[arg(short, long, default_value_t = 1)]
    palette: u8,

    /// Allow output of empty XML files [on=1, off=0]
    #[arg(short = 'n', long = "null-xml", default_value_t = 0)]
    null_xml: u8,

    /// Stricter checks in the SUP writer; may lead to less optimized
    /// buffer use, but might raise compatibility [on=1, off=0]
    #[arg(short = 'z', long = "stricter", default_value_t = 0)]
    stricter: u8,

    /// Allow splitting images in ugly ways [on=1, off=0]
    #[arg(short, long, default_value_t = 0)]
    ugly: u8,

    /// Optimize PG buffer size by image splitting [on=1, off=0]
    #[arg(short, long, default_value_t = 0)]
    buffer_opt: u8,

    /// Mark all subtitles as forced [on=1, off=0]
    #[arg(short = 'F', long, default_value_t = 0)]
    forced: u8,

    /// Frame width of the input stream
    #[arg(long)]
    width: usize,

    /// Frame height of the input stream
    #[arg(long)]
    height: usize,

    /// Input stream is BGRA instead of RGBA
    #[arg(long, default_value_t = false)]
    bgra: bool,

    /// Input frame stream (headerless packed 32-bit pixels)
    input: PathBuf,
}

/// Timecode offsets accept a raw frame count or `HH:MM:SS:FF`.
fn parse_tc(input: &str, tc_rate: u32) -> Result<u64> {
    if let Ok(frames) = input.parse::<u64>() {
        return Ok(frames);
    }
    let parts: Vec<&str> = input.split(':').collect();
    if parts.len() != 4 || parts.iter().any(|p| p.len() != 2) {
        bail!("invalid timecode offset, expected FRAMENUMBER or HH:MM:SS:FF, but got: {input}");
    }
    let field = |i: usize, name: &str| -> Result<u64> {
        parts[i]
            .parse::<u64>()
            .with_context(|| format!("failed to parse integer (t-offset {name}): {}", parts[i]))
    };
    let (h, m, s, f) = (field(0, "hours")?, field(1, "minutes")?, field(2, "seconds")?, field(3, "frames")?);
    let rate = u64::from(tc_rate);
    Ok(((h * 60 + m) * 60 + s) * rate + f)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let frame_rate = FrameRate::from_name(&args.fps)
        .with_context(|| format!("invalid framerate ({})", args.fps))?;
    let video_format = VideoFormat::from_name(&args.video_format)
        .with_context(|| format!("invalid video format ({})", args.video_format))?;
    let t_offset = parse_tc(&args.t_offset, frame_rate.tc_rate)?;

    // Sort the output targets into at most one XML and one SUP file.
    let mut xml_output: Option<PathBuf> = None;
    let mut sup_output: Option<PathBuf> = None;
    for path in &args.output {
        if has_extension(path, "xml") {
            if xml_output.replace(path.clone()).is_some() {
                bail!("if more than one output filename is used, they must have different output formats");
            }
        } else if has_extension(path, "sup") || has_extension(path, "pgs") {
            if sup_output.replace(path.clone()).is_some() {
                bail!("if more than one output filename is used, they must have different output formats");
            }
        } else {
            bail!("output file extension must be \".xml\", \".sup\" or \".pgs\"");
        }
    }
    if args.output.len() > 2 {
        bail!("no more than two output filenames allowed");
    }

    let order = if args.bgra { ChannelOrder::Bgra } else { ChannelOrder::Rgba };
    let mut source = RawRgbaReader::open(&args.input, args.width, args.height, order)?;

    let config = SegmentConfig {
        seek: args.seek,
        count: args.count,
        t_offset,
        split_at: args.split_at,
        min_split: args.min_split.max(1),
        autocrop: args.autocrop != 0,
        buffer_opt: args.buffer_opt != 0,
        even_y: args.even_y != 0,
        palette: args.palette != 0 || sup_output.is_some(),
        heuristic: SplitHeuristic { allow_ugly: args.ugly != 0, ..SplitHeuristic::default() },
        strict: args.stricter != 0,
        mark_forced: args.forced != 0,
        x_offset: args.x_offset,
        y_offset: args.y_offset,
    };

    let mut sup = match &sup_output {
        Some(path) => Some(
            SupWriter::create(path, args.width, args.height, frame_rate)
                .with_context(|| format!("cannot open SUP output {}", path.display()))?,
        ),
        None => None,
    };

    // PNG assets always land next to the XML file.
    let png_dir: Option<PathBuf> = match &xml_output {
        Some(path) => {
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
            Some(parent.unwrap_or(Path::new(".")).to_path_buf())
        }
        None => None,
    };

    let mut segmenter = Segmenter::new(&mut source, config)?;
    let outcome = segmenter
        .run(sup.as_mut(), png_dir.as_deref())
        .context("frame processing failed")?;

    if let Some(writer) = sup {
        writer.close().context("cannot finish SUP output")?;
    }

    if let Some(xml_path) = xml_output {
        let (first_in, last_out) = match outcome.first_frame {
            Some(first) => (first + t_offset, outcome.last_out),
            None => {
                if args.null_xml == 0 {
                    eprintln!("No events detected. Cowardly refusing to write XML file.");
                    return Ok(());
                }
                (t_offset, t_offset)
            }
        };

        let doc = BdnDocument {
            title: &args.trackname,
            language: &args.language,
            video_format,
            frame_rate,
            events: &outcome.events,
            first_in,
            last_out,
            content_out: outcome.content_out,
            auto_cut_end: outcome.auto_cut_end,
            x_offset: args.x_offset,
            y_offset: args.y_offset,
            t_offset,
        };
        let file = File::create(&xml_path)
            .with_context(|| format!("error opening output XML file {}", xml_path.display()))?;
        let mut out = BufWriter::new(file);
        doc.write_to(&mut out)
            .with_context(|| format!("error writing XML file {}", xml_path.display()))?;
    }

    Ok(())
}
