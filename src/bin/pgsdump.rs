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

//! SUP stream inspector.
//!
//! Walks a PGS/SUP file packet by packet, printing every segment with its
//! file offset, timestamps, and decoded header fields, plus per-epoch
//! statistics when a clearing composition is reached. A debugging aid for
//! eyeballing writer output and third-party streams:
//!
//! ```bash
//! pgsdump subtitles.sup
//! ```

use std::process::ExitCode;

use pgs_encodings::supread::{RawSegment, SegmentIter};
use pgs_encodings::{sup, FrameRate};

/// Running totals for the epoch being walked.
#[derive(Default)]
struct EpochStats {
    total_object_pixels: u64,
    images: u32,
    palettes: u32,
}

fn print_ts(label: &str, ticks: u32) {
    println!("{label} = {:.7}s ({ticks}/90000s)", f64::from(ticks) / 90_000.0);
}

fn print_pcs(payload: &[u8], stats: &mut EpochStats) {
    let width = u16::from_be_bytes([payload[0], payload[1]]);
    let height = u16::from_be_bytes([payload[2], payload[3]]);
    let fps_id = payload[4];
    let comp = u16::from_be_bytes([payload[5], payload[6]]);
    let state = payload[7];
    let objects = payload[10];

    let kind = match state {
        sup::STATE_EPOCH_START => "epoch start",
        sup::STATE_ACQUISITION => "acquisition point",
        _ => "normal",
    };
    println!("PCS ({kind})");
    println!("\tframe size  = {width}x{height}");
    match FrameRate::from_fps_id(fps_id) {
        Some(fr) => println!("\tfps id      = 0x{fps_id:02X} ({}/{})", fr.num, fr.den),
        None => println!("\tfps id      = 0x{fps_id:02X} (unknown)"),
    }
    println!("\tcomposition = {comp}");
    println!("\tobjects     = {objects}");
    for i in 0..usize::from(objects) {
        let o = &payload[11 + 8 * i..19 + 8 * i];
        println!("\tObject {}", i + 1);
        println!("\t\tpicture  = {}", u16::from_be_bytes([o[0], o[1]]));
        println!("\t\twindow   = {}", o[2]);
        println!("\t\tforced   = {}", o[3]);
        println!("\t\tposition = ({}, {})", u16::from_be_bytes([o[4], o[5]]), u16::from_be_bytes([o[6], o[7]]));
    }

    if state == sup::STATE_NORMAL && objects == 0 {
        println!("\tEpoch stats");
        println!("\t\tobject pixels = {}", stats.total_object_pixels);
        println!("\t\timages        = {}", stats.images);
        println!("\t\tpalettes      = {}", stats.palettes);
        *stats = EpochStats::default();
    }
}

fn print_wds(payload: &[u8]) {
    let count = payload[0];
    println!("WDS");
    println!("\twindows = {count}");
    for i in 0..usize::from(count) {
        let w = &payload[1 + 9 * i..10 + 9 * i];
        println!(
            "\tWindow {}: {}x{} at ({}, {})",
            w[0],
            u16::from_be_bytes([w[5], w[6]]),
            u16::from_be_bytes([w[7], w[8]]),
            u16::from_be_bytes([w[1], w[2]]),
            u16::from_be_bytes([w[3], w[4]]),
        );
    }
}

fn print_pds(payload: &[u8], stats: &mut EpochStats) {
    println!("PDS");
    println!("\tpalette id      = {}", payload[0]);
    println!("\tpalette version = {}", payload[1]);
    println!("\tentries         = {}", (payload.len() - 2) / 5);
    stats.palettes += 1;
}

fn print_ods(payload: &[u8], stats: &mut EpochStats) {
    let id = u16::from_be_bytes([payload[0], payload[1]]);
    let flags = payload[3];
    println!("ODS");
    println!("\tpicture  = {id}");
    match flags {
        sup::SEQ_SINGLE | sup::SEQ_FIRST if payload.len() >= 11 => {
            let data_len = usize::from(payload[4]) << 16
                | usize::from(u16::from_be_bytes([payload[5], payload[6]]));
            let width = u16::from_be_bytes([payload[7], payload[8]]);
            let height = u16::from_be_bytes([payload[9], payload[10]]);
            println!("\tsequence = {}", if flags == sup::SEQ_SINGLE { "single" } else { "first" });
            println!("\tlength   = {data_len} (incl. size header)");
            println!("\tsize     = {width}x{height}");
            stats.total_object_pixels += u64::from(width) * u64::from(height);
            stats.images += 1;
        }
        sup::SEQ_LAST => println!("\tsequence = last ({} bytes)", payload.len() - 4),
        _ => println!("\tsequence = middle ({} bytes)", payload.len() - 4),
    }
}

fn dump(data: &[u8]) -> Result<(), String> {
    let mut stats = EpochStats::default();
    for seg in SegmentIter::new(data) {
        let RawSegment { offset, pts, dts, seg_type, payload } = seg.map_err(|e| e.to_string())?;
        println!("Packet at 0x{offset:08x}:");
        print_ts("pts        ", pts);
        print_ts("dts        ", dts);
        println!("type       = 0x{seg_type:02X}");
        println!("length     = {}", payload.len());
        match seg_type {
            sup::SEG_PCS if payload.len() >= 11 => print_pcs(payload, &mut stats),
            sup::SEG_PDS if payload.len() >= 2 => print_pds(payload, &mut stats),
            sup::SEG_ODS if payload.len() >= 4 => print_ods(payload, &mut stats),
            sup::SEG_WDS if !payload.is_empty() => print_wds(payload),
            sup::SEG_END if payload.is_empty() => println!("Marker"),
            t => return Err(format!("offset 0x{offset:08x}: malformed segment of type 0x{t:02X}")),
        }
        println!();
    }
    Ok(())
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let (Some(path), None) = (args.next(), args.next()) else {
        println!("Usage: pgsdump SUPFILE");
        return ExitCode::SUCCESS;
    };

    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Couldn't open SUP file ({path}): {e}");
            return ExitCode::FAILURE;
        }
    };

    match dump(&data) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
