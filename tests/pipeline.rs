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

//! End-to-end pipeline scenarios: deterministic in-memory frame streams
//! run through segmentation into SUP bytes and BDN XML, then verified by
//! parsing the output back.

use std::io;

use pgs_encodings::segment::{ChannelOrder, FrameSource, SegmentConfig, SegmentOutcome, Segmenter};
use pgs_encodings::sup::{self, frame_pts, SupWriter};
use pgs_encodings::supread;
use pgs_encodings::xml::BdnDocument;
use pgs_encodings::{FrameRate, Rect, SplitHeuristic, VideoFormat};

const W: usize = 128;
const H: usize = 96;

struct MemSource {
    width: usize,
    height: usize,
    frames: Vec<Vec<u8>>,
}

impl FrameSource for MemSource {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn frame_count(&self) -> u64 {
        self.frames.len() as u64
    }

    fn channel_order(&self) -> ChannelOrder {
        ChannelOrder::Rgba
    }

    fn read_frame(&mut self, frame: u64, buf: &mut [u8]) -> io::Result<()> {
        buf.copy_from_slice(&self.frames[frame as usize]);
        Ok(())
    }
}

fn empty_frame() -> Vec<u8> {
    vec![0u8; W * H * 4]
}

fn block_frame(rect: Rect, color: [u8; 4]) -> Vec<u8> {
    let mut f = empty_frame();
    for y in rect.y..rect.y + rect.h {
        for x in rect.x..rect.x + rect.w {
            let o = (y * W + x) * 4;
            f[o..o + 4].copy_from_slice(&color);
        }
    }
    f
}

/// Runs the pipeline over in-memory frames; returns SUP bytes and the
/// segmentation outcome for the XML side.
fn run(frames: Vec<Vec<u8>>, config: SegmentConfig, fps_name: &str) -> (Vec<u8>, SegmentOutcome) {
    let fps = FrameRate::from_name(fps_name).unwrap();
    let mut source = MemSource { width: W, height: H, frames };
    let mut writer = SupWriter::new(Vec::new(), W, H, fps).unwrap();
    let mut segmenter = Segmenter::new(&mut source, config).unwrap();
    let outcome = segmenter.run(Some(&mut writer), None).unwrap();
    (writer.close().unwrap(), outcome)
}

fn render_xml(outcome: &SegmentOutcome, fps_name: &str, first_in: u64, last_out: u64) -> String {
    let doc = BdnDocument {
        title: "Undefined",
        language: "und",
        video_format: VideoFormat::P1080,
        frame_rate: FrameRate::from_name(fps_name).unwrap(),
        events: &outcome.events,
        first_in,
        last_out,
        content_out: outcome.content_out,
        auto_cut_end: outcome.auto_cut_end,
        x_offset: 0,
        y_offset: 0,
        t_offset: 0,
    };
    let mut buf = Vec::new();
    doc.write_to(&mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

fn well_formed_timecode(tc: &str) -> bool {
    let b = tc.as_bytes();
    b.len() == 11
        && b.iter().enumerate().all(|(i, &c)| match i {
            2 | 5 | 8 => c == b':',
            _ => c.is_ascii_digit(),
        })
        && tc[3..5].parse::<u32>().unwrap() < 60
        && tc[6..8].parse::<u32>().unwrap() < 60
}

#[test]
fn empty_stream_produces_no_events() {
    let frames = vec![empty_frame(); 24];
    let (bytes, outcome) = run(frames, SegmentConfig::default(), "23.976");
    assert!(bytes.is_empty());
    assert!(outcome.events.is_empty());
    assert!(outcome.first_frame.is_none());

    // allow_empty still yields a valid document with zero events.
    let xml = render_xml(&outcome, "23.976", 0, 0);
    assert!(xml.contains("NumberofEvents=\"0\""));
    assert!(xml.contains("ContentOutTC=\"00:00:01:00\""));
}

#[test]
fn single_ten_frame_event_timing() {
    let visible = block_frame(Rect { x: 16, y: 40, w: 96, h: 24 }, [200, 10, 10, 255]);
    let mut frames = vec![empty_frame(); 24];
    for f in frames.iter_mut().take(15).skip(5) {
        *f = visible.clone();
    }
    let (bytes, outcome) = run(frames, SegmentConfig::default(), "23.976");

    let fps = FrameRate::from_name("23.976").unwrap();
    let sets = supread::parse(&bytes).unwrap();
    assert_eq!(sets.len(), 2);
    // PCS-start PTS = round(5 * 90000 * 1001 / 24000).
    assert_eq!(sets[0].pts, 18769);
    assert_eq!(u64::from(sets[0].pts), frame_pts(5, fps));
    assert_eq!(u64::from(sets[1].pts), frame_pts(15, fps));
    assert_eq!(sets[0].pcs.state, sup::STATE_EPOCH_START);

    let events = supread::events(&sets).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].objects, vec![(16, 40, 96, 24)]);

    let xml = render_xml(&outcome, "23.976", 5, 15);
    assert!(xml.contains("InTC=\"00:00:00:05\" OutTC=\"00:00:00:15\""));
    assert!(xml.contains("LastEventOutTC=\"00:00:00:15\" FirstEventInTC=\"00:00:00:05\""));
}

#[test]
fn adjacent_events_differing_by_one_pixel_do_not_merge() {
    let a = block_frame(Rect { x: 0, y: 0, w: 16, h: 16 }, [1, 1, 1, 255]);
    let mut b = a.clone();
    b[0] = 2;
    let frames = vec![a, b, empty_frame()];
    let (bytes, outcome) = run(frames, SegmentConfig::default(), "25");

    assert_eq!(outcome.detected, 2);
    let sets = supread::parse(&bytes).unwrap();
    let events = supread::events(&sets).unwrap();
    assert_eq!(events.len(), 2);
    let fps = FrameRate::from_name("25").unwrap();
    assert_eq!(u64::from(events[0].pts_in), frame_pts(0, fps));
    assert_eq!(u64::from(events[0].pts_out), frame_pts(1, fps));
    assert_eq!(u64::from(events[1].pts_in), frame_pts(1, fps));
    assert_eq!(u64::from(events[1].pts_out), frame_pts(2, fps));

    // Back-to-back epochs chain as an acquisition point.
    let presentations: Vec<u8> = sets
        .iter()
        .filter(|s| s.is_presentation())
        .map(|s| s.pcs.state)
        .collect();
    assert_eq!(presentations, vec![sup::STATE_EPOCH_START, sup::STATE_ACQUISITION]);
}

#[test]
fn oversized_event_splits_into_seekable_epochs() {
    let visible = block_frame(Rect { x: 8, y: 8, w: 32, h: 16 }, [4, 4, 4, 255]);
    let mut frames = vec![visible; 100];
    frames.push(empty_frame());
    let config = SegmentConfig { split_at: 30, min_split: 3, ..SegmentConfig::default() };
    let (bytes, outcome) = run(frames, config, "25");

    let lens: Vec<u64> = outcome
        .events
        .iter()
        .map(|e| e.end_frame - e.start_frame)
        .collect();
    assert_eq!(lens, vec![30, 30, 30, 10]);

    let sets = supread::parse(&bytes).unwrap();
    let events = supread::events(&sets).unwrap();
    assert_eq!(events.len(), 4);
    let fps = FrameRate::from_name("25").unwrap();
    for (i, (s, e)) in [(0u64, 30u64), (30, 60), (60, 90), (90, 100)].iter().enumerate() {
        assert_eq!(u64::from(events[i].pts_in), frame_pts(*s, fps));
        assert_eq!(u64::from(events[i].pts_out), frame_pts(*e, fps));
    }
}

#[test]
fn forced_flag_reaches_both_outputs() {
    let visible = block_frame(Rect { x: 8, y: 8, w: 32, h: 16 }, [4, 4, 4, 255]);
    let frames = vec![visible, empty_frame()];
    let config = SegmentConfig { mark_forced: true, ..SegmentConfig::default() };
    let (bytes, outcome) = run(frames, config, "25");

    let sets = supread::parse(&bytes).unwrap();
    for set in sets.iter().filter(|s| s.is_presentation()) {
        assert!(set.pcs.objects.iter().all(|o| o.forced));
    }
    let xml = render_xml(&outcome, "25", 0, 1);
    assert!(xml.contains("<Event Forced=\"True\""));
}

#[test]
fn l_shaped_event_emits_two_objects_windows_and_ods() {
    let mut f = empty_frame();
    // Tall block top-left, wide block at the bottom, big transparent gap.
    for y in 4..36 {
        for x in 4..24 {
            let o = (y * W + x) * 4;
            f[o..o + 4].copy_from_slice(&[9, 9, 9, 255]);
        }
    }
    for y in 76..92 {
        for x in 4..124 {
            let o = (y * W + x) * 4;
            f[o..o + 4].copy_from_slice(&[9, 9, 9, 255]);
        }
    }
    let frames = vec![f, empty_frame()];
    let config = SegmentConfig {
        buffer_opt: true,
        heuristic: SplitHeuristic { min_gain_area: 512, ..SplitHeuristic::default() },
        ..SegmentConfig::default()
    };
    let (bytes, _) = run(frames, config, "25");

    let sets = supread::parse(&bytes).unwrap();
    let opening = &sets[0];
    assert_eq!(opening.pcs.objects.len(), 2);
    assert_eq!(opening.windows.len(), 2);
    assert_eq!(opening.objects.len(), 2);
    assert_eq!((opening.objects[0].width, opening.objects[0].height), (20, 32));
    assert_eq!((opening.objects[1].width, opening.objects[1].height), (120, 16));
    // Windows cover the same rectangles the objects are placed at.
    for (r, win) in opening.pcs.objects.iter().zip(&opening.windows) {
        assert_eq!((r.x, r.y), (win.x, win.y));
    }
}

#[test]
fn pts_monotonic_and_dts_bounded_across_stream() {
    let a = block_frame(Rect { x: 0, y: 0, w: 16, h: 16 }, [1, 1, 1, 255]);
    let b = block_frame(Rect { x: 20, y: 20, w: 40, h: 24 }, [2, 2, 2, 255]);
    let mut frames = Vec::new();
    for _ in 0..10 {
        frames.push(a.clone());
    }
    for _ in 0..4 {
        frames.push(empty_frame());
    }
    for _ in 0..10 {
        frames.push(b.clone());
    }
    frames.push(empty_frame());
    let (bytes, _) = run(frames, SegmentConfig::default(), "29.97");

    let mut last_pcs_pts = 0u32;
    for seg in supread::SegmentIter::new(&bytes) {
        let seg = seg.unwrap();
        assert!(seg.dts <= seg.pts, "DTS above PTS at offset {}", seg.offset);
        if seg.seg_type == sup::SEG_PCS {
            assert!(seg.pts >= last_pcs_pts, "PCS PTS regressed at offset {}", seg.offset);
            last_pcs_pts = seg.pts;
        }
    }
}

#[test]
fn epochs_are_well_formed_segment_sequences() {
    let visible = block_frame(Rect { x: 8, y: 8, w: 32, h: 16 }, [4, 4, 4, 255]);
    let mut frames = vec![visible; 5];
    frames.push(empty_frame());
    let (bytes, _) = run(frames, SegmentConfig::default(), "50");

    // Between one PCS and the next, the type sequence must be
    // WDS [PDS] ODS* END.
    let mut current: Vec<u8> = Vec::new();
    let mut batches = Vec::new();
    for seg in supread::SegmentIter::new(&bytes) {
        let seg = seg.unwrap();
        if seg.seg_type == sup::SEG_PCS && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
        }
        current.push(seg.seg_type);
    }
    batches.push(current);

    for batch in &batches {
        assert_eq!(batch[0], sup::SEG_PCS);
        assert_eq!(*batch.last().unwrap(), sup::SEG_END);
        let mids = &batch[1..batch.len() - 1];
        let mut stage = 0; // 0: WDS expected, 1: PDS/ODS region
        for &t in mids {
            match (stage, t) {
                (0, sup::SEG_WDS) => stage = 1,
                (1, sup::SEG_PDS | sup::SEG_ODS) => {}
                _ => panic!("unexpected segment 0x{t:02X} inside a display set"),
            }
        }
    }
}

#[test]
fn round_trip_preserves_events_dimensions_and_flags() {
    let first = block_frame(Rect { x: 10, y: 10, w: 30, h: 20 }, [5, 5, 5, 255]);
    let second = block_frame(Rect { x: 50, y: 60, w: 64, h: 24 }, [6, 6, 6, 200]);
    let mut frames = vec![empty_frame(); 2];
    frames.extend(vec![first; 6]);
    frames.extend(vec![empty_frame(); 3]);
    frames.extend(vec![second; 8]);
    frames.push(empty_frame());

    let config = SegmentConfig { mark_forced: true, ..SegmentConfig::default() };
    let (bytes, outcome) = run(frames, config, "24");

    let sets = supread::parse(&bytes).unwrap();
    let parsed = supread::events(&sets).unwrap();
    assert_eq!(parsed.len(), outcome.events.len());
    for (sup_event, src) in parsed.iter().zip(outcome.events.iter()) {
        assert_eq!(sup_event.forced, src.forced);
        assert_eq!(sup_event.objects.len(), src.graphics);
        for (obj, crop) in sup_event.objects.iter().zip(src.crops.iter()) {
            assert_eq!(*obj, (crop.x as u16, crop.y as u16, crop.w as u16, crop.h as u16));
        }
    }
}

#[test]
fn emitted_timecodes_are_well_formed() {
    let visible = block_frame(Rect { x: 8, y: 8, w: 32, h: 16 }, [4, 4, 4, 255]);
    let mut frames = vec![empty_frame(); 3];
    frames.extend(vec![visible; 40]);
    let config = SegmentConfig { split_at: 12, ..SegmentConfig::default() };
    let (_, outcome) = run(frames, config, "59.94");
    assert!(outcome.auto_cut_end.is_some());

    let xml = render_xml(&outcome, "59.94", 3, outcome.last_out);
    for chunk in xml.split('"') {
        if chunk.len() == 11 && chunk.as_bytes()[2] == b':' {
            assert!(well_formed_timecode(chunk), "bad timecode {chunk}");
        }
    }
    // The auto-cut event's XML out-time covers the full stream length.
    assert!(xml.contains(&format!("OutTC=\"{}\"", "00:00:00:43")));
}

#[test]
fn bgra_and_rgba_sources_produce_identical_streams() {
    let rgba = block_frame(Rect { x: 8, y: 8, w: 16, h: 16 }, [10, 20, 30, 255]);
    let mut bgra = rgba.clone();
    for px in bgra.chunks_exact_mut(4) {
        px.swap(0, 2);
    }

    struct Swapped(MemSource);
    impl FrameSource for Swapped {
        fn width(&self) -> usize {
            self.0.width()
        }
        fn height(&self) -> usize {
            self.0.height()
        }
        fn frame_count(&self) -> u64 {
            self.0.frame_count()
        }
        fn channel_order(&self) -> ChannelOrder {
            ChannelOrder::Bgra
        }
        fn read_frame(&mut self, frame: u64, buf: &mut [u8]) -> io::Result<()> {
            self.0.read_frame(frame, buf)
        }
    }

    let fps = FrameRate::from_name("25").unwrap();
    let (frames_a, frames_b) = (vec![rgba, empty_frame()], vec![bgra, empty_frame()]);

    let mut src_a = MemSource { width: W, height: H, frames: frames_a };
    let mut sup_a = SupWriter::new(Vec::new(), W, H, fps).unwrap();
    Segmenter::new(&mut src_a, SegmentConfig::default())
        .unwrap()
        .run(Some(&mut sup_a), None)
        .unwrap();

    let mut src_b = Swapped(MemSource { width: W, height: H, frames: frames_b });
    let mut sup_b = SupWriter::new(Vec::new(), W, H, fps).unwrap();
    Segmenter::new(&mut src_b, SegmentConfig::default())
        .unwrap()
        .run(Some(&mut sup_b), None)
        .unwrap();

    assert_eq!(sup_a.close().unwrap(), sup_b.close().unwrap());
}
