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

//! Offline SUP parsing.
//!
//! The reverse of [`crate::sup`], used by the `pgsdump` inspector and by
//! tests that verify written streams structurally: parse the bytes back,
//! assemble display sets, and compare event counts, object geometry, and
//! forced flags against what went in. Validation mirrors the writer's
//! invariants — magic, segment ordering, object and window counts, ODS
//! fragment sequencing.

use std::io;

use crate::FrameRate;

fn bad(offset: usize, what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("SUP offset 0x{offset:08x}: {what}"),
    )
}

/// Raw segment with its file offset.
#[derive(Debug, Clone)]
pub struct RawSegment<'a> {
    pub offset: usize,
    pub pts: u32,
    pub dts: u32,
    pub seg_type: u8,
    pub payload: &'a [u8],
}

/// Iterates `PG`-framed segments over a byte slice.
pub struct SegmentIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SegmentIter<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SegmentIter { data, pos: 0 }
    }
}

impl<'a> Iterator for SegmentIter<'a> {
    type Item = io::Result<RawSegment<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let offset = self.pos;
        let rest = &self.data[offset..];
        if rest.len() < 13 {
            return Some(Err(bad(offset, "truncated segment header")));
        }
        if &rest[0..2] != b"PG" {
            return Some(Err(bad(offset, "invalid PG magic")));
        }
        let pts = u32::from_be_bytes([rest[2], rest[3], rest[4], rest[5]]);
        let dts = u32::from_be_bytes([rest[6], rest[7], rest[8], rest[9]]);
        let seg_type = rest[10];
        let len = usize::from(u16::from_be_bytes([rest[11], rest[12]]));
        if rest.len() < 13 + len {
            return Some(Err(bad(offset, "segment payload extends past end of file")));
        }
        self.pos = offset + 13 + len;
        Some(Ok(RawSegment {
            offset,
            pts,
            dts,
            seg_type,
            payload: &rest[13..13 + len],
        }))
    }
}

/// One composition object reference from a PCS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionRef {
    pub object_id: u16,
    pub window_id: u8,
    pub forced: bool,
    pub x: u16,
    pub y: u16,
}

/// Decoded PCS payload.
#[derive(Debug, Clone)]
pub struct Pcs {
    pub width: u16,
    pub height: u16,
    pub fps_id: u8,
    pub composition_number: u16,
    pub state: u8,
    pub objects: Vec<CompositionRef>,
}

/// One window from a WDS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub id: u8,
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

/// Decoded PDS payload: palette id, version, and (index, Y, Cr, Cb, A)
/// entries.
#[derive(Debug, Clone)]
pub struct Pds {
    pub id: u8,
    pub version: u8,
    pub entries: Vec<(u8, [u8; 4])>,
}

/// A fully reassembled object: fragments joined back into one RLE stream.
#[derive(Debug, Clone)]
pub struct OdsObject {
    pub id: u16,
    pub width: u16,
    pub height: u16,
    pub rle: Vec<u8>,
}

/// All segments between one PCS and its END.
#[derive(Debug, Clone)]
pub struct DisplaySet {
    pub pts: u32,
    pub dts: u32,
    pub pcs: Pcs,
    pub windows: Vec<Window>,
    pub palette: Option<Pds>,
    pub objects: Vec<OdsObject>,
}

impl DisplaySet {
    /// True for sets that put something on screen (epoch start or
    /// acquisition point with objects), false for clearing sets.
    #[must_use]
    pub fn is_presentation(&self) -> bool {
        !self.pcs.objects.is_empty()
    }
}

fn parse_pcs(offset: usize, payload: &[u8]) -> io::Result<Pcs> {
    if payload.len() < 11 {
        return Err(bad(offset, "undersized PCS"));
    }
    let count = payload[10] as usize;
    if count > 2 {
        return Err(bad(offset, "PCS with more than 2 composition objects"));
    }
    if payload.len() != 11 + 8 * count {
        return Err(bad(offset, "PCS length does not match object count"));
    }
    let mut objects = Vec::with_capacity(count);
    for i in 0..count {
        let o = &payload[11 + 8 * i..19 + 8 * i];
        let forced = match o[3] {
            0x40 => true,
            0x00 => false,
            _ => return Err(bad(offset, "invalid forced flag in composition object")),
        };
        if o[2] > 1 {
            return Err(bad(offset, "invalid window id in composition object"));
        }
        objects.push(CompositionRef {
            object_id: u16::from_be_bytes([o[0], o[1]]),
            window_id: o[2],
            forced,
            x: u16::from_be_bytes([o[4], o[5]]),
            y: u16::from_be_bytes([o[6], o[7]]),
        });
    }
    let fps_id = payload[4];
    if FrameRate::from_fps_id(fps_id).is_none() {
        return Err(bad(offset, "unknown framerate id in PCS"));
    }
    Ok(Pcs {
        width: u16::from_be_bytes([payload[0], payload[1]]),
        height: u16::from_be_bytes([payload[2], payload[3]]),
        fps_id,
        composition_number: u16::from_be_bytes([payload[5], payload[6]]),
        state: payload[7],
        objects,
    })
}

fn parse_wds(offset: usize, payload: &[u8]) -> io::Result<Vec<Window>> {
    if payload.is_empty() {
        return Err(bad(offset, "empty WDS"));
    }
    let count = payload[0] as usize;
    if count == 0 || count > 2 || payload.len() != 1 + 9 * count {
        return Err(bad(offset, "bad WDS window count or size"));
    }
    let mut windows = Vec::with_capacity(count);
    for i in 0..count {
        let w = &payload[1 + 9 * i..10 + 9 * i];
        if w[0] > 1 {
            return Err(bad(offset, "invalid window id in WDS"));
        }
        windows.push(Window {
            id: w[0],
            x: u16::from_be_bytes([w[1], w[2]]),
            y: u16::from_be_bytes([w[3], w[4]]),
            w: u16::from_be_bytes([w[5], w[6]]),
            h: u16::from_be_bytes([w[7], w[8]]),
        });
    }
    Ok(windows)
}

fn parse_pds(offset: usize, payload: &[u8]) -> io::Result<Pds> {
    if payload.len() < 2 || (payload.len() - 2) % 5 != 0 {
        return Err(bad(offset, "bad PDS size"));
    }
    if payload.len() > 2 + 5 * 256 {
        return Err(bad(offset, "oversized PDS"));
    }
    let entries = payload[2..]
        .chunks_exact(5)
        .map(|e| (e[0], [e[1], e[2], e[3], e[4]]))
        .collect();
    Ok(Pds {
        id: payload[0],
        version: payload[1],
        entries,
    })
}

/// In-progress ODS fragment assembly.
struct OdsAssembly {
    object: OdsObject,
    expected: usize,
    done: bool,
}

fn parse_ods(
    offset: usize,
    payload: &[u8],
    pending: &mut Option<OdsAssembly>,
) -> io::Result<Option<OdsObject>> {
    if payload.len() < 4 {
        return Err(bad(offset, "undersized ODS"));
    }
    let id = u16::from_be_bytes([payload[0], payload[1]]);
    let flags = payload[3];

    if flags & 0x80 != 0 {
        // First or single fragment.
        if pending.is_some() {
            return Err(bad(offset, "new ODS while a fragment sequence is open"));
        }
        if payload.len() < 11 {
            return Err(bad(offset, "undersized first ODS fragment"));
        }
        let data_len = usize::from(payload[4]) << 16
            | usize::from(u16::from_be_bytes([payload[5], payload[6]]));
        if data_len < 4 {
            return Err(bad(offset, "ODS data length below header size"));
        }
        let object = OdsObject {
            id,
            width: u16::from_be_bytes([payload[7], payload[8]]),
            height: u16::from_be_bytes([payload[9], payload[10]]),
            rle: payload[11..].to_vec(),
        };
        let assembly = OdsAssembly {
            expected: data_len - 4,
            done: flags == 0xC0,
            object,
        };
        if assembly.done || assembly.object.rle.len() == assembly.expected {
            if assembly.object.rle.len() != assembly.expected {
                return Err(bad(offset, "single ODS with mismatched data length"));
            }
            return Ok(Some(assembly.object));
        }
        *pending = Some(assembly);
        return Ok(None);
    }

    // Continuation fragment (middle 0x00 or last 0x40).
    let Some(mut assembly) = pending.take() else {
        return Err(bad(offset, "ODS continuation without a first fragment"));
    };
    if assembly.object.id != id {
        return Err(bad(offset, "ODS continuation for a different object"));
    }
    if flags != 0x00 && flags != 0x40 {
        return Err(bad(offset, "invalid ODS sequence flags"));
    }
    assembly.object.rle.extend_from_slice(&payload[4..]);
    assembly.done = flags == 0x40;
    if assembly.done {
        if assembly.object.rle.len() != assembly.expected {
            return Err(bad(offset, "assembled ODS does not match declared length"));
        }
        return Ok(Some(assembly.object));
    }
    if assembly.object.rle.len() >= assembly.expected {
        return Err(bad(offset, "ODS fragments exceed declared length"));
    }
    *pending = Some(assembly);
    Ok(None)
}

/// Parses a whole SUP byte stream into display sets.
///
/// Segment order within each set is enforced: PCS, then WDS/PDS/ODS, then
/// END.
pub fn parse(data: &[u8]) -> io::Result<Vec<DisplaySet>> {
    let mut sets = Vec::new();
    let mut current: Option<DisplaySet> = None;
    let mut pending_ods: Option<OdsAssembly> = None;

    for seg in SegmentIter::new(data) {
        let seg = seg?;
        match seg.seg_type {
            crate::sup::SEG_PCS => {
                if current.is_some() {
                    return Err(bad(seg.offset, "PCS before previous set's END"));
                }
                current = Some(DisplaySet {
                    pts: seg.pts,
                    dts: seg.dts,
                    pcs: parse_pcs(seg.offset, seg.payload)?,
                    windows: Vec::new(),
                    palette: None,
                    objects: Vec::new(),
                });
            }
            crate::sup::SEG_WDS => {
                let set = current
                    .as_mut()
                    .ok_or_else(|| bad(seg.offset, "WDS outside a display set"))?;
                set.windows = parse_wds(seg.offset, seg.payload)?;
            }
            crate::sup::SEG_PDS => {
                let set = current
                    .as_mut()
                    .ok_or_else(|| bad(seg.offset, "PDS outside a display set"))?;
                set.palette = Some(parse_pds(seg.offset, seg.payload)?);
            }
            crate::sup::SEG_ODS => {
                let set = current
                    .as_mut()
                    .ok_or_else(|| bad(seg.offset, "ODS outside a display set"))?;
                if let Some(obj) = parse_ods(seg.offset, seg.payload, &mut pending_ods)? {
                    set.objects.push(obj);
                }
            }
            crate::sup::SEG_END => {
                if !seg.payload.is_empty() {
                    return Err(bad(seg.offset, "END segment with payload"));
                }
                if pending_ods.is_some() {
                    return Err(bad(seg.offset, "END with an unfinished ODS sequence"));
                }
                let set = current
                    .take()
                    .ok_or_else(|| bad(seg.offset, "END without a display set"))?;
                sets.push(set);
            }
            t => return Err(bad(seg.offset, &format!("unknown segment type 0x{t:02X}"))),
        }
    }
    if current.is_some() {
        return Err(bad(data.len(), "stream ends inside a display set"));
    }
    Ok(sets)
}

/// One on-screen event reconstructed from its opening and closing sets.
#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub pts_in: u32,
    pub pts_out: u32,
    pub forced: bool,
    /// (x, y, width, height) per object, in composition order.
    pub objects: Vec<(u16, u16, u16, u16)>,
}

/// Pairs presentation sets with the following clearing set.
pub fn events(sets: &[DisplaySet]) -> io::Result<Vec<ParsedEvent>> {
    let mut out: Vec<ParsedEvent> = Vec::new();
    for set in sets {
        if set.is_presentation() {
            let mut objects = Vec::new();
            for r in &set.pcs.objects {
                let obj = set
                    .objects
                    .iter()
                    .find(|o| o.id == r.object_id)
                    .ok_or_else(|| bad(0, "PCS references an object without an ODS"))?;
                objects.push((r.x, r.y, obj.width, obj.height));
            }
            out.push(ParsedEvent {
                pts_in: set.pts,
                pts_out: set.pts,
                forced: set.pcs.objects.iter().any(|o| o.forced),
                objects,
            });
        } else if let Some(ev) = out.last_mut() {
            ev.pts_out = set.pts;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::palettize;
    use crate::sup::SupWriter;
    use crate::{FrameRate, Rect};

    fn sample_sup(forced: bool) -> Vec<u8> {
        let mut img = vec![0u8; 64 * 32 * 4];
        for y in 8..20 {
            for x in 8..40 {
                let o = (y * 64 + x) * 4;
                img[o..o + 4].copy_from_slice(&[10, 200, 30, 255]);
            }
        }
        let (pal, indexed) = palettize(&img, 64, 32);
        let fps = FrameRate::from_name("25").unwrap();
        let mut w = SupWriter::new(Vec::new(), 64, 32, fps).unwrap();
        w.write_event(
            &indexed,
            &[Rect { x: 8, y: 8, w: 32, h: 12 }],
            &pal,
            10,
            30,
            false,
            forced,
        )
        .unwrap();
        w.close().unwrap()
    }

    #[test]
    fn parses_writer_output() {
        let bytes = sample_sup(false);
        let sets = parse(&bytes).unwrap();
        assert_eq!(sets.len(), 2);
        assert!(sets[0].is_presentation());
        assert!(!sets[1].is_presentation());

        let set = &sets[0];
        assert_eq!(set.pcs.width, 64);
        assert_eq!(set.pcs.height, 32);
        assert_eq!(set.windows.len(), 1);
        assert_eq!(set.windows[0], Window { id: 0, x: 8, y: 8, w: 32, h: 12 });
        assert_eq!(set.objects.len(), 1);
        assert_eq!((set.objects[0].width, set.objects[0].height), (32, 12));
        let pds = set.palette.as_ref().unwrap();
        assert_eq!(pds.entries.len(), 2);
        assert_eq!(pds.entries[0].0, 0);
        assert_eq!(pds.entries[0].1, [0, 0, 0, 0]);
    }

    #[test]
    fn event_assembly_reports_forced_and_timing() {
        let bytes = sample_sup(true);
        let sets = parse(&bytes).unwrap();
        let evs = events(&sets).unwrap();
        assert_eq!(evs.len(), 1);
        assert!(evs[0].forced);
        assert_eq!(evs[0].objects, vec![(8, 8, 32, 12)]);
        // 25 fps: frame 10 -> 36000, frame 30 -> 108000.
        assert_eq!(evs[0].pts_in, 36_000);
        assert_eq!(evs[0].pts_out, 108_000);
    }

    #[test]
    fn decoded_rle_matches_source_indices() {
        let bytes = sample_sup(false);
        let sets = parse(&bytes).unwrap();
        let obj = &sets[0].objects[0];
        let pixels =
            crate::rle::decode_rle(&obj.rle, obj.width as usize, obj.height as usize).unwrap();
        assert!(pixels.iter().all(|&p| p == 1));
    }

    #[test]
    fn rejects_corrupt_streams() {
        let mut bytes = sample_sup(false);
        // Break the magic of the second segment.
        let len = u16::from_be_bytes([bytes[11], bytes[12]]) as usize;
        bytes[13 + len] = b'X';
        assert!(parse(&bytes).is_err());

        let bytes = sample_sup(false);
        assert!(parse(&bytes[..bytes.len() - 3]).is_err());
    }
}
