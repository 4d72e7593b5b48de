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

//! BDN XML emission.
//!
//! The sidecar document enumerates every subtitle event with SMPTE
//! non-drop timecodes and references the per-event PNG assets written next
//! to it. The layout follows the BDN 0.93 schema: a `<Description>` block
//! with stream-wide attributes, then one `<Event>` per display span with
//! one or two `<Graphic>` children.
//!
//! Timecodes are `HH:MM:SS:FF` against the integer timecode rate of the
//! framerate entry (24 for 23.976 and so on, always non-drop). Hours above
//! 99 cannot be represented and abort the conversion.

use std::io::{self, Write};

use crate::event::EventList;
use crate::{FrameRate, VideoFormat};

/// Formats a frame index as a non-drop SMPTE timecode.
pub fn timecode(frame: u64, tc_rate: u32) -> io::Result<String> {
    let rate = u64::from(tc_rate);
    let ff = frame % rate;
    let total_s = frame / rate;
    let ss = total_s % 60;
    let mm = (total_s / 60) % 60;
    let hh = total_s / 3600;
    if hh > 99 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("timecodes above 99:59:59:{:02} not supported: {hh}:{mm:02}:{ss:02}:{ff:02}", rate - 1),
        ));
    }
    Ok(format!("{hh:02}:{mm:02}:{ss:02}:{ff:02}"))
}

/// Minimal attribute-value escaping for the free-form name field.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Everything the document needs besides the events themselves.
pub struct BdnDocument<'a> {
    pub title: &'a str,
    pub language: &'a str,
    pub video_format: VideoFormat,
    pub frame_rate: &'static FrameRate,
    pub events: &'a EventList,
    /// In-time of the first event, timecode offset included.
    pub first_in: u64,
    /// Exclusive out-time of the last event, offset included.
    pub last_out: u64,
    /// Exclusive end of the content, offset included.
    pub content_out: u64,
    /// Stored end frame of a stream-final event that was cut by end of
    /// input; its OutTC is extended by one frame, the SUP stream's is not.
    pub auto_cut_end: Option<u64>,
    /// Added to every Graphic X placement (partial-frame workflows).
    pub x_offset: usize,
    /// Added to every Graphic Y placement.
    pub y_offset: usize,
    /// Timecode offset in frames; PNG names use unshifted frame numbers.
    pub t_offset: u64,
}

impl BdnDocument<'_> {
    /// Writes the complete document.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let rate = self.frame_rate.tc_rate;
        let auto_cut = u64::from(self.auto_cut_end.is_some());
        let first_in = timecode(self.first_in, rate)?;
        let last_out = timecode(self.last_out + auto_cut, rate)?;
        let content_in = timecode(0, rate)?;
        let content_out = timecode(self.content_out, rate)?;

        write!(
            out,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <BDN Version=\"0.93\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\"\n\
             xsi:noNamespaceSchemaLocation=\"BD-03-006-0093b BDN File Format.xsd\">\n\
             <Description>\n\
             <Name Title=\"{}\" Content=\"\"/>\n\
             <Language Code=\"{}\"/>\n\
             <Format VideoFormat=\"{}\" FrameRate=\"{}\" DropFrame=\"false\"/>\n\
             <Events LastEventOutTC=\"{}\" FirstEventInTC=\"{}\"\n\
             ContentInTC=\"{}\" ContentOutTC=\"{}\" NumberofEvents=\"{}\" Type=\"Graphic\"/>\n\
             </Description>\n\
             <Events>\n",
            escape(self.title),
            escape(self.language),
            self.video_format.as_str(),
            self.frame_rate.name,
            last_out,
            first_in,
            content_in,
            content_out,
            self.events.len(),
        )?;

        for event in self.events {
            let in_tc = timecode(event.start_frame, rate)?;
            let out_frame = match self.auto_cut_end {
                Some(end) if event.end_frame == end => event.end_frame + 1,
                _ => event.end_frame,
            };
            let out_tc = timecode(out_frame, rate)?;
            writeln!(
                out,
                "<Event Forced=\"{}\" InTC=\"{}\" OutTC=\"{}\">",
                if event.forced { "True" } else { "False" },
                in_tc,
                out_tc
            )?;
            for (i, crop) in event.crops.iter().take(event.graphics).enumerate() {
                writeln!(
                    out,
                    "<Graphic Width=\"{}\" Height=\"{}\" X=\"{}\" Y=\"{}\">{:08}_{}.png</Graphic>",
                    crop.w,
                    crop.h,
                    self.x_offset + crop.x,
                    self.y_offset + crop.y,
                    event.image_number - self.t_offset,
                    i
                )?;
            }
            writeln!(out, "</Event>")?;
        }

        write!(out, "</Events>\n</BDN>\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Rect;

    #[test]
    fn timecode_fields_and_ranges() {
        assert_eq!(timecode(0, 24).unwrap(), "00:00:00:00");
        assert_eq!(timecode(5, 24).unwrap(), "00:00:00:05");
        assert_eq!(timecode(15, 24).unwrap(), "00:00:00:15");
        // 1 hour, 2 minutes, 3 seconds, 4 frames at 25 fps.
        assert_eq!(timecode(((3600 + 123) * 25) + 4, 25).unwrap(), "01:02:03:04");
        // Frames field stays below the rate.
        assert_eq!(timecode(29, 30).unwrap(), "00:00:00:29");
        assert_eq!(timecode(30, 30).unwrap(), "00:00:01:00");
    }

    #[test]
    fn timecode_rejects_three_digit_hours() {
        let frame = 100u64 * 3600 * 24;
        assert!(timecode(frame, 24).is_err());
        assert!(timecode(frame - 1, 24).is_ok());
    }

    fn sample_events() -> EventList {
        let mut list = EventList::new();
        list.push_split(
            5,
            15,
            0,
            3,
            1,
            [Rect { x: 100, y: 900, w: 300, h: 60 }, Rect::default()],
            false,
        );
        list
    }

    #[test]
    fn document_structure_matches_bdn_schema() {
        let events = sample_events();
        let doc = BdnDocument {
            title: "Undefined",
            language: "und",
            video_format: VideoFormat::P1080,
            frame_rate: FrameRate::from_name("23.976").unwrap(),
            events: &events,
            first_in: 5,
            last_out: 15,
            content_out: 24,
            auto_cut_end: None,
            x_offset: 0,
            y_offset: 0,
            t_offset: 0,
        };
        let mut buf = Vec::new();
        doc.write_to(&mut buf).unwrap();
        let xml = String::from_utf8(buf).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<BDN Version=\"0.93\""));
        assert!(xml.contains("<Format VideoFormat=\"1080p\" FrameRate=\"23.976\" DropFrame=\"false\"/>"));
        assert!(xml.contains("LastEventOutTC=\"00:00:00:15\" FirstEventInTC=\"00:00:00:05\""));
        assert!(xml.contains("NumberofEvents=\"1\""));
        assert!(xml.contains("<Event Forced=\"False\" InTC=\"00:00:00:05\" OutTC=\"00:00:00:15\">"));
        assert!(xml.contains(
            "<Graphic Width=\"300\" Height=\"60\" X=\"100\" Y=\"900\">00000005_0.png</Graphic>"
        ));
        assert!(xml.ends_with("</Events>\n</BDN>\n"));

        // Every timecode in the document is well-formed.
        for tc in ["00:00:00:05", "00:00:00:15", "00:00:00:00", "00:00:01:00"] {
            assert!(tc.len() == 11 && tc.as_bytes()[2] == b':');
        }
    }

    #[test]
    fn auto_cut_extends_final_out_time_only_in_xml() {
        let mut events = EventList::new();
        events.push_split(10, 23, 0, 3, 1, [Rect::full(8, 8), Rect::default()], true);
        let doc = BdnDocument {
            title: "t",
            language: "und",
            video_format: VideoFormat::P720,
            frame_rate: FrameRate::from_name("25").unwrap(),
            events: &events,
            first_in: 10,
            last_out: 23,
            content_out: 24,
            auto_cut_end: Some(23),
            x_offset: 0,
            y_offset: 0,
            t_offset: 0,
        };
        let mut buf = Vec::new();
        doc.write_to(&mut buf).unwrap();
        let xml = String::from_utf8(buf).unwrap();
        assert!(xml.contains("OutTC=\"00:00:00:24\""));
        assert!(xml.contains("LastEventOutTC=\"00:00:00:24\""));
        assert!(xml.contains("Forced=\"True\""));
    }

    #[test]
    fn offsets_shift_placement_and_asset_names() {
        let mut events = EventList::new();
        // Timecode offset of 100 frames already applied to the span.
        events.push_split(105, 115, 0, 3, 1, [Rect { x: 10, y: 20, w: 40, h: 16 }, Rect::default()], false);
        let doc = BdnDocument {
            title: "t",
            language: "und",
            video_format: VideoFormat::P1080,
            frame_rate: FrameRate::from_name("25").unwrap(),
            events: &events,
            first_in: 105,
            last_out: 115,
            content_out: 124,
            auto_cut_end: None,
            x_offset: 7,
            y_offset: 3,
            t_offset: 100,
        };
        let mut buf = Vec::new();
        doc.write_to(&mut buf).unwrap();
        let xml = String::from_utf8(buf).unwrap();
        // Asset name uses the unshifted frame number; placement is shifted.
        assert!(xml.contains("X=\"17\" Y=\"23\">00000005_0.png"));
        assert!(xml.contains("InTC=\"00:00:04:05\""));
    }
}
