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

//! PGS object run-length coding.
//!
//! Object Definition Segments carry bitmaps as palette indices in the PGS
//! run-length form. Code words:
//!
//! | Bytes         | Meaning |
//! |---------------|---------|
//! | `CC` (CC != 0)| one pixel of color CC |
//! | `00 00`       | end of line |
//! | `00 0L`       | L transparent pixels, L in 1..63 |
//! | `00 4L LL`    | `(L<<8 \| LL)` transparent pixels, 64..16383 |
//! | `00 8L CC`    | L pixels of color CC, L in 3..63 |
//! | `00 CL LL CC` | `(L<<8 \| LL)` pixels of color CC, 64..16383 |
//!
//! Rows are encoded top to bottom and every row ends with the `00 00`
//! marker. The encoder emits the shortest word for each run and splits runs
//! longer than 16383 pixels.

use bytes::{BufMut, BytesMut};
use std::io;

use crate::Rect;

/// Longest run expressible by a single extended code word.
const MAX_RUN: usize = 0x3FFF;

/// Encodes one rectangle of a palettized image.
///
/// `indexed` is the full-frame index buffer with row stride `stride`;
/// `rect` selects the object to encode.
#[must_use]
pub fn encode_rle(indexed: &[u8], stride: usize, rect: Rect) -> BytesMut {
    // Worst case is alternating colors: one byte per pixel plus the line
    // markers; runs only shrink that.
    let mut buf = BytesMut::with_capacity(rect.area() + rect.h * 2);

    for y in rect.y..rect.y + rect.h {
        let row = &indexed[y * stride + rect.x..y * stride + rect.x + rect.w];
        let mut i = 0;
        while i < rect.w {
            let color = row[i];
            let mut run = 1;
            while i + run < rect.w && row[i + run] == color {
                run += 1;
            }
            encode_run(&mut buf, color, run);
            i += run;
        }
        buf.put_u8(0);
        buf.put_u8(0);
    }
    buf
}

#[allow(clippy::cast_possible_truncation)] // run lengths capped at 14 bits above
fn encode_run(buf: &mut BytesMut, color: u8, mut run: usize) {
    while run > 0 {
        let n = run.min(MAX_RUN);
        match (color, n) {
            (0, 1..=63) => {
                buf.put_u8(0);
                buf.put_u8(n as u8);
            }
            (0, _) => {
                buf.put_u8(0);
                buf.put_u8(0x40 | (n >> 8) as u8);
                buf.put_u8(n as u8);
            }
            (c, 1 | 2) => {
                for _ in 0..n {
                    buf.put_u8(c);
                }
            }
            (c, 3..=63) => {
                buf.put_u8(0);
                buf.put_u8(0x80 | n as u8);
                buf.put_u8(c);
            }
            (c, _) => {
                buf.put_u8(0);
                buf.put_u8(0xC0 | (n >> 8) as u8);
                buf.put_u8(n as u8);
                buf.put_u8(c);
            }
        }
        run -= n;
    }
}

fn malformed(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("RLE: {what}"))
}

/// Decodes an RLE stream back to a `w` x `h` index buffer.
///
/// Used by the SUP inspector and the round-trip tests. Fails on truncated
/// streams, rows that do not match `w`, or trailing garbage.
pub fn decode_rle(data: &[u8], w: usize, h: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(w * h);
    let mut pos = 0;
    let mut row_len = 0;
    let mut rows = 0;

    let mut next = |pos: &mut usize| -> io::Result<u8> {
        let b = *data.get(*pos).ok_or_else(|| malformed("truncated stream"))?;
        *pos += 1;
        Ok(b)
    };

    while rows < h {
        let b = next(&mut pos)?;
        if b != 0 {
            out.push(b);
            row_len += 1;
            continue;
        }
        let code = next(&mut pos)?;
        if code == 0 {
            if row_len != w {
                return Err(malformed(&format!(
                    "row {rows} has {row_len} pixels, expected {w}"
                )));
            }
            rows += 1;
            row_len = 0;
            continue;
        }
        let long = code & 0x40 != 0;
        let colored = code & 0x80 != 0;
        let mut run = usize::from(code & 0x3F);
        if long {
            run = run << 8 | usize::from(next(&mut pos)?);
        }
        let color = if colored { next(&mut pos)? } else { 0 };
        if run == 0 {
            return Err(malformed("zero-length run"));
        }
        row_len += run;
        if row_len > w {
            return Err(malformed(&format!("row {rows} overflows width {w}")));
        }
        out.extend(std::iter::repeat_n(color, run));
    }

    if pos != data.len() {
        return Err(malformed("trailing bytes after last row"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(w: usize, h: usize) -> Rect {
        Rect { x: 0, y: 0, w, h }
    }

    #[test]
    fn every_row_ends_with_line_marker() {
        let indexed = vec![1u8; 12];
        let buf = encode_rle(&indexed, 4, rect(4, 3));
        // 4 pixels of color 1 -> 00 83 01? No: run of 4 -> `00 84 01`.
        assert_eq!(&buf[..], &[0, 0x84, 1, 0, 0, 0, 0x84, 1, 0, 0, 0, 0x84, 1, 0, 0]);
    }

    #[test]
    fn short_opaque_runs_stay_literal() {
        // Runs of 1 and 2 cost fewer bytes as raw color bytes.
        let indexed = [1u8, 2, 2, 3, 3, 3];
        let buf = encode_rle(&indexed, 6, rect(6, 1));
        assert_eq!(&buf[..], &[1, 2, 2, 0, 0x83, 3, 0, 0]);
    }

    #[test]
    fn transparent_runs_use_zero_codes() {
        let mut indexed = vec![0u8; 100];
        indexed[40] = 7;
        let buf = encode_rle(&indexed, 100, rect(100, 1));
        // 40 transparent, color 7, 59 transparent.
        assert_eq!(&buf[..], &[0, 40, 7, 0, 59, 0, 0]);
    }

    #[test]
    fn long_runs_use_extended_codes() {
        let indexed = vec![5u8; 500];
        let buf = encode_rle(&indexed, 500, rect(500, 1));
        assert_eq!(&buf[..], &[0, 0xC0 | 1, 0xF4, 5, 0, 0]);

        let transparent = vec![0u8; 500];
        let buf = encode_rle(&transparent, 500, rect(500, 1));
        assert_eq!(&buf[..], &[0, 0x40 | 1, 0xF4, 0, 0]);
    }

    #[test]
    fn oversized_run_is_split() {
        let indexed = vec![9u8; 20000];
        let buf = encode_rle(&indexed, 20000, rect(20000, 1));
        // 16383 + 3617
        assert_eq!(
            &buf[..],
            &[0, 0xC0 | 0x3F, 0xFF, 9, 0, 0xC0 | 0x0E, 0x21, 9, 0, 0]
        );
        assert_eq!(decode_rle(&buf, 20000, 1).unwrap(), indexed);
    }

    #[test]
    fn encodes_subrectangle_of_larger_frame() {
        // 6x4 frame, encode the 3x2 rect at (2,1).
        let mut indexed = vec![0u8; 24];
        for y in 1..3 {
            for x in 2..5 {
                indexed[y * 6 + x] = 4;
            }
        }
        let buf = encode_rle(&indexed, 6, Rect { x: 2, y: 1, w: 3, h: 2 });
        assert_eq!(&buf[..], &[0, 0x83, 4, 0, 0, 0, 0x83, 4, 0, 0]);
    }

    #[test]
    fn round_trip_mixed_content() {
        let mut indexed = vec![0u8; 64 * 8];
        for (i, px) in indexed.iter_mut().enumerate() {
            *px = match i % 7 {
                0 | 1 => 0,
                2..=4 => 3,
                _ => (i % 5) as u8 + 1,
            };
        }
        let buf = encode_rle(&indexed, 64, rect(64, 8));
        assert_eq!(decode_rle(&buf, 64, 8).unwrap(), indexed);
    }

    #[test]
    fn decoder_rejects_bad_streams() {
        assert!(decode_rle(&[0, 0x84, 1], 4, 1).is_err()); // truncated
        assert!(decode_rle(&[1, 1, 0, 0], 4, 1).is_err()); // short row
        assert!(decode_rle(&[0, 0x85, 1, 0, 0], 4, 1).is_err()); // overflow
        assert!(decode_rle(&[0, 0x84, 1, 0, 0, 9], 4, 1).is_err()); // trailing
    }
}
