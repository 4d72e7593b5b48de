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

//! Test Fixture Generator
//!
//! Generates a deterministic raw RGBA frame sequence for exercising the
//! converter by hand. The pattern is identical on every platform (no
//! randomness).
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin generate_fixture
//! bdnconv --width 320 --height 180 -f 25 -o out.sup tests/fixtures/frames_320x180.rgba
//! ```
//!
//! # Generated Files
//!
//! - `tests/fixtures/frames_320x180.rgba` (50 frames, 11,520,000 bytes)
//!   - frames 0-9: fully transparent (leading gap)
//!   - frames 10-29: a white bottom caption with a colored border
//!   - frames 30-34: fully transparent (event separator)
//!   - frames 35-49: two separated caption lines, exercising the
//!     two-object split path

fn push_caption(frame: &mut [u8], width: usize, x0: usize, y0: usize, w: usize, h: usize) {
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let border = y == y0 || y == y0 + h - 1 || x == x0 || x == x0 + w - 1;
            let px = if border { [20, 20, 160, 255] } else { [255, 255, 255, 255] };
            let o = (y * width + x) * 4;
            frame[o..o + 4].copy_from_slice(&px);
        }
    }
}

fn main() {
    const W: usize = 320;
    const H: usize = 180;
    let empty = vec![0u8; W * H * 4];

    let mut single = empty.clone();
    push_caption(&mut single, W, 60, 150, 200, 24);

    let mut double = empty.clone();
    push_caption(&mut double, W, 40, 20, 240, 20);
    push_caption(&mut double, W, 80, 150, 160, 24);

    let mut stream = Vec::with_capacity(W * H * 4 * 50);
    for frame_index in 0..50 {
        let frame = match frame_index {
            10..=29 => &single,
            35..=49 => &double,
            _ => &empty,
        };
        stream.extend_from_slice(frame);
    }

    std::fs::create_dir_all("tests/fixtures").unwrap();
    std::fs::write("tests/fixtures/frames_320x180.rgba", &stream).unwrap();
    println!(
        "Generated tests/fixtures/frames_320x180.rgba ({} bytes)",
        stream.len()
    );
}
