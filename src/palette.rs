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

//! RGBA palettization for PGS and palette-PNG output.
//!
//! A subtitle frame is reduced to at most 255 visible colors plus the
//! reserved fully-transparent index 0. Colors are assigned indices in
//! first-encounter order; when a frame carries more than 255 distinct
//! visible colors it is quantized with a deterministic median cut down to
//! exactly 255 representatives. Determinism matters: the same input frame
//! must produce byte-identical palettes on every run so that frame
//! deduplication and golden tests hold.
//!
//! The palette keeps source RGBA (the PNG path needs it verbatim); the PDS
//! writer converts entries to BT.601 full-range YCrCb through
//! [`Palette::ycbcr`]. All conversion math is x1000 fixed-point with
//! round-half-away-from-zero, no floats.

use std::collections::HashMap;

/// Visible palette entries, excluding the reserved transparent index 0.
pub const MAX_VISIBLE_COLORS: usize = 255;

/// One palette entry in PGS color space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YcbcrA {
    pub y: u8,
    pub cr: u8,
    pub cb: u8,
    pub a: u8,
}

/// An ordered RGBA palette with transparent index 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: Vec<[u8; 4]>,
}

impl Palette {
    /// Number of entries including index 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        // Index 0 always exists; "empty" means no visible colors.
        self.entries.len() <= 1
    }

    /// RGBA of an entry. Index 0 is all-zero.
    #[must_use]
    pub fn rgba(&self, index: u8) -> [u8; 4] {
        self.entries[index as usize]
    }

    /// All entries in index order, starting at the transparent entry 0.
    #[must_use]
    pub fn rgba_entries(&self) -> &[[u8; 4]] {
        &self.entries
    }

    /// Entry converted to BT.601 full-range YCrCb plus alpha.
    #[must_use]
    pub fn ycbcr(&self, index: u8) -> YcbcrA {
        let [r, g, b, a] = self.entries[index as usize];
        if a == 0 {
            return YcbcrA { y: 0, cr: 0, cb: 0, a: 0 };
        }
        let (y, cr, cb) = rgb_to_ycbcr(r, g, b);
        YcbcrA { y, cr, cb, a }
    }
}

/// Rounds `v / 1000` half away from zero.
#[inline]
fn div_round_1000(v: i32) -> i32 {
    if v >= 0 {
        (v + 500) / 1000
    } else {
        (v - 500) / 1000
    }
}

/// BT.601 full-range RGB to YCrCb, x1000 integer coefficients.
#[must_use]
pub fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));
    let y = div_round_1000(299 * r + 587 * g + 114 * b);
    let cb = 128 + div_round_1000(-169 * r - 331 * g + 500 * b);
    let cr = 128 + div_round_1000(500 * r - 419 * g - 81 * b);
    (
        y.clamp(0, 255) as u8,
        cr.clamp(0, 255) as u8,
        cb.clamp(0, 255) as u8,
    )
}

#[inline]
fn key(px: &[u8]) -> u32 {
    u32::from_ne_bytes([px[0], px[1], px[2], px[3]])
}

/// Reduces an RGBA image to a palette and an index-per-pixel buffer.
///
/// Transparent pixels (alpha 0) map to index 0 regardless of their RGB
/// bytes; callers normally zero them beforehand so the reverse mapping is
/// exact. Visible colors are indexed in first-encounter order. More than
/// 255 distinct visible colors triggers [`median cut`](quantize) reduction
/// to exactly 255 representatives.
#[must_use]
pub fn palettize(img: &[u8], width: usize, height: usize) -> (Palette, Vec<u8>) {
    let mut entries: Vec<[u8; 4]> = vec![[0, 0, 0, 0]];
    let mut lookup: HashMap<u32, u8> = HashMap::new();
    let mut indexed = vec![0u8; width * height];
    let mut overflow = false;

    for (i, px) in img.chunks_exact(4).take(width * height).enumerate() {
        if px[3] == 0 {
            continue;
        }
        let k = key(px);
        match lookup.get(&k) {
            Some(&idx) => indexed[i] = idx,
            None => {
                if entries.len() > MAX_VISIBLE_COLORS {
                    overflow = true;
                    break;
                }
                let idx = entries.len() as u8;
                entries.push([px[0], px[1], px[2], px[3]]);
                lookup.insert(k, idx);
                indexed[i] = idx;
            }
        }
    }

    if !overflow {
        return (Palette { entries }, indexed);
    }

    #[cfg(feature = "debug-logging")]
    log::info!("palettize: more than {MAX_VISIBLE_COLORS} colors, quantizing");
    quantize(img, width, height)
}

/// Median-cut quantization to exactly [`MAX_VISIBLE_COLORS`] entries.
///
/// Unique colors are gathered with their populations, sorted, and split
/// into boxes along each box's widest channel until 255 boxes exist. Each
/// box collapses to its population-weighted mean color. Sorting first makes
/// the result independent of pixel order.
fn quantize(img: &[u8], width: usize, height: usize) -> (Palette, Vec<u8>) {
    let mut counts: HashMap<u32, u32> = HashMap::new();
    for px in img.chunks_exact(4).take(width * height) {
        if px[3] != 0 {
            *counts.entry(key(px)).or_insert(0) += 1;
        }
    }
    let mut uniques: Vec<([u8; 4], u32)> = counts
        .iter()
        .map(|(&k, &n)| (k.to_ne_bytes(), n))
        .collect();
    uniques.sort_unstable();

    // Boxes are index ranges over `uniques`.
    let mut boxes: Vec<(usize, usize)> = vec![(0, uniques.len())];
    while boxes.len() < MAX_VISIBLE_COLORS {
        // Widest channel range wins; first box wins ties.
        let mut best: Option<(usize, usize, u8)> = None; // (box, channel, range)
        for (bi, &(lo, hi)) in boxes.iter().enumerate() {
            if hi - lo < 2 {
                continue;
            }
            for ch in 0..4 {
                let mut min = u8::MAX;
                let mut max = u8::MIN;
                for (c, _) in &uniques[lo..hi] {
                    min = min.min(c[ch]);
                    max = max.max(c[ch]);
                }
                let range = max - min;
                if best.is_none_or(|(_, _, r)| range > r) {
                    best = Some((bi, ch, range));
                }
            }
        }
        let Some((bi, ch, _)) = best else { break };
        let (lo, hi) = boxes[bi];
        uniques[lo..hi].sort_unstable_by_key(|(c, _)| (c[ch], *c));
        let mid = lo + (hi - lo) / 2;
        boxes[bi] = (lo, mid);
        boxes.push((mid, hi));
    }
    boxes.sort_unstable();

    let mut entries: Vec<[u8; 4]> = vec![[0, 0, 0, 0]];
    let mut lookup: HashMap<u32, u8> = HashMap::new();
    for &(lo, hi) in &boxes {
        let members = &uniques[lo..hi];
        let total: u64 = members.iter().map(|&(_, n)| u64::from(n)).sum();
        let mut sums = [0u64; 4];
        for (c, n) in members {
            for ch in 0..4 {
                sums[ch] += u64::from(c[ch]) * u64::from(*n);
            }
        }
        let rep = [
            ((sums[0] + total / 2) / total) as u8,
            ((sums[1] + total / 2) / total) as u8,
            ((sums[2] + total / 2) / total) as u8,
            ((sums[3] + total / 2) / total) as u8,
        ];
        let idx = entries.len() as u8;
        entries.push(rep);
        for (c, _) in members {
            lookup.insert(u32::from_ne_bytes(*c), idx);
        }
    }

    let mut indexed = vec![0u8; width * height];
    for (i, px) in img.chunks_exact(4).take(width * height).enumerate() {
        if px[3] != 0 {
            indexed[i] = lookup[&key(px)];
        }
    }
    (Palette { entries }, indexed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_zero_is_reserved_transparent() {
        let img = [[0u8, 0, 0, 0], [10, 20, 30, 255]].concat();
        let (pal, indexed) = palettize(&img, 2, 1);
        assert_eq!(pal.rgba(0), [0, 0, 0, 0]);
        assert_eq!(indexed, vec![0, 1]);
        assert_eq!(pal.rgba(1), [10, 20, 30, 255]);
    }

    #[test]
    fn first_encounter_order_is_stable() {
        let img = [
            [5u8, 5, 5, 255],
            [9, 9, 9, 255],
            [5, 5, 5, 255],
            [1, 1, 1, 128],
        ]
        .concat();
        let (pal, indexed) = palettize(&img, 4, 1);
        assert_eq!(indexed, vec![1, 2, 1, 3]);
        assert_eq!(pal.len(), 4);
        let (pal2, indexed2) = palettize(&img, 4, 1);
        assert_eq!(pal.rgba_entries(), pal2.rgba_entries());
        assert_eq!(indexed, indexed2);
    }

    #[test]
    fn transparent_rgb_bytes_do_not_allocate_entries() {
        let img = [[77u8, 66, 55, 0], [1, 2, 3, 255]].concat();
        let (pal, indexed) = palettize(&img, 2, 1);
        assert_eq!(pal.len(), 2);
        assert_eq!(indexed, vec![0, 1]);
    }

    #[test]
    fn overflow_quantizes_to_exactly_255_colors() {
        // 16x64 = 1024 pixels, 512 distinct visible colors, each twice.
        let mut img = Vec::with_capacity(16 * 64 * 4);
        for i in 0..1024u32 {
            let c = i % 512;
            img.extend_from_slice(&[(c % 256) as u8, (c / 256) as u8, 77, 255]);
        }
        let (pal, indexed) = palettize(&img, 16, 64);
        assert_eq!(pal.len(), 256);
        assert!(indexed.iter().all(|&i| i != 0));

        // Deterministic across invocations.
        let (pal2, indexed2) = palettize(&img, 16, 64);
        assert_eq!(pal.rgba_entries(), pal2.rgba_entries());
        assert_eq!(indexed, indexed2);
    }

    #[test]
    fn quantized_representative_is_close() {
        // A near-solid frame with >255 slightly differing reds still maps
        // every pixel to a red-ish representative.
        let mut img = Vec::new();
        for i in 0..300u32 {
            img.extend_from_slice(&[200 + (i % 40) as u8, (i % 8) as u8, 0, 255]);
        }
        let (pal, indexed) = palettize(&img, 300, 1);
        for &idx in &indexed {
            let [r, g, b, a] = pal.rgba(idx);
            assert!(r >= 190 && g < 20 && b == 0 && a == 255);
        }
    }

    #[test]
    fn ycbcr_conversion_fixed_points() {
        // Black, white, and pure red against hand-computed BT.601 values.
        assert_eq!(rgb_to_ycbcr(0, 0, 0), (0, 128, 128));
        assert_eq!(rgb_to_ycbcr(255, 255, 255), (255, 128, 128));
        // R=255: Y=76, Cr=128+round(127500/1000)=256->clamped 255, Cb=128-43
        assert_eq!(rgb_to_ycbcr(255, 0, 0), (76, 255, 85));
    }

    #[test]
    fn ycbcr_transparent_entry_is_all_zero() {
        let img = [[0u8, 0, 0, 0], [255, 255, 255, 255]].concat();
        let (pal, _) = palettize(&img, 2, 1);
        assert_eq!(pal.ycbcr(0), YcbcrA { y: 0, cr: 0, cb: 0, a: 0 });
        assert_eq!(pal.ycbcr(1), YcbcrA { y: 255, cr: 128, cb: 128, a: 255 });
    }
}
