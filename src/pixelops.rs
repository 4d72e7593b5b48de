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

//! Whole-frame RGBA primitives used by the segmenter.
//!
//! Four operations over packed RGBA8 buffers:
//!
//! - **emptiness**: is every alpha byte zero?
//! - **identity**: are two frames byte-equal once transparent pixels of the
//!   newer frame are normalized to all-zero?
//! - **transparent zeroing**: rewrite every alpha==0 pixel to `00 00 00 00`
//! - **channel swap**: BGRA to RGBA reordering
//!
//! Transparent pixels may carry arbitrary RGB from the renderer. Left alone
//! they would defeat frame deduplication and waste palette entries, so every
//! frame that becomes a comparison reference is normalized first.
//!
//! Implementations are selected once at startup behind the [`PixelOps`]
//! trait: a portable scalar variant, and an SSE2 variant on x86_64 using
//! unaligned 16-byte loads with a scalar tail (no special buffer alignment
//! required).

/// Capability set over packed RGBA frame buffers.
///
/// Buffers must hold a whole number of 4-byte pixels; a trailing partial
/// pixel is ignored.
pub trait PixelOps: Sync {
    /// True iff every pixel has alpha 0.
    fn is_empty(&self, img: &[u8]) -> bool;

    /// Byte-compares `img` against `prev`, normalizing `img` on the way.
    ///
    /// Every alpha==0 pixel of `img` is rewritten to all-zero before it is
    /// compared. The normalization is a deliberate side effect: `img` may be
    /// kept as the next comparison reference without a second pass. On an
    /// early mismatch the remainder of `img` is left un-normalized; callers
    /// that keep such a frame must call [`PixelOps::zero_transparent`].
    fn is_identical(&self, img: &mut [u8], prev: &[u8]) -> bool;

    /// Rewrites every alpha==0 pixel to `00 00 00 00` in place.
    fn zero_transparent(&self, img: &mut [u8]);

    /// Copies `src` to `dst`, exchanging the R and B channels of each pixel.
    fn swap_rb(&self, src: &[u8], dst: &mut [u8]);

    /// Human-readable variant name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Portable implementation, four bytes at a time.
pub struct ScalarOps;

impl PixelOps for ScalarOps {
    fn is_empty(&self, img: &[u8]) -> bool {
        img.chunks_exact(4).all(|px| px[3] == 0)
    }

    fn is_identical(&self, img: &mut [u8], prev: &[u8]) -> bool {
        debug_assert!(prev.len() >= img.len() - img.len() % 4);
        for (px, old) in img.chunks_exact_mut(4).zip(prev.chunks_exact(4)) {
            if px[3] == 0 {
                px.copy_from_slice(&[0, 0, 0, 0]);
            }
            if px != old {
                return false;
            }
        }
        true
    }

    fn zero_transparent(&self, img: &mut [u8]) {
        for px in img.chunks_exact_mut(4) {
            if px[3] == 0 {
                px.copy_from_slice(&[0, 0, 0, 0]);
            }
        }
    }

    fn swap_rb(&self, src: &[u8], dst: &mut [u8]) {
        for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
            d[0] = s[2];
            d[1] = s[1];
            d[2] = s[0];
            d[3] = s[3];
        }
    }

    fn name(&self) -> &'static str {
        "scalar"
    }
}

/// SSE2 implementation, four pixels per step.
#[cfg(target_arch = "x86_64")]
pub struct Sse2Ops;

#[cfg(target_arch = "x86_64")]
mod sse2 {
    use std::arch::x86_64::{
        __m128i, _mm_and_si128, _mm_andnot_si128, _mm_cmpeq_epi32, _mm_cmpeq_epi8,
        _mm_loadu_si128, _mm_movemask_epi8, _mm_or_si128, _mm_set1_epi32, _mm_setzero_si128,
        _mm_slli_epi32, _mm_srli_epi32, _mm_storeu_si128,
    };

    const ALPHA_MASK: i32 = 0xFF00_0000_u32 as i32;

    #[target_feature(enable = "sse2")]
    pub unsafe fn is_empty(img: &[u8]) -> bool {
        let alpha = _mm_set1_epi32(ALPHA_MASK);
        let mut acc = _mm_setzero_si128();
        let chunks = img.chunks_exact(16);
        let tail = chunks.remainder();
        for chunk in chunks {
            let v = _mm_loadu_si128(chunk.as_ptr() as *const __m128i);
            acc = _mm_or_si128(acc, _mm_and_si128(v, alpha));
        }
        let zero = _mm_cmpeq_epi8(acc, _mm_setzero_si128());
        if _mm_movemask_epi8(zero) != 0xFFFF {
            return false;
        }
        tail.chunks_exact(4).all(|px| px[3] == 0)
    }

    /// Zeroes transparent pixels of one 16-byte lane and returns the result.
    #[inline]
    #[target_feature(enable = "sse2")]
    unsafe fn normalize_lane(v: __m128i) -> __m128i {
        let alpha = _mm_and_si128(v, _mm_set1_epi32(ALPHA_MASK));
        let transparent = _mm_cmpeq_epi32(alpha, _mm_setzero_si128());
        _mm_andnot_si128(transparent, v)
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn is_identical(img: &mut [u8], prev: &[u8]) -> bool {
        let len = img.len() - img.len() % 16;
        let mut i = 0;
        while i < len {
            let v = normalize_lane(_mm_loadu_si128(img.as_ptr().add(i) as *const __m128i));
            _mm_storeu_si128(img.as_mut_ptr().add(i) as *mut __m128i, v);
            let old = _mm_loadu_si128(prev.as_ptr().add(i) as *const __m128i);
            if _mm_movemask_epi8(_mm_cmpeq_epi8(v, old)) != 0xFFFF {
                return false;
            }
            i += 16;
        }
        for (px, old) in img[len..].chunks_exact_mut(4).zip(prev[len..].chunks_exact(4)) {
            if px[3] == 0 {
                px.copy_from_slice(&[0, 0, 0, 0]);
            }
            if px != old {
                return false;
            }
        }
        true
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn zero_transparent(img: &mut [u8]) {
        let len = img.len() - img.len() % 16;
        let mut i = 0;
        while i < len {
            let v = normalize_lane(_mm_loadu_si128(img.as_ptr().add(i) as *const __m128i));
            _mm_storeu_si128(img.as_mut_ptr().add(i) as *mut __m128i, v);
            i += 16;
        }
        for px in img[len..].chunks_exact_mut(4) {
            if px[3] == 0 {
                px.copy_from_slice(&[0, 0, 0, 0]);
            }
        }
    }

    #[target_feature(enable = "sse2")]
    pub unsafe fn swap_rb(src: &[u8], dst: &mut [u8]) {
        // RGBA pixel as little-endian u32: A<<24 | B<<16 | G<<8 | R.
        // Keep G and A, exchange the R and B bytes via shifts.
        let keep = _mm_set1_epi32(0xFF00_FF00_u32 as i32);
        let low = _mm_set1_epi32(0x0000_00FF);
        let len = src.len().min(dst.len());
        let lanes = len - len % 16;
        let mut i = 0;
        while i < lanes {
            let v = _mm_loadu_si128(src.as_ptr().add(i) as *const __m128i);
            let ga = _mm_and_si128(v, keep);
            let r_to_b = _mm_slli_epi32::<16>(_mm_and_si128(v, low));
            let b_to_r = _mm_and_si128(_mm_srli_epi32::<16>(v), low);
            let out = _mm_or_si128(ga, _mm_or_si128(r_to_b, b_to_r));
            _mm_storeu_si128(dst.as_mut_ptr().add(i) as *mut __m128i, out);
            i += 16;
        }
        for (s, d) in src[lanes..len]
            .chunks_exact(4)
            .zip(dst[lanes..len].chunks_exact_mut(4))
        {
            d[0] = s[2];
            d[1] = s[1];
            d[2] = s[0];
            d[3] = s[3];
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl PixelOps for Sse2Ops {
    fn is_empty(&self, img: &[u8]) -> bool {
        unsafe { sse2::is_empty(img) }
    }

    fn is_identical(&self, img: &mut [u8], prev: &[u8]) -> bool {
        debug_assert!(prev.len() >= img.len() - img.len() % 4);
        unsafe { sse2::is_identical(img, prev) }
    }

    fn zero_transparent(&self, img: &mut [u8]) {
        unsafe { sse2::zero_transparent(img) }
    }

    fn swap_rb(&self, src: &[u8], dst: &mut [u8]) {
        unsafe { sse2::swap_rb(src, dst) }
    }

    fn name(&self) -> &'static str {
        "sse2"
    }
}

/// Selects the fastest available implementation, once per process.
///
/// The choice is reported on stderr the first time, mirroring the CPU
/// detection note the scalar fallback carries in §7 of the manual: missing
/// SSE2 is a warning, never an error.
pub fn detect() -> &'static dyn PixelOps {
    use std::sync::OnceLock;
    static SELECTED: OnceLock<&'static dyn PixelOps> = OnceLock::new();
    *SELECTED.get_or_init(|| {
        #[cfg(target_arch = "x86_64")]
        {
            if std::arch::is_x86_feature_detected!("sse2") {
                eprintln!("CPU: Using SSE2 optimized functions.");
                return &Sse2Ops;
            }
        }
        eprintln!("CPU: Using scalar functions.");
        &ScalarOps
    })
}
