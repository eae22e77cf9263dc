#![allow(unsafe_code)]
//! Smoothing and binary morphology used before contour extraction.
//!
//! The blur suppresses sensor noise and print texture so the Sobel stage
//! responds to the card border; the closing reconnects border edges broken
//! by glare or low contrast.

use crate::image::ImageView;
use bumpalo::Bump;
use multiversion::multiversion;
use rayon::prelude::*;

/// Apply one pass of the separable 3x3 Gaussian kernel `[1 2 1] / 4` in each direction.
///
/// # Parameters
/// - `img`: Input grayscale image
/// - `output`: Output buffer (`img.width * img.height`, packed)
///
/// Borders are handled by clamping to the nearest valid pixel.
#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
pub fn gaussian_blur_3x3(arena: &Bump, img: &ImageView, output: &mut [u8]) {
    let w = img.width;
    let h = img.height;
    let temp = arena.alloc_slice_fill_copy(w * h, 0u16);

    // Pass 1: Horizontal
    temp.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let src = img.get_row(y);
        for x in 0..w {
            let l = u16::from(src[x.saturating_sub(1)]);
            let c = u16::from(src[x]);
            let r = u16::from(src[(x + 1).min(w - 1)]);
            dst[x] = l + 2 * c + r;
        }
    });

    // Pass 2: Vertical
    let temp = &*temp;
    output.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let up = &temp[y.saturating_sub(1) * w..][..w];
        let mid = &temp[y * w..][..w];
        let down = &temp[(y + 1).min(h - 1) * w..][..w];
        for x in 0..w {
            let sum = u32::from(up[x]) + 2 * u32::from(mid[x]) + u32::from(down[x]);
            dst[x] = ((sum + 8) >> 4) as u8;
        }
    });
}

/// Blur `passes` times, returning a packed buffer allocated in the arena.
pub fn gaussian_blur<'a>(arena: &'a Bump, img: &ImageView, passes: usize) -> &'a [u8] {
    let w = img.width;
    let h = img.height;
    let out = arena.alloc_slice_fill_copy(w * h, 0u8);
    if passes == 0 {
        for (y, dst) in out.chunks_exact_mut(w).enumerate() {
            dst.copy_from_slice(img.get_row(y));
        }
        return out;
    }

    gaussian_blur_3x3(arena, img, out);
    let scratch = arena.alloc_slice_fill_copy(w * h, 0u8);
    for _ in 1..passes {
        scratch.copy_from_slice(out);
        let view = ImageView {
            data: scratch,
            width: w,
            height: h,
            stride: w,
        };
        gaussian_blur_3x3(arena, &view, out);
    }
    out
}

/// Binary dilation with a `(2r+1) x (2r+1)` square structuring element.
///
/// Any nonzero pixel is foreground; the output is `0` or `255`.
pub fn dilate(
    arena: &Bump,
    mask: &[u8],
    width: usize,
    height: usize,
    radius: usize,
    output: &mut [u8],
) {
    morph(arena, mask, width, height, radius, output, true);
}

/// Binary erosion with a `(2r+1) x (2r+1)` square structuring element.
///
/// Pixels outside the image count as foreground, so shapes touching the
/// border are not eaten away from that side.
pub fn erode(
    arena: &Bump,
    mask: &[u8],
    width: usize,
    height: usize,
    radius: usize,
    output: &mut [u8],
) {
    morph(arena, mask, width, height, radius, output, false);
}

/// Morphological closing (dilate, then erode) returning a new arena buffer.
pub fn close<'a>(
    arena: &'a Bump,
    mask: &[u8],
    width: usize,
    height: usize,
    radius: usize,
) -> &'a [u8] {
    let dilated = arena.alloc_slice_fill_copy(width * height, 0u8);
    dilate(arena, mask, width, height, radius, dilated);
    let closed = arena.alloc_slice_fill_copy(width * height, 0u8);
    erode(arena, dilated, width, height, radius, closed);
    closed
}

/// Separable square max/min filter over a binary mask.
fn morph(
    arena: &Bump,
    mask: &[u8],
    width: usize,
    height: usize,
    radius: usize,
    output: &mut [u8],
    is_dilate: bool,
) {
    if radius == 0 {
        for (dst, &src) in output.iter_mut().zip(mask) {
            *dst = if src > 0 { 255 } else { 0 };
        }
        return;
    }

    // Windows are clipped to the image, which treats outside pixels as
    // background for dilation and foreground for erosion.
    let temp = arena.alloc_slice_fill_copy(width * height, 0u8);

    temp.par_chunks_mut(width).enumerate().for_each(|(y, dst)| {
        let src = &mask[y * width..][..width];
        for (x, d) in dst.iter_mut().enumerate() {
            let window = &src[x.saturating_sub(radius)..=(x + radius).min(width - 1)];
            let value = if is_dilate {
                window.iter().any(|&v| v > 0)
            } else {
                window.iter().all(|&v| v > 0)
            };
            *d = u8::from(value);
        }
    });

    let temp = &*temp;
    output.par_chunks_mut(width).enumerate().for_each(|(y, dst)| {
        let y0 = y.saturating_sub(radius);
        let y1 = (y + radius).min(height - 1);
        for (x, d) in dst.iter_mut().enumerate() {
            let mut acc = !is_dilate;
            for yy in y0..=y1 {
                let v = temp[yy * width + x] > 0;
                if is_dilate {
                    acc |= v;
                } else {
                    acc &= v;
                }
            }
            *d = if acc { 255 } else { 0 };
        }
    });
}
