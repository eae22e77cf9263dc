#![allow(unsafe_code)]
//! Sobel gradients and edge-mask binarization.

use crate::image::ImageView;
use multiversion::multiversion;
use rayon::prelude::*;

/// Compute the Sobel magnitude `|gx| + |gy|` for every pixel.
///
/// Sobel kernels:
/// - Gx: `[-1 0 1; -2 0 2; -1 0 1]`
/// - Gy: `[-1 -2 -1; 0 0 0; 1 2 1]`
///
/// Border pixels use clamped neighbours. The output is packed
/// (`img.width * img.height`); the largest possible value is 2040.
#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
pub fn sobel_magnitude(img: &ImageView, output: &mut [u16]) {
    let w = img.width;
    let h = img.height;

    output.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let r0 = img.get_row(y.saturating_sub(1));
        let r1 = img.get_row(y);
        let r2 = img.get_row((y + 1).min(h - 1));

        for (x, d) in dst.iter_mut().enumerate() {
            let xl = x.saturating_sub(1);
            let xr = (x + 1).min(w - 1);

            let p00 = i32::from(r0[xl]);
            let p01 = i32::from(r0[x]);
            let p02 = i32::from(r0[xr]);
            let p10 = i32::from(r1[xl]);
            let p12 = i32::from(r1[xr]);
            let p20 = i32::from(r2[xl]);
            let p21 = i32::from(r2[x]);
            let p22 = i32::from(r2[xr]);

            let gx = -p00 + p02 - 2 * p10 + 2 * p12 - p20 + p22;
            let gy = -p00 - 2 * p01 - p02 + p20 + 2 * p21 + p22;
            *d = (gx.unsigned_abs() + gy.unsigned_abs()) as u16;
        }
    });
}

/// Binarize a gradient magnitude map: `255` where `mag >= threshold`, else `0`.
pub fn edge_mask(magnitude: &[u16], threshold: u16, output: &mut [u8]) {
    output
        .par_iter_mut()
        .zip(magnitude.par_iter())
        .for_each(|(dst, &mag)| *dst = if mag >= threshold { 255 } else { 0 });
}
