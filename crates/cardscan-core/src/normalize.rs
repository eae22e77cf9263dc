//! Perspective normalization of a located card into a fixed canonical rectangle.

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::homography::Homography;
use crate::image::{Frame, luma};
use crate::quad::{Point, Quadrilateral};
use rayon::prelude::*;

/// Fixed-size, upright RGB card image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalImage {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl CanonicalImage {
    /// Wrap an RGB buffer of `width * height * 3` bytes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFrame`] if the dimensions are empty or the buffer size is wrong.
    pub fn from_rgb(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height * 3 {
            return Err(Error::InvalidFrame(format!(
                "canonical image buffer ({}) does not match {width}x{height}x3",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Interleaved RGB data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image and return its RGB buffer.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Packed grayscale copy (BT.601 luma).
    #[must_use]
    pub fn to_gray(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| luma(px[0], px[1], px[2]))
            .collect()
    }

    /// The same image turned upside down.
    #[must_use]
    pub fn rotate_180(&self) -> Self {
        let data = self
            .data
            .chunks_exact(3)
            .rev()
            .flatten()
            .copied()
            .collect();
        Self {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// Rotate the corner order by one position if the quad is wider than tall,
/// so the top edge of the output is always a short side.
#[must_use]
pub fn to_portrait(quad: &Quadrilateral) -> Quadrilateral {
    let s = quad.side_lengths();
    let horizontal = (s[0] + s[2]) * 0.5;
    let vertical = (s[1] + s[3]) * 0.5;
    if horizontal > vertical {
        let c = quad.corners;
        Quadrilateral {
            corners: [c[1], c[2], c[3], c[0]],
        }
    } else {
        *quad
    }
}

/// Warp the quad region of `frame` into a canonical image.
///
/// Corners are re-ordered (TL, TR, BR, BL) and turned portrait before
/// warping. Each canonical pixel center is mapped through the homography
/// and sampled bilinearly with edge clamping.
///
/// # Errors
/// Returns [`Error::DegenerateGeometry`] if the quad area is below
/// `min_warp_area` or no homography exists.
pub fn normalize(
    frame: &Frame,
    quad: &Quadrilateral,
    config: &PipelineConfig,
) -> Result<CanonicalImage> {
    let ordered = to_portrait(&Quadrilateral::from_unordered(quad.corners));
    let area = ordered.area();
    if area.is_nan() || area < config.min_warp_area {
        return Err(Error::DegenerateGeometry);
    }
    warp(frame, &ordered, config.canonical_width, config.canonical_height)
}

/// Treat the whole frame as the card (clean reference scans).
///
/// # Errors
/// Returns [`Error::DegenerateGeometry`] for frames too small to warp.
pub fn normalize_full_frame(frame: &Frame, config: &PipelineConfig) -> Result<CanonicalImage> {
    let quad = Quadrilateral::full_frame(frame.width(), frame.height());
    if quad.area() < config.min_warp_area {
        return Err(Error::DegenerateGeometry);
    }
    warp(frame, &quad, config.canonical_width, config.canonical_height)
}

fn warp(
    frame: &Frame,
    quad: &Quadrilateral,
    width: usize,
    height: usize,
) -> Result<CanonicalImage> {
    if width == 0 || height == 0 {
        return Err(Error::DegenerateGeometry);
    }
    let (w, h) = (width as f64, height as f64);
    let src = [
        Point::new(0.0, 0.0),
        Point::new(w, 0.0),
        Point::new(w, h),
        Point::new(0.0, h),
    ];
    let homography = Homography::from_pairs(&src, &quad.corners).ok_or(Error::DegenerateGeometry)?;

    let mut data = vec![0u8; width * height * 3];
    data.par_chunks_mut(width * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(3).enumerate() {
                let p = homography.project(Point::new(x as f64 + 0.5, y as f64 + 0.5));
                let rgb = frame.sample_bilinear(p.x, p.y);
                for (dst, v) in px.iter_mut().zip(rgb) {
                    *dst = (v + 0.5).clamp(0.0, 255.0) as u8;
                }
            }
        });

    CanonicalImage::from_rgb(width, height, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(w: usize, h: usize) -> Frame {
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[(x * 255 / (w - 1)) as u8, (y * 255 / (h - 1)) as u8, 77]);
            }
        }
        Frame::new(data, w, h, 3).unwrap()
    }

    #[test]
    fn test_full_frame_identity() {
        let frame = gradient_frame(50, 70);
        let config = PipelineConfig::builder().canonical_size(50, 70).build();
        let canonical = normalize_full_frame(&frame, &config).unwrap();
        assert_eq!(canonical.data(), frame.data());
    }

    #[test]
    fn test_rotate_180_twice_is_identity() {
        let frame = gradient_frame(10, 14);
        let config = PipelineConfig::builder().canonical_size(10, 14).build();
        let canonical = normalize_full_frame(&frame, &config).unwrap();
        let rotated = canonical.rotate_180();
        assert_ne!(rotated, canonical);
        assert_eq!(&rotated.data()[..3], &canonical.data()[canonical.data().len() - 3..]);
        assert_eq!(rotated.rotate_180(), canonical);
    }

    #[test]
    fn test_landscape_quad_is_turned_portrait() {
        let landscape = Quadrilateral {
            corners: [
                Point::new(0.0, 0.0),
                Point::new(350.0, 0.0),
                Point::new(350.0, 250.0),
                Point::new(0.0, 250.0),
            ],
        };
        let portrait = to_portrait(&landscape);
        assert_eq!(portrait.corners[0], Point::new(350.0, 0.0));
        let s = portrait.side_lengths();
        assert!(s[0] < s[1]);
    }

    #[test]
    fn test_corner_order_does_not_matter() {
        let frame = gradient_frame(64, 64);
        let config = PipelineConfig::builder().canonical_size(20, 28).build();
        let q = Quadrilateral {
            corners: [
                Point::new(10.0, 8.0),
                Point::new(40.0, 9.0),
                Point::new(41.0, 50.0),
                Point::new(9.0, 49.0),
            ],
        };
        let c = q.corners;
        let shuffled = Quadrilateral {
            corners: [c[2], c[0], c[3], c[1]],
        };
        assert_eq!(
            normalize(&frame, &q, &config).unwrap(),
            normalize(&frame, &shuffled, &config).unwrap()
        );
    }

    #[test]
    fn test_degenerate_quads() {
        let frame = gradient_frame(32, 32);
        let config = PipelineConfig::default();
        let tiny = Quadrilateral {
            corners: [
                Point::new(5.0, 5.0),
                Point::new(7.0, 5.0),
                Point::new(7.0, 7.0),
                Point::new(5.0, 7.0),
            ],
        };
        assert!(matches!(
            normalize(&frame, &tiny, &config),
            Err(Error::DegenerateGeometry)
        ));

        let collapsed = Quadrilateral {
            corners: [Point::new(3.0, 3.0); 4],
        };
        assert!(matches!(
            normalize(&frame, &collapsed, &config),
            Err(Error::DegenerateGeometry)
        ));

        let nan = Quadrilateral {
            corners: [Point::new(f64::NAN, 0.0); 4],
        };
        assert!(matches!(
            normalize(&frame, &nan, &config),
            Err(Error::DegenerateGeometry)
        ));
    }
}
