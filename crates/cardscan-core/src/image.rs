//! Frame buffers and stride-aware grayscale views.

use crate::error::{Error, Result};

/// A single captured still image.
///
/// Pixels are interleaved row-major; color frames are RGB or RGBA.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: usize,
    height: usize,
    channels: usize,
}

impl Frame {
    /// Wrap a raw pixel buffer after validating its dimensions.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFrame`] for empty dimensions, unsupported
    /// channel counts, or a buffer whose length does not match.
    pub fn new(data: Vec<u8>, width: usize, height: usize, channels: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidFrame(format!(
                "empty frame ({width}x{height})"
            )));
        }
        if !matches!(channels, 1 | 3 | 4) {
            return Err(Error::InvalidFrame(format!(
                "unsupported channel count {channels}"
            )));
        }
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channels))
            .ok_or_else(|| Error::InvalidFrame("frame dimensions overflow".to_string()))?;
        if data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "buffer size ({}) does not match {width}x{height}x{channels} \
                 (required: {expected})",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
        })
    }

    /// Build an RGB frame filled with one color.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFrame`] for empty dimensions.
    pub fn filled(width: usize, height: usize, rgb: [u8; 3]) -> Result<Self> {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width.saturating_mul(height).saturating_mul(3))
            .collect();
        Self::new(data, width, height, 3)
    }

    /// Frame width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of interleaved channels (1, 3 or 4).
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Raw interleaved pixel data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the frame and return its buffer.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// RGB value at `(x, y)`. Grayscale frames replicate the single channel.
    #[inline]
    #[must_use]
    pub fn rgb(&self, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * self.width + x) * self.channels;
        if self.channels == 1 {
            let v = self.data[idx];
            [v, v, v]
        } else {
            [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
        }
    }

    /// Bilinear RGB sample at continuous pixel-center coordinates, clamped to the frame.
    #[must_use]
    pub fn sample_bilinear(&self, x: f64, y: f64) -> [f64; 3] {
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        #[allow(clippy::cast_sign_loss)]
        let (x0, y0) = (x.floor() as usize, y.floor() as usize);
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let p00 = self.rgb(x0, y0);
        let p10 = self.rgb(x1, y0);
        let p01 = self.rgb(x0, y1);
        let p11 = self.rgb(x1, y1);

        let mut out = [0.0; 3];
        for (c, v) in out.iter_mut().enumerate() {
            let top = f64::from(p00[c]) * (1.0 - fx) + f64::from(p10[c]) * fx;
            let bottom = f64::from(p01[c]) * (1.0 - fx) + f64::from(p11[c]) * fx;
            *v = top * (1.0 - fy) + bottom * fy;
        }
        out
    }

    /// Convert to a packed single-channel luma buffer (ITU-R BT.601, integer weights).
    #[must_use]
    pub fn to_gray(&self) -> Vec<u8> {
        match self.channels {
            1 => self.data.clone(),
            c => self
                .data
                .chunks_exact(c)
                .map(|px| luma(px[0], px[1], px[2]))
                .collect(),
        }
    }
}

/// Integer BT.601 luma: `(77 R + 150 G + 29 B) / 256`.
#[inline]
#[must_use]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * u32::from(r) + 150 * u32::from(g) + 29 * u32::from(b) + 128) >> 8) as u8
}

/// A view into a grayscale image buffer with explicit stride support.
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    /// Pixel data.
    pub data: &'a [u8],
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Distance in bytes between the starts of consecutive rows.
    pub stride: usize,
}

impl<'a> ImageView<'a> {
    /// Create a new `ImageView` after validating that the buffer size
    /// matches the dimensions and stride.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFrame`] if the stride is smaller than the width
    /// or the buffer is too small.
    pub fn new(data: &'a [u8], width: usize, height: usize, stride: usize) -> Result<Self> {
        if stride < width {
            return Err(Error::InvalidFrame(format!(
                "stride ({stride}) cannot be less than width ({width})"
            )));
        }
        let required_size = if height > 0 {
            (height - 1) * stride + width
        } else {
            0
        };
        if data.len() < required_size {
            return Err(Error::InvalidFrame(format!(
                "buffer size ({}) is too small for {width}x{height} image with stride \
                 {stride} (required: {required_size})",
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    /// Safe accessor for a specific row.
    #[inline(always)]
    #[must_use]
    pub fn get_row(&self, y: usize) -> &[u8] {
        assert!(y < self.height, "Row index {y} out of bounds");
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    /// Safe accessor for a specific pixel.
    #[inline(always)]
    #[must_use]
    pub fn get_pixel(&self, x: usize, y: usize) -> u8 {
        assert!(x < self.width, "Column index {x} out of bounds");
        self.get_row(y)[x]
    }

    /// Bilinear intensity sample, clamped to the image.
    #[must_use]
    pub fn sample_bilinear(&self, x: f64, y: f64) -> f64 {
        let x = x.clamp(0.0, (self.width - 1) as f64);
        let y = y.clamp(0.0, (self.height - 1) as f64);
        #[allow(clippy::cast_sign_loss)]
        let (x0, y0) = (x.floor() as usize, y.floor() as usize);
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let top =
            f64::from(self.get_pixel(x0, y0)) * (1.0 - fx) + f64::from(self.get_pixel(x1, y0)) * fx;
        let bottom =
            f64::from(self.get_pixel(x0, y1)) * (1.0 - fx) + f64::from(self.get_pixel(x1, y1)) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}
