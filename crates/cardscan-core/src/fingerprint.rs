#![allow(unsafe_code)]
//! Perceptual fingerprints of canonical card images.
//!
//! Every scheme reduces a grayscale image to `hash_size * hash_size` bits.
//! Bits are stored MSB-first in row-major cell order: cell `k` lives in word
//! `k / 64` at bit `63 - k % 64`, which makes the hex form read left to right
//! in cell order.

use crate::config::{FingerprintConfig, HashScheme};
use crate::image::ImageView;
use crate::normalize::CanonicalImage;
use multiversion::multiversion;
use serde::{Deserialize, Serialize};

/// A fixed-length perceptual hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "FingerprintRecord")]
pub struct Fingerprint {
    scheme: HashScheme,
    hash_size: usize,
    words: Vec<u64>,
}

impl Fingerprint {
    /// Pack row-major cell bits into a fingerprint.
    ///
    /// Missing bits are zero; extra bits are ignored.
    #[must_use]
    pub fn from_bits(
        scheme: HashScheme,
        hash_size: usize,
        bits: impl IntoIterator<Item = bool>,
    ) -> Self {
        let bit_len = hash_size * hash_size;
        let mut words = vec![0u64; bit_len.div_ceil(64)];
        for (k, bit) in bits.into_iter().take(bit_len).enumerate() {
            if bit {
                words[k / 64] |= 1 << (63 - k % 64);
            }
        }
        Self {
            scheme,
            hash_size,
            words,
        }
    }

    /// Scheme that produced this fingerprint.
    #[must_use]
    pub fn scheme(&self) -> HashScheme {
        self.scheme
    }

    /// Grid side length.
    #[must_use]
    pub fn hash_size(&self) -> usize {
        self.hash_size
    }

    /// Number of bits.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.hash_size * self.hash_size
    }

    /// Packed words.
    #[must_use]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Value of cell `k` (row-major).
    #[must_use]
    pub fn bit(&self, k: usize) -> bool {
        k < self.bit_len() && self.words[k / 64] & (1 << (63 - k % 64)) != 0
    }

    /// Hamming distance, or `None` if scheme or hash size differ.
    #[must_use]
    pub fn distance(&self, other: &Fingerprint) -> Option<u32> {
        (self.scheme == other.scheme && self.hash_size == other.hash_size)
            .then(|| hamming(&self.words, &other.words))
    }

    /// Lower-case hex, `ceil(bit_len / 4)` digits, zero padded.
    #[must_use]
    pub fn to_hex(&self) -> String {
        let digits = self.bit_len().div_ceil(4);
        let mut s: String = self.words.iter().map(|w| format!("{w:016x}")).collect();
        s.truncate(digits);
        s
    }

    /// Parse the hex form produced by [`Fingerprint::to_hex`].
    ///
    /// Upper-case digits are accepted. Returns `None` for a wrong length,
    /// non-hex characters or set padding bits.
    #[must_use]
    pub fn from_hex(scheme: HashScheme, hash_size: usize, hex: &str) -> Option<Self> {
        let bit_len = hash_size * hash_size;
        if hash_size == 0 || hex.len() != bit_len.div_ceil(4) {
            return None;
        }
        let mut words = vec![0u64; bit_len.div_ceil(64)];
        for (i, c) in hex.chars().enumerate() {
            let nibble = u64::from(c.to_digit(16)?);
            let bit = 4 * i;
            words[bit / 64] |= nibble << (60 - bit % 64);
        }
        let fp = Self {
            scheme,
            hash_size,
            words,
        };
        // Padding bits past bit_len must be clear.
        let padding =
            (bit_len..fp.words.len() * 64).any(|k| fp.words[k / 64] & (1 << (63 - k % 64)) != 0);
        (!padding).then_some(fp)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scheme, self.to_hex())
    }
}

/// Serialized form of a fingerprint in database files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Hash scheme.
    pub scheme: HashScheme,
    /// Grid side length.
    pub hash_size: usize,
    /// Hex digits as produced by [`Fingerprint::to_hex`].
    pub hex: String,
}

impl From<Fingerprint> for FingerprintRecord {
    fn from(fp: Fingerprint) -> Self {
        Self {
            scheme: fp.scheme,
            hash_size: fp.hash_size,
            hex: fp.to_hex(),
        }
    }
}

impl FingerprintRecord {
    /// Decode into a fingerprint.
    #[must_use]
    pub fn decode(&self) -> Option<Fingerprint> {
        Fingerprint::from_hex(self.scheme, self.hash_size, &self.hex)
    }
}

/// Number of differing bits between two equally long word slices.
#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
#[must_use]
pub fn hamming(a: &[u64], b: &[u64]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// One fingerprint per configured scheme, all computed from the same image.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FingerprintSet {
    /// Fingerprints in configuration order.
    pub fingerprints: Vec<Fingerprint>,
}

impl FingerprintSet {
    /// Fingerprint for one scheme, if it was computed.
    #[must_use]
    pub fn get(&self, scheme: HashScheme) -> Option<&Fingerprint> {
        self.fingerprints.iter().find(|f| f.scheme == scheme)
    }
}

/// Compute every configured scheme for a canonical image.
#[must_use]
pub fn compute_set(image: &CanonicalImage, config: &FingerprintConfig) -> FingerprintSet {
    let gray = image.to_gray();
    let view = ImageView {
        data: &gray,
        width: image.width(),
        height: image.height(),
        stride: image.width(),
    };
    FingerprintSet {
        fingerprints: config
            .schemes
            .iter()
            .map(|&scheme| compute(&view, scheme, config.hash_size))
            .collect(),
    }
}

/// Compute one fingerprint of a grayscale image.
#[must_use]
pub fn compute(img: &ImageView, scheme: HashScheme, hash_size: usize) -> Fingerprint {
    let n = hash_size.max(1);
    match scheme {
        HashScheme::Average => {
            let cells = area_resize(img, n, n);
            let mean = cells.iter().sum::<f64>() / cells.len() as f64;
            Fingerprint::from_bits(scheme, n, cells.iter().map(|&v| v > mean))
        }
        HashScheme::Difference => {
            let cells = area_resize(img, n + 1, n);
            let bits = cells
                .chunks_exact(n + 1)
                .flat_map(|row| row.windows(2).map(|w| w[1] > w[0]));
            Fingerprint::from_bits(scheme, n, bits)
        }
        HashScheme::Dct => {
            let side = 4 * n;
            let cells = area_resize(img, side, side);
            let coeffs = dct_low_frequencies(&cells, side, n);
            let med = median(&coeffs);
            Fingerprint::from_bits(scheme, n, coeffs.iter().map(|&c| c > med))
        }
    }
}

/// Downscale by exact area averaging (box filter with fractional pixel coverage).
#[must_use]
pub fn area_resize(img: &ImageView, out_w: usize, out_h: usize) -> Vec<f64> {
    let sx = img.width as f64 / out_w as f64;
    let sy = img.height as f64 / out_h as f64;
    let mut out = Vec::with_capacity(out_w * out_h);

    for oy in 0..out_h {
        let y0 = oy as f64 * sy;
        let y1 = (oy + 1) as f64 * sy;
        for ox in 0..out_w {
            let x0 = ox as f64 * sx;
            let x1 = (ox + 1) as f64 * sx;
            let mut acc = 0.0;
            let mut weight = 0.0;
            for y in (y0.floor() as usize)..(y1.ceil() as usize).min(img.height) {
                let wy = (y1.min(y as f64 + 1.0) - y0.max(y as f64)).max(0.0);
                if wy == 0.0 {
                    continue;
                }
                let row = img.get_row(y);
                for x in (x0.floor() as usize)..(x1.ceil() as usize).min(img.width) {
                    let wx = (x1.min(x as f64 + 1.0) - x0.max(x as f64)).max(0.0);
                    acc += f64::from(row[x]) * wx * wy;
                    weight += wx * wy;
                }
            }
            out.push(if weight > 0.0 { acc / weight } else { 0.0 });
        }
    }
    out
}

/// Top-left `keep x keep` coefficients of the 2-D DCT-II of a square block, row-major.
fn dct_low_frequencies(block: &[f64], side: usize, keep: usize) -> Vec<f64> {
    let cos_table: Vec<f64> = (0..keep * side)
        .map(|i| {
            let (k, n) = (i / side, i % side);
            (std::f64::consts::PI * (n as f64 + 0.5) * k as f64 / side as f64).cos()
        })
        .collect();

    // Rows: side x keep
    let mut rows = vec![0.0; side * keep];
    for y in 0..side {
        for k in 0..keep {
            rows[y * keep + k] = (0..side)
                .map(|x| block[y * side + x] * cos_table[k * side + x])
                .sum();
        }
    }
    // Columns: keep x keep
    let mut out = vec![0.0; keep * keep];
    for ky in 0..keep {
        for kx in 0..keep {
            out[ky * keep + kx] = (0..side)
                .map(|y| rows[y * keep + kx] * cos_table[ky * side + y])
                .sum();
        }
    }
    out
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) * 0.5
    }
}
