#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

use crate::homography::Homography;
use crate::image::Frame;
use crate::quad::{Point, Quadrilateral};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// A card image placed in a scene by its four frame corners.
#[derive(Debug, Clone)]
pub struct CardPlacement {
    /// Upright card image (RGB).
    pub card: Frame,
    /// Where the card's TL, TR, BR, BL corners land in the frame.
    pub quad: Quadrilateral,
}

/// A builder for synthetic capture frames.
pub struct SceneBuilder {
    width: usize,
    height: usize,
    cards: Vec<CardPlacement>,
    background: [u8; 3],
    noise_sigma: f64,
    noise_seed: u64,
}

impl SceneBuilder {
    /// Create a new scene builder with given dimensions and a mid-gray background.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cards: Vec::new(),
            background: [128; 3],
            noise_sigma: 0.0,
            noise_seed: 0,
        }
    }

    /// Set the background color.
    pub fn with_background(mut self, rgb: [u8; 3]) -> Self {
        self.background = rgb;
        self
    }

    /// Add seeded Gaussian noise with the given standard deviation.
    pub fn with_noise(mut self, sigma: f64, seed: u64) -> Self {
        self.noise_sigma = sigma;
        self.noise_seed = seed;
        self
    }

    /// Place a card. Later cards are drawn over earlier ones.
    pub fn add_card(mut self, card: &Frame, quad: Quadrilateral) -> Self {
        self.cards.push(CardPlacement {
            card: card.clone(),
            quad,
        });
        self
    }

    /// Render the frame.
    ///
    /// # Panics
    /// Panics if a placement's quad is degenerate or the dimensions are zero.
    pub fn build(self) -> Frame {
        let mut data: Vec<u8> = self
            .background
            .iter()
            .copied()
            .cycle()
            .take(self.width * self.height * 3)
            .collect();

        for placement in &self.cards {
            self.draw_card(&mut data, placement);
        }

        if self.noise_sigma > 0.0 {
            let mut rng = ChaCha8Rng::seed_from_u64(self.noise_seed);
            let normal = Normal::new(0.0, self.noise_sigma).expect("invalid noise sigma");
            for p in &mut data {
                *p = (f64::from(*p) + normal.sample(&mut rng)).round().clamp(0.0, 255.0) as u8;
            }
        }

        Frame::new(data, self.width, self.height, 3).expect("valid scene dimensions")
    }

    /// Inverse-map every frame pixel near the quad into card edge coordinates
    /// and sample the card bilinearly.
    fn draw_card(&self, data: &mut [u8], placement: &CardPlacement) {
        let card = &placement.card;
        let (cw, ch) = (card.width() as f64, card.height() as f64);
        let card_edges = [
            Point::new(0.0, 0.0),
            Point::new(cw, 0.0),
            Point::new(cw, ch),
            Point::new(0.0, ch),
        ];
        let to_card = Homography::from_pairs(&placement.quad.corners, &card_edges)
            .expect("card placement must be a proper quadrilateral");

        let xs = placement.quad.corners.map(|p| p.x);
        let ys = placement.quad.corners.map(|p| p.y);
        let lowest = |v: [f64; 4]| v.into_iter().fold(f64::INFINITY, f64::min);
        let highest = |v: [f64; 4]| v.into_iter().fold(f64::NEG_INFINITY, f64::max);
        let min_x = (lowest(xs) - 1.0).max(0.0) as usize;
        let min_y = (lowest(ys) - 1.0).max(0.0) as usize;
        let max_x = ((highest(xs) + 2.0).max(0.0) as usize).min(self.width);
        let max_y = ((highest(ys) + 2.0).max(0.0) as usize).min(self.height);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let p = to_card.project(Point::new(x as f64, y as f64));
                if !(0.0..cw).contains(&p.x) || !(0.0..ch).contains(&p.y) {
                    continue;
                }
                let rgb = card.sample_bilinear(p.x - 0.5, p.y - 0.5);
                let idx = (y * self.width + x) * 3;
                for (dst, v) in data[idx..idx + 3].iter_mut().zip(rgb) {
                    *dst = v.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}

/// Corners of a `w x h` rectangle centred at `(cx, cy)`, rotated by `degrees`
/// (clockwise in image coordinates), in the card's own TL, TR, BR, BL order.
pub fn rotated_quad(cx: f64, cy: f64, w: f64, h: f64, degrees: f64) -> Quadrilateral {
    let (s, c) = degrees.to_radians().sin_cos();
    let (hw, hh) = (w / 2.0, h / 2.0);
    let local = [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)];
    Quadrilateral {
        corners: local.map(|(x, y)| Point::new(cx + x * c - y * s, cy + x * s + y * c)),
    }
}

/// Mean corner distance between two quads, minimized over the 4 cyclic
/// rotations of `detected`.
pub fn corner_error(detected: &Quadrilateral, truth: &Quadrilateral) -> f64 {
    (0..4)
        .map(|rot| {
            (0..4)
                .map(|i| detected.corners[(i + rot) % 4].distance(truth.corners[i]))
                .sum::<f64>()
                / 4.0
        })
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_placement_reproduces_card() {
        let data: Vec<u8> = (0..20 * 30 * 3).map(|i| (i % 251) as u8).collect();
        let card = Frame::new(data, 20, 30, 3).unwrap();
        let frame = SceneBuilder::new(20, 30)
            .add_card(&card, Quadrilateral::full_frame(20, 30))
            .build();
        assert_eq!(frame.data(), card.data());
    }

    #[test]
    fn test_background_and_noise_are_deterministic() {
        let plain = SceneBuilder::new(8, 8).with_background([10, 20, 30]).build();
        assert_eq!(plain.rgb(3, 3), [10, 20, 30]);

        let a = SceneBuilder::new(16, 16).with_noise(5.0, 7).build();
        let b = SceneBuilder::new(16, 16).with_noise(5.0, 7).build();
        assert_eq!(a, b);
        assert_ne!(a.data(), plain.data());
    }

    #[test]
    fn test_rotated_quad_and_corner_error() {
        let q = rotated_quad(100.0, 100.0, 20.0, 40.0, 90.0);
        assert!(q.corners[0].distance(Point::new(120.0, 90.0)) < 1e-9);
        let shifted = Quadrilateral {
            corners: [q.corners[2], q.corners[3], q.corners[0], q.corners[1]],
        };
        assert!(corner_error(&shifted, &q) < 1e-9);
    }
}
