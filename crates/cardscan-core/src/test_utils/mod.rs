//! Deterministic synthetic cards, scenes and databases for tests and benchmarks.

mod scene;

pub use scene::{CardPlacement, SceneBuilder, corner_error, rotated_quad};

use crate::config::PipelineConfig;
use crate::database::{
    CardId, CardMetadata, DatabaseBuilder, PriceSnapshot, ReferenceDatabase, ReferenceEntry,
    SetInfo,
};
use crate::image::Frame;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Width of a rendered synthetic card.
pub const CARD_WIDTH: usize = 250;
/// Height of a rendered synthetic card.
pub const CARD_HEIGHT: usize = 350;
/// Gray levels used for card blocks.
pub const PALETTE: [u8; 4] = [20, 75, 180, 235];
/// Set code of synthetic databases.
pub const SYNTHETIC_SET: &str = "SYN";

const BLOCKS: usize = 8;
/// Minimum gap between neighbouring difference-hash cells in one block row.
const DIFF_MARGIN: f64 = 30.0;
/// Minimum gap between any block and the card mean.
const MEAN_MARGIN: f64 = 35.0;

/// A card made of an 8x8 grid of flat gray blocks.
///
/// Block values are drawn from [`PALETTE`] by rejection sampling so that
/// the default 8x8 average and difference hashes have wide margins: every
/// block is far from the card mean, and within a row every pair of adjacent
/// difference-hash cells differs clearly. Re-sampling through a perspective
/// warp therefore cannot flip a bit.
#[derive(Clone, Debug)]
pub struct SyntheticCard {
    /// Generator seed.
    pub seed: u64,
    /// Block gray levels, row-major.
    pub blocks: [[u8; BLOCKS]; BLOCKS],
    /// Rendered `CARD_WIDTH x CARD_HEIGHT` RGB image.
    pub image: Frame,
}

impl SyntheticCard {
    /// Generate the card for a seed.
    #[must_use]
    pub fn generate(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let blocks = loop {
            let mut grid = [[0u8; BLOCKS]; BLOCKS];
            for row in &mut grid {
                *row = loop {
                    let candidate: [u8; BLOCKS] =
                        std::array::from_fn(|_| PALETTE[rng.gen_range(0..PALETTE.len())]);
                    if row_is_stable(&candidate) {
                        break candidate;
                    }
                };
            }
            let mean = grid.iter().flatten().map(|&v| f64::from(v)).sum::<f64>() / 64.0;
            if grid.iter().flatten().all(|&v| (f64::from(v) - mean).abs() >= MEAN_MARGIN) {
                break grid;
            }
        };
        Self {
            seed,
            blocks,
            image: render_blocks(&blocks, CARD_WIDTH, CARD_HEIGHT),
        }
    }
}

/// Difference-hash cells of one block row must differ by at least [`DIFF_MARGIN`].
///
/// Cell `j` of the `BLOCKS + 1` cells covers `[j, j + 1) * BLOCKS / (BLOCKS + 1)`
/// in block units.
fn row_is_stable(row: &[u8; BLOCKS]) -> bool {
    let n = BLOCKS as f64;
    let width = n / (n + 1.0);
    let cells: Vec<f64> = (0..=BLOCKS)
        .map(|j| {
            let (a, b) = (j as f64 * width, (j + 1) as f64 * width);
            row.iter()
                .enumerate()
                .map(|(k, &v)| {
                    let overlap = (b.min(k as f64 + 1.0) - a.max(k as f64)).max(0.0);
                    overlap * f64::from(v)
                })
                .sum::<f64>()
                / width
        })
        .collect();
    cells.windows(2).all(|w| (w[1] - w[0]).abs() >= DIFF_MARGIN)
}

/// Render a block grid; each pixel centre takes the value of the block it falls in.
///
/// # Panics
/// Panics if `width` or `height` is zero.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn render_blocks(blocks: &[[u8; BLOCKS]; BLOCKS], width: usize, height: usize) -> Frame {
    let mut data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let r = (((y as f64 + 0.5) / height as f64 * BLOCKS as f64) as usize).min(BLOCKS - 1);
        for x in 0..width {
            let c = (((x as f64 + 0.5) / width as f64 * BLOCKS as f64) as usize).min(BLOCKS - 1);
            let v = blocks[r][c];
            data.extend_from_slice(&[v, v, v]);
        }
    }
    Frame::new(data, width, height, 3).expect("non-empty card dimensions")
}

/// Build a reference database of synthetic cards, one per seed.
///
/// Card `i` gets number `i + 1` and the name `Card <seed>`; cards with an odd
/// number carry a price snapshot.
///
/// # Panics
/// Panics if `seeds` is empty or contains duplicates.
#[must_use]
pub fn synthetic_database(seeds: &[u64], config: &PipelineConfig) -> ReferenceDatabase {
    let builder = DatabaseBuilder::new(config.clone());
    let entries = seeds
        .iter()
        .enumerate()
        .map(|(i, &seed)| {
            let card = SyntheticCard::generate(seed);
            ReferenceEntry {
                id: CardId::new(SYNTHETIC_SET, (i + 1).to_string()),
                metadata: CardMetadata {
                    name: format!("Card {seed}"),
                    rarity: Some("Common".to_owned()),
                    ..CardMetadata::default()
                },
                fingerprints: builder
                    .fingerprint_scan(&card.image)
                    .expect("synthetic cards are large enough to warp"),
                prices: (i % 2 == 0).then(|| PriceSnapshot {
                    tcgplayer: Some(0.25 * (i + 1) as f64),
                    cardmarket: None,
                    updated_at: Some("2024/09/20".to_owned()),
                }),
            }
        })
        .collect();
    let set_info = SetInfo {
        name: "Synthetic".to_owned(),
        series: None,
        set_code: SYNTHETIC_SET.to_owned(),
    };
    ReferenceDatabase::from_entries(set_info, entries).expect("valid synthetic database")
}
