#![allow(dead_code)]

use cardscan_core::quad::{Point, Quadrilateral};
use cardscan_core::test_utils::{SceneBuilder, SyntheticCard, synthetic_database};
use cardscan_core::{Frame, Pipeline, PipelineConfig};
use std::sync::Arc;

/// Seeds of the reference cards used across the scenario tests.
pub const SEEDS: [u64; 8] = [101, 102, 103, 104, 105, 106, 107, 108];

pub const FRAME_WIDTH: usize = 640;
pub const FRAME_HEIGHT: usize = 480;

/// Pipeline over a synthetic database of [`SEEDS`] with default settings.
pub fn default_pipeline() -> Pipeline {
    pipeline_with(PipelineConfig::default())
}

pub fn pipeline_with(config: PipelineConfig) -> Pipeline {
    let database = Arc::new(synthetic_database(&SEEDS, &config));
    Pipeline::new(config, database).unwrap()
}

/// Database number of a seed in [`SEEDS`].
pub fn number_of(seed: u64) -> String {
    let index = SEEDS.iter().position(|&s| s == seed).unwrap();
    (index + 1).to_string()
}

pub fn quad(points: [(f64, f64); 4]) -> Quadrilateral {
    Quadrilateral {
        corners: points.map(|(x, y)| Point::new(x, y)),
    }
}

/// Keystoned card, corners in the card's own TL, TR, BR, BL order.
pub fn perspective_quad() -> Quadrilateral {
    quad([(220.0, 100.0), (420.0, 110.0), (430.0, 390.0), (210.0, 380.0)])
}

pub fn render(seed: u64, placement: Quadrilateral) -> Frame {
    let card = SyntheticCard::generate(seed);
    SceneBuilder::new(FRAME_WIDTH, FRAME_HEIGHT)
        .add_card(&card.image, placement)
        .build()
}
