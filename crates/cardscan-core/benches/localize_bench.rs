#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use bumpalo::Bump;
use cardscan_core::PipelineConfig;
use cardscan_core::quad::locate_card;
use cardscan_core::test_utils::{SceneBuilder, SyntheticCard, rotated_quad};
use divan::bench;

fn main() {
    divan::main();
}

#[bench(args = [(640, 480), (1280, 720), (1920, 1080)])]
fn bench_locate_card(bencher: divan::Bencher, size: (usize, usize)) {
    let (width, height) = size;
    let (w, h) = (width as f64, height as f64);
    let frame = SceneBuilder::new(width, height)
        .add_card(
            &SyntheticCard::generate(11).image,
            rotated_quad(w / 2.0, h / 2.0, 0.3 * h, 0.42 * h, 15.0),
        )
        .build();
    let config = PipelineConfig::default();
    let mut arena = Bump::new();
    bencher.bench_local(move || {
        arena.reset();
        locate_card(&arena, &frame, &config).0
    });
}
