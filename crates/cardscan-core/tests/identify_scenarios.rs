#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::uninlined_format_args)]

mod common;

use cardscan_core::test_utils::{SceneBuilder, SyntheticCard, corner_error, rotated_quad};
use cardscan_core::{Frame, HashScheme, Price, Quality};
use common::{
    FRAME_HEIGHT, FRAME_WIDTH, default_pipeline, number_of, perspective_quad, quad, render,
};
use std::sync::Arc;

#[test]
fn test_perspective_card_matches_reference() {
    let pipeline = default_pipeline();
    let truth = perspective_quad();
    let frame = render(105, truth);

    let full = pipeline.identify_full(&frame, None).unwrap();
    let result = &full.result;

    assert!(result.matched);
    assert!(
        matches!(result.quality, Quality::Exact | Quality::Strong),
        "quality {:?} at distance {:?}",
        result.quality,
        result.distance
    );
    assert!(result.confidence >= 0.9, "confidence {}", result.confidence);
    assert_eq!(result.card.as_ref().unwrap().id.number, number_of(105));
    assert_eq!(result.card.as_ref().unwrap().metadata.name, "Card 105");

    let err = corner_error(&full.quad.unwrap(), &truth);
    println!("Perspective corner error = {} px", err);
    assert!(err < 1.0, "Corner error too high: {} px", err);
    assert_eq!(full.canonical.as_ref().unwrap().width(), 250);
    assert_eq!(full.canonical.as_ref().unwrap().height(), 350);
}

#[test]
fn test_rotated_cards_match() {
    let pipeline = default_pipeline();
    for (seed, degrees) in [(101, 20.0), (103, -35.0), (106, 90.0), (108, 190.0)] {
        let frame = render(seed, rotated_quad(320.0, 240.0, 200.0, 280.0, degrees));
        let result = pipeline.identify(&frame).unwrap();
        assert!(
            result.matched,
            "seed {seed} at {degrees} deg not matched: {:?}",
            result.distance
        );
        assert_eq!(
            result.card.unwrap().id.number,
            number_of(seed),
            "seed {} at {} deg",
            seed,
            degrees
        );
        assert!(result.distance.unwrap() <= 8.0);
    }
}

#[test]
fn test_upside_down_card_matches() {
    let pipeline = default_pipeline();
    // The card's TL corner lands on the frame's bottom-right.
    let upside_down = quad([(430.0, 390.0), (210.0, 380.0), (220.0, 100.0), (420.0, 110.0)]);
    let frame = render(104, upside_down);

    let full = pipeline.identify_full(&frame, None).unwrap();
    assert!(full.result.matched);
    assert_eq!(full.result.card.unwrap().id.number, number_of(104));
    assert_eq!(full.fingerprints.len(), 2);
}

#[test]
fn test_all_black_frame_is_not_an_error() {
    let pipeline = default_pipeline();
    let frame = Frame::filled(FRAME_WIDTH, FRAME_HEIGHT, [0, 0, 0]).unwrap();
    let result = pipeline.identify(&frame).unwrap();
    assert!(!result.matched);
    assert_eq!(result.quality, Quality::None);
    assert!(result.card.is_none());
    assert_eq!(result.price, Price::Unavailable);
}

#[test]
fn test_background_without_card_is_not_found() {
    let pipeline = default_pipeline();
    let frame = SceneBuilder::new(FRAME_WIDTH, FRAME_HEIGHT).with_noise(2.0, 9).build();
    let full = pipeline.identify_full(&frame, None).unwrap();
    assert!(full.quad.is_none());
    assert!(!full.result.matched);
}

#[test]
fn test_small_card_is_ignored() {
    let pipeline = default_pipeline();
    // About 2% of the frame.
    let frame = render(102, rotated_quad(320.0, 240.0, 50.0, 70.0, 0.0));
    let result = pipeline.identify(&frame).unwrap();
    assert!(!result.matched);
}

#[test]
fn test_scan_self_match_for_every_card() {
    let pipeline = default_pipeline();
    for &seed in &common::SEEDS {
        let scan = SyntheticCard::generate(seed).image;
        let full = pipeline.identify_scan(&scan).unwrap();
        assert_eq!(full.result.distance, Some(0.0), "seed {}", seed);
        assert_eq!(full.result.quality, Quality::Exact);
        assert!((full.result.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(full.result.card.unwrap().id.number, number_of(seed));
    }
}

#[test]
fn test_identification_is_deterministic() {
    let pipeline = default_pipeline();
    let frame = render(107, perspective_quad());
    let a = pipeline.identify_full(&frame, None).unwrap();
    let b = pipeline.identify_full(&frame, None).unwrap();
    assert_eq!(a.result, b.result);
    assert_eq!(a.fingerprints, b.fingerprints);
    assert_eq!(a.candidates, b.candidates);
    assert_eq!(a.quad, b.quad);
}

#[test]
fn test_candidates_are_ranked() {
    let pipeline = default_pipeline();
    let full = pipeline.identify_full(&render(103, perspective_quad()), None).unwrap();
    assert_eq!(full.candidates.len(), 3);
    for pair in full.candidates.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
        assert!(pair[0].confidence >= pair[1].confidence);
    }
    assert_eq!(full.candidates[0].id.number, number_of(103));
    assert_ne!(full.candidates[1].id, full.candidates[0].id);
}

#[test]
fn test_prices_follow_database_snapshot() {
    let pipeline = default_pipeline();
    // Card 1 (seed 101) carries a snapshot, card 2 (seed 102) does not.
    let priced = pipeline.identify_scan(&SyntheticCard::generate(101).image).unwrap();
    assert!(matches!(priced.result.price, Price::Available(ref p) if p.tcgplayer == Some(0.25)));
    let unpriced = pipeline.identify_scan(&SyntheticCard::generate(102).image).unwrap();
    assert!(unpriced.result.matched);
    assert_eq!(unpriced.result.price, Price::Unavailable);
}

#[test]
fn test_dct_scheme_pipeline() {
    let config = cardscan_core::PipelineConfig::builder()
        .fingerprint(cardscan_core::FingerprintConfig {
            hash_size: 8,
            schemes: HashScheme::all().to_vec(),
        })
        .build();
    let pipeline = common::pipeline_with(config);
    let full = pipeline.identify_scan(&SyntheticCard::generate(106).image).unwrap();
    assert_eq!(full.fingerprints[0].fingerprints.len(), 3);
    assert_eq!(full.result.distance, Some(0.0));
}

#[test]
fn test_pipeline_shared_across_threads() {
    let pipeline = Arc::new(default_pipeline());
    let frame = Arc::new(render(105, perspective_quad()));
    let expected = pipeline.identify(&frame).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let frame = Arc::clone(&frame);
            std::thread::spawn(move || pipeline.identify(&frame).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_grayscale_and_rgba_frames() {
    let pipeline = default_pipeline();
    let rgb = render(102, perspective_quad());
    let gray: Vec<u8> = rgb.data().chunks_exact(3).map(|px| px[0]).collect();
    let rgba: Vec<u8> = rgb
        .data()
        .chunks_exact(3)
        .flat_map(|px| [px[0], px[1], px[2], 255])
        .collect();

    let expected = pipeline.identify(&rgb).unwrap();
    assert!(expected.matched);
    let gray = Frame::new(gray, FRAME_WIDTH, FRAME_HEIGHT, 1).unwrap();
    let rgba = Frame::new(rgba, FRAME_WIDTH, FRAME_HEIGHT, 4).unwrap();
    assert_eq!(pipeline.identify(&gray).unwrap(), expected);
    assert_eq!(pipeline.identify(&rgba).unwrap(), expected);
}

#[test]
#[cfg_attr(not(feature = "extended-tests"), ignore)]
fn test_noise_sweep() {
    let pipeline = default_pipeline();
    let card = SyntheticCard::generate(105);
    for (i, sigma) in [1.0, 2.0, 4.0].into_iter().enumerate() {
        let frame = SceneBuilder::new(FRAME_WIDTH, FRAME_HEIGHT)
            .add_card(&card.image, perspective_quad())
            .with_noise(sigma, i as u64)
            .build();
        let result = pipeline.identify(&frame).unwrap();
        println!("sigma {}: {:?} at {:?}", sigma, result.quality, result.distance);
        assert!(result.matched, "sigma {}", sigma);
        assert_eq!(result.card.unwrap().id.number, number_of(105));
    }
}
