#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use cardscan_core::config::HashScheme;
use cardscan_core::fingerprint::{self, Fingerprint, hamming};
use cardscan_core::image::ImageView;
use cardscan_core::test_utils::SyntheticCard;
use cardscan_core::CanonicalImage;
use divan::bench;

fn main() {
    divan::main();
}

fn canonical() -> CanonicalImage {
    let card = SyntheticCard::generate(7);
    let (width, height) = (card.image.width(), card.image.height());
    CanonicalImage::from_rgb(width, height, card.image.into_data()).unwrap()
}

#[bench(args = [HashScheme::Average, HashScheme::Difference, HashScheme::Dct])]
fn bench_compute(bencher: divan::Bencher, scheme: HashScheme) {
    let image = canonical();
    let gray = image.to_gray();
    let view = ImageView::new(&gray, image.width(), image.height(), image.width()).unwrap();
    bencher.bench_local(move || fingerprint::compute(&view, scheme, 8));
}

#[bench]
fn bench_compute_set_default(bencher: divan::Bencher) {
    let image = canonical();
    let config = cardscan_core::FingerprintConfig::default();
    bencher.bench_local(move || fingerprint::compute_set(&image, &config));
}

#[bench]
fn bench_hamming_256(bencher: divan::Bencher) {
    let a = Fingerprint::from_bits(HashScheme::Average, 16, (0..256).map(|i| i % 3 == 0));
    let b = Fingerprint::from_bits(HashScheme::Average, 16, (0..256).map(|i| i % 5 == 0));
    bencher.bench_local(move || hamming(divan::black_box(a.words()), divan::black_box(b.words())));
}
