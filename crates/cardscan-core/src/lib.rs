//! Core recognition logic for the cardscan library.
//!
//! cardscan identifies a physical trading card from a single still image and
//! attaches its catalog metadata and market price.
//!
//! # Architecture Overview
//!
//! Every call runs one linear pipeline:
//!
//! 1. **Localization** ([`quad`]):
//!    - Grayscale, 3x3 Gaussian blur and Sobel edge magnitude.
//!    - Morphological closing of the edge mask, connected components with Union-Find.
//!    - Boundary tracing, Douglas-Peucker and reduction to four corners.
//!    - Geometric filters (area, convexity, corner angles, 2.5:3.5 aspect) and
//!      sub-pixel corner refinement.
//!
//! 2. **Normalization** ([`normalize`]):
//!    - Corner ordering, portrait orientation and a homography warp into a
//!      fixed canonical rectangle.
//!
//! 3. **Fingerprinting** ([`fingerprint`]):
//!    - Average, difference and DCT perceptual hashes of the canonical image
//!      and of its 180° rotation.
//!
//! 4. **Matching** ([`matcher`]):
//!    - Weighted Hamming distance against every [`ReferenceDatabase`] entry,
//!      ranked with a total order, bucketed into a [`Quality`].
//!
//! "No card in frame" and "price unavailable" are ordinary [`MatchResult`]
//! values. Only malformed input and configuration faults are errors.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cardscan_core::{Pipeline, PipelineConfig};
//! use cardscan_core::test_utils::{SceneBuilder, SyntheticCard, rotated_quad, synthetic_database};
//!
//! let config = PipelineConfig::default();
//! let database = Arc::new(synthetic_database(&[1, 2, 3], &config));
//! let pipeline = Pipeline::new(config, database)?;
//!
//! let card = SyntheticCard::generate(2);
//! let frame = SceneBuilder::new(640, 480)
//!     .add_card(&card.image, rotated_quad(320.0, 240.0, 200.0, 280.0, 20.0))
//!     .build();
//!
//! let result = pipeline.identify(&frame)?;
//! assert!(result.matched);
//! assert_eq!(result.card.unwrap().metadata.name, "Card 2");
//! # Ok::<(), cardscan_core::Error>(())
//! ```

/// Configuration types for the recognition pipeline.
pub mod config;
/// Reference database loading, validation and building.
pub mod database;
/// Error types.
pub mod error;
/// Gaussian blur and binary morphology.
pub mod filter;
/// Perceptual hashing.
pub mod fingerprint;
/// Sobel gradients and edge masks.
pub mod gradient;
/// Planar homographies.
pub mod homography;
/// Frame buffers and grayscale views.
pub mod image;
/// Fingerprint ranking against the reference database.
pub mod matcher;
/// Perspective normalization into canonical card images.
pub mod normalize;
/// Card localization and quadrilateral geometry.
pub mod quad;
/// Connected components labeling using Union-Find.
pub mod segmentation;
/// Utilities for testing and synthetic data generation.
pub mod test_utils;

pub use crate::config::{FingerprintConfig, HashScheme, MatchConfig, PipelineConfig};
pub use crate::database::{CardId, CardMetadata, PriceSnapshot, ReferenceDatabase};
pub use crate::error::{DatabaseError, Error, Result};
pub use crate::fingerprint::{Fingerprint, FingerprintSet};
pub use crate::image::{Frame, ImageView};
pub use crate::matcher::{Candidate, MatchResult, Matcher, Price, PriceSource, Quality};
pub use crate::normalize::CanonicalImage;
pub use crate::quad::{Point, Quadrilateral};
use bumpalo::Bump;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Pipeline-wide statistics for a single identification call.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PipelineStats {
    /// Time taken for card localization in milliseconds.
    pub localize_ms: f64,
    /// Time taken for the perspective warp in milliseconds.
    pub normalize_ms: f64,
    /// Time taken for fingerprinting in milliseconds.
    pub fingerprint_ms: f64,
    /// Time taken for the database scan in milliseconds.
    pub match_ms: f64,
    /// Total pipeline time in milliseconds.
    pub total_ms: f64,
    /// Number of edge components in the frame.
    pub num_components: usize,
    /// Number of components traced for quad fitting.
    pub num_traced: usize,
    /// Number of quads that passed the geometric filters.
    pub num_candidates: usize,
}

/// Full result of an identification including intermediate data for debugging.
#[derive(Clone, Debug)]
pub struct FullIdentification {
    /// Final result.
    pub result: MatchResult,
    /// Detected (or assumed) card corners.
    pub quad: Option<Quadrilateral>,
    /// Warped card image.
    pub canonical: Option<CanonicalImage>,
    /// Query fingerprints: upright first, then the 180° rotation if enabled.
    pub fingerprints: Vec<FingerprintSet>,
    /// Best candidates, closest first.
    pub candidates: Vec<Candidate>,
    /// Pipeline statistics.
    pub stats: PipelineStats,
}

impl FullIdentification {
    fn without_card(quad: Option<Quadrilateral>, stats: PipelineStats) -> Self {
        Self {
            result: MatchResult::no_match(),
            quad,
            canonical: None,
            fingerprints: Vec::new(),
            candidates: Vec::new(),
            stats,
        }
    }
}

/// The main entry point for identifying cards.
///
/// A pipeline holds only immutable state and allocates its scratch memory
/// per call, so one instance can serve many threads.
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    matcher: Matcher,
}

impl Pipeline {
    /// Create a pipeline over a shared reference database.
    ///
    /// # Errors
    /// Returns [`DatabaseError::HashSizeMismatch`] if the database was built
    /// with a different hash size than `config.fingerprint.hash_size`.
    pub fn new(config: PipelineConfig, database: Arc<ReferenceDatabase>) -> Result<Self> {
        if database.hash_size() != config.fingerprint.hash_size {
            return Err(DatabaseError::HashSizeMismatch {
                expected: config.fingerprint.hash_size,
                found: database.hash_size(),
            }
            .into());
        }
        let shared = database
            .entries()
            .iter()
            .flat_map(|e| &e.fingerprints)
            .any(|f| config.fingerprint.schemes.contains(&f.scheme()));
        if !shared {
            tracing::warn!(
                schemes = ?config.fingerprint.schemes,
                "no database fingerprint uses a configured scheme; nothing will match"
            );
        }
        let matcher = Matcher::new(database, config.matching);
        Ok(Self { config, matcher })
    }

    /// Get the pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The reference database.
    #[must_use]
    pub fn database(&self) -> &ReferenceDatabase {
        self.matcher.database()
    }

    /// Identify the card in a camera frame.
    ///
    /// # Errors
    /// Only configuration faults surface as errors; a frame without a card
    /// yields an unmatched result.
    pub fn identify(&self, frame: &Frame) -> Result<MatchResult> {
        Ok(self.identify_full(frame, None)?.result)
    }

    /// Identify with prices from an external source.
    ///
    /// # Errors
    /// See [`Pipeline::identify`].
    pub fn identify_with_prices(
        &self,
        frame: &Frame,
        prices: &dyn PriceSource,
    ) -> Result<MatchResult> {
        Ok(self.identify_full(frame, Some(prices))?.result)
    }

    /// Identify a clean scan in which the card fills the whole frame.
    ///
    /// Skips localization; this is the path the database builder uses.
    ///
    /// # Errors
    /// See [`Pipeline::identify`].
    pub fn identify_scan(&self, frame: &Frame) -> Result<FullIdentification> {
        let start = Instant::now();
        let mut stats = PipelineStats::default();
        let quad = Quadrilateral::full_frame(frame.width(), frame.height());
        let canonical = {
            let _span = tracing::info_span!("normalize").entered();
            normalize::normalize_full_frame(frame, &self.config)
        };
        stats.normalize_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.finish(canonical, quad, None, stats, start)
    }

    /// Run the whole pipeline and keep the intermediate data.
    ///
    /// # Errors
    /// See [`Pipeline::identify`].
    pub fn identify_full(
        &self,
        frame: &Frame,
        prices: Option<&dyn PriceSource>,
    ) -> Result<FullIdentification> {
        let start = Instant::now();
        let mut stats = PipelineStats::default();
        let arena = Bump::new();

        let (quad, localize) = {
            let _span =
                tracing::info_span!("localize", width = frame.width(), height = frame.height())
                    .entered();
            quad::locate_card(&arena, frame, &self.config)
        };
        stats.localize_ms = start.elapsed().as_secs_f64() * 1000.0;
        stats.num_components = localize.num_components;
        stats.num_traced = localize.num_traced;
        stats.num_candidates = localize.num_candidates;

        let Some(quad) = quad else {
            tracing::debug!("no card detected");
            stats.total_ms = start.elapsed().as_secs_f64() * 1000.0;
            return Ok(FullIdentification::without_card(None, stats));
        };

        let stage = Instant::now();
        let canonical = {
            let _span = tracing::info_span!("normalize").entered();
            normalize::normalize(frame, &quad, &self.config)
        };
        stats.normalize_ms = stage.elapsed().as_secs_f64() * 1000.0;
        self.finish(canonical, quad, prices, stats, start)
    }

    /// Query fingerprints for a canonical image: upright, then rotated by 180°
    /// when rotation invariance is enabled.
    #[must_use]
    pub fn fingerprints(&self, canonical: &CanonicalImage) -> Vec<FingerprintSet> {
        let upright = fingerprint::compute_set(canonical, &self.config.fingerprint);
        if self.config.rotation_invariant {
            let rotated =
                fingerprint::compute_set(&canonical.rotate_180(), &self.config.fingerprint);
            vec![upright, rotated]
        } else {
            vec![upright]
        }
    }

    /// Fingerprint and match a warped card; degenerate geometry becomes a no-match.
    fn finish(
        &self,
        canonical: Result<CanonicalImage>,
        quad: Quadrilateral,
        prices: Option<&dyn PriceSource>,
        mut stats: PipelineStats,
        start: Instant,
    ) -> Result<FullIdentification> {
        let canonical = match canonical {
            Ok(c) => c,
            Err(Error::DegenerateGeometry) => {
                tracing::debug!(?quad, "degenerate card geometry");
                stats.total_ms = start.elapsed().as_secs_f64() * 1000.0;
                return Ok(FullIdentification::without_card(Some(quad), stats));
            }
            Err(e) => return Err(e),
        };

        let stage = Instant::now();
        let fingerprints = {
            let _span = tracing::info_span!("fingerprint").entered();
            self.fingerprints(&canonical)
        };
        stats.fingerprint_ms = stage.elapsed().as_secs_f64() * 1000.0;

        let stage = Instant::now();
        let (result, candidates) = {
            let _span = tracing::info_span!("match", entries = self.database().len()).entered();
            self.matcher.find_match(&fingerprints, prices)
        };
        stats.match_ms = stage.elapsed().as_secs_f64() * 1000.0;
        stats.total_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(FullIdentification {
            result,
            quad: Some(quad),
            canonical: Some(canonical),
            fingerprints,
            candidates,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{SyntheticCard, synthetic_database};

    #[test]
    fn test_pipeline_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pipeline>();
    }

    #[test]
    fn test_hash_size_mismatch_rejected() {
        let config = PipelineConfig::default();
        let db = Arc::new(synthetic_database(&[1], &config));
        let other = PipelineConfig::builder()
            .fingerprint(FingerprintConfig {
                hash_size: 16,
                ..FingerprintConfig::default()
            })
            .build();
        assert!(matches!(
            Pipeline::new(other, db),
            Err(Error::Database(DatabaseError::HashSizeMismatch { expected: 16, found: 8 }))
        ));
    }

    #[test]
    fn test_scan_path_self_match() {
        let config = PipelineConfig::default();
        let db = Arc::new(synthetic_database(&[11, 12], &config));
        let pipeline = Pipeline::new(config, db).unwrap();
        let full = pipeline.identify_scan(&SyntheticCard::generate(12).image).unwrap();
        assert_eq!(full.result.distance, Some(0.0));
        assert_eq!(full.result.quality, Quality::Exact);
        assert_eq!(full.fingerprints.len(), 2);
        assert_eq!(full.candidates.len(), 2);
        assert_eq!(full.result.card.unwrap().id.number, "2");
    }

    #[test]
    fn test_uniform_frame_has_no_card() {
        let config = PipelineConfig::default();
        let database = Arc::new(synthetic_database(&[1], &config));
        let pipeline = Pipeline::new(config.clone(), database).unwrap();
        let frame = Frame::filled(160, 120, [200, 200, 200]).unwrap();
        let full = pipeline.identify_full(&frame, None).unwrap();
        assert!(!full.result.matched);
        assert!(full.quad.is_none());
        assert!(full.candidates.is_empty());
        assert_eq!(full.stats.num_candidates, 0);
    }

    #[test]
    fn test_tiny_scan_is_degenerate_not_error() {
        let config = PipelineConfig::default();
        let database = Arc::new(synthetic_database(&[1], &config));
        let pipeline = Pipeline::new(config.clone(), database).unwrap();
        let frame = Frame::filled(3, 3, [0, 0, 0]).unwrap();
        let full = pipeline.identify_scan(&frame).unwrap();
        assert_eq!(full.result, MatchResult::no_match());
        assert!(full.quad.is_some());
        assert!(full.canonical.is_none());
    }
}
