//! Configuration types for the recognition pipeline.
//!
//! This module provides three configuration types:
//! - [`PipelineConfig`]: localizer, normalizer and fingerprint settings
//!   (immutable after construction)
//! - [`FingerprintConfig`]: hash size and the enabled [`HashScheme`]s, shared
//!   by the database builder and queries
//! - [`MatchConfig`]: distance thresholds, scheme weights and candidate count for the matcher
//!
//! All three derive `serde` traits with `#[serde(default)]`, so a JSON config
//! file only needs to name the fields it overrides.

use serde::{Deserialize, Serialize};

/// Portrait aspect ratio (short side / long side) of a standard trading card.
pub const CARD_ASPECT_RATIO: f64 = 2.5 / 3.5;

// ============================================================================
// FingerprintConfig
// ============================================================================

/// Perceptual hashing scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashScheme {
    /// Mean-thresholded downscale ("aHash").
    Average,
    /// Horizontal gradient sign ("dHash").
    Difference,
    /// Low-frequency DCT coefficients against their median ("pHash").
    Dct,
}

impl HashScheme {
    /// Returns all available schemes.
    #[must_use]
    pub const fn all() -> &'static [HashScheme] {
        &[HashScheme::Average, HashScheme::Difference, HashScheme::Dct]
    }

    /// Lower-case name used in database files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            HashScheme::Average => "average",
            HashScheme::Difference => "difference",
            HashScheme::Dct => "dct",
        }
    }
}

impl std::fmt::Display for HashScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fingerprint function settings.
///
/// The database builder and the query path must use the same value; the
/// database records `hash_size` and the loader rejects a mismatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Side length of the hash grid (default: 8, giving 64-bit hashes).
    pub hash_size: usize,
    /// Schemes computed for every image (default: average + difference).
    pub schemes: Vec<HashScheme>,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            hash_size: 8,
            schemes: vec![HashScheme::Average, HashScheme::Difference],
        }
    }
}

impl FingerprintConfig {
    /// Number of bits in one fingerprint.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.hash_size * self.hash_size
    }
}

// ============================================================================
// MatchConfig
// ============================================================================

/// Relative weight of each scheme in the combined distance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemeWeights {
    /// Weight of the average hash (default: 0.6).
    pub average: f64,
    /// Weight of the difference hash (default: 0.4).
    pub difference: f64,
    /// Weight of the DCT hash (default: 0.5).
    pub dct: f64,
}

impl Default for SchemeWeights {
    fn default() -> Self {
        Self {
            average: 0.6,
            difference: 0.4,
            dct: 0.5,
        }
    }
}

impl SchemeWeights {
    /// Weight for one scheme.
    #[must_use]
    pub fn weight(&self, scheme: HashScheme) -> f64 {
        match scheme {
            HashScheme::Average => self.average,
            HashScheme::Difference => self.difference,
            HashScheme::Dct => self.dct,
        }
    }
}

/// Matcher settings.
///
/// Distances are combined Hamming distances in bits; the quality buckets are
/// inclusive upper bounds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Largest distance reported as an exact match (default: 2).
    pub exact_max: f64,
    /// Largest distance reported as a strong match (default: 8).
    pub strong_max: f64,
    /// Largest distance reported as a match at all (default: 14).
    pub weak_max: f64,
    /// Per-scheme weights of the combined distance.
    pub weights: SchemeWeights,
    /// Number of ranked candidates kept for diagnostics (default: 3).
    pub top_k: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            exact_max: 2.0,
            strong_max: 8.0,
            weak_max: 14.0,
            weights: SchemeWeights::default(),
            top_k: 3,
        }
    }
}

impl MatchConfig {
    /// Create a new builder for `MatchConfig`.
    #[must_use]
    pub fn builder() -> MatchConfigBuilder {
        MatchConfigBuilder::default()
    }
}

/// Builder for [`MatchConfig`].
#[derive(Default)]
pub struct MatchConfigBuilder {
    exact_max: Option<f64>,
    strong_max: Option<f64>,
    weak_max: Option<f64>,
    weights: Option<SchemeWeights>,
    top_k: Option<usize>,
}

impl MatchConfigBuilder {
    /// Set the exact-match distance bound.
    #[must_use]
    pub fn exact_max(mut self, distance: f64) -> Self {
        self.exact_max = Some(distance);
        self
    }

    /// Set the strong-match distance bound.
    #[must_use]
    pub fn strong_max(mut self, distance: f64) -> Self {
        self.strong_max = Some(distance);
        self
    }

    /// Set the weak-match (acceptance) distance bound.
    #[must_use]
    pub fn weak_max(mut self, distance: f64) -> Self {
        self.weak_max = Some(distance);
        self
    }

    /// Set the scheme weights.
    #[must_use]
    pub fn weights(mut self, weights: SchemeWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Set how many ranked candidates are kept.
    #[must_use]
    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = Some(k);
        self
    }

    /// Build the configuration, using defaults for unset fields.
    #[must_use]
    pub fn build(self) -> MatchConfig {
        let d = MatchConfig::default();
        MatchConfig {
            exact_max: self.exact_max.unwrap_or(d.exact_max),
            strong_max: self.strong_max.unwrap_or(d.strong_max),
            weak_max: self.weak_max.unwrap_or(d.weak_max),
            weights: self.weights.unwrap_or(d.weights),
            top_k: self.top_k.unwrap_or(d.top_k),
        }
    }
}

// ============================================================================
// PipelineConfig
// ============================================================================

/// Pipeline-level configuration.
///
/// These settings are immutable after the `Pipeline` is constructed. Use the
/// builder pattern for ergonomic construction.
///
/// # Example
/// ```
/// use cardscan_core::config::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .edge_threshold(80)
///     .min_area_fraction(0.1)
///     .build();
/// assert_eq!(config.edge_threshold, 80);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // Preprocessing
    /// Number of 3x3 Gaussian blur passes before edge detection (default: 1).
    pub blur_radius: usize,
    /// Sobel magnitude (`|gx| + |gy|`) above which a pixel is an edge (default: 96).
    pub edge_threshold: u16,
    /// Radius of the morphological closing that joins broken card borders (default: 2).
    pub morph_radius: usize,

    // Localizer
    /// Minimum card area as a fraction of the frame area (default: 0.05).
    pub min_area_fraction: f64,
    /// Maximum card area as a fraction of the frame area (default: 0.98).
    pub max_area_fraction: f64,
    /// Maximum deviation of any interior angle from 90 degrees (default: 25).
    pub max_angle_deviation_deg: f64,
    /// Expected short/long side ratio (default: 2.5 / 3.5).
    pub aspect_ratio: f64,
    /// Relative tolerance on the side ratio (default: 0.2).
    pub aspect_tolerance: f64,
    /// Douglas-Peucker epsilon as a fraction of the contour perimeter (default: 0.02).
    pub approx_epsilon_ratio: f64,
    /// Upper bound on boundary tracing steps per component (default: 20000).
    pub max_contour_len: usize,
    /// Enable sub-pixel corner refinement (default: true).
    pub refine_corners: bool,
    /// Half-width in pixels of the band sampled around each edge during refinement (default: 4.0).
    pub refine_band: f64,
    /// Largest corner displacement accepted from refinement, in pixels (default: 4.0).
    pub refine_max_shift: f64,

    // Normalizer
    /// Canonical image width in pixels (default: 250).
    pub canonical_width: usize,
    /// Canonical image height in pixels (default: 350).
    pub canonical_height: usize,
    /// Quads with a smaller ordered area are degenerate (default: 16 px²).
    pub min_warp_area: f64,
    /// Also fingerprint the 180-degree rotation of the canonical image (default: true).
    pub rotation_invariant: bool,

    /// Fingerprint settings.
    pub fingerprint: FingerprintConfig,
    /// Matcher settings.
    pub matching: MatchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            blur_radius: 1,
            edge_threshold: 96,
            morph_radius: 2,
            min_area_fraction: 0.05,
            max_area_fraction: 0.98,
            max_angle_deviation_deg: 25.0,
            aspect_ratio: CARD_ASPECT_RATIO,
            aspect_tolerance: 0.2,
            approx_epsilon_ratio: 0.02,
            max_contour_len: 20_000,
            refine_corners: true,
            refine_band: 4.0,
            refine_max_shift: 4.0,
            canonical_width: 250,
            canonical_height: 350,
            min_warp_area: 16.0,
            rotation_invariant: true,
            fingerprint: FingerprintConfig::default(),
            matching: MatchConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Parse a (possibly partial) configuration from JSON.
    ///
    /// # Errors
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Default)]
pub struct PipelineConfigBuilder {
    blur_radius: Option<usize>,
    edge_threshold: Option<u16>,
    morph_radius: Option<usize>,
    min_area_fraction: Option<f64>,
    max_area_fraction: Option<f64>,
    max_angle_deviation_deg: Option<f64>,
    aspect_tolerance: Option<f64>,
    approx_epsilon_ratio: Option<f64>,
    max_contour_len: Option<usize>,
    refine_corners: Option<bool>,
    canonical_size: Option<(usize, usize)>,
    min_warp_area: Option<f64>,
    rotation_invariant: Option<bool>,
    fingerprint: Option<FingerprintConfig>,
    matching: Option<MatchConfig>,
}

impl PipelineConfigBuilder {
    /// Set the number of blur passes.
    #[must_use]
    pub fn blur_radius(mut self, passes: usize) -> Self {
        self.blur_radius = Some(passes);
        self
    }

    /// Set the edge magnitude threshold.
    #[must_use]
    pub fn edge_threshold(mut self, threshold: u16) -> Self {
        self.edge_threshold = Some(threshold);
        self
    }

    /// Set the closing radius.
    #[must_use]
    pub fn morph_radius(mut self, radius: usize) -> Self {
        self.morph_radius = Some(radius);
        self
    }

    /// Set the minimum card area fraction.
    #[must_use]
    pub fn min_area_fraction(mut self, fraction: f64) -> Self {
        self.min_area_fraction = Some(fraction);
        self
    }

    /// Set the maximum card area fraction.
    #[must_use]
    pub fn max_area_fraction(mut self, fraction: f64) -> Self {
        self.max_area_fraction = Some(fraction);
        self
    }

    /// Set the interior angle tolerance in degrees.
    #[must_use]
    pub fn max_angle_deviation_deg(mut self, degrees: f64) -> Self {
        self.max_angle_deviation_deg = Some(degrees);
        self
    }

    /// Set the relative aspect ratio tolerance.
    #[must_use]
    pub fn aspect_tolerance(mut self, tolerance: f64) -> Self {
        self.aspect_tolerance = Some(tolerance);
        self
    }

    /// Set the polygon approximation epsilon ratio.
    #[must_use]
    pub fn approx_epsilon_ratio(mut self, ratio: f64) -> Self {
        self.approx_epsilon_ratio = Some(ratio);
        self
    }

    /// Set the contour tracing step limit.
    #[must_use]
    pub fn max_contour_len(mut self, len: usize) -> Self {
        self.max_contour_len = Some(len);
        self
    }

    /// Enable or disable sub-pixel corner refinement.
    #[must_use]
    pub fn refine_corners(mut self, enable: bool) -> Self {
        self.refine_corners = Some(enable);
        self
    }

    /// Set the canonical image size.
    #[must_use]
    pub fn canonical_size(mut self, width: usize, height: usize) -> Self {
        self.canonical_size = Some((width, height));
        self
    }

    /// Set the minimum warpable quad area.
    #[must_use]
    pub fn min_warp_area(mut self, area: f64) -> Self {
        self.min_warp_area = Some(area);
        self
    }

    /// Enable or disable fingerprinting of the 180-degree rotation.
    #[must_use]
    pub fn rotation_invariant(mut self, enable: bool) -> Self {
        self.rotation_invariant = Some(enable);
        self
    }

    /// Set the fingerprint configuration.
    #[must_use]
    pub fn fingerprint(mut self, fingerprint: FingerprintConfig) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    /// Set the matcher configuration.
    #[must_use]
    pub fn matching(mut self, matching: MatchConfig) -> Self {
        self.matching = Some(matching);
        self
    }

    /// Build the configuration, using defaults for unset fields.
    #[must_use]
    pub fn build(self) -> PipelineConfig {
        let d = PipelineConfig::default();
        let (canonical_width, canonical_height) = self
            .canonical_size
            .unwrap_or((d.canonical_width, d.canonical_height));
        PipelineConfig {
            blur_radius: self.blur_radius.unwrap_or(d.blur_radius),
            edge_threshold: self.edge_threshold.unwrap_or(d.edge_threshold),
            morph_radius: self.morph_radius.unwrap_or(d.morph_radius),
            min_area_fraction: self.min_area_fraction.unwrap_or(d.min_area_fraction),
            max_area_fraction: self.max_area_fraction.unwrap_or(d.max_area_fraction),
            max_angle_deviation_deg: self
                .max_angle_deviation_deg
                .unwrap_or(d.max_angle_deviation_deg),
            aspect_ratio: d.aspect_ratio,
            aspect_tolerance: self.aspect_tolerance.unwrap_or(d.aspect_tolerance),
            approx_epsilon_ratio: self
                .approx_epsilon_ratio
                .unwrap_or(d.approx_epsilon_ratio),
            max_contour_len: self.max_contour_len.unwrap_or(d.max_contour_len),
            refine_corners: self.refine_corners.unwrap_or(d.refine_corners),
            refine_band: d.refine_band,
            refine_max_shift: d.refine_max_shift,
            canonical_width,
            canonical_height,
            min_warp_area: self.min_warp_area.unwrap_or(d.min_warp_area),
            rotation_invariant: self.rotation_invariant.unwrap_or(d.rotation_invariant),
            fingerprint: self.fingerprint.unwrap_or(d.fingerprint),
            matching: self.matching.unwrap_or(d.matching),
        }
    }
}
