//! Nearest-neighbour search of query fingerprints against the reference database.

use crate::config::{HashScheme, MatchConfig};
use crate::database::{CardId, CardMetadata, PriceSnapshot, ReferenceDatabase, ReferenceEntry};
use crate::fingerprint::FingerprintSet;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;

/// Match quality bucket derived from the combined distance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Above `weak_max`: not a match.
    None,
    /// `strong_max < d <= weak_max`.
    Weak,
    /// `exact_max < d <= strong_max`.
    Strong,
    /// `d <= exact_max`.
    Exact,
}

/// Price attached to a result.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Price {
    /// A snapshot is known for the card.
    Available(PriceSnapshot),
    /// No price source knows the card.
    Unavailable,
}

/// External price lookup.
pub trait PriceSource: Send + Sync {
    /// Current prices for a card, if known.
    fn price(&self, id: &CardId) -> Option<PriceSnapshot>;
}

impl PriceSource for ReferenceDatabase {
    fn price(&self, id: &CardId) -> Option<PriceSnapshot> {
        self.get(id).and_then(|e| e.prices.clone())
    }
}

/// Identified card.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchedCard {
    /// Card identity.
    pub id: CardId,
    /// Display metadata.
    pub metadata: CardMetadata,
}

/// Outcome of one identification.
///
/// "No card" and "no price" are ordinary values of this type, not errors.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchResult {
    /// True if the best candidate is within `weak_max`.
    pub matched: bool,
    /// The best candidate, present only when `matched`.
    pub card: Option<MatchedCard>,
    /// Price of the matched card.
    pub price: Price,
    /// Combined distance of the best candidate; `None` if nothing was compared.
    pub distance: Option<f64>,
    /// `1 - distance / bit_length`, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Quality bucket.
    pub quality: Quality,
}

impl MatchResult {
    /// Result for a frame in which nothing could be compared.
    #[must_use]
    pub fn no_match() -> Self {
        Self {
            matched: false,
            card: None,
            price: Price::Unavailable,
            distance: None,
            confidence: 0.0,
            quality: Quality::None,
        }
    }
}

/// One ranked database entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Candidate {
    /// Index into [`ReferenceDatabase::entries`].
    #[serde(skip)]
    pub index: usize,
    /// Card identity.
    pub id: CardId,
    /// Card name.
    pub name: String,
    /// Combined weighted distance in bits.
    pub distance: f64,
    /// Confidence derived from `distance`.
    pub confidence: f64,
}

/// `clamp(1 - distance / bit_len, 0, 1)`.
#[must_use]
pub fn confidence(distance: f64, bit_len: usize) -> f64 {
    if bit_len == 0 {
        return 0.0;
    }
    (1.0 - distance / bit_len as f64).clamp(0.0, 1.0)
}

/// Ranks database entries by combined fingerprint distance.
#[derive(Clone, Debug)]
pub struct Matcher {
    database: Arc<ReferenceDatabase>,
    config: MatchConfig,
}

impl Matcher {
    /// Create a matcher over a shared database.
    #[must_use]
    pub fn new(database: Arc<ReferenceDatabase>, config: MatchConfig) -> Self {
        Self { database, config }
    }

    /// The database being searched.
    #[must_use]
    pub fn database(&self) -> &ReferenceDatabase {
        &self.database
    }

    /// Bits per fingerprint in the database.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.database.hash_size() * self.database.hash_size()
    }

    /// Quality bucket for a combined distance.
    #[must_use]
    pub fn quality(&self, distance: f64) -> Quality {
        let c = &self.config;
        if distance <= c.exact_max {
            Quality::Exact
        } else if distance <= c.strong_max {
            Quality::Strong
        } else if distance <= c.weak_max {
            Quality::Weak
        } else {
            Quality::None
        }
    }

    /// Combined distance between query variants and one entry.
    ///
    /// For each scheme the minimum Hamming distance over every (entry
    /// fingerprint, query variant) pair is taken; scheme distances are then
    /// averaged with the configured weights. `None` if no scheme is shared.
    #[must_use]
    pub fn entry_distance(&self, query: &[FingerprintSet], entry: &ReferenceEntry) -> Option<f64> {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for &scheme in HashScheme::all() {
            let best = entry
                .fingerprints
                .iter()
                .filter(|f| f.scheme() == scheme)
                .flat_map(|f| query.iter().filter_map(move |q| q.get(scheme)?.distance(f)))
                .min();
            if let Some(d) = best {
                let w = self.config.weights.weight(scheme);
                weighted += w * f64::from(d);
                total_weight += w;
            }
        }
        (total_weight > 0.0).then(|| weighted / total_weight)
    }

    /// Every comparable entry, sorted by distance then card id.
    #[must_use]
    pub fn rank(&self, query: &[FingerprintSet]) -> Vec<Candidate> {
        let bit_len = self.bit_len();
        let mut candidates: Vec<Candidate> = self
            .database
            .entries()
            .par_iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let distance = self.entry_distance(query, entry)?;
                Some(Candidate {
                    index,
                    id: entry.id.clone(),
                    name: entry.metadata.name.clone(),
                    distance,
                    confidence: confidence(distance, bit_len),
                })
            })
            .collect();
        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.id.cmp(&b.id)));
        candidates
    }

    /// Best match plus the top-k candidates.
    ///
    /// Prices come from `prices` when given, falling back to the entry's own
    /// snapshot. Snapshots with neither price resolve to [`Price::Unavailable`].
    #[must_use]
    pub fn find_match(
        &self,
        query: &[FingerprintSet],
        prices: Option<&dyn PriceSource>,
    ) -> (MatchResult, Vec<Candidate>) {
        let mut ranked = self.rank(query);

        for (i, c) in ranked.iter().take(3).enumerate() {
            tracing::debug!(
                rank = i + 1,
                name = %c.name,
                number = %c.id.number,
                distance = c.distance,
                "candidate"
            );
        }

        let Some(best) = ranked.first() else {
            return (MatchResult::no_match(), ranked);
        };

        let quality = self.quality(best.distance);
        let mut result = MatchResult {
            matched: quality != Quality::None,
            card: None,
            price: Price::Unavailable,
            distance: Some(best.distance),
            confidence: best.confidence,
            quality,
        };

        if result.matched {
            let entry = &self.database.entries()[best.index];
            // A snapshot without any price counts as missing.
            let snapshot = prices
                .and_then(|p| p.price(&entry.id))
                .filter(PriceSnapshot::has_price)
                .or_else(|| entry.prices.clone().filter(PriceSnapshot::has_price));
            result.price = snapshot.map_or(Price::Unavailable, Price::Available);
            result.card = Some(MatchedCard {
                id: entry.id.clone(),
                metadata: entry.metadata.clone(),
            });
        }

        ranked.truncate(self.config.top_k.max(1));
        (result, ranked)
    }
}
