//! Reference database: card identities, metadata, prices and fingerprints.
//!
//! The on-disk document ([`DatabaseFile`]) is produced offline by
//! [`DatabaseBuilder`] from a [`Catalog`] and a directory of clean card scans.
//! Loading validates the document into an immutable [`ReferenceDatabase`],
//! which is shared read-only by every pipeline.

use crate::config::{HashScheme, PipelineConfig};
use crate::error::{DatabaseError, Result};
use crate::fingerprint::{self, Fingerprint, FingerprintRecord};
use crate::image::Frame;
use crate::normalize::normalize_full_frame;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};

/// Identity of one printed card.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardId {
    /// Set code, e.g. `SV07`.
    pub set_code: String,
    /// Collector number within the set, e.g. `012` or `TG05`.
    pub number: String,
}

impl CardId {
    /// Create a card id.
    #[must_use]
    pub fn new(set_code: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            set_code: set_code.into(),
            number: number.into(),
        }
    }
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.set_code, self.number)
    }
}

impl Ord for CardId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.set_code
            .cmp(&other.set_code)
            .then_with(|| natural_cmp(&self.number, &other.number))
    }
}

impl PartialOrd for CardId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Numeric prefix compared by value, then the remainder lexically.
///
/// Numbers without a numeric prefix sort after those with one. Equal keys
/// fall back to plain string order so the result stays consistent with `Eq`.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    fn split(s: &str) -> (&str, &str) {
        let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        (&s[..end], &s[end..])
    }
    let (da, ra) = split(a);
    let (db, rb) = split(b);
    let value = |d: &str| {
        let t = d.trim_start_matches('0');
        (t.len(), t.to_owned())
    };
    da.is_empty()
        .cmp(&db.is_empty())
        .then_with(|| value(da).cmp(&value(db)))
        .then_with(|| ra.cmp(rb))
        .then_with(|| a.cmp(b))
}

/// Card image URLs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardImages {
    /// Thumbnail URL.
    pub small: Option<String>,
    /// Full-size URL.
    pub large: Option<String>,
}

/// Descriptive card data shown to the user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardMetadata {
    /// Card name.
    pub name: String,
    /// Supertype such as "Pokémon" or "Trainer".
    pub supertype: Option<String>,
    /// Subtypes such as "Basic" or "Stage 1".
    pub subtypes: Vec<String>,
    /// Rarity label.
    pub rarity: Option<String>,
    /// Image URLs.
    pub images: CardImages,
}

/// Market prices as of `updated_at`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSnapshot {
    /// TCGplayer market price (USD).
    pub tcgplayer: Option<f64>,
    /// Cardmarket 30-day average (EUR).
    pub cardmarket: Option<f64>,
    /// As-of date reported by the price source.
    pub updated_at: Option<String>,
}

impl PriceSnapshot {
    /// True if at least one price is present.
    #[must_use]
    pub fn has_price(&self) -> bool {
        self.tcgplayer.is_some() || self.cardmarket.is_some()
    }
}

/// Set-level information.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetInfo {
    /// Set name, e.g. "Stellar Crown".
    pub name: String,
    /// Series name, e.g. "Scarlet & Violet".
    pub series: Option<String>,
    /// Set code shared by every card of the set.
    pub set_code: String,
}

/// One loaded reference card.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceEntry {
    /// Card identity.
    pub id: CardId,
    /// Display metadata.
    pub metadata: CardMetadata,
    /// At least one fingerprint; several schemes and/or several crops.
    pub fingerprints: Vec<Fingerprint>,
    /// Price snapshot bundled with the database.
    pub prices: Option<PriceSnapshot>,
}

// ============================================================================
// On-disk document
// ============================================================================

/// One card as stored in a database file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardRecord {
    /// Card name.
    pub name: String,
    /// Collector number.
    pub number: String,
    /// Supertype.
    pub supertype: Option<String>,
    /// Subtypes.
    pub subtypes: Vec<String>,
    /// Rarity.
    pub rarity: Option<String>,
    /// Image URLs.
    pub images: CardImages,
    /// Price snapshot.
    pub market_prices: Option<PriceSnapshot>,
    /// Reference image the fingerprints were computed from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_image: Option<String>,
    /// Legacy `"<average_hex>:<difference_hex>"` pair.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<String>,
    /// Native fingerprints.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fingerprints: Vec<FingerprintRecord>,
}

impl CardRecord {
    fn has_fingerprints(&self) -> bool {
        !self.fingerprints.is_empty() || self.image_hash.is_some()
    }

    /// Decode both the native and the legacy fingerprint fields.
    fn decode_fingerprints(
        &self,
        id: &CardId,
    ) -> std::result::Result<Vec<Fingerprint>, DatabaseError> {
        let invalid = |value: &str| DatabaseError::InvalidFingerprint {
            card: id.to_string(),
            value: value.to_owned(),
        };

        let mut out = Vec::with_capacity(self.fingerprints.len() + 2);
        for record in &self.fingerprints {
            out.push(record.decode().ok_or_else(|| invalid(&record.hex))?);
        }

        if let Some(pair) = &self.image_hash {
            let (avg, diff) = pair.split_once(':').ok_or_else(|| invalid(pair))?;
            for (scheme, hex) in [(HashScheme::Average, avg), (HashScheme::Difference, diff)] {
                let size = hash_size_for_hex(hex.len()).ok_or_else(|| invalid(pair))?;
                out.push(Fingerprint::from_hex(scheme, size, hex).ok_or_else(|| invalid(pair))?);
            }
        }
        Ok(out)
    }
}

/// Grid size whose hex form has `digits` digits, if any.
fn hash_size_for_hex(digits: usize) -> Option<usize> {
    (1usize..=64).find(|n| (n * n).div_ceil(4) == digits)
}

/// Serialized reference database.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseFile {
    /// Set information.
    pub set_info: SetInfo,
    /// Hash size of every fingerprint (absent in legacy files).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_size: Option<usize>,
    /// All cards, including those without fingerprints.
    pub cards: Vec<CardRecord>,
}

impl DatabaseFile {
    /// Parse a database document.
    ///
    /// # Errors
    /// Returns [`DatabaseError::Json`] on malformed input.
    pub fn from_json_str(json: &str) -> std::result::Result<Self, DatabaseError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a database document.
    ///
    /// # Errors
    /// Returns [`DatabaseError::Io`] or [`DatabaseError::Json`].
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, DatabaseError> {
        Self::from_json_str(&read_to_string(path.as_ref())?)
    }

    /// Write the document as pretty JSON to `path` and minified JSON to the
    /// `.min.json` sibling. Returns the sibling's path.
    ///
    /// # Errors
    /// Returns [`DatabaseError::Io`] or [`DatabaseError::Json`].
    pub fn write(&self, path: impl AsRef<Path>) -> std::result::Result<PathBuf, DatabaseError> {
        let path = path.as_ref();
        let minified = path.with_extension("min.json");
        write_string(path, &serde_json::to_string_pretty(self)?)?;
        write_string(&minified, &serde_json::to_string(self)?)?;
        Ok(minified)
    }

    /// Coverage statistics over every card in the document.
    #[must_use]
    pub fn stats(&self) -> DatabaseStats {
        let mut stats = DatabaseStats {
            total_cards: self.cards.len(),
            ..DatabaseStats::default()
        };
        for card in &self.cards {
            stats.with_fingerprints += usize::from(card.has_fingerprints());
            stats.with_image_urls +=
                usize::from(card.images.small.is_some() || card.images.large.is_some());
            stats.with_prices += usize::from(
                card.market_prices
                    .as_ref()
                    .is_some_and(PriceSnapshot::has_price),
            );
        }
        stats
    }
}

/// Coverage counts of a database document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Number of cards.
    pub total_cards: usize,
    /// Cards carrying at least one fingerprint.
    pub with_fingerprints: usize,
    /// Cards with an image URL.
    pub with_image_urls: usize,
    /// Cards with at least one price.
    pub with_prices: usize,
}

impl DatabaseStats {
    /// Cards that cannot be matched.
    #[must_use]
    pub fn missing_fingerprints(&self) -> usize {
        self.total_cards - self.with_fingerprints
    }

    /// Cards without image URLs.
    #[must_use]
    pub fn missing_image_urls(&self) -> usize {
        self.total_cards - self.with_image_urls
    }

    /// Cards without any price.
    #[must_use]
    pub fn missing_prices(&self) -> usize {
        self.total_cards - self.with_prices
    }
}

// ============================================================================
// ReferenceDatabase
// ============================================================================

/// Immutable, validated set of reference cards sorted by [`CardId`].
#[derive(Clone, Debug)]
pub struct ReferenceDatabase {
    set_info: SetInfo,
    hash_size: usize,
    entries: Vec<ReferenceEntry>,
}

impl ReferenceDatabase {
    /// Validate entries into a database.
    ///
    /// Entries are sorted by id. Entries without fingerprints are dropped with
    /// a warning.
    ///
    /// # Errors
    /// - [`DatabaseError::Empty`] if no entry carries a fingerprint.
    /// - [`DatabaseError::DuplicateCard`] if an id appears twice.
    /// - [`DatabaseError::HashSizeMismatch`] if fingerprint sizes disagree.
    pub fn from_entries(
        set_info: SetInfo,
        entries: Vec<ReferenceEntry>,
    ) -> std::result::Result<Self, DatabaseError> {
        let mut entries: Vec<ReferenceEntry> = entries
            .into_iter()
            .filter(|e| {
                if e.fingerprints.is_empty() {
                    tracing::warn!(
                        card = %e.id,
                        name = %e.metadata.name,
                        "dropping entry without fingerprints"
                    );
                }
                !e.fingerprints.is_empty()
            })
            .collect();

        let hash_size = entries
            .first()
            .map(|e| e.fingerprints[0].hash_size())
            .ok_or(DatabaseError::Empty)?;
        if let Some(found) = entries
            .iter()
            .flat_map(|e| &e.fingerprints)
            .map(Fingerprint::hash_size)
            .find(|&s| s != hash_size)
        {
            return Err(DatabaseError::HashSizeMismatch {
                expected: hash_size,
                found,
            });
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = entries.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(DatabaseError::DuplicateCard(pair[0].id.to_string()));
        }

        Ok(Self {
            set_info,
            hash_size,
            entries,
        })
    }

    /// Validate a parsed document.
    ///
    /// # Errors
    /// See [`ReferenceDatabase::from_entries`]; additionally
    /// [`DatabaseError::InvalidFingerprint`] for undecodable hashes and
    /// [`DatabaseError::HashSizeMismatch`] if the document's declared hash
    /// size disagrees with its fingerprints.
    pub fn from_file(file: DatabaseFile) -> std::result::Result<Self, DatabaseError> {
        let set_code = file.set_info.set_code.clone();
        let mut entries = Vec::with_capacity(file.cards.len());
        for card in file.cards {
            let id = CardId::new(set_code.clone(), card.number.clone());
            let fingerprints = card.decode_fingerprints(&id)?;
            let stray = fingerprints
                .iter()
                .map(Fingerprint::hash_size)
                .find(|&s| Some(s) != file.hash_size);
            if let (Some(expected), Some(found)) = (file.hash_size, stray) {
                return Err(DatabaseError::HashSizeMismatch { expected, found });
            }
            entries.push(ReferenceEntry {
                id,
                prices: card.market_prices,
                fingerprints,
                metadata: CardMetadata {
                    name: card.name,
                    supertype: card.supertype,
                    subtypes: card.subtypes,
                    rarity: card.rarity,
                    images: card.images,
                },
            });
        }
        Self::from_entries(file.set_info, entries)
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// See [`ReferenceDatabase::from_file`].
    pub fn from_json_str(json: &str) -> std::result::Result<Self, DatabaseError> {
        Self::from_file(DatabaseFile::from_json_str(json)?)
    }

    /// Read, parse and validate a database file.
    ///
    /// # Errors
    /// See [`ReferenceDatabase::from_file`]; I/O failures map to [`DatabaseError::Io`].
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, DatabaseError> {
        Self::from_file(DatabaseFile::load(path)?)
    }

    /// Set information.
    #[must_use]
    pub fn set_info(&self) -> &SetInfo {
        &self.set_info
    }

    /// Hash size shared by every fingerprint.
    #[must_use]
    pub fn hash_size(&self) -> usize {
        self.hash_size
    }

    /// Entries sorted by id.
    #[must_use]
    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a constructed database.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by id.
    #[must_use]
    pub fn get(&self, id: &CardId) -> Option<&ReferenceEntry> {
        self.entries
            .binary_search_by(|e| e.id.cmp(id))
            .ok()
            .map(|i| &self.entries[i])
    }
}

// ============================================================================
// Building
// ============================================================================

/// One card of an input catalog.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogCard {
    /// Card name.
    pub name: String,
    /// Collector number.
    pub number: String,
    /// Supertype.
    pub supertype: Option<String>,
    /// Subtypes.
    pub subtypes: Vec<String>,
    /// Rarity.
    pub rarity: Option<String>,
    /// Image URLs.
    pub images: CardImages,
    /// TCGplayer market price.
    pub tcgplayer_market: Option<f64>,
    /// Cardmarket 30-day average.
    pub cardmarket_avg30: Option<f64>,
    /// As-of date of the prices.
    pub updated_at: Option<String>,
}

/// Card catalog: identities, metadata and prices of one set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    /// Set information.
    pub set_info: SetInfo,
    /// Cards of the set.
    pub cards: Vec<CatalogCard>,
}

impl Catalog {
    /// Parse a catalog document.
    ///
    /// # Errors
    /// Returns [`DatabaseError::Json`] on malformed input.
    pub fn from_json_str(json: &str) -> std::result::Result<Self, DatabaseError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a catalog file.
    ///
    /// # Errors
    /// Returns [`DatabaseError::Io`] or [`DatabaseError::Json`].
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, DatabaseError> {
        Self::from_json_str(&read_to_string(path.as_ref())?)
    }
}

/// Map zero-padded card numbers to reference image files in `dir`.
///
/// File names follow `<prefix>_<number>[_<suffix>].<ext>` with a `png`,
/// `jpg` or `jpeg` extension. Other files are ignored. When two files claim
/// the same padded number (`x_1.png` and `x_001.png`), the lexically first
/// path wins and the other is reported with a warning.
///
/// # Errors
/// Returns [`DatabaseError::Io`] if the directory cannot be read.
pub fn index_images(
    dir: impl AsRef<Path>,
) -> std::result::Result<BTreeMap<String, PathBuf>, DatabaseError> {
    let dir = dir.as_ref();
    let io_err = |source| DatabaseError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        paths.push(entry.map_err(io_err)?.path());
    }
    paths.sort();

    let mut index = BTreeMap::new();
    for path in paths {
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"));
        let number = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.split('_').nth(1))
            .filter(|n| !n.is_empty());
        let (true, Some(number)) = (is_image, number) else {
            continue;
        };
        match index.entry(pad_number(number)) {
            Entry::Vacant(slot) => {
                slot.insert(path);
            }
            Entry::Occupied(slot) => tracing::warn!(
                number = %slot.key(),
                kept = %slot.get().display(),
                ignored = %path.display(),
                "several reference images share a card number"
            ),
        }
    }
    Ok(index)
}

/// Left-pad a card number with zeros to three characters.
#[must_use]
pub fn pad_number(number: &str) -> String {
    format!("{number:0>3}")
}

/// Builds database documents from a catalog and reference scans.
///
/// Uses the same normalizer and fingerprint function as the query path, so
/// a builder and a pipeline sharing a [`PipelineConfig`] produce comparable
/// fingerprints.
#[derive(Clone, Debug, Default)]
pub struct DatabaseBuilder {
    config: PipelineConfig,
}

impl DatabaseBuilder {
    /// Create a builder.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Fingerprint a clean reference scan (the whole frame is the card).
    ///
    /// # Errors
    /// Returns [`crate::Error::DegenerateGeometry`] for frames too small to warp.
    pub fn fingerprint_scan(&self, frame: &Frame) -> Result<Vec<Fingerprint>> {
        let canonical = normalize_full_frame(frame, &self.config)?;
        Ok(fingerprint::compute_set(&canonical, &self.config.fingerprint).fingerprints)
    }

    /// Build a document from a catalog.
    ///
    /// `images` maps zero-padded numbers to files (see [`index_images`]);
    /// `decode` turns a file into a frame. Cards without an image, or whose
    /// image fails to decode or warp, are kept without fingerprints and
    /// reported with a warning.
    pub fn build<F, E>(
        &self,
        catalog: &Catalog,
        images: &BTreeMap<String, PathBuf>,
        mut decode: F,
    ) -> DatabaseFile
    where
        F: FnMut(&Path) -> std::result::Result<Frame, E>,
        E: std::fmt::Display,
    {
        let _span = tracing::info_span!("build_database", cards = catalog.cards.len()).entered();
        let mut cards = Vec::with_capacity(catalog.cards.len());

        for card in &catalog.cards {
            let mut record = CardRecord {
                name: card.name.clone(),
                number: card.number.clone(),
                supertype: card.supertype.clone(),
                subtypes: card.subtypes.clone(),
                rarity: card.rarity.clone(),
                images: card.images.clone(),
                market_prices: Some(PriceSnapshot {
                    tcgplayer: card.tcgplayer_market,
                    cardmarket: card.cardmarket_avg30,
                    updated_at: card.updated_at.clone(),
                })
                .filter(PriceSnapshot::has_price),
                ..CardRecord::default()
            };

            match images.get(&pad_number(&card.number)) {
                None => tracing::warn!(number = %card.number, "no reference image"),
                Some(path) => match decode(path) {
                    Err(e) => tracing::warn!(path = %path.display(), "failed to decode image: {e}"),
                    Ok(frame) => match self.fingerprint_scan(&frame) {
                        Err(e) => {
                            tracing::warn!(path = %path.display(), "failed to fingerprint: {e}");
                        }
                        Ok(fps) => {
                            tracing::debug!(number = %card.number, "processed card");
                            record.local_image = Some(path.display().to_string());
                            record.fingerprints =
                                fps.into_iter().map(FingerprintRecord::from).collect();
                        }
                    },
                },
            }
            cards.push(record);
        }

        DatabaseFile {
            set_info: catalog.set_info.clone(),
            hash_size: Some(self.config.fingerprint.hash_size),
            cards,
        }
    }
}

fn read_to_string(path: &Path) -> std::result::Result<String, DatabaseError> {
    std::fs::read_to_string(path).map_err(|source| DatabaseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_string(path: &Path, contents: &str) -> std::result::Result<(), DatabaseError> {
    std::fs::write(path, contents).map_err(|source| DatabaseError::Io {
        path: path.to_path_buf(),
        source,
    })
}
