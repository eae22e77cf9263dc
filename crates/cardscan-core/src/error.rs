//! Error types for the recognition pipeline and the reference database.
//!
//! "No card in frame" and "price unavailable" are not errors: they are
//! ordinary outcomes carried by [`crate::MatchResult`].

use std::path::PathBuf;

/// Errors surfaced by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input frame is malformed (zero size, wrong buffer length, unsupported channels).
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// The quadrilateral cannot be warped (near-zero area or singular homography).
    #[error("degenerate card geometry")]
    DegenerateGeometry,
    /// The reference database could not be loaded or validated.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Reference database load and validation failures.
///
/// All of these are fatal at startup: a partially loaded database is never served.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Reading the database file failed.
    #[error("failed to read database {path}: {source}")]
    Io {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The database is not valid JSON or does not follow the schema.
    #[error("malformed database: {0}")]
    Json(#[from] serde_json::Error),
    /// No entry carries a fingerprint.
    #[error("reference database is empty")]
    Empty,
    /// A fingerprint string could not be decoded.
    #[error("card {card}: invalid fingerprint {value:?}")]
    InvalidFingerprint {
        /// Card the fingerprint belongs to.
        card: String,
        /// Offending value.
        value: String,
    },
    /// Fingerprints of different sizes were found in one database, or the
    /// database hash size differs from the configured one.
    #[error("hash size mismatch: expected {expected}, found {found}")]
    HashSizeMismatch {
        /// Hash size the pipeline is configured for.
        expected: usize,
        /// Hash size found in the database.
        found: usize,
    },
    /// The same card identity appears twice.
    #[error("duplicate card {0}")]
    DuplicateCard(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
