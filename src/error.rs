//! Failure taxonomy for the identification pipeline.
//!
//! Box-level problems (a degenerate crop) stay at the box level and never
//! abort a photo. Photo-level problems update the photo's persisted status
//! so batch jobs can query and retry failed photos explicitly. Retry policy
//! belongs to the caller; nothing in here retries.

use thiserror::Error;

use crate::db::ArtworkAppearance;

/// Pipeline stage names used in timeout reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detection,
    Extraction,
    Search,
    Persistence,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Detection => "detection",
            Stage::Extraction => "extraction",
            Stage::Search => "search",
            Stage::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

/// Failure while detecting candidate boxes. Fatal for the current photo
/// only; the caller marks the photo failed and moves on.
#[derive(Debug, Error)]
pub enum DetectionFailure {
    #[error("cannot decode image: {0}")]
    UnreadableImage(String),

    #[error("detection model error: {0}")]
    Model(String),
}

/// Photo-level failure while resolving appearances.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The image could not be decoded or the detection model errored.
    /// Fatal for the current photo only; the photo is marked failed and the
    /// batch continues.
    #[error("detection failed: {0}")]
    Detection(#[from] DetectionFailure),

    /// The catalog index has not been built or is corrupted. Fatal to the
    /// current resolve call, no partial results.
    #[error("catalog index unavailable: {0}")]
    IndexUnavailable(String),

    /// The store rejected a write. Carries the computed-but-unsaved
    /// appearances so the caller can retry without recomputation.
    #[error("failed to persist appearances: {source}")]
    Persistence {
        source: anyhow::Error,
        appearances: Vec<ArtworkAppearance>,
    },

    /// The per-photo deadline elapsed at a stage boundary.
    #[error("{stage} stage exceeded the photo deadline")]
    Timeout { stage: Stage },

    /// Processing was cancelled between stages.
    #[error("processing cancelled")]
    Cancelled,

    #[error("photo {0} not found")]
    PhotoNotFound(i64),

    #[error("photo {id} is already {status}, refusing to reprocess")]
    InvalidStatus { id: i64, status: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Box-level failure during feature extraction. The offending candidate box
/// is dropped; the rest of the photo is unaffected.
#[derive(Debug, Error)]
pub enum ExtractionFailure {
    #[error("zero-area region {width}x{height}")]
    DegenerateRegion { width: u32, height: u32 },

    #[error("embedding model error: {0}")]
    Model(String),

    #[error("extractor produced {got}-dim vector, expected {expected}")]
    DimensionMismatch { got: usize, expected: usize },
}
