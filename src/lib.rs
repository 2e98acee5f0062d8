//! Artwork identification for museum installation photos.
//!
//! A photo of a gallery wall goes through three stages: a detector proposes
//! candidate bounding boxes, a feature extractor turns each crop into an
//! embedding plus a dominant-color palette, and the catalog index retrieves
//! the nearest reference artworks. The matcher combines detection and
//! similarity confidence, de-duplicates overlapping hits of the same
//! artwork, and records accepted appearances with full provenance.

pub mod config;
pub mod db;
pub mod detection;
pub mod error;
pub mod features;
pub mod geometry;
pub mod index;
pub mod logging;
pub mod matching;
pub mod pipeline;

pub use config::Config;
pub use db::Database;
pub use error::{DetectionFailure, ExtractionFailure, MatchError};
pub use geometry::NormalizedBox;
pub use index::CatalogIndex;
pub use matching::Matcher;
