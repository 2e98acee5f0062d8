//! Artwork resolution: turn one installation photo into recorded appearances.
//!
//! The matcher drives the whole per-photo pipeline: advance the photo to
//! processing, detect candidate boxes, embed each crop, query the catalog
//! index, score and deduplicate the candidates, then persist the accepted
//! appearances and advance the photo to done. Any photo-level failure marks
//! the photo failed with its error message; box-level failures drop only
//! the offending box.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::anyhow;
use image::GenericImageView;
use rayon::prelude::*;

use crate::config::{Config, ContextFlagsConfig, MatchingConfig};
use crate::db::{
    ArtworkAppearance, ContextFlags, Database, InstallationPhoto, LightingQuality,
    OcclusionLevel, PhotoStatus, VerificationStatus,
};
use crate::detection::Detector;
use crate::error::{DetectionFailure, MatchError, Stage};
use crate::features::FeatureExtractor;
use crate::geometry::NormalizedBox;
use crate::index::CatalogIndex;

/// Cancellation flag and deadline for one resolve run, checked at stage
/// boundaries. A model call already in flight is allowed to finish; the run
/// stops before the next stage starts.
#[derive(Clone, Default)]
pub struct RunGuard {
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl RunGuard {
    pub fn new(cancel: Option<Arc<AtomicBool>>, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    /// No cancellation, no deadline.
    pub fn unbounded() -> Self {
        Self::default()
    }

    fn check(&self, stage: Stage) -> Result<(), MatchError> {
        if let Some(cancel) = &self.cancel {
            if cancel.load(Ordering::Relaxed) {
                return Err(MatchError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(MatchError::Timeout { stage });
            }
        }
        Ok(())
    }
}

/// An accepted candidate before duplicate collapsing.
struct Candidate {
    /// Position in the detector's output, used as a deterministic tie-break.
    ordinal: usize,
    bbox: NormalizedBox,
    artwork_id: i64,
    detection_confidence: f32,
    combined_confidence: f32,
}

/// The identification pipeline for installation photos.
pub struct Matcher {
    db: Arc<Mutex<Database>>,
    detector: Arc<dyn Detector>,
    extractor: Arc<dyn FeatureExtractor>,
    index: Arc<CatalogIndex>,
    matching: MatchingConfig,
    context_flags: ContextFlagsConfig,
}

impl Matcher {
    pub fn new(
        db: Arc<Mutex<Database>>,
        detector: Arc<dyn Detector>,
        extractor: Arc<dyn FeatureExtractor>,
        index: Arc<CatalogIndex>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            detector,
            extractor,
            index,
            matching: config.matching.clone(),
            context_flags: config.context_flags.clone(),
        }
    }

    pub fn index(&self) -> &Arc<CatalogIndex> {
        &self.index
    }

    /// Rebuild the catalog index from stored reference embeddings. Entries
    /// written by a different extractor version are skipped with a warning
    /// instead of polluting similarity scores.
    pub fn rebuild_index(&self) -> anyhow::Result<()> {
        let stored = self.lock_db().get_all_reference_embeddings()?;

        let mut entries = Vec::with_capacity(stored.len());
        for record in stored {
            if record.extractor_version != self.extractor.version() {
                tracing::warn!(
                    artwork_id = record.artwork_id,
                    stored_version = %record.extractor_version,
                    current_version = %self.extractor.version(),
                    "skipping embedding from a different extractor, reindex this artwork"
                );
                continue;
            }
            if record.vector.len() != self.extractor.dimension() {
                tracing::warn!(
                    artwork_id = record.artwork_id,
                    dim = record.vector.len(),
                    "skipping embedding with unexpected dimensionality"
                );
                continue;
            }
            entries.push((record.artwork_id, record.vector));
        }

        self.index.load(entries);
        Ok(())
    }

    /// Re-embed an artwork's reference image and refresh both the store and
    /// the live index. Used at catalog ingestion and after a reference image
    /// or extractor change.
    pub fn reindex_artwork(&self, artwork_id: i64) -> anyhow::Result<()> {
        let artwork = self
            .lock_db()
            .get_artwork(artwork_id)?
            .ok_or_else(|| anyhow!("artwork {} not found", artwork_id))?;

        let path = artwork
            .reference_image_path
            .ok_or_else(|| anyhow!("artwork {} has no reference image", artwork_id))?;

        let img = image::open(&path)
            .map_err(|e| anyhow!("cannot read reference image {}: {}", path, e))?;
        let embedding = self
            .extractor
            .embed(&img)
            .map_err(|e| anyhow!("reference embedding failed for artwork {}: {}", artwork_id, e))?;

        self.lock_db().update_artwork_embedding(
            artwork_id,
            &embedding.vector,
            self.extractor.version(),
            &embedding.palette,
        )?;
        self.index.insert(artwork_id, embedding.vector);

        tracing::info!(artwork_id, "Reference embedding refreshed");
        Ok(())
    }

    /// Remove an artwork from the catalog and the live index. Cascades to
    /// its recorded appearances.
    pub fn retire_artwork(&self, artwork_id: i64) -> anyhow::Result<bool> {
        let deleted = self.lock_db().delete_artwork(artwork_id)?;
        if deleted {
            self.index.remove(artwork_id);
        }
        Ok(deleted)
    }

    /// Resolve one pending photo end to end: detect, match, record, and
    /// advance the status to done. Returns the committed appearances.
    pub fn resolve(&self, photo_id: i64) -> Result<Vec<ArtworkAppearance>, MatchError> {
        self.resolve_with(photo_id, &RunGuard::unbounded())
    }

    /// [`Matcher::resolve`] with an explicit cancellation flag and deadline.
    pub fn resolve_with(
        &self,
        photo_id: i64,
        guard: &RunGuard,
    ) -> Result<Vec<ArtworkAppearance>, MatchError> {
        let photo = {
            let db = self.lock_db();
            let photo = db
                .get_photo(photo_id)?
                .ok_or(MatchError::PhotoNotFound(photo_id))?;
            if photo.status != PhotoStatus::Pending {
                return Err(MatchError::InvalidStatus {
                    id: photo_id,
                    status: photo.status.to_string(),
                });
            }
            db.set_photo_status(photo_id, PhotoStatus::Processing, None)?;
            photo
        };

        let appearances = match self.run_pipeline(&photo, guard) {
            Ok(appearances) => appearances,
            Err(e) => {
                self.fail_photo(photo_id, &e.to_string());
                return Err(e);
            }
        };

        if let Err(e) = guard.check(Stage::Persistence) {
            self.fail_photo(photo_id, &e.to_string());
            return Err(e);
        }

        let saved = match self.record(photo_id, &appearances) {
            Ok(saved) => saved,
            Err(source) => {
                self.fail_photo(photo_id, &format!("persistence failed: {source}"));
                return Err(MatchError::Persistence { source, appearances });
            }
        };

        if let Err(e) = self
            .lock_db()
            .set_photo_status(photo_id, PhotoStatus::Done, None)
        {
            self.fail_photo(photo_id, "could not mark photo done");
            return Err(MatchError::Storage(e));
        }

        tracing::info!(photo = photo_id, appearances = saved.len(), "Photo resolved");
        Ok(saved)
    }

    /// Detection through scoring, without any persistence.
    fn run_pipeline(
        &self,
        photo: &InstallationPhoto,
        guard: &RunGuard,
    ) -> Result<Vec<ArtworkAppearance>, MatchError> {
        guard.check(Stage::Detection)?;

        let img = image::open(&photo.image_path)
            .map_err(|e| MatchError::Detection(DetectionFailure::UnreadableImage(e.to_string())))?;

        let detections = self.detector.detect(&img)?;
        tracing::debug!(photo = photo.id, candidates = detections.len(), "Detection complete");

        // A photo of an empty wall resolves cleanly with no appearances.
        if detections.is_empty() {
            return Ok(Vec::new());
        }

        guard.check(Stage::Extraction)?;
        if !self.index.is_ready() {
            return Err(MatchError::IndexUnavailable(
                "index has not been built".to_string(),
            ));
        }

        let (img_w, img_h) = img.dimensions();
        let candidates: Vec<Candidate> = detections
            .par_iter()
            .enumerate()
            .filter_map(|(ordinal, detection)| {
                let (x, y, w, h) = detection.bbox.to_pixels(img_w, img_h);
                let crop = img.crop_imm(x, y, w, h);

                let embedding = match self.extractor.embed(&crop) {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        // Box-level failure: drop this candidate, keep the rest.
                        tracing::warn!(photo = photo.id, ordinal, error = %e, "dropping candidate box");
                        return None;
                    }
                };

                let hits = self
                    .index
                    .search(&embedding.vector, self.matching.top_k)
                    .ok()?;
                let top = hits.first()?;

                let combined = self.matching.detection_weight * detection.score
                    + self.matching.similarity_weight * top.similarity;
                if combined < self.matching.acceptance_threshold {
                    tracing::debug!(
                        photo = photo.id,
                        ordinal,
                        combined,
                        "candidate below acceptance threshold"
                    );
                    return None;
                }

                Some(Candidate {
                    ordinal,
                    bbox: detection.bbox,
                    artwork_id: top.artwork_id,
                    detection_confidence: detection.score,
                    combined_confidence: combined,
                })
            })
            .collect();

        guard.check(Stage::Search)?;

        let kept = collapse_duplicates(candidates, self.matching.duplicate_iou);

        let boxes: Vec<NormalizedBox> = kept.iter().map(|c| c.bbox).collect();
        let appearances = kept
            .iter()
            .enumerate()
            .map(|(i, candidate)| ArtworkAppearance {
                id: None,
                artwork_id: candidate.artwork_id,
                photo_id: photo.id,
                bbox: candidate.bbox,
                detection_confidence: candidate.detection_confidence,
                matching_confidence: candidate.combined_confidence,
                verification: VerificationStatus::Unverified,
                verified_by: None,
                verified_at: None,
                context: self.context_for(&candidate.bbox, &boxes, i, photo.quality_score),
            })
            .collect();

        Ok(appearances)
    }

    /// Derive visual-context flags for one accepted box.
    fn context_for(
        &self,
        bbox: &NormalizedBox,
        all_boxes: &[NormalizedBox],
        own_index: usize,
        quality_score: f64,
    ) -> ContextFlags {
        let rules = &self.context_flags;

        let overlap = all_boxes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != own_index)
            .map(|(_, other)| bbox.overlap_fraction(other))
            .fold(0.0f32, f32::max);

        let occlusion = if overlap > rules.heavy_occlusion_above {
            OcclusionLevel::Heavy
        } else if overlap > rules.partial_occlusion_above {
            OcclusionLevel::Partial
        } else {
            OcclusionLevel::None
        };

        let lighting = if quality_score < rules.poor_quality_below as f64 {
            LightingQuality::Poor
        } else if quality_score < rules.moderate_quality_below as f64 {
            LightingQuality::Moderate
        } else {
            LightingQuality::Good
        };

        ContextFlags {
            occlusion,
            lighting,
            partial_visibility: bbox.near_frame_edge(rules.edge_margin),
        }
    }

    /// Replace any previous run's rows with this run's, atomically. A
    /// rejected row rolls back the whole batch, so a failed resolve never
    /// leaves a partial set behind, and re-resolving a photo never
    /// accumulates duplicates.
    fn record(
        &self,
        photo_id: i64,
        appearances: &[ArtworkAppearance],
    ) -> anyhow::Result<Vec<ArtworkAppearance>> {
        let ids = self
            .lock_db()
            .replace_appearances_for_photo(photo_id, appearances)?;

        Ok(appearances
            .iter()
            .zip(ids)
            .map(|(appearance, id)| ArtworkAppearance {
                id: Some(id),
                ..appearance.clone()
            })
            .collect())
    }

    fn fail_photo(&self, photo_id: i64, message: &str) {
        if let Err(e) = self
            .lock_db()
            .set_photo_status(photo_id, PhotoStatus::Failed, Some(message))
        {
            tracing::error!(photo = photo_id, error = %e, "could not mark photo failed");
        }
    }

    fn lock_db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Two accepted boxes claiming the same artwork and overlapping above the
/// duplicate threshold are one physical sighting: keep the higher-confidence
/// box. Equal confidences keep the earlier detector ordinal, so the outcome
/// is deterministic.
fn collapse_duplicates(mut candidates: Vec<Candidate>, duplicate_iou: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.combined_confidence
            .partial_cmp(&a.combined_confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.ordinal.cmp(&b.ordinal))
    });

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let duplicate = kept.iter().any(|k| {
            k.artwork_id == candidate.artwork_id && k.bbox.iou(&candidate.bbox) > duplicate_iou
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(ordinal: usize, artwork_id: i64, bbox: NormalizedBox, combined: f32) -> Candidate {
        Candidate {
            ordinal,
            bbox,
            artwork_id,
            detection_confidence: 0.8,
            combined_confidence: combined,
        }
    }

    #[test]
    fn test_collapse_keeps_higher_confidence() {
        let a = NormalizedBox::new(0.10, 0.10, 0.3, 0.3).unwrap();
        let b = NormalizedBox::new(0.12, 0.11, 0.3, 0.3).unwrap();

        let kept = collapse_duplicates(
            vec![candidate(0, 7, a, 0.6), candidate(1, 7, b, 0.9)],
            0.5,
        );
        assert_eq!(kept.len(), 1);
        assert!((kept[0].combined_confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_collapse_spares_different_artworks() {
        let a = NormalizedBox::new(0.10, 0.10, 0.3, 0.3).unwrap();
        let b = NormalizedBox::new(0.12, 0.11, 0.3, 0.3).unwrap();

        let kept = collapse_duplicates(
            vec![candidate(0, 7, a, 0.6), candidate(1, 8, b, 0.9)],
            0.5,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_collapse_spares_distant_same_artwork() {
        // A diptych: the same artwork legitimately appears twice.
        let a = NormalizedBox::new(0.05, 0.2, 0.25, 0.4).unwrap();
        let b = NormalizedBox::new(0.60, 0.2, 0.25, 0.4).unwrap();

        let kept = collapse_duplicates(
            vec![candidate(0, 7, a, 0.8), candidate(1, 7, b, 0.7)],
            0.5,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_collapse_tie_breaks_by_ordinal() {
        let a = NormalizedBox::new(0.10, 0.10, 0.3, 0.3).unwrap();
        let b = NormalizedBox::new(0.12, 0.11, 0.3, 0.3).unwrap();

        for _ in 0..5 {
            let kept = collapse_duplicates(
                vec![candidate(0, 7, a, 0.75), candidate(1, 7, b, 0.75)],
                0.5,
            );
            assert_eq!(kept.len(), 1);
            assert_eq!(kept[0].ordinal, 0);
        }
    }

    #[test]
    fn test_guard_cancellation() {
        let cancel = Arc::new(AtomicBool::new(false));
        let guard = RunGuard::new(Some(cancel.clone()), None);
        assert!(guard.check(Stage::Detection).is_ok());

        cancel.store(true, Ordering::Relaxed);
        assert!(matches!(
            guard.check(Stage::Detection),
            Err(MatchError::Cancelled)
        ));
    }

    #[test]
    fn test_guard_deadline() {
        let guard = RunGuard::new(None, Some(Instant::now() - std::time::Duration::from_secs(1)));
        assert!(matches!(
            guard.check(Stage::Extraction),
            Err(MatchError::Timeout { stage: Stage::Extraction })
        ));

        let far = Instant::now() + std::time::Duration::from_secs(3600);
        assert!(RunGuard::new(None, Some(far)).check(Stage::Search).is_ok());
    }
}
