//! Batch processing of installation photos over a worker pool.
//!
//! Photos are independent jobs: a pool of workers pulls ids from a bounded
//! queue and runs each through the matcher with a per-photo deadline and a
//! shared cancellation flag. One photo failing never stops the batch, and
//! cancellation stops workers at the next stage boundary while photos not
//! yet started stay pending. A watchdog thread marks any photo failed as
//! soon as its deadline elapses, even while its worker is still stuck
//! inside a model call, so nothing is ever left at processing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;
use crate::db::{Database, PhotoStatus};
use crate::error::MatchError;
use crate::matching::{Matcher, RunGuard};

/// How often the watchdog scans in-flight photos for elapsed deadlines.
const WATCHDOG_POLL: Duration = Duration::from_millis(200);

/// Progress reporting for batch runs, sent over a channel so callers can
/// render it however they like.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started { photo_id: i64 },
    Resolved { photo_id: i64, appearances: usize },
    Failed { photo_id: i64, error: String },
    Skipped { photo_id: i64, reason: String },
    Finished { outcome: BatchOutcome },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub resolved: usize,
    pub failed: usize,
    /// Photos that were gone or no longer pending when a worker reached them.
    pub skipped: usize,
}

/// Worker pool driving the matcher over many photos.
pub struct BatchProcessor {
    db: Arc<Mutex<Database>>,
    matcher: Arc<Matcher>,
    config: PipelineConfig,
    cancel: Arc<AtomicBool>,
}

impl BatchProcessor {
    pub fn new(db: Arc<Mutex<Database>>, matcher: Arc<Matcher>, config: PipelineConfig) -> Self {
        Self {
            db,
            matcher,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with every in-flight run; setting it stops the batch at
    /// the next stage boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Process every pending photo, up to `limit`.
    pub fn process_pending(
        &self,
        limit: usize,
        events: Option<mpsc::Sender<BatchEvent>>,
    ) -> anyhow::Result<BatchOutcome> {
        let ids: Vec<i64> = {
            let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
            db.pending_photos(limit)?.iter().map(|p| p.id).collect()
        };
        Ok(self.process(ids, events))
    }

    /// Run the given photos through the matcher on the worker pool.
    pub fn process(&self, photo_ids: Vec<i64>, events: Option<mpsc::Sender<BatchEvent>>) -> BatchOutcome {
        let workers = self.config.workers.max(1);
        let timeout = Duration::from_secs(self.config.photo_timeout_secs);

        let (job_tx, job_rx) = mpsc::sync_channel::<i64>(self.config.queue_depth.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));

        let resolved = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);

        // Photo id → deadline for every resolve currently in flight; the
        // watchdog fails photos whose deadline passes while the worker is
        // still blocked.
        let in_flight: Mutex<HashMap<i64, Instant>> = Mutex::new(HashMap::new());
        let workers_alive = AtomicUsize::new(workers);

        tracing::info!(photos = photo_ids.len(), workers, "Starting batch run");

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let events = events.clone();
                let (resolved, failed, skipped) = (&resolved, &failed, &skipped);
                let (in_flight, workers_alive) = (&in_flight, &workers_alive);

                scope.spawn(move || {
                    loop {
                        if self.cancel.load(Ordering::Relaxed) {
                            break;
                        }

                        let photo_id = {
                            let rx = job_rx.lock().unwrap_or_else(|e| e.into_inner());
                            match rx.recv() {
                                Ok(id) => id,
                                Err(_) => break,
                            }
                        };

                        send_event(&events, BatchEvent::Started { photo_id });

                        let deadline = Instant::now() + timeout;
                        in_flight
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(photo_id, deadline);

                        let guard = RunGuard::new(Some(self.cancel.clone()), Some(deadline));
                        let result = self.matcher.resolve_with(photo_id, &guard);

                        in_flight
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .remove(&photo_id);

                        match result {
                            Ok(appearances) => {
                                resolved.fetch_add(1, Ordering::Relaxed);
                                send_event(
                                    &events,
                                    BatchEvent::Resolved {
                                        photo_id,
                                        appearances: appearances.len(),
                                    },
                                );
                            }
                            Err(
                                e @ (MatchError::PhotoNotFound(_)
                                | MatchError::InvalidStatus { .. }),
                            ) => {
                                skipped.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(photo = photo_id, reason = %e, "skipping photo");
                                send_event(
                                    &events,
                                    BatchEvent::Skipped {
                                        photo_id,
                                        reason: e.to_string(),
                                    },
                                );
                            }
                            Err(e) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                tracing::warn!(photo = photo_id, error = %e, "photo failed");
                                send_event(
                                    &events,
                                    BatchEvent::Failed {
                                        photo_id,
                                        error: e.to_string(),
                                    },
                                );
                            }
                        }
                    }
                    workers_alive.fetch_sub(1, Ordering::Relaxed);
                });
            }

            {
                let (in_flight, workers_alive) = (&in_flight, &workers_alive);
                scope.spawn(move || {
                    while workers_alive.load(Ordering::Relaxed) > 0 {
                        std::thread::sleep(WATCHDOG_POLL);

                        let now = Instant::now();
                        let expired: Vec<i64> = {
                            let mut map = in_flight.lock().unwrap_or_else(|e| e.into_inner());
                            let ids: Vec<i64> = map
                                .iter()
                                .filter(|(_, deadline)| now >= **deadline)
                                .map(|(id, _)| *id)
                                .collect();
                            for id in &ids {
                                map.remove(id);
                            }
                            ids
                        };

                        for photo_id in expired {
                            tracing::warn!(photo = photo_id, "Photo deadline elapsed");
                            let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
                            if let Err(e) = db.set_photo_status(
                                photo_id,
                                PhotoStatus::Failed,
                                Some("photo deadline exceeded"),
                            ) {
                                // The worker settled the photo first.
                                tracing::debug!(photo = photo_id, error = %e, "photo already settled");
                            }
                        }
                    }
                });
            }

            // Feed the queue; blocks when queue_depth photos are waiting.
            for id in photo_ids {
                if self.cancel.load(Ordering::Relaxed) {
                    break;
                }
                if job_tx.send(id).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        let outcome = BatchOutcome {
            resolved: resolved.into_inner(),
            failed: failed.into_inner(),
            skipped: skipped.into_inner(),
        };
        tracing::info!(
            resolved = outcome.resolved,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "Batch run finished"
        );
        send_event(&events, BatchEvent::Finished { outcome });
        outcome
    }
}

/// Receivers may hang up early; progress reporting is best-effort.
fn send_event(events: &Option<mpsc::Sender<BatchEvent>>, event: BatchEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{NewArtwork, NewExhibition, NewPhoto, PhotoStatus};
    use crate::detection::{Detection, Detector};
    use crate::error::{DetectionFailure, ExtractionFailure};
    use crate::features::{Embedding, FeatureExtractor};
    use crate::geometry::NormalizedBox;
    use crate::index::CatalogIndex;
    use image::DynamicImage;

    struct FullFrameDetector;

    impl Detector for FullFrameDetector {
        fn detect(&self, _img: &DynamicImage) -> Result<Vec<Detection>, DetectionFailure> {
            Ok(vec![Detection {
                bbox: NormalizedBox::new(0.1, 0.1, 0.8, 0.8).unwrap(),
                score: 0.9,
            }])
        }
    }

    /// Blocks inside the model call before answering, like a wedged session.
    struct SlowDetector(Duration);

    impl Detector for SlowDetector {
        fn detect(&self, img: &DynamicImage) -> Result<Vec<Detection>, DetectionFailure> {
            std::thread::sleep(self.0);
            FullFrameDetector.detect(img)
        }
    }

    struct ConstantExtractor;

    impl FeatureExtractor for ConstantExtractor {
        fn embed(&self, _region: &DynamicImage) -> Result<Embedding, ExtractionFailure> {
            Ok(Embedding {
                vector: vec![1.0, 0.0, 0.0],
                palette: vec![[128, 128, 128]],
            })
        }

        fn dimension(&self) -> usize {
            3
        }

        fn version(&self) -> &str {
            "mock/1"
        }
    }

    struct Fixture {
        db: Arc<Mutex<Database>>,
        matcher: Arc<Matcher>,
        photo_ids: Vec<i64>,
        _dir: tempfile::TempDir,
    }

    /// One exhibition with `photos` valid photo files plus one photo whose
    /// path does not exist.
    fn fixture(photos: usize) -> Fixture {
        fixture_with_detector(photos, Arc::new(FullFrameDetector))
    }

    fn fixture_with_detector(photos: usize, detector: Arc<dyn Detector>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let artwork_id = db
            .create_artwork(&NewArtwork {
                title: "Composition II".to_string(),
                artist: "Piet Mondrian".to_string(),
                catalog_number: "M-1930-1".to_string(),
                ..Default::default()
            })
            .unwrap();
        db.update_artwork_embedding(artwork_id, &[1.0, 0.0, 0.0], "mock/1", &[])
            .unwrap();

        let exhibition_id = db
            .create_exhibition(&NewExhibition {
                name: "De Stijl".to_string(),
                museum: "Test Museum".to_string(),
                ..Default::default()
            })
            .unwrap();

        let mut photo_ids = Vec::new();
        for i in 0..photos {
            let path = dir.path().join(format!("install_{i}.png"));
            DynamicImage::new_rgb8(64, 48).save(&path).unwrap();
            photo_ids.push(
                db.create_photo(&NewPhoto {
                    exhibition_id,
                    image_path: path.to_string_lossy().into_owned(),
                    ..Default::default()
                })
                .unwrap(),
            );
        }
        photo_ids.push(
            db.create_photo(&NewPhoto {
                exhibition_id,
                image_path: dir.path().join("missing.png").to_string_lossy().into_owned(),
                ..Default::default()
            })
            .unwrap(),
        );

        let db = Arc::new(Mutex::new(db));
        let index = Arc::new(CatalogIndex::new());
        let matcher = Arc::new(Matcher::new(
            db.clone(),
            detector,
            Arc::new(ConstantExtractor),
            index,
            &Config::default(),
        ));
        matcher.rebuild_index().unwrap();

        Fixture {
            db,
            matcher,
            photo_ids,
            _dir: dir,
        }
    }

    #[test]
    fn test_batch_isolates_failures() {
        let fx = fixture(2);
        let processor = BatchProcessor::new(
            fx.db.clone(),
            fx.matcher.clone(),
            PipelineConfig {
                workers: 2,
                ..Default::default()
            },
        );

        let outcome = processor.process_pending(10, None).unwrap();
        assert_eq!(outcome.resolved, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.skipped, 0);

        let db = fx.db.lock().unwrap();
        assert_eq!(
            db.photo_status(fx.photo_ids[0]).unwrap(),
            Some(PhotoStatus::Done)
        );
        let broken = *fx.photo_ids.last().unwrap();
        assert_eq!(db.photo_status(broken).unwrap(), Some(PhotoStatus::Failed));
        assert!(db
            .get_photo(broken)
            .unwrap()
            .unwrap()
            .error_message
            .is_some());
    }

    #[test]
    fn test_batch_reports_events() {
        let fx = fixture(1);
        let processor =
            BatchProcessor::new(fx.db.clone(), fx.matcher.clone(), PipelineConfig::default());

        let (tx, rx) = mpsc::channel();
        let outcome = processor.process_pending(10, Some(tx)).unwrap();

        let events: Vec<BatchEvent> = rx.iter().collect();
        let resolved = events
            .iter()
            .filter(|e| matches!(e, BatchEvent::Resolved { .. }))
            .count();
        assert_eq!(resolved, 1);
        assert!(matches!(
            events.last(),
            Some(BatchEvent::Finished { outcome: last }) if *last == outcome
        ));
    }

    #[test]
    fn test_overdue_photo_is_failed_while_worker_is_stuck() {
        let fx = fixture_with_detector(1, Arc::new(SlowDetector(Duration::from_secs(4))));
        let slow_id = fx.photo_ids[0];
        let processor = Arc::new(BatchProcessor::new(
            fx.db.clone(),
            fx.matcher.clone(),
            PipelineConfig {
                workers: 2,
                photo_timeout_secs: 1,
                ..Default::default()
            },
        ));

        let handle = {
            let processor = processor.clone();
            std::thread::spawn(move || processor.process_pending(10, None).unwrap())
        };

        // The photo must flip to failed while its detector is still asleep,
        // well before the worker comes back.
        let give_up = Instant::now() + Duration::from_secs(3);
        loop {
            let status = fx
                .db
                .lock()
                .unwrap()
                .photo_status(slow_id)
                .unwrap()
                .unwrap();
            if status == PhotoStatus::Failed {
                break;
            }
            assert!(Instant::now() < give_up, "photo left at {status}");
            std::thread::sleep(Duration::from_millis(50));
        }

        // Once the worker wakes up it observes the elapsed deadline.
        let outcome = handle.join().unwrap();
        assert_eq!(outcome.resolved, 0);
        assert_eq!(outcome.failed, 2);
    }

    #[test]
    fn test_cancel_before_start_leaves_photos_pending() {
        let fx = fixture(3);
        let processor =
            BatchProcessor::new(fx.db.clone(), fx.matcher.clone(), PipelineConfig::default());
        processor.cancel();

        let outcome = processor.process_pending(10, None).unwrap();
        assert_eq!(outcome, BatchOutcome::default());

        let db = fx.db.lock().unwrap();
        for &id in &fx.photo_ids {
            assert_eq!(db.photo_status(id).unwrap(), Some(PhotoStatus::Pending));
        }
    }
}
