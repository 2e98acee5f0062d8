//! Candidate-box detection in installation photos.
//!
//! Backends are pluggable: anything that can score rectangular regions of a
//! photo satisfies [`Detector`], so model families can be swapped and tests
//! can run against mocks without touching the rest of the pipeline.

pub mod onnx;

use image::DynamicImage;

use crate::config::DetectionConfig;
use crate::error::DetectionFailure;
use crate::geometry::NormalizedBox;

pub use onnx::OnnxDetector;

/// One candidate artwork region proposed by a detector.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: NormalizedBox,
    pub score: f32,
}

/// A detection model backend.
///
/// Contract: the returned boxes are ordered by descending score, boxes below
/// the configured minimum score are never emitted, and near-duplicate boxes
/// have already been suppressed. Filtering lives inside the detector so that
/// downstream feature extraction never sees junk candidates. The input image
/// is never mutated.
pub trait Detector: Send + Sync {
    fn detect(&self, img: &DynamicImage) -> Result<Vec<Detection>, DetectionFailure>;
}

/// Shared post-processing for detector backends: min-score gate, NMS,
/// descending-score order, detection cap.
pub fn postprocess(mut raw: Vec<Detection>, config: &DetectionConfig) -> Vec<Detection> {
    raw.retain(|d| d.score >= config.min_score);

    let mut kept = nms(raw, config.nms_threshold);
    kept.truncate(config.max_detections);
    kept
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut boxes: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    // Sort by score descending
    boxes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }

        for j in (i + 1)..boxes.len() {
            if suppressed[j] {
                continue;
            }

            if boxes[i].bbox.iou(&boxes[j].bbox) > threshold {
                suppressed[j] = true;
            }
        }

        keep.push(boxes[i].clone());
    }

    keep
}
