//! Visual feature extraction: fixed-length embeddings plus a compact
//! dominant-color summary for each cropped region.

pub mod onnx;
pub mod palette;

use image::{DynamicImage, GenericImageView};

use crate::error::ExtractionFailure;

pub use onnx::OnnxExtractor;

/// A dominant color as an [r, g, b] triple.
pub type Rgb = [u8; 3];

/// Output of one extraction: an L2-normalized embedding of fixed
/// dimensionality plus an ordered palette of up to K dominant colors.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub palette: Vec<Rgb>,
}

/// An embedding model backend.
///
/// Contract: `embed` is deterministic given identical input bytes and model
/// weights, and the vector length equals `dimension()` on every call.
/// `version()` identifies the model so stored embeddings from a different
/// extractor can be detected instead of silently producing meaningless
/// similarity scores.
pub trait FeatureExtractor: Send + Sync {
    fn embed(&self, region: &DynamicImage) -> Result<Embedding, ExtractionFailure>;

    /// Fixed embedding dimensionality D for this extractor.
    fn dimension(&self) -> usize;

    /// Stable identifier for the model + weights producing the vectors.
    fn version(&self) -> &str;
}

/// Reject degenerate crops before they reach a model.
pub fn check_region(region: &DynamicImage) -> Result<(), ExtractionFailure> {
    let (w, h) = region.dimensions();
    if w == 0 || h == 0 {
        return Err(ExtractionFailure::DegenerateRegion { width: w, height: h });
    }
    Ok(())
}

/// Guard against an extractor emitting the wrong dimensionality.
pub fn check_dimension(vector: &[f32], expected: usize) -> Result<(), ExtractionFailure> {
    if vector.len() != expected {
        return Err(ExtractionFailure::DimensionMismatch {
            got: vector.len(),
            expected,
        });
    }
    Ok(())
}

/// L2-normalize in place; zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_region_rejects_zero_area() {
        let empty = DynamicImage::new_rgb8(0, 10);
        assert!(matches!(
            check_region(&empty),
            Err(ExtractionFailure::DegenerateRegion { .. })
        ));

        let ok = DynamicImage::new_rgb8(4, 4);
        assert!(check_region(&ok).is_ok());
    }

    #[test]
    fn test_check_dimension() {
        assert!(check_dimension(&[0.0; 8], 8).is_ok());
        assert!(matches!(
            check_dimension(&[0.0; 7], 8),
            Err(ExtractionFailure::DimensionMismatch { got: 7, expected: 8 })
        ));
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }
}
