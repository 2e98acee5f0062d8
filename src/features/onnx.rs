//! ONNX Runtime embedding backend (CLIP visual encoder).

use anyhow::{anyhow, Result};
use image::DynamicImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{check_dimension, check_region, l2_normalize, palette, Embedding, FeatureExtractor};
use crate::config::FeatureConfig;
use crate::error::ExtractionFailure;

const INPUT_SIZE: u32 = 224;

/// CLIP ViT-L/14 produces 768-dim embeddings.
const EMBEDDING_DIM: usize = 768;

/// Recorded alongside every stored embedding so a model upgrade is detected
/// instead of silently comparing incompatible vectors.
const EXTRACTOR_VERSION: &str = "clip-vit-large-patch14/1";

const MODEL_FILENAME: &str = "clip-vit-l14-vision.onnx";
const MODEL_URL: &str =
    "https://huggingface.co/Qdrant/clip-ViT-L-14-vision/resolve/main/model.onnx";

/// Feature extractor backed by a CLIP visual encoder.
pub struct OnnxExtractor {
    session: Mutex<Session>,
    palette_size: usize,
}

impl OnnxExtractor {
    /// Load the embedding model, downloading it on first use.
    pub fn load(config: &FeatureConfig) -> Result<Self> {
        let model_path = ensure_model(&config.models_dir, MODEL_FILENAME, MODEL_URL)?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)?;

        Ok(Self {
            session: Mutex::new(session),
            palette_size: config.palette_size,
        })
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn embed(&self, region: &DynamicImage) -> Result<Embedding, ExtractionFailure> {
        check_region(region)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ExtractionFailure::Model(format!("failed to lock session: {e}")))?;

        let mut vector = run_visual_encoder(&mut session, region)
            .map_err(|e| ExtractionFailure::Model(e.to_string()))?;
        check_dimension(&vector, EMBEDDING_DIM)?;
        l2_normalize(&mut vector);

        Ok(Embedding {
            vector,
            palette: palette::dominant_colors(region, self.palette_size),
        })
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn version(&self) -> &str {
        EXTRACTOR_VERSION
    }
}

/// Run the visual encoder on an image
fn run_visual_encoder(session: &mut Session, img: &DynamicImage) -> Result<Vec<f32>> {
    // Resize to CLIP input size
    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // CLIP normalization constants (ImageNet stats)
    let mean = [0.48145466, 0.4578275, 0.40821073];
    let std = [0.26862954, 0.26130258, 0.27577711];

    // Convert to tensor (NCHW format, normalized)
    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;

            // Normalize: (pixel/255 - mean) / std
            input_data[idx] = ((pixel[0] as f32 / 255.0) - mean[0]) / std[0]; // R
            input_data[plane + idx] = ((pixel[1] as f32 / 255.0) - mean[1]) / std[1]; // G
            input_data[2 * plane + idx] = ((pixel[2] as f32 / 255.0) - mean[2]) / std[2]; // B
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["pixel_values" => input_tensor])?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("no embedding output"))?;

    let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

    Ok(embedding_data.to_vec())
}

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &PathBuf, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading embedding model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %filename, path = ?model_path, "Embedding model downloaded");
    }

    Ok(model_path)
}
