//! ONNX Runtime detection backend (YOLOv8-style single-stage detector).

use anyhow::{anyhow, Result};
use image::DynamicImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{postprocess, Detection, Detector};
use crate::config::DetectionConfig;
use crate::error::DetectionFailure;
use crate::geometry::NormalizedBox;

const INPUT_SIZE: u32 = 640;

const MODEL_FILENAME: &str = "artwork-detector-yolov8.onnx";
const MODEL_URL: &str =
    "https://huggingface.co/Ultralytics/YOLOv8/resolve/main/yolov8x.onnx";

/// Detector backed by a YOLO-family ONNX model.
pub struct OnnxDetector {
    session: Mutex<Session>,
    config: DetectionConfig,
}

impl OnnxDetector {
    /// Load the detection model, downloading it on first use.
    pub fn load(config: &DetectionConfig) -> Result<Self> {
        let model_path = ensure_model(&config.models_dir, MODEL_FILENAME, MODEL_URL)?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)?;

        Ok(Self {
            session: Mutex::new(session),
            config: config.clone(),
        })
    }
}

impl Detector for OnnxDetector {
    fn detect(&self, img: &DynamicImage) -> Result<Vec<Detection>, DetectionFailure> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| DetectionFailure::Model(format!("failed to lock session: {e}")))?;

        let raw = run_yolo(&mut session, img)
            .map_err(|e| DetectionFailure::Model(e.to_string()))?;

        Ok(postprocess(raw, &self.config))
    }
}

/// Run the detection model and decode its raw candidates (unfiltered).
fn run_yolo(session: &mut Session, img: &DynamicImage) -> Result<Vec<Detection>> {
    // Resize image to model input size (use Triangle/bilinear for speed)
    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // Convert to tensor (NCHW format, pixel values scaled to [0,1])
    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;
            input_data[idx] = pixel[0] as f32 / 255.0; // R
            input_data[plane + idx] = pixel[1] as f32 / 255.0; // G
            input_data[2 * plane + idx] = pixel[2] as f32 / 255.0; // B
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["images" => input_tensor])?;

    let output = outputs
        .iter()
        .next()
        .ok_or_else(|| anyhow!("no detection output"))?;
    let (shape, data) = output.1.try_extract_tensor::<f32>()?;

    // Output shape: [1, 4 + num_classes, num_anchors]
    // Row layout: cx, cy, w, h, then one score row per class.
    if shape.len() != 3 || shape[1] < 5 {
        return Err(anyhow!("unexpected detection output shape {:?}", shape));
    }
    let rows = shape[1] as usize;
    let num_anchors = shape[2] as usize;

    let at = |row: usize, anchor: usize| data[row * num_anchors + anchor];

    let mut detections = Vec::new();
    for i in 0..num_anchors {
        // Best class score for this anchor
        let mut score = 0.0f32;
        for class_row in 4..rows {
            score = score.max(at(class_row, i));
        }

        let cx = at(0, i) / INPUT_SIZE as f32;
        let cy = at(1, i) / INPUT_SIZE as f32;
        let w = at(2, i) / INPUT_SIZE as f32;
        let h = at(3, i) / INPUT_SIZE as f32;

        if let Some(bbox) = NormalizedBox::new(cx - w / 2.0, cy - h / 2.0, w, h) {
            detections.push(Detection { bbox, score });
        }
    }

    Ok(detections)
}

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &PathBuf, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading detection model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        let mut file = std::fs::File::create(&model_path)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        tracing::info!(model = %filename, path = ?model_path, "Detection model downloaded");
    }

    Ok(model_path)
}
