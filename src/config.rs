use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub features: FeatureConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub context_flags: ContextFlagsConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pinax")
        .join("pinax.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Boxes scoring below this are never emitted by the detector.
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// IoU threshold for non-maximum suppression inside the detector.
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,

    /// Hard cap on detections per photo.
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    /// Directory holding ONNX model files.
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

fn default_min_score() -> f32 {
    0.25
}

fn default_nms_threshold() -> f32 {
    0.45
}

fn default_max_detections() -> usize {
    100
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("pinax")
        .join("models")
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            nms_threshold: default_nms_threshold(),
            max_detections: default_max_detections(),
            models_dir: default_models_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Maximum number of dominant colors kept per palette.
    #[serde(default = "default_palette_size")]
    pub palette_size: usize,

    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

fn default_palette_size() -> usize {
    5
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            palette_size: default_palette_size(),
            models_dir: default_models_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// How many catalog neighbors to retrieve per box.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Weight of the detection score in the combined confidence.
    #[serde(default = "default_detection_weight")]
    pub detection_weight: f32,

    /// Weight of the top-1 similarity score in the combined confidence.
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f32,

    /// Candidates with combined confidence >= this are accepted.
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f32,

    /// Two accepted boxes for the same artwork overlapping above this IoU
    /// collapse to the higher-confidence one.
    #[serde(default = "default_duplicate_iou")]
    pub duplicate_iou: f32,
}

fn default_top_k() -> usize {
    5
}

fn default_detection_weight() -> f32 {
    0.4
}

fn default_similarity_weight() -> f32 {
    0.6
}

fn default_acceptance_threshold() -> f32 {
    0.5
}

fn default_duplicate_iou() -> f32 {
    0.5
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            detection_weight: default_detection_weight(),
            similarity_weight: default_similarity_weight(),
            acceptance_threshold: default_acceptance_threshold(),
            duplicate_iou: default_duplicate_iou(),
        }
    }
}

/// Rules for deriving visual-context flags on accepted appearances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextFlagsConfig {
    /// A box within this margin of the frame edge gets the
    /// partial-visibility flag.
    #[serde(default = "default_edge_margin")]
    pub edge_margin: f32,

    /// Photos with quality score below this get lighting marked poor.
    #[serde(default = "default_poor_quality")]
    pub poor_quality_below: f32,

    /// Photos with quality score below this (but not poor) get lighting
    /// marked moderate.
    #[serde(default = "default_moderate_quality")]
    pub moderate_quality_below: f32,

    /// Overlap fraction with other accepted boxes above which occlusion is
    /// partial.
    #[serde(default = "default_partial_occlusion")]
    pub partial_occlusion_above: f32,

    /// Overlap fraction above which occlusion is heavy.
    #[serde(default = "default_heavy_occlusion")]
    pub heavy_occlusion_above: f32,
}

fn default_edge_margin() -> f32 {
    0.02
}

fn default_poor_quality() -> f32 {
    0.3
}

fn default_moderate_quality() -> f32 {
    0.6
}

fn default_partial_occlusion() -> f32 {
    0.1
}

fn default_heavy_occlusion() -> f32 {
    0.4
}

impl Default for ContextFlagsConfig {
    fn default() -> Self {
        Self {
            edge_margin: default_edge_margin(),
            poor_quality_below: default_poor_quality(),
            moderate_quality_below: default_moderate_quality(),
            partial_occlusion_above: default_partial_occlusion(),
            heavy_occlusion_above: default_heavy_occlusion(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of worker threads processing photos concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bound on the photo job queue; enqueue blocks beyond this.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Per-photo deadline in seconds. A photo exceeding it is marked failed.
    #[serde(default = "default_photo_timeout_secs")]
    pub photo_timeout_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    32
}

fn default_photo_timeout_secs() -> u64 {
    120
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            photo_timeout_secs: default_photo_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pinax")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.detection.min_score, 0.25);
        assert_eq!(config.matching.top_k, 5);
        assert_eq!(config.matching.detection_weight, 0.4);
        assert_eq!(config.matching.similarity_weight, 0.6);
        assert_eq!(config.matching.acceptance_threshold, 0.5);
        assert_eq!(config.matching.duplicate_iou, 0.5);
        assert_eq!(config.pipeline.workers, 4);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.matching.top_k, config.matching.top_k);
        assert_eq!(parsed.detection.min_score, config.detection.min_score);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str("[matching]\ntop_k = 3\n").unwrap();
        assert_eq!(parsed.matching.top_k, 3);
        assert_eq!(parsed.matching.acceptance_threshold, 0.5);
        assert_eq!(parsed.pipeline.workers, 4);
    }
}
