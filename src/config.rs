/// Application configuration.
///
/// Loaded from velotrack.toml (working directory) with env-var overrides.
/// Env format: VELOTRACK__SECTION__KEY (double underscore separators).

use serde::Deserialize;

use crate::detector::DetectionMode;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
}

fn default_model_path() -> String {
    "models/yolov8m.onnx".to_string()
}
fn default_confidence_threshold() -> f32 {
    0.50
}
fn default_nms_threshold() -> f32 {
    0.45
}
fn default_input_size() -> u32 {
    640
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            confidence_threshold: default_confidence_threshold(),
            nms_threshold: default_nms_threshold(),
            input_size: default_input_size(),
        }
    }
}

/// Thresholds for the track-matching algorithm. These are configuration,
/// never derived at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,
    #[serde(default = "default_max_missing_frames")]
    pub max_missing_frames: u64,
}

fn default_iou_threshold() -> f32 {
    0.50
}
fn default_distance_threshold() -> f32 {
    50.0
}
fn default_max_missing_frames() -> u64 {
    10
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: default_iou_threshold(),
            distance_threshold: default_distance_threshold(),
            max_missing_frames: default_max_missing_frames(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Process every nth frame (1 = all frames). Skipped frames still
    /// advance the frame counter.
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,
    #[serde(default)]
    pub detection_mode: DetectionMode,
}

fn default_frame_skip() -> u32 {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_skip: default_frame_skip(),
            detection_mode: DetectionMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "detections.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Load configuration from velotrack.toml + environment variable overrides.
///
/// Search order:
///   1. ./velotrack.toml (working directory, optional)
///   2. Environment variables: VELOTRACK__TRACKER__IOU_THRESHOLD, etc.
pub fn load_config() -> Result<AppConfig, config::ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("velotrack").required(false))
        .add_source(
            config::Environment::with_prefix("VELOTRACK")
                .separator("__")
                .try_parsing(true),
        );

    let settings = builder.build()?;
    settings.try_deserialize::<AppConfig>()
}
