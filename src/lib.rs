//! velotrack — micro-mobility video analysis.
//!
//! Ingests a video file, runs a per-frame YOLOv8 detector, and decides which
//! detections represent the same physical object reappearing versus a new
//! object entering the scene, so a reviewer sees exactly one card per
//! physical object rather than one per frame.
//!
//! Pipeline per frame: source → detector → track registry
//! (match / update / create / expire) → unique-detection records.

pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod snapshot;
pub mod source;
pub mod tracker;

pub use config::{load_config, AppConfig, TrackerConfig};
pub use db::DetectionStore;
pub use detector::{Detection, DetectionMode, ObjectDetector, VehicleClass, YoloDetector};
pub use error::{Error, Result};
pub use geometry::{centroid_distance, iou, BoundingBox};
pub use pipeline::{ProcessOptions, VideoProcessor};
pub use progress::{ProcessingStatus, ProgressSnapshot};
pub use snapshot::{Suggestion, UniqueDetection};
pub use source::{FrameSource, VideoFile, VideoMetadata};
pub use tracker::{FirstSighting, Track, TrackRegistry};
