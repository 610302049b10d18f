//! Object Detector — YOLOv8 via ONNX Runtime.
//!
//! Produces per-frame [`Detection`]s for the tracking engine. Mode filtering
//! (micro-mobility vs all vehicles) happens here, before detections reach the
//! tracker. The frame loop consumes detectors through the [`ObjectDetector`]
//! trait so tests can script detections without a model.

use ndarray::Array4;
use opencv::{core::Mat, imgproc, prelude::*};
use ort::session::Session;
use tracing::debug;

use crate::error::Result;
use crate::geometry::{iou, BoundingBox};

// ─── Vehicle classes ─────────────────────────────────────────────────────────

/// The closed set of vehicle classes the system reasons about.
/// Everything else from COCO maps to `Unknown` and is filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Bicycle,
    Motorcycle,
    ElectricMotorcycle,
    ElectricScooter,
    MotorcycleCab,
    Car,
    Truck,
    Bus,
    Van,
    Unknown,
}

impl VehicleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Bicycle            => "bicycle",
            VehicleClass::Motorcycle         => "motorcycle",
            VehicleClass::ElectricMotorcycle => "electric_motorcycle",
            VehicleClass::ElectricScooter    => "electric_scooter",
            VehicleClass::MotorcycleCab      => "motorcycle_cab",
            VehicleClass::Car                => "car",
            VehicleClass::Truck              => "truck",
            VehicleClass::Bus                => "bus",
            VehicleClass::Van                => "van",
            VehicleClass::Unknown            => "unknown",
        }
    }

    /// Map COCO class id (YOLOv8) to our vehicle classes.
    fn from_coco_id(id: usize) -> Self {
        match id {
            1 => VehicleClass::Bicycle,
            2 => VehicleClass::Car,
            3 => VehicleClass::Motorcycle,
            5 => VehicleClass::Bus,
            7 => VehicleClass::Truck,
            _ => VehicleClass::Unknown,
        }
    }

    pub fn is_micro_mobility(&self) -> bool {
        matches!(
            self,
            VehicleClass::Bicycle
                | VehicleClass::Motorcycle
                | VehicleClass::ElectricMotorcycle
                | VehicleClass::ElectricScooter
                | VehicleClass::MotorcycleCab
        )
    }

    /// Alternate classes a reviewer is likely to pick instead. At most two
    /// per class; classes without a curated entry fall back to generics in
    /// the suggestion builder.
    pub fn alternates(&self) -> &'static [VehicleClass] {
        match self {
            VehicleClass::Bicycle       => &[VehicleClass::Motorcycle, VehicleClass::ElectricScooter],
            VehicleClass::Motorcycle    => &[VehicleClass::Bicycle, VehicleClass::ElectricMotorcycle],
            VehicleClass::MotorcycleCab => &[VehicleClass::Motorcycle, VehicleClass::ElectricMotorcycle],
            VehicleClass::ElectricScooter    => &[VehicleClass::Bicycle, VehicleClass::Motorcycle],
            VehicleClass::ElectricMotorcycle => &[VehicleClass::Motorcycle, VehicleClass::ElectricScooter],
            VehicleClass::Car     => &[VehicleClass::Truck, VehicleClass::Van],
            VehicleClass::Truck   => &[VehicleClass::Car, VehicleClass::Bus],
            VehicleClass::Bus     => &[VehicleClass::Truck, VehicleClass::Van],
            VehicleClass::Van     => &[VehicleClass::Car, VehicleClass::Truck],
            VehicleClass::Unknown => &[],
        }
    }
}

/// Which physical classes survive detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    #[default]
    MicroMobilityOnly,
    AllVehicles,
}

impl DetectionMode {
    pub fn retains(&self, class: VehicleClass) -> bool {
        match self {
            DetectionMode::MicroMobilityOnly => class.is_micro_mobility(),
            DetectionMode::AllVehicles => class != VehicleClass::Unknown,
        }
    }
}

// ─── Detections ──────────────────────────────────────────────────────────────

/// A single raw detection for one frame. Ephemeral: consumed by the tracker
/// within the frame it was produced for.
#[derive(Debug, Clone)]
pub struct Detection {
    pub class:      VehicleClass,
    pub confidence: f32,
    pub bbox:       BoundingBox,
}

/// The contract the frame loop consumes. `detect` returns all detections for
/// the frame that survive the mode filter; a hard failure here aborts the
/// whole run.
pub trait ObjectDetector {
    fn is_ready(&self) -> bool;
    fn detect(&mut self, frame: &Mat, mode: DetectionMode) -> Result<Vec<Detection>>;
}

// ─── YOLOv8 implementation ───────────────────────────────────────────────────

/// YOLOv8 wrapper using ONNX Runtime (ort 2.0).
pub struct YoloDetector {
    session:        Session,
    input_size:     u32,
    conf_threshold: f32,
    nms_threshold:  f32,
}

impl YoloDetector {
    pub fn new(
        model_path: &str,
        input_size: u32,
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        // ort 2.0: global init is automatic, session builder directly
        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        Ok(Self {
            session,
            input_size,
            conf_threshold,
            nms_threshold,
        })
    }
}

impl ObjectDetector for YoloDetector {
    fn is_ready(&self) -> bool {
        true // model is loaded at construction or new() fails
    }

    /// Run inference on a full BGR frame.
    fn detect(&mut self, frame: &Mat, mode: DetectionMode) -> Result<Vec<Detection>> {
        let sz = self.input_size as i32;

        // ── Letterbox resize, BGR → RGB, HWC → CHW, [0,255] → [0.0, 1.0] ──
        let (letterboxed, scale, pad_x, pad_y) = letterbox(frame, sz)?;
        let mut rgb = Mat::default();
        imgproc::cvt_color(&letterboxed, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let data = mat_to_chw_f32(&rgb, sz as usize)?;
        let array = Array4::from_shape_vec((1, 3, sz as usize, sz as usize), data)?;

        // ── Run model (ort 2.0 API) ───────────────────────────────────────
        let outputs = self.session.run(ort::inputs!["images" => array.view()]?)?;

        // YOLOv8 output: [1, 4 + num_classes, num_boxes]
        let output_tensor = outputs[0].try_extract_tensor::<f32>()?;
        let shape = output_tensor.shape();
        let num_classes = shape[1] - 4;
        let num_boxes = shape[2];

        let orig_w = frame.cols() as f32;
        let orig_h = frame.rows() as f32;

        let mut detections = Vec::new();
        for i in 0..num_boxes {
            // Box coords: cx, cy, w, h in letterbox pixels
            let cx = output_tensor[[0, 0, i]];
            let cy = output_tensor[[0, 1, i]];
            let bw = output_tensor[[0, 2, i]];
            let bh = output_tensor[[0, 3, i]];

            // Find best class
            let mut max_score = 0f32;
            let mut max_class = 0usize;
            for c in 0..num_classes {
                let score = output_tensor[[0, 4 + c, i]];
                if score > max_score {
                    max_score = score;
                    max_class = c;
                }
            }

            if max_score <= self.conf_threshold {
                continue;
            }
            let class = VehicleClass::from_coco_id(max_class);
            if !mode.retains(class) {
                continue;
            }

            // Undo letterbox: back to original pixel coords, clamped to frame
            let s = scale as f32;
            let x1 = ((cx - bw / 2.0 - pad_x as f32) / s).clamp(0.0, orig_w);
            let y1 = ((cy - bh / 2.0 - pad_y as f32) / s).clamp(0.0, orig_h);
            let x2 = ((cx + bw / 2.0 - pad_x as f32) / s).clamp(0.0, orig_w);
            let y2 = ((cy + bh / 2.0 - pad_y as f32) / s).clamp(0.0, orig_h);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            detections.push(Detection {
                class,
                confidence: max_score,
                bbox: BoundingBox::new(x1, y1, x2 - x1, y2 - y1),
            });
        }

        let kept = non_max_suppression(detections, self.nms_threshold);
        debug!("Detector: {} detections after NMS (mode {:?})", kept.len(), mode);
        Ok(kept)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Greedy per-class non-maximum suppression: keep the highest-confidence box,
/// drop any same-class box overlapping it beyond `nms_threshold`.
fn non_max_suppression(mut detections: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::new();
    'candidates: for det in detections {
        for k in &kept {
            if k.class == det.class && iou(&k.bbox, &det.bbox) > nms_threshold {
                continue 'candidates;
            }
        }
        kept.push(det);
    }
    kept
}

/// Letterbox resize: fit image into `target×target` with grey padding.
fn letterbox(src: &Mat, target: i32) -> Result<(Mat, f64, i32, i32)> {
    use opencv::core::{Scalar, Size};

    let w = src.cols();
    let h = src.rows();
    let scale = (target as f64 / w.max(h) as f64).min(1.0);
    let new_w = (w as f64 * scale) as i32;
    let new_h = (h as f64 * scale) as i32;

    let mut resized = Mat::default();
    imgproc::resize(
        src,
        &mut resized,
        Size::new(new_w, new_h),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let pad_x = (target - new_w) / 2;
    let pad_y = (target - new_h) / 2;

    let mut padded = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut padded,
        pad_y,
        target - new_h - pad_y,
        pad_x,
        target - new_w - pad_x,
        opencv::core::BORDER_CONSTANT,
        Scalar::new(114.0, 114.0, 114.0, 0.0), // grey, standard YOLOv8 padding
    )?;

    Ok((padded, scale, pad_x, pad_y))
}

/// Convert OpenCV HWC Mat to CHW Vec<f32> normalised to [0,1].
fn mat_to_chw_f32(mat: &Mat, size: usize) -> Result<Vec<f32>> {
    let total = 3 * size * size;
    let mut out = vec![0f32; total];
    let data = mat.data_bytes()?;

    for h in 0..size {
        for w in 0..size {
            let pixel_idx = (h * size + w) * 3;
            for c in 0..3usize {
                let chw_idx = c * size * size + h * size + w;
                out[chw_idx] = data[pixel_idx + c] as f32 / 255.0;
            }
        }
    }
    Ok(out)
}
