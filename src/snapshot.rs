//! Unique-Detection Emitter.
//!
//! Synthesizes the user-facing record for a track's first sighting: video
//! timestamp, annotated full frame, fixed-size crop, and a ranked suggestion
//! list. Emitted exactly once per track, at creation; later track updates
//! never regenerate it, so the imagery reflects the object's first-seen pose.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use opencv::{
    core::{Mat, Point, Rect, Scalar, Size, Vector},
    imgcodecs::{self, IMWRITE_JPEG_QUALITY},
    imgproc,
    prelude::*,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::detector::{Detection, VehicleClass};
use crate::error::Result;
use crate::geometry::BoundingBox;

/// Longest side of the annotated full frame after downscaling.
const MAX_ANNOTATED_PX: i32 = 800;
/// Side length of the square review crop.
const CROP_SIZE: i32 = 224;
/// JPEG quality for both encoded images.
const JPEG_QUALITY: i32 = 90;

/// Confidence scale applied to alternate suggestions.
const ALTERNATE_SCALE: f32 = 0.8;
/// Confidence scale applied to padding entries.
const PADDING_SCALE: f32 = 0.6;
/// Fallback alternates for classes without a curated entry.
const GENERIC_ALTERNATES: [VehicleClass; 2] = [VehicleClass::Car, VehicleClass::Bicycle];

// ─── Records ─────────────────────────────────────────────────────────────────

/// One ranked suggestion shown to the reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub label: VehicleClass,
    pub confidence: f32,
}

/// The single user-facing record emitted the first time a track is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueDetection {
    pub id: Uuid,
    /// Video position of the first sighting, `HH:MM:SS.mmm`.
    pub timestamp: String,
    pub frame_number: u64,
    /// Annotated full frame as a JPEG data URI; empty on extraction failure.
    pub full_frame_image: String,
    /// 224x224 letterboxed crop as a JPEG data URI; empty on extraction failure.
    pub crop_image: String,
    /// Box at creation time only. Never updated.
    pub bbox: BoundingBox,
    /// Exactly 3 entries, first one always the detected class.
    pub suggestions: Vec<Suggestion>,
    pub user_choice: Option<VehicleClass>,
    pub is_manual_label: bool,
    pub is_manual_correction: bool,
    pub processed_at: DateTime<Utc>,
}

impl UniqueDetection {
    /// Build the record for a first sighting. Image extraction fails soft:
    /// a failure is logged and yields an empty payload, never an error.
    pub fn capture(
        track_id: Uuid,
        detection: &Detection,
        frame: &Mat,
        frame_number: u64,
        fps: f64,
    ) -> Self {
        let full_frame_image = annotate_full_frame(frame, detection).unwrap_or_else(|e| {
            warn!("Annotated-frame extraction failed at frame {}: {}", frame_number, e);
            String::new()
        });
        let crop_image = crop_thumbnail(frame, &detection.bbox).unwrap_or_else(|e| {
            warn!("Crop extraction failed at frame {}: {}", frame_number, e);
            String::new()
        });

        Self {
            id: track_id,
            timestamp: frame_to_timestamp(frame_number, fps),
            frame_number,
            full_frame_image,
            crop_image,
            bbox: detection.bbox,
            suggestions: build_suggestions(detection.class, detection.confidence),
            user_choice: None,
            is_manual_label: false,
            is_manual_correction: false,
            processed_at: Utc::now(),
        }
    }
}

// ─── Timestamp ───────────────────────────────────────────────────────────────

/// Convert a frame index to a `HH:MM:SS.mmm` video timestamp.
pub fn frame_to_timestamp(frame_number: u64, fps: f64) -> String {
    let total_seconds = if fps > 0.0 {
        frame_number as f64 / fps
    } else {
        0.0
    };
    let hours = (total_seconds / 3600.0) as u64;
    let minutes = ((total_seconds % 3600.0) / 60.0) as u64;
    let seconds = total_seconds % 60.0;

    format!("{:02}:{:02}:{:06.3}", hours, minutes, seconds)
}

// ─── Suggestions ─────────────────────────────────────────────────────────────

/// Ranked suggestion list: the detected class first, then up to two
/// alternates at reduced confidence, padded to exactly 3 entries.
pub fn build_suggestions(class: VehicleClass, confidence: f32) -> Vec<Suggestion> {
    let mut suggestions = vec![Suggestion {
        label: class,
        confidence,
    }];

    let mut alternates: Vec<VehicleClass> = class.alternates().iter().copied().take(2).collect();
    for generic in GENERIC_ALTERNATES {
        if alternates.len() >= 2 {
            break;
        }
        if generic != class && !alternates.contains(&generic) {
            alternates.push(generic);
        }
    }
    for alt in alternates {
        suggestions.push(Suggestion {
            label: alt,
            confidence: confidence * ALTERNATE_SCALE,
        });
    }

    while suggestions.len() < 3 {
        suggestions.push(Suggestion {
            label: VehicleClass::Unknown,
            confidence: confidence * PADDING_SCALE,
        });
    }
    suggestions.truncate(3);
    suggestions
}

// ─── Imagery ─────────────────────────────────────────────────────────────────

/// Draw the detection onto a copy of the full frame, downscale to at most
/// `MAX_ANNOTATED_PX` on the longest side, and encode as a JPEG data URI.
fn annotate_full_frame(frame: &Mat, detection: &Detection) -> Result<String> {
    if frame.empty() {
        return Ok(String::new());
    }
    let mut canvas = frame.try_clone()?;

    let b = &detection.bbox;
    let rect = Rect::new(b.x as i32, b.y as i32, b.width as i32, b.height as i32);
    let color = Scalar::new(0.0, 255.0, 0.0, 0.0);
    imgproc::rectangle(&mut canvas, rect, color, 2, imgproc::LINE_8, 0)?;

    let label = format!("{}: {:.2}", detection.class.as_str(), detection.confidence);
    // Keep the caption on-canvas when the box touches the top edge.
    let origin = Point::new(rect.x, (rect.y - 8).max(14));
    imgproc::put_text(
        &mut canvas,
        &label,
        origin,
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        color,
        1,
        imgproc::LINE_AA,
        false,
    )?;

    let longest = canvas.cols().max(canvas.rows());
    let scaled = if longest > MAX_ANNOTATED_PX {
        let scale = MAX_ANNOTATED_PX as f64 / longest as f64;
        let new_w = ((canvas.cols() as f64 * scale) as i32).max(1);
        let new_h = ((canvas.rows() as f64 * scale) as i32).max(1);
        let mut resized = Mat::default();
        imgproc::resize(
            &canvas,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_AREA,
        )?;
        resized
    } else {
        canvas
    };

    encode_data_uri(&scaled)
}

/// Cut a padded region around the box, resize so the longer side equals
/// `CROP_SIZE`, letterbox onto a square zero-filled canvas, and encode as a
/// JPEG data URI. Padding adapts to box size: small boxes get more context.
fn crop_thumbnail(frame: &Mat, bbox: &BoundingBox) -> Result<String> {
    if frame.empty() {
        return Ok(String::new());
    }

    let area = bbox.area();
    let ratio = if area > 0.0 {
        (5000.0 / area).clamp(0.2, 0.5)
    } else {
        0.5
    };
    let pad_w = bbox.width * ratio;
    let pad_h = bbox.height * ratio;

    let x1 = (bbox.x - pad_w).max(0.0) as i32;
    let y1 = (bbox.y - pad_h).max(0.0) as i32;
    let x2 = ((bbox.x + bbox.width + pad_w).min(frame.cols() as f32)) as i32;
    let y2 = ((bbox.y + bbox.height + pad_h).min(frame.rows() as f32)) as i32;

    // Degenerate after clamping to frame bounds: empty payload, not an error.
    if x2 <= x1 || y2 <= y1 {
        return Ok(String::new());
    }

    let roi = Mat::roi(frame, Rect::new(x1, y1, x2 - x1, y2 - y1))?;

    // Longer side to exactly CROP_SIZE, preserving aspect ratio.
    let (w, h) = (roi.cols(), roi.rows());
    let (new_w, new_h) = if w >= h {
        (CROP_SIZE, ((h * CROP_SIZE) / w).max(1))
    } else {
        (((w * CROP_SIZE) / h).max(1), CROP_SIZE)
    };

    let mut resized = Mat::default();
    imgproc::resize(
        &roi,
        &mut resized,
        Size::new(new_w, new_h),
        0.0,
        0.0,
        imgproc::INTER_AREA,
    )?;

    // Centre on the square canvas, zero-filled borders.
    let pad_left = (CROP_SIZE - new_w) / 2;
    let pad_top = (CROP_SIZE - new_h) / 2;
    let mut squared = Mat::default();
    opencv::core::copy_make_border(
        &resized,
        &mut squared,
        pad_top,
        CROP_SIZE - new_h - pad_top,
        pad_left,
        CROP_SIZE - new_w - pad_left,
        opencv::core::BORDER_CONSTANT,
        Scalar::all(0.0),
    )?;

    encode_data_uri(&squared)
}

fn encode_data_uri(mat: &Mat) -> Result<String> {
    let mut buf: Vector<u8> = Vector::new();
    let params: Vector<i32> = Vector::from_iter([IMWRITE_JPEG_QUALITY, JPEG_QUALITY]);
    imgcodecs::imencode(".jpg", mat, &mut buf, &params)?;
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(buf.as_slice())))
}
