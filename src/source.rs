//! Video frame source — OpenCV capture behind a trait.
//!
//! The frame loop reads through [`FrameSource`] so tests can feed synthetic
//! frames. [`VideoFile`] wraps `opencv::videoio::VideoCapture` and releases
//! the handle on every exit path via `Drop`.

use std::path::Path;

use chrono::{DateTime, Utc};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};

/// Container metadata probed when the file is opened.
#[derive(Debug, Clone, Serialize)]
pub struct VideoMetadata {
    pub filename: String,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
    pub file_size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Sequential frame reads plus queryable frame count and rate.
pub trait FrameSource {
    fn frame_count(&self) -> u64;
    fn fps(&self) -> f64;
    /// Read the next frame in order. `Ok(None)` means the stream is
    /// exhausted; an error means the read itself failed.
    fn read(&mut self) -> Result<Option<Mat>>;
}

/// A video file opened for sequential decoding.
pub struct VideoFile {
    cap: VideoCapture,
    metadata: VideoMetadata,
}

impl VideoFile {
    /// Open a video file and probe its metadata. Fails fast if the container
    /// cannot be opened; no tracking state is touched before this succeeds.
    pub fn open(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy().to_string();
        let cap = VideoCapture::from_file(&path_str, videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(Error::SourceOpen(path_str));
        }

        let frame_count = cap.get(videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as u64;
        let fps = cap.get(videoio::CAP_PROP_FPS)?;
        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)?.max(0.0) as u32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)?.max(0.0) as u32;
        let duration = if fps > 0.0 {
            frame_count as f64 / fps
        } else {
            0.0
        };
        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or(path_str);

        let metadata = VideoMetadata {
            filename,
            duration,
            width,
            height,
            fps,
            frame_count,
            file_size,
            uploaded_at: Utc::now(),
        };

        info!(
            "Video opened: {} ({:.1}s, {} frames, {:.1} FPS, {}x{})",
            metadata.filename, duration, frame_count, fps, width, height
        );

        Ok(Self { cap, metadata })
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }
}

impl FrameSource for VideoFile {
    fn frame_count(&self) -> u64 {
        self.metadata.frame_count
    }

    fn fps(&self) -> f64 {
        self.metadata.fps
    }

    fn read(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let ok = self.cap.read(&mut frame)?;
        if !ok || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

impl Drop for VideoFile {
    fn drop(&mut self) {
        // Covers normal completion, early break, and error unwinding alike.
        let _ = self.cap.release();
    }
}
