//! Frame Loop — per-video orchestration.
//!
//! Reads frames sequentially, applies frame-skip, runs the detector, feeds
//! the track registry, and emits unique-detection records and progress
//! snapshots. One invocation processes one video end-to-end; all tracking
//! state is created fresh per call, so concurrent invocations over different
//! videos never share mutable state.

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::TrackerConfig;
use crate::detector::{DetectionMode, ObjectDetector};
use crate::error::{Error, Result};
use crate::progress::{ProcessingStatus, ProgressReporter, ProgressSnapshot};
use crate::snapshot::UniqueDetection;
use crate::source::FrameSource;
use crate::tracker::TrackRegistry;

/// How many processed frames between cooperative yields, so a shared
/// scheduler is never starved by one long video.
const YIELD_EVERY_FRAMES: u64 = 10;

/// Lifecycle of one `process_video` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Streaming,
    Draining,
    Done,
}

/// Per-invocation knobs. `progress` and `stop` are both optional; absence is
/// a valid no-op configuration.
pub struct ProcessOptions {
    pub mode: DetectionMode,
    pub frame_skip: u32,
    pub progress: Option<flume::Sender<ProgressSnapshot>>,
    /// Cancellation signal, polled at the same points progress is reported.
    pub stop: Option<watch::Receiver<bool>>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            mode: DetectionMode::default(),
            frame_skip: 1,
            progress: None,
            stop: None,
        }
    }
}

pub struct VideoProcessor {
    tracker: TrackerConfig,
}

impl VideoProcessor {
    pub fn new(tracker: TrackerConfig) -> Self {
        Self { tracker }
    }

    /// Process a video end-to-end and return the unique detections in
    /// creation order.
    ///
    /// Fails fast (before any state mutation) if the detector is not ready.
    /// A detector failure mid-stream aborts the run; the source handle is
    /// released by its own Drop on every exit path.
    pub async fn process_video<S, D>(
        &self,
        source: &mut S,
        detector: &mut D,
        opts: ProcessOptions,
    ) -> Result<Vec<UniqueDetection>>
    where
        S: FrameSource,
        D: ObjectDetector,
    {
        let mut phase = Phase::Init;
        debug!("process_video entering {:?}", phase);

        if !detector.is_ready() {
            return Err(Error::DetectorNotReady);
        }

        // Fresh state per invocation; nothing survives from earlier runs.
        let mut registry = TrackRegistry::new(
            self.tracker.iou_threshold,
            self.tracker.distance_threshold,
            self.tracker.max_missing_frames,
        );
        let mut results: Vec<UniqueDetection> = Vec::new();

        let total_frames = source.frame_count();
        let fps = source.fps();
        let frame_skip = opts.frame_skip.max(1) as u64;
        let reporter = ProgressReporter::new(total_frames, opts.progress);

        info!(
            "Processing video: {} frames at {:.1} FPS (frame_skip={}, mode={:?})",
            total_frames, fps, frame_skip, opts.mode
        );

        phase = Phase::Streaming;
        debug!("process_video entering {:?}", phase);

        let mut frame_number: u64 = 0;
        let mut processed_frames: u64 = 0;

        while let Some(frame) = source.read()? {
            // Skipped frames are decoded but otherwise discarded; their
            // existence still advances the frame counter.
            if frame_number % frame_skip != 0 {
                frame_number += 1;
                continue;
            }

            if let Some(stop) = &opts.stop {
                if *stop.borrow() {
                    info!("Stop signal received at frame {}", frame_number);
                    break;
                }
            }

            reporter.report(frame_number, ProcessingStatus::Processing, "Processing frames...");

            let detections = detector
                .detect(&frame, opts.mode)
                .map_err(|e| Error::Detector {
                    frame: frame_number,
                    message: e.to_string(),
                })?;

            for sighting in registry.observe(&detections, frame_number) {
                debug!(
                    "New {} track at frame {}",
                    sighting.detection.class.as_str(),
                    frame_number
                );
                results.push(UniqueDetection::capture(
                    sighting.track_id,
                    &sighting.detection,
                    &frame,
                    frame_number,
                    fps,
                ));
            }

            processed_frames += 1;
            frame_number += 1;

            // Yield periodically so progress events get delivered and other
            // tasks on the runtime make progress.
            if processed_frames % YIELD_EVERY_FRAMES == 0 {
                tokio::task::yield_now().await;
            }
        }

        phase = Phase::Draining;
        debug!("process_video entering {:?}", phase);
        reporter.finish("Processing complete!");

        phase = Phase::Done;
        debug!("process_video entering {:?}", phase);
        info!(
            "Video processing complete: {} unique detections from {} processed frames",
            results.len(),
            processed_frames
        );

        Ok(results)
    }
}
