//! Progress Reporter.
//!
//! Computes percentage complete and estimated time remaining, pushed through
//! an injected channel once per processed frame. Snapshots are transient:
//! nothing here is retained by the engine.

use std::time::Instant;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Processing,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub current_frame: u64,
    pub total_frames: u64,
    pub percentage: f32,
    pub estimated_seconds_remaining: Option<f32>,
    pub status: ProcessingStatus,
    pub message: String,
}

/// Pushes snapshots into an optional sink. `None` is a valid no-op
/// configuration; sends are non-blocking and dropped if the receiver lags.
pub struct ProgressReporter {
    total_frames: u64,
    started_at: Instant,
    sink: Option<flume::Sender<ProgressSnapshot>>,
}

impl ProgressReporter {
    pub fn new(total_frames: u64, sink: Option<flume::Sender<ProgressSnapshot>>) -> Self {
        Self {
            total_frames,
            started_at: Instant::now(),
            sink,
        }
    }

    /// Report progress at `current_frame`. ETA extrapolates from the average
    /// per-frame time so far; before the first frame there is no estimate.
    pub fn report(&self, current_frame: u64, status: ProcessingStatus, message: &str) {
        let Some(sink) = &self.sink else { return };

        // An empty stream still finishes at 100%.
        let percentage = if self.total_frames == 0 {
            match status {
                ProcessingStatus::Complete => 100.0,
                ProcessingStatus::Processing => 0.0,
            }
        } else {
            (current_frame as f32 / self.total_frames as f32) * 100.0
        };

        let estimated_seconds_remaining = if current_frame > 0 {
            let elapsed = self.started_at.elapsed().as_secs_f32();
            let per_frame = elapsed / current_frame as f32;
            Some(per_frame * self.total_frames.saturating_sub(current_frame) as f32)
        } else {
            None
        };

        let snapshot = ProgressSnapshot {
            current_frame,
            total_frames: self.total_frames,
            percentage,
            estimated_seconds_remaining,
            status,
            message: message.to_string(),
        };

        if sink.try_send(snapshot).is_err() {
            debug!("Progress sink full or closed; snapshot dropped");
        }
    }

    /// Final snapshot: exactly 100%, emitted once when the stream is drained.
    pub fn finish(&self, message: &str) {
        self.report(self.total_frames, ProcessingStatus::Complete, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sink_is_a_no_op() {
        let reporter = ProgressReporter::new(100, None);
        reporter.report(10, ProcessingStatus::Processing, "ok");
        reporter.finish("done");
    }

    #[test]
    fn first_frame_has_no_estimate() {
        let (tx, rx) = flume::unbounded();
        let reporter = ProgressReporter::new(100, Some(tx));
        reporter.report(0, ProcessingStatus::Processing, "start");
        let snap = rx.try_recv().unwrap();
        assert_eq!(snap.percentage, 0.0);
        assert!(snap.estimated_seconds_remaining.is_none());
    }

    #[test]
    fn finish_reports_exactly_hundred() {
        let (tx, rx) = flume::unbounded();
        let reporter = ProgressReporter::new(250, Some(tx));
        reporter.finish("done");
        let snap = rx.try_recv().unwrap();
        assert_eq!(snap.percentage, 100.0);
        assert_eq!(snap.status, ProcessingStatus::Complete);
        assert_eq!(snap.current_frame, 250);
    }

    #[test]
    fn midway_has_estimate_and_partial_percentage() {
        let (tx, rx) = flume::unbounded();
        let reporter = ProgressReporter::new(200, Some(tx));
        reporter.report(50, ProcessingStatus::Processing, "going");
        let snap = rx.try_recv().unwrap();
        assert_eq!(snap.percentage, 25.0);
        assert!(snap.estimated_seconds_remaining.is_some());
    }
}
