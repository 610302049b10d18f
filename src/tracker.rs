//! Track Registry — multi-frame matching and deduplication.
//!
//! Decides, frame after frame, which detections are the same physical object
//! reappearing and which are new objects entering the scene. Matching is
//! purely geometric (IoU + centroid distance against a track's most recent
//! box), greedy, and processed track-by-track in insertion order, so the
//! outcome is deterministic for identical inputs.
//!
//! The registry is owned by one processing invocation. It carries no state
//! across videos.

use std::collections::VecDeque;

use tracing::debug;
use uuid::Uuid;

use crate::detector::{Detection, VehicleClass};
use crate::geometry::{centroid_distance, iou, BoundingBox};

/// How many history entries a track retains.
pub const HISTORY_CAPACITY: usize = 10;

// ─── Bounded history ─────────────────────────────────────────────────────────

/// Fixed-capacity ring buffer: pushing beyond capacity drops the oldest entry.
#[derive(Debug, Clone)]
pub struct History<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(value);
    }

    pub fn last(&self) -> Option<&T> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

// ─── Track ───────────────────────────────────────────────────────────────────

/// A persistent hypothesis that a sequence of per-frame detections refers to
/// one physical object.
#[derive(Debug, Clone)]
pub struct Track {
    pub id:              Uuid,
    pub class:           VehicleClass,
    pub last_seen_frame: u64,
    /// Count of updates this track has received.
    pub age:             u32,
    positions:   History<(f32, f32)>,
    confidences: History<f32>,
    boxes:       History<BoundingBox>,
}

impl Track {
    fn new(id: Uuid, class: VehicleClass, frame_number: u64) -> Self {
        Self {
            id,
            class,
            last_seen_frame: frame_number,
            age: 0,
            positions: History::new(HISTORY_CAPACITY),
            confidences: History::new(HISTORY_CAPACITY),
            boxes: History::new(HISTORY_CAPACITY),
        }
    }

    /// Fold a matching detection into this track. All three histories grow
    /// in lockstep; the window slides once capacity is reached.
    fn update(&mut self, detection: &Detection, frame_number: u64) {
        self.positions.push(detection.bbox.center());
        self.confidences.push(detection.confidence);
        self.boxes.push(detection.bbox);
        self.last_seen_frame = frame_number;
        self.age += 1;
    }

    pub fn last_bbox(&self) -> Option<&BoundingBox> {
        self.boxes.last()
    }

    pub fn last_position(&self) -> Option<(f32, f32)> {
        self.positions.last().copied()
    }

    pub fn history_len(&self) -> usize {
        self.boxes.len()
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// A detection that failed to match any live track and spawned a new one.
/// The caller turns each of these into exactly one unique-detection record.
#[derive(Debug, Clone)]
pub struct FirstSighting {
    pub track_id:  Uuid,
    pub detection: Detection,
}

/// The set of currently live tracks. Owns creation, per-frame matching,
/// and expiry.
pub struct TrackRegistry {
    tracks: Vec<Track>,
    iou_threshold: f32,
    distance_threshold: f32,
    max_missing_frames: u64,
}

impl TrackRegistry {
    pub fn new(iou_threshold: f32, distance_threshold: f32, max_missing_frames: u64) -> Self {
        Self {
            tracks: Vec::new(),
            iou_threshold,
            distance_threshold,
            max_missing_frames,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Feed one frame's detections through match / update / create / expire.
    /// Returns the first sightings, in the order their tracks were created.
    pub fn observe(&mut self, detections: &[Detection], frame_number: u64) -> Vec<FirstSighting> {
        let mut unmatched: Vec<Detection> = detections.to_vec();

        // ── 1. Match detections to live tracks, greedy, insertion order ──
        for track in &mut self.tracks {
            // Only the most recent box matters for matching, never the
            // full history.
            let Some(last_box) = track.last_bbox().copied() else {
                continue; // empty history, cannot be matched
            };

            let mut best: Option<(usize, f32)> = None;
            for (i, det) in unmatched.iter().enumerate() {
                let overlap = iou(&det.bbox, &last_box);
                let dist = centroid_distance(&det.bbox, &last_box);

                // Eligible only if it overlaps enough OR is close enough.
                if overlap <= self.iou_threshold && dist >= self.distance_threshold {
                    continue;
                }

                // Combined score, lower is better. Strict `<` keeps the
                // earliest candidate on ties, so assignment is stable.
                let score = (1.0 - overlap) + dist / self.distance_threshold;
                if best.map_or(true, |(_, s)| score < s) {
                    best = Some((i, score));
                }
            }

            if let Some((i, _)) = best {
                let det = unmatched.remove(i);
                track.update(&det, frame_number);
            }
        }

        // ── 2. Every detection still unmatched spawns a new track ────────
        let mut sightings = Vec::with_capacity(unmatched.len());
        for det in unmatched {
            let id = Uuid::new_v4();
            let mut track = Track::new(id, det.class, frame_number);
            track.update(&det, frame_number);
            self.tracks.push(track);
            sightings.push(FirstSighting {
                track_id: id,
                detection: det,
            });
        }

        // ── 3. Expire tracks outside the patience window, silently ───────
        let max_missing = self.max_missing_frames;
        self.tracks
            .retain(|t| frame_number - t.last_seen_frame <= max_missing);

        debug!(
            "Frame {}: {} detections, {} matched, {} new, {} live tracks",
            frame_number,
            detections.len(),
            detections.len() - sightings.len(),
            sightings.len(),
            self.tracks.len()
        );

        sightings
    }
}
