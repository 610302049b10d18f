//! End-to-end engine tests: scripted detections through the full frame loop.

use opencv::core::{Mat, Scalar, CV_8UC3};

use velotrack::{
    BoundingBox, Detection, DetectionMode, FrameSource, ObjectDetector, ProcessOptions,
    TrackerConfig, VehicleClass, VideoProcessor,
};

/// Synthetic source: `total` black frames at a fixed rate.
struct ScriptedSource {
    total: u64,
    fps: f64,
    emitted: u64,
}

impl ScriptedSource {
    fn new(total: u64, fps: f64) -> Self {
        Self {
            total,
            fps,
            emitted: 0,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn frame_count(&self) -> u64 {
        self.total
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn read(&mut self) -> velotrack::Result<Option<Mat>> {
        if self.emitted >= self.total {
            return Ok(None);
        }
        self.emitted += 1;
        let frame =
            Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(0.0))?;
        Ok(Some(frame))
    }
}

/// Detector scripted by call order: the nth processed frame gets the nth
/// detection list. Can be made not-ready or told to fail on a given call.
struct FakeDetector {
    per_frame: Vec<Vec<Detection>>,
    ready: bool,
    fail_on_call: Option<usize>,
    calls: usize,
}

impl FakeDetector {
    fn new(per_frame: Vec<Vec<Detection>>) -> Self {
        Self {
            per_frame,
            ready: true,
            fail_on_call: None,
            calls: 0,
        }
    }
}

impl ObjectDetector for FakeDetector {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn detect(&mut self, _frame: &Mat, _mode: DetectionMode) -> velotrack::Result<Vec<Detection>> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_on_call == Some(call) {
            return Err(velotrack::Error::Detector {
                frame: call as u64,
                message: "scripted failure".into(),
            });
        }
        Ok(self.per_frame.get(call).cloned().unwrap_or_default())
    }
}

fn bicycle(x: f32, y: f32) -> Detection {
    Detection {
        class: VehicleClass::Bicycle,
        confidence: 0.85,
        bbox: BoundingBox::new(x, y, 50.0, 50.0),
    }
}

fn car(x: f32, y: f32) -> Detection {
    Detection {
        class: VehicleClass::Car,
        confidence: 0.90,
        bbox: BoundingBox::new(x, y, 80.0, 60.0),
    }
}

fn processor() -> VideoProcessor {
    VideoProcessor::new(TrackerConfig::default())
}

#[tokio::test]
async fn stationary_bicycle_yields_one_record() {
    // One bicycle at a nearly static position in frames 0-4.
    let frames: Vec<Vec<Detection>> = (0..5)
        .map(|f| vec![bicycle(100.0 + f as f32, 100.0)])
        .collect();

    let mut source = ScriptedSource::new(5, 30.0);
    let mut detector = FakeDetector::new(frames);
    let results = processor()
        .process_video(&mut source, &mut detector, ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let record = &results[0];
    assert_eq!(record.frame_number, 0);
    assert_eq!(record.timestamp, "00:00:00.000");

    // Ranked suggestions for a 0.85 bicycle.
    let labels: Vec<_> = record.suggestions.iter().map(|s| s.label).collect();
    assert_eq!(
        labels,
        vec![
            VehicleClass::Bicycle,
            VehicleClass::Motorcycle,
            VehicleClass::ElectricScooter
        ]
    );
    assert!((record.suggestions[0].confidence - 0.85).abs() < 1e-6);
    assert!((record.suggestions[1].confidence - 0.68).abs() < 1e-6);
    assert!((record.suggestions[2].confidence - 0.68).abs() < 1e-6);
}

#[tokio::test]
async fn record_keeps_first_seen_pose() {
    // The object drifts; the emitted record must reflect frame 0, not later.
    let frames: Vec<Vec<Detection>> = (0..6)
        .map(|f| vec![bicycle(100.0 + f as f32 * 4.0, 100.0)])
        .collect();

    let mut source = ScriptedSource::new(6, 30.0);
    let mut detector = FakeDetector::new(frames);
    let results = processor()
        .process_video(&mut source, &mut detector, ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].bbox, BoundingBox::new(100.0, 100.0, 50.0, 50.0));
}

#[tokio::test]
async fn gap_beyond_patience_yields_second_record() {
    // Car in frame 0, nothing in frames 1-12, car again in frame 13.
    let mut frames: Vec<Vec<Detection>> = vec![vec![car(100.0, 100.0)]];
    frames.extend((0..12).map(|_| Vec::new()));
    frames.push(vec![car(100.0, 100.0)]);

    let mut source = ScriptedSource::new(14, 30.0);
    let mut detector = FakeDetector::new(frames);
    let results = processor()
        .process_video(
            &mut source,
            &mut detector,
            ProcessOptions {
                mode: DetectionMode::AllVehicles,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].frame_number, 0);
    assert_eq!(results[1].frame_number, 13);
    assert_ne!(results[0].id, results[1].id);
}

#[tokio::test]
async fn separate_objects_yield_separate_records_in_creation_order() {
    let frames = vec![
        vec![bicycle(50.0, 50.0)],
        vec![bicycle(50.0, 50.0), bicycle(400.0, 300.0)],
        vec![bicycle(50.0, 50.0), bicycle(400.0, 300.0)],
    ];

    let mut source = ScriptedSource::new(3, 30.0);
    let mut detector = FakeDetector::new(frames);
    let results = processor()
        .process_video(&mut source, &mut detector, ProcessOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].frame_number, 0);
    assert_eq!(results[1].frame_number, 1);
}

#[tokio::test]
async fn frame_skip_still_deduplicates() {
    // Same bicycle every frame; with frame_skip=2 only even frames are
    // processed, and the gaps stay within the patience window.
    let frames: Vec<Vec<Detection>> = (0..10).map(|_| vec![bicycle(100.0, 100.0)]).collect();

    let mut source = ScriptedSource::new(20, 30.0);
    let mut detector = FakeDetector::new(frames);
    let results = processor()
        .process_video(
            &mut source,
            &mut detector,
            ProcessOptions {
                frame_skip: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(detector.calls, 10);
}

#[tokio::test]
async fn progress_is_monotonic_with_one_final_hundred() {
    let mut source = ScriptedSource::new(100, 30.0);
    let mut detector = FakeDetector::new(Vec::new());
    let (tx, rx) = flume::unbounded();

    processor()
        .process_video(
            &mut source,
            &mut detector,
            ProcessOptions {
                progress: Some(tx),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let snapshots: Vec<_> = rx.drain().collect();
    assert!(!snapshots.is_empty());

    let mut last = -1.0f32;
    for snap in &snapshots {
        assert!(snap.percentage >= last, "percentage regressed");
        last = snap.percentage;
    }
    let hundreds = snapshots.iter().filter(|s| s.percentage == 100.0).count();
    assert_eq!(hundreds, 1);
    assert_eq!(snapshots.last().unwrap().percentage, 100.0);
}

#[tokio::test]
async fn identical_inputs_produce_identical_assignments() {
    let script: Vec<Vec<Detection>> = (0..20)
        .map(|f| {
            vec![
                bicycle(100.0 + f as f32 * 2.0, 100.0),
                car(400.0, 200.0 + f as f32),
            ]
        })
        .collect();

    let run = |frames: Vec<Vec<Detection>>| async {
        let mut source = ScriptedSource::new(20, 30.0);
        let mut detector = FakeDetector::new(frames);
        let results = processor()
            .process_video(
                &mut source,
                &mut detector,
                ProcessOptions {
                    mode: DetectionMode::AllVehicles,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        results
            .into_iter()
            .map(|r| (r.frame_number, r.suggestions[0].label, r.bbox))
            .collect::<Vec<_>>()
    };

    let first = run(script.clone()).await;
    let second = run(script).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn unready_detector_fails_fast() {
    let mut source = ScriptedSource::new(5, 30.0);
    let mut detector = FakeDetector::new(Vec::new());
    detector.ready = false;

    let err = processor()
        .process_video(&mut source, &mut detector, ProcessOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, velotrack::Error::DetectorNotReady));
    assert_eq!(detector.calls, 0);
}

#[tokio::test]
async fn detector_failure_aborts_the_run() {
    let frames: Vec<Vec<Detection>> = (0..10).map(|_| vec![bicycle(100.0, 100.0)]).collect();
    let mut source = ScriptedSource::new(10, 30.0);
    let mut detector = FakeDetector::new(frames);
    detector.fail_on_call = Some(3);

    let err = processor()
        .process_video(&mut source, &mut detector, ProcessOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, velotrack::Error::Detector { frame: 3, .. }));
}

#[tokio::test]
async fn stop_signal_halts_consumption() {
    let frames: Vec<Vec<Detection>> = (0..50).map(|_| vec![bicycle(100.0, 100.0)]).collect();
    let mut source = ScriptedSource::new(50, 30.0);
    let mut detector = FakeDetector::new(frames);

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(true);
    let results = processor()
        .process_video(
            &mut source,
            &mut detector,
            ProcessOptions {
                stop: Some(stop_rx),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    drop(stop_tx);

    assert!(results.is_empty());
    assert_eq!(detector.calls, 0);
}
