//! velotrack CLI — process a video file and report unique detections.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{debug, info};

use velotrack::{
    load_config, DetectionMode, DetectionStore, ProcessOptions, ProcessingStatus, VideoFile,
    VideoProcessor, YoloDetector,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    MicroMobilityOnly,
    AllVehicles,
}

impl From<ModeArg> for DetectionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::MicroMobilityOnly => DetectionMode::MicroMobilityOnly,
            ModeArg::AllVehicles => DetectionMode::AllVehicles,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "velotrack", about = "Micro-mobility video analysis")]
struct Args {
    /// Video file to process
    video: PathBuf,

    /// Detection filtering mode (overrides config)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Process every nth frame (overrides config)
    #[arg(long)]
    frame_skip: Option<u32>,

    /// Write the full unique-detection records as JSON
    #[arg(long)]
    output: Option<PathBuf>,

    /// Skip persisting results to the detection store
    #[arg(long)]
    no_db: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    velotrack::logging::init_logging();
    let args = Args::parse();
    let cfg = load_config().context("failed to load configuration")?;

    let mode = args.mode.map(DetectionMode::from).unwrap_or(cfg.pipeline.detection_mode);
    let frame_skip = args.frame_skip.unwrap_or(cfg.pipeline.frame_skip);

    let mut source = VideoFile::open(&args.video)
        .with_context(|| format!("failed to open {}", args.video.display()))?;
    let video_name = source.metadata().filename.clone();

    let mut detector = YoloDetector::new(
        &cfg.detector.model_path,
        cfg.detector.input_size,
        cfg.detector.confidence_threshold,
        cfg.detector.nms_threshold,
    )
    .with_context(|| format!("failed to load model {}", cfg.detector.model_path))?;

    // Drain progress snapshots into the log.
    let (progress_tx, progress_rx) = flume::unbounded();
    let progress_task = tokio::spawn(async move {
        while let Ok(snap) = progress_rx.recv_async().await {
            if snap.status == ProcessingStatus::Complete {
                info!("Progress: 100% ({} frames)", snap.total_frames);
            } else {
                debug!(
                    "Progress: {:.1}% (frame {}/{})",
                    snap.percentage, snap.current_frame, snap.total_frames
                );
            }
        }
    });

    let processor = VideoProcessor::new(cfg.tracker.clone());
    let results = processor
        .process_video(
            &mut source,
            &mut detector,
            ProcessOptions {
                mode,
                frame_skip,
                progress: Some(progress_tx),
                stop: None,
            },
        )
        .await?;
    let _ = progress_task.await;

    info!("{}: {} unique detections", video_name, results.len());

    if !args.no_db {
        let store = DetectionStore::open(&cfg.database.path)?;
        for det in &results {
            store.insert(&video_name, det)?;
        }
        for (label, count) in store.count_by_class(Some(&video_name))? {
            info!("  {}: {}", label, count);
        }
    }

    if let Some(path) = args.output {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &results)?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}
