//! Crate-wide error type.
//!
//! Library code returns `Error` through the `Result` alias; the CLI binary
//! wraps everything in `anyhow` at the edge.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The video source could not be opened at all. Raised before any
    /// tracking state is touched.
    #[error("cannot open video source: {0}")]
    SourceOpen(String),

    /// The detector was asked to process frames before its model was loaded.
    #[error("detector is not ready")]
    DetectorNotReady,

    /// The detector failed mid-stream. Aborts the whole run; no partial
    /// salvage across a detector crash.
    #[error("detector failed on frame {frame}: {message}")]
    Detector { frame: u64, message: String },

    #[error("video capture error: {0}")]
    Capture(#[from] opencv::Error),

    #[error("model error: {0}")]
    Model(#[from] ort::Error),

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
