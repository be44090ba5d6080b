//! Error types for the capture, composite and encode pipeline

use thiserror::Error;

/// Errors raised by the HUD pipeline.
///
/// Most of these are scoped: a failing encoder disables its destination and a
/// failing readback drops one frame. Only [`HudError::SourceLost`] is fatal to
/// the whole process.
#[derive(Error, Debug)]
pub enum HudError {
    /// The textual pipeline description could not be turned into a pipeline
    #[error("Could not construct pipeline: {0}")]
    PipelineConstruction(String),

    /// The backend refused to transition into its playing state
    #[error("Failed to start pipeline: {0}")]
    PipelineStart(String),

    /// The running pipeline has no clock to timestamp buffers against
    #[error("Pipeline clock unavailable; output cannot be recorded")]
    ClockUnavailable,

    /// Pushing a buffer into the encoder was rejected
    #[error("Buffer push failed: {0}")]
    Push(String),

    /// A buffer for the encoder could not be allocated
    #[error("Failed to allocate buffer for encoding")]
    BufferAlloc,

    /// A camera buffer could not be mapped into host memory
    #[error("Failed to map buffer: {0}")]
    Map(String),

    /// A camera sink reached end-of-stream
    #[error("Camera source {0} reached end of stream")]
    SourceLost(&'static str),

    /// Graphics backend failure (texture upload, draw call)
    #[error("Graphics backend error: {0}")]
    Graphics(String),

    /// GPU readback failure other than a busy staging region
    #[error("Readback error: {0}")]
    Readback(String),

    /// A still image could not be encoded or written
    #[error("Failed to save snapshot: {0}")]
    Snapshot(#[from] image::ImageError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = HudError> = std::result::Result<T, E>;
