//! Media-encoding backend capability driven by the encode thread

use std::time::Duration;

use bytes::Bytes;

use crate::Result;

/// Raw video format pushed into the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl FrameFormat {
    /// Bytes in one RGBA frame
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Timing stamped onto every pushed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTiming {
    /// Pipeline running time (clock time minus base time)
    pub pts: Option<Duration>,
    pub duration: Duration,
    /// Monotonic buffer counter
    pub offset: u64,
}

/// Messages surfaced from the backend's bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Error(String),
    Warning(String),
    Eos,
    StateChanged { old: String, new: String },
    AsyncDone,
}

/// Stops a backend from outside its owning thread
pub type AbortHandle = Box<dyn FnOnce() + Send>;

/// A constructed encoder pipeline
pub trait EncoderBackend: Send {
    /// Transition to playing and obtain the pipeline clock.
    ///
    /// Fails with [`crate::HudError::ClockUnavailable`] if the pipeline has no
    /// clock to timestamp buffers against.
    fn start(&mut self) -> Result<()>;

    /// Set by the backend's need-data notification, cleared by enough-data
    fn needs_data(&self) -> bool;

    /// Current running time of the pipeline
    fn running_time(&self) -> Option<Duration>;

    fn push_buffer(&mut self, data: Bytes, timing: BufferTiming) -> Result<()>;

    /// Next pending bus message, without blocking
    fn poll_bus(&mut self) -> Option<BusEvent>;

    /// Send end-of-stream, wait up to `timeout` for it to drain, then release
    /// the pipeline.
    fn shutdown(&mut self, timeout: Duration);

    /// Handle that forces the pipeline down from another thread
    fn abort_handle(&self) -> AbortHandle;
}

/// Turns a textual description into a backend
pub trait EncoderFactory: Send + Sync + 'static {
    type Backend: EncoderBackend + 'static;

    fn construct(&self, description: &str, format: FrameFormat) -> Result<Self::Backend>;

    /// H.264 encoder element used when none is configured
    fn h264_encoder(&self) -> String {
        "x264enc".to_string()
    }
}
