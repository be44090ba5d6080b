//! Camera sink capability consumed by the acquisition loop

use std::time::Duration;

use crate::pipeline::MappedFrame;
use crate::Result;

/// One of the two viewports of the stereo display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub fn label(self) -> &'static str {
        match self {
            Eye::Left => "left",
            Eye::Right => "right",
        }
    }
}

/// A pulled but not yet mapped camera sample
pub trait CameraSample: Send {
    /// Presentation timestamp, if the source stamped one
    fn pts(&self) -> Option<Duration>;

    /// Map the sample's buffer into host-visible memory
    fn map(self) -> Result<MappedFrame>;
}

/// Source of camera samples (an appsink in production)
pub trait CameraSink: Send {
    type Sample: CameraSample;

    /// Blocking pull; `None` means no sample was available
    fn pull_sample(&mut self) -> Option<Self::Sample>;

    fn is_end_of_stream(&self) -> bool;
}

/// Result of a single pull, classified for the acquisition loop
pub enum Pulled<S> {
    Sample(S),
    /// Null sample without end-of-stream; retry next iteration
    Transient,
    /// Null sample at end-of-stream; the camera is gone
    SourceLost,
}

pub fn pull<S: CameraSink>(sink: &mut S) -> Pulled<S::Sample> {
    match sink.pull_sample() {
        Some(sample) => Pulled::Sample(sample),
        None if sink.is_end_of_stream() => Pulled::SourceLost,
        None => Pulled::Transient,
    }
}
