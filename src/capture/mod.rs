pub mod acquisition;
pub mod description;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod sink;
pub mod sync;

pub use acquisition::{spawn_acquisition, AcquisitionLoop, CameraRig, Iteration};
pub use sink::{CameraSample, CameraSink, Eye};
