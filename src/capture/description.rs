//! Camera pipeline descriptions
//!
//! Each camera ends in an RGBA `appsink`. In stereo mode the sinks are named
//! `sinkL` and `sinkR`; a single camera uses `sink`.

use crate::{CameraType, CaptureConfig};

pub const SINK_SINGLE: &str = "sink";
pub const SINK_LEFT: &str = "sinkL";
pub const SINK_RIGHT: &str = "sinkR";

/// MJPEG decoders, hardware first; the last one is pure software
pub const JPEG_DECODERS: [&str; 4] = ["nvjpegdec", "vaapijpegdec", "v4l2jpegdec", "jpegdec"];

fn camera_input(config: &CaptureConfig, id: u32, jpeg_decoder: &str) -> String {
    match config.camera_type {
        CameraType::Csi => format!(
            "libcamerasrc name=cam{} ! \
             video/x-raw, width={}, height={}, framerate=(fraction){}/1 ! \
             videoconvert ! ",
            id, config.width, config.height, config.fps
        ),
        CameraType::Usb => format!(
            "v4l2src device=/dev/video{} ! \
             image/jpeg, width={}, height={}, framerate={}/1, format=MJPG ! \
             {} ! videoconvert ! ",
            id, config.width, config.height, config.fps, jpeg_decoder
        ),
    }
}

fn camera_output(config: &CaptureConfig, sink_name: &str) -> String {
    // Leaky queue holds at most one frame interval of video
    format!(
        "video/x-raw, format=(string)RGBA ! \
         queue max-size-time={} leaky=2 ! \
         appsink processing-deadline=0 name={} \
         caps=\"video/x-raw,format=RGBA,pixel-aspect-ratio=1/1\"",
        config.frame_duration().as_nanos(),
        sink_name
    )
}

/// Full description for one or two cameras
pub fn camera_pipeline(config: &CaptureConfig, jpeg_decoder: &str) -> String {
    let (left_id, right_id) = config.camera_ids();

    if !config.is_stereo() {
        return format!(
            "{}{}",
            camera_input(config, left_id, jpeg_decoder),
            camera_output(config, SINK_SINGLE)
        );
    }

    format!(
        "{}{} {}{}",
        camera_input(config, left_id, jpeg_decoder),
        camera_output(config, SINK_LEFT),
        camera_input(config, right_id, jpeg_decoder),
        camera_output(config, SINK_RIGHT)
    )
}
