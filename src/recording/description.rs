//! Encoder pipeline descriptions
//!
//! Every description starts at an `appsrc` named [`APPSRC_NAME`] fed with
//! RGBA frames of the composited output.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use super::DestinationType;
use crate::{Container, RecordingConfig, StreamConfig};

pub const APPSRC_NAME: &str = "srcEncode";

/// H.264 encoders, hardware first; the last one is pure software
pub const H264_ENCODERS: [&str; 4] = ["nvh264enc", "vaapih264enc", "v4l2h264enc", "x264enc"];

const PARSE: &str = "h264parse ! ";
const PARSE_CONFIG: &str = "h264parse config-interval=1 ! ";
const TEE: &str = "tee name=split ! ";
const TEE_BRANCH: &str = "split. ! ";
const QUEUE_TO_MUX: &str = "queue ! mux.";
const LEAKY_QUEUE_TO_MUX: &str = "queue leaky=2 ! mux.";

/// Everything needed to describe one encoder pipeline
pub struct EncodeParams<'a> {
    pub destination: DestinationType,
    /// Size of the composited frame pushed into appsrc
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// H.264 encoder element name
    pub encoder: &'a str,
    pub filename: &'a Path,
    pub recording: &'a RecordingConfig,
    pub stream: &'a StreamConfig,
}

/// `<dir>/visor-vid-YYYYmmdd_HHMMSS.<ext>`
pub fn recording_filename(dir: &Path, container: Container, now: DateTime<Local>) -> PathBuf {
    dir.join(format!(
        "visor-vid-{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        container.extension()
    ))
}

/// Encoder element with rate control appropriate for the branch
pub fn encoder_element(encoder: &str, bitrate_kbps: u32, low_latency: bool) -> String {
    match encoder {
        "x264enc" if low_latency => format!("x264enc bitrate={} tune=zerolatency", bitrate_kbps),
        "x264enc" => format!("x264enc bitrate={} speed-preset=1", bitrate_kbps),
        "nvh264enc" | "vaapih264enc" => format!("{} bitrate={}", encoder, bitrate_kbps),
        other => other.to_string(),
    }
}

fn input(params: &EncodeParams) -> String {
    format!(
        "appsrc name={} ! \
         video/x-raw, width=(int){}, height=(int){}, format=(string)RGBA, framerate=(fraction){}/1 ! \
         queue max-size-buffers=30 ! clocksync ! ",
        APPSRC_NAME, params.width, params.height, params.fps
    )
}

fn video_main(params: &EncodeParams) -> String {
    format!(
        "videoconvert ! video/x-raw, format=I420 ! {} ! ",
        encoder_element(params.encoder, params.recording.record_bitrate_kbps, false)
    )
}

fn video_stream(params: &EncodeParams) -> String {
    format!(
        "videoconvert ! video/x-raw, format=I420, width=(int){}, height=(int){} ! {} ! ",
        params.stream.width,
        params.stream.height,
        encoder_element(params.encoder, params.stream.bitrate / 1000, false)
    )
}

fn video_live(params: &EncodeParams) -> String {
    format!(
        "videoconvert ! video/x-raw, width=(int){}, height=(int){}, format=I420 ! {} ! ",
        params.stream.width,
        params.stream.height,
        encoder_element(params.encoder, params.stream.bitrate / 1000, true)
    )
}

fn audio(device: &str, aac_parse: bool) -> String {
    format!(
        "pulsesrc device={} do-timestamp=true provide-clock=true ! \
         audio/x-raw, format=(string)S16LE, rate=(int)44100, channels=(int)2 ! \
         audioconvert ! voaacenc bitrate=128000 ! {}queue ! mux.",
        device,
        if aac_parse { "aacparse ! " } else { "" }
    )
}

fn file_out(path: &Path) -> String {
    format!(" ! filesink location={}", path.display())
}

fn udp_out(stream: &StreamConfig) -> String {
    format!(
        "rtph264pay ! udpsink host={} port={} sync=false",
        stream.dest_ip, stream.port
    )
}

fn rtmp_out(stream: &StreamConfig) -> String {
    format!(
        "flvmux name=mux streamable=true latency=100000000 ! \
         rtmpsink location='{}/{} live=1'",
        stream.rtmp_url.trim_end_matches('/'),
        stream.rtmp_key.as_deref().unwrap_or_default()
    )
}

/// Build the textual pipeline for `params.destination`.
///
/// Returns `None` for [`DestinationType::Disabled`].
pub fn encode_pipeline(params: &EncodeParams) -> Option<String> {
    let mut desc = input(params);

    match params.destination {
        DestinationType::Disabled => return None,
        DestinationType::Record => {
            desc.push_str(&video_main(params));
            desc.push_str(PARSE);
            if let Some(device) = &params.recording.audio_device {
                desc.push_str(QUEUE_TO_MUX);
                desc.push(' ');
                desc.push_str(&audio(device, false));
                desc.push(' ');
            }
            desc.push_str(params.recording.container.muxer());
            desc.push_str(&file_out(params.filename));
        }
        DestinationType::RecordStream => {
            desc.push_str(TEE);
            desc.push_str(&video_main(params));
            desc.push_str(PARSE);
            desc.push_str(params.recording.container.muxer());
            desc.push_str(&file_out(params.filename));
            desc.push(' ');
            desc.push_str(TEE_BRANCH);
            desc.push_str(&video_stream(params));
            desc.push_str(PARSE_CONFIG);
            desc.push_str(&udp_out(params.stream));
        }
        DestinationType::Stream => {
            desc.push_str(&video_live(params));
            desc.push_str(PARSE);
            if let Some(device) = &params.recording.audio_device {
                desc.push_str(LEAKY_QUEUE_TO_MUX);
                desc.push(' ');
                desc.push_str(&audio(device, true));
                desc.push(' ');
            }
            desc.push_str(&rtmp_out(params.stream));
        }
    }

    Some(desc)
}
