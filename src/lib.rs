pub mod capture;
pub mod context;
pub mod display;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod recording;
pub mod render;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use context::HudContext;
pub use error::{HudError, Result};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub recording: RecordingConfig,
    pub stream: StreamConfig,
}

/// Physical camera interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraType {
    Csi,
    Usb,
}

impl CameraType {
    /// Default sensor / device indices for the left and right camera
    pub fn default_ids(self) -> (u32, u32) {
        match self {
            CameraType::Csi => (0, 1),
            CameraType::Usb => (0, 2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub camera_type: CameraType,
    /// 1 = single camera mirrored to both eyes, 2 = stereo
    pub camera_count: u8,
    pub left_id: Option<u32>,
    pub right_id: Option<u32>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Horizontal crop applied to each side of the camera image
    pub crop_x: u32,
    /// Upper bound on re-pulls while correcting drift between the two streams
    pub max_catchup: u32,
    pub pin_core: Option<usize>,
}

impl CaptureConfig {
    /// Nominal inter-frame interval of the cameras
    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.fps.max(1)))
    }

    pub fn is_stereo(&self) -> bool {
        self.camera_count >= 2
    }

    pub fn camera_ids(&self) -> (u32, u32) {
        let (l, r) = self.camera_type.default_ids();
        (self.left_id.unwrap_or(l), self.right_id.unwrap_or(r))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Width of one eye; the window is twice this wide
    pub eye_width: u32,
    pub eye_height: u32,
    pub fullscreen: bool,
    pub frame_interval_ms: u64,
}

impl DisplayConfig {
    pub fn output_size(&self) -> (u32, u32) {
        (self.eye_width * 2, self.eye_height)
    }
}

/// Output container for recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Mkv,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
        }
    }

    pub fn muxer(self) -> &'static str {
        match self {
            Container::Mp4 => "qtmux name=mux",
            Container::Mkv => "matroskamux name=mux",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub directory: PathBuf,
    pub target_fps: u32,
    pub container: Container,
    /// PulseAudio source mixed into recordings and streams
    pub audio_device: Option<String>,
    /// H.264 encoder element; auto-detected when unset
    pub encoder: Option<String>,
    pub record_bitrate_kbps: u32,
    pub stall_timeout_secs: u64,
    pub shutdown_timeout_ms: u64,
    pub health_check_secs: u64,
}

impl RecordingConfig {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.target_fps.max(1)))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    /// Receiver of the RTP branch when recording and streaming together
    pub dest_ip: String,
    pub port: u16,
    pub rtmp_url: String,
    pub rtmp_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            display: DisplayConfig::default(),
            recording: RecordingConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            camera_type: CameraType::Usb,
            camera_count: 2,
            left_id: None,
            right_id: None,
            width: 1920,
            height: 1080,
            fps: 30,
            crop_x: 0,
            max_catchup: 8,
            pin_core: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            eye_width: 1440,
            eye_height: 1440,
            fullscreen: false,
            frame_interval_ms: 33,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            target_fps: 30,
            container: Container::Mp4,
            audio_device: None,
            encoder: None,
            record_bitrate_kbps: 16_000,
            stall_timeout_secs: 30,
            shutdown_timeout_ms: 2_000,
            health_check_secs: 5,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 960,
            bitrate: 8_000_000,
            dest_ip: "192.168.10.195".into(),
            port: 5000,
            rtmp_url: "rtmp://a.rtmp.youtube.com/live2".into(),
            rtmp_key: None,
        }
    }
}

const DEFAULT_CONFIG_FILE: &str = "visor.toml";
const ENV_PREFIX: &str = "VISOR";

impl Config {
    /// Load configuration from an optional TOML file layered under
    /// `VISOR__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Self::load_layered(file, path.is_some(), Some(ENV_PREFIX))
    }

    fn load_layered(file: &Path, required: bool, env_prefix: Option<&str>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::File::from(file).required(required));
        if let Some(prefix) = env_prefix {
            builder = builder.add_source(config::Environment::with_prefix(prefix).separator("__"));
        }
        Ok(builder.build()?.try_deserialize()?)
    }
}
