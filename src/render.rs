//! Per-frame render loop: composite, present, read back, hand off to the encoder
//!
//! The loop never waits on the encoder. Readback only runs while an output
//! destination is enabled or a snapshot is pending, and a completed readback
//! is handed to the output queue by value.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::context::Orientation;
use crate::display::{
    save_left_eye, AsyncReadback, DrawRequest, GraphicsBackend, PixelTransfer, ReadbackOutcome,
    Rect, SnapshotRequests, StereoCompositor,
};
use crate::notify::{Alert, Alerts};
use crate::pipeline::{FrameExchange, StereoFrame};
use crate::recording::{
    EncodeSettings, EncoderFactory, EncoderSupervisor, HealthStatus, RecordingHealth,
    VideoOutput,
};
use crate::{Config, HudContext, Result};

const INDICATOR_SIZE: i32 = 24;
const INDICATOR_MARGIN: i32 = 40;
const INDICATOR_RECORDING: [u8; 4] = [220, 30, 30, 255];
const INDICATOR_ALERT: [u8; 4] = [255, 170, 0, 255];

struct CameraTextures<X> {
    left: X,
    right: X,
}

/// HUD element drawn on top of the camera image every frame
pub struct Overlay<X> {
    pub texture: X,
    pub request: DrawRequest,
}

/// What one call to [`RenderLoop::tick`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    /// A new camera frame was uploaded this tick
    pub uploaded: bool,
    /// Age of the uploaded camera frame when its textures were filled
    pub capture_latency: Option<Duration>,
    /// Draw calls issued for the camera image
    pub camera_draws: usize,
    /// `None` when neither output nor a snapshot needed the framebuffer
    pub readback: Option<ReadbackOutcome>,
    /// File written for a snapshot served this tick
    pub snapshot: Option<PathBuf>,
    pub encoder_spawned: bool,
    pub health: HealthStatus,
}

pub struct RenderLoop<G, T, F>
where
    G: GraphicsBackend,
    T: PixelTransfer,
    F: EncoderFactory,
{
    backend: G,
    readback: AsyncReadback<T>,
    supervisor: EncoderSupervisor<F>,
    compositor: StereoCompositor,
    health: RecordingHealth,
    cameras: Option<CameraTextures<G::Texture>>,
    overlays: Vec<Overlay<G::Texture>>,
    last_sequence: Option<u64>,
    exchange: Arc<FrameExchange>,
    output: Arc<VideoOutput>,
    orientation: Arc<Orientation>,
    alerts: Arc<Alerts>,
    snapshots: Arc<SnapshotRequests>,
    eye: (u32, u32),
    camera: (u32, u32),
    crop_x: u32,
    frame_interval: Duration,
}

impl<G, T, F> RenderLoop<G, T, F>
where
    G: GraphicsBackend,
    T: PixelTransfer,
    F: EncoderFactory,
{
    pub fn new(ctx: &HudContext, backend: G, transfer: T, factory: F) -> Self {
        let config: Arc<Config> = ctx.config();
        // Readback and encoding follow the real framebuffer, which a
        // fullscreen window may have resized
        let (width, height) = backend.output_size();
        let configured = config.display.output_size();
        if (width, height) != configured {
            warn!(
                "Framebuffer is {}x{}, configured {}x{}; recording at framebuffer size",
                width, height, configured.0, configured.1
            );
        }

        Self {
            backend,
            readback: AsyncReadback::new(transfer, width, height),
            supervisor: EncoderSupervisor::new(
                factory,
                ctx.output.clone(),
                EncodeSettings::from_config(&config).with_frame_size(width, height),
            ),
            compositor: StereoCompositor::new(config.display.eye_width, config.display.eye_height),
            health: RecordingHealth::new(Duration::from_secs(config.recording.health_check_secs)),
            cameras: None,
            overlays: Vec::new(),
            last_sequence: None,
            exchange: ctx.exchange.clone(),
            output: ctx.output.clone(),
            orientation: ctx.orientation.clone(),
            alerts: ctx.alerts.clone(),
            snapshots: ctx.snapshots.clone(),
            eye: (config.display.eye_width, config.display.eye_height),
            camera: (config.capture.width, config.capture.height),
            crop_x: config.capture.crop_x,
            frame_interval: Duration::from_millis(config.display.frame_interval_ms),
        }
    }

    pub fn add_overlay(&mut self, overlay: Overlay<G::Texture>) {
        self.overlays.push(overlay);
    }

    pub fn backend(&self) -> &G {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut G {
        &mut self.backend
    }

    pub fn supervisor(&self) -> &EncoderSupervisor<F> {
        &self.supervisor
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Render one frame and, if output is enabled, feed it to the encoder
    pub fn tick(&mut self) -> Result<FrameReport> {
        self.backend.clear();

        // Only the Arc clone happens under the exchange lock
        let frame = self.exchange.latest();
        let uploaded = match &frame {
            Some(frame) => self.upload(frame)?,
            None => false,
        };
        let capture_latency = match &frame {
            Some(frame) if uploaded => {
                let latency = frame.captured_at.elapsed();
                metrics::histogram!("capture_to_display_us").record(latency.as_micros() as f64);
                Some(latency)
            }
            _ => None,
        };
        let camera_draws = self.draw_cameras()?;
        self.draw_overlays()?;
        self.draw_indicator()?;
        drop(frame);

        let (readback, snapshot) = self.read_back();

        let encoder_spawned = self.supervisor.ensure_running()?;
        let health = self.health.check(&self.output, Instant::now());

        self.backend.present();

        Ok(FrameReport {
            uploaded,
            capture_latency,
            camera_draws,
            readback,
            snapshot,
            encoder_spawned,
            health,
        })
    }

    /// Tick, then sleep out the rest of the frame interval
    pub fn tick_paced(&mut self) -> Result<FrameReport> {
        let started = Instant::now();
        let report = self.tick()?;
        if let Some(rest) = self.frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
        Ok(report)
    }

    fn upload(&mut self, frame: &StereoFrame) -> Result<bool> {
        if self.last_sequence == Some(frame.sequence) {
            return Ok(false);
        }

        let (width, height) = self.camera;
        let pitch = width as usize * 4;
        let expected = pitch * height as usize;
        let left = frame.left.data();
        let right = frame.right_or_left().data();
        if left.len() < expected || right.len() < expected {
            warn!(
                "Camera frame {} too short ({} / {} bytes, expected {})",
                frame.sequence,
                left.len(),
                right.len(),
                expected
            );
            self.last_sequence = Some(frame.sequence);
            return Ok(false);
        }

        let textures = match self.cameras.take() {
            Some(textures) => textures,
            None => {
                info!("Creating {}x{} camera textures", width, height);
                CameraTextures {
                    left: self.backend.create_texture(width, height)?,
                    right: self.backend.create_texture(width, height)?,
                }
            }
        };
        let textures = self.cameras.insert(textures);

        self.backend
            .update_texture(&mut textures.left, &left[..expected], pitch)?;
        self.backend
            .update_texture(&mut textures.right, &right[..expected], pitch)?;

        self.last_sequence = Some(frame.sequence);
        Ok(true)
    }

    fn draw_cameras(&mut self) -> Result<usize> {
        let Some(textures) = &self.cameras else {
            return Ok(0);
        };

        let (width, height) = self.camera;
        let crop = self.crop_x.min(width / 2) as i32;
        let src = Rect::new(crop, 0, width as i32 - 2 * crop, height as i32);
        let dst = Rect::new(0, 0, self.eye.0 as i32, self.eye.1 as i32);

        self.compositor.render_pair(
            &mut self.backend,
            &textures.left,
            &textures.right,
            Some(src),
            dst,
            None,
            0.0,
        )
    }

    fn draw_overlays(&mut self) -> Result<()> {
        let roll = self.orientation.roll();
        for overlay in &self.overlays {
            self.compositor
                .draw(&mut self.backend, &overlay.texture, &overlay.request, roll)?;
        }
        Ok(())
    }

    fn draw_indicator(&mut self) -> Result<()> {
        let colour = if self.alerts.is_active(Alert::Recording) {
            INDICATOR_ALERT
        } else if self.output.recording_started() {
            INDICATOR_RECORDING
        } else {
            return Ok(());
        };

        let dst = Rect::new(
            self.eye.0 as i32 - INDICATOR_MARGIN - INDICATOR_SIZE,
            INDICATOR_MARGIN,
            INDICATOR_SIZE,
            INDICATOR_SIZE,
        );
        self.compositor.fill(&mut self.backend, dst, colour)
    }

    fn read_back(&mut self) -> (Option<ReadbackOutcome>, Option<PathBuf>) {
        let recording = self.output.recording_state().is_enabled();
        if !recording && !self.snapshots.is_pending() {
            self.readback.reset();
            return (None, None);
        }

        let mut pixels = vec![0u8; self.readback.frame_len()];
        match self.readback.read_into(&mut pixels) {
            Ok(ReadbackOutcome::Captured) => {
                let snapshot = self.serve_snapshot(&pixels);
                if recording {
                    self.output.submit_frame(Bytes::from(pixels));
                }
                (Some(ReadbackOutcome::Captured), snapshot)
            }
            Ok(ReadbackOutcome::Dropped) => (Some(ReadbackOutcome::Dropped), None),
            Err(e) => {
                warn!("Readback failed, dropping frame: {}", e);
                metrics::counter!("frames_dropped").increment(1);
                (Some(ReadbackOutcome::Dropped), None)
            }
        }
    }

    /// Write the pending snapshot from a completed readback. A failed save
    /// is logged and the request discarded.
    fn serve_snapshot(&mut self, pixels: &[u8]) -> Option<PathBuf> {
        let path = self.snapshots.take()?;
        let (width, height) = self.readback.size();
        match save_left_eye(pixels, width, height, self.eye.0, &path) {
            Ok(()) => Some(path),
            Err(e) => {
                error!("Snapshot {} failed: {}", path.display(), e);
                None
            }
        }
    }

    /// Stop the encoder with a bounded wait. Returns false if it had to be
    /// forced down.
    pub fn shutdown(&mut self) -> bool {
        debug!("Render loop shutting down");
        self.supervisor.stop()
    }
}
