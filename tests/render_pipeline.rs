//! Render loop driven end to end with in-memory graphics, readback and encoder

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use visor::display::{Angle, DrawRequest, GraphicsBackend, PixelTransfer, ReadbackOutcome, Rect};
use visor::notify::{Alert, Notifier};
use visor::pipeline::{MappedFrame, StereoFrame};
use visor::recording::encoder::AbortHandle;
use visor::recording::{
    BufferTiming, BusEvent, DestinationType, EncoderBackend, EncoderFactory, FrameFormat,
};
use visor::render::{Overlay, RenderLoop};
use visor::{Config, HudContext, Result};

const EYE_W: u32 = 200;
const EYE_H: u32 = 100;
const CAM_W: u32 = 4;
const CAM_H: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
struct FakeTexture {
    id: usize,
    width: u32,
    height: u32,
}

#[derive(Default)]
struct FakeGraphics {
    /// Framebuffer size; the configured window size when unset
    size: Option<(u32, u32)>,
    textures: usize,
    uploads: usize,
    draws: Vec<(usize, Rect, Rect, f64)>,
    fills: Vec<(Rect, [u8; 4])>,
    presents: usize,
}

impl FakeGraphics {
    fn reset_frame(&mut self) {
        self.draws.clear();
        self.fills.clear();
    }
}

impl GraphicsBackend for FakeGraphics {
    type Texture = FakeTexture;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<FakeTexture> {
        self.textures += 1;
        Ok(FakeTexture {
            id: self.textures,
            width,
            height,
        })
    }

    fn update_texture(&mut self, texture: &mut FakeTexture, pixels: &[u8], pitch: usize) -> Result<()> {
        assert_eq!(pitch, texture.width as usize * 4);
        assert_eq!(pixels.len(), pitch * texture.height as usize);
        self.uploads += 1;
        Ok(())
    }

    fn texture_size(&self, texture: &FakeTexture) -> (u32, u32) {
        (texture.width, texture.height)
    }

    fn output_size(&self) -> (u32, u32) {
        self.size.unwrap_or((EYE_W * 2, EYE_H))
    }

    fn clear(&mut self) {}

    fn draw(&mut self, texture: &FakeTexture, src: Rect, dst: Rect, angle: f64) -> Result<()> {
        self.draws.push((texture.id, src, dst, angle));
        Ok(())
    }

    fn fill_rect(&mut self, rect: Rect, rgba: [u8; 4]) -> Result<()> {
        self.fills.push((rect, rgba));
        Ok(())
    }

    fn present(&mut self) {
        self.presents += 1;
    }
}

#[derive(Default)]
struct FakeTransfer {
    regions: [Vec<u8>; 2],
    frame: u8,
    requested: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl PixelTransfer for FakeTransfer {
    fn begin_transfer(&mut self, region: usize, width: u32, height: u32) -> Result<()> {
        self.requested.lock().unwrap().push((width, height));
        self.frame += 1;
        self.regions[region] = vec![self.frame; (width * height * 4) as usize];
        Ok(())
    }

    fn map_region(&mut self, region: usize, read: &mut dyn FnMut(&[u8])) -> Result<bool> {
        read(&self.regions[region]);
        Ok(true)
    }
}

#[derive(Default)]
struct EncoderLog {
    constructed: AtomicUsize,
    pushed: Mutex<Vec<(usize, u8, u64)>>,
    formats: Mutex<Vec<FrameFormat>>,
}

struct FakeFactory(Arc<EncoderLog>);

struct FakeEncoder(Arc<EncoderLog>);

impl EncoderFactory for FakeFactory {
    type Backend = FakeEncoder;

    fn construct(&self, description: &str, format: FrameFormat) -> Result<FakeEncoder> {
        assert!(description.starts_with("appsrc name=srcEncode"));
        self.0.constructed.fetch_add(1, Ordering::SeqCst);
        self.0.formats.lock().unwrap().push(format);
        Ok(FakeEncoder(self.0.clone()))
    }
}

impl EncoderBackend for FakeEncoder {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn needs_data(&self) -> bool {
        true
    }

    fn running_time(&self) -> Option<Duration> {
        Some(Duration::ZERO)
    }

    fn push_buffer(&mut self, data: Bytes, timing: BufferTiming) -> Result<()> {
        self.0
            .pushed
            .lock()
            .unwrap()
            .push((data.len(), data[0], timing.offset));
        Ok(())
    }

    fn poll_bus(&mut self) -> Option<BusEvent> {
        None
    }

    fn shutdown(&mut self, _timeout: Duration) {}

    fn abort_handle(&self) -> AbortHandle {
        Box::new(|| {})
    }
}

type TestLoop = RenderLoop<FakeGraphics, FakeTransfer, FakeFactory>;

fn config(crop_x: u32) -> Config {
    let mut config = Config::default();
    config.display.eye_width = EYE_W;
    config.display.eye_height = EYE_H;
    config.display.frame_interval_ms = 0;
    config.capture.width = CAM_W;
    config.capture.height = CAM_H;
    config.capture.crop_x = crop_x;
    config.recording.target_fps = 200;
    config.recording.shutdown_timeout_ms = 100;
    config.recording.directory = std::env::temp_dir();
    config
}

fn setup(crop_x: u32) -> (HudContext, TestLoop, Arc<EncoderLog>) {
    setup_with(crop_x, FakeGraphics::default(), FakeTransfer::default())
}

fn setup_with(
    crop_x: u32,
    graphics: FakeGraphics,
    transfer: FakeTransfer,
) -> (HudContext, TestLoop, Arc<EncoderLog>) {
    let (notifier, _rx) = Notifier::channel();
    let ctx = HudContext::new(config(crop_x), notifier);
    let log = Arc::new(EncoderLog::default());
    let render = RenderLoop::new(&ctx, graphics, transfer, FakeFactory(log.clone()));
    (ctx, render, log)
}

fn wait_for_push(log: &EncoderLog) -> bool {
    for _ in 0..300 {
        if !log.pushed.lock().unwrap().is_empty() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn publish(ctx: &HudContext, sequence: u64, len: usize) {
    ctx.exchange.publish(StereoFrame {
        sequence,
        left: MappedFrame::new(Box::new(vec![1u8; len]), None),
        right: Some(MappedFrame::new(Box::new(vec![2u8; len]), None)),
        captured_at: Instant::now(),
    });
}

fn camera_len() -> usize {
    (CAM_W * CAM_H * 4) as usize
}

#[test]
fn test_camera_frame_fills_both_eyes() {
    let (ctx, mut render, _log) = setup(0);
    publish(&ctx, 1, camera_len());

    let report = render.tick().unwrap();
    assert!(report.uploaded);
    assert!(report.capture_latency.is_some());
    assert_eq!(report.camera_draws, 2);
    assert_eq!(report.readback, None);

    let draws = &render.backend().draws;
    let (left_tex, src, dst, _) = draws[0];
    assert_eq!(src, Rect::new(0, 0, CAM_W as i32, CAM_H as i32));
    assert_eq!(dst, Rect::new(0, 0, EYE_W as i32, EYE_H as i32));

    let (right_tex, _, dst, _) = draws[1];
    assert_eq!(dst, Rect::new(EYE_W as i32, 0, EYE_W as i32, EYE_H as i32));
    assert_ne!(left_tex, right_tex);
    assert_eq!(render.backend().uploads, 2);
    assert_eq!(render.backend().presents, 1);
}

#[test]
fn test_same_frame_is_redrawn_without_upload() {
    let (ctx, mut render, _log) = setup(0);
    publish(&ctx, 1, camera_len());
    render.tick().unwrap();
    render.backend_mut().reset_frame();

    let report = render.tick().unwrap();
    assert!(!report.uploaded);
    assert_eq!(report.capture_latency, None);
    assert_eq!(report.camera_draws, 2);
    assert_eq!(render.backend().uploads, 2);
    assert_eq!(render.backend().textures, 2);

    publish(&ctx, 2, camera_len());
    assert!(render.tick().unwrap().uploaded);
    assert_eq!(render.backend().uploads, 4);
}

#[test]
fn test_crop_narrows_camera_source() {
    let (ctx, mut render, _log) = setup(1);
    publish(&ctx, 1, camera_len());
    render.tick().unwrap();

    let (_, src, _, _) = render.backend().draws[0];
    assert_eq!(src, Rect::new(1, 0, 2, CAM_H as i32));
}

#[test]
fn test_short_camera_frame_is_skipped() {
    let (ctx, mut render, _log) = setup(0);
    publish(&ctx, 1, 3);

    let report = render.tick().unwrap();
    assert!(!report.uploaded);
    assert_eq!(report.camera_draws, 0);
    assert_eq!(render.backend().textures, 0);
}

#[test]
fn test_overlay_counter_rotates_with_roll() {
    let (ctx, mut render, _log) = setup(0);
    let texture = render.backend_mut().create_texture(20, 2).unwrap();
    let mut request = DrawRequest::new(Rect::new(90, 49, 20, 2));
    request.angle = Angle::OppositeRoll;
    render.add_overlay(Overlay { texture, request });

    ctx.orientation.set_roll(12.0);
    render.tick().unwrap();

    let draws = &render.backend().draws;
    assert_eq!(draws.len(), 2);
    assert!(draws.iter().all(|&(_, _, _, angle)| angle == -12.0));
    assert_eq!(draws[1].2, Rect::new(290, 49, 20, 2));
}

#[test]
fn test_alert_indicator_in_both_eyes() {
    let (ctx, mut render, _log) = setup(0);

    render.tick().unwrap();
    assert!(render.backend().fills.is_empty());

    ctx.alerts.raise(Alert::Recording);
    render.tick().unwrap();

    let fills = &render.backend().fills;
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[0].0, Rect::new(136, 40, 24, 24));
    assert_eq!(fills[1].0, Rect::new(336, 40, 24, 24));
    assert_eq!(fills[0].1, [255, 170, 0, 255]);
}

#[test]
fn test_recording_feeds_readback_to_encoder() {
    let (ctx, mut render, log) = setup(0);
    ctx.output.set_recording_state(DestinationType::Stream);

    // First readback only primes the staging regions
    let report = render.tick().unwrap();
    assert_eq!(report.readback, Some(ReadbackOutcome::Dropped));
    assert!(report.encoder_spawned);

    let report = render.tick().unwrap();
    assert_eq!(report.readback, Some(ReadbackOutcome::Captured));
    assert!(!report.encoder_spawned);

    let frame_len = (EYE_W * 2 * EYE_H * 4) as usize;
    assert!(wait_for_push(&log));

    let pushed = log.pushed.lock().unwrap().clone();
    // Frame 1 is the first one mapped back
    assert_eq!(pushed[0], (frame_len, 1, 0));
    assert_eq!(log.constructed.load(Ordering::SeqCst), 1);

    assert!(render.shutdown());
    assert_eq!(ctx.output.recording_state(), DestinationType::Disabled);
    assert!(!ctx.output.recording_started());
}

#[test]
fn test_disabling_output_stops_readback() {
    let (ctx, mut render, _log) = setup(0);
    ctx.output.set_recording_state(DestinationType::Stream);
    render.tick().unwrap();

    ctx.output.set_recording_state(DestinationType::Disabled);
    let report = render.tick().unwrap();
    assert_eq!(report.readback, None);

    // Re-enabling primes again
    ctx.output.set_recording_state(DestinationType::Stream);
    assert_eq!(render.tick().unwrap().readback, Some(ReadbackOutcome::Dropped));
    render.shutdown();
}

#[test]
fn test_framebuffer_size_drives_readback_and_encoder() {
    // A fullscreen window can come up larger than the configured eyes
    let graphics = FakeGraphics {
        size: Some((640, 180)),
        ..FakeGraphics::default()
    };
    let transfer = FakeTransfer::default();
    let requested = transfer.requested.clone();
    let (ctx, mut render, log) = setup_with(0, graphics, transfer);
    ctx.output.set_recording_state(DestinationType::Record);

    render.tick().unwrap();
    assert_eq!(render.tick().unwrap().readback, Some(ReadbackOutcome::Captured));
    assert!(wait_for_push(&log));

    assert!(requested.lock().unwrap().iter().all(|&size| size == (640, 180)));
    let format = log.formats.lock().unwrap()[0];
    assert_eq!((format.width, format.height), (640, 180));
    assert_eq!(log.pushed.lock().unwrap()[0].0, 640 * 180 * 4);
    render.shutdown();
}

#[test]
fn test_snapshot_is_served_without_recording() {
    let (ctx, mut render, log) = setup(0);
    let path = std::env::temp_dir().join(format!("visor-hud-{}.png", std::process::id()));
    assert!(ctx.snapshots.request(path.clone()));
    assert!(!ctx.snapshots.request(path.with_extension("jpg")));

    // The first readback only primes
    let report = render.tick().unwrap();
    assert_eq!(report.readback, Some(ReadbackOutcome::Dropped));
    assert_eq!(report.snapshot, None);
    assert!(ctx.snapshots.is_pending());

    let report = render.tick().unwrap();
    assert_eq!(report.readback, Some(ReadbackOutcome::Captured));
    assert_eq!(report.snapshot.as_ref(), Some(&path));
    assert!(!ctx.snapshots.is_pending());

    let saved = image::open(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    // Only the left eye is kept
    assert_eq!((saved.width(), saved.height()), (EYE_W, EYE_H));

    // Nothing else needs the framebuffer, and nothing reached the encoder
    assert_eq!(render.tick().unwrap().readback, None);
    assert_eq!(log.constructed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_snapshot_while_recording_still_feeds_encoder() {
    let (ctx, mut render, log) = setup(0);
    ctx.output.set_recording_state(DestinationType::Record);
    let path = std::env::temp_dir().join(format!("visor-hud-rec-{}.png", std::process::id()));
    ctx.snapshots.request(path.clone());

    render.tick().unwrap();
    let report = render.tick().unwrap();
    assert_eq!(report.snapshot.as_ref(), Some(&path));
    assert!(wait_for_push(&log));

    std::fs::remove_file(&path).unwrap();
    render.shutdown();
}
