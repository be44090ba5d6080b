//! Visor stereo HUD: cameras in, composited HUD out, optional recording/streaming

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Parser, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use visor::capture::gst_capture::GstCameraPipeline;
use visor::capture::spawn_acquisition;
use visor::display::{
    open_window, Angle, DisplayCommand, DrawRequest, GlPixelTransfer, GraphicsBackend, Rect,
    SdlEvents, SdlGraphics, SdlWindow,
};
use visor::notify::{Announcement, Notifier};
use visor::recording::gst_encoder::GstEncoderFactory;
use visor::recording::DestinationType;
use visor::render::{Overlay, RenderLoop};
use visor::{utils, CameraType, Config, HudContext};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CameraArg {
    Usb,
    Csi,
}

/// Visor - stereo camera HUD
#[derive(Parser, Debug)]
#[command(name = "visor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run fullscreen
    #[arg(short, long)]
    fullscreen: bool,

    /// Write logs to this file instead of stdout
    #[arg(short, long)]
    logfile: Option<PathBuf>,

    /// Directory recordings are written to
    #[arg(short = 'p', long)]
    record_path: Option<PathBuf>,

    /// Start recording immediately
    #[arg(short, long)]
    record: bool,

    /// Start streaming immediately
    #[arg(short, long)]
    stream: bool,

    /// Start recording and streaming immediately
    #[arg(short = 't', long)]
    record_stream: bool,

    /// Camera interface
    #[arg(short, long, value_enum)]
    camera: Option<CameraArg>,

    /// Number of cameras
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u8).range(1..=2))]
    camcount: Option<u8>,

    /// Run without cameras (HUD only)
    #[arg(long)]
    no_camera: bool,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn startup_destination(&self) -> DestinationType {
        match (self.record, self.stream, self.record_stream) {
            (_, _, true) | (true, true, _) => DestinationType::RecordStream,
            (true, false, false) => DestinationType::Record,
            (false, true, false) => DestinationType::Stream,
            _ => DestinationType::Disabled,
        }
    }

    fn apply(&self, config: &mut Config) {
        if self.fullscreen {
            config.display.fullscreen = true;
        }
        if let Some(path) = &self.record_path {
            config.recording.directory = path.clone();
        }
        if let Some(camera) = self.camera {
            config.capture.camera_type = match camera {
                CameraArg::Usb => CameraType::Usb,
                CameraArg::Csi => CameraType::Csi,
            };
        }
        if let Some(count) = self.camcount {
            config.capture.camera_count = count;
        }
        if self.no_camera {
            config.capture.enabled = false;
        }
    }
}

fn init_logging(logfile: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("visor=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime());

    match logfile {
        Some(path) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(File::create(path)?))
            .init(),
        None => builder.init(),
    }
    Ok(())
}

/// Horizon marker that counter-rotates with the device roll
fn horizon<G: GraphicsBackend>(backend: &mut G, config: &Config) -> Result<Overlay<G::Texture>> {
    const WIDTH: u32 = 240;
    const HEIGHT: u32 = 4;

    let mut texture = backend.create_texture(WIDTH, HEIGHT)?;
    let pixels = [255u8, 255, 255, 200].repeat((WIDTH * HEIGHT) as usize);
    backend.update_texture(&mut texture, &pixels, WIDTH as usize * 4)?;

    let eye_w = config.display.eye_width as i32;
    let eye_h = config.display.eye_height as i32;
    let mut request = DrawRequest::new(Rect::new(
        (eye_w - WIDTH as i32) / 2,
        (eye_h - HEIGHT as i32) / 2,
        WIDTH as i32,
        HEIGHT as i32,
    ));
    request.angle = Angle::OppositeRoll;

    Ok(Overlay { texture, request })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    init_logging(args.logfile.as_ref())?;

    info!("Visor launching...");

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    std::fs::create_dir_all(&config.recording.directory)?;

    let (notifier, announcements) = Notifier::channel();
    let ctx = HudContext::new(config.clone(), notifier);

    // The speech collaborator is external; here announcements are only logged
    tokio::spawn(async move {
        while let Ok(announcement) = announcements.recv_async().await {
            debug!("Announcement delivered: {}", announcement);
        }
    });

    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            shutdown.trigger();
        }
    });

    // Cameras
    let mut camera = None;
    let mut acquisition = None;
    if config.capture.enabled {
        if config.capture.camera_type == CameraType::Usb {
            let present = utils::scan_video_devices(std::path::Path::new("/"));
            let (left, right) = config.capture.camera_ids();
            for id in [left, right].into_iter().take(config.capture.camera_count as usize) {
                if !present.contains(&id) {
                    warn!("Camera {} not found", utils::video_device(id));
                }
            }
        }

        let (pipeline, rig) = GstCameraPipeline::new(&config.capture)?;
        pipeline.start_stream()?;
        acquisition = Some(spawn_acquisition(
            rig,
            ctx.exchange.clone(),
            ctx.shutdown.clone(),
            &config.capture,
        )?);
        camera = Some(pipeline);
    } else {
        info!("Running without cameras");
    }

    // Display
    let sdl = sdl2::init().map_err(|e| eyre!(e))?;
    let SdlWindow { video, canvas } = open_window(&sdl, &config.display)?;
    let creator = canvas.texture_creator();
    let graphics = SdlGraphics::new(canvas, &creator)?;
    let (width, height) = graphics.output_size();
    let transfer = GlPixelTransfer::new(
        |symbol| video.gl_get_proc_address(symbol) as *const std::ffi::c_void,
        width,
        height,
    )?;
    let mut events = SdlEvents::new(&sdl)?;

    let factory = GstEncoderFactory::new()?;
    let mut render = RenderLoop::new(&ctx, graphics, transfer, factory);
    let marker = horizon(render.backend_mut(), &config)?;
    render.add_overlay(marker);

    let destination = args.startup_destination();
    if destination.is_enabled() {
        ctx.output.set_recording_state(destination);
    }

    info!("Entering render loop");
    while !ctx.shutdown.is_triggered() {
        for command in events.poll() {
            match command {
                DisplayCommand::Quit => ctx.shutdown.trigger(),
                DisplayCommand::Output(requested) => {
                    // Pressing the key of the active destination turns it off
                    let next = if ctx.output.recording_state() == requested {
                        DestinationType::Disabled
                    } else {
                        requested
                    };
                    ctx.output.set_recording_state(next);
                }
                DisplayCommand::Snapshot => {
                    ctx.request_snapshot();
                }
            }
        }

        if let Err(e) = render.tick_paced() {
            error!("Render error: {}", e);
        }
    }

    // Shutdown: announce, stop output, then cameras
    ctx.notifier.announce(Announcement::ShuttingDown);
    ctx.shutdown.trigger();

    if !render.shutdown() {
        warn!("Encoder was forced down");
    }

    if let Some(handle) = acquisition {
        match handle.join() {
            Ok(Ok(())) => info!("Acquisition stopped"),
            Ok(Err(e)) => warn!("Acquisition ended with error: {}", e),
            Err(_) => error!("Acquisition thread panicked"),
        }
    }
    drop(camera);

    ctx.output.clear_slots();
    ctx.exchange.clear();

    info!("Visor shutting down");
    Ok(())
}
