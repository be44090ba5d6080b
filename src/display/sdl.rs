//! SDL2 window and renderer
//!
//! Opens the double-width stereo window on the OpenGL render driver so the
//! pixel-pack readback can read the same framebuffer the renderer draws to.

use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::render::{BlendMode, Canvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::{EventPump, Sdl, VideoSubsystem};
use tracing::info;

use super::backend::GraphicsBackend;
use super::compositor::Rect;
use crate::recording::DestinationType;
use crate::{DisplayConfig, HudError, Result};

fn graphics_err(e: impl ToString) -> HudError {
    HudError::Graphics(e.to_string())
}

fn sdl_rect(r: Rect) -> sdl2::rect::Rect {
    sdl2::rect::Rect::new(r.x, r.y, r.w.max(0) as u32, r.h.max(0) as u32)
}

/// The window canvas and the video subsystem that resolves GL symbols
pub struct SdlWindow {
    pub video: VideoSubsystem,
    pub canvas: Canvas<Window>,
}

/// Create the stereo window: two eyes side by side
pub fn open_window(sdl: &Sdl, config: &DisplayConfig) -> Result<SdlWindow> {
    sdl2::hint::set("SDL_RENDER_DRIVER", "opengl");
    // Renderer and raw GL calls share state; batching would reorder them
    sdl2::hint::set("SDL_RENDER_BATCHING", "0");

    let video = sdl.video().map_err(graphics_err)?;
    let (width, height) = config.output_size();

    let mut builder = video.window("Visor HUD", width, height);
    builder.position_centered().opengl();
    if config.fullscreen {
        builder.fullscreen_desktop();
    }
    let window = builder.build().map_err(graphics_err)?;

    let mut canvas = window
        .into_canvas()
        .accelerated()
        .present_vsync()
        .build()
        .map_err(graphics_err)?;
    canvas.set_blend_mode(BlendMode::Blend);

    info!(
        "Opened {}x{} window ({} per eye)",
        width, height, config.eye_width
    );

    // The renderer's GL context is now current on this thread
    Ok(SdlWindow { video, canvas })
}

/// [`GraphicsBackend`] over an SDL2 canvas
pub struct SdlGraphics<'t> {
    canvas: Canvas<Window>,
    creator: &'t TextureCreator<WindowContext>,
    size: (u32, u32),
}

impl<'t> SdlGraphics<'t> {
    pub fn new(canvas: Canvas<Window>, creator: &'t TextureCreator<WindowContext>) -> Result<Self> {
        let size = canvas.output_size().map_err(graphics_err)?;
        Ok(Self {
            canvas,
            creator,
            size,
        })
    }
}

impl<'t> GraphicsBackend for SdlGraphics<'t> {
    type Texture = Texture<'t>;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<Texture<'t>> {
        // ABGR8888 is R,G,B,A in memory on little-endian
        self.creator
            .create_texture_streaming(PixelFormatEnum::ABGR8888, width, height)
            .map_err(graphics_err)
    }

    fn update_texture(&mut self, texture: &mut Texture<'t>, pixels: &[u8], pitch: usize) -> Result<()> {
        texture.update(None, pixels, pitch).map_err(graphics_err)
    }

    fn texture_size(&self, texture: &Texture<'t>) -> (u32, u32) {
        let query = texture.query();
        (query.width, query.height)
    }

    fn output_size(&self) -> (u32, u32) {
        self.size
    }

    fn clear(&mut self) {
        self.canvas.set_draw_color(Color::RGBA(0, 0, 0, 255));
        self.canvas.clear();
    }

    fn draw(&mut self, texture: &Texture<'t>, src: Rect, dst: Rect, angle: f64) -> Result<()> {
        let drawn = if angle == 0.0 {
            self.canvas.copy(texture, sdl_rect(src), sdl_rect(dst))
        } else {
            self.canvas
                .copy_ex(texture, sdl_rect(src), sdl_rect(dst), angle, None, false, false)
        };
        drawn.map_err(graphics_err)
    }

    fn fill_rect(&mut self, rect: Rect, rgba: [u8; 4]) -> Result<()> {
        let [r, g, b, a] = rgba;
        self.canvas.set_draw_color(Color::RGBA(r, g, b, a));
        self.canvas.fill_rect(sdl_rect(rect)).map_err(graphics_err)
    }

    fn present(&mut self) {
        self.canvas.present();
    }
}

/// Requests coming from the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCommand {
    Quit,
    Output(DestinationType),
    /// Save a still of the HUD
    Snapshot,
}

pub struct SdlEvents {
    pump: EventPump,
}

impl SdlEvents {
    pub fn new(sdl: &Sdl) -> Result<Self> {
        Ok(Self {
            pump: sdl.event_pump().map_err(graphics_err)?,
        })
    }

    pub fn poll(&mut self) -> Vec<DisplayCommand> {
        let mut commands = Vec::new();
        for event in self.pump.poll_iter() {
            let command = match event {
                Event::Quit { .. } => {
                    info!("Quit event received");
                    DisplayCommand::Quit
                }
                Event::KeyDown {
                    keycode: Some(key),
                    repeat: false,
                    ..
                } => match key {
                    Keycode::Escape | Keycode::Q => DisplayCommand::Quit,
                    Keycode::R => DisplayCommand::Output(DestinationType::Record),
                    Keycode::S => DisplayCommand::Output(DestinationType::Stream),
                    Keycode::T => DisplayCommand::Output(DestinationType::RecordStream),
                    Keycode::X => DisplayCommand::Output(DestinationType::Disabled),
                    Keycode::P => DisplayCommand::Snapshot,
                    _ => continue,
                },
                _ => continue,
            };
            commands.push(command);
        }
        commands
    }
}
