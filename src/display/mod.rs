pub mod backend;
pub mod compositor;
pub mod readback;
pub mod snapshot;

#[cfg(feature = "sdl-display")]
pub mod gl_readback;
#[cfg(feature = "sdl-display")]
pub mod sdl;

pub use backend::GraphicsBackend;
pub use compositor::{zoom_rects, Angle, DrawRequest, Placement, Rect, StereoCompositor, StereoPlacement};
pub use readback::{AsyncReadback, PixelTransfer, ReadbackOutcome};
pub use snapshot::{save_left_eye, snapshot_filename, SnapshotRequests};

#[cfg(feature = "sdl-display")]
pub use gl_readback::GlPixelTransfer;
#[cfg(feature = "sdl-display")]
pub use sdl::{open_window, DisplayCommand, SdlEvents, SdlGraphics, SdlWindow};
