//! Graphics backend capability used by the compositor and render loop

use super::compositor::Rect;
use crate::Result;

/// Something that can hold textures and issue textured draw calls
pub trait GraphicsBackend {
    type Texture;

    /// Streaming RGBA texture for camera frames
    fn create_texture(&mut self, width: u32, height: u32) -> Result<Self::Texture>;

    fn update_texture(&mut self, texture: &mut Self::Texture, pixels: &[u8], pitch: usize) -> Result<()>;

    fn texture_size(&self, texture: &Self::Texture) -> (u32, u32);

    /// Size of the render target (both eyes)
    fn output_size(&self) -> (u32, u32);

    fn clear(&mut self);

    /// Copy `src` of `texture` into `dst`, rotated by `angle` degrees about the
    /// destination centre
    fn draw(&mut self, texture: &Self::Texture, src: Rect, dst: Rect, angle: f64) -> Result<()>;

    fn fill_rect(&mut self, rect: Rect, rgba: [u8; 4]) -> Result<()>;

    fn present(&mut self);
}
