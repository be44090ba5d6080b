//! OpenGL pixel-pack buffers behind [`PixelTransfer`]

use glow::HasContext;
use tracing::info;

use super::readback::PixelTransfer;
use crate::{HudError, Result};

pub struct GlPixelTransfer {
    gl: glow::Context,
    pbos: [glow::Buffer; 2],
    size: i32,
}

impl GlPixelTransfer {
    /// Allocate two PBOs large enough for one `width` x `height` RGBA frame.
    ///
    /// The GL context the loader resolves against must be current on this
    /// thread for the lifetime of the transfer.
    pub fn new<F>(loader: F, width: u32, height: u32) -> Result<Self>
    where
        F: FnMut(&str) -> *const std::ffi::c_void,
    {
        let size = (width * height * 4) as i32;
        let gl = unsafe { glow::Context::from_loader_function(loader) };

        let pbos = unsafe {
            let pbos = [
                gl.create_buffer().map_err(HudError::Readback)?,
                gl.create_buffer().map_err(HudError::Readback)?,
            ];
            for pbo in pbos {
                gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(pbo));
                gl.buffer_data_size(glow::PIXEL_PACK_BUFFER, size, glow::STREAM_READ);
            }
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            pbos
        };

        info!("Readback buffers allocated: 2 x {} bytes", size);
        Ok(Self { gl, pbos, size })
    }
}

impl PixelTransfer for GlPixelTransfer {
    fn begin_transfer(&mut self, region: usize, width: u32, height: u32) -> Result<()> {
        unsafe {
            self.gl
                .bind_buffer(glow::PIXEL_PACK_BUFFER, Some(self.pbos[region]));
            self.gl.read_pixels(
                0,
                0,
                width as i32,
                height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::BufferOffset(0),
            );
        }
        Ok(())
    }

    fn map_region(&mut self, region: usize, read: &mut dyn FnMut(&[u8])) -> Result<bool> {
        unsafe {
            self.gl
                .bind_buffer(glow::PIXEL_PACK_BUFFER, Some(self.pbos[region]));
            let ptr = self
                .gl
                .map_buffer_range(glow::PIXEL_PACK_BUFFER, 0, self.size, glow::MAP_READ_BIT);

            if ptr.is_null() {
                self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
                return Ok(false);
            }

            read(std::slice::from_raw_parts(ptr, self.size as usize));

            self.gl.unmap_buffer(glow::PIXEL_PACK_BUFFER);
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
        Ok(true)
    }
}

impl Drop for GlPixelTransfer {
    fn drop(&mut self) {
        unsafe {
            for pbo in self.pbos {
                self.gl.delete_buffer(pbo);
            }
        }
    }
}
