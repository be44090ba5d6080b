//! Double-buffered GPU readback of the composited frame
//!
//! Each call starts an asynchronous copy of the framebuffer into one staging
//! region and maps the other, which was filled on the previous call. The
//! frame returned is therefore one frame old, but the caller never waits for
//! the copy it just issued.

use std::time::Instant;

use tracing::{debug, warn};

use crate::Result;

/// Two GPU-side staging regions for framebuffer transfers
pub trait PixelTransfer {
    /// Bind `region` and start copying the framebuffer into it
    fn begin_transfer(&mut self, region: usize, width: u32, height: u32) -> Result<()>;

    /// Map `region` and hand its bytes to `read`.
    ///
    /// Returns `Ok(false)` if the region could not be mapped (GPU busy).
    fn map_region(&mut self, region: usize, read: &mut dyn FnMut(&[u8])) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackOutcome {
    /// The destination holds the previous frame, top row first
    Captured,
    /// Nothing was written; treat as a dropped frame
    Dropped,
}

pub struct AsyncReadback<T: PixelTransfer> {
    transfer: T,
    width: u32,
    height: u32,
    index: usize,
    primed: bool,
}

impl<T: PixelTransfer> AsyncReadback<T> {
    pub fn new(transfer: T, width: u32, height: u32) -> Self {
        Self {
            transfer,
            width,
            height,
            index: 0,
            primed: false,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes of one RGBA frame
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Request this frame and collect the previous one into `dst`
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<ReadbackOutcome> {
        let started = Instant::now();
        let stride = self.width as usize * 4;
        let rows = self.height as usize;

        self.transfer.begin_transfer(self.index, self.width, self.height)?;
        let previous = 1 - self.index;
        self.index = previous;

        // The other region has never been written
        if !self.primed {
            self.primed = true;
            debug!("Readback primed");
            return Ok(ReadbackOutcome::Dropped);
        }

        let mapped = self
            .transfer
            .map_region(previous, &mut |src| flip_rows(src, dst, stride, rows))?;

        metrics::histogram!("readback_time_us").record(started.elapsed().as_micros() as f64);

        if mapped {
            Ok(ReadbackOutcome::Captured)
        } else {
            warn!("Failed to map pixel buffer, dropping frame");
            metrics::counter!("frames_dropped").increment(1);
            Ok(ReadbackOutcome::Dropped)
        }
    }

    /// Forget the in-flight transfer, e.g. when output is switched off
    pub fn reset(&mut self) {
        self.primed = false;
    }
}

/// Copy `rows` rows of `stride` bytes from `src` into `dst`, bottom row first
pub fn flip_rows(src: &[u8], dst: &mut [u8], stride: usize, rows: usize) {
    for (row, out) in dst.chunks_exact_mut(stride).take(rows).enumerate() {
        let start = (rows - 1 - row) * stride;
        if let Some(line) = src.get(start..start + stride) {
            out.copy_from_slice(line);
        }
    }
}
