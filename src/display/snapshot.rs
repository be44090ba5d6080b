//! One-shot still capture of the composited HUD
//!
//! A request names the file to write. The render loop serves it from its
//! next completed readback and saves the left eye as a JPEG.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Local};
use image::{imageops, DynamicImage, RgbaImage};
use tracing::{info, warn};

use crate::{HudError, Result};

/// `<dir>/snapshot-YYYYmmdd_HHMMSS.jpg`
pub fn snapshot_filename(dir: &Path, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("snapshot-{}.jpg", now.format("%Y%m%d_%H%M%S")))
}

/// At most one pending snapshot, shared with whoever asks for one
#[derive(Debug, Default)]
pub struct SnapshotRequests {
    pending: Mutex<Option<PathBuf>>,
}

impl SnapshotRequests {
    fn lock(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a snapshot. Returns false if one is already waiting.
    pub fn request(&self, path: PathBuf) -> bool {
        let mut pending = self.lock();
        if let Some(waiting) = pending.as_ref() {
            warn!(
                "Snapshot already requested ({}), ignoring new request",
                waiting.display()
            );
            return false;
        }
        info!("Snapshot requested: {}", path.display());
        *pending = Some(path);
        true
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Take the pending request, leaving room for the next one
    pub fn take(&self) -> Option<PathBuf> {
        self.lock().take()
    }
}

/// Write the left eye of a top-down RGBA framebuffer to `path`.
///
/// The format follows the file extension.
pub fn save_left_eye(pixels: &[u8], width: u32, height: u32, eye_width: u32, path: &Path) -> Result<()> {
    let started = Instant::now();
    let frame = RgbaImage::from_raw(width, height, pixels.to_vec()).ok_or_else(|| {
        HudError::Readback(format!(
            "snapshot buffer of {} bytes does not hold {}x{} pixels",
            pixels.len(),
            width,
            height
        ))
    })?;

    let eye = imageops::crop_imm(&frame, 0, 0, eye_width.min(width), height).to_image();
    // JPEG has no alpha channel
    DynamicImage::ImageRgba8(eye).to_rgb8().save(path)?;

    info!(
        "Snapshot saved to {} in {:?}",
        path.display(),
        started.elapsed()
    );
    Ok(())
}
