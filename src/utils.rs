use std::io;
use std::path::Path;

use tracing::{debug, info};

/// Current size of a file on disk
pub fn file_size(path: &Path) -> io::Result<u64> {
    std::fs::metadata(path).map(|meta| meta.len())
}

/// Device path of a V4L2 node
pub fn video_device(id: u32) -> String {
    format!("/dev/video{}", id)
}

/// List `/dev/videoN` nodes present under `root` (normally `/`), N < 10
pub fn scan_video_devices(root: &Path) -> Vec<u32> {
    info!("Scanning capture devices...");

    let found: Vec<u32> = (0..10)
        .filter(|&id| {
            let path = root.join(video_device(id).trim_start_matches('/'));
            let exists = path.exists();
            if exists {
                debug!("Found {}", path.display());
            }
            exists
        })
        .collect();

    info!("Capture devices present: {:?}", found);
    found
}

/// First of `candidates`, in preference order, that `installed` accepts
pub fn first_available_by<'a>(
    candidates: &[&'a str],
    installed: impl Fn(&str) -> bool,
) -> Option<&'a str> {
    candidates.iter().copied().find(|name| installed(name))
}

/// First of `candidates` with a registered GStreamer element factory
#[cfg(feature = "gstreamer-pipeline")]
pub fn first_available<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    let found = first_available_by(candidates, |name| {
        gstreamer::ElementFactory::find(name).is_some()
    });
    debug!("Element choice from {:?}: {:?}", candidates, found);
    found
}
