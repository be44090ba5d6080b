//! Owned process context shared by the acquisition, render and encode paths

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Local;

use crate::display::{snapshot_filename, SnapshotRequests};
use crate::notify::{Alerts, Notifier};
use crate::pipeline::FrameExchange;
use crate::recording::VideoOutput;
use crate::Config;

/// Process-wide quit flag, polled cooperatively
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Latest device roll in degrees, written by the motion collaborator
#[derive(Debug, Default)]
pub struct Orientation {
    roll: AtomicU64,
}

impl Orientation {
    pub fn set_roll(&self, degrees: f64) {
        self.roll.store(degrees.to_bits(), Ordering::Relaxed);
    }

    pub fn roll(&self) -> f64 {
        f64::from_bits(self.roll.load(Ordering::Relaxed))
    }
}

/// Everything the pipeline threads share, passed around explicitly
pub struct HudContext {
    pub config: ArcSwap<Config>,
    pub shutdown: ShutdownSignal,
    pub exchange: Arc<FrameExchange>,
    pub output: Arc<VideoOutput>,
    pub orientation: Arc<Orientation>,
    pub alerts: Arc<Alerts>,
    pub snapshots: Arc<SnapshotRequests>,
    pub notifier: Notifier,
}

impl HudContext {
    pub fn new(config: Config, notifier: Notifier) -> Self {
        let alerts = Arc::new(Alerts::default());
        let output = Arc::new(VideoOutput::new(notifier.clone(), alerts.clone()));

        Self {
            config: ArcSwap::from_pointee(config),
            shutdown: ShutdownSignal::default(),
            exchange: Arc::new(FrameExchange::new()),
            output,
            orientation: Arc::new(Orientation::default()),
            alerts,
            snapshots: Arc::new(SnapshotRequests::default()),
            notifier,
        }
    }

    /// Snapshot of the live configuration
    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Queue a date-coded still of the HUD under the recording directory.
    /// Returns false if one is already waiting.
    pub fn request_snapshot(&self) -> bool {
        let path = snapshot_filename(&self.config().recording.directory, Local::now());
        self.snapshots.request(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_is_shared() {
        let signal = ShutdownSignal::default();
        let clone = signal.clone();
        assert!(!signal.is_triggered());
        clone.trigger();
        assert!(signal.is_triggered());
    }

    #[test]
    fn test_snapshot_lands_in_recording_directory() {
        let mut config = Config::default();
        config.recording.directory = std::path::PathBuf::from("/data/hud");
        let (notifier, _rx) = Notifier::channel();
        let ctx = HudContext::new(config, notifier);

        assert!(ctx.request_snapshot());
        assert!(!ctx.request_snapshot());

        let path = ctx.snapshots.take().unwrap();
        assert_eq!(path.parent(), Some(std::path::Path::new("/data/hud")));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("snapshot-") && name.ends_with(".jpg"));
    }

    #[test]
    fn test_orientation_roundtrip() {
        let orientation = Orientation::default();
        assert_eq!(orientation.roll(), 0.0);
        orientation.set_roll(-12.5);
        assert_eq!(orientation.roll(), -12.5);
    }
}
